//! The `select` and `drop` operators: leaf-level projection.

use crate::diag::Diagnostic;
use crate::operator::{
    ElementType, EventStream, ExecCtrl, Operator, OperatorInput, OperatorOutput, Poll,
    SchemaCache,
};
use crate::slice::{transform_columns, IndexedTransformation, TableSlice};

/// Keeps only the listed fields, in schema order.
#[derive(Debug, Clone)]
pub struct Select {
    fields: Vec<String>,
}

impl Select {
    pub fn new(fields: Vec<String>) -> Self {
        Select { fields }
    }
}

/// Drops the listed fields, keeping everything else.
#[derive(Debug, Clone)]
pub struct DropFields {
    fields: Vec<String>,
}

impl DropFields {
    pub fn new(fields: Vec<String>) -> Self {
        DropFields { fields }
    }
}

fn project_stream(
    input: OperatorInput,
    ctrl: ExecCtrl,
    operator: &'static str,
    fields: Vec<String>,
    keep_listed: bool,
) -> OperatorOutput {
    OperatorOutput::Events(Box::new(ProjectStream {
        input: input.into_events(),
        ctrl,
        operator,
        fields,
        keep_listed,
        dropped: SchemaCache::new(),
    }))
}

impl Operator for Select {
    fn name(&self) -> &str {
        "select"
    }

    fn input_type(&self) -> ElementType {
        ElementType::Events
    }

    fn output_type(&self) -> ElementType {
        ElementType::Events
    }

    fn instantiate(
        &self,
        input: OperatorInput,
        ctrl: ExecCtrl,
    ) -> Result<OperatorOutput, Diagnostic> {
        Ok(project_stream(
            input,
            ctrl,
            "select",
            self.fields.clone(),
            true,
        ))
    }

    fn clone_box(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

impl Operator for DropFields {
    fn name(&self) -> &str {
        "drop"
    }

    fn input_type(&self) -> ElementType {
        ElementType::Events
    }

    fn output_type(&self) -> ElementType {
        ElementType::Events
    }

    fn instantiate(
        &self,
        input: OperatorInput,
        ctrl: ExecCtrl,
    ) -> Result<OperatorOutput, Diagnostic> {
        Ok(project_stream(
            input,
            ctrl,
            "drop",
            self.fields.clone(),
            false,
        ))
    }

    fn clone_box(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

struct ProjectStream {
    input: Box<dyn EventStream>,
    ctrl: ExecCtrl,
    operator: &'static str,
    fields: Vec<String>,
    /// `true` keeps the listed leaves (`select`), `false` removes them
    /// (`drop`).
    keep_listed: bool,
    /// Leaf indices to remove, resolved once per schema.
    dropped: SchemaCache<Vec<usize>>,
}

impl EventStream for ProjectStream {
    fn poll_next(&mut self) -> Poll<TableSlice> {
        if self.ctrl.is_cancelled() {
            return Poll::Done;
        }
        match self.input.poll_next() {
            Poll::Done => Poll::Done,
            Poll::Pending => Poll::Pending,
            Poll::Output(slice) => {
                let fields = &self.fields;
                let keep_listed = self.keep_listed;
                let operator = self.operator;
                let ctrl = &self.ctrl;
                let dropped = self.dropped.entry(&slice, |slice| {
                    let mut listed = Vec::new();
                    for field in fields {
                        match slice.schema().resolve(field) {
                            Some((_, index)) => listed.push(index),
                            None => ctrl.warn(format!(
                                "`{operator}` operator: field `{field}` does not exist in \
                                 schema `{}`",
                                slice.schema_name()
                            )),
                        }
                    }
                    let mut dropped: Vec<usize> = if keep_listed {
                        (0..slice.schema().num_leaves())
                            .filter(|i| !listed.contains(i))
                            .collect()
                    } else {
                        listed
                    };
                    dropped.sort_unstable();
                    dropped.dedup();
                    dropped
                });
                if dropped.is_empty() {
                    return Poll::Output(slice);
                }
                let transformations: Vec<IndexedTransformation> = dropped
                    .iter()
                    .map(|&index| IndexedTransformation::drop_column(index))
                    .collect();
                match transform_columns(&slice, &transformations) {
                    Ok(projected) => Poll::Output(projected),
                    Err(e) => {
                        self.ctrl.error(e.to_string());
                        Poll::Done
                    }
                }
            }
        }
    }
}
