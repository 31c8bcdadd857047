//! The `put` and `extend` operators: field assignment.
//!
//! `put field=expr, ...` replaces the schema with exactly the assigned
//! fields; `extend` appends them. A name that already exists in the output
//! is ignored with a warning; the first assignment wins.

use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::ArrayRef;

use crate::diag::Diagnostic;
use crate::expr::{normalize, tailor, EvalSession, Expr};
use crate::operator::{
    ElementType, EventStream, ExecCtrl, Operator, OperatorInput, OperatorOutput, Poll,
};
use crate::operators::eval_to_column;
use crate::slice::{transform_columns, IndexedTransformation, TableSlice};
use crate::types::Field;

/// Whether assignments replace the schema or extend it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Output schema is exactly the assigned fields.
    Put,
    /// Assigned fields append to the existing schema.
    Extend,
}

impl PutMode {
    fn name(&self) -> &'static str {
        match self {
            PutMode::Put => "put",
            PutMode::Extend => "extend",
        }
    }
}

/// One `field=expr` assignment; a missing expression copies the field of
/// the same name.
#[derive(Debug, Clone)]
pub struct Put {
    mode: PutMode,
    assignments: Vec<(String, Expr)>,
}

impl Put {
    pub fn new(mode: PutMode, assignments: Vec<(String, Option<Expr>)>) -> Self {
        let assignments = assignments
            .into_iter()
            .map(|(field, expr)| {
                let expr = expr.unwrap_or_else(|| Expr::field(field.clone()));
                (field, normalize(expr))
            })
            .collect();
        Put { mode, assignments }
    }
}

impl Operator for Put {
    fn name(&self) -> &str {
        self.mode.name()
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
        Ok(OperatorOutput::Events(Box::new(PutStream {
            input: input.into_events(),
            ctrl,
            mode: self.mode,
            assignments: self.assignments.clone(),
            session: EvalSession::new(),
        })))
    }

    fn clone_box(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

struct PutStream {
    input: Box<dyn EventStream>,
    ctrl: ExecCtrl,
    mode: PutMode,
    assignments: Vec<(String, Expr)>,
    session: EvalSession,
}

impl PutStream {
    fn apply(&self, slice: &TableSlice) -> Result<TableSlice, crate::slice::SliceError> {
        let leaves = slice.schema().num_leaves();
        if leaves == 0 {
            return Ok(slice.clone());
        }
        // Evaluate every assignment up front; the transformation closure
        // then only splices arrays.
        let mut duplicates: HashSet<String> = HashSet::new();
        if self.mode == PutMode::Extend {
            for leaf in slice.schema().leaves() {
                duplicates.insert(leaf.key().to_string());
            }
        }
        let mut new_columns: Vec<(Field, ArrayRef)> = Vec::new();
        for (field, expr) in &self.assignments {
            if !duplicates.insert(field.clone()) {
                self.ctrl.warn(format!(
                    "`{}` operator ignores duplicate or conflicting assignment for field \
                     `{field}` in schema `{}`",
                    self.mode.name(),
                    slice.schema_name()
                ));
                continue;
            }
            let tailored = tailor(expr, slice.schema());
            let (ty, array) =
                eval_to_column(&tailored, slice, &self.session, self.ctrl.diagnostics());
            new_columns.push((Field::new(field.clone(), ty), array));
        }
        // Drop every leaf except the last for `put`, then replace the last
        // leaf with (last leaf +) the new fields.
        let mut transformations: Vec<IndexedTransformation> = Vec::new();
        if self.mode == PutMode::Put {
            for index in 0..leaves - 1 {
                transformations.push(IndexedTransformation::drop_column(index));
            }
        }
        let mode = self.mode;
        let splice = move |field: &Field, array: &ArrayRef| {
            let mut replacement = Vec::with_capacity(new_columns.len() + 1);
            if mode == PutMode::Extend {
                replacement.push((field.clone(), Arc::clone(array)));
            }
            replacement.extend(
                new_columns
                    .iter()
                    .map(|(f, a)| (f.clone(), Arc::clone(a))),
            );
            replacement
        };
        transformations.push(IndexedTransformation::new(leaves - 1, splice));
        transform_columns(slice, &transformations)
    }
}

impl EventStream for PutStream {
    fn poll_next(&mut self) -> Poll<TableSlice> {
        if self.ctrl.is_cancelled() {
            return Poll::Done;
        }
        match self.input.poll_next() {
            Poll::Done => Poll::Done,
            Poll::Pending => Poll::Pending,
            Poll::Output(slice) => match self.apply(&slice) {
                Ok(out) => Poll::Output(out),
                Err(e) => {
                    self.ctrl.error(e.to_string());
                    Poll::Done
                }
            },
        }
    }
}
