//! The `summarize` operator: grouped aggregation.
//!
//! `summarize out=function(expr), ... [--by field, ...]` consumes its
//! whole input, maintains one aggregation instance per function per group
//! key, and emits a single batch of results when the input drains. Groups
//! appear in first-seen order.

use std::fmt;
use std::sync::Arc;

use arrow::array::BooleanArray;
use indexmap::IndexMap;

use crate::aggregation::{Aggregation, AggregationRegistry};
use crate::data::Data;
use crate::diag::Diagnostic;
use crate::expr::eval::data_type_of;
use crate::expr::{eval, tailor, EvalSession, Expr};
use crate::operator::{
    ElementType, EventStream, ExecCtrl, Operator, OperatorInput, OperatorOutput, Poll,
};
use crate::slice::{filter, SliceBuilder, TableSlice};
use crate::types::{Field, Type};

/// One aggregation column: output field name, function, input expression.
#[derive(Debug, Clone)]
pub struct AggregationSpec {
    pub output: String,
    pub function: String,
    pub expr: Expr,
}

impl AggregationSpec {
    pub fn new(output: impl Into<String>, function: impl Into<String>, expr: Expr) -> Self {
        AggregationSpec {
            output: output.into(),
            function: function.into(),
            expr,
        }
    }
}

/// Grouped aggregation over the entire input stream.
#[derive(Clone)]
pub struct Summarize {
    aggregations: Vec<AggregationSpec>,
    group_by: Vec<String>,
    registry: Arc<AggregationRegistry>,
}

impl fmt::Debug for Summarize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Summarize")
            .field("aggregations", &self.aggregations)
            .field("group_by", &self.group_by)
            .finish()
    }
}

impl Summarize {
    pub fn new(aggregations: Vec<AggregationSpec>, group_by: Vec<String>) -> Self {
        Self::with_registry(
            aggregations,
            group_by,
            Arc::new(AggregationRegistry::with_builtins()),
        )
    }

    pub fn with_registry(
        aggregations: Vec<AggregationSpec>,
        group_by: Vec<String>,
        registry: Arc<AggregationRegistry>,
    ) -> Self {
        Summarize {
            aggregations,
            group_by,
            registry,
        }
    }
}

impl Operator for Summarize {
    fn name(&self) -> &str {
        "summarize"
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
        for spec in &self.aggregations {
            if !self.registry.contains(&spec.function) {
                return Err(Diagnostic::error(format!(
                    "unknown aggregation function `{}`",
                    spec.function
                ))
                .usage("summarize <field>=<function>(<expr>)... [--by <field>...]"));
            }
        }
        Ok(OperatorOutput::Events(Box::new(SummarizeStream {
            input: input.into_events(),
            ctrl,
            aggregations: self.aggregations.clone(),
            group_by: self.group_by.clone(),
            registry: Arc::clone(&self.registry),
            session: EvalSession::new(),
            groups: IndexMap::new(),
            done: false,
        })))
    }

    fn clone_box(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

struct SummarizeStream {
    input: Box<dyn EventStream>,
    ctrl: ExecCtrl,
    aggregations: Vec<AggregationSpec>,
    group_by: Vec<String>,
    registry: Arc<AggregationRegistry>,
    session: EvalSession,
    /// One aggregation instance per spec, per group key; first-seen order.
    groups: IndexMap<Vec<Data>, Vec<Box<dyn Aggregation>>>,
    done: bool,
}

impl SummarizeStream {
    fn ingest(&mut self, slice: &TableSlice) {
        if slice.is_empty() {
            return;
        }
        // Group keys, row-wise.
        let key_columns: Vec<Vec<Data>> = self
            .group_by
            .iter()
            .map(|field| {
                let expr = tailor(&Expr::field(field.clone()), slice.schema());
                let (ty, array) = crate::operators::eval_to_column(
                    &expr,
                    slice,
                    &self.session,
                    self.ctrl.diagnostics(),
                );
                (0..slice.rows())
                    .map(|row| crate::slice::materialize_at(&ty, array.as_ref(), row))
                    .collect()
            })
            .collect();
        let mut membership: IndexMap<Vec<Data>, Vec<bool>> = IndexMap::new();
        for row in 0..slice.rows() {
            let key: Vec<Data> = key_columns.iter().map(|col| col[row].clone()).collect();
            let mask = membership
                .entry(key)
                .or_insert_with(|| vec![false; slice.rows()]);
            mask[row] = true;
        }
        for (key, mask) in membership {
            let rows = match filter(slice, &BooleanArray::from(mask)) {
                Ok(Some(rows)) => rows,
                Ok(None) => continue,
                Err(e) => {
                    self.ctrl.error(e.to_string());
                    return;
                }
            };
            let registry = &self.registry;
            let aggregations = &self.aggregations;
            let instances = self.groups.entry(key).or_insert_with(|| {
                aggregations
                    .iter()
                    .map(|spec| {
                        registry
                            .make(&spec.function)
                            .expect("functions checked at instantiation")
                    })
                    .collect()
            });
            for (spec, instance) in self.aggregations.iter().zip(instances) {
                let tailored = tailor(&spec.expr, rows.schema());
                for series in eval(&tailored, &rows, &self.session, self.ctrl.diagnostics()) {
                    instance.update(&series, self.ctrl.diagnostics());
                }
            }
        }
    }

    fn emit(&mut self) -> Result<TableSlice, Diagnostic> {
        let rows: Vec<Vec<Data>> = self
            .groups
            .iter()
            .map(|(key, instances)| {
                key.iter()
                    .cloned()
                    .chain(instances.iter().map(|i| i.get()))
                    .collect()
            })
            .collect();
        // Column types come from the first non-null value of each column.
        let num_columns = self.group_by.len() + self.aggregations.len();
        let names: Vec<&str> = self
            .group_by
            .iter()
            .map(String::as_str)
            .chain(self.aggregations.iter().map(|s| s.output.as_str()))
            .collect();
        let mut fields = Vec::with_capacity(num_columns);
        for (column, name) in names.iter().enumerate() {
            let ty = rows
                .iter()
                .map(|row| &row[column])
                .find(|v| !v.is_null())
                .map(data_type_of)
                .unwrap_or_else(Type::null);
            fields.push(Field::new(*name, ty));
        }
        let expected: Vec<crate::types::Kind> = fields.iter().map(|f| f.ty.kind()).collect();
        let schema = Type::named(
            "sentra.summarize",
            Type::record(fields).map_err(|e| Diagnostic::error(e.to_string()))?,
        );
        let mut builder =
            SliceBuilder::new(schema).map_err(|e| Diagnostic::error(e.to_string()))?;
        for row in &rows {
            // A value whose type clashes with the inferred column type
            // degrades to null rather than failing the batch.
            let coerced: Vec<Data> = row
                .iter()
                .zip(&expected)
                .map(|(value, kind)| {
                    if !value.is_null() && value.kind() != *kind {
                        Data::Null
                    } else {
                        value.clone()
                    }
                })
                .collect();
            builder
                .push_row(&coerced)
                .map_err(|e| Diagnostic::error(e.to_string()))?;
        }
        builder.finish().map_err(|e| Diagnostic::error(e.to_string()))
    }
}

impl EventStream for SummarizeStream {
    fn poll_next(&mut self) -> Poll<TableSlice> {
        if self.done || self.ctrl.is_cancelled() {
            return Poll::Done;
        }
        match self.input.poll_next() {
            Poll::Pending => Poll::Pending,
            Poll::Output(slice) => {
                self.ingest(&slice);
                // Aggregation holds partial state; signal an empty yield
                // rather than flushing.
                Poll::Pending
            }
            Poll::Done => {
                self.done = true;
                match self.emit() {
                    Ok(slice) => Poll::Output(slice),
                    Err(e) => {
                        self.ctrl.emit(e);
                        Poll::Done
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::SliceBuilder;

    fn input() -> Vec<TableSlice> {
        let schema = Type::named(
            "sentra.conn",
            Type::record(vec![
                Field::new("proto", Type::string()),
                Field::new("bytes", Type::int64()),
            ])
            .unwrap(),
        );
        let mut a = SliceBuilder::new(schema.clone()).unwrap();
        for (proto, bytes) in [("tcp", 10), ("udp", 5), ("tcp", 20)] {
            a.push_row(&[Data::String(proto.into()), Data::Int64(bytes)])
                .unwrap();
        }
        let mut b = SliceBuilder::new(schema).unwrap();
        for (proto, bytes) in [("udp", 1), ("tcp", 30)] {
            b.push_row(&[Data::String(proto.into()), Data::Int64(bytes)])
                .unwrap();
        }
        vec![a.finish().unwrap(), b.finish().unwrap()]
    }

    struct Feed(Vec<TableSlice>);

    impl EventStream for Feed {
        fn poll_next(&mut self) -> Poll<TableSlice> {
            if self.0.is_empty() {
                Poll::Done
            } else {
                Poll::Output(self.0.remove(0))
            }
        }
    }

    fn run(op: &Summarize, slices: Vec<TableSlice>) -> TableSlice {
        let output = op
            .instantiate(
                OperatorInput::Events(Box::new(Feed(slices))),
                ExecCtrl::detached(),
            )
            .unwrap();
        let mut stream = match output {
            OperatorOutput::Events(stream) => stream,
            _ => panic!("expected events output"),
        };
        loop {
            match stream.poll_next() {
                Poll::Output(slice) => return slice,
                Poll::Pending => continue,
                Poll::Done => panic!("stream ended without output"),
            }
        }
    }

    #[test]
    fn test_grouped_sum_and_count() {
        let op = Summarize::new(
            vec![
                AggregationSpec::new("total", "sum", Expr::field("bytes")),
                AggregationSpec::new("events", "count", Expr::field("bytes")),
            ],
            vec!["proto".into()],
        );
        let out = run(&op, input());
        assert_eq!(out.rows(), 2);
        // First-seen group order: tcp before udp.
        assert_eq!(out.value_at(0, 0), Data::String("tcp".into()));
        assert_eq!(out.value_at(0, 1), Data::Int64(60));
        assert_eq!(out.value_at(0, 2), Data::UInt64(3));
        assert_eq!(out.value_at(1, 0), Data::String("udp".into()));
        assert_eq!(out.value_at(1, 1), Data::Int64(6));
        assert_eq!(out.value_at(1, 2), Data::UInt64(2));
    }

    #[test]
    fn test_global_aggregation_without_groups() {
        let op = Summarize::new(
            vec![AggregationSpec::new("peak", "max", Expr::field("bytes"))],
            vec![],
        );
        let out = run(&op, input());
        assert_eq!(out.rows(), 1);
        assert_eq!(out.value_at(0, 0), Data::Int64(30));
    }

    #[test]
    fn test_unknown_function_rejected_at_instantiation() {
        let op = Summarize::new(
            vec![AggregationSpec::new("x", "bogus", Expr::field("bytes"))],
            vec![],
        );
        let err = op
            .instantiate(
                OperatorInput::Events(Box::new(Feed(Vec::new()))),
                ExecCtrl::detached(),
            )
            .err()
            .expect("instantiation must fail");
        assert!(err.message.contains("unknown aggregation function"));
    }

    #[test]
    fn test_empty_input_emits_empty_slice() {
        let op = Summarize::new(
            vec![AggregationSpec::new("n", "count", Expr::field("bytes"))],
            vec!["proto".into()],
        );
        let out = run(&op, vec![]);
        assert_eq!(out.rows(), 0);
    }
}
