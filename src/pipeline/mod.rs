//! # Pipeline Composition
//!
//! A pipeline is an ordered sequence of operators with matching element
//! types along the sequence. Construction splices nested pipelines in
//! place and checks adjacency left to right; the first violation reports
//! both offending operator names and the conflicting types.
//!
//! The optimisation pass walks the chain right-to-left with a
//! `(filter, order)` accumulator and is idempotent.

use std::fmt;

use crate::diag::Diagnostic;
use crate::expr::Expr;
use crate::operator::{ElementType, EventOrder, Operator, Replace};
use crate::operators::Where;

/// Errors composing a pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(
        "operator sequence `{lhs} | {rhs}` is invalid: output type `{output}` does not \
         match input type `{input}`"
    )]
    Adjacency {
        lhs: String,
        rhs: String,
        output: ElementType,
        input: ElementType,
    },
    #[error("operator sequence `{lhs} | {rhs}` is invalid: cannot connect over type `void`")]
    VoidConnection { lhs: String, rhs: String },
}

impl From<PipelineError> for Diagnostic {
    fn from(error: PipelineError) -> Self {
        Diagnostic::error(error.to_string())
    }
}

/// Input to pipeline construction: a flat operator or a nested pipeline,
/// which splices in place.
pub enum PipelineNode {
    Operator(Box<dyn Operator>),
    Pipeline(Pipeline),
}

impl From<Box<dyn Operator>> for PipelineNode {
    fn from(op: Box<dyn Operator>) -> Self {
        PipelineNode::Operator(op)
    }
}

impl From<Pipeline> for PipelineNode {
    fn from(pipeline: Pipeline) -> Self {
        PipelineNode::Pipeline(pipeline)
    }
}

/// An ordered, adjacency-checked sequence of operators.
#[derive(Clone, Default)]
pub struct Pipeline {
    operators: Vec<Box<dyn Operator>>,
}

impl Pipeline {
    /// Composes a pipeline, splicing nested pipelines and checking
    /// adjacency.
    pub fn new(nodes: Vec<PipelineNode>) -> Result<Self, PipelineError> {
        let mut operators: Vec<Box<dyn Operator>> = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                PipelineNode::Operator(op) => operators.push(op),
                PipelineNode::Pipeline(nested) => operators.extend(nested.operators),
            }
        }
        for pair in operators.windows(2) {
            check_sequence(&pair[0], &pair[1])?;
        }
        Ok(Pipeline { operators })
    }

    /// A pipeline from bare operators.
    pub fn from_operators(operators: Vec<Box<dyn Operator>>) -> Result<Self, PipelineError> {
        Self::new(operators.into_iter().map(PipelineNode::from).collect())
    }

    pub fn operators(&self) -> &[Box<dyn Operator>] {
        &self.operators
    }

    pub fn into_operators(self) -> Vec<Box<dyn Operator>> {
        self.operators
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// The pipeline's input element type; `void` when empty.
    pub fn input_type(&self) -> ElementType {
        self.operators
            .first()
            .map(|op| op.input_type())
            .unwrap_or(ElementType::Void)
    }

    /// The pipeline's output element type; `void` when empty.
    pub fn output_type(&self) -> ElementType {
        self.operators
            .last()
            .map(|op| op.output_type())
            .unwrap_or(ElementType::Void)
    }

    /// Whether the pipeline is runnable on its own: both ends `void`.
    pub fn is_closed(&self) -> bool {
        !self.is_empty()
            && self.input_type() == ElementType::Void
            && self.output_type() == ElementType::Void
    }

    /// Runs the optimisation pass over the composed chain.
    ///
    /// Walks right-to-left with a `(filter, order)` accumulator: operators
    /// absorb the filter, pass it along, or block it, in which case the
    /// pending filter materialises as a `where` right after the blocking
    /// operator. A second pass produces the same pipeline.
    pub fn optimize(self) -> Pipeline {
        let mut reversed: Vec<Box<dyn Operator>> = Vec::with_capacity(self.operators.len());
        let mut pending = Expr::true_();
        let mut order = EventOrder::Ordered;
        for op in self.operators.into_iter().rev() {
            let result = op.optimize(&pending, order);
            let kept = match result.replace {
                Replace::Keep => Some(op),
                Replace::Remove => None,
                Replace::With(replacement) => Some(replacement),
            };
            match result.filter {
                Some(filter) => {
                    if let Some(op) = kept {
                        reversed.push(op);
                    }
                    pending = filter;
                }
                None => {
                    materialize_filter(&mut reversed, std::mem::replace(&mut pending, Expr::true_()));
                    if let Some(op) = kept {
                        reversed.push(op);
                    }
                }
            }
            order = result.order;
        }
        materialize_filter(&mut reversed, pending);
        reversed.reverse();
        Pipeline {
            operators: reversed,
        }
    }
}

fn materialize_filter(reversed: &mut Vec<Box<dyn Operator>>, pending: Expr) {
    if pending.is_true_literal() {
        return;
    }
    match Where::new(pending) {
        Ok(op) => reversed.push(Box::new(op)),
        // The accumulated filter came from validated expressions, so this
        // cannot fail; drop the rewrite rather than the pipeline if it
        // ever does.
        Err(_) => {}
    }
}

fn check_sequence(
    lhs: &Box<dyn Operator>,
    rhs: &Box<dyn Operator>,
) -> Result<(), PipelineError> {
    let output = lhs.output_type();
    let input = rhs.input_type();
    if output != input {
        return Err(PipelineError::Adjacency {
            lhs: lhs.name().to_string(),
            rhs: rhs.name().to_string(),
            output,
            input,
        });
    }
    if output == ElementType::Void {
        return Err(PipelineError::VoidConnection {
            lhs: lhs.name().to_string(),
            rhs: rhs.name().to_string(),
        });
    }
    Ok(())
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.operators.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", op.name())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pipeline({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::RelOp;
    use crate::operators::{Discard, EventsSource, Head, Pass, Throttle};

    fn where_op(field: &str, value: i64) -> Box<dyn Operator> {
        Box::new(
            Where::new(Expr::predicate(
                Expr::field(field),
                RelOp::Eq,
                Expr::literal(value),
            ))
            .unwrap(),
        )
    }

    #[test]
    fn test_composition_and_types() {
        let pipeline = Pipeline::from_operators(vec![
            Box::new(EventsSource::new(vec![])),
            where_op("x", 1),
            Box::new(Discard::new()),
        ])
        .unwrap();
        assert_eq!(pipeline.len(), 3);
        assert!(pipeline.is_closed());
        assert_eq!(pipeline.to_string(), "events | where | discard");
    }

    #[test]
    fn test_adjacency_violation_reports_both_names() {
        let err = Pipeline::from_operators(vec![
            Box::new(EventsSource::new(vec![])),
            Box::new(Throttle::new(1, crate::data::Duration::from_secs(1)).unwrap()),
        ])
        .unwrap_err();
        match err {
            PipelineError::Adjacency {
                lhs,
                rhs,
                output,
                input,
            } => {
                assert_eq!(lhs, "events");
                assert_eq!(rhs, "throttle");
                assert_eq!(output, ElementType::Events);
                assert_eq!(input, ElementType::Bytes);
            }
            other => panic!("expected adjacency error, got {other}"),
        }
    }

    #[test]
    fn test_void_connection_rejected() {
        let err = Pipeline::from_operators(vec![
            Box::new(EventsSource::new(vec![])),
            Box::new(Discard::new()),
            Box::new(EventsSource::new(vec![])),
        ])
        .unwrap_err();
        assert!(matches!(err, PipelineError::VoidConnection { .. }));
    }

    #[test]
    fn test_nested_pipeline_splices() {
        let inner = Pipeline::from_operators(vec![where_op("x", 1), Box::new(Pass::new())])
            .unwrap();
        let outer = Pipeline::new(vec![
            PipelineNode::Operator(Box::new(EventsSource::new(vec![]))),
            PipelineNode::Pipeline(inner),
            PipelineNode::Operator(Box::new(Discard::new())),
        ])
        .unwrap();
        assert_eq!(outer.len(), 4);
        assert_eq!(outer.to_string(), "events | where | pass | discard");
    }

    #[test]
    fn test_empty_pipeline_is_void_to_void() {
        let pipeline = Pipeline::new(vec![]).unwrap();
        assert_eq!(pipeline.input_type(), ElementType::Void);
        assert_eq!(pipeline.output_type(), ElementType::Void);
        assert!(!pipeline.is_closed());
    }

    #[test]
    fn test_optimize_pushes_where_towards_source() {
        let pipeline = Pipeline::from_operators(vec![
            Box::new(EventsSource::new(vec![])),
            Box::new(Pass::new()),
            where_op("x", 1),
            Box::new(Discard::new()),
        ])
        .unwrap();
        let optimized = pipeline.optimize();
        // The filter moved through `pass` and re-materialised at the
        // source boundary.
        assert_eq!(optimized.to_string(), "events | where | pass | discard");
    }

    #[test]
    fn test_optimize_merges_adjacent_wheres() {
        let pipeline = Pipeline::from_operators(vec![
            Box::new(EventsSource::new(vec![])),
            where_op("x", 1),
            where_op("y", 2),
            Box::new(Discard::new()),
        ])
        .unwrap();
        let optimized = pipeline.optimize();
        assert_eq!(optimized.to_string(), "events | where | discard");
    }

    #[test]
    fn test_optimize_idempotent() {
        let build = || {
            Pipeline::from_operators(vec![
                Box::new(EventsSource::new(vec![])),
                Box::new(Pass::new()),
                where_op("x", 1),
                Box::new(Head::new(3)),
                where_op("y", 2),
                Box::new(Discard::new()),
            ])
            .unwrap()
        };
        let once = build().optimize();
        let twice = once.clone().optimize();
        assert_eq!(once.to_string(), twice.to_string());
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn test_open_pipeline_keeps_leading_filter() {
        // No source: the leftover filter lands at the head.
        let pipeline =
            Pipeline::from_operators(vec![Box::new(Pass::new()), where_op("x", 1)]).unwrap();
        let optimized = pipeline.optimize();
        assert_eq!(optimized.to_string(), "where | pass");
    }
}
