//! The `where` operator: row filtering by a boolean expression.

use crate::diag::Diagnostic;
use crate::expr::{eval_filter_mask, tailor, validate, EvalSession, Expr};
use crate::operator::{
    ElementType, EventOrder, EventStream, ExecCtrl, Operator, OperatorInput, OperatorOutput,
    OptimizeResult, Poll, Replace, SchemaCache,
};
use crate::slice::{filter, TableSlice};

/// Keeps the rows matching a predicate.
#[derive(Debug, Clone)]
pub struct Where {
    expr: Expr,
}

impl Where {
    pub fn new(expr: Expr) -> Result<Self, Diagnostic> {
        validate(&expr)?;
        Ok(Where {
            expr: crate::expr::normalize(expr),
        })
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl Operator for Where {
    fn name(&self) -> &str {
        "where"
    }

    fn input_type(&self) -> ElementType {
        ElementType::Events
    }

    fn output_type(&self) -> ElementType {
        ElementType::Events
    }

    fn optimize(&self, filter: &Expr, order: EventOrder) -> OptimizeResult {
        // Absorb into the accumulated filter and disappear; the optimiser
        // re-materialises the conjunction at the blocking operator.
        OptimizeResult {
            filter: Some(filter.clone().conjoin(self.expr.clone())),
            order,
            replace: Replace::Remove,
        }
    }

    fn instantiate(
        &self,
        input: OperatorInput,
        ctrl: ExecCtrl,
    ) -> Result<OperatorOutput, Diagnostic> {
        Ok(OperatorOutput::Events(Box::new(WhereStream {
            input: input.into_events(),
            ctrl,
            expr: self.expr.clone(),
            session: EvalSession::new(),
            tailored: SchemaCache::new(),
        })))
    }

    fn clone_box(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

struct WhereStream {
    input: Box<dyn EventStream>,
    ctrl: ExecCtrl,
    expr: Expr,
    session: EvalSession,
    /// Schema-specialised expression, reused across batches of a schema.
    tailored: SchemaCache<Expr>,
}

impl EventStream for WhereStream {
    fn poll_next(&mut self) -> Poll<TableSlice> {
        if self.ctrl.is_cancelled() {
            return Poll::Done;
        }
        match self.input.poll_next() {
            Poll::Done => Poll::Done,
            Poll::Pending => Poll::Pending,
            Poll::Output(slice) => {
                let expr = &self.expr;
                let tailored = self
                    .tailored
                    .entry(&slice, |slice| tailor(expr, slice.schema()));
                if tailored.is_false_literal() {
                    return Poll::Pending;
                }
                let mask =
                    eval_filter_mask(tailored, &slice, &self.session, self.ctrl.diagnostics());
                match filter(&slice, &mask) {
                    Ok(Some(filtered)) => Poll::Output(filtered),
                    Ok(None) => Poll::Pending,
                    Err(e) => {
                        self.ctrl.error(e.to_string());
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
    use crate::data::Data;
    use crate::expr::RelOp;
    use crate::slice::SliceBuilder;
    use crate::types::{Field, Type};

    fn input_slice() -> TableSlice {
        let schema = Type::named(
            "sentra.t",
            Type::record(vec![
                Field::new("x", Type::int64()),
                Field::new("y", Type::string()),
            ])
            .unwrap(),
        );
        let mut builder = SliceBuilder::new(schema).unwrap();
        for (x, y) in [(1, "a"), (2, "b"), (3, "c")] {
            builder
                .push_row(&[Data::Int64(x), Data::String(y.into())])
                .unwrap();
        }
        builder.finish().unwrap()
    }

    struct OneShot(Option<TableSlice>);

    impl EventStream for OneShot {
        fn poll_next(&mut self) -> Poll<TableSlice> {
            match self.0.take() {
                Some(slice) => Poll::Output(slice),
                None => Poll::Done,
            }
        }
    }

    #[test]
    fn test_where_filters_rows() {
        let op = Where::new(Expr::predicate(
            Expr::field("x"),
            RelOp::Ge,
            Expr::literal(2i64),
        ))
        .unwrap();
        let output = op
            .instantiate(
                OperatorInput::Events(Box::new(OneShot(Some(input_slice())))),
                ExecCtrl::detached(),
            )
            .unwrap();
        let mut stream = match output {
            OperatorOutput::Events(stream) => stream,
            _ => panic!("expected events output"),
        };
        match stream.poll_next() {
            Poll::Output(slice) => {
                assert_eq!(slice.rows(), 2);
                assert_eq!(slice.value_at(0, 0), Data::Int64(2));
            }
            other => panic!("expected output, got {other:?}"),
        }
        assert!(matches!(stream.poll_next(), Poll::Done));
    }

    #[test]
    fn test_where_absorbs_filter_on_optimize() {
        let op = Where::new(Expr::predicate(
            Expr::field("x"),
            RelOp::Eq,
            Expr::literal(1i64),
        ))
        .unwrap();
        let downstream = Expr::predicate(Expr::field("y"), RelOp::Eq, Expr::literal("a"));
        let result = op.optimize(&downstream, EventOrder::Ordered);
        assert!(matches!(result.replace, Replace::Remove));
        match result.filter {
            Some(Expr::And(parts)) => assert_eq!(parts.len(), 2),
            other => panic!("expected conjunction, got {other:?}"),
        }
    }

    #[test]
    fn test_where_rejects_invalid_expression() {
        assert!(Where::new(Expr::and(vec![Expr::literal(5i64)])).is_err());
    }
}
