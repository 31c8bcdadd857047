//! The `pass` operator: identity.

use crate::diag::Diagnostic;
use crate::expr::Expr;
use crate::operator::{
    ElementType, EventOrder, EventStream, ExecCtrl, Operator, OperatorInput, OperatorOutput,
    OptimizeResult, Poll, Replace,
};
use crate::slice::TableSlice;

/// Forwards its input unchanged. Order-invariant and transparent to
/// filters.
#[derive(Debug, Clone, Default)]
pub struct Pass;

impl Pass {
    pub fn new() -> Self {
        Pass
    }
}

impl Operator for Pass {
    fn name(&self) -> &str {
        "pass"
    }

    fn input_type(&self) -> ElementType {
        ElementType::Events
    }

    fn output_type(&self) -> ElementType {
        ElementType::Events
    }

    fn optimize(&self, filter: &Expr, order: EventOrder) -> OptimizeResult {
        OptimizeResult {
            filter: Some(filter.clone()),
            order,
            replace: Replace::Keep,
        }
    }

    fn instantiate(
        &self,
        input: OperatorInput,
        ctrl: ExecCtrl,
    ) -> Result<OperatorOutput, Diagnostic> {
        Ok(OperatorOutput::Events(Box::new(PassStream {
            input: input.into_events(),
            ctrl,
        })))
    }

    fn clone_box(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

struct PassStream {
    input: Box<dyn EventStream>,
    ctrl: ExecCtrl,
}

impl EventStream for PassStream {
    fn poll_next(&mut self) -> Poll<TableSlice> {
        if self.ctrl.is_cancelled() {
            return Poll::Done;
        }
        self.input.poll_next()
    }
}
