//! The `discard` sink: consumes events and drops them.

use crate::diag::Diagnostic;
use crate::operator::{
    ElementType, EventStream, ExecCtrl, Operator, OperatorInput, OperatorOutput, Poll,
    StepStream,
};

/// Consumes its input without side effects. Useful for measuring and for
/// terminating pipelines whose value is in their diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Discard;

impl Discard {
    pub fn new() -> Self {
        Discard
    }
}

impl Operator for Discard {
    fn name(&self) -> &str {
        "discard"
    }

    fn input_type(&self) -> ElementType {
        ElementType::Events
    }

    fn output_type(&self) -> ElementType {
        ElementType::Void
    }

    fn instantiate(
        &self,
        input: OperatorInput,
        ctrl: ExecCtrl,
    ) -> Result<OperatorOutput, Diagnostic> {
        Ok(OperatorOutput::Void(Box::new(DiscardStream {
            input: input.into_events(),
            ctrl,
            events: 0,
        })))
    }

    fn clone_box(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

struct DiscardStream {
    input: Box<dyn EventStream>,
    ctrl: ExecCtrl,
    events: u64,
}

impl StepStream for DiscardStream {
    fn poll_next(&mut self) -> Poll<()> {
        if self.ctrl.is_cancelled() {
            return Poll::Done;
        }
        match self.input.poll_next() {
            Poll::Done => {
                tracing::debug!(events = self.events, "discard sink drained its input");
                Poll::Done
            }
            Poll::Pending => Poll::Pending,
            Poll::Output(slice) => {
                self.events += slice.rows() as u64;
                Poll::Output(())
            }
        }
    }
}
