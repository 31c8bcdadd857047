//! The `head` and `taste` operators: event limiting.
//!
//! `head n` forwards the first `n` events overall; `taste n` forwards the
//! first `n` events of each schema, using the per-schema substate
//! protocol.

use crate::diag::Diagnostic;
use crate::operator::{
    ElementType, EventStream, ExecCtrl, Operator, OperatorInput, OperatorOutput, Poll,
    SchemaCache,
};
use crate::slice::TableSlice;

/// Forwards the first `count` events, then terminates.
#[derive(Debug, Clone)]
pub struct Head {
    count: u64,
}

impl Head {
    pub fn new(count: u64) -> Self {
        Head { count }
    }
}

impl Operator for Head {
    fn name(&self) -> &str {
        "head"
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
        Ok(OperatorOutput::Events(Box::new(HeadStream {
            input: input.into_events(),
            ctrl,
            remaining: self.count,
        })))
    }

    fn clone_box(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

struct HeadStream {
    input: Box<dyn EventStream>,
    ctrl: ExecCtrl,
    remaining: u64,
}

impl EventStream for HeadStream {
    fn poll_next(&mut self) -> Poll<TableSlice> {
        if self.ctrl.is_cancelled() || self.remaining == 0 {
            return Poll::Done;
        }
        match self.input.poll_next() {
            Poll::Done => Poll::Done,
            Poll::Pending => Poll::Pending,
            Poll::Output(slice) => {
                if slice.is_empty() {
                    return Poll::Pending;
                }
                let take = (self.remaining).min(slice.rows() as u64) as usize;
                self.remaining -= take as u64;
                if take == slice.rows() {
                    Poll::Output(slice)
                } else {
                    Poll::Output(slice.subslice(0, take))
                }
            }
        }
    }
}

/// Forwards the first `count` events of each schema.
#[derive(Debug, Clone)]
pub struct Taste {
    count: u64,
}

impl Taste {
    pub fn new(count: u64) -> Self {
        Taste { count }
    }
}

impl Operator for Taste {
    fn name(&self) -> &str {
        "taste"
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
        Ok(OperatorOutput::Events(Box::new(TasteStream {
            input: input.into_events(),
            ctrl,
            count: self.count,
            remaining: SchemaCache::new(),
        })))
    }

    fn clone_box(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

struct TasteStream {
    input: Box<dyn EventStream>,
    ctrl: ExecCtrl,
    count: u64,
    /// Remaining budget per schema; installed on first sight.
    remaining: SchemaCache<u64>,
}

impl EventStream for TasteStream {
    fn poll_next(&mut self) -> Poll<TableSlice> {
        if self.ctrl.is_cancelled() {
            return Poll::Done;
        }
        match self.input.poll_next() {
            Poll::Done => Poll::Done,
            Poll::Pending => Poll::Pending,
            Poll::Output(slice) => {
                let count = self.count;
                let remaining = self.remaining.entry(&slice, |_| count);
                if *remaining == 0 || slice.is_empty() {
                    return Poll::Pending;
                }
                let take = (*remaining).min(slice.rows() as u64) as usize;
                *remaining -= take as u64;
                if take == slice.rows() {
                    Poll::Output(slice)
                } else {
                    Poll::Output(slice.subslice(0, take))
                }
            }
        }
    }
}
