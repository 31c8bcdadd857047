//! The internal `batch` operator: coalesces small event batches.
//!
//! Buffers input until `batch_size` rows accumulate or `batch_timeout`
//! elapses since the first buffered row, whichever comes first. While the
//! buffer is non-empty but neither budget is reached, the operator signals
//! an empty yield: it holds partial state and does not wish to flush yet.
//!
//! Hidden from user-visible listings; the runtime splices it where
//! upstream operators emit fragmented batches.

use std::time::Instant;

use crate::diag::Diagnostic;
use crate::operator::{
    ElementType, EventStream, ExecCtrl, Operator, OperatorInput, OperatorOutput, Poll,
};
use crate::slice::{SliceBuilder, TableSlice};
use crate::util::byte_size;

/// Coalesces undersized batches up to the configured budgets.
#[derive(Debug, Clone, Default)]
pub struct Batch;

impl Batch {
    pub fn new() -> Self {
        Batch
    }
}

impl Operator for Batch {
    fn name(&self) -> &str {
        "batch"
    }

    fn input_type(&self) -> ElementType {
        ElementType::Events
    }

    fn output_type(&self) -> ElementType {
        ElementType::Events
    }

    fn internal(&self) -> bool {
        true
    }

    fn instantiate(
        &self,
        input: OperatorInput,
        ctrl: ExecCtrl,
    ) -> Result<OperatorOutput, Diagnostic> {
        Ok(OperatorOutput::Events(Box::new(BatchStream {
            input: input.into_events(),
            ctrl,
            buffer: Vec::new(),
            buffered_rows: 0,
            first_buffered_at: None,
            drained: false,
        })))
    }

    fn clone_box(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

struct BatchStream {
    input: Box<dyn EventStream>,
    ctrl: ExecCtrl,
    /// Buffered slices; all share the schema of the first one.
    buffer: Vec<TableSlice>,
    buffered_rows: usize,
    first_buffered_at: Option<Instant>,
    drained: bool,
}

impl BatchStream {
    fn budget_reached(&self) -> bool {
        if self.buffered_rows >= self.ctrl.config().batch_size {
            return true;
        }
        match (self.first_buffered_at, self.ctrl.config().batch_timeout.to_std()) {
            (Some(since), Some(timeout)) => since.elapsed() >= timeout,
            _ => false,
        }
    }

    fn flush(&mut self) -> Option<TableSlice> {
        self.first_buffered_at = None;
        self.buffered_rows = 0;
        let slices = std::mem::take(&mut self.buffer);
        let flushed = match slices.len() {
            0 => None,
            1 => Some(slices.into_iter().next().expect("len checked")),
            _ => concatenate(&slices).or_else(|| {
                // Concatenation only fails on schema drift inside the
                // buffer; fall back to the first slice and requeue the
                // rest.
                let mut iter = slices.into_iter();
                let first = iter.next();
                self.buffer = iter.collect();
                first
            }),
        };
        if let Some(slice) = &flushed {
            tracing::trace!(
                rows = slice.rows(),
                memory = %byte_size(slice.record_batch().get_array_memory_size() as u64),
                "flushing coalesced batch"
            );
        }
        flushed
    }
}

/// Row-wise concatenation of same-schema slices.
fn concatenate(slices: &[TableSlice]) -> Option<TableSlice> {
    let schema = slices.first()?.schema().clone();
    if slices.iter().any(|s| s.schema() != &schema) {
        return None;
    }
    let mut builder = SliceBuilder::new(schema).ok()?;
    for slice in slices {
        for row in 0..slice.rows() {
            builder.push_row(&slice.row(row)).ok()?;
        }
    }
    builder.finish().ok()
}

impl EventStream for BatchStream {
    fn poll_next(&mut self) -> Poll<TableSlice> {
        if self.ctrl.is_cancelled() {
            return Poll::Done;
        }
        if self.drained {
            return match self.flush() {
                Some(slice) => Poll::Output(slice),
                None => Poll::Done,
            };
        }
        if self.budget_reached() {
            if let Some(slice) = self.flush() {
                return Poll::Output(slice);
            }
        }
        match self.input.poll_next() {
            Poll::Done => {
                self.drained = true;
                match self.flush() {
                    Some(slice) => Poll::Output(slice),
                    None => Poll::Done,
                }
            }
            Poll::Pending => Poll::Pending,
            Poll::Output(slice) => {
                if slice.is_empty() {
                    return Poll::Pending;
                }
                // Schema change flushes what we have before buffering the
                // newcomer.
                let flushed = match self.buffer.first() {
                    Some(buffered) if buffered.schema() != slice.schema() => self.flush(),
                    _ => None,
                };
                self.buffered_rows += slice.rows();
                self.first_buffered_at.get_or_insert_with(Instant::now);
                self.buffer.push(slice);
                match flushed {
                    Some(out) => Poll::Output(out),
                    // Partial state held back: an empty yield.
                    None => Poll::Pending,
                }
            }
        }
    }
}
