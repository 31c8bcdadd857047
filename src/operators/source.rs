//! In-memory sources for events and bytes.
//!
//! Concrete I/O connectors live outside the engine; these sources feed
//! preconstructed batches, honouring the batch-size budget and an optional
//! inter-batch delay (which exercises suspension and wake timers).

use std::collections::VecDeque;
use std::time::Instant;

use crate::chunk::Chunk;
use crate::data::Duration;
use crate::diag::Diagnostic;
use crate::operator::{
    ByteStream, ElementType, EventStream, ExecCtrl, Operator, OperatorInput, OperatorOutput,
    Poll,
};
use crate::slice::TableSlice;

/// Emits a fixed sequence of event batches.
#[derive(Debug, Clone)]
pub struct EventsSource {
    slices: Vec<TableSlice>,
    /// Delay between consecutive batches; `None` emits back-to-back.
    delay: Option<Duration>,
}

impl EventsSource {
    pub fn new(slices: Vec<TableSlice>) -> Self {
        EventsSource {
            slices,
            delay: None,
        }
    }

    /// Emit one batch per `delay`, suspending in between.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Operator for EventsSource {
    fn name(&self) -> &str {
        "events"
    }

    fn input_type(&self) -> ElementType {
        ElementType::Void
    }

    fn output_type(&self) -> ElementType {
        ElementType::Events
    }

    fn instantiate(
        &self,
        _input: OperatorInput,
        ctrl: ExecCtrl,
    ) -> Result<OperatorOutput, Diagnostic> {
        // Re-batch to the configured budget.
        let budget = ctrl.config().batch_size.max(1);
        let mut queue = VecDeque::new();
        for slice in &self.slices {
            let mut offset = 0;
            while offset < slice.rows() {
                let length = budget.min(slice.rows() - offset);
                queue.push_back(slice.subslice(offset, length));
                offset += length;
            }
            if slice.rows() == 0 {
                queue.push_back(slice.clone());
            }
        }
        Ok(OperatorOutput::Events(Box::new(EventsSourceStream {
            ctrl,
            queue,
            delay: self.delay,
            ready_at: None,
        })))
    }

    fn clone_box(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

struct EventsSourceStream {
    ctrl: ExecCtrl,
    queue: VecDeque<TableSlice>,
    delay: Option<Duration>,
    ready_at: Option<Instant>,
}

impl EventStream for EventsSourceStream {
    fn poll_next(&mut self) -> Poll<TableSlice> {
        if self.ctrl.is_cancelled() {
            return Poll::Done;
        }
        if self.queue.is_empty() {
            return Poll::Done;
        }
        if let Some(ready_at) = self.ready_at {
            if Instant::now() < ready_at {
                self.ctrl.schedule_wake_at(ready_at);
                self.ctrl.set_waiting(true);
                return Poll::Pending;
            }
            self.ready_at = None;
        }
        let slice = self.queue.pop_front().expect("queue checked non-empty");
        if let Some(delay) = self.delay {
            if let Some(delay) = delay.to_std() {
                self.ready_at = Some(Instant::now() + delay);
            }
        }
        Poll::Output(slice)
    }
}

/// Emits a fixed sequence of byte chunks.
#[derive(Debug, Clone)]
pub struct BytesSource {
    chunks: Vec<Chunk>,
}

impl BytesSource {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        BytesSource { chunks }
    }
}

impl Operator for BytesSource {
    fn name(&self) -> &str {
        "bytes"
    }

    fn input_type(&self) -> ElementType {
        ElementType::Void
    }

    fn output_type(&self) -> ElementType {
        ElementType::Bytes
    }

    fn instantiate(
        &self,
        _input: OperatorInput,
        ctrl: ExecCtrl,
    ) -> Result<OperatorOutput, Diagnostic> {
        Ok(OperatorOutput::Bytes(Box::new(BytesSourceStream {
            ctrl,
            queue: self.chunks.iter().cloned().collect(),
        })))
    }

    fn clone_box(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

struct BytesSourceStream {
    ctrl: ExecCtrl,
    queue: VecDeque<Chunk>,
}

impl ByteStream for BytesSourceStream {
    fn poll_next(&mut self) -> Poll<Chunk> {
        if self.ctrl.is_cancelled() {
            return Poll::Done;
        }
        match self.queue.pop_front() {
            Some(chunk) => Poll::Output(chunk),
            None => Poll::Done,
        }
    }
}
