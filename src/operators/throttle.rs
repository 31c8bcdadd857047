//! The `throttle` operator: byte-stream rate limiting.
//!
//! `throttle <bandwidth> [--within <duration>]` caps throughput at
//! `bandwidth` bytes per window. When the allowance for the current window
//! is spent, the operator schedules a wake at the window boundary and
//! suspends; oversized chunks split and the remainder carries over.

use std::time::Instant;

use crate::chunk::Chunk;
use crate::data::Duration;
use crate::diag::{Diagnostic, Located, Span};
use crate::argparse::{ArgKind, ArgumentParser};
use crate::operator::{
    ByteStream, ElementType, ExecCtrl, Operator, OperatorInput, OperatorOutput, Poll,
};
use crate::util::byte_size;

/// Rate-limits a byte stream to `bandwidth` bytes per `window`.
#[derive(Debug, Clone)]
pub struct Throttle {
    bandwidth: u64,
    window: Duration,
}

impl Throttle {
    pub fn new(bandwidth: u64, window: Duration) -> Result<Self, Diagnostic> {
        if bandwidth == 0 {
            return Err(Diagnostic::error("`bandwidth` must be a positive number"));
        }
        if window.as_nanos() <= 0 {
            return Err(Diagnostic::error("duration must be greater than zero"));
        }
        Ok(Throttle { bandwidth, window })
    }

    /// Constructs from tokenised arguments: `throttle <bandwidth>
    /// [--within <duration>]`.
    pub fn from_args(
        invocation: Span,
        tokens: &[Located<String>],
    ) -> Result<Self, Diagnostic> {
        let parser = ArgumentParser::new("throttle")
            .with_docs("https://docs.sentra.io/operators/throttle")
            .positional("bandwidth", ArgKind::UInt64)
            .named("--within|-w", "duration", ArgKind::Duration);
        let args = parser.parse(invocation, tokens)?;
        let bandwidth = args.get_uint64("bandwidth").expect("required positional");
        let window = args
            .get_duration("--within")
            .map(|w| w.inner)
            .unwrap_or(Duration::from_secs(1));
        Self::new(bandwidth.inner, window).map_err(|d| match d.primary {
            Some(_) => d,
            None => d.primary(bandwidth.span),
        })
    }
}

impl Operator for Throttle {
    fn name(&self) -> &str {
        "throttle"
    }

    fn input_type(&self) -> ElementType {
        ElementType::Bytes
    }

    fn output_type(&self) -> ElementType {
        ElementType::Bytes
    }

    fn instantiate(
        &self,
        input: OperatorInput,
        ctrl: ExecCtrl,
    ) -> Result<OperatorOutput, Diagnostic> {
        let window = self
            .window
            .to_std()
            .ok_or_else(|| Diagnostic::error("throttle window must be positive"))?;
        Ok(OperatorOutput::Bytes(Box::new(ThrottleStream {
            input: input.into_bytes(),
            ctrl,
            bandwidth: self.bandwidth,
            window,
            window_start: None,
            bytes_in_window: 0,
            pending: Chunk::empty(),
        })))
    }

    fn clone_box(&self) -> Box<dyn Operator> {
        Box::new(self.clone())
    }
}

struct ThrottleStream {
    input: Box<dyn ByteStream>,
    ctrl: ExecCtrl,
    bandwidth: u64,
    window: std::time::Duration,
    window_start: Option<Instant>,
    bytes_in_window: u64,
    /// Remainder of a split chunk, sent before pulling new input.
    pending: Chunk,
}

impl ThrottleStream {
    /// Sends as much of `chunk` as the current window allows; the rest
    /// parks in `pending` and the stream suspends until the next window.
    fn emit_within_budget(&mut self, chunk: Chunk) -> Poll<Chunk> {
        let now = Instant::now();
        let window_start = *self.window_start.get_or_insert(now);
        if now.duration_since(window_start) >= self.window {
            self.window_start = Some(now);
            self.bytes_in_window = 0;
        }
        let allowance = self.bandwidth.saturating_sub(self.bytes_in_window);
        if allowance == 0 {
            tracing::debug!(
                bandwidth = %byte_size(self.bandwidth),
                carried = %byte_size(chunk.len() as u64),
                "throttle allowance exhausted, waiting for the next window"
            );
            self.pending = chunk;
            let wake = self.window_start.expect("window started") + self.window;
            self.ctrl.schedule_wake_at(wake);
            self.ctrl.set_waiting(true);
            return Poll::Pending;
        }
        let (to_send, rest) = chunk.split_at(allowance as usize);
        self.pending = rest;
        self.bytes_in_window += to_send.len() as u64;
        Poll::Output(to_send)
    }
}

impl ByteStream for ThrottleStream {
    fn poll_next(&mut self) -> Poll<Chunk> {
        if self.ctrl.is_cancelled() {
            return Poll::Done;
        }
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            return self.emit_within_budget(pending);
        }
        match self.input.poll_next() {
            Poll::Done => Poll::Done,
            Poll::Pending => Poll::Pending,
            Poll::Output(chunk) => {
                if chunk.is_empty() {
                    return Poll::Pending;
                }
                self.emit_within_budget(chunk)
            }
        }
    }
}
