//! # Execution Runtime
//!
//! Cooperative, single-threaded-per-location execution of composed
//! pipelines. The scheduler pulls from the most-downstream generator,
//! which pulls transitively to the source. Generators yield productively
//! (an element flowed), emptily (no element this step), or suspend via
//! [`ExecCtrl::set_waiting`] plus a wake timer.
//!
//! Operators advertising `location = remote` run on their own thread; the
//! boundary is a bounded channel, which is also what provides
//! backpressure across threads.

use std::sync::Arc;
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::chunk::Chunk;
use crate::config::RuntimeConfig;
use crate::diag::{Diagnostic, DiagnosticCollector, DiagnosticSink};
use crate::operator::{
    ByteStream, ElementType, EventStream, ExecCtrl, Location, OperatorInput, OperatorOutput,
    Poll, SecretResolver, StepStream,
};
use crate::pipeline::Pipeline;
use crate::slice::TableSlice;

/// Capacity of the channels bridging locations. Small by intent: the
/// channel is the only buffering between threads, and it must stall a fast
/// producer.
const BRIDGE_CAPACITY: usize = 8;

/// How a pipeline run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The source drained and every operator completed.
    Completed,
    /// The client cancelled; not an error.
    Cancelled,
    /// An operator produced an error diagnostic.
    Failed(Diagnostic),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled)
    }
}

/// Instantiates and drives pipelines.
pub struct Executor {
    config: RuntimeConfig,
    diag: Arc<dyn DiagnosticSink>,
    resolver: Option<Arc<dyn SecretResolver>>,
}

impl Executor {
    pub fn new(config: RuntimeConfig) -> Self {
        Executor {
            config,
            diag: DiagnosticCollector::new(),
            resolver: None,
        }
    }

    pub fn with_diagnostics(mut self, diag: Arc<dyn DiagnosticSink>) -> Self {
        self.diag = diag;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SecretResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Instantiates a closed pipeline (`void → void`) for driving.
    pub fn start(&self, pipeline: Pipeline) -> Result<PipelineRun, Diagnostic> {
        if !pipeline.is_closed() {
            return Err(Diagnostic::error(format!(
                "cannot run an open pipeline: input `{}`, output `{}`",
                pipeline.input_type(),
                pipeline.output_type()
            )));
        }
        let (output, ctrl, threads) = self.instantiate(pipeline)?;
        let driver = match output {
            OperatorOutput::Void(driver) => driver,
            other => {
                return Err(Diagnostic::error(format!(
                    "pipeline must end in a sink, got `{}` output",
                    other.element_type()
                )))
            }
        };
        Ok(PipelineRun {
            driver,
            ctrl,
            threads,
        })
    }

    /// Instantiates an events-output pipeline and drives it to completion,
    /// collecting the produced batches. Honours the `max_events` hard cap.
    pub fn collect(&self, pipeline: Pipeline) -> Result<Vec<TableSlice>, Diagnostic> {
        if pipeline.output_type() != ElementType::Events
            || pipeline.input_type() != ElementType::Void
        {
            return Err(Diagnostic::error(format!(
                "cannot collect from a `{} → {}` pipeline",
                pipeline.input_type(),
                pipeline.output_type()
            )));
        }
        let (output, ctrl, threads) = self.instantiate(pipeline)?;
        let mut stream = match output {
            OperatorOutput::Events(stream) => stream,
            other => {
                return Err(Diagnostic::error(format!(
                    "expected events output, got `{}`",
                    other.element_type()
                )))
            }
        };
        let max_events = ctrl.config().max_events;
        let mut collected = Vec::new();
        let mut events: u64 = 0;
        let mut idle = IdleBackoff::new();
        let outcome = loop {
            ctrl.process_wakes(Instant::now());
            match stream.poll_next() {
                Poll::Output(slice) => {
                    idle.reset();
                    events += slice.rows() as u64;
                    collected.push(slice);
                    if let Some(cap) = max_events {
                        if events >= cap {
                            ctrl.cancel();
                            break RunOutcome::Completed;
                        }
                    }
                }
                Poll::Pending => {
                    ctrl.resolve_pending_secrets();
                    idle.wait(&ctrl);
                }
                Poll::Done => break finish_outcome(&ctrl),
            }
            if let Some(fatal) = ctrl.fatal() {
                ctrl.cancel();
                break RunOutcome::Failed(fatal);
            }
        };
        drop(stream);
        join_threads(threads, &ctrl);
        match outcome {
            RunOutcome::Failed(e) => Err(e),
            _ => Ok(collected),
        }
    }

    fn instantiate(
        &self,
        pipeline: Pipeline,
    ) -> Result<(OperatorOutput, ExecCtrl, Vec<thread::JoinHandle<()>>), Diagnostic> {
        let mut ctrl = ExecCtrl::new(Arc::clone(&self.diag), self.config.clone());
        if let Some(resolver) = &self.resolver {
            ctrl = ctrl.with_resolver(Arc::clone(resolver));
        }
        let mut threads = Vec::new();
        let mut current: Option<OperatorOutput> = None;
        for op in pipeline.into_operators() {
            let input = match current.take() {
                None => OperatorInput::Void,
                Some(OperatorOutput::Events(stream)) => OperatorInput::Events(stream),
                Some(OperatorOutput::Bytes(stream)) => OperatorInput::Bytes(stream),
                Some(OperatorOutput::Void(_)) => {
                    return Err(Diagnostic::error(format!(
                        "operator `{}` cannot consume a void stream",
                        op.name()
                    )))
                }
            };
            tracing::debug!(operator = op.name(), location = ?op.location(), "instantiating");
            let output = op.instantiate(input, ctrl.clone())?;
            let output = if op.location() == Location::Remote {
                bridge_to_thread(output, &ctrl, op.name(), &mut threads)
            } else {
                output
            };
            current = Some(output);
        }
        let output = current.ok_or_else(|| Diagnostic::error("cannot run an empty pipeline"))?;
        Ok((output, ctrl, threads))
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

/// A started, driveable pipeline.
pub struct PipelineRun {
    driver: Box<dyn StepStream>,
    ctrl: ExecCtrl,
    threads: Vec<thread::JoinHandle<()>>,
}

impl PipelineRun {
    /// A handle for cancelling the run from another thread.
    pub fn ctrl(&self) -> ExecCtrl {
        self.ctrl.clone()
    }

    /// Drives the pipeline until it completes, fails or is cancelled.
    ///
    /// An error diagnostic kills the pipeline the moment the emitting
    /// operator returns: the scheduler cancels all remaining operators and
    /// resolves with the first error. Cancellation resolves with a
    /// `cancelled` note, not an error.
    pub fn run(mut self) -> RunOutcome {
        let mut idle = IdleBackoff::new();
        let outcome = loop {
            if self.ctrl.is_cancelled() {
                break cancel_outcome(&self.ctrl);
            }
            self.ctrl.process_wakes(Instant::now());
            match self.driver.poll_next() {
                Poll::Output(()) => idle.reset(),
                Poll::Pending => {
                    self.ctrl.resolve_pending_secrets();
                    idle.wait(&self.ctrl);
                }
                Poll::Done => break finish_outcome(&self.ctrl),
            }
            if let Some(fatal) = self.ctrl.fatal() {
                self.ctrl.cancel();
                break RunOutcome::Failed(fatal);
            }
        };
        drop(self.driver);
        join_threads(self.threads, &self.ctrl);
        outcome
    }
}

fn finish_outcome(ctrl: &ExecCtrl) -> RunOutcome {
    if let Some(fatal) = ctrl.fatal() {
        return RunOutcome::Failed(fatal);
    }
    if ctrl.is_cancelled() {
        return cancel_outcome(ctrl);
    }
    RunOutcome::Completed
}

fn cancel_outcome(ctrl: &ExecCtrl) -> RunOutcome {
    ctrl.emit(Diagnostic::note("pipeline cancelled"));
    RunOutcome::Cancelled
}

fn join_threads(threads: Vec<thread::JoinHandle<()>>, ctrl: &ExecCtrl) {
    // Remote pumps observe the flag at every iteration, so joining stays
    // within the cancel grace bound.
    ctrl.cancel();
    for handle in threads {
        let _ = handle.join();
    }
}

/// Back-off for empty yields: spin briefly, then sleep towards the next
/// wake so timers fire without busy-waiting.
struct IdleBackoff {
    consecutive: u32,
}

impl IdleBackoff {
    fn new() -> Self {
        IdleBackoff { consecutive: 0 }
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }

    fn wait(&mut self, ctrl: &ExecCtrl) {
        self.consecutive += 1;
        if ctrl.is_waiting() {
            let now = Instant::now();
            let nap = match ctrl.wake_at() {
                Some(wake) if wake > now => (wake - now).min(StdDuration::from_millis(50)),
                Some(_) => return,
                // Waiting on an external signal (async reply, secret);
                // poll at a modest rate.
                None => StdDuration::from_millis(1),
            };
            thread::sleep(nap);
        } else if self.consecutive > 64 {
            thread::sleep(StdDuration::from_micros(100));
        }
    }
}

/// Moves a stream's production onto a dedicated thread, bridged by a
/// bounded channel. The channel is the backpressure boundary: a full
/// channel stalls the producer thread.
fn bridge_to_thread(
    output: OperatorOutput,
    ctrl: &ExecCtrl,
    name: &str,
    threads: &mut Vec<thread::JoinHandle<()>>,
) -> OperatorOutput {
    let thread_name = format!("sentra-remote-{name}");
    match output {
        OperatorOutput::Events(stream) => {
            let (tx, rx) = bounded(BRIDGE_CAPACITY);
            let ctrl_clone = ctrl.clone();
            threads.push(spawn_pump(thread_name, move || {
                pump(stream, tx, ctrl_clone, |s| s.poll_next())
            }));
            OperatorOutput::Events(Box::new(ChannelEvents { rx }))
        }
        OperatorOutput::Bytes(stream) => {
            let (tx, rx) = bounded(BRIDGE_CAPACITY);
            let ctrl_clone = ctrl.clone();
            threads.push(spawn_pump(thread_name, move || {
                pump(stream, tx, ctrl_clone, |s| s.poll_next())
            }));
            OperatorOutput::Bytes(Box::new(ChannelBytes { rx }))
        }
        OperatorOutput::Void(stream) => {
            let (tx, rx) = bounded(BRIDGE_CAPACITY);
            let ctrl_clone = ctrl.clone();
            threads.push(spawn_pump(thread_name, move || {
                pump(stream, tx, ctrl_clone, |s| s.poll_next())
            }));
            OperatorOutput::Void(Box::new(ChannelSteps { rx }))
        }
    }
}

fn spawn_pump(
    name: String,
    body: impl FnOnce() + Send + 'static,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name(name)
        .spawn(body)
        .expect("spawning a runtime thread succeeds")
}

fn pump<S: ?Sized, T>(
    mut stream: Box<S>,
    tx: Sender<T>,
    ctrl: ExecCtrl,
    mut poll: impl FnMut(&mut S) -> Poll<T>,
) {
    let mut idle = IdleBackoff::new();
    loop {
        if ctrl.is_cancelled() {
            return;
        }
        ctrl.process_wakes(Instant::now());
        match poll(&mut *stream) {
            Poll::Done => return,
            Poll::Pending => {
                ctrl.resolve_pending_secrets();
                idle.wait(&ctrl);
            }
            Poll::Output(element) => {
                idle.reset();
                let mut element = element;
                // Blocking send with a cancellation check; the bounded
                // channel is what stalls a fast producer.
                loop {
                    match tx.try_send(element) {
                        Ok(()) => break,
                        Err(TrySendError::Disconnected(_)) => return,
                        Err(TrySendError::Full(back)) => {
                            if ctrl.is_cancelled() {
                                return;
                            }
                            element = back;
                            thread::sleep(StdDuration::from_micros(200));
                        }
                    }
                }
            }
        }
    }
}

struct ChannelEvents {
    rx: Receiver<TableSlice>,
}

impl EventStream for ChannelEvents {
    fn poll_next(&mut self) -> Poll<TableSlice> {
        channel_poll(&self.rx)
    }
}

struct ChannelBytes {
    rx: Receiver<Chunk>,
}

impl ByteStream for ChannelBytes {
    fn poll_next(&mut self) -> Poll<Chunk> {
        channel_poll(&self.rx)
    }
}

struct ChannelSteps {
    rx: Receiver<()>,
}

impl StepStream for ChannelSteps {
    fn poll_next(&mut self) -> Poll<()> {
        channel_poll(&self.rx)
    }
}

fn channel_poll<T>(rx: &Receiver<T>) -> Poll<T> {
    match rx.try_recv() {
        Ok(element) => Poll::Output(element),
        Err(crossbeam_channel::TryRecvError::Empty) => {
            // The producer thread may simply be behind; a brief block
            // avoids a spin without stalling wake processing for long.
            match rx.recv_timeout(StdDuration::from_millis(1)) {
                Ok(element) => Poll::Output(element),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => Poll::Pending,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Poll::Done,
            }
        }
        Err(crossbeam_channel::TryRecvError::Disconnected) => Poll::Done,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;
    use crate::expr::{Expr, RelOp};
    use crate::operators::{Discard, EventsSource, Where};
    use crate::slice::SliceBuilder;
    use crate::types::{Field, Type};

    fn slice(values: &[i64]) -> TableSlice {
        let schema = Type::named(
            "sentra.run",
            Type::record(vec![Field::new("x", Type::int64())]).unwrap(),
        );
        let mut builder = SliceBuilder::new(schema).unwrap();
        for v in values {
            builder.push_row(&[Data::Int64(*v)]).unwrap();
        }
        builder.finish().unwrap()
    }

    #[test]
    fn test_closed_pipeline_completes() {
        let pipeline = Pipeline::from_operators(vec![
            Box::new(EventsSource::new(vec![slice(&[1, 2, 3])])),
            Box::new(Discard::new()),
        ])
        .unwrap();
        let executor = Executor::default();
        let outcome = executor.start(pipeline).unwrap().run();
        assert!(outcome.is_completed(), "got {outcome:?}");
    }

    #[test]
    fn test_open_pipeline_rejected_for_run() {
        let pipeline =
            Pipeline::from_operators(vec![Box::new(EventsSource::new(vec![]))]).unwrap();
        let executor = Executor::default();
        assert!(executor.start(pipeline).is_err());
    }

    #[test]
    fn test_collect_filters() {
        let pipeline = Pipeline::from_operators(vec![
            Box::new(EventsSource::new(vec![slice(&[1, 2, 3, 4])])),
            Box::new(
                Where::new(Expr::predicate(
                    Expr::field("x"),
                    RelOp::Gt,
                    Expr::literal(2i64),
                ))
                .unwrap(),
            ),
        ])
        .unwrap();
        let collected = Executor::default().collect(pipeline).unwrap();
        let total: usize = collected.iter().map(TableSlice::rows).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_max_events_caps_collection() {
        let mut config = RuntimeConfig::default();
        config.max_events = Some(3);
        config.batch_size = 2;
        let pipeline = Pipeline::from_operators(vec![Box::new(EventsSource::new(vec![
            slice(&[1, 2, 3, 4, 5, 6]),
        ]))])
        .unwrap();
        let collected = Executor::new(config).collect(pipeline).unwrap();
        let total: usize = collected.iter().map(TableSlice::rows).sum();
        assert!(total >= 3 && total < 6, "soft-stops at the cap, got {total}");
    }

    #[test]
    fn test_error_diagnostic_fails_run() {
        // A where over an invalid schema reference warns; force an error
        // through a sink that rejects its input.
        #[derive(Debug, Clone)]
        struct FailingSink;

        impl crate::operator::Operator for FailingSink {
            fn name(&self) -> &str {
                "failing"
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
                struct S {
                    input: Box<dyn EventStream>,
                    ctrl: ExecCtrl,
                }
                impl StepStream for S {
                    fn poll_next(&mut self) -> Poll<()> {
                        match self.input.poll_next() {
                            Poll::Output(_) => {
                                self.ctrl.error("sink rejected input");
                                Poll::Output(())
                            }
                            Poll::Pending => Poll::Pending,
                            Poll::Done => Poll::Done,
                        }
                    }
                }
                Ok(OperatorOutput::Void(Box::new(S {
                    input: input.into_events(),
                    ctrl,
                })))
            }

            fn clone_box(&self) -> Box<dyn crate::operator::Operator> {
                Box::new(self.clone())
            }
        }

        let pipeline = Pipeline::from_operators(vec![
            Box::new(EventsSource::new(vec![slice(&[1])])),
            Box::new(FailingSink),
        ])
        .unwrap();
        let outcome = Executor::default().start(pipeline).unwrap().run();
        match outcome {
            RunOutcome::Failed(e) => assert_eq!(e.message, "sink rejected input"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_remote_operator_runs_on_own_thread() {
        // An events pass-through pinned to a remote location; the bridge
        // must deliver every batch in order.
        #[derive(Debug, Clone)]
        struct RemotePass;

        impl crate::operator::Operator for RemotePass {
            fn name(&self) -> &str {
                "remote-pass"
            }

            fn input_type(&self) -> ElementType {
                ElementType::Events
            }

            fn output_type(&self) -> ElementType {
                ElementType::Events
            }

            fn location(&self) -> Location {
                Location::Remote
            }

            fn instantiate(
                &self,
                input: OperatorInput,
                ctrl: ExecCtrl,
            ) -> Result<OperatorOutput, Diagnostic> {
                struct S {
                    input: Box<dyn EventStream>,
                    ctrl: ExecCtrl,
                    thread: std::thread::ThreadId,
                }
                impl EventStream for S {
                    fn poll_next(&mut self) -> Poll<TableSlice> {
                        // The bridge polls on its own thread, not the one
                        // that instantiated the chain.
                        assert_ne!(self.thread, thread::current().id());
                        if self.ctrl.is_cancelled() {
                            return Poll::Done;
                        }
                        self.input.poll_next()
                    }
                }
                Ok(OperatorOutput::Events(Box::new(S {
                    input: input.into_events(),
                    ctrl,
                    // The id of the thread that instantiated the operator.
                    thread: thread::current().id(),
                })))
            }

            fn clone_box(&self) -> Box<dyn crate::operator::Operator> {
                Box::new(self.clone())
            }
        }

        let pipeline = Pipeline::from_operators(vec![
            Box::new(EventsSource::new(vec![
                slice(&[1, 2]),
                slice(&[3]),
                slice(&[4, 5, 6]),
            ])),
            Box::new(RemotePass),
        ])
        .unwrap();
        let collected = Executor::default().collect(pipeline).unwrap();
        let values: Vec<Data> = collected
            .iter()
            .flat_map(|s| (0..s.rows()).map(|r| s.value_at(r, 0)).collect::<Vec<_>>())
            .collect();
        assert_eq!(
            values,
            (1..=6).map(Data::Int64).collect::<Vec<_>>(),
            "order is preserved across the bridge"
        );
    }

    #[test]
    fn test_cancellation_resolves_with_note() {
        let collector = DiagnosticCollector::new();
        let pipeline = Pipeline::from_operators(vec![
            Box::new(
                EventsSource::new(vec![slice(&[1]); 100])
                    .with_delay(crate::data::Duration::from_millis(20)),
            ),
            Box::new(Discard::new()),
        ])
        .unwrap();
        let executor =
            Executor::default().with_diagnostics(collector.clone() as Arc<dyn DiagnosticSink>);
        let run = executor.start(pipeline).unwrap();
        let ctrl = run.ctrl();
        let canceller = thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(50));
            ctrl.cancel();
        });
        let outcome = run.run();
        canceller.join().unwrap();
        assert!(outcome.is_cancelled(), "got {outcome:?}");
        assert!(collector
            .collected()
            .iter()
            .any(|d| d.severity == crate::diag::Severity::Note
                && d.message.contains("cancelled")));
        assert!(!collector.has_error());
    }
}
