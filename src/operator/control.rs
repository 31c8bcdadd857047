//! The operator control plane.
//!
//! [`ExecCtrl`] is the handle each operator instantiation receives. It
//! carries the diagnostics channel, the one-shot cancellation flag, the
//! suspension state (`set_waiting` plus wake timers), terminal capability,
//! and asynchronous secret resolution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::RuntimeConfig;
use crate::diag::{Diagnostic, DiagnosticSink, NullSink, Severity};

/// Resolves secret names to plain values; plugged in by the embedder.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<String, String>;
}

/// Destination a resolved secret is written into.
pub type SecretSlot = Arc<Mutex<Option<String>>>;

struct SecretRequest {
    name: String,
    slot: SecretSlot,
}

struct CtrlInner {
    diag: Arc<dyn DiagnosticSink>,
    cancelled: AtomicBool,
    waiting: AtomicBool,
    /// Earliest requested wake-up; the mutex is held only to read or
    /// replace the slot.
    wake_at: Mutex<Option<Instant>>,
    /// First error diagnostic; latched once, read by the scheduler after
    /// every poll. The mutex is held only to store or clone.
    fatal: Mutex<Option<Diagnostic>>,
    /// Pending secret requests; drained by the runtime between polls.
    secrets: Mutex<Vec<SecretRequest>>,
    resolver: Option<Arc<dyn SecretResolver>>,
    config: RuntimeConfig,
    has_terminal: bool,
}

/// Cheaply cloneable control handle shared by one pipeline run.
#[derive(Clone)]
pub struct ExecCtrl {
    inner: Arc<CtrlInner>,
}

impl ExecCtrl {
    pub fn new(diag: Arc<dyn DiagnosticSink>, config: RuntimeConfig) -> Self {
        ExecCtrl {
            inner: Arc::new(CtrlInner {
                diag,
                cancelled: AtomicBool::new(false),
                waiting: AtomicBool::new(false),
                wake_at: Mutex::new(None),
                fatal: Mutex::new(None),
                secrets: Mutex::new(Vec::new()),
                resolver: None,
                config,
                has_terminal: false,
            }),
        }
    }

    /// A control handle that swallows diagnostics; for tests.
    pub fn detached() -> Self {
        Self::new(Arc::new(NullSink), RuntimeConfig::default())
    }

    pub fn with_resolver(self, resolver: Arc<dyn SecretResolver>) -> Self {
        let inner = CtrlInner {
            diag: Arc::clone(&self.inner.diag),
            cancelled: AtomicBool::new(self.inner.cancelled.load(Ordering::Relaxed)),
            waiting: AtomicBool::new(self.inner.waiting.load(Ordering::Relaxed)),
            wake_at: Mutex::new(*self.inner.wake_at.lock()),
            fatal: Mutex::new(self.inner.fatal.lock().clone()),
            secrets: Mutex::new(Vec::new()),
            resolver: Some(resolver),
            config: self.inner.config.clone(),
            has_terminal: self.inner.has_terminal,
        };
        ExecCtrl {
            inner: Arc::new(inner),
        }
    }

    /// The runtime configuration of this pipeline run.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether the run is attached to an interactive terminal.
    pub fn has_terminal(&self) -> bool {
        self.inner.has_terminal
    }

    // -- diagnostics ---------------------------------------------------------

    /// Reports a diagnostic. Errors latch as the pipeline failure; the
    /// scheduler terminates the pipeline once the emitting operator
    /// returns.
    pub fn emit(&self, diagnostic: Diagnostic) {
        if diagnostic.severity == Severity::Error {
            let mut fatal = self.inner.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(diagnostic.clone());
            }
        }
        self.inner.diag.emit(diagnostic);
    }

    /// Shorthand for a warning diagnostic.
    pub fn warn(&self, message: impl Into<String>) {
        self.emit(Diagnostic::warning(message));
    }

    /// Shorthand for a fatal error diagnostic.
    pub fn error(&self, message: impl Into<String>) {
        self.emit(Diagnostic::error(message));
    }

    /// The diagnostics sink, for components taking `&dyn DiagnosticSink`.
    pub fn diagnostics(&self) -> &dyn DiagnosticSink {
        self.inner.diag.as_ref()
    }

    /// The first error emitted in this run, if any.
    pub fn fatal(&self) -> Option<Diagnostic> {
        self.inner.fatal.lock().clone()
    }

    // -- cancellation --------------------------------------------------------

    /// Sets the one-shot cancellation flag. Every generator observes it at
    /// its next yield point.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    // -- suspension ----------------------------------------------------------

    /// Declares this operator blocked (or unblocked). A blocked operator is
    /// not re-entered until a wake fires or the flag clears.
    pub fn set_waiting(&self, waiting: bool) {
        self.inner.waiting.store(waiting, Ordering::Relaxed);
        if !waiting {
            *self.inner.wake_at.lock() = None;
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.inner.waiting.load(Ordering::Relaxed)
    }

    /// Schedules a wake-up; the earliest of all pending wakes holds.
    pub fn schedule_wake_at(&self, instant: Instant) {
        let mut wake = self.inner.wake_at.lock();
        *wake = Some(match *wake {
            Some(current) => current.min(instant),
            None => instant,
        });
    }

    pub fn schedule_wake_after(&self, delay: std::time::Duration) {
        self.schedule_wake_at(Instant::now() + delay);
    }

    /// The pending wake-up, if any.
    pub fn wake_at(&self) -> Option<Instant> {
        *self.inner.wake_at.lock()
    }

    /// Clears the waiting state if its wake time has passed.
    pub fn process_wakes(&self, now: Instant) {
        let fired = {
            let wake = self.inner.wake_at.lock();
            matches!(*wake, Some(at) if at <= now)
        };
        if fired {
            self.set_waiting(false);
        }
    }

    // -- secret resolution ---------------------------------------------------

    /// Submits a secret request. The caller keeps the returned slot, calls
    /// `set_waiting(true)` and yields; the runtime resolves asynchronously
    /// and writes the plain value into the slot before re-entering.
    pub fn request_secret(&self, name: impl Into<String>) -> SecretSlot {
        let slot: SecretSlot = Arc::new(Mutex::new(None));
        self.inner.secrets.lock().push(SecretRequest {
            name: name.into(),
            slot: Arc::clone(&slot),
        });
        slot
    }

    /// Resolves all pending secret requests. Called by the runtime between
    /// polls. A failed resolution fails the operator with an error
    /// diagnostic.
    pub fn resolve_pending_secrets(&self) {
        let requests: Vec<SecretRequest> = std::mem::take(&mut *self.inner.secrets.lock());
        if requests.is_empty() {
            return;
        }
        for request in requests {
            match &self.inner.resolver {
                None => {
                    self.error(format!(
                        "no secret resolver configured, cannot resolve `{}`",
                        request.name
                    ));
                }
                Some(resolver) => match resolver.resolve(&request.name) {
                    Ok(value) => {
                        *request.slot.lock() = Some(value);
                        self.set_waiting(false);
                    }
                    Err(reason) => {
                        self.error(format!(
                            "failed to resolve secret `{}`: {reason}",
                            request.name
                        ));
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagnosticCollector;
    use std::time::Duration as StdDuration;

    #[test]
    fn test_cancellation_is_one_shot_and_shared() {
        let ctrl = ExecCtrl::detached();
        let clone = ctrl.clone();
        assert!(!ctrl.is_cancelled());
        clone.cancel();
        assert!(ctrl.is_cancelled());
    }

    #[test]
    fn test_error_latches_first() {
        let collector = DiagnosticCollector::new();
        let ctrl = ExecCtrl::new(collector.clone(), RuntimeConfig::default());
        ctrl.warn("w");
        assert!(ctrl.fatal().is_none());
        ctrl.error("first");
        ctrl.error("second");
        assert_eq!(ctrl.fatal().unwrap().message, "first");
        assert_eq!(collector.collected().len(), 3);
    }

    #[test]
    fn test_wake_keeps_earliest() {
        let ctrl = ExecCtrl::detached();
        let now = Instant::now();
        ctrl.schedule_wake_at(now + StdDuration::from_secs(5));
        ctrl.schedule_wake_at(now + StdDuration::from_secs(2));
        ctrl.schedule_wake_at(now + StdDuration::from_secs(9));
        assert_eq!(ctrl.wake_at(), Some(now + StdDuration::from_secs(2)));
    }

    #[test]
    fn test_process_wakes_clears_waiting() {
        let ctrl = ExecCtrl::detached();
        ctrl.set_waiting(true);
        ctrl.schedule_wake_after(StdDuration::from_millis(0));
        ctrl.process_wakes(Instant::now() + StdDuration::from_millis(1));
        assert!(!ctrl.is_waiting());
        assert!(ctrl.wake_at().is_none());
    }

    struct MapResolver;

    impl SecretResolver for MapResolver {
        fn resolve(&self, name: &str) -> Result<String, String> {
            match name {
                "api-token" => Ok("hunter2".to_string()),
                other => Err(format!("unknown secret `{other}`")),
            }
        }
    }

    #[test]
    fn test_secret_resolution_roundtrip() {
        let collector = DiagnosticCollector::new();
        let ctrl = ExecCtrl::new(collector.clone(), RuntimeConfig::default())
            .with_resolver(Arc::new(MapResolver));
        let slot = ctrl.request_secret("api-token");
        ctrl.set_waiting(true);
        ctrl.resolve_pending_secrets();
        assert_eq!(slot.lock().as_deref(), Some("hunter2"));
        assert!(!ctrl.is_waiting());
        assert!(ctrl.fatal().is_none());
    }

    #[test]
    fn test_secret_resolution_failure_is_fatal() {
        let collector = DiagnosticCollector::new();
        let ctrl = ExecCtrl::new(collector.clone(), RuntimeConfig::default())
            .with_resolver(Arc::new(MapResolver));
        let _slot = ctrl.request_secret("nope");
        ctrl.resolve_pending_secrets();
        assert!(ctrl.fatal().is_some());
    }

    #[test]
    fn test_missing_resolver_is_fatal() {
        let ctrl = ExecCtrl::detached();
        let _slot = ctrl.request_secret("anything");
        ctrl.resolve_pending_secrets();
        assert!(ctrl.fatal().is_some());
    }
}
