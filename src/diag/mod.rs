//! # Diagnostics
//!
//! Structured diagnostics for pipeline operators and the execution runtime.
//! A diagnostic carries a severity, a message, an optional primary source
//! span, secondary labelled spans, and notes (usage, docs, free-form).
//!
//! Diagnostics are produced, never thrown: operators report through the
//! sink handed to them by the runtime, and the runtime decides how to route
//! them. An `error` diagnostic is fatal to the pipeline the moment the
//! operator that produced it returns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Informational, e.g. a cancellation notice.
    Note,
    /// Something is off but the pipeline continues.
    Warning,
    /// Fatal to the pipeline.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Note => write!(f, "note"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A half-open byte range into the pipeline source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    /// The span covering both `self` and `other`.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A value together with the source span it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Located<T> {
    pub inner: T,
    pub span: Span,
}

impl<T> Located<T> {
    pub fn new(inner: T, span: Span) -> Self {
        Located { inner, span }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Located<U> {
        Located {
            inner: f(self.inner),
            span: self.span,
        }
    }
}

/// A secondary span with an explanatory label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

/// An auxiliary note attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Note {
    /// The usage string of the operator that produced the diagnostic.
    Usage(String),
    /// A URL pointing at the operator documentation.
    Docs(String),
    /// Free-form additional context.
    Text(String),
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Note::Usage(u) => write!(f, "usage: {u}"),
            Note::Docs(d) => write!(f, "docs: {d}"),
            Note::Text(t) => write!(f, "{t}"),
        }
    }
}

/// A structured diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub primary: Option<Span>,
    pub secondary: Vec<Label>,
    pub notes: Vec<Note>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Diagnostic {
            severity,
            message: message.into(),
            primary: None,
            secondary: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn note(message: impl Into<String>) -> Self {
        Self::new(Severity::Note, message)
    }

    /// Set the primary span the diagnostic points at.
    pub fn primary(mut self, span: Span) -> Self {
        self.primary = Some(span);
        self
    }

    /// Attach a secondary span with a label.
    pub fn secondary(mut self, span: Span, message: impl Into<String>) -> Self {
        self.secondary.push(Label {
            span,
            message: message.into(),
        });
        self
    }

    /// Attach a usage note.
    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.notes.push(Note::Usage(usage.into()));
        self
    }

    /// Attach a documentation URL note.
    pub fn docs(mut self, url: impl Into<String>) -> Self {
        self.notes.push(Note::Docs(url.into()));
        self
    }

    /// Attach a free-form note.
    pub fn hint(mut self, text: impl Into<String>) -> Self {
        self.notes.push(Note::Text(text.into()));
        self
    }

    /// Report the diagnostic through a sink.
    pub fn emit(self, sink: &dyn DiagnosticSink) {
        sink.emit(self);
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(span) = &self.primary {
            write!(f, " [{span}]")?;
        }
        for label in &self.secondary {
            write!(f, "; {} [{}]", label.message, label.span)?;
        }
        for note in &self.notes {
            write!(f, "\n  {note}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Receives diagnostics from operators and the runtime.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Collects diagnostics into memory.
///
/// Lock scope: the inner mutex is held only to push or snapshot, never
/// across user code.
#[derive(Default)]
pub struct DiagnosticCollector {
    entries: Mutex<Vec<Diagnostic>>,
}

impl DiagnosticCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of all diagnostics emitted so far.
    pub fn collected(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    /// The first error diagnostic, if any was emitted.
    pub fn first_error(&self) -> Option<Diagnostic> {
        self.entries.lock().iter().find(|d| d.is_error()).cloned()
    }

    pub fn has_error(&self) -> bool {
        self.entries.lock().iter().any(|d| d.is_error())
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl DiagnosticSink for DiagnosticCollector {
    fn emit(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => tracing::debug!(target: "sentra::diag", %diagnostic, "error emitted"),
            Severity::Warning => tracing::trace!(target: "sentra::diag", %diagnostic, "warning emitted"),
            Severity::Note => tracing::trace!(target: "sentra::diag", %diagnostic, "note emitted"),
        }
        self.entries.lock().push(diagnostic);
    }
}

/// A sink that drops everything. Useful in tests for the don't-care case.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _diagnostic: Diagnostic) {}
}
