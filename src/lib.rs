//! # Sentra Pipeline Engine
//!
//! A security telemetry data pipeline engine. Users compose streaming
//! pipelines, sequences of operators connected by typed channels, that
//! ingest, transform, aggregate, filter and emit structured event data.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Operators (typed units of work)
//!     ↓
//! [Pipeline]        → composition, splicing, adjacency checking
//!     ↓
//! [Optimisation]    → right-to-left filter push-down, local rewrites
//!     ↓
//! [Executor]        → instantiation + cooperative pull-driven scheduling
//!     ↓
//! Batches (table slices) flowing source → sink
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sentra::expr::{Expr, RelOp};
//! use sentra::operators::{Discard, EventsSource, Where};
//! use sentra::pipeline::Pipeline;
//! use sentra::runtime::Executor;
//!
//! let pipeline = Pipeline::from_operators(vec![
//!     Box::new(EventsSource::new(batches)),
//!     Box::new(Where::new(Expr::predicate(
//!         Expr::field("severity"),
//!         RelOp::Ge,
//!         Expr::literal(3i64),
//!     ))?),
//!     Box::new(Discard::new()),
//! ])?;
//! let outcome = Executor::default().start(pipeline.optimize())?.run();
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `types` | Closed type algebra, congruence, Arrow round-trip |
//! | `data` | Owned values and cheap views |
//! | `slice` | Immutable columnar batches |
//! | `expr` | Expression trees, normalisation, vectorised evaluation |
//! | `operator` | The operator contract and control plane |
//! | `operators` | Built-in operators |
//! | `pipeline` | Composition and the optimisation pass |
//! | `runtime` | The cooperative execution runtime |
//! | `aggregation` | The per-group aggregation protocol |
//! | `partition` | Synopses, indexers and the partition evaluator |
//! | `argparse` | Operator argument parsing |
//! | `diag` | Structured diagnostics |

// Data model
pub mod data;
pub mod slice;
pub mod types;

// Expressions and their evaluation
pub mod expr;

// Operator and pipeline model
pub mod chunk;
pub mod operator;
pub mod operators;
pub mod pipeline;

// Execution
pub mod runtime;

// Aggregation protocol
pub mod aggregation;

// Partition-scoped query evaluation
pub mod partition;

// Support subsystems
pub mod argparse;
pub mod config;
pub mod diag;
pub mod util;

// Re-export the types nearly every embedder touches.
pub use crate::config::Config;
pub use crate::data::{Data, DataView, Duration, Ip, Pattern, Subnet, Time};
pub use crate::diag::{Diagnostic, DiagnosticCollector, DiagnosticSink, Severity, Span};
pub use crate::expr::{Expr, RelOp};
pub use crate::operator::{ElementType, EventOrder, ExecCtrl, Location, Operator, Poll};
pub use crate::pipeline::{Pipeline, PipelineError, PipelineNode};
pub use crate::runtime::{Executor, PipelineRun, RunOutcome};
pub use crate::slice::{SliceBuilder, TableSlice};
pub use crate::types::{Field, Kind, Type};
