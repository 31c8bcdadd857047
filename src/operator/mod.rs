//! # Operator Model
//!
//! An operator is the typed unit of work pipelines compose: it declares
//! its input and output element types, where it must run, how it reacts to
//! optimisation, and how to instantiate its per-run generator.
//!
//! Generators are pull-driven state machines. Each call to `poll_next`
//! yields in one of three ways:
//! - [`Poll::Output`]: a productive yield; the element flows downstream;
//! - [`Poll::Pending`]: an empty yield, or a suspension if the operator
//!   declared itself blocked via [`ExecCtrl::set_waiting`];
//! - [`Poll::Done`]: the stream is exhausted.

pub mod control;

pub use control::{ExecCtrl, SecretResolver, SecretSlot};

use std::collections::HashMap;
use std::fmt;

use crate::chunk::Chunk;
use crate::diag::Diagnostic;
use crate::expr::Expr;
use crate::slice::TableSlice;

/// The coarse type at an operator boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Void,
    Bytes,
    Events,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElementType::Void => "void",
            ElementType::Bytes => "bytes",
            ElementType::Events => "events",
        };
        write!(f, "{s}")
    }
}

/// Where an operator must run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Location {
    #[default]
    Anywhere,
    Local,
    Remote,
}

/// Whether event order is significant downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventOrder {
    #[default]
    Ordered,
    Unordered,
}

/// One step of a generator.
#[derive(Debug)]
pub enum Poll<T> {
    /// A produced element.
    Output(T),
    /// No element this step. The scheduler polls upstream and re-enters,
    /// unless the operator suspended via [`ExecCtrl::set_waiting`].
    Pending,
    /// The stream is exhausted.
    Done,
}

/// A pull-driven generator of table slices.
pub trait EventStream: Send {
    fn poll_next(&mut self) -> Poll<TableSlice>;
}

/// A pull-driven generator of byte chunks.
pub trait ByteStream: Send {
    fn poll_next(&mut self) -> Poll<Chunk>;
}

/// A pull-driven generator of side effects; what sinks produce.
pub trait StepStream: Send {
    fn poll_next(&mut self) -> Poll<()>;
}

/// The upstream sequence handed to `instantiate`.
pub enum OperatorInput {
    Void,
    Bytes(Box<dyn ByteStream>),
    Events(Box<dyn EventStream>),
}

impl OperatorInput {
    pub fn element_type(&self) -> ElementType {
        match self {
            OperatorInput::Void => ElementType::Void,
            OperatorInput::Bytes(_) => ElementType::Bytes,
            OperatorInput::Events(_) => ElementType::Events,
        }
    }

    /// Unwraps an events input.
    ///
    /// # Panics
    /// Panics when the input is not events; composition checked the chain,
    /// so this is a logic error.
    pub fn into_events(self) -> Box<dyn EventStream> {
        match self {
            OperatorInput::Events(stream) => stream,
            other => panic!(
                "operator expected events input, got {}",
                other.element_type()
            ),
        }
    }

    /// Unwraps a bytes input; see [`OperatorInput::into_events`].
    pub fn into_bytes(self) -> Box<dyn ByteStream> {
        match self {
            OperatorInput::Bytes(stream) => stream,
            other => panic!(
                "operator expected bytes input, got {}",
                other.element_type()
            ),
        }
    }
}

/// The downstream sequence an instantiation returns.
pub enum OperatorOutput {
    Void(Box<dyn StepStream>),
    Bytes(Box<dyn ByteStream>),
    Events(Box<dyn EventStream>),
}

impl OperatorOutput {
    pub fn element_type(&self) -> ElementType {
        match self {
            OperatorOutput::Void(_) => ElementType::Void,
            OperatorOutput::Bytes(_) => ElementType::Bytes,
            OperatorOutput::Events(_) => ElementType::Events,
        }
    }
}

/// How optimisation replaces an operator.
pub enum Replace {
    /// Keep the operator unchanged.
    Keep,
    /// Remove the operator from the chain (it absorbed itself into the
    /// accumulated filter).
    Remove,
    /// Substitute a specialised operator.
    With(Box<dyn Operator>),
}

/// Result of one [`Operator::optimize`] step.
///
/// Optimisation walks the chain right-to-left with a `(filter, order)`
/// accumulator. `filter: Some(f)` continues accumulating `f` upstream;
/// `None` blocks the push, and the pending filter materialises right after
/// this operator.
pub struct OptimizeResult {
    pub filter: Option<Expr>,
    pub order: EventOrder,
    pub replace: Replace,
}

impl OptimizeResult {
    /// The conservative default: nothing pushes past this operator, order
    /// must be preserved upstream.
    pub fn do_not_optimize() -> Self {
        OptimizeResult {
            filter: None,
            order: EventOrder::Ordered,
            replace: Replace::Keep,
        }
    }

    /// The operator is transparent to filters and order.
    pub fn order_invariant(filter: Expr, order: EventOrder) -> Self {
        OptimizeResult {
            filter: Some(filter),
            order,
            replace: Replace::Keep,
        }
    }
}

/// A pipeline operator.
///
/// Implementations provide the static contract (name, element types,
/// location) plus `instantiate`, which builds the per-run generator. The
/// `optimize` default is *do-not-optimize*.
pub trait Operator: fmt::Debug + Send + Sync {
    /// Stable identifier, used in logs and lookup.
    fn name(&self) -> &str;

    fn input_type(&self) -> ElementType;

    fn output_type(&self) -> ElementType;

    fn location(&self) -> Location {
        Location::Anywhere
    }

    /// Whether user-visible listings hide this operator.
    fn internal(&self) -> bool {
        false
    }

    /// Local rewrite given the downstream selection predicate and ordering
    /// requirement.
    fn optimize(&self, filter: &Expr, order: EventOrder) -> OptimizeResult {
        let _ = (filter, order);
        OptimizeResult::do_not_optimize()
    }

    /// Materialises the per-run generator.
    fn instantiate(
        &self,
        input: OperatorInput,
        ctrl: ExecCtrl,
    ) -> Result<OperatorOutput, Diagnostic>;

    fn clone_box(&self) -> Box<dyn Operator>;
}

impl Clone for Box<dyn Operator> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl fmt::Display for Box<dyn Operator> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Per-schema substate for operators over heterogeneous event streams.
///
/// On each newly observed schema the operator installs a substate; later
/// batches with the same schema reuse it. Keyed by schema fingerprint.
pub struct SchemaCache<T> {
    states: HashMap<u64, T>,
}

impl<T> SchemaCache<T> {
    pub fn new() -> Self {
        SchemaCache {
            states: HashMap::new(),
        }
    }

    /// The substate for the slice's schema, created on first sight.
    pub fn entry(&mut self, slice: &TableSlice, init: impl FnOnce(&TableSlice) -> T) -> &mut T {
        self.states
            .entry(slice.schema_id())
            .or_insert_with(|| init(slice))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.states.values()
    }
}

impl<T> Default for SchemaCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
