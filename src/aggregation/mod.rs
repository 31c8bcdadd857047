//! # Aggregation Protocol
//!
//! An aggregation *instance* is created per group key within a grouping
//! operator and exposes the five-operation contract: `update`, `get`,
//! `save`, `restore`, `reset`, plus `merge` for parallel aggregation and
//! `is_deterministic` for planner reordering.
//!
//! Instances that admit a three-valued outcome embed [`AggrState`]:
//! `none` (no contributing inputs yet), `nulled` (a contributing input
//! included a null), `failed` (a type clash occurred; updates become
//! no-ops and `get` returns null).
//!
//! `save` blobs are opaque, versioned, and forward-compatible: restoring a
//! blob written by a newer version produces a warning and leaves the state
//! as constructed.

pub mod builtins;

pub use builtins::register_builtins;

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::data::Data;
use crate::diag::{Diagnostic, DiagnosticSink};
use crate::expr::Series;

/// Current version of the aggregation state blob format.
const STATE_VERSION: u16 = 1;

/// The three-valued outcome state shared by aggregations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AggrState {
    /// No inputs yet, or only non-contributing nulls.
    #[default]
    None,
    /// A contributing input included a null.
    Nulled,
    /// A type clash occurred; all subsequent updates are no-ops.
    Failed,
}

impl AggrState {
    /// Combination for merging two instances: `failed` dominates, then
    /// `nulled`.
    pub fn merge(self, other: AggrState) -> AggrState {
        match (self, other) {
            (AggrState::Failed, _) | (_, AggrState::Failed) => AggrState::Failed,
            (AggrState::Nulled, _) | (_, AggrState::Nulled) => AggrState::Nulled,
            _ => AggrState::None,
        }
    }
}

/// Per-group aggregation state.
pub trait Aggregation: Send {
    /// Incorporates all rows of the evaluated input column.
    ///
    /// Must be deterministic for deterministic functions, and must emit
    /// warnings on type clashes without aborting.
    fn update(&mut self, input: &Series, diag: &dyn DiagnosticSink);

    /// The current result. Idempotent; does not mutate state.
    fn get(&self) -> Data;

    /// Serialises the state to an opaque, versioned blob.
    fn save(&self) -> Vec<u8>;

    /// Restores state previously saved. On format error, emits a warning
    /// and leaves the state as constructed.
    fn restore(&mut self, bytes: &[u8], diag: &dyn DiagnosticSink);

    /// Returns to the just-constructed state.
    fn reset(&mut self);

    /// Merges another instance of the same function, given its `save`
    /// blob. Merge is associative and, for deterministic functions,
    /// commutative.
    fn merge(&mut self, saved: &[u8], diag: &dyn DiagnosticSink);

    /// Whether re-ordering inputs cannot change the result.
    fn is_deterministic(&self) -> bool {
        true
    }
}

// -- state blob helpers ------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct Versioned<P> {
    version: u16,
    payload: P,
}

/// Encodes an aggregation payload with the version envelope.
pub(crate) fn save_state<P: Serialize>(payload: &P) -> Vec<u8> {
    bincode::serialize(&Versioned {
        version: STATE_VERSION,
        payload,
    })
    .expect("aggregation state serializes")
}

/// Decodes a state blob.
///
/// A newer version than this code understands yields a warning and `None`;
/// so does a malformed blob. The caller keeps its constructed state in
/// both cases.
pub(crate) fn restore_state<P: DeserializeOwned>(
    bytes: &[u8],
    function: &str,
    diag: &dyn DiagnosticSink,
) -> Option<P> {
    #[derive(Deserialize)]
    struct VersionOnly {
        version: u16,
    }
    match bincode::deserialize::<VersionOnly>(bytes) {
        Ok(v) if v.version > STATE_VERSION => {
            Diagnostic::warning(format!(
                "aggregation state blob has version {} but this build understands \
                 up to {STATE_VERSION}",
                v.version
            ))
            .hint(format!("failed to restore `{function}` aggregation instance"))
            .emit(diag);
            return None;
        }
        Ok(_) => {}
        Err(e) => {
            Diagnostic::warning(format!("invalid aggregation state blob: {e}"))
                .hint(format!("failed to restore `{function}` aggregation instance"))
                .emit(diag);
            return None;
        }
    }
    match bincode::deserialize::<Versioned<P>>(bytes) {
        Ok(versioned) => Some(versioned.payload),
        Err(e) => {
            Diagnostic::warning(format!("invalid aggregation state blob: {e}"))
                .hint(format!("failed to restore `{function}` aggregation instance"))
                .emit(diag);
            None
        }
    }
}

// -- registry ----------------------------------------------------------------

/// Constructs a fresh instance of one aggregation function.
pub type AggregationFactory = Box<dyn Fn() -> Box<dyn Aggregation> + Send + Sync>;

/// A registry of named aggregation functions.
///
/// Built-ins register statically via [`register_builtins`]; extensions
/// register dynamically at startup.
#[derive(Default)]
pub struct AggregationRegistry {
    factories: HashMap<String, AggregationFactory>,
}

impl AggregationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtins(&mut registry);
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn Aggregation> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Instantiates the named function.
    pub fn make(&self, name: &str) -> Option<Box<dyn Aggregation>> {
        self.factories.get(name).map(|f| f())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

/// Materialises every row of a series.
pub(crate) fn series_values(series: &Series) -> Vec<Data> {
    (0..series.len())
        .map(|row| crate::slice::materialize_at(&series.ty, series.array.as_ref(), row))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagnosticCollector;

    #[test]
    fn test_state_merge_dominance() {
        assert_eq!(AggrState::None.merge(AggrState::None), AggrState::None);
        assert_eq!(AggrState::None.merge(AggrState::Nulled), AggrState::Nulled);
        assert_eq!(AggrState::Nulled.merge(AggrState::Failed), AggrState::Failed);
        assert_eq!(AggrState::Failed.merge(AggrState::None), AggrState::Failed);
    }

    #[test]
    fn test_newer_blob_version_warns_and_keeps_state() {
        let diag = DiagnosticCollector::new();
        let blob = bincode::serialize(&Versioned {
            version: STATE_VERSION + 1,
            payload: 42u64,
        })
        .unwrap();
        let restored: Option<u64> = restore_state(&blob, "test", diag.as_ref());
        assert!(restored.is_none());
        assert!(diag.collected().iter().any(|d| d.message.contains("version")));
    }

    #[test]
    fn test_malformed_blob_warns() {
        let diag = DiagnosticCollector::new();
        let restored: Option<u64> = restore_state(&[0xff], "test", diag.as_ref());
        assert!(restored.is_none());
        assert_eq!(diag.collected().len(), 1);
    }

    #[test]
    fn test_registry_round_trip() {
        let registry = AggregationRegistry::with_builtins();
        for name in [
            "any",
            "all",
            "min",
            "max",
            "sum",
            "count",
            "count_distinct",
            "distinct",
            "mode",
            "value_counts",
            "entropy",
            "top",
            "rare",
            "first",
            "last",
        ] {
            assert!(registry.contains(name), "missing builtin `{name}`");
            assert!(registry.make(name).is_some());
        }
        assert!(registry.make("no_such_aggregation").is_none());
    }
}
