//! Per-column indexers: row-id lookup for curried predicates.

use roaring::RoaringBitmap;

use crate::data::Data;
use crate::expr::{evaluate_predicate, RelOp};

/// A relational operator curried with its literal side; detached from the
/// left-hand extractor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CurriedPredicate {
    pub op: RelOp,
    pub rhs: Data,
}

impl CurriedPredicate {
    pub fn new(op: RelOp, rhs: Data) -> Self {
        CurriedPredicate { op, rhs }
    }
}

impl std::fmt::Display for CurriedPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.op, self.rhs)
    }
}

/// Errors an indexer may report; the evaluator treats them as an empty
/// result with a warning.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IndexerError {
    #[error("indexer failure: {0}")]
    Failed(String),
    #[error("invalid regular expression: {0}")]
    InvalidRegex(String),
}

/// A per-column object answering curried predicates with row-id sets
/// within its partition.
pub trait Indexer: Send + Sync {
    fn lookup(&self, predicate: &CurriedPredicate) -> Result<RoaringBitmap, IndexerError>;
}

/// An in-memory value indexer: stores the column values and scans them on
/// lookup. Row ids are `base + offset`.
pub struct ValueIndexer {
    base: u32,
    values: Vec<Data>,
}

impl ValueIndexer {
    pub fn new(base: u32, values: Vec<Data>) -> Self {
        ValueIndexer { base, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Indexer for ValueIndexer {
    fn lookup(&self, predicate: &CurriedPredicate) -> Result<RoaringBitmap, IndexerError> {
        // The pattern compiles once per lookup, not per row.
        let regex = match (&predicate.op, &predicate.rhs) {
            (RelOp::RegexMatch | RelOp::NotRegexMatch, Data::Pattern(pattern)) => Some(
                pattern
                    .compile()
                    .map_err(|e| IndexerError::InvalidRegex(e.to_string()))?,
            ),
            (RelOp::RegexMatch | RelOp::NotRegexMatch, Data::String(source)) => Some(
                regex::Regex::new(source)
                    .map_err(|e| IndexerError::InvalidRegex(e.to_string()))?,
            ),
            _ => None,
        };
        let mut hits = RoaringBitmap::new();
        for (offset, value) in self.values.iter().enumerate() {
            let matched = evaluate_predicate(
                value.as_view(),
                predicate.op,
                predicate.rhs.as_view(),
                regex.as_ref(),
            );
            if matched == Some(true) {
                hits.insert(self.base + offset as u32);
            }
        }
        Ok(hits)
    }
}

/// An indexer that always fails; models a corrupt or unreachable index in
/// tests and exercises the partial-failure policy.
pub struct FailingIndexer {
    pub reason: String,
}

impl Indexer for FailingIndexer {
    fn lookup(&self, _predicate: &CurriedPredicate) -> Result<RoaringBitmap, IndexerError> {
        Err(IndexerError::Failed(self.reason.clone()))
    }
}
