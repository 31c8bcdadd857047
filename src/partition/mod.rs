//! # Partitions
//!
//! A partition is an externally managed, immutable group of events. The
//! engine consumes, per partition: the combined schema, the type-ids map
//! (schema name → row-id set), per-leaf-column indexer handles, and the
//! partition synopsis. All of it is borrowed from the catalog collaborator
//! and read-only here.

pub mod evaluator;
pub mod indexer;
pub mod synopsis;

pub use evaluator::{evaluate, PartitionQuery};
pub use indexer::{CurriedPredicate, FailingIndexer, Indexer, IndexerError, ValueIndexer};
pub use synopsis::{BloomSynopsis, MinMaxSynopsis, Synopsis, TimeSynopsis};

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use roaring::RoaringBitmap;

use crate::data::Time;
use crate::slice::TableSlice;
use crate::types::Type;

/// Per-schema bookkeeping inside a partition.
#[derive(Clone)]
pub struct SchemaIds {
    /// Rows of this schema within the partition.
    pub ids: RoaringBitmap,
    /// The schema fingerprint; the `#schema_id` meta field.
    pub fingerprint: u64,
}

/// The partition synopsis: import-time interval, internal flag, and
/// per-column summaries keyed by leaf name.
#[derive(Default)]
pub struct PartitionSynopsis {
    pub min_import_time: Option<Time>,
    pub max_import_time: Option<Time>,
    pub internal: bool,
    columns: HashMap<String, Arc<dyn Synopsis>>,
}

impl PartitionSynopsis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_import_time_range(mut self, min: Time, max: Time) -> Self {
        self.min_import_time = Some(min);
        self.max_import_time = Some(max);
        self
    }

    pub fn with_internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    pub fn with_column(mut self, key: impl Into<String>, synopsis: Arc<dyn Synopsis>) -> Self {
        self.columns.insert(key.into(), synopsis);
        self
    }

    pub fn column(&self, key: &str) -> Option<&Arc<dyn Synopsis>> {
        self.columns.get(key)
    }

    /// The import-time interval as a lookup synopsis, if recorded.
    pub fn import_time_synopsis(&self) -> Option<TimeSynopsis> {
        Some(TimeSynopsis::new(
            self.min_import_time?,
            self.max_import_time?,
        ))
    }
}

/// The per-partition inputs the evaluator consumes.
///
/// Handles are borrowed from the catalog: the evaluator must not retain
/// them across its own teardown, which `Arc` makes a non-issue here while
/// keeping ownership with the caller.
pub struct PartitionHandle {
    schema: Type,
    schemas: IndexMap<String, SchemaIds>,
    indexers: HashMap<String, Arc<dyn Indexer>>,
    synopsis: PartitionSynopsis,
    all_rows: RoaringBitmap,
}

impl PartitionHandle {
    /// Creates a handle over the combined schema; rows join via
    /// [`PartitionHandle::add_schema`].
    pub fn new(schema: Type, synopsis: PartitionSynopsis) -> Self {
        PartitionHandle {
            schema,
            schemas: IndexMap::new(),
            indexers: HashMap::new(),
            synopsis,
            all_rows: RoaringBitmap::new(),
        }
    }

    /// Registers a schema's row-id range.
    pub fn add_schema(mut self, name: impl Into<String>, ty: &Type, ids: RoaringBitmap) -> Self {
        self.all_rows |= &ids;
        self.schemas.insert(
            name.into(),
            SchemaIds {
                ids,
                fingerprint: ty.fingerprint(),
            },
        );
        self
    }

    /// Registers the indexer for a leaf column.
    pub fn add_indexer(mut self, key: impl Into<String>, indexer: Arc<dyn Indexer>) -> Self {
        self.indexers.insert(key.into(), indexer);
        self
    }

    /// The partition's combined schema.
    pub fn schema(&self) -> &Type {
        &self.schema
    }

    /// The type-ids map: schema name → row-id set.
    pub fn schemas(&self) -> &IndexMap<String, SchemaIds> {
        &self.schemas
    }

    pub fn indexer(&self, key: &str) -> Option<&Arc<dyn Indexer>> {
        self.indexers.get(key)
    }

    pub fn synopsis(&self) -> &PartitionSynopsis {
        &self.synopsis
    }

    /// Every row id in the partition.
    pub fn all_rows(&self) -> &RoaringBitmap {
        &self.all_rows
    }

    pub fn num_rows(&self) -> u64 {
        self.all_rows.len()
    }
}

/// Materialises rows for final row-id sets; implemented by the store
/// collaborator.
pub trait Store: Send + Sync {
    /// Fetches the rows in `ids` as a sequence of batches, honouring an
    /// optional event limit.
    fn fetch(&self, ids: &RoaringBitmap, limit: Option<u64>) -> Vec<TableSlice>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Field;

    #[test]
    fn test_handle_accumulates_all_rows() {
        let s1 = Type::named(
            "S1",
            Type::record(vec![Field::new("ip", Type::ip())]).unwrap(),
        );
        let s2 = Type::named(
            "S2",
            Type::record(vec![Field::new("port", Type::uint64())]).unwrap(),
        );
        let handle = PartitionHandle::new(s1.clone(), PartitionSynopsis::new())
            .add_schema("S1", &s1, (0..100).collect())
            .add_schema("S2", &s2, (100..150).collect());
        assert_eq!(handle.num_rows(), 150);
        assert_eq!(handle.schemas().len(), 2);
        assert_eq!(handle.schemas()["S1"].ids.len(), 100);
        assert_ne!(
            handle.schemas()["S1"].fingerprint,
            handle.schemas()["S2"].fingerprint
        );
    }

    #[test]
    fn test_synopsis_lookup_paths() {
        let synopsis = PartitionSynopsis::new()
            .with_import_time_range(Time(10), Time(20))
            .with_internal(true);
        assert!(synopsis.import_time_synopsis().is_some());
        assert!(synopsis.internal);
        assert!(synopsis.column("missing").is_none());
    }
}
