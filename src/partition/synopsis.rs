//! Synopses: small per-column summaries for candidate pruning.
//!
//! A synopsis answers a curried predicate `(op, literal)` with one of
//! three outcomes: `Some(false)` (definitely no row matches), `None`
//! (maybe), or `Some(true)` (definitely every row matches). A `maybe`
//! always widens: the evaluator falls through to the indexer or to the
//! full row set, never below it.
//!
//! Synopses are constructed once per partition at ingest time and
//! read-only thereafter.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::data::{Data, DataView, Time};
use crate::expr::{compare_numeric, RelOp};

/// The synopsis lookup contract.
pub trait Synopsis: Send + Sync {
    /// Evaluates `column op rhs` against the summary.
    fn lookup(&self, op: RelOp, rhs: &DataView<'_>) -> Option<bool>;
}

fn partial_order(lhs: &DataView<'_>, rhs: &DataView<'_>) -> Option<Ordering> {
    compare_numeric(*lhs, *rhs).or_else(|| {
        (lhs.kind() == rhs.kind() && lhs.kind().is_ordered()).then(|| lhs.cmp(rhs))
    })
}

/// Min/max summary for ordered columns.
#[derive(Debug, Clone)]
pub struct MinMaxSynopsis {
    min: Data,
    max: Data,
}

impl MinMaxSynopsis {
    /// Builds the summary from column values; nulls do not contribute.
    /// Returns `None` for an all-null column, which prunes nothing.
    pub fn build<'a>(values: impl Iterator<Item = DataView<'a>>) -> Option<Self> {
        let mut min: Option<Data> = None;
        let mut max: Option<Data> = None;
        for view in values {
            if view.is_null() {
                continue;
            }
            match &min {
                None => min = Some(view.materialize()),
                Some(current) => {
                    if partial_order(&view, &current.as_view()) == Some(Ordering::Less) {
                        min = Some(view.materialize());
                    }
                }
            }
            match &max {
                None => max = Some(view.materialize()),
                Some(current) => {
                    if partial_order(&view, &current.as_view()) == Some(Ordering::Greater) {
                        max = Some(view.materialize());
                    }
                }
            }
        }
        Some(MinMaxSynopsis {
            min: min?,
            max: max?,
        })
    }

    pub fn min(&self) -> &Data {
        &self.min
    }

    pub fn max(&self) -> &Data {
        &self.max
    }
}

impl Synopsis for MinMaxSynopsis {
    fn lookup(&self, op: RelOp, rhs: &DataView<'_>) -> Option<bool> {
        let min = self.min.as_view();
        let max = self.max.as_view();
        let min_cmp = partial_order(&min, rhs)?;
        let max_cmp = partial_order(&max, rhs)?;
        match op {
            RelOp::Lt => match (max_cmp, min_cmp) {
                (Ordering::Less, _) => Some(true),
                (_, Ordering::Less) => None,
                _ => Some(false),
            },
            RelOp::Le => match (max_cmp, min_cmp) {
                (Ordering::Greater, Ordering::Greater) => Some(false),
                (Ordering::Greater, _) => None,
                _ => Some(true),
            },
            RelOp::Gt => match (min_cmp, max_cmp) {
                (Ordering::Greater, _) => Some(true),
                (_, Ordering::Greater) => None,
                _ => Some(false),
            },
            RelOp::Ge => match (min_cmp, max_cmp) {
                (Ordering::Less, Ordering::Less) => Some(false),
                (Ordering::Less, _) => None,
                _ => Some(true),
            },
            RelOp::Eq => {
                if min_cmp == Ordering::Greater || max_cmp == Ordering::Less {
                    Some(false)
                } else if min_cmp == Ordering::Equal && max_cmp == Ordering::Equal {
                    Some(true)
                } else {
                    None
                }
            }
            RelOp::Ne => {
                if min_cmp == Ordering::Greater || max_cmp == Ordering::Less {
                    Some(true)
                } else if min_cmp == Ordering::Equal && max_cmp == Ordering::Equal {
                    Some(false)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

/// Import-time summary: the `[min_import_time, max_import_time]` interval.
#[derive(Debug, Clone, Copy)]
pub struct TimeSynopsis {
    min: Time,
    max: Time,
}

impl TimeSynopsis {
    pub fn new(min: Time, max: Time) -> Self {
        TimeSynopsis { min, max }
    }
}

impl Synopsis for TimeSynopsis {
    fn lookup(&self, op: RelOp, rhs: &DataView<'_>) -> Option<bool> {
        MinMaxSynopsis {
            min: Data::Time(self.min),
            max: Data::Time(self.max),
        }
        .lookup(op, rhs)
    }
}

/// A Bloom filter for equality pruning on high-cardinality columns.
///
/// No false negatives: a `might_contain` of `false` means the value is
/// definitely absent. Double hashing generates the k probe positions from
/// two base hashes.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Sizes the filter for `expected` elements at the given false
    /// positive rate.
    pub fn new(expected: usize, fp_rate: f64) -> Self {
        let expected = expected.max(1) as f64;
        let fp_rate = fp_rate.clamp(1e-9, 0.5);
        let num_bits = (-expected * fp_rate.ln() / (2f64.ln() * 2f64.ln())).ceil() as u64;
        let num_bits = num_bits.max(64);
        let num_hashes = ((num_bits as f64 / expected) * 2f64.ln()).round().max(1.0) as u32;
        BloomFilter {
            bits: vec![0; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
        }
    }

    fn hashes<T: Hash>(&self, value: &T) -> (u64, u64) {
        let mut h1 = DefaultHasher::new();
        value.hash(&mut h1);
        let h1 = h1.finish();
        let mut h2 = DefaultHasher::new();
        h1.hash(&mut h2);
        value.hash(&mut h2);
        (h1, h2.finish() | 1)
    }

    pub fn insert<T: Hash>(&mut self, value: &T) {
        let (h1, h2) = self.hashes(value);
        for i in 0..self.num_hashes {
            let bit = h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits;
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    pub fn might_contain<T: Hash>(&self, value: &T) -> bool {
        let (h1, h2) = self.hashes(value);
        (0..self.num_hashes).all(|i| {
            let bit = h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits;
            self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0
        })
    }
}

/// Membership summary backed by a Bloom filter; prunes `==` and widens
/// everything else.
#[derive(Debug, Clone)]
pub struct BloomSynopsis {
    filter: BloomFilter,
}

impl BloomSynopsis {
    pub fn build<'a>(values: impl Iterator<Item = DataView<'a>>, expected: usize) -> Self {
        let mut filter = BloomFilter::new(expected, 0.01);
        for view in values {
            if !view.is_null() {
                filter.insert(&view);
            }
        }
        BloomSynopsis { filter }
    }
}

impl Synopsis for BloomSynopsis {
    fn lookup(&self, op: RelOp, rhs: &DataView<'_>) -> Option<bool> {
        match op {
            RelOp::Eq => {
                if self.filter.might_contain(rhs) {
                    None
                } else {
                    Some(false)
                }
            }
            RelOp::Ne => {
                if self.filter.might_contain(rhs) {
                    None
                } else {
                    Some(true)
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Ip;

    fn minmax(values: &[i64]) -> MinMaxSynopsis {
        let owned: Vec<Data> = values.iter().map(|v| Data::Int64(*v)).collect();
        MinMaxSynopsis::build(owned.iter().map(Data::as_view)).unwrap()
    }

    #[test]
    fn test_minmax_ordering_lookups() {
        let synopsis = minmax(&[10, 20, 30]);
        // Everything below 10 cannot match >=.
        assert_eq!(synopsis.lookup(RelOp::Lt, &DataView::Int64(5)), Some(false));
        assert_eq!(synopsis.lookup(RelOp::Lt, &DataView::Int64(40)), Some(true));
        assert_eq!(synopsis.lookup(RelOp::Lt, &DataView::Int64(20)), None);
        assert_eq!(synopsis.lookup(RelOp::Gt, &DataView::Int64(5)), Some(true));
        assert_eq!(synopsis.lookup(RelOp::Gt, &DataView::Int64(35)), Some(false));
        assert_eq!(synopsis.lookup(RelOp::Eq, &DataView::Int64(50)), Some(false));
        assert_eq!(synopsis.lookup(RelOp::Eq, &DataView::Int64(25)), None);
        assert_eq!(synopsis.lookup(RelOp::Ne, &DataView::Int64(50)), Some(true));
    }

    #[test]
    fn test_minmax_point_interval() {
        let synopsis = minmax(&[7]);
        assert_eq!(synopsis.lookup(RelOp::Eq, &DataView::Int64(7)), Some(true));
        assert_eq!(synopsis.lookup(RelOp::Ne, &DataView::Int64(7)), Some(false));
    }

    #[test]
    fn test_minmax_incomparable_is_maybe() {
        let synopsis = minmax(&[1, 2]);
        assert_eq!(synopsis.lookup(RelOp::Eq, &DataView::String("x")), None);
        assert_eq!(synopsis.lookup(RelOp::RegexMatch, &DataView::Int64(1)), None);
    }

    #[test]
    fn test_minmax_all_null_column() {
        let values = [Data::Null, Data::Null];
        assert!(MinMaxSynopsis::build(values.iter().map(Data::as_view)).is_none());
    }

    #[test]
    fn test_time_synopsis() {
        let synopsis = TimeSynopsis::new(Time(100), Time(200));
        assert_eq!(
            synopsis.lookup(RelOp::Lt, &DataView::Time(Time(50))),
            Some(false)
        );
        assert_eq!(
            synopsis.lookup(RelOp::Gt, &DataView::Time(Time(50))),
            Some(true)
        );
        assert_eq!(synopsis.lookup(RelOp::Gt, &DataView::Time(Time(150))), None);
    }

    #[test]
    fn test_bloom_no_false_negatives() {
        let values: Vec<Data> = (0..1000)
            .map(|i| Data::Ip(Ip::parse(&format!("10.0.{}.{}", i / 256, i % 256)).unwrap()))
            .collect();
        let synopsis = BloomSynopsis::build(values.iter().map(Data::as_view), values.len());
        for value in &values {
            // A present value never reports definitely-no.
            assert_ne!(synopsis.lookup(RelOp::Eq, &value.as_view()), Some(false));
        }
    }

    #[test]
    fn test_bloom_prunes_absent_values() {
        let values: Vec<Data> = (0..100).map(Data::Int64).collect();
        let synopsis = BloomSynopsis::build(values.iter().map(Data::as_view), 100);
        let absent: Vec<_> = (1000..2000)
            .map(Data::Int64)
            .filter(|v| synopsis.lookup(RelOp::Eq, &v.as_view()) == Some(false))
            .collect();
        // With a 1% target rate, nearly all absent values prune.
        assert!(absent.len() > 900, "only {} pruned", absent.len());
    }

    #[test]
    fn test_bloom_widen_on_ordering() {
        let values: Vec<Data> = (0..10).map(Data::Int64).collect();
        let synopsis = BloomSynopsis::build(values.iter().map(Data::as_view), 10);
        assert_eq!(synopsis.lookup(RelOp::Lt, &DataView::Int64(5)), None);
    }
}
