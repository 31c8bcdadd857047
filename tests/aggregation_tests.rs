//! Cross-cutting aggregation protocol tests: the merge-and-drain cycle,
//! determinism flags, and blob forward compatibility.

use sentra::aggregation::AggregationRegistry;
use sentra::diag::NullSink;
use sentra::expr::Series;
use sentra::slice::builder::build_array;
use sentra::{Data, DiagnosticCollector, Type};

fn int_series(values: &[Option<i64>]) -> Series {
    let data: Vec<Data> = values
        .iter()
        .map(|v| v.map(Data::Int64).unwrap_or(Data::Null))
        .collect();
    let len = data.len();
    Series {
        array: build_array(&Type::int64(), &data, len).unwrap(),
        ty: Type::int64(),
    }
}

fn bool_series(values: &[Option<bool>]) -> Series {
    let data: Vec<Data> = values
        .iter()
        .map(|v| v.map(Data::Bool).unwrap_or(Data::Null))
        .collect();
    let len = data.len();
    Series {
        array: build_array(&Type::bool_(), &data, len).unwrap(),
        ty: Type::bool_(),
    }
}

/// The canonical merge-correctness check: updating one instance with the
/// whole input must agree with updating shards and merging their saved
/// states.
#[test]
fn test_merge_and_drain_cycle_matches_direct_update() {
    let registry = AggregationRegistry::with_builtins();
    let shards = [
        int_series(&[Some(3), None, Some(1)]),
        int_series(&[Some(4)]),
        int_series(&[Some(1), Some(5)]),
    ];
    let whole = int_series(&[Some(3), None, Some(1), Some(4), Some(1), Some(5)]);
    for name in [
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
    ] {
        let mut direct = registry.make(name).unwrap();
        direct.update(&whole, &NullSink);

        let mut merged = registry.make(name).unwrap();
        for shard in &shards {
            let mut partial = registry.make(name).unwrap();
            partial.update(shard, &NullSink);
            merged.merge(&partial.save(), &NullSink);
        }
        assert_eq!(direct.get(), merged.get(), "function `{name}`");
    }
}

#[test]
fn test_any_all_merge() {
    let registry = AggregationRegistry::with_builtins();
    for (name, inputs, expected) in [
        ("any", vec![&[Some(false)][..], &[Some(true)][..]], Data::Bool(true)),
        ("any", vec![&[Some(false)][..], &[Some(false)][..]], Data::Bool(false)),
        ("all", vec![&[Some(true)][..], &[Some(false)][..]], Data::Bool(false)),
        ("all", vec![&[Some(true)][..], &[Some(true)][..]], Data::Bool(true)),
    ] {
        let mut merged = registry.make(name).unwrap();
        for input in inputs {
            let mut partial = registry.make(name).unwrap();
            partial.update(&bool_series(input), &NullSink);
            merged.merge(&partial.save(), &NullSink);
        }
        assert_eq!(merged.get(), expected, "function `{name}`");
    }
}

#[test]
fn test_save_restore_get_is_identity() {
    let registry = AggregationRegistry::with_builtins();
    let input = int_series(&[Some(7), Some(7), Some(2), None]);
    for name in registry.names().collect::<Vec<_>>() {
        if name == "any" || name == "all" {
            continue;
        }
        let mut original = registry.make(name).unwrap();
        original.update(&input, &NullSink);
        let blob = original.save();
        let mut restored = registry.make(name).unwrap();
        restored.restore(&blob, &NullSink);
        assert_eq!(original.get(), restored.get(), "function `{name}`");
        // Restoring is not an update: a second restore of the same blob
        // replaces, so get is stable.
        restored.restore(&blob, &NullSink);
        assert_eq!(original.get(), restored.get(), "function `{name}`");
    }
}

#[test]
fn test_garbage_blob_warns_and_keeps_constructed_state() {
    let registry = AggregationRegistry::with_builtins();
    let diag = DiagnosticCollector::new();
    let mut sum = registry.make("sum").unwrap();
    sum.restore(b"definitely not a state blob", diag.as_ref());
    assert_eq!(sum.get(), Data::Null);
    let diags = diag.collected();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].severity, sentra::Severity::Warning);
}

#[test]
fn test_reset_after_restore() {
    let registry = AggregationRegistry::with_builtins();
    let mut count = registry.make("count").unwrap();
    count.update(&int_series(&[Some(1), Some(2)]), &NullSink);
    let blob = count.save();
    let mut other = registry.make("count").unwrap();
    other.restore(&blob, &NullSink);
    assert_eq!(other.get(), Data::UInt64(2));
    other.reset();
    assert_eq!(other.get(), Data::UInt64(0));
}

#[test]
fn test_determinism_flags() {
    let registry = AggregationRegistry::with_builtins();
    for name in ["min", "max", "sum", "count", "count_distinct", "mode"] {
        assert!(
            registry.make(name).unwrap().is_deterministic(),
            "`{name}` must be deterministic"
        );
    }
    for name in ["first", "last"] {
        assert!(
            !registry.make(name).unwrap().is_deterministic(),
            "`{name}` must not be deterministic"
        );
    }
}
