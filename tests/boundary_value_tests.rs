//! Boundary Value Tests
//!
//! Tests at exact boundary conditions - many bugs occur at exact limits.
//!
//! - Maximum-width primitives through slices and comparisons
//! - Empty slices through operators
//! - Regex matches on empty input
//! - Subnet containment across v4/v6
//! - YAML bridge round-trips
//! - Indentation stripping laws

use sentra::data::yaml::{from_yaml_str, to_yaml_str};
use sentra::data::{Ip, Pattern, Subnet};
use sentra::expr::{evaluate_predicate, Expr, RelOp};
use sentra::operators::{EventsSource, Where};
use sentra::pipeline::Pipeline;
use sentra::runtime::Executor;
use sentra::util::strip_leading_indentation;
use sentra::{Data, DataView, Field, SliceBuilder, TableSlice, Type};

fn extreme_slice() -> TableSlice {
    let schema = Type::named(
        "sentra.extremes",
        Type::record(vec![
            Field::new("i", Type::int64()),
            Field::new("u", Type::uint64()),
            Field::new("d", Type::double()),
        ])
        .unwrap(),
    );
    let mut builder = SliceBuilder::new(schema).unwrap();
    builder
        .push_row(&[
            Data::Int64(i64::MIN),
            Data::UInt64(u64::MAX),
            Data::Double(f64::INFINITY),
        ])
        .unwrap();
    builder
        .push_row(&[
            Data::Int64(i64::MAX),
            Data::UInt64(0),
            Data::Double(f64::NEG_INFINITY),
        ])
        .unwrap();
    builder.finish().unwrap()
}

#[test]
fn test_extreme_primitives_roundtrip_and_compare() {
    let slice = extreme_slice();
    assert_eq!(slice.value_at(0, 0), Data::Int64(i64::MIN));
    assert_eq!(slice.value_at(0, 1), Data::UInt64(u64::MAX));
    assert_eq!(slice.value_at(0, 2), Data::Double(f64::INFINITY));
    // i64::MIN compares below u64::MAX under cross-domain promotion.
    assert_eq!(
        evaluate_predicate(
            DataView::Int64(i64::MIN),
            RelOp::Lt,
            DataView::UInt64(u64::MAX),
            None
        ),
        Some(true)
    );
    assert_eq!(
        evaluate_predicate(
            DataView::Double(f64::NEG_INFINITY),
            RelOp::Lt,
            DataView::Double(f64::INFINITY),
            None
        ),
        Some(true)
    );
}

#[test]
fn test_extreme_primitives_filter_through_pipeline() {
    let pipeline = Pipeline::from_operators(vec![
        Box::new(EventsSource::new(vec![extreme_slice()])),
        Box::new(
            Where::new(Expr::predicate(
                Expr::field("u"),
                RelOp::Eq,
                Expr::literal(u64::MAX),
            ))
            .unwrap(),
        ),
    ])
    .unwrap();
    let collected = Executor::default().collect(pipeline).unwrap();
    let total: usize = collected.iter().map(TableSlice::rows).sum();
    assert_eq!(total, 1);
}

#[test]
fn test_regex_on_empty_input() {
    let anchors = Pattern::new("^$").compile().unwrap();
    let one_plus = Pattern::new(".+").compile().unwrap();
    assert_eq!(
        evaluate_predicate(
            DataView::String(""),
            RelOp::RegexMatch,
            DataView::Null,
            Some(&anchors)
        ),
        Some(true)
    );
    assert_eq!(
        evaluate_predicate(
            DataView::String(""),
            RelOp::RegexMatch,
            DataView::Null,
            Some(&one_plus)
        ),
        Some(false)
    );
}

#[test]
fn test_subnet_containment_across_families() {
    let ip = Ip::parse("192.168.0.5").unwrap();
    let net = Subnet::parse("192.168.0.0/24").unwrap();
    assert_eq!(
        evaluate_predicate(DataView::Ip(ip), RelOp::In, DataView::Subnet(net), None),
        Some(true)
    );
    // A v6 address outside the mapped range does not match.
    let v6 = Ip::parse("2001:db8::5").unwrap();
    assert_eq!(
        evaluate_predicate(DataView::Ip(v6), RelOp::In, DataView::Subnet(net), None),
        Some(false)
    );
}

#[test]
fn test_yaml_roundtrip_representable_values() {
    let documents = [
        "num: 42\nneg: -7\nratio: 0.25\n",
        "nested:\n  list:\n    - a\n    - 10.0.0.0/8\n    - 2024-05-01T00:00:00Z\n",
        "empty: null\nflag: false\nwindow: 250ms\n",
    ];
    for doc in documents {
        let data = from_yaml_str(doc).unwrap();
        let printed = to_yaml_str(&data).unwrap();
        let reparsed = from_yaml_str(&printed).unwrap();
        assert_eq!(data, reparsed, "document:\n{doc}");
    }
}

#[test]
fn test_indentation_stripping_laws() {
    let samples = [
        "  a\n    b\n  c\n",
        "\t\tx\n\t\ty\n",
        "no indent\n  some indent\n",
        "",
        "only one line",
    ];
    for code in samples {
        let once = strip_leading_indentation(code);
        let twice = strip_leading_indentation(&once);
        assert_eq!(once, twice, "idempotence broke for {code:?}");
    }
    // No common leading whitespace: a no-op.
    let mixed = "a\n  b\n";
    assert_eq!(strip_leading_indentation(mixed), mixed);
}

#[test]
fn test_single_row_all_null_column_through_aggregations() {
    use sentra::aggregation::AggregationRegistry;
    use sentra::diag::NullSink;
    use sentra::expr::Series;
    use sentra::slice::builder::build_array;

    let null_series = Series {
        array: build_array(&Type::null(), &[Data::Null], 1).unwrap(),
        ty: Type::null(),
    };
    let registry = AggregationRegistry::with_builtins();
    // `max` declares null contribution: it goes to nulled and stays null.
    let mut max = registry.make("max").unwrap();
    max.update(&null_series, &NullSink);
    assert_eq!(max.get(), Data::Null);
    // `any` does not: it remains none and yields its default.
    let mut any = registry.make("any").unwrap();
    any.update(&null_series, &NullSink);
    assert_eq!(any.get(), Data::Bool(false));
}
