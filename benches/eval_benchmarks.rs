//! Evaluation performance benchmarks: filter masks, projection
//! arithmetic, and partition evaluation.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use sentra::diag::NullSink;
use sentra::expr::{eval_filter_mask, normalize, tailor, ArithOp, EvalSession, Expr, RelOp};
use sentra::partition::{evaluate, PartitionHandle, PartitionSynopsis, ValueIndexer};
use sentra::{Data, Field, SliceBuilder, TableSlice, Type};

fn make_slice(rows: usize) -> TableSlice {
    let schema = Type::named(
        "bench.events",
        Type::record(vec![
            Field::new("x", Type::int64()),
            Field::new("y", Type::int64()),
        ])
        .unwrap(),
    );
    let mut builder = SliceBuilder::new(schema).unwrap();
    for i in 0..rows {
        builder
            .push_row(&[Data::Int64(i as i64), Data::Int64((i * 7 % 101) as i64)])
            .unwrap();
    }
    builder.finish().unwrap()
}

fn bench_filter_mask(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_mask");
    for rows in [1_000usize, 10_000, 100_000] {
        let slice = make_slice(rows);
        let expr = tailor(
            &Expr::predicate(Expr::field("y"), RelOp::Lt, Expr::literal(50i64)),
            slice.schema(),
        );
        let session = EvalSession::new();
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| eval_filter_mask(&expr, &slice, &session, &NullSink));
        });
    }
    group.finish();
}

fn bench_projection_arithmetic(c: &mut Criterion) {
    let slice = make_slice(10_000);
    let expr = tailor(
        &Expr::Arith {
            op: ArithOp::Add,
            lhs: Box::new(Expr::field("x")),
            rhs: Box::new(Expr::field("y")),
        },
        slice.schema(),
    );
    let session = EvalSession::new();
    c.bench_function("projection_add_10k", |b| {
        b.iter(|| sentra::expr::eval(&expr, &slice, &session, &NullSink));
    });
}

fn bench_partition_evaluation(c: &mut Criterion) {
    let schema = Type::named(
        "bench.part",
        Type::record(vec![Field::new("port", Type::uint64())]).unwrap(),
    );
    let values: Vec<Data> = (0..100_000u64).map(|i| Data::UInt64(i % 65_536)).collect();
    let partition = PartitionHandle::new(schema.clone(), PartitionSynopsis::new())
        .add_schema("bench.part", &schema, (0..100_000).collect())
        .add_indexer("port", Arc::new(ValueIndexer::new(0, values)));
    let expr = normalize(Expr::or(vec![
        Expr::predicate(Expr::field("port"), RelOp::Eq, Expr::literal(443u64)),
        Expr::predicate(Expr::field("port"), RelOp::Lt, Expr::literal(1024u64)),
    ]));
    c.bench_function("partition_evaluate_100k", |b| {
        b.iter(|| evaluate(&expr, &partition, &NullSink));
    });
}

criterion_group!(
    benches,
    bench_filter_mask,
    bench_projection_arithmetic,
    bench_partition_evaluation
);
criterion_main!(benches);
