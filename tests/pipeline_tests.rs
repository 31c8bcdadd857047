//! End-to-end pipeline execution tests.
//!
//! Drives composed pipelines through the executor and checks the concrete
//! scenarios: filtering with projection, field assignment, cancellation
//! timing, and throttle pacing.

use std::sync::Arc;
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use sentra::chunk::Chunk;
use sentra::data::Duration;
use sentra::diag::Severity;
use sentra::expr::{ArithOp, Expr, RelOp};
use sentra::operator::{ByteStream, OperatorInput, OperatorOutput, Poll};
use sentra::operators::{
    Discard, EventsSource, Head, Put, PutMode, Select, Summarize, Throttle, Where,
};
use sentra::operators::AggregationSpec;
use sentra::pipeline::Pipeline;
use sentra::runtime::Executor;
use sentra::slice::TableSlice;
use sentra::{
    Data, DiagnosticCollector, DiagnosticSink, ExecCtrl, Field, Operator, SliceBuilder, Type,
};

fn xy_slice(rows: &[(i64, &str)]) -> TableSlice {
    let schema = Type::named(
        "R",
        Type::record(vec![
            Field::new("x", Type::int64()),
            Field::new("y", Type::string()),
        ])
        .unwrap(),
    );
    let mut builder = SliceBuilder::new(schema).unwrap();
    for (x, y) in rows {
        builder
            .push_row(&[Data::Int64(*x), Data::String(y.to_string())])
            .unwrap();
    }
    builder.finish().unwrap()
}

#[test]
fn test_filter_then_select() {
    // where x >= 2 | select y over [(1,"a"), (2,"b"), (3,"c")].
    let pipeline = Pipeline::from_operators(vec![
        Box::new(EventsSource::new(vec![xy_slice(&[
            (1, "a"),
            (2, "b"),
            (3, "c"),
        ])])),
        Box::new(
            Where::new(Expr::predicate(
                Expr::field("x"),
                RelOp::Ge,
                Expr::literal(2i64),
            ))
            .unwrap(),
        ),
        Box::new(Select::new(vec!["y".into()])),
    ])
    .unwrap();
    let collected = Executor::default().collect(pipeline).unwrap();
    assert_eq!(collected.len(), 1);
    let out = &collected[0];
    assert_eq!(out.rows(), 2);
    assert_eq!(out.columns(), 1);
    let keys: Vec<String> = out.schema().leaves().map(|l| l.key().to_string()).collect();
    assert_eq!(keys, ["y"]);
    assert_eq!(out.value_at(0, 0), Data::String("b".into()));
    assert_eq!(out.value_at(1, 0), Data::String("c".into()));
}

#[test]
fn test_put_projects_to_sum() {
    // {a: 1, b: 2} | put sum = a + b => one row {sum: 3}.
    let schema = Type::named(
        "R",
        Type::record(vec![
            Field::new("a", Type::int64()),
            Field::new("b", Type::int64()),
        ])
        .unwrap(),
    );
    let mut builder = SliceBuilder::new(schema).unwrap();
    builder.push_row(&[Data::Int64(1), Data::Int64(2)]).unwrap();
    let pipeline = Pipeline::from_operators(vec![
        Box::new(EventsSource::new(vec![builder.finish().unwrap()])),
        Box::new(Put::new(
            PutMode::Put,
            vec![(
                "sum".to_string(),
                Some(Expr::Arith {
                    op: ArithOp::Add,
                    lhs: Box::new(Expr::field("a")),
                    rhs: Box::new(Expr::field("b")),
                }),
            )],
        )),
    ])
    .unwrap();
    let collected = Executor::default().collect(pipeline).unwrap();
    assert_eq!(collected.len(), 1);
    let out = &collected[0];
    assert_eq!(out.rows(), 1);
    assert_eq!(out.columns(), 1);
    assert_eq!(out.value_at(0, 0), Data::Int64(3));
}

#[test]
fn test_optimized_pipeline_gives_same_result() {
    let build = || {
        Pipeline::from_operators(vec![
            Box::new(EventsSource::new(vec![xy_slice(&[
                (1, "a"),
                (2, "b"),
                (3, "c"),
                (4, "d"),
            ])])),
            Box::new(sentra::operators::Pass::new()),
            Box::new(
                Where::new(Expr::predicate(
                    Expr::field("x"),
                    RelOp::Gt,
                    Expr::literal(1i64),
                ))
                .unwrap(),
            ),
            Box::new(Head::new(2)),
        ])
        .unwrap()
    };
    let plain = Executor::default().collect(build()).unwrap();
    let optimized = Executor::default().collect(build().optimize()).unwrap();
    let rows = |slices: &[TableSlice]| -> Vec<Data> {
        slices
            .iter()
            .flat_map(|s| (0..s.rows()).map(|r| s.value_at(r, 0)).collect::<Vec<_>>())
            .collect()
    };
    assert_eq!(rows(&plain), rows(&optimized));
    assert_eq!(rows(&plain), vec![Data::Int64(2), Data::Int64(3)]);
}

#[test]
fn test_summarize_pipeline() {
    let pipeline = Pipeline::from_operators(vec![
        Box::new(EventsSource::new(vec![xy_slice(&[
            (10, "tcp"),
            (5, "udp"),
            (20, "tcp"),
        ])])),
        Box::new(Summarize::new(
            vec![AggregationSpec::new("total", "sum", Expr::field("x"))],
            vec!["y".into()],
        )),
    ])
    .unwrap();
    let collected = Executor::default().collect(pipeline).unwrap();
    assert_eq!(collected.len(), 1);
    let out = &collected[0];
    assert_eq!(out.rows(), 2);
    assert_eq!(out.value_at(0, 0), Data::String("tcp".into()));
    assert_eq!(out.value_at(0, 1), Data::Int64(30));
}

#[test]
fn test_empty_input_produces_no_events() {
    let pipeline = Pipeline::from_operators(vec![
        Box::new(EventsSource::new(vec![xy_slice(&[])])),
        Box::new(
            Where::new(Expr::predicate(
                Expr::field("x"),
                RelOp::Eq,
                Expr::literal(1i64),
            ))
            .unwrap(),
        ),
    ])
    .unwrap();
    let collected = Executor::default().collect(pipeline).unwrap();
    let total: usize = collected.iter().map(TableSlice::rows).sum();
    assert_eq!(total, 0);
}

#[test]
fn test_cancellation_stops_within_grace() {
    // slow_source | sink, cancelled 250ms after start.
    let batches: Vec<TableSlice> = (0..200).map(|i| xy_slice(&[(i, "e")])).collect();
    let collector = DiagnosticCollector::new();
    let pipeline = Pipeline::from_operators(vec![
        Box::new(EventsSource::new(batches).with_delay(Duration::from_millis(25))),
        Box::new(Discard::new()),
    ])
    .unwrap();
    let executor =
        Executor::default().with_diagnostics(collector.clone() as Arc<dyn DiagnosticSink>);
    let run = executor.start(pipeline).unwrap();
    let ctrl = run.ctrl();
    let canceller = thread::spawn(move || {
        thread::sleep(StdDuration::from_millis(250));
        ctrl.cancel();
    });
    let start = Instant::now();
    let outcome = run.run();
    canceller.join().unwrap();
    let elapsed = start.elapsed();
    assert!(outcome.is_cancelled(), "got {outcome:?}");
    // Within the default 5s cancel grace, with generous headroom.
    assert!(elapsed < StdDuration::from_secs(5), "took {elapsed:?}");
    // The completion resolves with a cancelled note, not an error.
    let diags = collector.collected();
    assert!(diags
        .iter()
        .any(|d| d.severity == Severity::Note && d.message.contains("cancelled")));
    assert!(!diags.iter().any(|d| d.severity == Severity::Error));
}

#[test]
fn test_throttle_paces_bytes() {
    // 3 KiB through `throttle 1KiB within 1s`: cumulative bytes 3 KiB,
    // wall-clock at least 2s.
    let throttle = Throttle::new(1024, Duration::from_secs(1)).unwrap();
    let source_chunks = vec![Chunk::new(vec![0u8; 3072])];
    let ctrl = ExecCtrl::detached();
    struct Feed(Vec<Chunk>);
    impl ByteStream for Feed {
        fn poll_next(&mut self) -> Poll<Chunk> {
            if self.0.is_empty() {
                Poll::Done
            } else {
                Poll::Output(self.0.remove(0))
            }
        }
    }
    let output = throttle
        .instantiate(OperatorInput::Bytes(Box::new(Feed(source_chunks))), ctrl.clone())
        .unwrap();
    let mut stream = match output {
        OperatorOutput::Bytes(stream) => stream,
        _ => panic!("expected bytes output"),
    };
    let start = Instant::now();
    let mut delivered = 0usize;
    let mut emissions = Vec::new();
    loop {
        ctrl.process_wakes(Instant::now());
        match stream.poll_next() {
            Poll::Output(chunk) => {
                delivered += chunk.len();
                emissions.push((start.elapsed(), chunk.len()));
            }
            Poll::Pending => {
                // The scheduler's contract: sleep towards the wake.
                if let Some(wake) = ctrl.wake_at() {
                    let now = Instant::now();
                    if wake > now {
                        thread::sleep(wake - now);
                    }
                } else {
                    thread::sleep(StdDuration::from_millis(1));
                }
            }
            Poll::Done => break,
        }
        if start.elapsed() > StdDuration::from_secs(10) {
            panic!("throttle made no progress");
        }
    }
    assert_eq!(delivered, 3072);
    assert!(
        start.elapsed() >= StdDuration::from_secs(2),
        "finished too fast: {:?}",
        start.elapsed()
    );
    // Each window carried at most the bandwidth.
    assert!(emissions.iter().all(|(_, len)| *len <= 1024));
}
