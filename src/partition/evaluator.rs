//! The partition evaluator: candidate pruning, per-column indexer
//! dispatch, and result aggregation.
//!
//! Evaluation proceeds in four steps: *tailor* the expression to the
//! partition schema, *resolve* each predicate to a curried predicate plus
//! an evaluator (indexer, synopsis, or type-ids walk), *evaluate* the
//! predicates concurrently, and *compose* the row-id sets through the
//! boolean operator tree (`and` → intersection, `or` → union, `not x` →
//! all-rows ⊕ `x`).
//!
//! Partial failure widens, never narrows: a failing indexer contributes
//! the empty set with a warning, a `maybe` synopsis outcome falls through
//! to the indexer, and a predicate that cannot be resolved at all falls
//! back to the full partition row-id set so a downstream filter can prune
//! exactly.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use rayon::prelude::*;
use roaring::RoaringBitmap;

use crate::data::Data;
use crate::diag::{Diagnostic, DiagnosticSink};
use crate::expr::{evaluate_predicate, tailor, Expr, MetaExtractor, RelOp};
use crate::operator::{EventStream, ExecCtrl, Poll};
use crate::partition::{CurriedPredicate, PartitionHandle, Store};
use crate::slice::TableSlice;

/// What a resolved predicate evaluates against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PredTarget {
    /// A data extractor, keyed by leaf column name.
    Column(String),
    /// The `#schema` meta extractor.
    Schema,
    /// The `#schema_id` meta extractor.
    SchemaId,
    /// The `#import_time` meta extractor.
    ImportTime,
    /// The `#internal` meta extractor.
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PredKey {
    target: PredTarget,
    predicate: CurriedPredicate,
}

impl std::fmt::Display for PredKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = match &self.target {
            PredTarget::Column(key) => key.as_str(),
            PredTarget::Schema => "#schema",
            PredTarget::SchemaId => "#schema_id",
            PredTarget::ImportTime => "#import_time",
            PredTarget::Internal => "#internal",
        };
        write!(f, "{target} {}", self.predicate)
    }
}

/// The boolean skeleton of the tailored expression, with predicates
/// replaced by dedup keys.
enum Node {
    Const(bool),
    Pred(PredKey),
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
}

/// Evaluates a normalised, validated expression against a partition,
/// returning the matching row-id set.
pub fn evaluate(
    expr: &Expr,
    partition: &PartitionHandle,
    diag: &dyn DiagnosticSink,
) -> RoaringBitmap {
    let tailored = tailor(expr, partition.schema());
    if tailored.is_false_literal() {
        return RoaringBitmap::new();
    }
    // Resolve; an unresolvable predicate widens to the full partition.
    let node = match resolve(&tailored, partition) {
        Some(node) => node,
        None => {
            tracing::debug!(
                expr = %expr,
                "expression not fully indexable, falling back to a full scan"
            );
            return partition.all_rows().clone();
        }
    };
    // Deduplicate identical predicates across the tree, then dispatch
    // concurrently.
    let mut unique: Vec<PredKey> = Vec::new();
    collect_predicates(&node, &mut unique);
    unique.sort_by_key(|k| format!("{k}"));
    unique.dedup();
    let hits: HashMap<PredKey, RoaringBitmap> = unique
        .into_par_iter()
        .map(|key| {
            let hits = evaluate_predicate_key(&key, partition, diag);
            (key, hits)
        })
        .collect();
    let mut result = compose(&node, &hits, partition.all_rows());
    // The result never exceeds the partition's rows.
    result &= partition.all_rows();
    result
}

fn resolve(expr: &Expr, partition: &PartitionHandle) -> Option<Node> {
    match expr {
        Expr::Literal(Data::Bool(b)) => Some(Node::Const(*b)),
        Expr::Literal(Data::Null) => Some(Node::Const(false)),
        Expr::And(exprs) => Some(Node::And(
            exprs
                .iter()
                .map(|e| resolve(e, partition))
                .collect::<Option<Vec<_>>>()?,
        )),
        Expr::Or(exprs) => Some(Node::Or(
            exprs
                .iter()
                .map(|e| resolve(e, partition))
                .collect::<Option<Vec<_>>>()?,
        )),
        Expr::Not(inner) => Some(Node::Not(Box::new(resolve(inner, partition)?))),
        Expr::Predicate { op, lhs, rhs } => {
            // Indexers consume curried predicates; the literal must be on
            // the right.
            let rhs = match rhs.as_ref() {
                Expr::Literal(value) => value.clone(),
                _ => return None,
            };
            let target = match lhs.as_ref() {
                Expr::Leaf(leaf) => {
                    let key = partition
                        .schema()
                        .leaves()
                        .nth(leaf.index)
                        .map(|l| l.key().to_string())?;
                    if partition.indexer(&key).is_none() {
                        // No index on this column: scan fallback.
                        return None;
                    }
                    PredTarget::Column(key)
                }
                Expr::Meta(MetaExtractor::Schema) => PredTarget::Schema,
                Expr::Meta(MetaExtractor::SchemaId) => PredTarget::SchemaId,
                Expr::Meta(MetaExtractor::ImportTime) => PredTarget::ImportTime,
                Expr::Meta(MetaExtractor::Internal) => PredTarget::Internal,
                Expr::Literal(value) => {
                    // A constant predicate needs no index.
                    let regex = compile_rhs_regex(*op, &rhs);
                    let result =
                        evaluate_predicate(value.as_view(), *op, rhs.as_view(), regex.as_ref());
                    return Some(Node::Const(result == Some(true)));
                }
                _ => return None,
            };
            Some(Node::Pred(PredKey {
                target,
                predicate: CurriedPredicate::new(*op, rhs),
            }))
        }
        _ => None,
    }
}

fn compile_rhs_regex(op: RelOp, rhs: &Data) -> Option<regex::Regex> {
    if !matches!(op, RelOp::RegexMatch | RelOp::NotRegexMatch) {
        return None;
    }
    match rhs {
        Data::Pattern(pattern) => pattern.compile().ok(),
        Data::String(source) => regex::Regex::new(source).ok(),
        _ => None,
    }
}

fn collect_predicates(node: &Node, out: &mut Vec<PredKey>) {
    match node {
        Node::Const(_) => {}
        Node::Pred(key) => out.push(key.clone()),
        Node::And(children) | Node::Or(children) => {
            for child in children {
                collect_predicates(child, out);
            }
        }
        Node::Not(inner) => collect_predicates(inner, out),
    }
}

fn evaluate_predicate_key(
    key: &PredKey,
    partition: &PartitionHandle,
    diag: &dyn DiagnosticSink,
) -> RoaringBitmap {
    let predicate = &key.predicate;
    match &key.target {
        PredTarget::Column(column) => {
            // Candidate pruning: a definitely-no synopsis outcome skips
            // the indexer; everything else widens through to it.
            if let Some(synopsis) = partition.synopsis().column(column) {
                if synopsis.lookup(predicate.op, &predicate.rhs.as_view()) == Some(false) {
                    return RoaringBitmap::new();
                }
            }
            let indexer = partition
                .indexer(column)
                .expect("resolution checked the indexer exists");
            match indexer.lookup(predicate) {
                Ok(hits) => hits,
                Err(error) => {
                    Diagnostic::warning(format!(
                        "indexer for predicate `{key}` failed: {error}"
                    ))
                    .emit(diag);
                    RoaringBitmap::new()
                }
            }
        }
        PredTarget::Schema => {
            let mut hits = RoaringBitmap::new();
            let regex = compile_rhs_regex(predicate.op, &predicate.rhs);
            for (name, schema) in partition.schemas() {
                let name_view = crate::data::DataView::String(name);
                if evaluate_predicate(
                    name_view,
                    predicate.op,
                    predicate.rhs.as_view(),
                    regex.as_ref(),
                ) == Some(true)
                {
                    hits |= &schema.ids;
                }
            }
            hits
        }
        PredTarget::SchemaId => match predicate.op {
            RelOp::Eq | RelOp::Ne => {
                let mut hits = RoaringBitmap::new();
                for schema in partition.schemas().values() {
                    let fingerprint = format!("{:016x}", schema.fingerprint);
                    let view = crate::data::DataView::String(&fingerprint);
                    if evaluate_predicate(view, predicate.op, predicate.rhs.as_view(), None)
                        == Some(true)
                    {
                        hits |= &schema.ids;
                    }
                }
                hits
            }
            // Inequalities over fingerprints widen to all rows.
            _ => partition.all_rows().clone(),
        },
        PredTarget::ImportTime => match partition.synopsis().import_time_synopsis() {
            Some(synopsis) => {
                use crate::partition::Synopsis as _;
                match synopsis.lookup(predicate.op, &predicate.rhs.as_view()) {
                    // definitely-no skips; maybe and definitely-yes take
                    // every row.
                    Some(false) => RoaringBitmap::new(),
                    _ => partition.all_rows().clone(),
                }
            }
            None => partition.all_rows().clone(),
        },
        PredTarget::Internal => {
            let internal = crate::data::DataView::Bool(partition.synopsis().internal);
            if evaluate_predicate(internal, predicate.op, predicate.rhs.as_view(), None)
                == Some(true)
            {
                partition.all_rows().clone()
            } else {
                RoaringBitmap::new()
            }
        }
    }
}

fn compose(
    node: &Node,
    hits: &HashMap<PredKey, RoaringBitmap>,
    all_rows: &RoaringBitmap,
) -> RoaringBitmap {
    match node {
        Node::Const(true) => all_rows.clone(),
        Node::Const(false) => RoaringBitmap::new(),
        Node::Pred(key) => {
            let mut result = hits.get(key).cloned().unwrap_or_default();
            result &= all_rows;
            result
        }
        Node::And(children) => {
            let mut iter = children.iter();
            let mut result = match iter.next() {
                Some(child) => compose(child, hits, all_rows),
                None => return all_rows.clone(),
            };
            for child in iter {
                result &= compose(child, hits, all_rows);
                if result.is_empty() {
                    break;
                }
            }
            result
        }
        Node::Or(children) => {
            let mut result = RoaringBitmap::new();
            for child in children {
                result |= compose(child, hits, all_rows);
            }
            result
        }
        Node::Not(inner) => all_rows.clone() ^ compose(inner, hits, all_rows),
    }
}

/// A streaming query over one partition: evaluates the expression, then
/// materialises the final row-id set through the store, batch by batch.
///
/// Cancellation propagates: once the client cancels, no further batches
/// are fetched or emitted.
pub struct PartitionQuery {
    expr: Expr,
    partition: Arc<PartitionHandle>,
    store: Arc<dyn Store>,
    limit: Option<u64>,
    ctrl: ExecCtrl,
    batches: Option<VecDeque<TableSlice>>,
}

impl PartitionQuery {
    pub fn new(
        expr: Expr,
        partition: Arc<PartitionHandle>,
        store: Arc<dyn Store>,
        limit: Option<u64>,
        ctrl: ExecCtrl,
    ) -> Self {
        PartitionQuery {
            expr,
            partition,
            store,
            limit,
            ctrl,
            batches: None,
        }
    }
}

impl EventStream for PartitionQuery {
    fn poll_next(&mut self) -> Poll<TableSlice> {
        if self.ctrl.is_cancelled() {
            return Poll::Done;
        }
        let batches = match &mut self.batches {
            Some(batches) => batches,
            None => {
                let hits = evaluate(&self.expr, &self.partition, self.ctrl.diagnostics());
                tracing::debug!(hits = hits.len(), "partition evaluation finished");
                let fetched = self.store.fetch(&hits, self.limit);
                self.batches.insert(fetched.into())
            }
        };
        match batches.pop_front() {
            Some(slice) => Poll::Output(slice),
            None => Poll::Done,
        }
    }
}
