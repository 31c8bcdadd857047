//! Built-in pipeline operators.
//!
//! Transformations: `where`, `select`, `drop`, `put`, `extend`, `head`,
//! `taste`, `throttle`, `pass`, `summarize`, and the internal `batch`.
//! Sinks: `discard`. Sources: in-memory event and byte sources for
//! embedding and tests; concrete I/O connectors are external
//! collaborators.

mod batch;
mod discard;
mod head;
mod pass;
mod put;
mod select;
mod source;
mod summarize;
mod throttle;
mod where_;

pub use batch::Batch;
pub use discard::Discard;
pub use head::{Head, Taste};
pub use pass::Pass;
pub use put::{Put, PutMode};
pub use select::{DropFields, Select};
pub use source::{BytesSource, EventsSource};
pub use summarize::{AggregationSpec, Summarize};
pub use throttle::Throttle;
pub use where_::Where;

use std::sync::Arc;

use arrow::array::ArrayRef;

use crate::data::Data;
use crate::diag::DiagnosticSink;
use crate::expr::{eval, EvalSession, Expr};
use crate::slice::builder::build_array;
use crate::slice::TableSlice;
use crate::types::Type;

/// Evaluates an expression to a single typed column over a slice.
///
/// A heterogeneous multi-series result collapses into one column typed
/// after its first non-null run; rows of other types null out.
pub(crate) fn eval_to_column(
    expr: &Expr,
    slice: &TableSlice,
    session: &EvalSession,
    diag: &dyn DiagnosticSink,
) -> (Type, ArrayRef) {
    let mut series = eval(expr, slice, session, diag);
    if series.len() == 1 {
        let s = series.remove(0);
        return (s.ty, s.array);
    }
    let ty = series
        .iter()
        .find(|s| s.ty.kind() != crate::types::Kind::Null)
        .map(|s| s.ty.clone())
        .unwrap_or_else(Type::null);
    let mut values: Vec<Data> = Vec::with_capacity(slice.rows());
    for s in &series {
        for row in 0..s.len() {
            let value = crate::slice::materialize_at(&s.ty, s.array.as_ref(), row);
            if value.is_null() || s.ty == ty {
                values.push(value);
            } else {
                values.push(Data::Null);
            }
        }
    }
    let len = values.len();
    match build_array(&ty, &values, len) {
        Ok(array) => (ty, array),
        Err(_) => (
            Type::null(),
            Arc::new(arrow::array::NullArray::new(len)) as ArrayRef,
        ),
    }
}
