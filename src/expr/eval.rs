//! Evaluation of expressions over table slices.
//!
//! [`eval`] produces a *multi-series*: a sequence of `(type, array)` pairs
//! whose lengths sum to the slice row count. A single series is the common
//! case; multiple series occur when an expression yields rows of different
//! types, e.g. a function over a heterogeneous column.
//!
//! The evaluator never fails: type mismatches emit a `warning` diagnostic
//! (once per expression per batch) and produce null for the offending rows.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray};
use parking_lot::Mutex;
use regex::Regex;

use crate::data::{Data, Duration, Time};
use crate::diag::{Diagnostic, DiagnosticSink};
use crate::expr::{evaluate_predicate, ArithOp, Expr, MetaExtractor, RelOp};
use crate::slice::builder::build_array;
use crate::slice::TableSlice;
use crate::types::{Field, Kind, Type};

/// One evaluated column: a type and its Arrow array.
#[derive(Debug, Clone)]
pub struct Series {
    pub ty: Type,
    pub array: ArrayRef,
}

impl Series {
    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }
}

/// A sequence of series whose lengths sum to the slice row count.
pub type MultiSeries = Vec<Series>;

/// Per-session evaluation state.
///
/// Holds the regex cache: `~` compiles its pattern once per expression and
/// reuses the compilation for every batch of the session. Lock scope: the
/// mutex guards single cache lookups/inserts only.
#[derive(Default)]
pub struct EvalSession {
    regex_cache: Mutex<HashMap<String, Option<Arc<Regex>>>>,
}

impl EvalSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled regex for `source`, or `None` if it does not compile.
    /// Compilation failures cache as well, so a bad pattern warns once
    /// rather than recompiling per batch.
    fn compile(&self, source: &str) -> Option<Arc<Regex>> {
        let mut cache = self.regex_cache.lock();
        cache
            .entry(source.to_string())
            .or_insert_with(|| Regex::new(source).ok().map(Arc::new))
            .clone()
    }
}

/// Warn-once bookkeeping for a single batch.
struct BatchWarnings {
    emitted: HashSet<String>,
}

impl BatchWarnings {
    fn new() -> Self {
        BatchWarnings {
            emitted: HashSet::new(),
        }
    }

    fn warn(&mut self, diag: &dyn DiagnosticSink, expr: &Expr, message: String) {
        if self.emitted.insert(message.clone()) {
            Diagnostic::warning(message)
                .hint(format!("while evaluating `{expr}`"))
                .emit(diag);
        }
    }
}

/// Evaluates `expr` over `slice`, yielding a multi-series.
pub fn eval(
    expr: &Expr,
    slice: &TableSlice,
    session: &EvalSession,
    diag: &dyn DiagnosticSink,
) -> MultiSeries {
    let mut warnings = BatchWarnings::new();
    let values = eval_rows(expr, slice, session, diag, &mut warnings);
    split_series(values)
}

/// Evaluates `expr` over `slice` as a boolean selection mask.
///
/// Null and non-boolean results deselect their rows; non-boolean results
/// additionally warn once per batch.
pub fn eval_filter_mask(
    expr: &Expr,
    slice: &TableSlice,
    session: &EvalSession,
    diag: &dyn DiagnosticSink,
) -> BooleanArray {
    let mut warnings = BatchWarnings::new();
    let values = eval_rows(expr, slice, session, diag, &mut warnings);
    let mask: Vec<bool> = values
        .iter()
        .map(|v| match v {
            Data::Bool(b) => *b,
            Data::Null => false,
            other => {
                warnings.warn(
                    diag,
                    expr,
                    format!("expected type `bool`, got `{}`", other.kind()),
                );
                false
            }
        })
        .collect();
    BooleanArray::from(mask)
}

// -- row-wise evaluation -----------------------------------------------------

fn eval_rows(
    expr: &Expr,
    slice: &TableSlice,
    session: &EvalSession,
    diag: &dyn DiagnosticSink,
    warnings: &mut BatchWarnings,
) -> Vec<Data> {
    let rows = slice.rows();
    match expr {
        Expr::Literal(value) => vec![value.clone(); rows],
        Expr::Leaf(leaf) => (0..rows).map(|row| slice.value_at(row, leaf.index)).collect(),
        Expr::Field(path) => match slice.schema().resolve(path) {
            Some((_, index)) => (0..rows).map(|row| slice.value_at(row, index)).collect(),
            None => {
                warnings.warn(diag, expr, format!("field `{path}` does not exist"));
                vec![Data::Null; rows]
            }
        },
        Expr::Meta(meta) => {
            let value = match meta {
                MetaExtractor::Schema => Data::String(slice.schema_name().to_string()),
                MetaExtractor::SchemaId => Data::String(format!("{:016x}", slice.schema_id())),
                MetaExtractor::ImportTime => match slice.import_time() {
                    Some(t) => Data::Time(t),
                    None => Data::Null,
                },
                MetaExtractor::Internal => {
                    Data::Bool(slice.schema().has_attribute("internal"))
                }
            };
            vec![value; rows]
        }
        Expr::Neg(inner) => {
            let values = eval_rows(inner, slice, session, diag, warnings);
            values
                .into_iter()
                .map(|v| match v {
                    Data::Null => Data::Null,
                    Data::Int64(i) => match i.checked_neg() {
                        Some(n) => Data::Int64(n),
                        None => {
                            warnings.warn(diag, expr, "negation overflows".to_string());
                            Data::Null
                        }
                    },
                    Data::Double(d) => Data::Double(-d),
                    Data::Duration(d) => Data::Duration(Duration(d.as_nanos().wrapping_neg())),
                    other => {
                        warnings.warn(
                            diag,
                            expr,
                            format!("cannot negate a value of type `{}`", other.kind()),
                        );
                        Data::Null
                    }
                })
                .collect()
        }
        Expr::Arith { op, lhs, rhs } => {
            let lhs_values = eval_rows(lhs, slice, session, diag, warnings);
            let rhs_values = eval_rows(rhs, slice, session, diag, warnings);
            lhs_values
                .into_iter()
                .zip(rhs_values)
                .map(|(a, b)| match scalar_arith(*op, &a, &b) {
                    Ok(v) => v,
                    Err(message) => {
                        warnings.warn(diag, expr, message);
                        Data::Null
                    }
                })
                .collect()
        }
        Expr::Predicate { op, lhs, rhs } => {
            let is_regex_op = matches!(op, RelOp::RegexMatch | RelOp::NotRegexMatch);
            let regex = predicate_regex(*op, rhs, session);
            if is_regex_op && regex.is_none() && matches!(rhs.as_ref(), Expr::Literal(_)) {
                warnings.warn(diag, expr, "invalid regular expression".to_string());
                return vec![Data::Null; rows];
            }
            let lhs_values = eval_rows(lhs, slice, session, diag, warnings);
            let rhs_values = eval_rows(rhs, slice, session, diag, warnings);
            lhs_values
                .into_iter()
                .zip(rhs_values)
                .map(|(a, b)| {
                    // The pattern compiles once per expression; a non-literal
                    // right-hand side falls back to the session cache per row.
                    let row_regex = match (&regex, is_regex_op) {
                        (Some(r), _) => Some(Arc::clone(r)),
                        (None, true) => match &b {
                            Data::Pattern(p) => session.compile(p.source()),
                            Data::String(s) => session.compile(s),
                            _ => None,
                        },
                        (None, false) => None,
                    };
                    match evaluate_predicate(a.as_view(), *op, b.as_view(), row_regex.as_deref())
                    {
                        Some(result) => Data::Bool(result),
                        None => {
                            warnings.warn(
                                diag,
                                expr,
                                format!(
                                    "operator `{op}` is not applicable to `{}` and `{}`",
                                    a.kind(),
                                    b.kind()
                                ),
                            );
                            Data::Null
                        }
                    }
                })
                .collect()
        }
        Expr::And(exprs) => {
            let mut result = vec![Data::Bool(true); rows];
            for e in exprs {
                let values = eval_rows(e, slice, session, diag, warnings);
                for (acc, v) in result.iter_mut().zip(values) {
                    *acc = kleene_and(acc, &as_bool(v, e, diag, warnings));
                }
            }
            result
        }
        Expr::Or(exprs) => {
            let mut result = vec![Data::Bool(false); rows];
            for e in exprs {
                let values = eval_rows(e, slice, session, diag, warnings);
                for (acc, v) in result.iter_mut().zip(values) {
                    *acc = kleene_or(acc, &as_bool(v, e, diag, warnings));
                }
            }
            result
        }
        Expr::Not(inner) => {
            let values = eval_rows(inner, slice, session, diag, warnings);
            values
                .into_iter()
                .map(|v| match as_bool(v, inner, diag, warnings) {
                    Data::Bool(b) => Data::Bool(!b),
                    _ => Data::Null,
                })
                .collect()
        }
        Expr::Call(call) => eval_call(call, expr, slice, session, diag, warnings),
    }
}

fn predicate_regex(op: RelOp, rhs: &Expr, session: &EvalSession) -> Option<Arc<Regex>> {
    if !matches!(op, RelOp::RegexMatch | RelOp::NotRegexMatch) {
        return None;
    }
    match rhs {
        Expr::Literal(Data::Pattern(pattern)) => session.compile(pattern.source()),
        Expr::Literal(Data::String(source)) => session.compile(source),
        _ => None,
    }
}

fn as_bool(
    value: Data,
    expr: &Expr,
    diag: &dyn DiagnosticSink,
    warnings: &mut BatchWarnings,
) -> Data {
    match value {
        Data::Bool(_) | Data::Null => value,
        other => {
            warnings.warn(
                diag,
                expr,
                format!("expected type `bool`, got `{}`", other.kind()),
            );
            Data::Null
        }
    }
}

fn kleene_and(lhs: &Data, rhs: &Data) -> Data {
    match (lhs, rhs) {
        (Data::Bool(false), _) | (_, Data::Bool(false)) => Data::Bool(false),
        (Data::Bool(true), Data::Bool(true)) => Data::Bool(true),
        _ => Data::Null,
    }
}

fn kleene_or(lhs: &Data, rhs: &Data) -> Data {
    match (lhs, rhs) {
        (Data::Bool(true), _) | (_, Data::Bool(true)) => Data::Bool(true),
        (Data::Bool(false), Data::Bool(false)) => Data::Bool(false),
        _ => Data::Null,
    }
}

/// Scalar arithmetic with numeric promotion.
///
/// Promotion: if either side is `double`, compute in `double`; mixed
/// signed/unsigned widens to the signed domain, warning when the value
/// does not fit. Duration and time arithmetic follow their algebra.
pub(crate) fn scalar_arith(op: ArithOp, lhs: &Data, rhs: &Data) -> Result<Data, String> {
    use Data as D;
    if lhs.is_null() || rhs.is_null() {
        return Ok(D::Null);
    }
    match (lhs, rhs) {
        // Same-kind integer arithmetic.
        (D::Int64(a), D::Int64(b)) => int_arith(op, *a, *b),
        (D::UInt64(a), D::UInt64(b)) => uint_arith(op, *a, *b),
        // Mixed signed/unsigned widens to the signed domain.
        (D::Int64(a), D::UInt64(b)) => {
            let b = i64::try_from(*b).map_err(|_| {
                format!("value {b} does not fit the signed domain")
            })?;
            int_arith(op, *a, b)
        }
        (D::UInt64(a), D::Int64(b)) => {
            let a = i64::try_from(*a).map_err(|_| {
                format!("value {a} does not fit the signed domain")
            })?;
            int_arith(op, a, *b)
        }
        // Double promotion.
        (D::Double(a), D::Double(b)) => double_arith(op, *a, *b),
        (D::Double(a), D::Int64(b)) => double_arith(op, *a, *b as f64),
        (D::Int64(a), D::Double(b)) => double_arith(op, *a as f64, *b),
        (D::Double(a), D::UInt64(b)) => double_arith(op, *a, *b as f64),
        (D::UInt64(a), D::Double(b)) => double_arith(op, *a as f64, *b),
        // Duration algebra.
        (D::Duration(a), D::Duration(b)) => match op {
            ArithOp::Add => checked_duration(a.as_nanos().checked_add(b.as_nanos())),
            ArithOp::Sub => checked_duration(a.as_nanos().checked_sub(b.as_nanos())),
            ArithOp::Div if b.as_nanos() != 0 => {
                Ok(D::Double(a.as_nanos() as f64 / b.as_nanos() as f64))
            }
            ArithOp::Div => Err("division by zero".to_string()),
            ArithOp::Mul => Err("cannot multiply two durations".to_string()),
        },
        (D::Duration(a), D::Int64(b)) => match op {
            ArithOp::Mul => checked_duration(a.as_nanos().checked_mul(*b)),
            ArithOp::Div if *b != 0 => checked_duration(Some(a.as_nanos() / b)),
            ArithOp::Div => Err("division by zero".to_string()),
            _ => Err(format!("operator `{op}` is not applicable to duration and int64")),
        },
        (D::Int64(a), D::Duration(b)) if op == ArithOp::Mul => {
            checked_duration(b.as_nanos().checked_mul(*a))
        }
        (D::Duration(a), D::Double(b)) => match op {
            ArithOp::Mul => checked_duration_f64(a.as_nanos() as f64 * b),
            ArithOp::Div if *b != 0.0 => checked_duration_f64(a.as_nanos() as f64 / b),
            ArithOp::Div => Err("division by zero".to_string()),
            _ => Err(format!("operator `{op}` is not applicable to duration and double")),
        },
        // Time algebra.
        (D::Time(a), D::Duration(b)) => match op {
            ArithOp::Add => checked_time(a.as_epoch_nanos().checked_add(b.as_nanos())),
            ArithOp::Sub => checked_time(a.as_epoch_nanos().checked_sub(b.as_nanos())),
            _ => Err(format!("operator `{op}` is not applicable to time and duration")),
        },
        (D::Duration(a), D::Time(b)) if op == ArithOp::Add => {
            checked_time(b.as_epoch_nanos().checked_add(a.as_nanos()))
        }
        (D::Time(a), D::Time(b)) if op == ArithOp::Sub => {
            checked_duration(a.as_epoch_nanos().checked_sub(b.as_epoch_nanos()))
        }
        (a, b) => Err(format!(
            "operator `{op}` is not applicable to `{}` and `{}`",
            a.kind(),
            b.kind()
        )),
    }
}

fn int_arith(op: ArithOp, a: i64, b: i64) -> Result<Data, String> {
    match op {
        ArithOp::Add => a.checked_add(b).map(Data::Int64).ok_or_else(overflow),
        ArithOp::Sub => a.checked_sub(b).map(Data::Int64).ok_or_else(overflow),
        ArithOp::Mul => a.checked_mul(b).map(Data::Int64).ok_or_else(overflow),
        ArithOp::Div => {
            if b == 0 {
                Err("division by zero".to_string())
            } else {
                Ok(Data::Int64(a / b))
            }
        }
    }
}

fn uint_arith(op: ArithOp, a: u64, b: u64) -> Result<Data, String> {
    match op {
        ArithOp::Add => a.checked_add(b).map(Data::UInt64).ok_or_else(overflow),
        ArithOp::Sub => a.checked_sub(b).map(Data::UInt64).ok_or_else(overflow),
        ArithOp::Mul => a.checked_mul(b).map(Data::UInt64).ok_or_else(overflow),
        ArithOp::Div => {
            if b == 0 {
                Err("division by zero".to_string())
            } else {
                Ok(Data::UInt64(a / b))
            }
        }
    }
}

fn double_arith(op: ArithOp, a: f64, b: f64) -> Result<Data, String> {
    match op {
        ArithOp::Add => Ok(Data::Double(a + b)),
        ArithOp::Sub => Ok(Data::Double(a - b)),
        ArithOp::Mul => Ok(Data::Double(a * b)),
        ArithOp::Div => {
            if b == 0.0 {
                Err("division by zero".to_string())
            } else {
                Ok(Data::Double(a / b))
            }
        }
    }
}

fn overflow() -> String {
    "numeric overflow".to_string()
}

fn checked_duration(nanos: Option<i64>) -> Result<Data, String> {
    nanos.map(|n| Data::Duration(Duration(n))).ok_or_else(overflow)
}

fn checked_duration_f64(nanos: f64) -> Result<Data, String> {
    if nanos.is_finite() && nanos.abs() < i64::MAX as f64 {
        Ok(Data::Duration(Duration(nanos as i64)))
    } else {
        Err(overflow())
    }
}

fn checked_time(nanos: Option<i64>) -> Result<Data, String> {
    nanos.map(|n| Data::Time(Time(n))).ok_or_else(overflow)
}

// -- function calls ----------------------------------------------------------

fn eval_call(
    call: &crate::expr::FunctionCall,
    expr: &Expr,
    slice: &TableSlice,
    session: &EvalSession,
    diag: &dyn DiagnosticSink,
    warnings: &mut BatchWarnings,
) -> Vec<Data> {
    let rows = slice.rows();
    let args: Vec<Vec<Data>> = call
        .args
        .iter()
        .map(|arg| eval_rows(arg, slice, session, diag, warnings))
        .collect();
    let apply = |f: &dyn Fn(&[&Data]) -> Result<Data, String>,
                 warnings: &mut BatchWarnings|
     -> Vec<Data> {
        (0..rows)
            .map(|row| {
                let row_args: Vec<&Data> = args.iter().map(|col| &col[row]).collect();
                match f(&row_args) {
                    Ok(v) => v,
                    Err(message) => {
                        warnings.warn(diag, expr, message);
                        Data::Null
                    }
                }
            })
            .collect()
    };
    match call.function.as_str() {
        "length" => apply(
            &|args| match args {
                [Data::String(s)] => Ok(Data::Int64(s.chars().count() as i64)),
                [Data::List(l)] => Ok(Data::Int64(l.len() as i64)),
                [Data::Blob(b)] => Ok(Data::Int64(b.len() as i64)),
                [Data::Null] => Ok(Data::Null),
                _ => Err("`length` expects a string, list or blob".to_string()),
            },
            warnings,
        ),
        "to_lower" => apply(
            &|args| match args {
                [Data::String(s)] => Ok(Data::String(s.to_lowercase())),
                [Data::Null] => Ok(Data::Null),
                _ => Err("`to_lower` expects a string".to_string()),
            },
            warnings,
        ),
        "to_upper" => apply(
            &|args| match args {
                [Data::String(s)] => Ok(Data::String(s.to_uppercase())),
                [Data::Null] => Ok(Data::Null),
                _ => Err("`to_upper` expects a string".to_string()),
            },
            warnings,
        ),
        "abs" => apply(
            &|args| match args {
                [Data::Int64(i)] => i
                    .checked_abs()
                    .map(Data::Int64)
                    .ok_or_else(|| "numeric overflow".to_string()),
                [Data::UInt64(u)] => Ok(Data::UInt64(*u)),
                [Data::Double(d)] => Ok(Data::Double(d.abs())),
                [Data::Duration(d)] => Ok(Data::Duration(Duration(d.as_nanos().abs()))),
                [Data::Null] => Ok(Data::Null),
                _ => Err("`abs` expects a numeric value".to_string()),
            },
            warnings,
        ),
        "round" => apply(
            &|args| match args {
                [Data::Double(d)] => Ok(Data::Int64(d.round() as i64)),
                [Data::Int64(i)] => Ok(Data::Int64(*i)),
                [Data::UInt64(u)] => Ok(Data::UInt64(*u)),
                [Data::Null] => Ok(Data::Null),
                _ => Err("`round` expects a numeric value".to_string()),
            },
            warnings,
        ),
        other => {
            warnings.warn(diag, expr, format!("unknown function `{other}`"));
            vec![Data::Null; rows]
        }
    }
}

// -- series assembly ---------------------------------------------------------

/// Infers the storage type of a value.
pub(crate) fn data_type_of(value: &Data) -> Type {
    match value {
        Data::Null => Type::null(),
        Data::Bool(_) => Type::bool_(),
        Data::Int64(_) => Type::int64(),
        Data::UInt64(_) => Type::uint64(),
        Data::Double(_) => Type::double(),
        Data::Duration(_) => Type::duration(),
        Data::Time(_) => Type::time(),
        Data::String(_) => Type::string(),
        Data::Blob(_) => Type::blob(),
        Data::Ip(_) => Type::ip(),
        Data::Subnet(_) => Type::subnet(),
        Data::Pattern(_) => Type::pattern(),
        Data::Enumeration(e) => Type::new(crate::types::TypeKind::Enumeration(Arc::clone(
            e.enumeration(),
        ))),
        Data::List(elems) => {
            let elem_ty = elems
                .iter()
                .find(|e| !e.is_null())
                .map(data_type_of)
                .unwrap_or_else(Type::null);
            Type::list(elem_ty)
        }
        Data::Map(entries) => {
            let (key, value) = entries
                .iter()
                .find(|(k, v)| !k.is_null() && !v.is_null())
                .map(|(k, v)| (data_type_of(k), data_type_of(v)))
                .unwrap_or_else(|| (Type::null(), Type::null()));
            Type::map(key, value)
        }
        Data::Record(fields) => Type::record(
            fields
                .iter()
                .map(|(name, value)| Field::new(name.clone(), data_type_of(value)))
                .collect(),
        )
        .unwrap_or_else(|_| Type::null()),
    }
}

/// Splits row values into maximal same-type runs and builds one series per
/// run. Nulls join whatever run is open.
fn split_series(values: Vec<Data>) -> MultiSeries {
    if values.is_empty() {
        return Vec::new();
    }
    let mut series = Vec::new();
    let mut run: Vec<Data> = Vec::new();
    let mut run_ty: Option<Type> = None;
    for value in values {
        let ty = (!value.is_null()).then(|| data_type_of(&value));
        match (&run_ty, &ty) {
            (_, None) => run.push(value),
            (None, Some(t)) => {
                run_ty = Some(t.clone());
                run.push(value);
            }
            (Some(current), Some(t)) if current == t => run.push(value),
            (Some(_), Some(t)) => {
                series.push(finish_run(std::mem::take(&mut run), run_ty.take()));
                run_ty = Some(t.clone());
                run.push(value);
            }
        }
    }
    if !run.is_empty() {
        series.push(finish_run(run, run_ty));
    }
    series
}

fn finish_run(values: Vec<Data>, ty: Option<Type>) -> Series {
    let ty = ty.unwrap_or_else(Type::null);
    let len = values.len();
    let array = build_array(&ty, &values, len).unwrap_or_else(|_| {
        build_array(&Type::null(), &vec![Data::Null; len], len).expect("null array")
    });
    Series { ty, array }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagnosticCollector;
    use crate::expr::tailor;
    use crate::slice::SliceBuilder;
    use crate::types::Field as TypeField;

    fn slice() -> TableSlice {
        let schema = Type::named(
            "sentra.test",
            Type::record(vec![
                TypeField::new("x", Type::int64()),
                TypeField::new("y", Type::string()),
                TypeField::new("d", Type::double()),
            ])
            .unwrap(),
        );
        let mut builder = SliceBuilder::new(schema).unwrap();
        builder
            .push_row(&[Data::Int64(1), Data::String("a".into()), Data::Double(0.5)])
            .unwrap();
        builder
            .push_row(&[Data::Int64(2), Data::String("b".into()), Data::Double(1.5)])
            .unwrap();
        builder
            .push_row(&[Data::Int64(3), Data::String("c".into()), Data::Null])
            .unwrap();
        builder.finish().unwrap()
    }

    fn eval_one(expr: &Expr, slice: &TableSlice) -> (Series, Vec<Diagnostic>) {
        let session = EvalSession::new();
        let diag = DiagnosticCollector::new();
        let tailored = tailor(expr, slice.schema());
        let mut series = eval(&tailored, slice, &session, diag.as_ref());
        assert_eq!(series.len(), 1, "expected a single series");
        (series.remove(0), diag.collected())
    }

    #[test]
    fn test_filter_mask() {
        let slice = slice();
        let expr = tailor(
            &Expr::predicate(Expr::field("x"), RelOp::Ge, Expr::literal(2i64)),
            slice.schema(),
        );
        let session = EvalSession::new();
        let diag = DiagnosticCollector::new();
        let mask = eval_filter_mask(&expr, &slice, &session, diag.as_ref());
        assert_eq!(mask.true_count(), 2);
        assert!(!mask.value(0));
        assert!(mask.value(1));
        assert!(mask.value(2));
        assert!(diag.collected().is_empty());
    }

    #[test]
    fn test_projection_sum() {
        let slice = slice();
        let expr = Expr::Arith {
            op: ArithOp::Add,
            lhs: Box::new(Expr::field("x")),
            rhs: Box::new(Expr::field("x")),
        };
        let (series, diags) = eval_one(&expr, &slice);
        assert!(diags.is_empty());
        assert_eq!(series.ty.kind(), Kind::Int64);
        let array = series
            .array
            .as_any()
            .downcast_ref::<arrow::array::Int64Array>()
            .unwrap();
        assert_eq!(array.values(), &[2, 4, 6]);
    }

    #[test]
    fn test_division_by_zero_warns_once_and_nulls() {
        let slice = slice();
        let expr = Expr::Arith {
            op: ArithOp::Div,
            lhs: Box::new(Expr::field("x")),
            rhs: Box::new(Expr::literal(0i64)),
        };
        let (series, diags) = eval_one(&expr, &slice);
        assert_eq!(series.array.null_count(), 3);
        let warnings: Vec<_> = diags
            .iter()
            .filter(|d| d.message.contains("division by zero"))
            .collect();
        assert_eq!(warnings.len(), 1, "one warning per batch");
    }

    #[test]
    fn test_type_mismatch_warns_and_nulls() {
        let slice = slice();
        // `y < 1` compares string to int.
        let expr = Expr::predicate(Expr::field("y"), RelOp::Lt, Expr::literal(1i64));
        let (series, diags) = eval_one(&expr, &slice);
        assert_eq!(series.array.null_count(), 3);
        assert!(diags.iter().any(|d| d.message.contains("not applicable")));
    }

    #[test]
    fn test_null_propagates_through_arithmetic() {
        let slice = slice();
        let expr = Expr::Arith {
            op: ArithOp::Add,
            lhs: Box::new(Expr::field("d")),
            rhs: Box::new(Expr::literal(1.0f64)),
        };
        let (series, diags) = eval_one(&expr, &slice);
        assert!(diags.is_empty());
        assert_eq!(series.array.null_count(), 1);
    }

    #[test]
    fn test_regex_match_via_session_cache() {
        let slice = slice();
        let session = EvalSession::new();
        let diag = DiagnosticCollector::new();
        let expr = tailor(
            &Expr::predicate(
                Expr::field("y"),
                RelOp::RegexMatch,
                Expr::Literal(Data::Pattern(crate::data::Pattern::new("[ab]"))),
            ),
            slice.schema(),
        );
        let mask = eval_filter_mask(&expr, &slice, &session, diag.as_ref());
        assert_eq!(mask.true_count(), 2);
        // Second batch reuses the cached compilation.
        let mask = eval_filter_mask(&expr, &slice, &session, diag.as_ref());
        assert_eq!(mask.true_count(), 2);
    }

    #[test]
    fn test_meta_extractors() {
        let slice = slice().with_import_time(Time::from_epoch_nanos(7));
        let (series, _) = eval_one(&Expr::Meta(MetaExtractor::Schema), &slice);
        assert_eq!(series.ty.kind(), Kind::String);
        let (series, _) = eval_one(&Expr::Meta(MetaExtractor::ImportTime), &slice);
        assert_eq!(series.ty.kind(), Kind::Time);
        let (series, _) = eval_one(&Expr::Meta(MetaExtractor::Internal), &slice);
        assert_eq!(series.ty.kind(), Kind::Bool);
    }

    #[test]
    fn test_multi_series_lengths_sum_to_rows() {
        // A call over a string column producing per-row types; `length` is
        // uniform, so force heterogeneity with nulls at the boundary.
        let slice = slice();
        let session = EvalSession::new();
        let diag = DiagnosticCollector::new();
        let expr = tailor(&Expr::field("x"), slice.schema());
        let series = eval(&expr, &slice, &session, diag.as_ref());
        let total: usize = series.iter().map(Series::len).sum();
        assert_eq!(total, slice.rows());
    }

    #[test]
    fn test_unknown_function_warns() {
        let slice = slice();
        let expr = Expr::Call(crate::expr::FunctionCall {
            function: "no_such_fn".into(),
            args: vec![],
            named_args: vec![],
        });
        let (series, diags) = eval_one(&expr, &slice);
        assert_eq!(series.array.null_count(), 3);
        assert!(diags.iter().any(|d| d.message.contains("unknown function")));
    }
}
