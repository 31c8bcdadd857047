//! # Expressions
//!
//! The expression tree evaluated over columnar batches: literals, field
//! references (dotted name or bound leaf index), meta extractors, unary and
//! binary operators, logical connectives and function calls.
//!
//! The lifecycle is normalise → validate → tailor → evaluate:
//! [`normalize`](crate::expr::normalize::normalize) rewrites into canonical
//! form, [`validate`](crate::expr::normalize::validate) rejects trees whose
//! operators cannot apply to their operands regardless of schema,
//! [`tailor`](crate::expr::tailor::tailor) binds extractors to the leaves of
//! one schema, and [`eval`](crate::expr::eval::eval) produces series over a
//! slice.

pub mod eval;
pub mod normalize;
pub mod tailor;

pub use eval::{eval, eval_filter_mask, EvalSession, MultiSeries, Series};
pub use normalize::{normalize, validate};
pub use tailor::tailor;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::data::{Data, DataView};
use crate::types::Type;

/// Relational operator of a predicate; what indexers consume, curried with
/// the literal side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    RegexMatch,
    NotRegexMatch,
}

impl RelOp {
    /// The operator testing the complement.
    pub fn negate(self) -> RelOp {
        match self {
            RelOp::Eq => RelOp::Ne,
            RelOp::Ne => RelOp::Eq,
            RelOp::Lt => RelOp::Ge,
            RelOp::Ge => RelOp::Lt,
            RelOp::Le => RelOp::Gt,
            RelOp::Gt => RelOp::Le,
            RelOp::In => RelOp::NotIn,
            RelOp::NotIn => RelOp::In,
            RelOp::RegexMatch => RelOp::NotRegexMatch,
            RelOp::NotRegexMatch => RelOp::RegexMatch,
        }
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, RelOp::Lt | RelOp::Le | RelOp::Gt | RelOp::Ge)
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelOp::Eq => "==",
            RelOp::Ne => "!=",
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
            RelOp::In => "in",
            RelOp::NotIn => "not in",
            RelOp::RegexMatch => "~",
            RelOp::NotRegexMatch => "!~",
        };
        write!(f, "{s}")
    }
}

/// Binary arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        };
        write!(f, "{s}")
    }
}

/// A reference to a meta attribute of the batch rather than a data column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaExtractor {
    /// The schema name.
    Schema,
    /// The schema fingerprint, rendered as 16 hex digits.
    SchemaId,
    /// The moment the batch entered the system.
    ImportTime,
    /// Whether the events are internal to the engine.
    Internal,
}

impl fmt::Display for MetaExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetaExtractor::Schema => "#schema",
            MetaExtractor::SchemaId => "#schema_id",
            MetaExtractor::ImportTime => "#import_time",
            MetaExtractor::Internal => "#internal",
        };
        write!(f, "{s}")
    }
}

/// A field reference bound to a concrete leaf of one schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafRef {
    pub index: usize,
    pub ty: Type,
}

/// A function call by name with positional and named arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub function: String,
    pub args: Vec<Expr>,
    pub named_args: Vec<(String, Expr)>,
}

/// The expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A typed constant.
    Literal(Data),
    /// A field reference by dotted name; replaced by [`Expr::Leaf`] when
    /// tailoring to a schema.
    Field(String),
    /// A field reference bound to a leaf index.
    Leaf(LeafRef),
    /// A meta extractor.
    Meta(MetaExtractor),
    /// Arithmetic negation.
    Neg(Box<Expr>),
    /// Binary arithmetic.
    Arith {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// A relational predicate.
    Predicate {
        op: RelOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// N-ary conjunction. An empty conjunction is `true`.
    And(Vec<Expr>),
    /// N-ary disjunction. An empty disjunction is `false`.
    Or(Vec<Expr>),
    /// Logical negation.
    Not(Box<Expr>),
    /// A function call.
    Call(FunctionCall),
}

impl Expr {
    /// The constant `true`.
    pub fn true_() -> Expr {
        Expr::Literal(Data::Bool(true))
    }

    /// The constant `false`.
    pub fn false_() -> Expr {
        Expr::Literal(Data::Bool(false))
    }

    pub fn field(name: impl Into<String>) -> Expr {
        Expr::Field(name.into())
    }

    pub fn literal(value: impl Into<Data>) -> Expr {
        Expr::Literal(value.into())
    }

    /// Builds `lhs op rhs`.
    pub fn predicate(lhs: Expr, op: RelOp, rhs: Expr) -> Expr {
        Expr::Predicate {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn and(exprs: Vec<Expr>) -> Expr {
        Expr::And(exprs)
    }

    pub fn or(exprs: Vec<Expr>) -> Expr {
        Expr::Or(exprs)
    }

    pub fn not(expr: Expr) -> Expr {
        Expr::Not(Box::new(expr))
    }

    pub fn is_true_literal(&self) -> bool {
        matches!(self, Expr::Literal(Data::Bool(true)))
    }

    pub fn is_false_literal(&self) -> bool {
        matches!(self, Expr::Literal(Data::Bool(false)))
    }

    /// Conjoins two filters, short-circuiting trivial literals.
    pub fn conjoin(self, other: Expr) -> Expr {
        match (self, other) {
            (lhs, rhs) if lhs.is_true_literal() => rhs,
            (lhs, rhs) if rhs.is_true_literal() => lhs,
            (lhs, rhs) if lhs.is_false_literal() || rhs.is_false_literal() => Expr::false_(),
            (Expr::And(mut lhs), Expr::And(rhs)) => {
                lhs.extend(rhs);
                Expr::And(lhs)
            }
            (Expr::And(mut lhs), rhs) => {
                lhs.push(rhs);
                Expr::And(lhs)
            }
            (lhs, Expr::And(mut rhs)) => {
                rhs.insert(0, lhs);
                Expr::And(rhs)
            }
            (lhs, rhs) => Expr::And(vec![lhs, rhs]),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(data) => write!(f, "{data}"),
            Expr::Field(name) => write!(f, "{name}"),
            Expr::Leaf(leaf) => write!(f, ":{}", leaf.index),
            Expr::Meta(meta) => write!(f, "{meta}"),
            Expr::Neg(expr) => write!(f, "-{expr}"),
            Expr::Arith { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            Expr::Predicate { op, lhs, rhs } => write!(f, "{lhs} {op} {rhs}"),
            Expr::And(exprs) => {
                if exprs.is_empty() {
                    return write!(f, "true");
                }
                write!(f, "(")?;
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " and ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ")")
            }
            Expr::Or(exprs) => {
                if exprs.is_empty() {
                    return write!(f, "false");
                }
                write!(f, "(")?;
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " or ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ")")
            }
            Expr::Not(expr) => write!(f, "not {expr}"),
            Expr::Call(call) => {
                write!(f, "{}(", call.function)?;
                let mut first = true;
                for arg in &call.args {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{arg}")?;
                }
                for (name, arg) in &call.named_args {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{name}={arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

// -- scalar predicate evaluation ---------------------------------------------

/// Compares numeric views across kinds, promoting to `double` if either
/// side is a double and otherwise widening signed/unsigned to a common
/// signed domain.
pub fn compare_numeric(lhs: DataView<'_>, rhs: DataView<'_>) -> Option<Ordering> {
    use DataView as V;
    Some(match (lhs, rhs) {
        (V::Int64(a), V::Int64(b)) => a.cmp(&b),
        (V::UInt64(a), V::UInt64(b)) => a.cmp(&b),
        (V::Double(a), V::Double(b)) => a.total_cmp(&b),
        (V::Int64(a), V::UInt64(b)) => {
            if a < 0 {
                Ordering::Less
            } else {
                (a as u64).cmp(&b)
            }
        }
        (V::UInt64(a), V::Int64(b)) => {
            if b < 0 {
                Ordering::Greater
            } else {
                a.cmp(&(b as u64))
            }
        }
        (V::Double(a), V::Int64(b)) => a.total_cmp(&(b as f64)),
        (V::Int64(a), V::Double(b)) => (a as f64).total_cmp(&b),
        (V::Double(a), V::UInt64(b)) => a.total_cmp(&(b as f64)),
        (V::UInt64(a), V::Double(b)) => (a as f64).total_cmp(&b),
        (V::Duration(a), V::Duration(b)) => a.cmp(&b),
        (V::Time(a), V::Time(b)) => a.cmp(&b),
        _ => return None,
    })
}

/// Evaluates a scalar predicate `lhs op rhs`.
///
/// Returns `None` when the operand kinds are incompatible with the
/// operator; the caller decides whether that warrants a diagnostic. Regex
/// operators take the pre-compiled pattern to keep compilation out of the
/// row loop.
pub fn evaluate_predicate(
    lhs: DataView<'_>,
    op: RelOp,
    rhs: DataView<'_>,
    regex: Option<&regex::Regex>,
) -> Option<bool> {
    use DataView as V;
    match op {
        RelOp::Eq | RelOp::Ne => {
            let equal = match compare_numeric(lhs, rhs) {
                Some(ordering) => ordering == Ordering::Equal,
                None => match (lhs, rhs) {
                    // Enum values compare against their variant name.
                    (V::Enumeration(e), V::String(s)) | (V::String(s), V::Enumeration(e)) => {
                        e.name() == s
                    }
                    _ => lhs == rhs,
                },
            };
            Some(if op == RelOp::Eq { equal } else { !equal })
        }
        RelOp::Lt | RelOp::Le | RelOp::Gt | RelOp::Ge => {
            if lhs.is_null() || rhs.is_null() {
                return Some(false);
            }
            let ordering = match compare_numeric(lhs, rhs) {
                Some(ordering) => ordering,
                None => {
                    if lhs.kind() != rhs.kind() || !lhs.kind().is_ordered() {
                        return None;
                    }
                    lhs.cmp(&rhs)
                }
            };
            Some(match op {
                RelOp::Lt => ordering == Ordering::Less,
                RelOp::Le => ordering != Ordering::Greater,
                RelOp::Gt => ordering == Ordering::Greater,
                RelOp::Ge => ordering != Ordering::Less,
                _ => unreachable!(),
            })
        }
        RelOp::In | RelOp::NotIn => {
            let contained = match (lhs, rhs) {
                // Substring containment.
                (V::String(needle), V::String(haystack)) => {
                    crate::util::find_substring(haystack, needle).is_some()
                }
                // Subnet containment; v4 canonicalises into v4-mapped v6.
                (V::Ip(ip), V::Subnet(net)) => net.contains(ip),
                (V::Subnet(inner), V::Subnet(outer)) => {
                    outer.length() <= inner.length() && outer.contains(inner.network())
                }
                // Element membership.
                (element, V::List(list)) => list.iter().any(|e| e.as_view() == element),
                // Key membership.
                (key, V::Map(map)) => map.iter().any(|(k, _)| k.as_view() == key),
                _ => return None,
            };
            Some(if op == RelOp::In { contained } else { !contained })
        }
        RelOp::RegexMatch | RelOp::NotRegexMatch => {
            let subject = match lhs {
                V::String(s) => s,
                V::Null => return Some(op == RelOp::NotRegexMatch),
                _ => return None,
            };
            let matched = regex?.is_match(subject);
            Some(if op == RelOp::RegexMatch {
                matched
            } else {
                !matched
            })
        }
    }
}
