//! Expression normalisation and schema-independent validation.
//!
//! Normalisation rewrites an expression into the canonical form the
//! optimiser and the partition evaluator expect: `and`/`or` are n-ary and
//! flattened, double negations collapse, negated predicates fold into their
//! complementary operator, literal subtrees fold, and extractor paths
//! canonicalise. Normalisation is idempotent.

use crate::data::Data;
use crate::diag::Diagnostic;
use crate::expr::{evaluate_predicate, ArithOp, Expr, RelOp};
use crate::types::Kind;

/// Rewrites `expr` into canonical form.
pub fn normalize(expr: Expr) -> Expr {
    match expr {
        Expr::Literal(_) | Expr::Leaf(_) | Expr::Meta(_) => expr,
        Expr::Field(name) => Expr::Field(canonical_path(&name)),
        Expr::Neg(inner) => match normalize(*inner) {
            // Double negation.
            Expr::Neg(inner) => *inner,
            Expr::Literal(value) => fold_neg(value),
            inner => Expr::Neg(Box::new(inner)),
        },
        Expr::Arith { op, lhs, rhs } => {
            let lhs = normalize(*lhs);
            let rhs = normalize(*rhs);
            if let (Expr::Literal(a), Expr::Literal(b)) = (&lhs, &rhs) {
                if let Some(folded) = fold_arith(op, a, b) {
                    return Expr::Literal(folded);
                }
            }
            Expr::Arith {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }
        }
        Expr::Predicate { op, lhs, rhs } => {
            let lhs = normalize(*lhs);
            let rhs = normalize(*rhs);
            if let (Expr::Literal(a), Expr::Literal(b)) = (&lhs, &rhs) {
                // Regex folding would need compilation; leave it to eval.
                if !matches!(op, RelOp::RegexMatch | RelOp::NotRegexMatch) {
                    if let Some(result) =
                        evaluate_predicate(a.as_view(), op, b.as_view(), None)
                    {
                        return Expr::Literal(Data::Bool(result));
                    }
                }
            }
            Expr::Predicate {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }
        }
        Expr::And(exprs) => {
            let mut flat = Vec::with_capacity(exprs.len());
            for e in exprs {
                match normalize(e) {
                    // Flatten nested conjunctions.
                    Expr::And(inner) => flat.extend(inner),
                    e if e.is_true_literal() => {}
                    e if e.is_false_literal() => return Expr::false_(),
                    e => flat.push(e),
                }
            }
            match flat.len() {
                0 => Expr::true_(),
                1 => flat.into_iter().next().expect("len checked"),
                _ => Expr::And(flat),
            }
        }
        Expr::Or(exprs) => {
            let mut flat = Vec::with_capacity(exprs.len());
            for e in exprs {
                match normalize(e) {
                    Expr::Or(inner) => flat.extend(inner),
                    e if e.is_false_literal() => {}
                    e if e.is_true_literal() => return Expr::true_(),
                    e => flat.push(e),
                }
            }
            match flat.len() {
                0 => Expr::false_(),
                1 => flat.into_iter().next().expect("len checked"),
                _ => Expr::Or(flat),
            }
        }
        Expr::Not(inner) => match normalize(*inner) {
            // Double negation.
            Expr::Not(inner) => *inner,
            Expr::Literal(Data::Bool(b)) => Expr::Literal(Data::Bool(!b)),
            // A negated predicate folds into the complementary operator.
            Expr::Predicate { op, lhs, rhs } => Expr::Predicate {
                op: op.negate(),
                lhs,
                rhs,
            },
            inner => Expr::Not(Box::new(inner)),
        },
        Expr::Call(mut call) => {
            call.args = call.args.into_iter().map(normalize).collect();
            call.named_args = call
                .named_args
                .into_iter()
                .map(|(name, arg)| (name, normalize(arg)))
                .collect();
            Expr::Call(call)
        }
    }
}

fn canonical_path(path: &str) -> String {
    path.split('.')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(".")
}

fn fold_neg(value: Data) -> Expr {
    match value {
        Data::Int64(i) => Expr::Literal(Data::Int64(i.wrapping_neg())),
        Data::Double(d) => Expr::Literal(Data::Double(-d)),
        Data::Duration(d) => Expr::Literal(Data::Duration(crate::data::Duration(
            d.as_nanos().wrapping_neg(),
        ))),
        other => Expr::Neg(Box::new(Expr::Literal(other))),
    }
}

fn fold_arith(op: ArithOp, lhs: &Data, rhs: &Data) -> Option<Data> {
    use Data as D;
    Some(match (op, lhs, rhs) {
        (ArithOp::Add, D::Int64(a), D::Int64(b)) => D::Int64(a.checked_add(*b)?),
        (ArithOp::Sub, D::Int64(a), D::Int64(b)) => D::Int64(a.checked_sub(*b)?),
        (ArithOp::Mul, D::Int64(a), D::Int64(b)) => D::Int64(a.checked_mul(*b)?),
        (ArithOp::Add, D::UInt64(a), D::UInt64(b)) => D::UInt64(a.checked_add(*b)?),
        (ArithOp::Sub, D::UInt64(a), D::UInt64(b)) => D::UInt64(a.checked_sub(*b)?),
        (ArithOp::Mul, D::UInt64(a), D::UInt64(b)) => D::UInt64(a.checked_mul(*b)?),
        (ArithOp::Add, D::Double(a), D::Double(b)) => D::Double(a + b),
        (ArithOp::Sub, D::Double(a), D::Double(b)) => D::Double(a - b),
        (ArithOp::Mul, D::Double(a), D::Double(b)) => D::Double(a * b),
        // Division folds only when the divisor is a non-zero literal; the
        // zero case carries a per-batch warning and belongs to eval.
        (ArithOp::Div, D::Int64(a), D::Int64(b)) if *b != 0 => D::Int64(a / b),
        (ArithOp::Div, D::UInt64(a), D::UInt64(b)) if *b != 0 => D::UInt64(a / b),
        (ArithOp::Div, D::Double(a), D::Double(b)) if *b != 0.0 => D::Double(a / b),
        _ => return None,
    })
}

/// Rejects expressions whose operators cannot apply to their operands at
/// the tree level, independent of any schema.
pub fn validate(expr: &Expr) -> Result<(), Diagnostic> {
    match expr {
        Expr::Literal(_) | Expr::Field(_) | Expr::Leaf(_) | Expr::Meta(_) => Ok(()),
        Expr::Neg(inner) => {
            if let Expr::Literal(value) = inner.as_ref() {
                if !matches!(
                    value.kind(),
                    Kind::Int64 | Kind::UInt64 | Kind::Double | Kind::Duration | Kind::Null
                ) {
                    return Err(Diagnostic::error(format!(
                        "cannot negate a value of type `{}`",
                        value.kind()
                    )));
                }
            }
            validate(inner)
        }
        Expr::Arith { op, lhs, rhs } => {
            for side in [lhs.as_ref(), rhs.as_ref()] {
                if let Expr::Literal(value) = side {
                    if !matches!(
                        value.kind(),
                        Kind::Int64
                            | Kind::UInt64
                            | Kind::Double
                            | Kind::Duration
                            | Kind::Time
                            | Kind::Null
                    ) {
                        return Err(Diagnostic::error(format!(
                            "operator `{op}` is not applicable to `{}`",
                            value.kind()
                        )));
                    }
                }
            }
            validate(lhs)?;
            validate(rhs)
        }
        Expr::Predicate { op, lhs, rhs } => {
            if let Expr::Literal(value) = rhs.as_ref() {
                match op {
                    RelOp::RegexMatch | RelOp::NotRegexMatch => {
                        if !matches!(value.kind(), Kind::Pattern | Kind::String | Kind::Null) {
                            return Err(Diagnostic::error(format!(
                                "operator `{op}` requires a pattern on the right-hand side, \
                                 got `{}`",
                                value.kind()
                            )));
                        }
                        // A malformed pattern fails every schema; reject early.
                        if let Data::Pattern(pattern) = value {
                            if let Err(e) = pattern.compile() {
                                return Err(Diagnostic::error(format!(
                                    "invalid regular expression: {e}"
                                )));
                            }
                        }
                    }
                    RelOp::In | RelOp::NotIn => {
                        if !matches!(
                            value.kind(),
                            Kind::String | Kind::Subnet | Kind::List | Kind::Map | Kind::Null
                        ) {
                            return Err(Diagnostic::error(format!(
                                "operator `{op}` requires a string, subnet, list or map on \
                                 the right-hand side, got `{}`",
                                value.kind()
                            )));
                        }
                    }
                    op if op.is_ordering() => {
                        if matches!(value.kind(), Kind::Pattern) {
                            return Err(Diagnostic::error(format!(
                                "operator `{op}` cannot order patterns"
                            )));
                        }
                    }
                    _ => {}
                }
            }
            validate(lhs)?;
            validate(rhs)
        }
        Expr::And(exprs) | Expr::Or(exprs) => {
            for e in exprs {
                validate_boolean_operand(e)?;
                validate(e)?;
            }
            Ok(())
        }
        Expr::Not(inner) => {
            validate_boolean_operand(inner)?;
            validate(inner)
        }
        Expr::Call(call) => {
            for arg in &call.args {
                validate(arg)?;
            }
            for (_, arg) in &call.named_args {
                validate(arg)?;
            }
            Ok(())
        }
    }
}

fn validate_boolean_operand(expr: &Expr) -> Result<(), Diagnostic> {
    if let Expr::Literal(value) = expr {
        if !matches!(value.kind(), Kind::Bool | Kind::Null) {
            return Err(Diagnostic::error(format!(
                "logical connectives require boolean operands, got `{}`",
                value.kind()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Pattern;

    fn num(i: i64) -> Expr {
        Expr::literal(i)
    }

    #[test]
    fn test_and_flattening() {
        let nested = Expr::and(vec![
            Expr::and(vec![
                Expr::predicate(Expr::field("a"), RelOp::Eq, num(1)),
                Expr::predicate(Expr::field("b"), RelOp::Eq, num(2)),
            ]),
            Expr::predicate(Expr::field("c"), RelOp::Eq, num(3)),
        ]);
        match normalize(nested) {
            Expr::And(exprs) => assert_eq!(exprs.len(), 3),
            other => panic!("expected flat conjunction, got {other}"),
        }
    }

    #[test]
    fn test_double_negation_collapses() {
        let p = Expr::predicate(Expr::field("a"), RelOp::Eq, num(1));
        let double = Expr::not(Expr::not(Expr::not(Expr::not(p.clone()))));
        assert_eq!(normalize(double), p);
    }

    #[test]
    fn test_negated_predicate_folds_operator() {
        let p = Expr::not(Expr::predicate(Expr::field("a"), RelOp::Lt, num(1)));
        match normalize(p) {
            Expr::Predicate { op, .. } => assert_eq!(op, RelOp::Ge),
            other => panic!("expected predicate, got {other}"),
        }
    }

    #[test]
    fn test_literal_folding() {
        assert_eq!(
            normalize(Expr::Arith {
                op: ArithOp::Add,
                lhs: Box::new(num(1)),
                rhs: Box::new(num(2)),
            }),
            num(3)
        );
        assert_eq!(
            normalize(Expr::predicate(num(2), RelOp::Gt, num(1))),
            Expr::true_()
        );
        // Division by a zero literal stays for eval to warn about.
        let div = Expr::Arith {
            op: ArithOp::Div,
            lhs: Box::new(num(1)),
            rhs: Box::new(num(0)),
        };
        assert!(matches!(normalize(div), Expr::Arith { .. }));
    }

    #[test]
    fn test_true_false_absorption() {
        let p = Expr::predicate(Expr::field("a"), RelOp::Eq, num(1));
        assert_eq!(normalize(Expr::and(vec![Expr::true_(), p.clone()])), p);
        assert!(normalize(Expr::and(vec![Expr::false_(), p.clone()])).is_false_literal());
        assert!(normalize(Expr::or(vec![Expr::true_(), p.clone()])).is_true_literal());
        assert_eq!(normalize(Expr::or(vec![Expr::false_(), p.clone()])), p);
        assert!(normalize(Expr::and(vec![])).is_true_literal());
        assert!(normalize(Expr::or(vec![])).is_false_literal());
    }

    #[test]
    fn test_normalization_idempotent() {
        let exprs = vec![
            Expr::not(Expr::and(vec![
                Expr::predicate(Expr::field(" a . b "), RelOp::Eq, num(1)),
                Expr::or(vec![
                    Expr::predicate(Expr::field("c"), RelOp::Lt, num(2)),
                    Expr::not(Expr::predicate(Expr::field("d"), RelOp::In, Expr::literal("x"))),
                ]),
            ])),
            Expr::Arith {
                op: ArithOp::Mul,
                lhs: Box::new(Expr::field("x")),
                rhs: Box::new(num(0)),
            },
        ];
        for e in exprs {
            let once = normalize(e);
            let twice = normalize(once.clone());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_path_canonicalisation() {
        assert_eq!(
            normalize(Expr::field(" net . src ")),
            Expr::Field("net.src".into())
        );
    }

    #[test]
    fn test_validate_rejects_mismatched_operators() {
        assert!(validate(&Expr::predicate(
            Expr::field("x"),
            RelOp::RegexMatch,
            num(1)
        ))
        .is_err());
        assert!(validate(&Expr::predicate(Expr::field("x"), RelOp::In, num(1))).is_err());
        assert!(validate(&Expr::and(vec![num(1)])).is_err());
        assert!(validate(&Expr::Neg(Box::new(Expr::literal("s")))).is_err());
        assert!(validate(&Expr::predicate(
            Expr::field("x"),
            RelOp::RegexMatch,
            Expr::Literal(Data::Pattern(Pattern::new("(unclosed")))
        ))
        .is_err());
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let e = Expr::and(vec![
            Expr::predicate(Expr::field("x"), RelOp::Ge, num(2)),
            Expr::predicate(
                Expr::field("msg"),
                RelOp::RegexMatch,
                Expr::Literal(Data::Pattern(Pattern::new("^a+$"))),
            ),
        ]);
        assert!(validate(&e).is_ok());
    }
}
