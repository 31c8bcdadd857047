//! Schema specialisation of expressions.
//!
//! [`tailor`] binds every field extractor of a normalised expression to a
//! concrete leaf index of one schema. Predicates whose extractor cannot
//! bind become `false` at that schema, silently: an expression is
//! routinely evaluated against many schemas and most fields exist in only
//! some of them.

use std::sync::Arc;

use crate::data::{Data, EnumValue};
use crate::expr::{normalize, Expr, FunctionCall, LeafRef};
use crate::types::{Kind, Type};

/// Specialises `expr` for `schema`, binding extractors to leaf indices and
/// coercing literals where the column type pins them down. The result is
/// re-normalised, so a predicate that became `false` propagates through the
/// surrounding connectives.
pub fn tailor(expr: &Expr, schema: &Type) -> Expr {
    normalize(tailor_impl(expr, schema))
}

fn tailor_impl(expr: &Expr, schema: &Type) -> Expr {
    match expr {
        Expr::Literal(_) | Expr::Leaf(_) | Expr::Meta(_) => expr.clone(),
        Expr::Field(path) => match bind(path, schema) {
            Some(leaf) => Expr::Leaf(leaf),
            // Outside a predicate an unbound field reads as null.
            None => Expr::Literal(Data::Null),
        },
        Expr::Neg(inner) => Expr::Neg(Box::new(tailor_impl(inner, schema))),
        Expr::Arith { op, lhs, rhs } => Expr::Arith {
            op: *op,
            lhs: Box::new(tailor_impl(lhs, schema)),
            rhs: Box::new(tailor_impl(rhs, schema)),
        },
        Expr::Predicate { op, lhs, rhs } => {
            // A predicate over an unbindable extractor is false at this
            // schema.
            if unbindable(lhs, schema) || unbindable(rhs, schema) {
                return Expr::false_();
            }
            let lhs = tailor_impl(lhs, schema);
            let mut rhs = tailor_impl(rhs, schema);
            if let (Expr::Leaf(leaf), Expr::Literal(literal)) = (&lhs, &rhs) {
                if let Some(coerced) = coerce_literal(literal, &leaf.ty) {
                    rhs = Expr::Literal(coerced);
                }
            }
            Expr::Predicate {
                op: *op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }
        }
        Expr::And(exprs) => Expr::And(exprs.iter().map(|e| tailor_impl(e, schema)).collect()),
        Expr::Or(exprs) => Expr::Or(exprs.iter().map(|e| tailor_impl(e, schema)).collect()),
        Expr::Not(inner) => Expr::Not(Box::new(tailor_impl(inner, schema))),
        Expr::Call(call) => Expr::Call(FunctionCall {
            function: call.function.clone(),
            args: call.args.iter().map(|e| tailor_impl(e, schema)).collect(),
            named_args: call
                .named_args
                .iter()
                .map(|(name, e)| (name.clone(), tailor_impl(e, schema)))
                .collect(),
        }),
    }
}

fn bind(path: &str, schema: &Type) -> Option<LeafRef> {
    let (field, index) = schema.resolve(path)?;
    Some(LeafRef {
        index,
        ty: field.ty,
    })
}

fn unbindable(expr: &Expr, schema: &Type) -> bool {
    match expr {
        Expr::Field(path) => schema.resolve(path).is_none(),
        _ => false,
    }
}

/// Coerces a literal towards a column type where the conversion is exact.
///
/// Numeric cross-kind comparisons are handled by promotion at evaluation
/// time; this covers the conversions promotion cannot express, such as
/// binding a variant name to an enum column.
fn coerce_literal(literal: &Data, column: &Type) -> Option<Data> {
    match (literal, column.kind()) {
        (Data::String(name), Kind::Enumeration) => {
            let enumeration = column.as_enumeration()?;
            EnumValue::from_name(Arc::new(enumeration.clone()), name).map(Data::Enumeration)
        }
        (Data::String(s), Kind::Ip) => crate::data::Ip::parse(s).map(Data::Ip),
        (Data::String(s), Kind::Subnet) => crate::data::Subnet::parse(s).map(Data::Subnet),
        (Data::String(s), Kind::Time) => crate::data::Time::parse(s).map(Data::Time),
        (Data::String(s), Kind::Duration) => crate::data::Duration::parse(s).map(Data::Duration),
        _ => None,
    }
}
