//! Static evaluation and predicate analysis.
//!
//! Literal rewriting happens upstream, but rewrites performed by the
//! optimizer itself (null substitution, aggregate identities) can leave
//! constant predicates behind; these helpers decide them.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::{BinaryOperator, ElementSymbol, Expr, ScalarValue, SubqueryKind};

/// Functions that can turn a NULL argument into a non-null result.
const NULL_TOLERANT_FUNCTIONS: &[&str] = &["COALESCE", "IFNULL", "NVL", "NULLIF", "ISNULL"];

/// Evaluate an expression that references no columns.
///
/// Returns `None` when the expression is not constant or cannot be decided
/// without a function library.
pub fn evaluate_constant(expr: &Expr) -> Option<ScalarValue> {
    match expr {
        Expr::Literal(value) => Some(value.clone()),
        Expr::TypedNull(_) => Some(ScalarValue::Null),
        Expr::BinaryOp { left, op, right } => {
            let l = evaluate_constant(left);
            let r = evaluate_constant(right);
            match op {
                BinaryOperator::And => eval_and(l, r),
                BinaryOperator::Or => eval_or(l, r),
                op if op.is_comparison() => {
                    let (l, r) = (l?, r?);
                    if l.is_null() || r.is_null() {
                        return Some(ScalarValue::Null);
                    }
                    let ordering = compare(&l, &r)?;
                    Some(ScalarValue::Boolean(match op {
                        BinaryOperator::Eq => ordering == Ordering::Equal,
                        BinaryOperator::NotEq => ordering != Ordering::Equal,
                        BinaryOperator::Lt => ordering == Ordering::Less,
                        BinaryOperator::LtEq => ordering != Ordering::Greater,
                        BinaryOperator::Gt => ordering == Ordering::Greater,
                        _ => ordering != Ordering::Less,
                    }))
                }
                op => arithmetic(&l?, *op, &r?),
            }
        }
        Expr::Not(inner) => match evaluate_constant(inner)? {
            ScalarValue::Boolean(b) => Some(ScalarValue::Boolean(!b)),
            ScalarValue::Null => Some(ScalarValue::Null),
            _ => None,
        },
        Expr::IsNull { expr, negated } => {
            let value = evaluate_constant(expr)?;
            Some(ScalarValue::Boolean(value.is_null() != *negated))
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let value = evaluate_constant(expr)?;
            let items: Option<Vec<ScalarValue>> = list.iter().map(evaluate_constant).collect();
            let items = items?;
            if value.is_null() {
                return Some(ScalarValue::Null);
            }
            let mut saw_null = false;
            for item in &items {
                if item.is_null() {
                    saw_null = true;
                } else if compare(&value, item)? == Ordering::Equal {
                    return Some(ScalarValue::Boolean(!negated));
                }
            }
            if saw_null {
                Some(ScalarValue::Null)
            } else {
                Some(ScalarValue::Boolean(*negated))
            }
        }
        _ => None,
    }
}

fn eval_and(l: Option<ScalarValue>, r: Option<ScalarValue>) -> Option<ScalarValue> {
    let is_false = |v: &Option<ScalarValue>| matches!(v, Some(ScalarValue::Boolean(false)));
    if is_false(&l) || is_false(&r) {
        return Some(ScalarValue::Boolean(false));
    }
    match (l?, r?) {
        (ScalarValue::Boolean(true), ScalarValue::Boolean(true)) => Some(ScalarValue::Boolean(true)),
        (ScalarValue::Null | ScalarValue::Boolean(true), ScalarValue::Null | ScalarValue::Boolean(true)) => {
            Some(ScalarValue::Null)
        }
        _ => None,
    }
}

fn eval_or(l: Option<ScalarValue>, r: Option<ScalarValue>) -> Option<ScalarValue> {
    let is_true = |v: &Option<ScalarValue>| matches!(v, Some(ScalarValue::Boolean(true)));
    if is_true(&l) || is_true(&r) {
        return Some(ScalarValue::Boolean(true));
    }
    match (l?, r?) {
        (ScalarValue::Boolean(false), ScalarValue::Boolean(false)) => {
            Some(ScalarValue::Boolean(false))
        }
        (ScalarValue::Null | ScalarValue::Boolean(false), ScalarValue::Null | ScalarValue::Boolean(false)) => {
            Some(ScalarValue::Null)
        }
        _ => None,
    }
}

fn as_f64(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Int32(v) => Some(f64::from(*v)),
        ScalarValue::Int64(v) => Some(*v as f64),
        ScalarValue::Float64(v) => Some(*v),
        _ => None,
    }
}

fn as_i64(value: &ScalarValue) -> Option<i64> {
    match value {
        ScalarValue::Int32(v) => Some(i64::from(*v)),
        ScalarValue::Int64(v) => Some(*v),
        _ => None,
    }
}

fn compare(l: &ScalarValue, r: &ScalarValue) -> Option<Ordering> {
    match (l, r) {
        (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => Some(a.cmp(b)),
        (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => Some(a.cmp(b)),
        _ => match (as_i64(l), as_i64(r)) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => as_f64(l)?.partial_cmp(&as_f64(r)?),
        },
    }
}

fn arithmetic(l: &ScalarValue, op: BinaryOperator, r: &ScalarValue) -> Option<ScalarValue> {
    if l.is_null() || r.is_null() {
        return Some(ScalarValue::Null);
    }
    if let (Some(a), Some(b)) = (as_i64(l), as_i64(r)) {
        let value = match op {
            BinaryOperator::Plus => a.checked_add(b)?,
            BinaryOperator::Minus => a.checked_sub(b)?,
            BinaryOperator::Multiply => a.checked_mul(b)?,
            BinaryOperator::Divide => a.checked_div(b)?,
            BinaryOperator::Modulo => a.checked_rem(b)?,
            _ => return None,
        };
        let both_int32 = matches!(l, ScalarValue::Int32(_)) && matches!(r, ScalarValue::Int32(_));
        return Some(match i32::try_from(value) {
            Ok(v) if both_int32 => ScalarValue::Int32(v),
            _ => ScalarValue::Int64(value),
        });
    }
    let (a, b) = (as_f64(l)?, as_f64(r)?);
    let value = match op {
        BinaryOperator::Plus => a + b,
        BinaryOperator::Minus => a - b,
        BinaryOperator::Multiply => a * b,
        BinaryOperator::Divide if b != 0.0 => a / b,
        _ => return None,
    };
    Some(ScalarValue::Float64(value))
}

/// Criteria that can never be satisfied (false or unknown for every row).
pub fn is_statically_false(expr: &Expr) -> bool {
    matches!(
        evaluate_constant(expr),
        Some(ScalarValue::Boolean(false) | ScalarValue::Null)
    )
}

pub fn is_statically_true(expr: &Expr) -> bool {
    matches!(evaluate_constant(expr), Some(ScalarValue::Boolean(true)))
}

fn references(expr: &Expr, groups: &BTreeSet<String>) -> bool {
    let tolerant = expr.any(&|e| match e {
        Expr::Case { .. } => true,
        Expr::Function { name, .. } => NULL_TOLERANT_FUNCTIONS.contains(&name.as_str()),
        _ => false,
    });
    !tolerant && !expr.groups().is_disjoint(groups)
}

/// Whether the predicate is false or unknown whenever every column of
/// `groups` is NULL. Such a predicate above an outer join discards the
/// null-extended rows, so the join can be treated as inner.
pub fn is_null_rejecting(expr: &Expr, groups: &BTreeSet<String>) -> bool {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => is_null_rejecting(left, groups) || is_null_rejecting(right, groups),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Or,
            right,
        } => is_null_rejecting(left, groups) && is_null_rejecting(right, groups),
        Expr::BinaryOp { left, op, right } if op.is_comparison() => {
            references(left, groups) || references(right, groups)
        }
        Expr::Not(inner) => match inner.as_ref() {
            Expr::IsNull {
                expr,
                negated: false,
            } => references(expr, groups),
            Expr::BinaryOp { op, .. } if op.is_comparison() => is_null_rejecting(inner, groups),
            _ => false,
        },
        Expr::IsNull {
            expr,
            negated: true,
        } => references(expr, groups),
        Expr::InList { expr, .. } | Expr::DependentSet { expr, .. } => references(expr, groups),
        Expr::Subquery {
            kind: SubqueryKind::In { expr, .. },
            ..
        } => references(expr, groups),
        _ => false,
    }
}

/// Column bound to known values by `col = literal`, `col IN (literals)` or a
/// dependent value set.
pub fn bound_column(expr: &Expr) -> Option<&ElementSymbol> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (Expr::Column(symbol), Expr::Literal(_)) | (Expr::Literal(_), Expr::Column(symbol)) => {
                Some(symbol)
            }
            _ => None,
        },
        Expr::InList {
            expr,
            list,
            negated: false,
        } if list.iter().all(|item| matches!(item, Expr::Literal(_))) => expr.as_column(),
        Expr::DependentSet { expr, .. } => expr.as_column(),
        _ => None,
    }
}

/// Equality pairs `(left_expr, right_expr)` among the conjuncts where each
/// side draws only from one input.
pub fn equi_join_pairs(
    criteria: &[Expr],
    left_groups: &BTreeSet<String>,
    right_groups: &BTreeSet<String>,
) -> Vec<(Expr, Expr)> {
    let within = |e: &Expr, groups: &BTreeSet<String>| {
        let g = e.groups();
        !g.is_empty() && g.is_subset(groups) && !e.contains_aggregate() && !e.contains_subquery()
    };
    criteria
        .iter()
        .filter_map(|conjunct| match conjunct {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } => {
                if within(left, left_groups) && within(right, right_groups) {
                    Some((left.as_ref().clone(), right.as_ref().clone()))
                } else if within(left, right_groups) && within(right, left_groups) {
                    Some((right.as_ref().clone(), left.as_ref().clone()))
                } else {
                    None
                }
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::GroupSymbol;
    use arrow::datatypes::DataType;

    fn col(group: &str, name: &str) -> Expr {
        Expr::Column(ElementSymbol::new(
            &GroupSymbol::new(group),
            name,
            DataType::Int32,
        ))
    }

    fn lit(v: i32) -> Expr {
        Expr::Literal(ScalarValue::Int32(v))
    }

    fn groups(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_contradiction() {
        assert!(is_statically_false(&Expr::eq(lit(1), lit(0))));
        assert!(is_statically_true(&Expr::eq(lit(1), lit(1))));
        // a conjunct that is false decides the whole AND
        let mixed = Expr::and(Expr::eq(col("a", "x"), lit(1)), Expr::eq(lit(1), lit(0)));
        assert!(is_statically_false(&mixed));
        assert!(!is_statically_false(&Expr::eq(col("a", "x"), lit(1))));
    }

    #[test]
    fn test_null_comparison_is_unknown() {
        let expr = Expr::eq(Expr::TypedNull(DataType::Int32), lit(1));
        assert_eq!(evaluate_constant(&expr), Some(ScalarValue::Null));
        assert!(is_statically_false(&expr));
        let is_null = Expr::IsNull {
            expr: std::sync::Arc::new(Expr::TypedNull(DataType::Int32)),
            negated: false,
        };
        assert!(is_statically_true(&is_null));
    }

    #[test]
    fn test_arithmetic_and_in_list() {
        let sum = Expr::binary(lit(2), BinaryOperator::Plus, lit(3));
        assert_eq!(evaluate_constant(&sum), Some(ScalarValue::Int32(5)));
        let in_list = Expr::InList {
            expr: std::sync::Arc::new(lit(5)),
            list: vec![lit(1), sum],
            negated: false,
        };
        assert!(is_statically_true(&in_list));
        let div_zero = Expr::binary(lit(1), BinaryOperator::Divide, lit(0));
        assert_eq!(evaluate_constant(&div_zero), None);
    }

    #[test]
    fn test_null_rejecting() {
        let inner = groups(&["b"]);
        assert!(is_null_rejecting(&Expr::eq(col("b", "y"), lit(1)), &inner));
        assert!(!is_null_rejecting(&Expr::eq(col("a", "x"), lit(1)), &inner));
        let is_null = Expr::IsNull {
            expr: std::sync::Arc::new(col("b", "y")),
            negated: false,
        };
        assert!(!is_null_rejecting(&is_null, &inner));
        let coalesce = Expr::eq(
            Expr::function("coalesce", vec![col("b", "y"), lit(0)], DataType::Int32),
            lit(0),
        );
        assert!(!is_null_rejecting(&coalesce, &inner));
        let either = Expr::or(Expr::eq(col("b", "y"), lit(1)), Expr::eq(col("a", "x"), lit(1)));
        assert!(!is_null_rejecting(&either, &inner));
    }

    #[test]
    fn test_bound_column_and_equi_pairs() {
        let bound = Expr::eq(lit(3), col("a", "x"));
        assert_eq!(bound_column(&bound).map(|s| s.name.as_str()), Some("x"));
        let criteria = vec![
            Expr::eq(col("b", "y"), col("a", "x")),
            Expr::binary(col("a", "x"), BinaryOperator::Lt, col("b", "z")),
        ];
        let pairs = equi_join_pairs(&criteria, &groups(&["a"]), &groups(&["b"]));
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, col("a", "x"));
        assert_eq!(pairs[0].1, col("b", "y"));
    }
}
