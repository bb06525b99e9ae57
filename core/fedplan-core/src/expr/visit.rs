//! Recursive traversal and rewriting of expression trees.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ahash::AHashMap;

use super::{BinaryOperator, ElementSymbol, Expr, SubqueryKind};
use crate::command::Command;

impl Expr {
    /// Direct sub-expressions. Subquery bodies are a separate scope and are
    /// not included.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column(_) | Expr::OuterRef(_) | Expr::Literal(_) | Expr::TypedNull(_) => vec![],
            Expr::BinaryOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::Not(inner) => vec![inner.as_ref()],
            Expr::IsNull { expr, .. } => vec![expr.as_ref()],
            Expr::InList { expr, list, .. } => {
                let mut out = vec![expr.as_ref()];
                out.extend(list.iter());
                out
            }
            Expr::Function { args, .. } => args.iter().collect(),
            Expr::Aggregate { arg, .. } => arg.iter().map(|a| a.as_ref()).collect(),
            Expr::Case {
                operand,
                branches,
                else_expr,
            } => {
                let mut out: Vec<&Expr> = operand.iter().map(|o| o.as_ref()).collect();
                for (when, then) in branches {
                    out.push(when);
                    out.push(then);
                }
                out.extend(else_expr.iter().map(|e| e.as_ref()));
                out
            }
            Expr::Subquery { kind, .. } => match kind {
                SubqueryKind::In { expr, .. } => vec![expr.as_ref()],
                _ => vec![],
            },
            Expr::DependentSet { expr, .. } => vec![expr.as_ref()],
        }
    }

    /// Pre-order walk; returning `false` from the visitor skips the children.
    pub fn walk(&self, visitor: &mut impl FnMut(&Expr) -> bool) {
        if visitor(self) {
            for child in self.children() {
                child.walk(visitor);
            }
        }
    }

    /// Rebuild the tree, replacing every node for which `f` returns a value.
    /// Replaced nodes are not descended into. Untouched subtrees stay shared.
    pub fn transform(&self, f: &mut impl FnMut(&Expr) -> Option<Expr>) -> Expr {
        self.transform_opt(f).unwrap_or_else(|| self.clone())
    }

    fn transform_opt(&self, f: &mut impl FnMut(&Expr) -> Option<Expr>) -> Option<Expr> {
        if let Some(replacement) = f(self) {
            return Some(replacement);
        }
        match self {
            Expr::Column(_) | Expr::OuterRef(_) | Expr::Literal(_) | Expr::TypedNull(_) => None,
            Expr::BinaryOp { left, op, right } => {
                let new_left = left.transform_opt(f);
                let new_right = right.transform_opt(f);
                if new_left.is_none() && new_right.is_none() {
                    return None;
                }
                Some(Expr::BinaryOp {
                    left: new_left.map(Arc::new).unwrap_or_else(|| left.clone()),
                    op: *op,
                    right: new_right.map(Arc::new).unwrap_or_else(|| right.clone()),
                })
            }
            Expr::Not(inner) => inner.transform_opt(f).map(|e| Expr::Not(Arc::new(e))),
            Expr::IsNull { expr, negated } => expr.transform_opt(f).map(|e| Expr::IsNull {
                expr: Arc::new(e),
                negated: *negated,
            }),
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let new_expr = expr.transform_opt(f);
                let new_list = transform_list(list, f);
                if new_expr.is_none() && new_list.is_none() {
                    return None;
                }
                Some(Expr::InList {
                    expr: new_expr.map(Arc::new).unwrap_or_else(|| expr.clone()),
                    list: new_list.unwrap_or_else(|| list.clone()),
                    negated: *negated,
                })
            }
            Expr::Function {
                name,
                args,
                return_type,
            } => transform_list(args, f).map(|args| Expr::Function {
                name: name.clone(),
                args,
                return_type: return_type.clone(),
            }),
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => {
                let new_arg = arg.as_ref().and_then(|a| a.transform_opt(f))?;
                Some(Expr::Aggregate {
                    func: *func,
                    arg: Some(Arc::new(new_arg)),
                    distinct: *distinct,
                })
            }
            Expr::Case {
                operand,
                branches,
                else_expr,
            } => {
                let new_operand = operand.as_ref().map(|o| o.transform_opt(f));
                let mut changed = matches!(new_operand, Some(Some(_)));
                let mut new_branches = Vec::with_capacity(branches.len());
                for (when, then) in branches {
                    let w = when.transform_opt(f);
                    let t = then.transform_opt(f);
                    changed |= w.is_some() || t.is_some();
                    new_branches.push((
                        w.unwrap_or_else(|| when.clone()),
                        t.unwrap_or_else(|| then.clone()),
                    ));
                }
                let new_else = else_expr.as_ref().map(|e| e.transform_opt(f));
                changed |= matches!(new_else, Some(Some(_)));
                if !changed {
                    return None;
                }
                Some(Expr::Case {
                    operand: match (operand, new_operand) {
                        (_, Some(Some(o))) => Some(Arc::new(o)),
                        (original, _) => original.clone(),
                    },
                    branches: new_branches,
                    else_expr: match (else_expr, new_else) {
                        (_, Some(Some(e))) => Some(Arc::new(e)),
                        (original, _) => original.clone(),
                    },
                })
            }
            Expr::Subquery { kind, command } => match kind {
                SubqueryKind::In { expr, negated } => {
                    expr.transform_opt(f).map(|e| Expr::Subquery {
                        kind: SubqueryKind::In {
                            expr: Arc::new(e),
                            negated: *negated,
                        },
                        command: command.clone(),
                    })
                }
                _ => None,
            },
            Expr::DependentSet {
                expr,
                source,
                max_values,
            } => expr.transform_opt(f).map(|e| Expr::DependentSet {
                expr: Arc::new(e),
                source: *source,
                max_values: *max_values,
            }),
        }
    }

    /// Replace every occurrence of a key expression by its mapped value.
    pub fn substitute(&self, map: &AHashMap<Expr, Expr>) -> Expr {
        if map.is_empty() {
            return self.clone();
        }
        self.transform(&mut |e| map.get(e).cloned())
    }

    /// Columns referenced at this scope, including correlated references
    /// made by subqueries to this scope.
    pub fn columns(&self) -> BTreeSet<ElementSymbol> {
        let mut out = BTreeSet::new();
        self.walk(&mut |e| {
            match e {
                Expr::Column(symbol) => {
                    out.insert(symbol.clone());
                }
                Expr::Subquery { command, .. } => {
                    out.extend(command.outer_refs());
                }
                _ => {}
            }
            true
        });
        out
    }

    /// Scope names of the groups referenced by this expression.
    pub fn groups(&self) -> BTreeSet<String> {
        self.columns()
            .into_iter()
            .filter_map(|symbol| symbol.group)
            .collect()
    }

    pub fn contains_aggregate(&self) -> bool {
        self.any(&|e| matches!(e, Expr::Aggregate { .. }))
    }

    pub fn contains_subquery(&self) -> bool {
        self.any(&|e| matches!(e, Expr::Subquery { .. }))
    }

    pub fn contains_dependent_set(&self) -> bool {
        self.any(&|e| matches!(e, Expr::DependentSet { .. }))
    }

    pub fn any(&self, predicate: &impl Fn(&Expr) -> bool) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if found {
                return false;
            }
            if predicate(e) {
                found = true;
                return false;
            }
            true
        });
        found
    }

    /// Distinct aggregate calls, in order of first appearance.
    pub fn aggregates(&self) -> Vec<Expr> {
        let mut out: Vec<Expr> = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Aggregate { .. } = e {
                if !out.contains(e) {
                    out.push(e.clone());
                }
                return false;
            }
            true
        });
        out
    }

    /// Subquery commands referenced at this scope.
    pub fn subqueries(&self) -> Vec<Arc<Command>> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let Expr::Subquery { command, .. } = e {
                out.push(command.clone());
            }
            true
        });
        out
    }

    /// Rename group scope names, including correlated references held by
    /// subqueries.
    pub fn rename_groups(&self, renames: &BTreeMap<String, String>) -> Expr {
        self.transform(&mut |e| match e {
            Expr::Column(symbol) => {
                let group = symbol.group.as_ref()?;
                renames.get(group).map(|new| Expr::Column(symbol.regrouped(new)))
            }
            Expr::Subquery { kind, command } => {
                let kind = match kind {
                    SubqueryKind::In { expr, negated } => SubqueryKind::In {
                        expr: Arc::new(expr.rename_groups(renames)),
                        negated: *negated,
                    },
                    other => other.clone(),
                };
                Some(Expr::Subquery {
                    kind,
                    command: Arc::new(command.rename_outer_refs(renames)),
                })
            }
            _ => None,
        })
    }
}

fn transform_list(list: &[Expr], f: &mut impl FnMut(&Expr) -> Option<Expr>) -> Option<Vec<Expr>> {
    let mut changed = false;
    let out: Vec<Expr> = list
        .iter()
        .map(|item| match item.transform_opt(f) {
            Some(new) => {
                changed = true;
                new
            }
            None => item.clone(),
        })
        .collect();
    changed.then_some(out)
}

/// Flatten nested AND into its conjuncts.
pub fn split_conjuncts(expr: &Expr) -> Vec<Expr> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut out = split_conjuncts(left);
            out.extend(split_conjuncts(right));
            out
        }
        other => vec![other.clone()],
    }
}

/// Left-deep AND of the given conjuncts; `None` when empty.
pub fn conjoin(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
    exprs.into_iter().reduce(Expr::and)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{AggregateFunction, GroupSymbol, ScalarValue};
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

    #[test]
    fn test_split_and_conjoin() {
        let expr = Expr::and(
            Expr::and(Expr::eq(col("a", "x"), lit(1)), Expr::eq(col("b", "y"), lit(2))),
            Expr::eq(col("a", "z"), lit(3)),
        );
        let parts = split_conjuncts(&expr);
        assert_eq!(parts.len(), 3);
        let rebuilt = conjoin(parts).unwrap();
        assert_eq!(split_conjuncts(&rebuilt).len(), 3);
        assert!(conjoin(Vec::new()).is_none());
    }

    #[test]
    fn test_groups_and_columns() {
        let expr = Expr::eq(col("a", "x"), col("b", "y"));
        let groups: Vec<String> = expr.groups().into_iter().collect();
        assert_eq!(groups, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(expr.columns().len(), 2);
    }

    #[test]
    fn test_substitute_shares_untouched_subtrees() {
        let untouched = Expr::eq(col("b", "y"), lit(2));
        let expr = Expr::and(Expr::eq(col("a", "x"), lit(1)), untouched.clone());
        let mut map = AHashMap::new();
        map.insert(col("a", "x"), lit(7));
        let out = expr.substitute(&map);
        assert_eq!(out.to_string(), "(7 = 1) AND (b.y = 2)");
        if let (Expr::BinaryOp { right: before, .. }, Expr::BinaryOp { right: after, .. }) = (&expr, &out) {
            assert!(Arc::ptr_eq(before, after));
        } else {
            panic!("Expected BinaryOp");
        }
    }

    #[test]
    fn test_aggregates_deduplicated() {
        let count = Expr::aggregate(AggregateFunction::Count, None, false);
        let expr = Expr::binary(count.clone(), BinaryOperator::Plus, count.clone());
        assert_eq!(expr.aggregates(), vec![count]);
        assert!(expr.contains_aggregate());
        assert!(!expr.contains_subquery());
    }

    #[test]
    fn test_rename_groups() {
        let mut renames = BTreeMap::new();
        renames.insert("a".to_string(), "v__a".to_string());
        let expr = Expr::eq(col("a", "x"), col("b", "y"));
        assert_eq!(expr.rename_groups(&renames).to_string(), "v__a.x = b.y");
    }
}
