//! Transitive criteria across join keys.

use super::support::same_column;
use super::{OptimizationRule, RuleContext, Transformed};
use crate::command::JoinType;
use crate::error::PlanResult;
use crate::expr::{ElementSymbol, Expr, bound_column, equi_join_pairs, split_conjuncts};
use crate::plan::{NodeId, NodeKind, NodeProps, PlanTree};

/// For `a.x = b.y`, a binding `a.x = 5` (or `a.x IN (...)`) on one input is
/// copied as `b.y = 5` onto the other input. Left outer joins only copy
/// from the preserved side.
pub struct CopyCriteria;

impl OptimizationRule for CopyCriteria {
    fn name(&self) -> &'static str {
        "CopyCriteria"
    }

    fn targets(&self) -> &'static [NodeKind] {
        &[NodeKind::Join]
    }

    fn apply(&self, tree: &mut PlanTree, node: NodeId, _ctx: &RuleContext<'_>) -> PlanResult<Transformed> {
        let NodeProps::Join {
            join_type,
            criteria,
            strategy: None,
            ..
        } = tree.props(node)?
        else {
            return Ok(Transformed::no());
        };
        let directions: &[usize] = match join_type {
            JoinType::Inner => &[0, 1],
            JoinType::LeftOuter => &[0],
            _ => return Ok(Transformed::no()),
        };
        let children = tree.children(node)?;
        let (left, right) = (children[0], children[1]);
        let pairs: Vec<(ElementSymbol, ElementSymbol)> =
            equi_join_pairs(criteria, &tree.groups(left), &tree.groups(right))
                .into_iter()
                .filter_map(|(l, r)| Some((l.as_column()?.clone(), r.as_column()?.clone())))
                .collect();
        if pairs.is_empty() {
            return Ok(Transformed::no());
        }

        let bindings = [side_bindings(tree, left), side_bindings(tree, right)];
        let mut recheck = Vec::new();
        for &from in directions {
            let to = 1 - from;
            let mut copied: Vec<Expr> = Vec::new();
            for (l, r) in &pairs {
                let (source_key, target_key) = if from == 0 { (l, r) } else { (r, l) };
                for binding in &bindings[from] {
                    let Some(bound) = bound_column(binding) else { continue };
                    if !same_column(bound, source_key) {
                        continue;
                    }
                    let copy = binding.transform(&mut |e| match e {
                        Expr::Column(symbol) if same_column(symbol, source_key) => {
                            Some(Expr::Column(target_key.clone()))
                        }
                        _ => None,
                    });
                    if !bindings[to].contains(&copy) && !copied.contains(&copy) {
                        copied.push(copy);
                    }
                }
            }
            for conjunct in copied {
                let side = tree.child(node, to)?;
                let select = tree.add_node(NodeProps::select(conjunct));
                tree.insert_above(side, select)?;
                recheck.push(select);
            }
        }
        if recheck.is_empty() {
            return Ok(Transformed::no());
        }
        Ok(Transformed::yes(recheck))
    }
}

/// Literal bindings visible in one join input: WHERE conjuncts of its
/// filters, including those already inside Access nodes and nested inner
/// joins.
fn side_bindings(tree: &PlanTree, root: NodeId) -> Vec<Expr> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let Ok(node) = tree.node(id) else { continue };
        match &node.props {
            NodeProps::Select {
                criteria,
                is_having: false,
            } => {
                out.extend(
                    split_conjuncts(criteria)
                        .into_iter()
                        .filter(|c| !c.contains_dependent_set() && bound_column(c).is_some()),
                );
                stack.extend(node.children().iter().copied());
            }
            NodeProps::Access { .. } | NodeProps::Sort { .. } => {
                stack.extend(node.children().iter().copied())
            }
            NodeProps::Join {
                join_type: JoinType::Inner | JoinType::Cross,
                ..
            } => stack.extend(node.children().iter().copied()),
            _ => {}
        }
    }
    out
}
