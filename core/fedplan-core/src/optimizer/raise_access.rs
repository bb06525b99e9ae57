//! Grow source queries upward.
//!
//! An Access node is lifted above its parent whenever the model can
//! evaluate the parent as part of the same query block. Lifting over a join
//! or set operation absorbs the Access node of the other input, which must
//! be in the same pushdown domain and hold nothing the model cannot
//! evaluate.

use std::collections::BTreeSet;

use super::support::access_model;
use super::{OptimizationRule, RuleContext, Transformed};
use crate::capabilities::{Capability, CapabilityOracle};
use crate::command::JoinType;
use crate::error::{PlanError, PlanResult};
use crate::expr::Expr;
use crate::plan::{BlockState, NodeId, NodeKind, NodeProps, PlanTree};

pub struct RaiseAccess;

impl OptimizationRule for RaiseAccess {
    fn name(&self) -> &'static str {
        "RaiseAccess"
    }

    fn targets(&self) -> &'static [NodeKind] {
        &[NodeKind::Access]
    }

    fn apply(&self, tree: &mut PlanTree, node: NodeId, ctx: &RuleContext<'_>) -> PlanResult<Transformed> {
        let Some(model) = access_model(tree, node) else {
            return Ok(Transformed::no());
        };
        let Some(parent) = tree.parent(node) else {
            return Ok(Transformed::no());
        };
        let oracle = ctx.oracle;
        let block = BlockState::of(tree, node);
        let supports = |capability| oracle.supports_capability(&model, capability);
        let pushable = |e: &Expr| oracle.can_push_expr(&model, e);

        match tree.props(parent)?.clone() {
            NodeProps::Access { .. } => {
                tree.merge(parent, node)?;
                Ok(Transformed::yes([parent]))
            }
            NodeProps::Select {
                criteria,
                is_having,
            } => {
                if select_fits(&block, is_having, &model, oracle) && pushable(&criteria) {
                    return lifted(tree, node, parent);
                }
                hoist_pushable_select(tree, node, parent, is_having, &block, &model, oracle)
            }
            NodeProps::Join {
                join_type,
                criteria,
                strategy: None,
                ..
            } => {
                let children = tree.children(parent)?;
                let other = if children[0] == node { children[1] } else { children[0] };
                let Some(other_model) = access_model(tree, other) else {
                    return Ok(Transformed::no());
                };
                let left = BlockState::of(tree, children[0]);
                let right = BlockState::of(tree, children[1]);
                let fits = oracle.same_domain(&model, &other_model)
                    && oracle.supports_join(&model, join_type)
                    && criteria.iter().all(pushable)
                    && absorbable(tree, other, &model, oracle)
                    && left.is_plain()
                    && right.is_plain()
                    && (join_type != JoinType::FullOuter || !(left.has_filter || right.has_filter));
                if !fits {
                    return Ok(Transformed::no());
                }
                let (left_groups, right_groups) = (tree.groups(children[0]), tree.groups(children[1]));
                if let Some(clash) = left_groups.intersection(&right_groups).next() {
                    return Err(PlanError::IncompatibleMerge {
                        into: NodeKind::Access.to_string(),
                        from: NodeKind::Access.to_string(),
                        reason: format!("group '{clash}' appears in both join inputs"),
                    });
                }
                let self_join = !definitions(tree, children[0]).is_disjoint(&definitions(tree, children[1]));
                if self_join && !(supports(Capability::JoinSelfJoin) && supports(Capability::FromGroupAlias)) {
                    return Ok(Transformed::no());
                }
                tree.remove_node(other)?;
                lifted(tree, node, parent)
            }
            NodeProps::Grouping {
                group_by,
                aggregates,
            } => {
                let fits = block.is_plain()
                    && (group_by.is_empty() || supports(Capability::GroupBy))
                    && (group_by.iter().all(Expr::is_column) || supports(Capability::GroupByFunctions))
                    && group_by.iter().chain(aggregates.iter()).all(pushable);
                if fits {
                    lifted(tree, node, parent)
                } else {
                    Ok(Transformed::no())
                }
            }
            NodeProps::Project { columns } => {
                let fits = !(block.has_project
                    || block.is_set_op
                    || block.has_limit
                    || block.has_sort
                    || block.has_distinct)
                    && columns.iter().all(|c| pushable(&c.expr))
                    && (columns
                        .iter()
                        .all(|c| matches!(c.expr, Expr::Column(_) | Expr::Aggregate { .. }))
                        || supports(Capability::SelectExpression));
                if fits {
                    lifted(tree, node, parent)
                } else {
                    Ok(Transformed::no())
                }
            }
            NodeProps::DupRemove => {
                let fits = supports(Capability::SelectDistinct)
                    && block.has_project
                    && !(block.has_limit || block.has_distinct || block.has_sort || block.is_set_op);
                if fits {
                    lifted(tree, node, parent)
                } else {
                    Ok(Transformed::no())
                }
            }
            NodeProps::Sort { items } => {
                let capability = if block.is_set_op {
                    Capability::SetOrderBy
                } else {
                    Capability::OrderBy
                };
                let on_outputs = items
                    .iter()
                    .all(|i| i.expr.as_column().is_some_and(|s| s.is_derived()));
                let references_outputs = items.iter().any(|i| {
                    i.expr.columns().iter().any(|s| s.is_derived())
                });
                let fits = supports(capability)
                    && !(block.has_limit || block.has_sort)
                    && items.iter().all(|i| pushable(&i.expr))
                    && (!references_outputs || block.has_project || block.is_set_op)
                    && (on_outputs || !(block.has_distinct || block.is_set_op));
                if fits {
                    lifted(tree, node, parent)
                } else {
                    Ok(Transformed::no())
                }
            }
            NodeProps::Limit { offset, count } => {
                let fits = (count.is_none() || supports(Capability::RowLimit))
                    && (offset == 0 || supports(Capability::RowOffset))
                    && (!block.has_limit || block.top_is_limit);
                if !fits {
                    return Ok(Transformed::no());
                }
                let inner = tree.first_child(node).filter(|_| block.top_is_limit);
                let raised = lift(tree, node, parent)?;
                if let Some(inner) = inner {
                    tree.merge(parent, inner)?;
                }
                Ok(Transformed::yes([raised, parent]))
            }
            NodeProps::SetOp { op, .. } => {
                let children = tree.children(parent)?;
                let other = if children[0] == node { children[1] } else { children[0] };
                let Some(other_model) = access_model(tree, other) else {
                    return Ok(Transformed::no());
                };
                let left = BlockState::of(tree, children[0]);
                let right = BlockState::of(tree, children[1]);
                let types = |id: NodeId| -> PlanResult<Vec<_>> {
                    Ok(tree
                        .natural_outputs(id)?
                        .iter()
                        .map(Expr::data_type)
                        .collect())
                };
                let fits = oracle.same_domain(&model, &other_model)
                    && oracle.supports_set_op(&model, op)
                    && !(left.has_sort || left.has_limit || right.has_sort || right.has_limit)
                    && types(children[0])? == types(children[1])?
                    && absorbable(tree, other, &model, oracle);
                if !fits {
                    return Ok(Transformed::no());
                }
                tree.remove_node(other)?;
                lifted(tree, node, parent)
            }
            NodeProps::Source(source) if source.is_virtual => {
                if supports(Capability::FromInlineViews) {
                    lifted(tree, node, parent)
                } else {
                    Ok(Transformed::no())
                }
            }
            _ => Ok(Transformed::no()),
        }
    }
}

/// Move the Access node above `parent`; returns the new Access node.
fn lift(tree: &mut PlanTree, access: NodeId, parent: NodeId) -> PlanResult<NodeId> {
    let props = tree.props(access)?.clone();
    tree.remove_node(access)?;
    let raised = tree.add_node(props);
    tree.insert_above(parent, raised)?;
    Ok(raised)
}

fn lifted(tree: &mut PlanTree, access: NodeId, parent: NodeId) -> PlanResult<Transformed> {
    let raised = lift(tree, access, parent)?;
    Ok(Transformed::yes([raised, parent]))
}

fn select_fits(block: &BlockState, is_having: bool, model: &str, oracle: &CapabilityOracle) -> bool {
    let closed = block.has_project || block.has_limit || block.has_distinct || block.is_set_op;
    if closed {
        return false;
    }
    if is_having {
        block.has_grouping && oracle.supports_capability(model, Capability::Having)
    } else {
        !block.has_grouping
    }
}

/// A criteria node the model cannot take may sit between the Access node
/// and criteria it can take; move the first such pushable criteria down
/// next to the Access node.
fn hoist_pushable_select(
    tree: &mut PlanTree,
    access: NodeId,
    parent: NodeId,
    is_having: bool,
    block: &BlockState,
    model: &str,
    oracle: &CapabilityOracle,
) -> PlanResult<Transformed> {
    if !select_fits(block, is_having, model, oracle) {
        return Ok(Transformed::no());
    }
    let mut current = tree.parent(parent);
    while let Some(id) = current {
        let NodeProps::Select {
            criteria,
            is_having: having,
        } = tree.props(id)?
        else {
            break;
        };
        if *having != is_having {
            break;
        }
        if oracle.can_push_expr(model, criteria) {
            let props = tree.props(id)?.clone();
            tree.remove_node(id)?;
            let moved = tree.add_node(props);
            tree.insert_above(access, moved)?;
            return Ok(Transformed::yes([access]));
        }
        current = tree.parent(id);
    }
    Ok(Transformed::no())
}

/// Whether `model` can evaluate every clause and expression of the query
/// block held by another Access node.
fn absorbable(tree: &PlanTree, access: NodeId, model: &str, oracle: &CapabilityOracle) -> bool {
    let supports = |capability| oracle.supports_capability(model, capability);
    tree.preorder(access).into_iter().skip(1).all(|id| {
        let Ok(props) = tree.props(id) else {
            return false;
        };
        let clause = match props {
            NodeProps::Select { is_having, .. } => !is_having || supports(Capability::Having),
            NodeProps::Join { join_type, .. } => oracle.supports_join(model, *join_type),
            NodeProps::Grouping { group_by, .. } => {
                (group_by.is_empty() || supports(Capability::GroupBy))
                    && (group_by.iter().all(Expr::is_column) || supports(Capability::GroupByFunctions))
            }
            NodeProps::Project { columns } => {
                columns
                    .iter()
                    .all(|c| matches!(c.expr, Expr::Column(_) | Expr::Aggregate { .. }))
                    || supports(Capability::SelectExpression)
            }
            NodeProps::DupRemove => supports(Capability::SelectDistinct),
            NodeProps::Sort { .. } => supports(Capability::OrderBy),
            NodeProps::Limit { offset, count } => {
                (count.is_none() || supports(Capability::RowLimit))
                    && (*offset == 0 || supports(Capability::RowOffset))
            }
            NodeProps::SetOp { op, .. } => oracle.supports_set_op(model, *op),
            NodeProps::Source(source) => !source.is_virtual || supports(Capability::FromInlineViews),
            NodeProps::Access { .. } | NodeProps::Null { .. } => false,
        };
        clause && props.exprs().into_iter().all(|e| oracle.can_push_expr(model, e))
    })
}

/// Metadata names of the groups under a join input.
fn definitions(tree: &PlanTree, root: NodeId) -> BTreeSet<String> {
    tree.preorder(root)
        .into_iter()
        .filter_map(|id| match tree.props(id) {
            Ok(NodeProps::Source(source)) => Some(source.group.definition.to_ascii_lowercase()),
            _ => None,
        })
        .collect()
}
