//! Dead branch elimination.
//!
//! A contradiction or `LIMIT 0` becomes a Null node, and Null nodes are
//! raised through their parents as far as the parent's semantics allow.

use std::collections::BTreeSet;

use ahash::AHashMap;

use super::support::{null_group_columns, rewrite_to_projection};
use super::{OptimizationRule, RuleContext, Transformed};
use crate::command::{JoinType, SetOperator};
use crate::error::PlanResult;
use crate::expr::{ElementSymbol, Expr, is_statically_false, is_statically_true};
use crate::plan::{NodeId, NodeKind, NodeProps, PlanTree};

pub struct RaiseNull;

impl OptimizationRule for RaiseNull {
    fn name(&self) -> &'static str {
        "RaiseNull"
    }

    fn targets(&self) -> &'static [NodeKind] {
        &[NodeKind::Select, NodeKind::Limit, NodeKind::Null]
    }

    fn apply(&self, tree: &mut PlanTree, node: NodeId, _ctx: &RuleContext<'_>) -> PlanResult<Transformed> {
        match tree.props(node)? {
            NodeProps::Select { criteria, .. } => {
                if is_statically_false(criteria) {
                    let null = nullify(tree, node)?;
                    Ok(Transformed::yes([null]))
                } else if is_statically_true(criteria) && tree.first_child(node).is_some() {
                    let parent = tree.parent(node);
                    tree.remove_node(node)?;
                    Ok(Transformed::yes(parent))
                } else {
                    Ok(Transformed::no())
                }
            }
            NodeProps::Limit { count: Some(0), .. } => {
                let null = nullify(tree, node)?;
                Ok(Transformed::yes([null]))
            }
            NodeProps::Null { .. } => raise(tree, node),
            _ => Ok(Transformed::no()),
        }
    }
}

/// Replace a subtree with a Null node of the same schema.
fn nullify(tree: &mut PlanTree, id: NodeId) -> PlanResult<NodeId> {
    let outputs = tree.natural_outputs(id)?;
    let groups = tree.groups(id);
    let null = tree.add_node(NodeProps::Null { outputs, groups });
    tree.replace(id, null)?;
    tree.delete_subtree(id)?;
    Ok(null)
}

/// `survivor` takes the place of `parent`, which is dropped with the rest of
/// its subtree.
fn promote(tree: &mut PlanTree, parent: NodeId, survivor: NodeId) -> PlanResult<()> {
    tree.detach(survivor)?;
    tree.replace(parent, survivor)?;
    tree.delete_subtree(parent)
}

fn raise(tree: &mut PlanTree, null: NodeId) -> PlanResult<Transformed> {
    let Some(parent) = tree.parent(null) else {
        return Ok(Transformed::no());
    };
    let NodeProps::Null {
        groups: null_groups,
        ..
    } = tree.props(null)?
    else {
        return Ok(Transformed::no());
    };
    let null_groups = null_groups.clone();
    let children = tree.children(parent)?;
    let index = children.iter().position(|c| *c == null).unwrap_or(0);

    match tree.props(parent)?.clone() {
        NodeProps::Select { .. }
        | NodeProps::Sort { .. }
        | NodeProps::DupRemove
        | NodeProps::Limit { .. }
        | NodeProps::Access { .. }
        | NodeProps::Project { .. }
        | NodeProps::Source(_) => {
            let raised = nullify(tree, parent)?;
            Ok(Transformed::yes([raised]))
        }
        NodeProps::Grouping { group_by, .. } if group_by.is_empty() => {
            // a global aggregate over no rows still yields one row
            let aggregates = collect_aggregates(tree, parent);
            let identities: AHashMap<Expr, Expr> = aggregates
                .into_iter()
                .map(|aggregate| {
                    let identity = match &aggregate {
                        Expr::Aggregate { func, .. } => func.identity(&aggregate.data_type()),
                        other => Expr::TypedNull(other.data_type()),
                    };
                    (aggregate, identity)
                })
                .collect();
            let touched = rewrite_to_projection(tree, parent, &mut |e| e.substitute(&identities))?;
            let single_row = tree.add_node(NodeProps::Project { columns: vec![] });
            tree.replace(parent, single_row)?;
            tree.delete_subtree(parent)?;
            let mut recheck = touched;
            recheck.push(single_row);
            Ok(Transformed::yes(recheck))
        }
        NodeProps::Grouping { .. } => {
            let raised = nullify(tree, parent)?;
            Ok(Transformed::yes([raised]))
        }
        NodeProps::Join { join_type, .. } => match (join_type, index) {
            (JoinType::LeftOuter, 1) | (JoinType::FullOuter, _) => {
                let survivor = children[1 - index];
                outer_survivor(tree, parent, survivor, &null_groups)
            }
            _ => {
                let raised = nullify(tree, parent)?;
                Ok(Transformed::yes([raised]))
            }
        },
        NodeProps::SetOp { op, all } => {
            let other = children[1 - index];
            let other_is_null = matches!(tree.props(other)?, NodeProps::Null { .. });
            match op {
                _ if other_is_null => {
                    let raised = nullify(tree, parent)?;
                    Ok(Transformed::yes([raised]))
                }
                SetOperator::Union => {
                    if index == 0 {
                        // the left input named the union's columns
                        let names: Vec<String> = tree
                            .natural_outputs(null)?
                            .iter()
                            .map(Expr::output_name)
                            .collect();
                        rename_outputs(tree, other, &names)?;
                    }
                    set_survivor(tree, parent, other, all)
                }
                SetOperator::Except if index == 1 => set_survivor(tree, parent, other, all),
                SetOperator::Except | SetOperator::Intersect => {
                    let raised = nullify(tree, parent)?;
                    Ok(Transformed::yes([raised]))
                }
            }
        }
        NodeProps::Null { .. } => Ok(Transformed::no()),
    }
}

/// Drop an outer join whose null-extended input is empty; references to
/// that input become NULL.
fn outer_survivor(
    tree: &mut PlanTree,
    join: NodeId,
    survivor: NodeId,
    null_groups: &BTreeSet<String>,
) -> PlanResult<Transformed> {
    let touched = rewrite_to_projection(tree, join, &mut |e| null_group_columns(e, null_groups))?;
    promote(tree, join, survivor)?;
    let mut recheck = touched;
    recheck.push(survivor);
    Ok(Transformed::yes(recheck))
}

fn set_survivor(tree: &mut PlanTree, set_op: NodeId, survivor: NodeId, all: bool) -> PlanResult<Transformed> {
    promote(tree, set_op, survivor)?;
    let mut recheck = tree.ancestors(survivor);
    if !all {
        let distinct = tree.add_node(NodeProps::DupRemove);
        tree.insert_above(survivor, distinct)?;
        recheck.push(distinct);
    }
    recheck.push(survivor);
    Ok(Transformed::yes(recheck))
}

/// Aggregates computed by a Grouping node, as referenced above it.
fn collect_aggregates(tree: &PlanTree, grouping: NodeId) -> Vec<Expr> {
    match tree.props(grouping) {
        Ok(NodeProps::Grouping { aggregates, .. }) => aggregates.clone(),
        _ => vec![],
    }
}

/// Give the columns produced by a set operation input new names, renaming
/// through the operators that pass names up unchanged.
fn rename_outputs(tree: &mut PlanTree, id: NodeId, names: &[String]) -> PlanResult<()> {
    let mut renames: Vec<(ElementSymbol, ElementSymbol)> = Vec::new();
    let mut path = Vec::new();
    let mut current = id;
    loop {
        path.push(current);
        match tree.props_mut(current)? {
            NodeProps::Project { columns } => {
                for (column, name) in columns.iter_mut().zip(names) {
                    let old = column.symbol();
                    column.name = name.clone();
                    renames.push((old, column.symbol()));
                }
                break;
            }
            NodeProps::Null { outputs, .. } => {
                for (output, name) in outputs.iter_mut().zip(names) {
                    if let Expr::Column(symbol) = output
                        && symbol.is_derived()
                    {
                        let old = symbol.clone();
                        symbol.name = name.clone();
                        renames.push((old, symbol.clone()));
                    }
                }
                break;
            }
            NodeProps::DupRemove
            | NodeProps::Sort { .. }
            | NodeProps::Limit { .. }
            | NodeProps::Access { .. }
            | NodeProps::SetOp { .. } => match tree.first_child(current) {
                Some(child) => current = child,
                None => break,
            },
            _ => break,
        }
    }
    if renames.is_empty() {
        return Ok(());
    }
    let map: AHashMap<Expr, Expr> = renames
        .into_iter()
        .map(|(old, new)| (Expr::Column(old), Expr::Column(new)))
        .collect();
    // sorts between the projection and the top refer to the old names
    for node in path {
        if let NodeProps::Sort { items } = tree.props_mut(node)? {
            for item in items {
                item.expr = item.expr.substitute(&map);
            }
        }
    }
    Ok(())
}
