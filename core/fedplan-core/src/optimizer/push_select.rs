//! Criteria pushdown.
//!
//! Moves a WHERE conjunct as close to the sources it references as the
//! operators in between allow:
//!
//! - through Sort, DupRemove and other Select nodes
//! - into an Access node when its model can evaluate the criteria
//! - into the side of a join holding every referenced group; a conjunct
//!   spanning both sides becomes join criteria
//! - into a view, positionally through its projections
//!
//! Null-rejecting criteria over the null-extended side of an outer join
//! turn the join into an inner (or left outer) join first.

use std::collections::{BTreeMap, BTreeSet};

use super::support::replace_group_columns;
use super::{OptimizationRule, RuleContext, Transformed};
use crate::command::JoinType;
use crate::error::PlanResult;
use crate::expr::{ElementSymbol, Expr, is_null_rejecting, split_conjuncts};
use crate::plan::{NodeId, NodeKind, NodeProps, PlanTree};

pub struct PushSelectCriteria;

enum Destination {
    /// Insert the criteria directly above this node.
    Above(NodeId),
    /// Criteria joined into this join's criteria.
    JoinCriteria(NodeId),
    /// Criteria rewritten into each of these view projections.
    View(Vec<(NodeId, Expr)>),
}

impl OptimizationRule for PushSelectCriteria {
    fn name(&self) -> &'static str {
        "PushSelectCriteria"
    }

    fn targets(&self) -> &'static [NodeKind] {
        &[NodeKind::Select]
    }

    fn apply(&self, tree: &mut PlanTree, node: NodeId, ctx: &RuleContext<'_>) -> PlanResult<Transformed> {
        let NodeProps::Select {
            criteria,
            is_having: false,
        } = tree.props(node)?
        else {
            return Ok(Transformed::no());
        };
        let criteria = criteria.clone();
        if criteria.contains_dependent_set() {
            return Ok(Transformed::no());
        }
        let groups = criteria.groups();
        if groups.is_empty() {
            return Ok(Transformed::no());
        }
        let Some(start) = tree.first_child(node) else {
            return Ok(Transformed::no());
        };

        let mut converted = Vec::new();
        let mut current = start;
        let destination = loop {
            let children = tree.children(current)?;
            match tree.props(current)?.clone() {
                NodeProps::Select { .. } | NodeProps::Sort { .. } | NodeProps::DupRemove => {
                    current = children[0];
                }
                NodeProps::Access { model } => {
                    match children.first() {
                        Some(child) if ctx.oracle.can_push_expr(&model, &criteria) => {
                            current = *child
                        }
                        _ => break Destination::Above(current),
                    }
                }
                NodeProps::Join {
                    join_type,
                    strategy: None,
                    ..
                } => {
                    let left = tree.groups(children[0]);
                    let right = tree.groups(children[1]);
                    match join_type {
                        JoinType::Inner | JoinType::Cross => {
                            if groups.is_subset(&left) {
                                current = children[0];
                            } else if groups.is_subset(&right) {
                                current = children[1];
                            } else if groups.iter().all(|g| left.contains(g) || right.contains(g)) {
                                break Destination::JoinCriteria(current);
                            } else {
                                break Destination::Above(current);
                            }
                        }
                        JoinType::LeftOuter => {
                            if groups.is_subset(&left) {
                                current = children[0];
                            } else if is_null_rejecting(&criteria, &right) {
                                set_join_type(tree, current, JoinType::Inner)?;
                                converted.push(current);
                            } else {
                                break Destination::Above(current);
                            }
                        }
                        JoinType::FullOuter => {
                            let rejects_left = is_null_rejecting(&criteria, &left);
                            let rejects_right = is_null_rejecting(&criteria, &right);
                            match (rejects_left, rejects_right) {
                                (true, true) => set_join_type(tree, current, JoinType::Inner)?,
                                // rows missing a left match are dropped
                                (true, false) => set_join_type(tree, current, JoinType::LeftOuter)?,
                                (false, true) => {
                                    swap_children(tree, current)?;
                                    set_join_type(tree, current, JoinType::LeftOuter)?;
                                }
                                (false, false) => break Destination::Above(current),
                            }
                            converted.push(current);
                        }
                        JoinType::RightOuter => break Destination::Above(current),
                    }
                }
                NodeProps::Source(source) if source.is_virtual => {
                    match view_targets(tree, current, &source.group.name, &source.elements, &criteria)? {
                        Some(targets) => break Destination::View(targets),
                        None => break Destination::Above(current),
                    }
                }
                _ => break Destination::Above(current),
            }
        };

        match destination {
            Destination::Above(target) => {
                let mut first = start;
                while let Ok(NodeProps::Select { .. }) = tree.props(first) {
                    match tree.first_child(first) {
                        Some(child) => first = child,
                        None => break,
                    }
                }
                if target == first && converted.is_empty() {
                    return Ok(Transformed::no());
                }
                tree.remove_node(node)?;
                let moved = tree.add_node(NodeProps::select(criteria));
                tree.insert_above(target, moved)?;
                converted.push(moved);
                Ok(Transformed::yes(converted))
            }
            Destination::JoinCriteria(join) => {
                if let NodeProps::Join {
                    join_type,
                    criteria: existing,
                    ..
                } = tree.props_mut(join)?
                {
                    for conjunct in split_conjuncts(&criteria) {
                        if !existing.contains(&conjunct) {
                            existing.push(conjunct);
                        }
                    }
                    if *join_type == JoinType::Cross {
                        *join_type = JoinType::Inner;
                    }
                }
                tree.remove_node(node)?;
                converted.push(join);
                converted.extend(tree.children(join)?);
                Ok(Transformed::yes(converted))
            }
            Destination::View(targets) => {
                tree.remove_node(node)?;
                for (project, rewritten) in targets {
                    let child = tree.child(project, 0)?;
                    let select = tree.add_node(NodeProps::select(rewritten));
                    tree.insert_above(child, select)?;
                    converted.push(select);
                }
                Ok(Transformed::yes(converted))
            }
        }
    }
}

fn set_join_type(tree: &mut PlanTree, join: NodeId, new: JoinType) -> PlanResult<()> {
    if let NodeProps::Join { join_type, .. } = tree.props_mut(join)? {
        *join_type = new;
    }
    Ok(())
}

fn swap_children(tree: &mut PlanTree, join: NodeId) -> PlanResult<()> {
    let node = tree.node_mut(join)?;
    node.children.swap(0, 1);
    Ok(())
}

/// Projections inside a view where the criteria can be placed, with the
/// criteria rewritten over each projection's input.
fn view_targets(
    tree: &PlanTree,
    view: NodeId,
    group: &str,
    elements: &[ElementSymbol],
    criteria: &Expr,
) -> PlanResult<Option<Vec<(NodeId, Expr)>>> {
    if criteria.contains_aggregate() || criteria.contains_subquery() {
        return Ok(None);
    }
    let Some(root) = tree.first_child(view) else {
        return Ok(None);
    };
    let mut targets = Vec::new();
    if !collect_view_targets(tree, root, group, elements, criteria, &mut targets)? {
        return Ok(None);
    }
    Ok(Some(targets))
}

fn collect_view_targets(
    tree: &PlanTree,
    id: NodeId,
    group: &str,
    elements: &[ElementSymbol],
    criteria: &Expr,
    out: &mut Vec<(NodeId, Expr)>,
) -> PlanResult<bool> {
    let children = tree.children(id)?;
    match tree.props(id)? {
        NodeProps::DupRemove | NodeProps::Sort { .. } => {
            collect_view_targets(tree, children[0], group, elements, criteria, out)
        }
        // a filter commutes with every set operator when applied to both inputs
        NodeProps::SetOp { .. } => {
            for child in children {
                if !collect_view_targets(tree, child, group, elements, criteria, out)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        NodeProps::Project { columns } if !children.is_empty() && columns.len() == elements.len() => {
            // over grouping the criteria would need HAVING semantics
            if matches!(
                tree.props(children[0])?,
                NodeProps::Grouping { .. } | NodeProps::Select { is_having: true, .. }
            ) {
                return Ok(false);
            }
            let by_name: BTreeMap<String, Expr> = elements
                .iter()
                .zip(columns.iter())
                .map(|(element, column)| (element.name.to_ascii_lowercase(), column.expr.clone()))
                .collect();
            let rewritten = replace_group_columns(criteria, group, &by_name);
            if rewritten.contains_aggregate() || rewritten.contains_subquery() {
                return Ok(false);
            }
            let leftover: BTreeSet<String> = rewritten.groups();
            if leftover.contains(group) {
                return Ok(false);
            }
            out.push((id, rewritten));
            Ok(true)
        }
        _ => Ok(false),
    }
}
