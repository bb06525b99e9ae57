//! Inline simple views into the enclosing query.

use std::collections::BTreeMap;

use super::support::{child_index_toward, replace_group_columns};
use super::{OptimizationRule, RuleContext, Transformed};
use crate::command::JoinType;
use crate::error::PlanResult;
use crate::plan::{NodeId, NodeKind, NodeProps, PlanTree};

/// Replaces a view whose definition is a projection over filters and joins
/// with the definition itself, substituting the view's columns above it.
///
/// Views with grouping, DISTINCT, ORDER BY, LIMIT or set operations stay
/// as inline views.
pub struct MergeVirtual;

impl OptimizationRule for MergeVirtual {
    fn name(&self) -> &'static str {
        "MergeVirtual"
    }

    fn targets(&self) -> &'static [NodeKind] {
        &[NodeKind::Source]
    }

    fn apply(&self, tree: &mut PlanTree, node: NodeId, _ctx: &RuleContext<'_>) -> PlanResult<Transformed> {
        let NodeProps::Source(source) = tree.props(node)? else {
            return Ok(Transformed::no());
        };
        if !source.is_virtual {
            return Ok(Transformed::no());
        }
        let view = source.group.name.clone();
        let elements = source.elements.clone();

        let Some(project) = tree.first_child(node) else {
            return Ok(Transformed::no());
        };
        let NodeProps::Project { columns } = tree.props(project)? else {
            return Ok(Transformed::no());
        };
        let columns = columns.clone();
        let Some(body) = tree.first_child(project) else {
            return Ok(Transformed::no());
        };
        if columns.len() != elements.len() || !mergeable_body(tree, body) {
            return Ok(Transformed::no());
        }

        let ancestors = tree.ancestors(node);
        // literals and expressions would not turn NULL on the null-extended side
        let nullable = ancestors.iter().any(|a| match tree.props(*a) {
            Ok(NodeProps::Join { join_type, .. }) => match join_type {
                JoinType::FullOuter => true,
                JoinType::LeftOuter => child_index_toward(tree, *a, node) == Some(1),
                _ => false,
            },
            _ => false,
        });
        if nullable && !columns.iter().all(|c| c.expr.is_column()) {
            return Ok(Transformed::no());
        }
        let correlated = ancestors.iter().any(|a| {
            tree.props(*a).is_ok_and(|props| {
                props.exprs().into_iter().any(|e| {
                    e.subqueries().iter().any(|command| {
                        command
                            .outer_refs()
                            .iter()
                            .any(|r| r.group.as_deref() == Some(view.as_str()))
                    })
                })
            })
        });
        if correlated {
            return Ok(Transformed::no());
        }

        let by_name: BTreeMap<String, _> = elements
            .iter()
            .zip(columns.iter())
            .map(|(element, column)| (element.name.to_ascii_lowercase(), column.expr.clone()))
            .collect();
        for ancestor in &ancestors {
            tree.props_mut(*ancestor)?
                .map_exprs(&mut |e| replace_group_columns(e, &view, &by_name));
        }
        tree.detach(body)?;
        tree.replace(node, body)?;
        tree.delete_subtree(node)?;

        let mut recheck = ancestors;
        recheck.extend(tree.preorder(body));
        Ok(Transformed::yes(recheck))
    }
}

/// Only WHERE criteria and joins over sources.
fn mergeable_body(tree: &PlanTree, root: NodeId) -> bool {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let Ok(node) = tree.node(id) else {
            return false;
        };
        match &node.props {
            NodeProps::Select {
                is_having: false, ..
            }
            | NodeProps::Join { .. }
            | NodeProps::Access { .. } => stack.extend(node.children().iter().copied()),
            // nested views are leaves here
            NodeProps::Source(_) => {}
            _ => return false,
        }
    }
    true
}
