//! LIMIT pushdown.
//!
//! Nested limits are combined. A limit travels through projections and
//! view boundaries until it meets the view's own limit. A limit the source
//! could not absorb still bounds the source query by `offset + count` rows,
//! and a limit over UNION ALL bounds each branch the same way.

use super::support::access_model;
use super::{OptimizationRule, RuleContext, Transformed};
use crate::capabilities::Capability;
use crate::command::SetOperator;
use crate::error::PlanResult;
use crate::plan::{BlockState, NodeId, NodeKind, NodeProps, PlanTree};

pub struct PushLimit;

impl OptimizationRule for PushLimit {
    fn name(&self) -> &'static str {
        "PushLimit"
    }

    fn targets(&self) -> &'static [NodeKind] {
        &[NodeKind::Limit]
    }

    fn apply(&self, tree: &mut PlanTree, node: NodeId, ctx: &RuleContext<'_>) -> PlanResult<Transformed> {
        let NodeProps::Limit { offset, count } = *tree.props(node)? else {
            return Ok(Transformed::no());
        };
        let Some(child) = tree.first_child(node) else {
            return Ok(Transformed::no());
        };
        let bound = count.map(|c| offset.saturating_add(c));

        match tree.props(child)?.clone() {
            NodeProps::Limit { .. } => {
                tree.merge(node, child)?;
                Ok(Transformed::yes([node]))
            }
            NodeProps::Access { model } => {
                let Some(bound) = bound else {
                    return Ok(Transformed::no());
                };
                if !ctx.oracle.supports_capability(&model, Capability::RowLimit) {
                    return Ok(Transformed::no());
                }
                let Some(top) = tree.first_child(child) else {
                    return Ok(Transformed::no());
                };
                if BlockState::of(tree, child).has_limit {
                    return tighten(tree, top, bound);
                }
                let limit = tree.add_node(NodeProps::Limit {
                    offset: 0,
                    count: Some(bound),
                });
                tree.insert_above(top, limit)?;
                Ok(Transformed::yes([limit]))
            }
            NodeProps::SetOp {
                op: SetOperator::Union,
                all: true,
            } => {
                let Some(bound) = bound else {
                    return Ok(Transformed::no());
                };
                let mut added = Vec::new();
                for branch in tree.children(child)? {
                    if bounded_by(tree, branch, bound) {
                        continue;
                    }
                    let limit = tree.add_node(NodeProps::Limit {
                        offset: 0,
                        count: Some(bound),
                    });
                    tree.insert_above(branch, limit)?;
                    added.push(limit);
                }
                if added.is_empty() {
                    return Ok(Transformed::no());
                }
                Ok(Transformed::yes(added))
            }
            NodeProps::Project { .. } => {
                let Some(input) = tree.first_child(child) else {
                    return Ok(Transformed::no());
                };
                // a source that already limits its rows gains nothing
                if access_model(tree, input).is_some() && BlockState::of(tree, input).has_limit {
                    return Ok(Transformed::no());
                }
                tree.remove_node(node)?;
                let moved = tree.add_node(NodeProps::Limit { offset, count });
                tree.insert_above(input, moved)?;
                Ok(Transformed::yes([moved, input]))
            }
            // the view renames its columns one to one
            NodeProps::Source(source) if source.is_virtual => {
                let Some(body) = tree.first_child(child) else {
                    return Ok(Transformed::no());
                };
                tree.remove_node(node)?;
                let moved = tree.add_node(NodeProps::Limit { offset, count });
                tree.insert_above(body, moved)?;
                Ok(Transformed::yes([moved]))
            }
            _ => Ok(Transformed::no()),
        }
    }
}

/// Lower the count of a plain row limit on top of a source query to the
/// rows the parent actually consumes.
fn tighten(tree: &mut PlanTree, top: NodeId, bound: u64) -> PlanResult<Transformed> {
    match tree.props_mut(top)? {
        NodeProps::Limit {
            offset: 0,
            count: Some(count),
        } if *count > bound => {
            *count = bound;
            Ok(Transformed::yes([top]))
        }
        _ => Ok(Transformed::no()),
    }
}

/// Whether the subtree already produces at most `bound` rows through a
/// limit reachable over row-preserving operators.
fn bounded_by(tree: &PlanTree, root: NodeId, bound: u64) -> bool {
    let mut current = Some(root);
    while let Some(id) = current {
        match tree.props(id) {
            Ok(NodeProps::Limit {
                count: Some(count), ..
            }) => return *count <= bound,
            Ok(NodeProps::Access { .. } | NodeProps::Project { .. }) => current = tree.first_child(id),
            _ => return false,
        }
    }
    false
}
