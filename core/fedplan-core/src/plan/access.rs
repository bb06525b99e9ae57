//! Facts about the query block held by an Access node.

use std::collections::BTreeSet;

use super::node::{NodeId, NodeProps};
use super::tree::PlanTree;
use crate::command::JoinType;
use crate::expr::{BinaryOperator, Expr, GroupSymbol, bound_column, split_conjuncts};

/// Clauses already present in the top query block below an Access node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockState {
    pub has_limit: bool,
    pub has_sort: bool,
    pub has_distinct: bool,
    pub has_project: bool,
    pub has_grouping: bool,
    pub has_filter: bool,
    pub has_join: bool,
    pub is_set_op: bool,
    pub is_inline_view: bool,
    /// Top node of the block is a Limit.
    pub top_is_limit: bool,
}

impl BlockState {
    /// Only a FROM clause and WHERE criteria.
    pub fn is_plain(&self) -> bool {
        !(self.has_limit
            || self.has_sort
            || self.has_distinct
            || self.has_project
            || self.has_grouping
            || self.is_set_op)
    }

    pub fn of(tree: &PlanTree, access: NodeId) -> Self {
        let mut state = BlockState::default();
        let mut current = tree.first_child(access);
        let mut first = true;
        while let Some(id) = current {
            let Ok(node) = tree.node(id) else { break };
            let mut next = node.children().first().copied();
            match &node.props {
                NodeProps::Limit { .. } => {
                    state.has_limit = true;
                    state.top_is_limit |= first;
                }
                NodeProps::Sort { .. } => state.has_sort = true,
                NodeProps::DupRemove => state.has_distinct = true,
                NodeProps::Project { .. } => state.has_project = true,
                NodeProps::Select { .. } => state.has_filter = true,
                NodeProps::Grouping { .. } => state.has_grouping = true,
                NodeProps::SetOp { .. } => {
                    state.is_set_op = true;
                    next = None;
                }
                NodeProps::Join { .. } => {
                    state.has_join = true;
                    next = None;
                }
                NodeProps::Source(source) => {
                    state.is_inline_view = source.is_virtual;
                    next = None;
                }
                NodeProps::Access { .. } | NodeProps::Null { .. } => next = None,
            }
            first = false;
            current = next;
        }
        state
    }
}

/// `(group, column)` pairs bound by criteria somewhere in the subtree:
/// `col = literal`, `col IN (literals)`, dependent value sets, and columns
/// equated by join criteria that travel with them.
pub fn bound_columns(tree: &PlanTree, root: NodeId) -> BTreeSet<(String, String)> {
    let mut out = BTreeSet::new();
    let mut bind = |symbol: &crate::expr::ElementSymbol| {
        if let Some(group) = &symbol.group {
            out.insert((group.clone(), symbol.name.to_ascii_lowercase()));
        }
    };
    for id in tree.preorder(root) {
        match tree.props(id) {
            Ok(NodeProps::Select { criteria, .. }) => {
                for conjunct in split_conjuncts(criteria) {
                    if let Some(symbol) = bound_column(&conjunct) {
                        bind(symbol);
                    }
                }
            }
            Ok(NodeProps::Join {
                criteria,
                join_type,
                ..
            }) if *join_type != JoinType::FullOuter => {
                for conjunct in criteria {
                    if let Some(symbol) = bound_column(conjunct) {
                        bind(symbol);
                    }
                    if let Expr::BinaryOp {
                        left,
                        op: BinaryOperator::Eq,
                        right,
                    } = conjunct
                    {
                        for (this, other) in [(left, right), (right, left)] {
                            if let Some(symbol) = this.as_column()
                                && !other.groups().contains(symbol.group.as_deref().unwrap_or(""))
                            {
                                bind(symbol);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// Groups in the subtree whose access patterns are not met, with the
/// columns still missing from the closest pattern.
pub fn unmet_access_patterns(tree: &PlanTree, root: NodeId) -> Vec<(GroupSymbol, Vec<String>)> {
    let bound = bound_columns(tree, root);
    let mut out = Vec::new();
    for id in tree.preorder(root) {
        let Ok(NodeProps::Source(source)) = tree.props(id) else {
            continue;
        };
        if source.access_patterns.is_empty() {
            continue;
        }
        let missing_per_pattern = source.access_patterns.iter().map(|pattern| {
            pattern
                .iter()
                .filter(|column| {
                    !bound.contains(&(source.group.name.clone(), column.to_ascii_lowercase()))
                })
                .cloned()
                .collect::<Vec<_>>()
        });
        if let Some(missing) = missing_per_pattern.min_by_key(Vec::len)
            && !missing.is_empty()
        {
            out.push((source.group.clone(), missing));
        }
    }
    out
}
