//! Cardinality estimates.
//!
//! Estimates come from group cardinality hints only; an unknown input makes
//! the estimate unknown rather than zero.

use crate::command::JoinType;
use crate::expr::{BinaryOperator, Expr, equi_join_pairs, split_conjuncts};
use crate::plan::{NodeId, NodeProps, PlanTree};

const EQUALITY_SELECTIVITY: f64 = 0.1;
const RANGE_SELECTIVITY: f64 = 0.33;
const DEFAULT_SELECTIVITY: f64 = 0.5;

/// Fraction of rows expected to pass a conjunct.
pub fn selectivity(conjunct: &Expr) -> f64 {
    match conjunct {
        Expr::BinaryOp {
            op: BinaryOperator::Eq,
            ..
        } => EQUALITY_SELECTIVITY,
        Expr::BinaryOp { op, .. } if op.is_comparison() => RANGE_SELECTIVITY,
        Expr::InList {
            list,
            negated: false,
            ..
        } => (list.len() as f64 * EQUALITY_SELECTIVITY).min(1.0),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Or,
            right,
        } => (selectivity(left) + selectivity(right)).min(1.0),
        _ => DEFAULT_SELECTIVITY,
    }
}

/// Estimated output rows of a subtree.
pub fn estimate(tree: &PlanTree, id: NodeId) -> Option<f64> {
    let node = tree.node(id).ok()?;
    let child = |i: usize| tree.node(id).ok()?.children().get(i).and_then(|c| estimate(tree, *c));
    match &node.props {
        NodeProps::Source(source) if source.is_virtual => child(0),
        NodeProps::Source(source) => source.cardinality.map(|c| c as f64),
        NodeProps::Null { .. } => Some(0.0),
        NodeProps::Select { criteria, .. } => {
            let factor: f64 = split_conjuncts(criteria).iter().map(selectivity).product();
            child(0).map(|rows| rows * factor)
        }
        NodeProps::Project { .. } if node.children().is_empty() => Some(1.0),
        NodeProps::Grouping { group_by, .. } if group_by.is_empty() => Some(1.0),
        NodeProps::Limit { count, .. } => match (child(0), count) {
            (Some(rows), Some(count)) => Some(rows.min(*count as f64)),
            (None, Some(count)) => Some(*count as f64),
            (rows, None) => rows,
        },
        NodeProps::Join {
            join_type,
            criteria,
            ..
        } => {
            let left = child(0)?;
            let right = child(1)?;
            let keyed = {
                let (l, r) = (node.children()[0], node.children()[1]);
                !equi_join_pairs(criteria, &tree.groups(l), &tree.groups(r)).is_empty()
            };
            Some(match join_type {
                JoinType::Cross => left * right,
                _ if keyed => left.max(right),
                JoinType::LeftOuter => (left * right).max(left),
                _ => left * right,
            })
        }
        NodeProps::SetOp { op, .. } => {
            let left = child(0)?;
            let right = child(1)?;
            Some(match op {
                crate::command::SetOperator::Union => left + right,
                crate::command::SetOperator::Except => left,
                crate::command::SetOperator::Intersect => left.min(right),
            })
        }
        _ => child(0),
    }
}

/// Estimate rounded up to whole rows.
pub fn estimate_rows(tree: &PlanTree, id: NodeId) -> Option<u64> {
    estimate(tree, id).map(|rows| rows.ceil().max(0.0) as u64)
}
