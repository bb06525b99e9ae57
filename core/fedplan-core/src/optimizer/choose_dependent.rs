//! Dependent join selection.
//!
//! One join input (the dependent side) receives the distinct key values of
//! the other as `IN` criteria at runtime. Chosen when the dependent side
//! needs the values for its access patterns, when a MAKEDEP hint names it,
//! or when the independent side is small compared with the dependent side.

use std::sync::Arc;

use tracing::{debug, warn};

use super::cost::estimate_rows;
use super::support::{access_below, access_model, locate_source, pushed_down};
use super::{OptimizationRule, RuleContext, Transformed};
use crate::capabilities::{Capability, CapabilityOracle};
use crate::command::JoinType;
use crate::error::{PlanError, PlanResult};
use crate::expr::{Expr, equi_join_pairs};
use crate::plan::{
    DependentJoin, JoinSide, JoinStrategy, NodeId, NodeKind, NodeProps, PlanTree,
    unmet_access_patterns,
};

pub struct ChooseDependent;

/// Why a side was made dependent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    AccessPattern,
    Hint,
    Cost,
}

impl OptimizationRule for ChooseDependent {
    fn name(&self) -> &'static str {
        "ChooseDependent"
    }

    fn targets(&self) -> &'static [NodeKind] {
        &[NodeKind::Join]
    }

    fn apply(&self, tree: &mut PlanTree, node: NodeId, ctx: &RuleContext<'_>) -> PlanResult<Transformed> {
        let NodeProps::Join {
            join_type,
            criteria,
            strategy: None,
            dependent_hint,
            ..
        } = tree.props(node)?
        else {
            return Ok(Transformed::no());
        };
        if pushed_down(tree, node) {
            return Ok(Transformed::no());
        }
        let candidates: &[JoinSide] = match join_type {
            JoinType::Inner => &[JoinSide::Right, JoinSide::Left],
            // the preserved side cannot be restricted
            JoinType::LeftOuter => &[JoinSide::Right],
            _ => return Ok(Transformed::no()),
        };
        let dependent_hint = *dependent_hint;
        let criteria = criteria.clone();
        let children = tree.children(node)?;
        let groups = [tree.groups(children[0]), tree.groups(children[1])];
        let pairs = equi_join_pairs(&criteria, &groups[0], &groups[1]);

        let Some((dependent, trigger)) = choose_side(tree, &children, candidates, dependent_hint, ctx) else {
            return Ok(Transformed::no());
        };
        let independent = dependent.other();
        let (independent_keys, dependent_keys): (Vec<Expr>, Vec<Expr>) = pairs
            .into_iter()
            .map(|(l, r)| match dependent {
                JoinSide::Right => (l, r),
                JoinSide::Left => (r, l),
            })
            .filter(|(_, d)| d.is_column())
            .unzip();

        let dependent_root = children[dependent.index()];
        let placement = feasible(tree, dependent_root, &dependent_keys, ctx.oracle);
        let Some((model, sources)) = placement else {
            if trigger == Trigger::AccessPattern {
                let (group, columns) = match unmet_access_patterns(tree, dependent_root).first() {
                    Some((group, columns)) => (group.name.clone(), columns.clone()),
                    None => (
                        groups[dependent.index()].iter().next().cloned().unwrap_or_default(),
                        dependent_keys.iter().map(Expr::output_name).collect(),
                    ),
                };
                return Err(PlanError::AccessPatternNotSatisfied { group, columns });
            }
            if trigger == Trigger::Hint {
                warn!(
                    target: "fedplan::optimizer",
                    join = node.index(),
                    "MAKEDEP hint ignored: dependent side cannot take value criteria"
                );
            }
            return Ok(Transformed::no());
        };

        let cap = ctx.oracle.in_list_cap(&model);
        let mut slots = Vec::with_capacity(dependent_keys.len());
        let mut recheck = Vec::new();
        for (key, source) in dependent_keys.iter().zip(sources) {
            let slot = tree.next_dependent_id();
            let select = tree.add_node(NodeProps::select(Expr::DependentSet {
                expr: Arc::new(key.clone()),
                source: slot,
                max_values: cap,
            }));
            tree.insert_above(source, select)?;
            slots.push(slot);
            recheck.push(select);
        }
        let independent_estimate = estimate_rows(tree, children[independent.index()]);
        let expected_batches = independent_estimate.map(|rows| rows.div_ceil(cap as u64));
        debug!(
            target: "fedplan::optimizer",
            join = node.index(),
            ?trigger,
            independent = %independent,
            cap,
            "dependent join chosen"
        );
        if let NodeProps::Join { strategy, .. } = tree.props_mut(node)? {
            *strategy = Some(JoinStrategy::DependentSemiJoin(DependentJoin {
                independent,
                sources: slots,
                independent_keys,
                dependent_keys,
                independent_estimate,
                max_in_list: cap,
                expected_batches,
            }));
        }
        recheck.push(node);
        Ok(Transformed::yes(recheck))
    }
}

fn choose_side(
    tree: &PlanTree,
    children: &[NodeId],
    candidates: &[JoinSide],
    dependent_hint: Option<JoinSide>,
    ctx: &RuleContext<'_>,
) -> Option<(JoinSide, Trigger)> {
    if let Some(side) = dependent_hint
        && candidates.contains(&side)
    {
        return Some((side, Trigger::AccessPattern));
    }
    let hints = &tree.hints;
    let allowed: Vec<JoinSide> = candidates
        .iter()
        .copied()
        .filter(|side| !names_side(tree, children[side.index()], &hints.make_not_dep))
        .collect();
    if let Some(side) = allowed
        .iter()
        .copied()
        .find(|side| names_side(tree, children[side.index()], &hints.make_dep))
    {
        return Some((side, Trigger::Hint));
    }

    let config = ctx.config;
    allowed
        .into_iter()
        .filter_map(|side| {
            let independent = estimate_rows(tree, children[side.other().index()])?;
            let dependent = estimate_rows(tree, children[side.index()]);
            let small = independent <= config.dependent_join_threshold;
            let large_enough = dependent
                .is_none_or(|rows| rows as f64 >= config.dependent_cost_ratio * independent as f64);
            (small && large_enough).then_some((side, independent))
        })
        .min_by_key(|(_, independent)| *independent)
        .map(|(side, _)| (side, Trigger::Cost))
}

/// Whether a hint list names a group of the subtree: by scope name, full
/// name, or the name a view's inner group had before it was merged.
fn names_side(tree: &PlanTree, root: NodeId, names: &[String]) -> bool {
    if names.is_empty() {
        return false;
    }
    tree.preorder(root).into_iter().any(|id| {
        let Ok(NodeProps::Source(source)) = tree.props(id) else {
            return false;
        };
        let scope = &source.group.name;
        let inner = scope.rsplit("__").next().unwrap_or(scope);
        names.iter().any(|n| {
            n.eq_ignore_ascii_case(scope)
                || n.eq_ignore_ascii_case(&source.group.definition)
                || n.eq_ignore_ascii_case(inner)
        })
    })
}

/// The Access node of the dependent side must take IN criteria on every key,
/// and each key column must come from a source the criteria can be placed
/// over. Returns the model and one source per key.
fn feasible(
    tree: &PlanTree,
    root: NodeId,
    keys: &[Expr],
    oracle: &CapabilityOracle,
) -> Option<(String, Vec<NodeId>)> {
    if keys.is_empty() {
        return None;
    }
    let access = access_below(tree, root)?;
    let model = access_model(tree, access)?;
    if !oracle.supports_capability(&model, Capability::CriteriaIn) {
        return None;
    }
    let block_root = tree.first_child(access)?;
    let mut sources = Vec::with_capacity(keys.len());
    for key in keys {
        if !oracle.can_push_expr(&model, key) {
            return None;
        }
        let group = key.as_column()?.group.as_deref()?;
        sources.push(locate_source(tree, block_root, group)?);
    }
    Some((model, sources))
}
