//! Join algorithm selection.
//!
//! Equi-joins run as sort-merge joins when both inputs can arrive ordered,
//! either by pushing ORDER BY into the source query or by sorting a small
//! input locally. A large/small pair within the configured bounds uses a
//! partitioned sort join instead; everything else falls back to a nested
//! loop join.

use super::cost::estimate_rows;
use super::support::{access_below, access_model, ascending, pushed_down};
use super::{OptimizationRule, RuleContext, Transformed};
use crate::capabilities::Capability;
use crate::command::JoinType;
use crate::error::{PlanError, PlanResult};
use crate::expr::{Expr, equi_join_pairs};
use crate::plan::{BlockState, JoinSide, JoinStrategy, NodeId, NodeKind, NodeProps, PlanTree, SortSource};

pub struct ChooseJoinStrategy;

impl OptimizationRule for ChooseJoinStrategy {
    fn name(&self) -> &'static str {
        "ChooseJoinStrategy"
    }

    fn targets(&self) -> &'static [NodeKind] {
        &[NodeKind::Join]
    }

    fn apply(&self, tree: &mut PlanTree, node: NodeId, ctx: &RuleContext<'_>) -> PlanResult<Transformed> {
        let NodeProps::Join {
            join_type,
            criteria,
            strategy: None,
            ..
        } = tree.props(node)?
        else {
            return Ok(Transformed::no());
        };
        if pushed_down(tree, node) {
            return Ok(Transformed::no());
        }
        let join_type = *join_type;
        let children = tree.children(node)?;
        let pairs = equi_join_pairs(criteria, &tree.groups(children[0]), &tree.groups(children[1]));

        if join_type == JoinType::Cross || pairs.is_empty() {
            if join_type == JoinType::FullOuter {
                return Err(PlanError::unplannable(
                    "FULL OUTER JOIN",
                    "requires equality join criteria",
                ));
            }
            set_strategy(tree, node, JoinStrategy::NestedLoop)?;
            return Ok(Transformed::yes([node]));
        }

        let (left_keys, right_keys): (Vec<Expr>, Vec<Expr>) = pairs.into_iter().unzip();
        let keys = [left_keys, right_keys];
        let orderable = [
            ordering(tree, children[0], &keys[0], ctx),
            ordering(tree, children[1], &keys[1], ctx),
        ];
        let rows = [
            estimate_rows(tree, children[0]),
            estimate_rows(tree, children[1]),
        ];
        let config = ctx.config;

        let partitioned = match (orderable, rows) {
            ([Some(_), Some(_)], [Some(l), Some(r)]) => {
                let (small, large, side) = if l <= r {
                    (l, r, JoinSide::Left)
                } else {
                    (r, l, JoinSide::Right)
                };
                (small < config.partitioned_sort_max_rows
                    && large as f64 >= config.partitioned_sort_ratio * small.max(1) as f64)
                    .then_some(side)
            }
            _ => None,
        };

        let [left_keys, right_keys] = keys;
        let mut recheck = vec![node];
        let strategy = if let Some(side) = partitioned {
            let source = orderable[side.index()].unwrap_or(SortSource::Local);
            recheck.push(add_sort(tree, children[side.index()], side_keys(&left_keys, &right_keys, side), source)?);
            JoinStrategy::PartitionedSort {
                left_keys,
                right_keys,
                sorted_side: side,
            }
        } else if let [Some(left), Some(right)] = orderable {
            recheck.push(add_sort(tree, children[0], &left_keys, left)?);
            recheck.push(add_sort(tree, children[1], &right_keys, right)?);
            JoinStrategy::MergeSorted {
                left_keys,
                right_keys,
                sorted: [left, right],
            }
        } else if join_type == JoinType::FullOuter {
            // a full outer join is only executed as a merge join
            let left = orderable[0].unwrap_or(SortSource::Local);
            let right = orderable[1].unwrap_or(SortSource::Local);
            recheck.push(add_sort(tree, children[0], &left_keys, left)?);
            recheck.push(add_sort(tree, children[1], &right_keys, right)?);
            JoinStrategy::MergeSorted {
                left_keys,
                right_keys,
                sorted: [left, right],
            }
        } else {
            JoinStrategy::NestedLoop
        };
        set_strategy(tree, node, strategy)?;
        Ok(Transformed::yes(recheck))
    }
}

fn side_keys<'a>(left: &'a [Expr], right: &'a [Expr], side: JoinSide) -> &'a [Expr] {
    match side {
        JoinSide::Left => left,
        JoinSide::Right => right,
    }
}

fn set_strategy(tree: &mut PlanTree, join: NodeId, new: JoinStrategy) -> PlanResult<()> {
    if let NodeProps::Join { strategy, .. } = tree.props_mut(join)? {
        *strategy = Some(new);
    }
    Ok(())
}

/// How an input could be delivered ordered on `keys`, if at all.
fn ordering(tree: &PlanTree, root: NodeId, keys: &[Expr], ctx: &RuleContext<'_>) -> Option<SortSource> {
    if let Some(access) = access_below(tree, root)
        && let Some(model) = access_model(tree, access)
        && ctx.oracle.supports_capability(&model, Capability::OrderBy)
        && keys.iter().all(|k| ctx.oracle.can_push_expr(&model, k))
        && BlockState::of(tree, access).is_plain()
    {
        return Some(SortSource::Pushed);
    }
    estimate_rows(tree, root)
        .filter(|rows| *rows <= ctx.config.small_input_rows)
        .map(|_| SortSource::Local)
}

/// Sort node delivering the input ordered: at the top of the source query
/// when pushed, above the input otherwise.
fn add_sort(tree: &mut PlanTree, root: NodeId, keys: &[Expr], source: SortSource) -> PlanResult<NodeId> {
    let sort = tree.add_node(NodeProps::Sort {
        items: ascending(keys),
    });
    let target = match source {
        SortSource::Pushed => access_below(tree, root).and_then(|a| tree.first_child(a)),
        SortSource::Local => None,
    };
    tree.insert_above(target.unwrap_or(root), sort)?;
    Ok(sort)
}
