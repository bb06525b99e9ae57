//! Join ordering and access-pattern planning.
//!
//! A region of directly nested inner and cross joins is flattened into its
//! leaves and conjuncts and rebuilt left-deep. Leaves whose access patterns
//! are unmet are placed only once an equality against already placed
//! groups can supply the missing columns; such a leaf is marked as needing
//! a dependent join.

use std::collections::BTreeSet;

use super::cost::estimate;
use super::support::{access_below, access_model};
use super::{OptimizationRule, RuleContext, RuleMode, Transformed};
use crate::capabilities::CapabilityOracle;
use crate::command::JoinType;
use crate::error::{PlanError, PlanResult};
use crate::expr::{BinaryOperator, Expr, GroupSymbol};
use crate::plan::{JoinSide, NodeId, NodeKind, NodeProps, PlanTree, unmet_access_patterns};

pub struct PlanJoins;

struct Leaf {
    id: NodeId,
    groups: BTreeSet<String>,
    domain: Option<String>,
    unmet: Vec<(GroupSymbol, Vec<String>)>,
    estimate: Option<f64>,
}

impl OptimizationRule for PlanJoins {
    fn name(&self) -> &'static str {
        "PlanJoins"
    }

    fn targets(&self) -> &'static [NodeKind] {
        &[NodeKind::Join]
    }

    fn mode(&self) -> RuleMode {
        RuleMode::SinglePass
    }

    fn apply(&self, tree: &mut PlanTree, node: NodeId, ctx: &RuleContext<'_>) -> PlanResult<Transformed> {
        let NodeProps::Join {
            join_type,
            planned: false,
            strategy: None,
            ..
        } = tree.props(node)?
        else {
            return Ok(Transformed::no());
        };
        match *join_type {
            JoinType::Inner | JoinType::Cross => {
                let nested_in_region = tree.parent(node).is_some_and(|p| is_region_join(tree, p));
                if nested_in_region {
                    return Ok(Transformed::no());
                }
                plan_region(tree, node, ctx.oracle)
            }
            JoinType::LeftOuter | JoinType::RightOuter => plan_left_outer(tree, node),
            JoinType::FullOuter => plan_full_outer(tree, node),
        }
    }
}

fn is_region_join(tree: &PlanTree, id: NodeId) -> bool {
    matches!(
        tree.props(id),
        Ok(NodeProps::Join {
            join_type: JoinType::Inner | JoinType::Cross,
            strategy: None,
            planned: false,
            ..
        })
    )
}

fn unmet_error(group: &GroupSymbol, columns: &[String]) -> PlanError {
    PlanError::AccessPatternNotSatisfied {
        group: group.name.clone(),
        columns: columns.to_vec(),
    }
}

/// Whether an equality conjunct binds `group.column` to an expression over
/// `placed` groups only.
fn bindable(conjuncts: &[Expr], group: &str, column: &str, placed: &BTreeSet<String>) -> bool {
    conjuncts.iter().any(|conjunct| {
        let Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } = conjunct
        else {
            return false;
        };
        [(left, right), (right, left)].into_iter().any(|(this, other)| {
            let column_matches = this.as_column().is_some_and(|s| {
                s.group.as_deref() == Some(group) && s.name.eq_ignore_ascii_case(column)
            });
            let other_groups = other.groups();
            column_matches && !other_groups.is_empty() && other_groups.is_subset(placed)
        })
    })
}

fn satisfiable(leaf: &Leaf, conjuncts: &[Expr], placed: &BTreeSet<String>) -> bool {
    leaf.unmet.iter().all(|(group, columns)| {
        columns
            .iter()
            .all(|column| bindable(conjuncts, &group.name, column, placed))
    })
}

fn plan_region(tree: &mut PlanTree, root: NodeId, oracle: &CapabilityOracle) -> PlanResult<Transformed> {
    let mut leaves = Vec::new();
    let mut conjuncts: Vec<Expr> = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if id == root || is_region_join(tree, id) {
            if let NodeProps::Join { criteria, .. } = tree.props(id)? {
                for conjunct in criteria {
                    if !conjuncts.contains(conjunct) {
                        conjuncts.push(conjunct.clone());
                    }
                }
            }
            // right first so leaves pop in left-to-right order
            stack.extend(tree.children(id)?.iter().rev().copied());
        } else {
            let domain = access_below(tree, id).and_then(|a| access_model(tree, a));
            leaves.push(Leaf {
                id,
                groups: tree.groups(id),
                unmet: if domain.is_some() {
                    unmet_access_patterns(tree, id)
                } else {
                    vec![]
                },
                domain,
                estimate: estimate(tree, id),
            });
        }
    }

    let order = order_leaves(&leaves, &conjuncts, oracle)?;

    // rebuild left-deep
    for leaf in &leaves {
        tree.detach(leaf.id)?;
    }
    let mut placed: BTreeSet<String> = leaves[order[0]].groups.clone();
    let mut remaining = conjuncts;
    let mut current = leaves[order[0]].id;
    let mut recheck = vec![current];
    for (step, &index) in order.iter().enumerate().skip(1) {
        let leaf = &leaves[index];
        placed.extend(leaf.groups.iter().cloned());
        let last = step == order.len() - 1;
        let (here, later): (Vec<Expr>, Vec<Expr>) = remaining
            .into_iter()
            .partition(|c| last || c.groups().is_subset(&placed));
        remaining = later;
        let join_type = if here.is_empty() {
            JoinType::Cross
        } else {
            JoinType::Inner
        };
        let join = tree.add_node(NodeProps::Join {
            join_type,
            criteria: here,
            strategy: None,
            dependent_hint: (!leaf.unmet.is_empty()).then_some(JoinSide::Right),
            planned: true,
        });
        tree.add_child(join, current)?;
        tree.add_child(join, leaf.id)?;
        recheck.push(join);
        recheck.push(leaf.id);
        current = join;
    }
    tree.replace(root, current)?;
    tree.delete_subtree(root)?;
    Ok(Transformed::yes(recheck))
}

/// Greedy order: start from a leaf without unmet access patterns in the
/// largest domain, then keep adding the cheapest satisfiable leaf, staying
/// within a domain and along join criteria where possible.
fn order_leaves(leaves: &[Leaf], conjuncts: &[Expr], oracle: &CapabilityOracle) -> PlanResult<Vec<usize>> {
    let rows = |leaf: &Leaf| leaf.estimate.unwrap_or(f64::INFINITY);
    let domain_size = |leaf: &Leaf| {
        leaves
            .iter()
            .filter(|other| match (&leaf.domain, &other.domain) {
                (Some(a), Some(b)) => oracle.same_domain(a, b),
                _ => false,
            })
            .count()
    };
    let first_unmet = |indices: &mut dyn Iterator<Item = usize>| {
        indices
            .filter_map(|i| leaves[i].unmet.first())
            .map(|(group, columns)| unmet_error(group, columns))
            .next()
            .unwrap_or_else(|| PlanError::InvalidTree("no join input can be placed".to_string()))
    };

    let first = (0..leaves.len())
        .filter(|i| leaves[*i].unmet.is_empty())
        .min_by(|a, b| {
            domain_size(&leaves[*b])
                .cmp(&domain_size(&leaves[*a]))
                .then(rows(&leaves[*a]).total_cmp(&rows(&leaves[*b])))
                .then(a.cmp(b))
        })
        .ok_or_else(|| first_unmet(&mut (0..leaves.len())))?;

    let mut order = vec![first];
    let mut placed: BTreeSet<String> = leaves[first].groups.clone();
    let mut domains: Vec<&str> = leaves[first].domain.iter().map(String::as_str).collect();
    while order.len() < leaves.len() {
        let key = |i: usize| {
            let leaf = &leaves[i];
            let connected = conjuncts.iter().any(|c| {
                let groups = c.groups();
                !groups.is_disjoint(&leaf.groups)
                    && !groups.is_disjoint(&placed)
                    && groups.iter().all(|g| leaf.groups.contains(g) || placed.contains(g))
            });
            let same_domain = leaf
                .domain
                .as_deref()
                .is_some_and(|d| domains.iter().any(|p| oracle.same_domain(p, d)));
            (!(connected && same_domain), !connected, rows(leaf), i)
        };
        let next = (0..leaves.len())
            .filter(|i| !order.contains(i))
            .filter(|i| satisfiable(&leaves[*i], conjuncts, &placed))
            .min_by(|a, b| {
                let (ka, kb) = (key(*a), key(*b));
                ka.0.cmp(&kb.0)
                    .then(ka.1.cmp(&kb.1))
                    .then(ka.2.total_cmp(&kb.2))
                    .then(ka.3.cmp(&kb.3))
            });
        let Some(next) = next else {
            let mut rest = (0..leaves.len()).filter(|i| !order.contains(i));
            return Err(first_unmet(&mut rest));
        };
        placed.extend(leaves[next].groups.iter().cloned());
        if let Some(domain) = &leaves[next].domain {
            domains.push(domain);
        }
        order.push(next);
    }
    Ok(order)
}

fn mark_planned(tree: &mut PlanTree, join: NodeId, hint: Option<JoinSide>) -> PlanResult<()> {
    if let NodeProps::Join {
        planned,
        dependent_hint,
        ..
    } = tree.props_mut(join)?
    {
        *planned = true;
        if hint.is_some() {
            *dependent_hint = hint;
        }
    }
    Ok(())
}

/// The preserved side must be self-sufficient; the inner side may take its
/// missing values from the preserved side through the join criteria.
fn plan_left_outer(tree: &mut PlanTree, join: NodeId) -> PlanResult<Transformed> {
    let children = tree.children(join)?;
    let (left, right) = (children[0], children[1]);
    if let Some((group, columns)) = unmet_access_patterns(tree, left).first() {
        return Err(unmet_error(group, columns));
    }
    let criteria = match tree.props(join)? {
        NodeProps::Join { criteria, .. } => criteria.clone(),
        _ => vec![],
    };
    let placed = tree.groups(left);
    let unmet = unmet_access_patterns(tree, right);
    let mut hint = None;
    for (group, columns) in &unmet {
        if !columns
            .iter()
            .all(|column| bindable(&criteria, &group.name, column, &placed))
        {
            return Err(unmet_error(group, columns));
        }
        hint = Some(JoinSide::Right);
    }
    mark_planned(tree, join, hint)?;
    Ok(Transformed::yes([join]))
}

fn plan_full_outer(tree: &mut PlanTree, join: NodeId) -> PlanResult<Transformed> {
    if let Some((group, columns)) = unmet_access_patterns(tree, join).first() {
        return Err(unmet_error(group, columns));
    }
    mark_planned(tree, join, None)?;
    Ok(Transformed::yes([join]))
}
