//! 규칙 기반 옵티마이저
//!
//! An ordered rule list driven by a work-list of `(rule, node)` pairs. Pairs
//! are processed by rule position, then insertion order, so every pending
//! pair of an earlier rule runs before any later rule. A rule that changes
//! the tree names the nodes to recheck; each recheck queues every repeatable
//! rule targeting the node's kind. Every change counts against
//! [`OptimizerConfig::max_rule_applications`].

mod choose_dependent;
mod choose_join_strategy;
mod copy_criteria;
pub mod cost;
mod merge_virtual;
mod place_access;
mod plan_joins;
mod push_limit;
mod push_select;
mod raise_access;
mod raise_null;
mod support;

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;

use ahash::AHashSet;
use serde::Serialize;
use tracing::debug;

use crate::capabilities::CapabilityOracle;
use crate::config::OptimizerConfig;
use crate::error::{PlanError, PlanResult};
use crate::plan::{NodeId, NodeKind, PlanTree, explain};

pub use choose_dependent::ChooseDependent;
pub use choose_join_strategy::ChooseJoinStrategy;
pub use copy_criteria::CopyCriteria;
pub use merge_virtual::MergeVirtual;
pub use place_access::PlaceAccess;
pub use plan_joins::PlanJoins;
pub use push_limit::PushLimit;
pub use push_select::PushSelectCriteria;
pub use raise_access::RaiseAccess;
pub use raise_null::RaiseNull;

/// Whether a rule is queued again when its target nodes change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMode {
    /// Seeded once for every node present when optimization starts.
    SinglePass,
    Repeat,
}

/// Outcome of one rule application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transformed {
    No,
    Yes { recheck: Vec<NodeId> },
}

impl Transformed {
    pub fn no() -> Self {
        Transformed::No
    }

    pub fn yes(recheck: impl IntoIterator<Item = NodeId>) -> Self {
        Transformed::Yes {
            recheck: recheck.into_iter().collect(),
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, Transformed::Yes { .. })
    }
}

/// Read-only inputs shared by every rule of a run.
pub struct RuleContext<'a> {
    pub oracle: &'a CapabilityOracle,
    pub config: &'a OptimizerConfig,
}

/// 최적화 규칙 트레이트
pub trait OptimizationRule: Send + Sync {
    /// 규칙 이름
    fn name(&self) -> &'static str;

    /// Node kinds the rule is applied to.
    fn targets(&self) -> &'static [NodeKind];

    fn mode(&self) -> RuleMode {
        RuleMode::Repeat
    }

    /// Apply the rule at `node`.
    fn apply(&self, tree: &mut PlanTree, node: NodeId, ctx: &RuleContext<'_>)
    -> PlanResult<Transformed>;
}

/// Trace record of one rule application that changed the tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleFiring {
    pub rule: String,
    pub node: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

/// Summary of a run.
#[derive(Debug, Clone, Default)]
pub struct OptimizerOutcome {
    pub applications: usize,
    pub firings: Vec<RuleFiring>,
}

/// 쿼리 옵티마이저
pub struct QueryOptimizer {
    rules: Vec<Box<dyn OptimizationRule>>,
}

impl QueryOptimizer {
    /// 기본 최적화 규칙으로 생성
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(PlaceAccess),
                Box::new(MergeVirtual),
                Box::new(PushSelectCriteria),
                Box::new(CopyCriteria),
                Box::new(RaiseNull),
                Box::new(PlanJoins),
                Box::new(RaiseAccess),
                Box::new(PushLimit),
                Box::new(ChooseDependent),
                Box::new(ChooseJoinStrategy),
            ],
        }
    }

    pub fn with_rules(rules: Vec<Box<dyn OptimizationRule>>) -> Self {
        Self { rules }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Run the work-list until it is empty.
    pub fn optimize(&self, tree: &mut PlanTree, ctx: &RuleContext<'_>) -> PlanResult<OptimizerOutcome> {
        let mut queue = WorkList::default();
        for id in tree.node_ids() {
            let kind = tree.kind(id)?;
            for (index, rule) in self.rules.iter().enumerate() {
                if rule.targets().contains(&kind) {
                    queue.push(index, id);
                }
            }
        }

        let ceiling = ctx.config.max_rule_applications;
        let mut outcome = OptimizerOutcome::default();
        while let Some((index, id)) = queue.pop() {
            let rule = &self.rules[index];
            // stale: node removed or changed kind since it was queued
            let Ok(kind) = tree.kind(id) else { continue };
            if !rule.targets().contains(&kind) {
                continue;
            }
            let before = ctx.config.trace_plans.then(|| explain(tree));
            let Transformed::Yes { recheck } = rule.apply(tree, id, ctx)? else {
                continue;
            };
            outcome.applications += 1;
            debug!(
                target: "fedplan::optimizer",
                rule = rule.name(),
                node = id.index(),
                applications = outcome.applications,
                "rule applied"
            );
            if outcome.applications > ceiling {
                return Err(PlanError::RuleIterationCeilingExceeded {
                    ceiling,
                    rule: rule.name().to_string(),
                });
            }
            outcome.firings.push(RuleFiring {
                rule: rule.name().to_string(),
                node: id.index(),
                before,
                after: ctx.config.trace_plans.then(|| explain(tree)),
            });
            for node in recheck {
                let Ok(kind) = tree.kind(node) else { continue };
                for (index, rule) in self.rules.iter().enumerate() {
                    if rule.mode() == RuleMode::Repeat && rule.targets().contains(&kind) {
                        queue.push(index, node);
                    }
                }
            }
        }
        Ok(outcome)
    }
}

impl Default for QueryOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Pending `(rule, node)` pairs ordered by rule position then arrival.
#[derive(Default)]
struct WorkList {
    ordered: BTreeSet<(usize, u64, NodeId)>,
    pending: AHashSet<(usize, NodeId)>,
    seq: u64,
}

impl WorkList {
    fn push(&mut self, rule: usize, node: NodeId) {
        if self.pending.insert((rule, node)) {
            self.ordered.insert((rule, self.seq, node));
            self.seq += 1;
        }
    }

    fn pop(&mut self) -> Option<(usize, NodeId)> {
        let (rule, _, node) = self.ordered.pop_first()?;
        self.pending.remove(&(rule, node));
        Some((rule, node))
    }
}
