//! 관계형 플래너
//!
//! Drives one compile: canonical plan, capability snapshot, rule engine and
//! finalization. Subqueries that stay local are planned by the same driver,
//! each as an independent query; correlated references become parameters
//! of its source commands.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::capabilities::{CapabilitiesFinder, CapabilityOracle};
use crate::command::Command;
use crate::config::OptimizerConfig;
use crate::error::PlanResult;
use crate::finalize::{AtomicCommand, ExecNode, PlanFinalizer, SubqueryPlanner};
use crate::metadata::QueryMetadata;
use crate::optimizer::{QueryOptimizer, RuleContext, RuleFiring};
use crate::plan::{NodeProps, PlanBuilder, PlanTree, explain};
use crate::sql::CommandResolver;

/// What happened while planning one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisTrace {
    pub canonical_plan: String,
    pub optimized_plan: String,
    pub rule_applications: usize,
    pub rule_firings: Vec<RuleFiring>,
    pub atomic_commands: Vec<AtomicCommand>,
}

impl AnalysisTrace {
    pub fn to_json(&self) -> PlanResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Result of planning: the execution plan and its trace.
#[derive(Debug, Clone)]
pub struct PlannedQuery {
    root: ExecNode,
    trace: AnalysisTrace,
}

impl PlannedQuery {
    pub fn root(&self) -> &ExecNode {
        &self.root
    }

    pub fn into_root(self) -> ExecNode {
        self.root
    }

    pub fn output_columns(&self) -> &[arrow::datatypes::Field] {
        self.root.output_columns()
    }

    pub fn analysis_trace(&self) -> &AnalysisTrace {
        &self.trace
    }
}

/// 쿼리 플래너
///
/// # Example
///
/// ```rust
/// use fedplan_core::{
///     GroupDef, InMemoryMetadata, OptimizerConfig, RelationalPlanner, SourceCapabilities,
///     StaticCapabilitiesFinder,
/// };
/// use arrow::datatypes::DataType;
///
/// # fn main() -> fedplan_core::PlanResult<()> {
/// let mut metadata = InMemoryMetadata::new();
/// metadata.add_group(GroupDef::physical("pm1.g1", "pm1").column("e1", DataType::Utf8));
/// let finder = StaticCapabilitiesFinder::new().with_model("pm1", SourceCapabilities::full());
///
/// let planner = RelationalPlanner::new(&metadata, &finder, OptimizerConfig::default());
/// let planned = planner.plan_sql("SELECT e1 FROM pm1.g1 WHERE e1 = 'a'")?;
/// let commands = planned.root().atomic_commands();
/// assert_eq!(commands[0].sql, "SELECT g_0.e1 AS c_0 FROM pm1.g1 AS g_0 WHERE g_0.e1 = 'a'");
/// # Ok(())
/// # }
/// ```
pub struct RelationalPlanner<'a> {
    metadata: &'a dyn QueryMetadata,
    finder: &'a dyn CapabilitiesFinder,
    config: OptimizerConfig,
    optimizer: QueryOptimizer,
}

impl<'a> RelationalPlanner<'a> {
    pub fn new(
        metadata: &'a dyn QueryMetadata,
        finder: &'a dyn CapabilitiesFinder,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            metadata,
            finder,
            config,
            optimizer: QueryOptimizer::new(),
        }
    }

    /// Replace the rule list.
    pub fn with_optimizer(mut self, optimizer: QueryOptimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Parse, resolve and plan a SQL statement.
    pub fn plan_sql(&self, sql: &str) -> PlanResult<PlannedQuery> {
        let command = CommandResolver::new(self.metadata).resolve_sql(sql)?;
        self.plan(&command)
    }

    #[instrument(skip_all)]
    pub fn plan(&self, command: &Command) -> PlanResult<PlannedQuery> {
        self.config.validate()?;
        let mut tree = PlanBuilder::new(self.metadata).build(command)?;
        let canonical_plan = explain(&tree);

        let oracle = CapabilityOracle::load(
            self.finder,
            self.metadata,
            source_models(&tree),
            &subqueries(&tree),
            &self.config,
        )?;
        let ctx = RuleContext {
            oracle: &oracle,
            config: &self.config,
        };
        let outcome = self.optimizer.optimize(&mut tree, &ctx)?;
        let optimized_plan = explain(&tree);

        let root = PlanFinalizer::new(&oracle, &self.config)
            .with_subquery_planner(self)
            .finalize(&mut tree)?;
        let atomic_commands: Vec<AtomicCommand> = root.atomic_commands().into_iter().cloned().collect();
        info!(
            target: "fedplan::planner",
            rule_applications = outcome.applications,
            atomic_commands = atomic_commands.len(),
            models = ?root.models(),
            "query planned"
        );
        Ok(PlannedQuery {
            root,
            trace: AnalysisTrace {
                canonical_plan,
                optimized_plan,
                rule_applications: outcome.applications,
                rule_firings: outcome.firings,
                atomic_commands,
            },
        })
    }
}

impl SubqueryPlanner for RelationalPlanner<'_> {
    fn plan_subquery(&self, command: &Command) -> PlanResult<ExecNode> {
        Ok(self.plan(command)?.into_root())
    }
}

/// Models of the physical sources in the tree.
fn source_models(tree: &PlanTree) -> BTreeSet<String> {
    tree.node_ids()
        .into_iter()
        .filter_map(|id| match tree.props(id) {
            Ok(NodeProps::Source(source)) if !source.is_virtual => Some(source.model.clone()),
            _ => None,
        })
        .collect()
}

/// Subquery commands referenced anywhere in the tree.
fn subqueries(tree: &PlanTree) -> Vec<Arc<Command>> {
    let mut out: Vec<Arc<Command>> = Vec::new();
    for id in tree.node_ids() {
        let Ok(props) = tree.props(id) else { continue };
        for expr in props.exprs() {
            for command in expr.subqueries() {
                if !out.iter().any(|c| c == &command) {
                    out.push(command);
                }
            }
        }
    }
    out
}
