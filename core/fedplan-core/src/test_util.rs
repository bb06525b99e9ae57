//! Fixtures shared by unit tests.

use arrow::datatypes::DataType;

use crate::capabilities::{CapabilityOracle, SourceCapabilities};
use crate::command::Command;
use crate::config::OptimizerConfig;
use crate::error::PlanResult;
use crate::metadata::{GroupDef, InMemoryMetadata};
use crate::optimizer::{QueryOptimizer, RuleContext};
use crate::plan::{NodeId, NodeKind, PlanBuilder, PlanTree};
use crate::sql::CommandResolver;

fn group(name: &str, model: &str) -> GroupDef {
    GroupDef::physical(name, model)
        .column("e1", DataType::Utf8)
        .column("e2", DataType::Int32)
        .column("e3", DataType::Boolean)
        .column("e4", DataType::Float64)
}

/// pm1..pm4 physical models with groups g1..g3 of columns e1..e4, plus
/// views in vm1.
///
/// - pm3.g1 has 100 rows, pm3.g2 1 000 000 rows; other cardinalities are unknown
/// - pm4.g1 must be queried with e1 bound
pub(crate) fn metadata() -> InMemoryMetadata {
    let mut metadata = InMemoryMetadata::new();
    for model in ["pm1", "pm2"] {
        for g in ["g1", "g2", "g3"] {
            metadata.add_group(group(&format!("{model}.{g}"), model));
        }
    }
    metadata
        .add_group(group("pm3.g1", "pm3").cardinality(100))
        .add_group(group("pm3.g2", "pm3").cardinality(1_000_000))
        .add_group(group("pm4.g1", "pm4").access_pattern(&["e1"]))
        .add_group(group("pm4.g2", "pm4"));
    metadata
        .add_virtual_group("vm1.v1", "vm1", "SELECT e1, e2 FROM pm1.g1 WHERE e2 > 0")
        .and_then(|m| {
            m.add_virtual_group(
                "vm1.v2",
                "vm1",
                "SELECT e1, COUNT(*) AS cnt FROM pm1.g2 GROUP BY e1",
            )
        })
        .expect("view definitions resolve");
    metadata
}

pub(crate) fn resolve(sql: &str) -> Command {
    let metadata = metadata();
    CommandResolver::new(&metadata)
        .resolve_sql(sql)
        .unwrap_or_else(|e| panic!("failed to resolve {sql}: {e}"))
}

pub(crate) fn canonical(sql: &str) -> PlanTree {
    let metadata = metadata();
    PlanBuilder::new(&metadata)
        .build(&resolve(sql))
        .unwrap_or_else(|e| panic!("failed to build {sql}: {e}"))
}

pub(crate) fn oracle(models: &[(&str, SourceCapabilities)], config: &OptimizerConfig) -> CapabilityOracle {
    CapabilityOracle::from_models(
        models.iter().map(|(m, c)| (m.to_string(), c.clone())),
        config,
    )
}

/// Canonical plan of `sql` run through the default rule list.
pub(crate) fn optimize_with(
    sql: &str,
    models: &[(&str, SourceCapabilities)],
    config: &OptimizerConfig,
) -> PlanResult<PlanTree> {
    let mut tree = canonical(sql);
    let oracle = oracle(models, config);
    let ctx = RuleContext {
        oracle: &oracle,
        config,
    };
    QueryOptimizer::new().optimize(&mut tree, &ctx)?;
    Ok(tree)
}

pub(crate) fn optimize(sql: &str, models: &[(&str, SourceCapabilities)]) -> PlanResult<PlanTree> {
    optimize_with(sql, models, &OptimizerConfig::default())
}

/// Reachable nodes of `kind`, in pre-order.
pub(crate) fn nodes_of(tree: &PlanTree, kind: NodeKind) -> Vec<NodeId> {
    let Some(root) = tree.root() else {
        return vec![];
    };
    tree.preorder(root)
        .into_iter()
        .filter(|id| tree.kind(*id).ok() == Some(kind))
        .collect()
}
