// 통합 테스트 공용 픽스처

#![allow(dead_code)]

use arrow::datatypes::DataType;
use fedplan_core::{
    GroupDef, InMemoryMetadata, OptimizerConfig, PlanResult, PlannedQuery, RelationalPlanner,
    SourceCapabilities, StaticCapabilitiesFinder,
};

fn group(name: &str, model: &str) -> GroupDef {
    GroupDef::physical(name, model)
        .column("e1", DataType::Utf8)
        .column("e2", DataType::Int32)
        .column("e3", DataType::Boolean)
}

/// pm1, pm2: g1..g2 without statistics
/// pm3: small (100 rows) and large (1M rows) groups
/// pm4.g1: e1 must be bound
/// vm1.lim: a view with its own ORDER BY and LIMIT
pub fn metadata() -> InMemoryMetadata {
    let mut metadata = InMemoryMetadata::new();
    metadata
        .add_group(group("pm1.g1", "pm1"))
        .add_group(group("pm1.g2", "pm1"))
        .add_group(group("pm2.g1", "pm2"))
        .add_group(group("pm2.g2", "pm2"))
        .add_group(group("pm3.small", "pm3").cardinality(100))
        .add_group(group("pm3.large", "pm3").cardinality(1_000_000))
        .add_group(group("pm4.g1", "pm4").access_pattern(&["e1"]));
    metadata
        .add_virtual_group("vm1.v1", "vm1", "SELECT e1, e2 FROM pm1.g1 WHERE e2 > 0")
        .unwrap()
        .add_virtual_group("vm1.empty", "vm1", "SELECT e1, e2 FROM pm2.g1 WHERE 1 = 0")
        .unwrap()
        .add_virtual_group(
            "vm1.lim",
            "vm1",
            "SELECT e1, e2 FROM pm1.g1 ORDER BY e1 LIMIT 100 OFFSET 10",
        )
        .unwrap();
    metadata
}

pub fn full_finder() -> StaticCapabilitiesFinder {
    StaticCapabilitiesFinder::new().with_default(SourceCapabilities::full())
}

pub fn plan(
    sql: &str,
    finder: &StaticCapabilitiesFinder,
    config: OptimizerConfig,
) -> PlanResult<PlannedQuery> {
    let metadata = metadata();
    RelationalPlanner::new(&metadata, finder, config).plan_sql(sql)
}

pub fn commands(planned: &PlannedQuery) -> Vec<String> {
    planned
        .root()
        .atomic_commands()
        .into_iter()
        .map(|c| c.sql.clone())
        .collect()
}
