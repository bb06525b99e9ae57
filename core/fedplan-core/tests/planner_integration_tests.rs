// 플래너 통합 테스트
//
// SQL 문자열에서 실행 플랜과 atomic command까지, 공개 API만으로 검증

mod common;

use std::collections::BTreeMap;

use arrow::datatypes::DataType;
use fedplan_core::expr::{Expr, ScalarValue};
use fedplan_core::plan::{JoinSide, SortSource};
use fedplan_core::{
    CapabilitiesFinder, Capability, ExecNode, ExecOperator, JoinStrategy, OptimizerConfig,
    PlanError, PlanResult, PlannedQuery, SourceCapabilities, StaticCapabilitiesFinder,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer};

use common::{commands, full_finder, plan};

// ─── Helpers ────────────────────────────────────────────

fn find<'a>(node: &'a ExecNode, name: &str) -> Option<&'a ExecNode> {
    if node.operator.name() == name {
        return Some(node);
    }
    node.children().iter().find_map(|c| find(c, name))
}

fn join_strategy(node: &ExecNode) -> &JoinStrategy {
    match find(node, "Join").map(|n| &n.operator) {
        Some(ExecOperator::Join { strategy, .. }) => strategy,
        other => panic!("Expected Join, got: {:?}", other),
    }
}

/// Functions and operators in the source commands that their model does
/// not declare.
fn undeclared_features(planned: &PlannedQuery, finder: &StaticCapabilitiesFinder) -> Vec<String> {
    let known = SourceCapabilities::full();
    let mut out = Vec::new();
    for command in planned.root().atomic_commands() {
        let caps = finder.find_capabilities(&command.model).unwrap();
        let text = command.probe_sql();
        let tokens: Vec<Token> = Tokenizer::new(&GenericDialect {}, &text)
            .tokenize()
            .unwrap()
            .into_iter()
            .filter(|t| !matches!(t, Token::Whitespace(_)))
            .collect();
        for (i, token) in tokens.iter().enumerate() {
            let missing = match token {
                Token::Word(word) if word.keyword == Keyword::OR => {
                    !caps.supports(Capability::CriteriaOr)
                }
                Token::Word(word)
                    if tokens.get(i + 1) == Some(&Token::LParen)
                        && known.supports_function(&word.value) =>
                {
                    !caps.supports_function(&word.value)
                }
                Token::Lt | Token::Gt | Token::LtEq | Token::GtEq => {
                    !caps.supports(Capability::CriteriaCompareOrdered)
                }
                _ => false,
            };
            if missing {
                out.push(format!("[{}] {token} in {text}", command.model));
            }
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════
// LIMIT
// ═══════════════════════════════════════════════════════════

#[test]
fn test_limit_pushed_when_source_supports_it() -> PlanResult<()> {
    let planned = plan("SELECT e1 FROM pm1.g1 LIMIT 100", &full_finder(), OptimizerConfig::default())?;
    assert_eq!(
        commands(&planned),
        vec!["SELECT g_0.e1 AS c_0 FROM pm1.g1 AS g_0 LIMIT 100".to_string()]
    );
    assert_eq!(planned.root().operator.name(), "Access");
    Ok(())
}

#[test]
fn test_limit_evaluated_locally_otherwise() -> PlanResult<()> {
    let finder = StaticCapabilitiesFinder::new()
        .with_model("pm1", SourceCapabilities::full().without(Capability::RowLimit));
    let planned = plan("SELECT e1 FROM pm1.g1 LIMIT 100", &finder, OptimizerConfig::default())?;
    match &planned.root().operator {
        ExecOperator::Limit { offset, count } => {
            assert_eq!(*offset, 0);
            assert_eq!(*count, Some(100));
        }
        other => panic!("Expected Limit, got: {:?}", other),
    }
    assert_eq!(
        commands(&planned),
        vec!["SELECT g_0.e1 AS c_0 FROM pm1.g1 AS g_0".to_string()]
    );
    Ok(())
}

#[test]
fn test_union_all_limit_bounds_each_source() -> PlanResult<()> {
    let planned = plan(
        "SELECT e1 FROM pm1.g1 UNION ALL SELECT e1 FROM pm2.g1 LIMIT 10",
        &full_finder(),
        OptimizerConfig::default(),
    )?;
    let sql = commands(&planned);
    assert_eq!(sql.len(), 2);
    assert!(sql.iter().all(|s| s.ends_with("LIMIT 10")), "{sql:?}");
    assert_eq!(planned.root().operator.name(), "Limit");
    Ok(())
}

#[test]
fn test_view_limit_combines_with_outer_limit() -> PlanResult<()> {
    let finder = StaticCapabilitiesFinder::new()
        .with_model("pm1", SourceCapabilities::full().without(Capability::RowOffset));
    let planned = plan(
        "SELECT e1 FROM vm1.lim LIMIT 75 OFFSET 20",
        &finder,
        OptimizerConfig::default(),
    )?;
    match find(planned.root(), "Limit").map(|n| &n.operator) {
        Some(ExecOperator::Limit { offset, count }) => {
            assert_eq!(*offset, 30);
            assert_eq!(*count, Some(75));
        }
        other => panic!("Expected Limit, got: {:?}", other),
    }
    let limits = planned.root().explain().matches("Limit").count();
    assert_eq!(limits, 1, "{}", planned.root().explain());
    let sql = commands(&planned);
    assert_eq!(sql.len(), 1);
    assert!(sql[0].ends_with(" LIMIT 105"), "{}", sql[0]);
    Ok(())
}

#[test]
fn test_view_limit_combined_inside_source_query() -> PlanResult<()> {
    let planned = plan(
        "SELECT e1 FROM vm1.lim LIMIT 75 OFFSET 20",
        &full_finder(),
        OptimizerConfig::default(),
    )?;
    assert_eq!(planned.root().operator.name(), "Access");
    let sql = commands(&planned);
    assert_eq!(sql.len(), 1);
    assert!(sql[0].contains(" LIMIT 75 OFFSET 30"), "{}", sql[0]);
    assert_eq!(sql[0].matches(" LIMIT ").count(), 1, "{}", sql[0]);
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Join strategies
// ═══════════════════════════════════════════════════════════

#[test]
fn test_orderable_sources_use_merge_join() -> PlanResult<()> {
    let planned = plan(
        "SELECT pm1.g1.e2 FROM pm1.g1, pm2.g1 WHERE pm1.g1.e1 = pm2.g1.e1",
        &full_finder(),
        OptimizerConfig::default(),
    )?;
    match join_strategy(planned.root()) {
        JoinStrategy::MergeSorted { sorted, .. } => {
            assert_eq!(*sorted, [SortSource::Pushed, SortSource::Pushed])
        }
        other => panic!("Expected MergeSorted, got: {:?}", other),
    }
    let sql = commands(&planned);
    assert_eq!(sql.len(), 2);
    assert!(sql.iter().all(|s| s.contains("ORDER BY c_0")), "{sql:?}");
    Ok(())
}

#[test]
fn test_unorderable_source_uses_nested_loop() -> PlanResult<()> {
    let finder = full_finder().with_model("pm2", SourceCapabilities::full().without(Capability::OrderBy));
    let planned = plan(
        "SELECT pm1.g1.e2 FROM pm1.g1, pm2.g1 WHERE pm1.g1.e1 = pm2.g1.e1",
        &finder,
        OptimizerConfig::default(),
    )?;
    assert_eq!(join_strategy(planned.root()), &JoinStrategy::NestedLoop);
    assert!(commands(&planned).iter().all(|s| !s.contains("ORDER BY")));
    Ok(())
}

#[test]
fn test_same_source_join_is_one_command() -> PlanResult<()> {
    let planned = plan(
        "SELECT pm1.g1.e2 FROM pm1.g1, pm1.g2 WHERE pm1.g1.e1 = pm1.g2.e1",
        &full_finder(),
        OptimizerConfig::default(),
    )?;
    let sql = commands(&planned);
    assert_eq!(sql.len(), 1);
    assert!(sql[0].contains("pm1.g1 AS g_"), "{}", sql[0]);
    assert!(sql[0].contains("pm1.g2 AS g_"), "{}", sql[0]);
    assert!(sql[0].contains(" JOIN "), "{}", sql[0]);
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Dead branches
// ═══════════════════════════════════════════════════════════

#[test]
fn test_contradiction_plans_to_no_rows() -> PlanResult<()> {
    let planned = plan("SELECT e1 FROM pm1.g1 WHERE 1 = 0", &full_finder(), OptimizerConfig::default())?;
    assert_eq!(planned.root().operator, ExecOperator::Null);
    assert!(planned.root().atomic_commands().is_empty());
    assert_eq!(planned.output_columns().len(), 1);
    Ok(())
}

#[test]
fn test_dead_union_branch_leaves_one_source() -> PlanResult<()> {
    let planned = plan(
        "SELECT e1 FROM pm1.g1 UNION ALL SELECT e1 FROM pm2.g1 WHERE 1 = 0",
        &full_finder(),
        OptimizerConfig::default(),
    )?;
    assert_eq!(planned.root().models(), vec!["pm1".to_string()]);
    assert!(find(planned.root(), "SetOp").is_none());
    Ok(())
}

#[test]
fn test_empty_outer_join_input_collapses() -> PlanResult<()> {
    let planned = plan(
        "SELECT pm1.g1.e1, vm1.empty.e2 FROM pm1.g1 \
         LEFT OUTER JOIN vm1.empty ON pm1.g1.e1 = vm1.empty.e1",
        &full_finder(),
        OptimizerConfig::default(),
    )?;
    assert!(find(planned.root(), "Join").is_none(), "{}", planned.root().explain());
    assert_eq!(planned.root().models(), vec!["pm1".to_string()]);
    assert_eq!(planned.output_columns().len(), 2);
    // the null column is either projected locally or selected by the source
    match find(planned.root(), "Project").map(|n| &n.operator) {
        Some(ExecOperator::Project { columns }) => {
            assert_eq!(columns[1].expr, Expr::TypedNull(DataType::Int32));
        }
        _ => {
            let sql = commands(&planned);
            assert!(sql[0].contains("NULL AS c_1"), "{}", sql[0]);
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Dependent joins
// ═══════════════════════════════════════════════════════════

#[test]
fn test_dependent_join_batches_values() -> PlanResult<()> {
    let finder = full_finder().with_model("pm1", SourceCapabilities::full().with_max_in_list(30));
    let planned = plan(
        "SELECT pm1.g1.e2 FROM pm3.small, pm1.g1 WHERE pm3.small.e1 = pm1.g1.e1",
        &finder,
        OptimizerConfig::default(),
    )?;
    match join_strategy(planned.root()) {
        JoinStrategy::DependentSemiJoin(dep) => {
            assert_eq!(dep.independent, JoinSide::Left);
            assert_eq!(dep.independent_estimate, Some(100));
            assert_eq!(dep.max_in_list, 30);
            assert_eq!(dep.expected_batches, Some(4));
        }
        other => panic!("Expected DependentSemiJoin, got: {:?}", other),
    }

    let all = planned.root().atomic_commands();
    let dependent = all
        .iter()
        .find(|c| c.is_dependent())
        .unwrap_or_else(|| panic!("Expected a dependent command, got: {all:?}"));
    assert_eq!(dependent.model, "pm1");
    let slot = dependent.slots()[0];

    let mut values: Vec<ScalarValue> = (0..70).map(|i| ScalarValue::Utf8(format!("v{i}"))).collect();
    values.push(ScalarValue::Utf8("v0".to_string()));
    values.push(ScalarValue::Null);
    let bound = dependent.bind_dependent_values(&BTreeMap::from([(slot, values)]))?;
    assert_eq!(bound.len(), 3);
    assert!(bound[0].contains("IN ('v0', 'v1'"), "{}", bound[0]);
    assert!(bound[2].contains("'v69')"), "{}", bound[2]);
    assert!(bound.iter().all(|sql| !sql.contains("NULL")));

    let none = dependent.bind_dependent_values(&BTreeMap::from([(slot, vec![])]))?;
    assert!(none.is_empty());
    Ok(())
}

#[test]
fn test_access_pattern_met_by_dependent_join() -> PlanResult<()> {
    let planned = plan(
        "SELECT pm4.g1.e2 FROM pm1.g1, pm4.g1 WHERE pm1.g1.e1 = pm4.g1.e1",
        &full_finder(),
        OptimizerConfig::default(),
    )?;
    let dependent: Vec<_> = planned
        .root()
        .atomic_commands()
        .into_iter()
        .filter(|c| c.is_dependent())
        .collect();
    assert_eq!(dependent.len(), 1);
    assert_eq!(dependent[0].model, "pm4");
    Ok(())
}

#[test]
fn test_unbound_access_pattern_is_an_error() {
    match plan("SELECT e2 FROM pm4.g1", &full_finder(), OptimizerConfig::default()) {
        Err(PlanError::AccessPatternNotSatisfied { group, columns }) => {
            assert_eq!(group, "pm4.g1");
            assert_eq!(columns, vec!["e1".to_string()]);
        }
        other => panic!("Expected AccessPatternNotSatisfied, got: {:?}", other),
    }
}

// ═══════════════════════════════════════════════════════════
// Pushdown soundness and determinism
// ═══════════════════════════════════════════════════════════

/// pm1 and pm2 share a connector; pm2 lacks LOWER and OR, pm3 lacks UPPER
/// and ordered comparisons.
fn uneven_finder() -> StaticCapabilitiesFinder {
    full_finder()
        .with_model("pm1", SourceCapabilities::full().with_connector("c"))
        .with_model(
            "pm2",
            SourceCapabilities::full()
                .with_connector("c")
                .without_function("LOWER")
                .without(Capability::CriteriaOr),
        )
        .with_model(
            "pm3",
            SourceCapabilities::full()
                .without_function("UPPER")
                .without(Capability::CriteriaCompareOrdered),
        )
}

#[test]
fn test_commands_use_only_declared_capabilities() -> PlanResult<()> {
    let finder = uneven_finder();
    for sql in [
        "SELECT a.e1 FROM pm2.g1 AS a, pm1.g1 AS b WHERE a.e1 = b.e1 AND LOWER(b.e1) = 'x'",
        "SELECT a.e1 FROM pm2.g1 AS a, pm1.g1 AS b WHERE a.e1 = b.e1 AND (b.e2 = 1 OR b.e2 = 2)",
        "SELECT b.e1 FROM pm1.g1 AS b, pm2.g1 AS a WHERE a.e1 = b.e1 AND LOWER(b.e1) = 'x'",
        "SELECT e1 FROM pm2.g1 UNION SELECT LOWER(e1) FROM pm1.g1",
        "SELECT pm3.small.e1 FROM pm3.small, pm1.g1 \
         WHERE pm3.small.e1 = pm1.g1.e1 AND pm3.small.e2 > 5 AND UPPER(pm1.g1.e1) = 'A'",
        "SELECT e1 FROM pm3.large WHERE e2 >= 10 OR UPPER(e1) = 'B'",
        "SELECT vm1.v1.e1 FROM vm1.v1, pm2.g2 \
         WHERE vm1.v1.e1 = pm2.g2.e1 AND (pm2.g2.e2 = 1 OR LOWER(vm1.v1.e1) = 'z')",
    ] {
        let planned = plan(sql, &finder, OptimizerConfig::default())?;
        assert_eq!(undeclared_features(&planned, &finder), Vec::<String>::new(), "{sql}");
    }
    Ok(())
}

#[test]
fn test_connector_peer_criteria_stay_with_capable_model() -> PlanResult<()> {
    let finder = uneven_finder();
    let planned = plan(
        "SELECT a.e1 FROM pm2.g1 AS a, pm1.g1 AS b WHERE a.e1 = b.e1 AND LOWER(b.e1) = 'x'",
        &finder,
        OptimizerConfig::default(),
    )?;
    let commands = planned.root().atomic_commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].model, "pm1");
    assert!(commands[0].sql.contains("LOWER("), "{}", commands[0].sql);
    Ok(())
}

#[test]
fn test_correlated_subquery_evaluated_per_outer_row() -> PlanResult<()> {
    let planned = plan(
        "SELECT e1 FROM pm1.g1 WHERE EXISTS (SELECT 1 FROM pm2.g1 WHERE pm2.g1.e1 = pm1.g1.e1)",
        &full_finder(),
        OptimizerConfig::default(),
    )?;
    let select = match find(planned.root(), "Select") {
        Some(node) => node,
        None => panic!("Expected a local Select, got: {}", planned.root().explain()),
    };
    assert_eq!(select.subqueries.len(), 1);
    let inner = select.subqueries[0].plan.atomic_commands();
    assert_eq!(inner.len(), 1);
    assert_eq!(inner[0].model, "pm2");
    assert_eq!(inner[0].parameters(), vec!["pm1.g1.e1"]);
    assert!(inner[0].sql.contains("= ?"), "{}", inner[0].sql);
    Ok(())
}

#[test]
fn test_unsupported_criteria_stay_local() -> PlanResult<()> {
    let finder = StaticCapabilitiesFinder::new().with_model(
        "pm1",
        SourceCapabilities::full().without(Capability::CriteriaCompareOrdered),
    );
    let planned = plan(
        "SELECT e1 FROM pm1.g1 WHERE e2 > 5 AND e1 = 'a'",
        &finder,
        OptimizerConfig::default().with_validation(true),
    )?;
    let sql = commands(&planned);
    assert_eq!(sql.len(), 1);
    assert!(sql[0].contains("WHERE g_0.e1 = 'a'"), "{}", sql[0]);
    assert!(!sql[0].contains('>'), "{}", sql[0]);
    match find(planned.root(), "Select").map(|n| &n.operator) {
        Some(ExecOperator::Select { criteria }) => assert_eq!(criteria.to_string(), "pm1.g1.e2 > 5"),
        other => panic!("Expected local Select, got: {:?}", other),
    }
    Ok(())
}

#[test]
fn test_view_query_pushed_to_its_source() -> PlanResult<()> {
    let planned = plan("SELECT e1 FROM vm1.v1 WHERE e2 < 10", &full_finder(), OptimizerConfig::default())?;
    let sql = commands(&planned);
    assert_eq!(sql.len(), 1);
    assert!(sql[0].starts_with("SELECT g_0.e1 AS c_0 FROM pm1.g1 AS g_0 WHERE "), "{}", sql[0]);
    assert!(sql[0].contains("g_0.e2 > 0") && sql[0].contains("g_0.e2 < 10"), "{}", sql[0]);
    Ok(())
}

#[test]
fn test_planning_is_deterministic() -> PlanResult<()> {
    let sql = "SELECT pm1.g1.e1, pm2.g1.e2 FROM pm1.g1, pm2.g1, pm1.g2 \
               WHERE pm1.g1.e1 = pm2.g1.e1 AND pm1.g1.e2 = pm1.g2.e2 AND pm2.g1.e3 = TRUE";
    let first = plan(sql, &full_finder(), OptimizerConfig::default())?;
    let second = plan(sql, &full_finder(), OptimizerConfig::default())?;
    assert_eq!(commands(&first), commands(&second));
    assert_eq!(first.root().explain(), second.root().explain());
    assert_eq!(
        first.analysis_trace().optimized_plan,
        second.analysis_trace().optimized_plan
    );
    Ok(())
}

#[test]
fn test_analysis_trace_serializes() -> PlanResult<()> {
    let planned = plan(
        "SELECT pm1.g1.e2 FROM pm1.g1, pm2.g1 WHERE pm1.g1.e1 = pm2.g1.e1",
        &full_finder(),
        OptimizerConfig::default(),
    )?;
    let json = planned.analysis_trace().to_json()?;
    let value: serde_json::Value = serde_json::from_str(&json)?;
    assert_eq!(value["atomic_commands"].as_array().map(Vec::len), Some(2));
    assert!(value["rule_applications"].as_u64().is_some_and(|n| n > 0));
    Ok(())
}

#[test]
fn test_rule_ceiling_from_json_config() -> PlanResult<()> {
    let config = OptimizerConfig::from_json(r#"{"max_rule_applications": 2}"#)?;
    match plan(
        "SELECT pm1.g1.e2 FROM pm1.g1, pm2.g1 WHERE pm1.g1.e1 = pm2.g1.e1",
        &full_finder(),
        config,
    ) {
        Err(err @ PlanError::RuleIterationCeilingExceeded { .. }) => assert!(err.is_internal()),
        other => panic!("Expected RuleIterationCeilingExceeded, got: {:?}", other),
    }
    Ok(())
}
