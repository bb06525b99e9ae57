use arrow::datatypes::DataType;

use super::*;
use crate::capabilities::{Capability, SourceCapabilities};
use crate::command::JoinType;
use crate::expr::Expr;
use crate::plan::{BlockState, JoinSide, JoinStrategy, NodeKind, NodeProps, PlanTree, SortSource, explain};
use crate::test_util::{canonical, nodes_of, optimize, optimize_with, oracle};

fn full(models: &[&'static str]) -> Vec<(&'static str, SourceCapabilities)> {
    models
        .iter()
        .map(|m| (*m, SourceCapabilities::full()))
        .collect()
}

fn run_rules(tree: &mut PlanTree, rules: Vec<Box<dyn OptimizationRule>>, models: &[(&str, SourceCapabilities)]) {
    let config = OptimizerConfig::default();
    let oracle = oracle(models, &config);
    let ctx = RuleContext {
        oracle: &oracle,
        config: &config,
    };
    QueryOptimizer::with_rules(rules).optimize(tree, &ctx).unwrap();
}

fn join_strategy(tree: &PlanTree) -> JoinStrategy {
    let joins = nodes_of(tree, NodeKind::Join);
    match tree.props(joins[0]).unwrap() {
        NodeProps::Join {
            strategy: Some(strategy),
            ..
        } => strategy.clone(),
        other => panic!("Expected planned Join, got: {:?}", other),
    }
}

/// Rule that changes nothing but always claims it did.
struct Spin;

impl OptimizationRule for Spin {
    fn name(&self) -> &'static str {
        "Spin"
    }

    fn targets(&self) -> &'static [NodeKind] {
        &[NodeKind::Source]
    }

    fn apply(&self, _tree: &mut PlanTree, node: NodeId, _ctx: &RuleContext<'_>) -> PlanResult<Transformed> {
        Ok(Transformed::yes([node]))
    }
}

/// Same as [`Spin`], but never queued again.
struct Once;

impl OptimizationRule for Once {
    fn name(&self) -> &'static str {
        "Once"
    }

    fn targets(&self) -> &'static [NodeKind] {
        &[NodeKind::Source]
    }

    fn mode(&self) -> RuleMode {
        RuleMode::SinglePass
    }

    fn apply(&self, _tree: &mut PlanTree, node: NodeId, _ctx: &RuleContext<'_>) -> PlanResult<Transformed> {
        Ok(Transformed::yes([node]))
    }
}

// ===== Engine =====

#[test]
fn test_default_rule_order() {
    assert_eq!(
        QueryOptimizer::new().rule_names(),
        vec![
            "PlaceAccess",
            "MergeVirtual",
            "PushSelectCriteria",
            "CopyCriteria",
            "RaiseNull",
            "PlanJoins",
            "RaiseAccess",
            "PushLimit",
            "ChooseDependent",
            "ChooseJoinStrategy",
        ]
    );
}

#[test]
fn test_iteration_ceiling_is_an_error() {
    let mut tree = canonical("SELECT e1 FROM pm1.g1");
    let config = OptimizerConfig::default().with_max_rule_applications(5);
    let oracle = oracle(&full(&["pm1"]), &config);
    let ctx = RuleContext {
        oracle: &oracle,
        config: &config,
    };
    match QueryOptimizer::with_rules(vec![Box::new(Spin)]).optimize(&mut tree, &ctx) {
        Err(PlanError::RuleIterationCeilingExceeded { ceiling, rule }) => {
            assert_eq!(ceiling, 5);
            assert_eq!(rule, "Spin");
        }
        other => panic!("Expected RuleIterationCeilingExceeded, got: {:?}", other),
    }
}

#[test]
fn test_single_pass_rule_runs_once_per_node() {
    let mut tree = canonical("SELECT pm1.g1.e1 FROM pm1.g1, pm1.g2");
    let config = OptimizerConfig::default();
    let oracle = oracle(&full(&["pm1"]), &config);
    let ctx = RuleContext {
        oracle: &oracle,
        config: &config,
    };
    let outcome = QueryOptimizer::with_rules(vec![Box::new(Once)])
        .optimize(&mut tree, &ctx)
        .unwrap();
    assert_eq!(outcome.applications, 2);
    assert_eq!(outcome.firings.len(), 2);
    assert!(outcome.firings.iter().all(|f| f.before.is_none()));
}

#[test]
fn test_trace_plans_records_explain_text() {
    let config = OptimizerConfig::default().with_trace_plans(true);
    let mut tree = canonical("SELECT e1 FROM pm1.g1");
    let oracle = oracle(&full(&["pm1"]), &config);
    let ctx = RuleContext {
        oracle: &oracle,
        config: &config,
    };
    let outcome = QueryOptimizer::new().optimize(&mut tree, &ctx).unwrap();
    let first = &outcome.firings[0];
    assert_eq!(first.rule, "PlaceAccess");
    assert!(first.before.as_deref().is_some_and(|b| !b.contains("Access")));
    assert!(first.after.as_deref().is_some_and(|a| a.contains("Access [pm1]")));
}

#[test]
fn test_optimize_is_idempotent() {
    let models = full(&["pm1", "pm2"]);
    let sql = "SELECT pm1.g1.e1, pm2.g1.e2 FROM pm1.g1, pm2.g1 \
               WHERE pm1.g1.e1 = pm2.g1.e1 AND pm1.g1.e2 = 5";
    let mut tree = optimize(sql, &models).unwrap();
    let first = explain(&tree);

    let config = OptimizerConfig::default();
    let oracle = oracle(&models, &config);
    let ctx = RuleContext {
        oracle: &oracle,
        config: &config,
    };
    QueryOptimizer::new().optimize(&mut tree, &ctx).unwrap();
    assert_eq!(explain(&tree), first);
}

// ===== PlaceAccess / RaiseAccess =====

#[test]
fn test_place_access_above_every_source() {
    let mut tree = canonical("SELECT pm1.g1.e1 FROM pm1.g1, pm2.g1");
    run_rules(&mut tree, vec![Box::new(PlaceAccess)], &full(&["pm1", "pm2"]));
    let accesses = nodes_of(&tree, NodeKind::Access);
    assert_eq!(accesses.len(), 2);
    for access in accesses {
        let child = tree.first_child(access).unwrap();
        assert_eq!(tree.kind(child).unwrap(), NodeKind::Source);
    }
}

#[test]
fn test_raise_access_pushes_whole_query() {
    let tree = optimize("SELECT e1 FROM pm1.g1 WHERE e2 > 5", &full(&["pm1"])).unwrap();
    let root = tree.root().unwrap();
    assert_eq!(tree.kind(root).unwrap(), NodeKind::Access);
    assert_eq!(nodes_of(&tree, NodeKind::Access).len(), 1);
}

#[test]
fn test_raise_access_stops_at_unsupported_criteria() {
    let caps = SourceCapabilities::full().without(Capability::CriteriaCompareOrdered);
    let tree = optimize("SELECT e1 FROM pm1.g1 WHERE e2 > 5", &[("pm1", caps)]).unwrap();
    let access = nodes_of(&tree, NodeKind::Access)[0];
    let parent = tree.parent(access).unwrap();
    match tree.props(parent).unwrap() {
        NodeProps::Select { .. } => {}
        other => panic!("Expected Select above Access, got: {:?}", other),
    }
}

#[test]
fn test_same_model_join_is_one_access() {
    let tree = optimize(
        "SELECT pm1.g1.e1 FROM pm1.g1, pm1.g2 WHERE pm1.g1.e1 = pm1.g2.e1",
        &full(&["pm1"]),
    )
    .unwrap();
    assert_eq!(nodes_of(&tree, NodeKind::Access).len(), 1);
    assert_eq!(tree.kind(tree.root().unwrap()).unwrap(), NodeKind::Access);
}

#[test]
fn test_connector_groups_models() {
    let caps = SourceCapabilities::full().with_connector("oracle-1");
    let models = [("pm1", caps.clone()), ("pm2", caps)];
    let sql = "SELECT pm1.g1.e1 FROM pm1.g1, pm2.g1 WHERE pm1.g1.e1 = pm2.g1.e1";

    let tree = optimize(sql, &models).unwrap();
    assert_eq!(nodes_of(&tree, NodeKind::Access).len(), 1);

    let config = OptimizerConfig::default().with_same_connector_pushdown(false);
    let tree = optimize_with(sql, &models, &config).unwrap();
    assert_eq!(nodes_of(&tree, NodeKind::Access).len(), 2);
}

/// Every expression below each Access node must be one its model evaluates.
fn assert_pushdown_sound(tree: &PlanTree, models: &[(&str, SourceCapabilities)]) {
    let config = OptimizerConfig::default();
    let oracle = oracle(models, &config);
    for access in nodes_of(tree, NodeKind::Access) {
        let NodeProps::Access { model } = tree.props(access).unwrap() else {
            unreachable!()
        };
        for id in tree.preorder(access) {
            for expr in tree.props(id).unwrap().exprs() {
                assert!(oracle.can_push_expr(model, expr), "{model} cannot evaluate {expr}");
            }
        }
    }
}

fn access_models(tree: &PlanTree) -> Vec<String> {
    nodes_of(tree, NodeKind::Access)
        .into_iter()
        .map(|id| match tree.props(id).unwrap() {
            NodeProps::Access { model } => model.clone(),
            other => panic!("Expected Access, got: {:?}", other),
        })
        .collect()
}

#[test]
fn test_connector_peer_absorbed_only_when_supported() {
    let models = [
        ("pm1", SourceCapabilities::full().with_connector("c")),
        (
            "pm2",
            SourceCapabilities::full()
                .with_connector("c")
                .without_function("LOWER")
                .without(Capability::CriteriaOr),
        ),
    ];
    for sql in [
        "SELECT a.e1 FROM pm2.g1 AS a, pm1.g1 AS b WHERE a.e1 = b.e1 AND LOWER(b.e1) = 'x'",
        "SELECT a.e1 FROM pm2.g1 AS a, pm1.g1 AS b WHERE a.e1 = b.e1 AND (b.e2 = 1 OR b.e2 = 2)",
    ] {
        let tree = optimize(sql, &models).unwrap();
        assert_pushdown_sound(&tree, &models);
        // pm1 can still take the whole join
        assert_eq!(access_models(&tree), vec!["pm1".to_string()], "{sql}");
    }
}

#[test]
fn test_connector_peers_with_disjoint_functions_stay_apart() {
    let models = [
        (
            "pm1",
            SourceCapabilities::full().with_connector("c").without_function("UPPER"),
        ),
        (
            "pm2",
            SourceCapabilities::full().with_connector("c").without_function("LOWER"),
        ),
    ];
    let sql = "SELECT a.e1 FROM pm2.g1 AS a, pm1.g1 AS b \
               WHERE a.e1 = b.e1 AND LOWER(b.e1) = 'x' AND UPPER(a.e1) = 'Y'";
    let tree = optimize(sql, &models).unwrap();
    assert_pushdown_sound(&tree, &models);
    assert_eq!(nodes_of(&tree, NodeKind::Access).len(), 2);
}

#[test]
fn test_connector_peer_union_checks_branch_functions() {
    let models = [
        ("pm1", SourceCapabilities::full().with_connector("c")),
        (
            "pm2",
            SourceCapabilities::full().with_connector("c").without_function("LOWER"),
        ),
    ];
    let sql = "SELECT e1 FROM pm2.g1 UNION SELECT LOWER(e1) FROM pm1.g1";
    let tree = optimize(sql, &models).unwrap();
    assert_pushdown_sound(&tree, &models);
    assert!(access_models(&tree).iter().all(|m| m == "pm1" || m == "pm2"));
}

#[test]
fn test_self_join_needs_alias_support() {
    let sql = "SELECT a.e1 FROM pm1.g1 AS a, pm1.g1 AS b WHERE a.e1 = b.e1";
    let tree = optimize(sql, &full(&["pm1"])).unwrap();
    assert_eq!(nodes_of(&tree, NodeKind::Access).len(), 1);

    let caps = SourceCapabilities::full().without(Capability::JoinSelfJoin);
    let tree = optimize(sql, &[("pm1", caps)]).unwrap();
    assert_eq!(nodes_of(&tree, NodeKind::Access).len(), 2);
}

// ===== MergeVirtual =====

#[test]
fn test_simple_view_is_merged() {
    let tree = optimize("SELECT e1 FROM vm1.v1 WHERE e2 < 10", &full(&["pm1"])).unwrap();
    let sources = nodes_of(&tree, NodeKind::Source);
    assert_eq!(sources.len(), 1);
    match tree.props(sources[0]).unwrap() {
        NodeProps::Source(source) => {
            assert!(!source.is_virtual);
            assert_eq!(source.group.name, "vm1.v1__pm1.g1");
        }
        other => panic!("Expected Source, got: {:?}", other),
    }
    assert_eq!(nodes_of(&tree, NodeKind::Access).len(), 1);
}

#[test]
fn test_grouping_view_stays_inline() {
    let tree = optimize("SELECT e1 FROM vm1.v2 WHERE cnt > 1", &full(&["pm1"])).unwrap();
    let views: Vec<_> = nodes_of(&tree, NodeKind::Source)
        .into_iter()
        .filter(|id| matches!(tree.props(*id), Ok(NodeProps::Source(s)) if s.is_virtual))
        .collect();
    assert_eq!(views.len(), 1);
    // the filter on the aggregate stays above the view
    let parent = tree.parent(views[0]).unwrap();
    match tree.props(parent).unwrap() {
        NodeProps::Select { criteria, .. } => assert!(criteria.to_string().contains("cnt")),
        other => panic!("Expected Select above view, got: {:?}", other),
    }
    assert_eq!(nodes_of(&tree, NodeKind::Access).len(), 1);
}

// ===== PushSelectCriteria / CopyCriteria =====

#[test]
fn test_criteria_reach_their_join_side() {
    let tree = optimize(
        "SELECT pm1.g1.e1 FROM pm1.g1, pm2.g1 WHERE pm1.g1.e2 = 5 AND pm1.g1.e1 = pm2.g1.e1",
        &full(&["pm1", "pm2"]),
    )
    .unwrap();
    let join = nodes_of(&tree, NodeKind::Join)[0];
    match tree.props(join).unwrap() {
        NodeProps::Join {
            join_type,
            criteria,
            ..
        } => {
            assert_eq!(*join_type, JoinType::Inner);
            assert_eq!(criteria.len(), 1);
        }
        other => panic!("Expected Join, got: {:?}", other),
    }
    let pm1_filter = nodes_of(&tree, NodeKind::Select).into_iter().any(|id| {
        matches!(tree.props(id), Ok(NodeProps::Select { criteria, .. }) if criteria.to_string() == "pm1.g1.e2 = 5")
    });
    assert!(pm1_filter);
}

#[test]
fn test_binding_copied_across_join_keys() {
    let tree = optimize(
        "SELECT pm1.g1.e1 FROM pm1.g1, pm2.g1 WHERE pm1.g1.e1 = pm2.g1.e1 AND pm1.g1.e1 = 'a'",
        &full(&["pm1", "pm2"]),
    )
    .unwrap();
    let copied = nodes_of(&tree, NodeKind::Select).into_iter().find(|id| {
        matches!(tree.props(*id), Ok(NodeProps::Select { criteria, .. }) if criteria.to_string() == "pm2.g1.e1 = 'a'")
    });
    let copied = copied.unwrap_or_else(|| panic!("Expected copied criteria, got:\n{}", explain(&tree)));
    // inside the pm2 source query
    assert!(tree
        .ancestors(copied)
        .iter()
        .any(|a| matches!(tree.props(*a), Ok(NodeProps::Access { model }) if model == "pm2")));
}

#[test]
fn test_null_rejecting_criteria_make_outer_join_inner() {
    let tree = optimize(
        "SELECT pm1.g1.e1 FROM pm1.g1 LEFT OUTER JOIN pm2.g1 ON pm1.g1.e1 = pm2.g1.e1 \
         WHERE pm2.g1.e2 = 5",
        &full(&["pm1", "pm2"]),
    )
    .unwrap();
    let join = nodes_of(&tree, NodeKind::Join)[0];
    match tree.props(join).unwrap() {
        NodeProps::Join { join_type, .. } => assert_eq!(*join_type, JoinType::Inner),
        other => panic!("Expected Join, got: {:?}", other),
    }
}

#[test]
fn test_is_null_keeps_outer_join() {
    let tree = optimize(
        "SELECT pm1.g1.e1 FROM pm1.g1 LEFT OUTER JOIN pm2.g1 ON pm1.g1.e1 = pm2.g1.e1 \
         WHERE pm2.g1.e2 IS NULL",
        &full(&["pm1", "pm2"]),
    )
    .unwrap();
    let join = nodes_of(&tree, NodeKind::Join)[0];
    match tree.props(join).unwrap() {
        NodeProps::Join { join_type, .. } => assert_eq!(*join_type, JoinType::LeftOuter),
        other => panic!("Expected Join, got: {:?}", other),
    }
    let parent = tree.parent(join).unwrap();
    assert_eq!(tree.kind(parent).unwrap(), NodeKind::Select);
}

// ===== RaiseNull =====

#[test]
fn test_contradiction_becomes_null() {
    let tree = optimize("SELECT e1 FROM pm1.g1 WHERE 1 = 0", &full(&["pm1"])).unwrap();
    let root = tree.root().unwrap();
    match tree.props(root).unwrap() {
        NodeProps::Null { outputs, .. } => {
            assert_eq!(outputs.len(), 1);
            assert_eq!(outputs[0].output_name(), "e1");
        }
        other => panic!("Expected Null, got: {:?}", other),
    }
    assert!(tree.children(root).unwrap().is_empty());
}

#[test]
fn test_limit_zero_becomes_null() {
    let tree = optimize("SELECT e1 FROM pm1.g1 LIMIT 0", &full(&["pm1"])).unwrap();
    assert_eq!(tree.kind(tree.root().unwrap()).unwrap(), NodeKind::Null);
}

#[test]
fn test_global_aggregate_over_nothing_keeps_one_row() {
    let tree = optimize("SELECT COUNT(*) FROM pm1.g1 WHERE 1 = 0", &full(&["pm1"])).unwrap();
    assert!(nodes_of(&tree, NodeKind::Null).is_empty());
    assert!(nodes_of(&tree, NodeKind::Grouping).is_empty());
    let root = tree.root().unwrap();
    match tree.props(root).unwrap() {
        NodeProps::Project { columns } => assert!(matches!(columns[0].expr, Expr::Literal(_))),
        other => panic!("Expected Project, got: {:?}", other),
    }
}

#[test]
fn test_empty_inner_side_of_outer_join_collapses() {
    let mut tree = canonical(
        "SELECT pm1.g1.e1, pm2.g1.e2 FROM pm1.g1 LEFT OUTER JOIN pm2.g1 ON pm1.g1.e1 = pm2.g1.e1",
    );
    let join = nodes_of(&tree, NodeKind::Join)[0];
    let inner = tree.child(join, 1).unwrap();
    let outputs = tree.natural_outputs(inner).unwrap();
    let groups = tree.groups(inner);
    let null = tree.add_node(NodeProps::Null { outputs, groups });
    tree.replace(inner, null).unwrap();
    tree.delete_subtree(inner).unwrap();

    run_rules(&mut tree, vec![Box::new(RaiseNull)], &full(&["pm1", "pm2"]));
    assert!(nodes_of(&tree, NodeKind::Join).is_empty());
    let root = tree.root().unwrap();
    match tree.props(root).unwrap() {
        NodeProps::Project { columns } => {
            assert!(matches!(columns[0].expr, Expr::Column(_)));
            assert_eq!(columns[1].expr, Expr::TypedNull(DataType::Int32));
        }
        other => panic!("Expected Project, got: {:?}", other),
    }
    tree.validate().unwrap();
}

#[test]
fn test_dead_union_branch_is_dropped() {
    let tree = optimize(
        "SELECT e1 FROM pm1.g1 UNION ALL SELECT e1 FROM pm2.g1 WHERE 1 = 0",
        &full(&["pm1", "pm2"]),
    )
    .unwrap();
    assert!(nodes_of(&tree, NodeKind::Union).is_empty());
    assert!(nodes_of(&tree, NodeKind::Null).is_empty());
    assert!(nodes_of(&tree, NodeKind::DupRemove).is_empty());

    let tree = optimize(
        "SELECT e1 FROM pm1.g1 WHERE 1 = 0 UNION SELECT e1 FROM pm2.g1",
        &full(&["pm1", "pm2"]),
    )
    .unwrap();
    assert!(nodes_of(&tree, NodeKind::Union).is_empty());
    assert_eq!(nodes_of(&tree, NodeKind::DupRemove).len(), 1);
}

// ===== PlanJoins =====

#[test]
fn test_join_order_groups_same_source_leaves() {
    let tree = optimize(
        "SELECT pm1.g1.e1 FROM pm1.g1, pm2.g1, pm1.g2 \
         WHERE pm1.g1.e1 = pm1.g2.e1 AND pm1.g2.e2 = pm2.g1.e2",
        &full(&["pm1", "pm2"]),
    )
    .unwrap();
    let accesses = nodes_of(&tree, NodeKind::Access);
    assert_eq!(accesses.len(), 2);
    let merged = accesses.iter().any(|a| {
        let groups = tree.groups(*a);
        groups.contains("pm1.g1") && groups.contains("pm1.g2")
    });
    assert!(merged, "{}", explain(&tree));
}

#[test]
fn test_access_pattern_without_binding_fails() {
    match optimize("SELECT pm4.g1.e2 FROM pm4.g1, pm1.g1", &full(&["pm1", "pm4"])) {
        Err(PlanError::AccessPatternNotSatisfied { group, columns }) => {
            assert_eq!(group, "pm4.g1");
            assert_eq!(columns, vec!["e1".to_string()]);
        }
        other => panic!("Expected AccessPatternNotSatisfied, got: {:?}", other),
    }
}

#[test]
fn test_access_pattern_leaf_placed_after_its_binding() {
    let tree = optimize(
        "SELECT pm1.g1.e1 FROM pm4.g1, pm1.g1 WHERE pm4.g1.e1 = pm1.g1.e1",
        &full(&["pm1", "pm4"]),
    )
    .unwrap();
    let join = nodes_of(&tree, NodeKind::Join)[0];
    let right = tree.child(join, 1).unwrap();
    assert!(tree.groups(right).contains("pm4.g1"));
    match join_strategy(&tree) {
        JoinStrategy::DependentSemiJoin(dep) => assert_eq!(dep.independent, JoinSide::Left),
        other => panic!("Expected DependentSemiJoin, got: {:?}", other),
    }
}

// ===== PushLimit =====

#[test]
fn test_limit_bounds_each_union_all_branch() {
    let tree = optimize(
        "SELECT e1 FROM pm1.g1 UNION ALL SELECT e1 FROM pm2.g1 LIMIT 10",
        &full(&["pm1", "pm2"]),
    )
    .unwrap();
    let accesses = nodes_of(&tree, NodeKind::Access);
    assert_eq!(accesses.len(), 2);
    for access in accesses {
        assert!(BlockState::of(&tree, access).has_limit, "{}", explain(&tree));
    }
    assert_eq!(tree.kind(tree.root().unwrap()).unwrap(), NodeKind::Limit);
}

#[test]
fn test_limit_with_unsupported_offset_bounds_source() {
    let caps = SourceCapabilities::full().without(Capability::RowOffset);
    let tree = optimize("SELECT e1 FROM pm1.g1 LIMIT 10 OFFSET 5", &[("pm1", caps)]).unwrap();
    let root = tree.root().unwrap();
    match tree.props(root).unwrap() {
        NodeProps::Limit { offset, count } => {
            assert_eq!(*offset, 5);
            assert_eq!(*count, Some(10));
        }
        other => panic!("Expected Limit, got: {:?}", other),
    }
    let inner = nodes_of(&tree, NodeKind::Limit)
        .into_iter()
        .filter(|id| *id != root)
        .collect::<Vec<_>>();
    assert_eq!(inner.len(), 1);
    match tree.props(inner[0]).unwrap() {
        NodeProps::Limit { offset, count } => {
            assert_eq!(*offset, 0);
            assert_eq!(*count, Some(15));
        }
        other => panic!("Expected Limit, got: {:?}", other),
    }
}

// ===== ChooseDependent =====

#[test]
fn test_small_independent_side_drives_dependent_join() {
    let models = [
        ("pm1", SourceCapabilities::full().with_max_in_list(10)),
        ("pm3", SourceCapabilities::full()),
    ];
    let tree = optimize(
        "SELECT pm1.g1.e2 FROM pm3.g1, pm1.g1 WHERE pm3.g1.e1 = pm1.g1.e1",
        &models,
    )
    .unwrap();
    match join_strategy(&tree) {
        JoinStrategy::DependentSemiJoin(dep) => {
            assert_eq!(dep.independent, JoinSide::Left);
            assert_eq!(dep.independent_estimate, Some(100));
            assert_eq!(dep.max_in_list, 10);
            assert_eq!(dep.expected_batches, Some(10));
            assert_eq!(dep.sources.len(), 1);
        }
        other => panic!("Expected DependentSemiJoin, got: {:?}", other),
    }
    let slots = nodes_of(&tree, NodeKind::Select)
        .into_iter()
        .filter(|id| matches!(tree.props(*id), Ok(NodeProps::Select { criteria, .. }) if criteria.contains_dependent_set()))
        .count();
    assert_eq!(slots, 1);
}

#[test]
fn test_makenotdep_hint_blocks_dependent_join() {
    let tree = optimize(
        "SELECT pm1.g1.e2 FROM pm3.g1, pm1.g1 WHERE pm3.g1.e1 = pm1.g1.e1 OPTION MAKENOTDEP pm1.g1",
        &full(&["pm1", "pm3"]),
    )
    .unwrap();
    match join_strategy(&tree) {
        JoinStrategy::MergeSorted { sorted, .. } => {
            assert_eq!(sorted, [SortSource::Pushed, SortSource::Pushed]);
        }
        other => panic!("Expected MergeSorted, got: {:?}", other),
    }
}

#[test]
fn test_makedep_hint_names_dependent_side() {
    let tree = optimize(
        "SELECT pm1.g1.e2 FROM pm1.g1, pm2.g1 WHERE pm1.g1.e1 = pm2.g1.e1 OPTION MAKEDEP pm1.g1",
        &full(&["pm1", "pm2"]),
    )
    .unwrap();
    let join = nodes_of(&tree, NodeKind::Join)[0];
    match join_strategy(&tree) {
        JoinStrategy::DependentSemiJoin(dep) => {
            let dependent = tree.child(join, dep.dependent().index()).unwrap();
            assert!(tree.groups(dependent).contains("pm1.g1"));
        }
        other => panic!("Expected DependentSemiJoin, got: {:?}", other),
    }
}

#[test]
fn test_infeasible_makedep_hint_is_ignored() {
    let models = [
        ("pm1", SourceCapabilities::full()),
        ("pm2", SourceCapabilities::full().without(Capability::CriteriaIn)),
    ];
    let tree = optimize(
        "SELECT pm1.g1.e2 FROM pm1.g1, pm2.g1 WHERE pm1.g1.e1 = pm2.g1.e1 OPTION MAKEDEP pm2.g1",
        &models,
    )
    .unwrap();
    assert!(!matches!(join_strategy(&tree), JoinStrategy::DependentSemiJoin(_)));
}

// ===== ChooseJoinStrategy =====

#[test]
fn test_orderable_inputs_merge_join() {
    let tree = optimize(
        "SELECT pm1.g1.e2 FROM pm1.g1, pm2.g1 WHERE pm1.g1.e1 = pm2.g1.e1",
        &full(&["pm1", "pm2"]),
    )
    .unwrap();
    match join_strategy(&tree) {
        JoinStrategy::MergeSorted { sorted, .. } => {
            assert_eq!(sorted, [SortSource::Pushed, SortSource::Pushed])
        }
        other => panic!("Expected MergeSorted, got: {:?}", other),
    }
    // each sort sits at the top of its source query
    for access in nodes_of(&tree, NodeKind::Access) {
        let top = tree.first_child(access).unwrap();
        assert_eq!(tree.kind(top).unwrap(), NodeKind::Sort);
    }
}

#[test]
fn test_unorderable_input_nested_loop() {
    let models = [
        ("pm1", SourceCapabilities::full()),
        ("pm2", SourceCapabilities::full().without(Capability::OrderBy)),
    ];
    let tree = optimize(
        "SELECT pm1.g1.e2 FROM pm1.g1, pm2.g1 WHERE pm1.g1.e1 = pm2.g1.e1",
        &models,
    )
    .unwrap();
    assert_eq!(join_strategy(&tree), JoinStrategy::NestedLoop);
    assert!(nodes_of(&tree, NodeKind::Sort).is_empty());
}

#[test]
fn test_small_unorderable_input_sorted_locally() {
    let models = [
        ("pm1", SourceCapabilities::full()),
        ("pm3", SourceCapabilities::full().without(Capability::OrderBy)),
    ];
    let tree = optimize(
        "SELECT pm1.g1.e2 FROM pm3.g1, pm1.g1 WHERE pm3.g1.e1 = pm1.g1.e1 \
         OPTION MAKENOTDEP pm1.g1, pm3.g1",
        &models,
    )
    .unwrap();
    match join_strategy(&tree) {
        JoinStrategy::MergeSorted { sorted, .. } => {
            assert_eq!(sorted, [SortSource::Local, SortSource::Pushed])
        }
        other => panic!("Expected MergeSorted, got: {:?}", other),
    }
}

#[test]
fn test_large_small_pair_partitioned_sort() {
    let caps = SourceCapabilities::full()
        .without(Capability::JoinInner)
        .without(Capability::JoinCross);
    let tree = optimize(
        "SELECT pm3.g1.e2 FROM pm3.g1, pm3.g2 WHERE pm3.g1.e1 = pm3.g2.e1 \
         OPTION MAKENOTDEP pm3.g1, pm3.g2",
        &[("pm3", caps)],
    )
    .unwrap();
    match join_strategy(&tree) {
        JoinStrategy::PartitionedSort { sorted_side, .. } => assert_eq!(sorted_side, JoinSide::Left),
        other => panic!("Expected PartitionedSort, got: {:?}", other),
    }
}

#[test]
fn test_cross_join_nested_loop() {
    let tree = optimize("SELECT pm1.g1.e2 FROM pm1.g1, pm2.g1", &full(&["pm1", "pm2"])).unwrap();
    assert_eq!(join_strategy(&tree), JoinStrategy::NestedLoop);
}
