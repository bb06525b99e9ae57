//! 플랜 마무리 (finalization)
//!
//! Runs after the rules: checks access patterns and tree invariants,
//! assigns the columns every node must produce, renders each Access
//! subtree into one [`AtomicCommand`] and converts the rest of the tree
//! into [`ExecNode`]s.

mod dependent;
mod exec;
mod render;


pub use dependent::{AtomicCommand, CommandSegment, batch_values};
pub use exec::{ExecNode, ExecOperator, PlannedSubquery};

use tracing::debug;

use crate::capabilities::CapabilityOracle;
use crate::command::{Command, SelectColumn};
use crate::config::OptimizerConfig;
use crate::error::{PlanError, PlanResult};
use crate::expr::Expr;
use crate::plan::{BlockState, JoinStrategy, NodeId, NodeProps, PlanTree, unmet_access_patterns};
use crate::sql::SqlParser;

/// Plans subqueries that stay local to the engine.
pub trait SubqueryPlanner {
    fn plan_subquery(&self, command: &Command) -> PlanResult<ExecNode>;
}

/// 플랜 마무리 단계
pub struct PlanFinalizer<'a> {
    oracle: &'a CapabilityOracle,
    config: &'a OptimizerConfig,
    subqueries: Option<&'a dyn SubqueryPlanner>,
}

impl<'a> PlanFinalizer<'a> {
    pub fn new(oracle: &'a CapabilityOracle, config: &'a OptimizerConfig) -> Self {
        Self {
            oracle,
            config,
            subqueries: None,
        }
    }

    pub fn with_subquery_planner(mut self, planner: &'a dyn SubqueryPlanner) -> Self {
        self.subqueries = Some(planner);
        self
    }

    /// Turn an optimized tree into its execution plan.
    pub fn finalize(&self, tree: &mut PlanTree) -> PlanResult<ExecNode> {
        let root = tree
            .root()
            .ok_or_else(|| PlanError::InvalidTree("tree has no root".to_string()))?;
        for id in tree.node_ids() {
            if let NodeProps::Access { .. } = tree.props(id)?
                && let Some((group, columns)) = unmet_access_patterns(tree, id).into_iter().next()
            {
                return Err(PlanError::AccessPatternNotSatisfied {
                    group: group.name,
                    columns,
                });
            }
        }
        tree.validate()?;
        let required = tree.natural_outputs(root)?;
        assign_outputs(tree, root, required)?;
        self.build(tree, root)
    }

    fn build(&self, tree: &PlanTree, id: NodeId) -> PlanResult<ExecNode> {
        let node = tree.node(id)?;
        let outputs = node.outputs.clone();
        let children = || -> PlanResult<Vec<ExecNode>> {
            node.children().iter().map(|c| self.build(tree, *c)).collect()
        };
        let mut exec = match &node.props {
            NodeProps::Access { model } => {
                let command = render::render_access(tree, self.oracle, id)?;
                debug!(
                    target: "fedplan::finalize",
                    model = model.as_str(),
                    sql = command.sql.as_str(),
                    "atomic command rendered"
                );
                if self.config.validate_atomic_commands {
                    SqlParser::new().parse(&command.probe_sql())?;
                }
                ExecNode::new(
                    ExecOperator::Access {
                        model: model.clone(),
                        command,
                    },
                    outputs,
                    vec![],
                )
            }
            NodeProps::Source(source) if source.is_virtual => {
                // the view's select items, renamed to the view's columns
                let input = tree.child(id, 0)?;
                let produced = tree.natural_outputs(input)?;
                let columns = outputs
                    .iter()
                    .map(|output| {
                        let position = source
                            .elements
                            .iter()
                            .position(|e| output.as_column() == Some(e))
                            .ok_or_else(|| {
                                PlanError::InvalidTree(format!(
                                    "{output} is not a column of view {}",
                                    source.group
                                ))
                            })?;
                        let expr = produced.get(position).cloned().ok_or_else(|| {
                            PlanError::InvalidTree(format!(
                                "view {} produces fewer columns than it declares",
                                source.group
                            ))
                        })?;
                        Ok(SelectColumn::new(output.output_name(), expr))
                    })
                    .collect::<PlanResult<Vec<_>>>()?;
                ExecNode::new(ExecOperator::Project { columns }, outputs, children()?)
            }
            NodeProps::Source(source) => {
                return Err(PlanError::InvalidTree(format!(
                    "source {} is not below an Access node",
                    source.group
                )));
            }
            NodeProps::Select { criteria, .. } => ExecNode::new(
                ExecOperator::Select {
                    criteria: criteria.clone(),
                },
                outputs,
                children()?,
            ),
            NodeProps::Project { columns } => ExecNode::new(
                ExecOperator::Project {
                    columns: columns.clone(),
                },
                outputs,
                children()?,
            ),
            NodeProps::Join {
                join_type,
                criteria,
                strategy,
                ..
            } => ExecNode::new(
                ExecOperator::Join {
                    join_type: *join_type,
                    criteria: criteria.clone(),
                    strategy: strategy.clone().unwrap_or(JoinStrategy::NestedLoop),
                },
                outputs,
                children()?,
            ),
            NodeProps::Grouping {
                group_by,
                aggregates,
            } => ExecNode::new(
                ExecOperator::Grouping {
                    group_by: group_by.clone(),
                    aggregates: aggregates.clone(),
                },
                outputs,
                children()?,
            ),
            NodeProps::Sort { items } => ExecNode::new(
                ExecOperator::Sort {
                    items: items.clone(),
                },
                outputs,
                children()?,
            ),
            NodeProps::DupRemove => ExecNode::new(ExecOperator::DupRemove, outputs, children()?),
            NodeProps::Limit { offset, count } => ExecNode::new(
                ExecOperator::Limit {
                    offset: *offset,
                    count: *count,
                },
                outputs,
                children()?,
            ),
            NodeProps::SetOp { op, all } => ExecNode::new(
                ExecOperator::SetOp { op: *op, all: *all },
                outputs,
                children()?,
            ),
            NodeProps::Null { .. } => ExecNode::new(ExecOperator::Null, outputs, vec![]),
        };
        if !matches!(node.props, NodeProps::Access { .. }) {
            exec.subqueries = self.plan_subqueries(&node.props)?;
        }
        Ok(exec)
    }

    fn plan_subqueries(&self, props: &NodeProps) -> PlanResult<Vec<PlannedSubquery>> {
        let mut out = Vec::new();
        for expr in props.exprs() {
            for command in expr.subqueries() {
                // outer references stay parameters, bound per outer row
                let planner = self.subqueries.ok_or_else(|| {
                    PlanError::unplannable(expr.to_string(), "no planner for local subqueries")
                })?;
                let plan = planner.plan_subquery(&command)?;
                out.push(PlannedSubquery { command, plan });
            }
        }
        Ok(out)
    }
}

/// Columns of `expr` as seen from an input producing `available`: whole
/// expressions the input already produces, otherwise columns, aggregates
/// and the correlated references of subqueries.
fn references(expr: &Expr, available: &[Expr], out: &mut Vec<Expr>) {
    expr.walk(&mut |e| {
        if available.contains(e) {
            push_unique(out, e.clone());
            return false;
        }
        match e {
            Expr::Column(_) | Expr::Aggregate { .. } => {
                push_unique(out, e.clone());
                false
            }
            Expr::Subquery { command, .. } => {
                for symbol in command.outer_refs() {
                    push_unique(out, Expr::Column(symbol));
                }
                true
            }
            _ => true,
        }
    });
}

fn push_unique(out: &mut Vec<Expr>, expr: Expr) {
    if !out.contains(&expr) {
        out.push(expr);
    }
}

/// Top-down output assignment: each node produces what its parent needs.
fn assign_outputs(tree: &mut PlanTree, id: NodeId, required: Vec<Expr>) -> PlanResult<()> {
    let props = tree.props(id)?.clone();
    let children = tree.children(id)?;
    let natural = tree.natural_outputs(id)?;
    let child_natural = match children.first() {
        Some(child) => tree.natural_outputs(*child)?,
        None => Vec::new(),
    };

    let outputs = match &props {
        NodeProps::Project { columns } => {
            if let Some(child) = children.first() {
                let mut needed = Vec::new();
                for column in columns {
                    references(&column.expr, &child_natural, &mut needed);
                }
                assign_outputs(tree, *child, needed)?;
            }
            natural
        }
        NodeProps::Select { criteria, .. } => {
            let mut needed = required.clone();
            references(criteria, &child_natural, &mut needed);
            assign_outputs(tree, children[0], needed)?;
            required
        }
        NodeProps::Sort { items } => {
            let mut needed = required.clone();
            for item in items {
                references(&item.expr, &child_natural, &mut needed);
            }
            assign_outputs(tree, children[0], needed)?;
            required
        }
        NodeProps::Limit { .. } => {
            assign_outputs(tree, children[0], required.clone())?;
            required
        }
        // duplicates are judged on every column
        NodeProps::DupRemove => {
            assign_outputs(tree, children[0], child_natural.clone())?;
            child_natural
        }
        NodeProps::Grouping {
            group_by,
            aggregates,
        } => {
            let mut needed = Vec::new();
            for expr in group_by {
                references(expr, &child_natural, &mut needed);
            }
            for aggregate in aggregates {
                if let Expr::Aggregate { arg: Some(arg), .. } = aggregate {
                    references(arg, &child_natural, &mut needed);
                }
            }
            assign_outputs(tree, children[0], needed)?;
            natural
        }
        NodeProps::Join {
            criteria, strategy, ..
        } => {
            let mut needed = required.clone();
            for conjunct in criteria {
                references(conjunct, &natural, &mut needed);
            }
            let keys: Vec<&Expr> = match strategy {
                Some(JoinStrategy::MergeSorted {
                    left_keys,
                    right_keys,
                    ..
                })
                | Some(JoinStrategy::PartitionedSort {
                    left_keys,
                    right_keys,
                    ..
                }) => left_keys.iter().chain(right_keys.iter()).collect(),
                Some(JoinStrategy::DependentSemiJoin(dependent)) => dependent
                    .independent_keys
                    .iter()
                    .chain(dependent.dependent_keys.iter())
                    .collect(),
                _ => Vec::new(),
            };
            for key in keys {
                references(key, &natural, &mut needed);
            }
            let mut outputs = Vec::new();
            for child in &children {
                let available = tree.natural_outputs(*child)?;
                let side: Vec<Expr> = available
                    .into_iter()
                    .filter(|e| needed.contains(e))
                    .collect();
                assign_outputs(tree, *child, side)?;
                outputs.extend(tree.node(*child)?.outputs.iter().cloned());
            }
            outputs
        }
        NodeProps::SetOp { .. } => {
            for child in &children {
                let branch = tree.natural_outputs(*child)?;
                assign_outputs(tree, *child, branch)?;
            }
            natural
        }
        NodeProps::Access { .. } => {
            let block = BlockState::of(tree, id);
            let outputs = if block.has_project || block.is_set_op {
                natural
            } else {
                let kept: Vec<Expr> = required
                    .iter()
                    .filter(|e| natural.contains(e))
                    .cloned()
                    .collect();
                if kept.is_empty() {
                    natural.into_iter().take(1).collect()
                } else {
                    kept
                }
            };
            assign_outputs(tree, children[0], outputs.clone())?;
            outputs
        }
        NodeProps::Source(source) => {
            let outputs: Vec<Expr> = source
                .elements
                .iter()
                .map(|e| Expr::Column(e.clone()))
                .filter(|e| required.contains(e))
                .collect();
            if source.is_virtual
                && let Some(view) = children.first()
            {
                let all = tree.natural_outputs(*view)?;
                assign_outputs(tree, *view, all)?;
            }
            outputs
        }
        NodeProps::Null { outputs, .. } => outputs.clone(),
    };
    tree.node_mut(id)?.outputs = outputs;
    Ok(())
}
