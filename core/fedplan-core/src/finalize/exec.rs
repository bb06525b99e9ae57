//! 실행 노드
//!
//! The finalized plan handed to the execution engine: one node per
//! remaining plan node, Access nodes carrying their rendered command.

use std::fmt::Write;
use std::sync::Arc;

use arrow::datatypes::{Field, Schema};

use super::dependent::AtomicCommand;
use crate::command::{Command, JoinType, SelectColumn, SetOperator};
use crate::expr::Expr;
use crate::plan::{JoinStrategy, SortItem};

/// Operator of an execution node.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOperator {
    /// Runs `command` against `model`.
    Access {
        model: String,
        command: AtomicCommand,
    },
    Select {
        criteria: Expr,
    },
    Project {
        columns: Vec<SelectColumn>,
    },
    Join {
        join_type: JoinType,
        criteria: Vec<Expr>,
        strategy: JoinStrategy,
    },
    Grouping {
        group_by: Vec<Expr>,
        aggregates: Vec<Expr>,
    },
    Sort {
        items: Vec<SortItem>,
    },
    DupRemove,
    Limit {
        offset: u64,
        count: Option<u64>,
    },
    SetOp {
        op: SetOperator,
        all: bool,
    },
    /// No rows.
    Null,
}

impl ExecOperator {
    pub fn name(&self) -> &'static str {
        match self {
            ExecOperator::Access { .. } => "Access",
            ExecOperator::Select { .. } => "Select",
            ExecOperator::Project { .. } => "Project",
            ExecOperator::Join { .. } => "Join",
            ExecOperator::Grouping { .. } => "Grouping",
            ExecOperator::Sort { .. } => "Sort",
            ExecOperator::DupRemove => "DupRemove",
            ExecOperator::Limit { .. } => "Limit",
            ExecOperator::SetOp { .. } => "SetOp",
            ExecOperator::Null => "Null",
        }
    }
}

/// Subquery evaluated locally, planned on its own. A correlated one is
/// evaluated once per outer row with its outer references as parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSubquery {
    pub command: Arc<Command>,
    pub plan: ExecNode,
}

/// 실행 플랜 노드
#[derive(Debug, Clone, PartialEq)]
pub struct ExecNode {
    pub operator: ExecOperator,
    /// One field per output expression.
    pub fields: Vec<Field>,
    pub output_exprs: Vec<Expr>,
    pub(crate) children: Vec<ExecNode>,
    pub subqueries: Vec<PlannedSubquery>,
}

impl ExecNode {
    pub(crate) fn new(operator: ExecOperator, output_exprs: Vec<Expr>, children: Vec<ExecNode>) -> Self {
        let fields = output_exprs.iter().map(output_field).collect();
        Self {
            operator,
            fields,
            output_exprs,
            children,
            subqueries: Vec::new(),
        }
    }

    pub fn output_columns(&self) -> &[Field] {
        &self.fields
    }

    pub fn schema(&self) -> Schema {
        Schema::new(self.fields.clone())
    }

    pub fn children(&self) -> &[ExecNode] {
        &self.children
    }

    /// Atomic commands of the plan and its local subqueries, in pre-order.
    pub fn atomic_commands(&self) -> Vec<&AtomicCommand> {
        let mut out = Vec::new();
        self.collect_commands(&mut out);
        out
    }

    fn collect_commands<'a>(&'a self, out: &mut Vec<&'a AtomicCommand>) {
        if let ExecOperator::Access { command, .. } = &self.operator {
            out.push(command);
        }
        for subquery in &self.subqueries {
            subquery.plan.collect_commands(out);
        }
        for child in &self.children {
            child.collect_commands(out);
        }
    }

    /// Models queried by the plan.
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .atomic_commands()
            .into_iter()
            .map(|c| c.model.clone())
            .collect();
        models.sort();
        models.dedup();
        models
    }

    /// Indented one-line-per-node rendering.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, 0);
        out
    }

    fn explain_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let detail = match &self.operator {
            ExecOperator::Access { command, .. } => format!(" {command}"),
            ExecOperator::Join {
                join_type,
                strategy,
                ..
            } => format!(" {join_type} {strategy}"),
            ExecOperator::Limit { offset, count } => match count {
                Some(count) => format!(" [offset={offset} count={count}]"),
                None => format!(" [offset={offset}]"),
            },
            _ => String::new(),
        };
        let fields: Vec<&str> = self.fields.iter().map(|f| f.name().as_str()).collect();
        let _ = writeln!(out, "{indent}{}{detail} -> [{}]", self.operator.name(), fields.join(", "));
        for subquery in &self.subqueries {
            let _ = writeln!(out, "{indent}  subquery:");
            subquery.plan.explain_into(out, depth + 2);
        }
        for child in &self.children {
            child.explain_into(out, depth + 1);
        }
    }
}

fn output_field(expr: &Expr) -> Field {
    let name = match expr {
        Expr::Column(symbol) => symbol.qualified_name(),
        other => other.output_name(),
    };
    Field::new(name, expr.data_type(), true)
}
