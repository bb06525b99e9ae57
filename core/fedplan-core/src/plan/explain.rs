//! Indented text rendering of plan trees.

use std::fmt::Write;

use super::node::{NodeId, NodeProps};
use super::tree::PlanTree;
use crate::expr::Expr;

fn join_exprs<'a>(exprs: impl IntoIterator<Item = &'a Expr>, sep: &str) -> String {
    exprs
        .into_iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

/// One-line description of a node.
pub fn describe(props: &NodeProps) -> String {
    match props {
        NodeProps::Access { model } => format!("Access [{model}]"),
        NodeProps::Select {
            criteria,
            is_having,
        } => {
            let having = if *is_having { " HAVING" } else { "" };
            format!("Select{having} [{criteria}]")
        }
        NodeProps::Project { columns } => {
            let items: Vec<String> = columns
                .iter()
                .map(|c| match &c.expr {
                    Expr::Column(symbol) if symbol.name == c.name => c.expr.to_string(),
                    expr => format!("{expr} AS {}", c.name),
                })
                .collect();
            format!("Project [{}]", items.join(", "))
        }
        NodeProps::Join {
            join_type,
            criteria,
            strategy,
            ..
        } => {
            let mut out = format!("Join {join_type}");
            if !criteria.is_empty() {
                let _ = write!(out, " [{}]", join_exprs(criteria, " AND "));
            }
            if let Some(strategy) = strategy {
                let _ = write!(out, " {strategy}");
            }
            out
        }
        NodeProps::Grouping {
            group_by,
            aggregates,
        } => format!(
            "Grouping [{}] [{}]",
            join_exprs(group_by, ", "),
            join_exprs(aggregates, ", ")
        ),
        NodeProps::Sort { items } => {
            let items: Vec<String> = items
                .iter()
                .map(|i| format!("{} {}", i.expr, if i.ascending { "ASC" } else { "DESC" }))
                .collect();
            format!("Sort [{}]", items.join(", "))
        }
        NodeProps::DupRemove => "DupRemove".to_string(),
        NodeProps::Limit { offset, count } => match count {
            Some(count) => format!("Limit [offset={offset} count={count}]"),
            None => format!("Limit [offset={offset}]"),
        },
        NodeProps::SetOp { op, all } => {
            format!("{}{}", op.sql(), if *all { " ALL" } else { "" })
        }
        NodeProps::Null { outputs, .. } => format!("Null [{}]", join_exprs(outputs, ", ")),
        NodeProps::Source(source) => {
            let view = if source.is_virtual { " VIEW" } else { "" };
            format!("Source{view} [{}]", source.group)
        }
    }
}

/// Render the subtree below `root`, two spaces per level.
pub fn explain_subtree(tree: &PlanTree, root: NodeId) -> String {
    let mut out = String::new();
    let mut stack = vec![(root, 0usize)];
    while let Some((id, depth)) = stack.pop() {
        let Ok(node) = tree.node(id) else { continue };
        let _ = writeln!(out, "{}{}", "  ".repeat(depth), describe(&node.props));
        for child in node.children().iter().rev() {
            stack.push((*child, depth + 1));
        }
    }
    out
}

/// Render the whole tree.
pub fn explain(tree: &PlanTree) -> String {
    tree.root()
        .map(|root| explain_subtree(tree, root))
        .unwrap_or_default()
}
