//! Tree queries shared by several rules.

use std::collections::BTreeMap;

use crate::error::PlanResult;
use crate::expr::{ElementSymbol, Expr};
use crate::plan::{NodeId, NodeProps, PlanTree, SortItem};

/// Access node at `id` or below it through Select nodes.
pub(crate) fn access_below(tree: &PlanTree, id: NodeId) -> Option<NodeId> {
    let mut current = id;
    loop {
        match tree.props(current).ok()? {
            NodeProps::Access { .. } => return Some(current),
            NodeProps::Select { .. } => current = tree.first_child(current)?,
            _ => return None,
        }
    }
}

/// Whether `id` already sits inside an Access block.
pub(crate) fn pushed_down(tree: &PlanTree, id: NodeId) -> bool {
    tree.ancestors(id)
        .into_iter()
        .any(|a| matches!(tree.props(a), Ok(NodeProps::Access { .. })))
}

pub(crate) fn access_model(tree: &PlanTree, access: NodeId) -> Option<String> {
    match tree.props(access).ok()? {
        NodeProps::Access { model } => Some(model.clone()),
        _ => None,
    }
}

pub(crate) fn same_column(a: &ElementSymbol, b: &ElementSymbol) -> bool {
    a.group == b.group && a.name.eq_ignore_ascii_case(&b.name)
}

/// Replace columns of `group` by the expression mapped to their
/// (lower-case) name.
pub(crate) fn replace_group_columns(
    expr: &Expr,
    group: &str,
    by_name: &BTreeMap<String, Expr>,
) -> Expr {
    expr.transform(&mut |e| match e {
        Expr::Column(symbol) if symbol.group.as_deref() == Some(group) => {
            by_name.get(&symbol.name.to_ascii_lowercase()).cloned()
        }
        _ => None,
    })
}

/// Replace every column of the given groups with a typed NULL.
pub(crate) fn null_group_columns(expr: &Expr, groups: &std::collections::BTreeSet<String>) -> Expr {
    expr.transform(&mut |e| match e {
        Expr::Column(symbol)
            if symbol.group.as_ref().is_some_and(|g| groups.contains(g)) =>
        {
            Some(Expr::TypedNull(symbol.data_type.clone()))
        }
        _ => None,
    })
}

/// Rewrite the payload expressions of the ancestors of `id`, nearest first,
/// up to and including the first Project. Returns the rewritten nodes.
pub(crate) fn rewrite_to_projection(
    tree: &mut PlanTree,
    id: NodeId,
    f: &mut impl FnMut(&Expr) -> Expr,
) -> PlanResult<Vec<NodeId>> {
    let mut touched = Vec::new();
    for ancestor in tree.ancestors(id) {
        let props = tree.props_mut(ancestor)?;
        props.map_exprs(f);
        let stop = matches!(props, NodeProps::Project { .. });
        touched.push(ancestor);
        if stop {
            break;
        }
    }
    Ok(touched)
}

/// Source node of `group` reachable from `id` through operators that keep
/// rows of their input intact.
pub(crate) fn locate_source(tree: &PlanTree, id: NodeId, group: &str) -> Option<NodeId> {
    let node = tree.node(id).ok()?;
    match &node.props {
        NodeProps::Source(source) if !source.is_virtual => {
            (source.group.name == group).then_some(id)
        }
        NodeProps::Select { .. } | NodeProps::Sort { .. } => {
            locate_source(tree, *node.children().first()?, group)
        }
        NodeProps::Join { .. } => node
            .children()
            .iter()
            .find_map(|c| locate_source(tree, *c, group)),
        _ => None,
    }
}

pub(crate) fn ascending(keys: &[Expr]) -> Vec<SortItem> {
    keys.iter()
        .map(|k| SortItem {
            expr: k.clone(),
            ascending: true,
        })
        .collect()
}

/// Position of the child of `parent` whose subtree holds `id`.
pub(crate) fn child_index_toward(tree: &PlanTree, parent: NodeId, id: NodeId) -> Option<usize> {
    let children = tree.children(parent).ok()?;
    let mut current = id;
    loop {
        if let Some(index) = children.iter().position(|c| *c == current) {
            return Some(index);
        }
        current = tree.parent(current)?;
    }
}
