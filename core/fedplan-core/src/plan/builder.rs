//! Canonical plan generation.
//!
//! Turns a resolved [`Command`] into the canonical tree the rules start
//! from. From the top: Limit, Sort, DupRemove, Project, Select (HAVING),
//! Grouping, Select (WHERE, one per conjunct), then the joins over Sources.

use std::collections::BTreeMap;

use super::node::{NodeId, NodeProps, SortItem, SourceNode};
use super::tree::PlanTree;
use crate::command::{Command, FromItem, JoinType, OrderByItem, Query};
use crate::error::{PlanError, PlanResult};
use crate::expr::{ElementSymbol, Expr, GroupSymbol, split_conjuncts};
use crate::metadata::{GroupKind, QueryMetadata};

const MAX_VIEW_DEPTH: usize = 32;

/// 캐노니컬 플랜 빌더
pub struct PlanBuilder<'a> {
    metadata: &'a dyn QueryMetadata,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(metadata: &'a dyn QueryMetadata) -> Self {
        Self { metadata }
    }

    pub fn build(&self, command: &Command) -> PlanResult<PlanTree> {
        let mut tree = PlanTree::new();
        tree.hints = command.hints();
        let root = self.build_command(&mut tree, command, 0)?;
        tree.set_root(root)?;
        Ok(tree)
    }

    fn build_command(&self, tree: &mut PlanTree, command: &Command, depth: usize) -> PlanResult<NodeId> {
        match command {
            Command::Query(query) => self.build_query(tree, query, depth),
            Command::SetQuery(set) => {
                let left = self.build_command(tree, &set.left, depth)?;
                let right = self.build_command(tree, &set.right, depth)?;
                let node = tree.add_node(NodeProps::SetOp {
                    op: set.op,
                    all: set.all,
                });
                tree.add_child(node, left)?;
                tree.add_child(node, right)?;
                let node = wrap_sort(tree, node, &set.order_by)?;
                wrap_limit(tree, node, set.limit.map(|l| (l.offset, l.count)))
            }
        }
    }

    fn build_query(&self, tree: &mut PlanTree, query: &Query, depth: usize) -> PlanResult<NodeId> {
        let mut current = None;
        for item in &query.from {
            let node = self.build_from_item(tree, item, depth)?;
            current = Some(match current {
                None => node,
                Some(left) => {
                    let join = tree.add_node(NodeProps::join(JoinType::Cross, vec![]));
                    tree.add_child(join, left)?;
                    tree.add_child(join, node)?;
                    join
                }
            });
        }

        let where_conjuncts = query
            .criteria
            .as_ref()
            .map(split_conjuncts)
            .unwrap_or_default();
        let mut aggregates: Vec<Expr> = Vec::new();
        for expr in query
            .select
            .iter()
            .map(|c| &c.expr)
            .chain(query.having.iter())
        {
            for aggregate in expr.aggregates() {
                if !aggregates.contains(&aggregate) {
                    aggregates.push(aggregate);
                }
            }
        }
        let grouped = !query.group_by.is_empty() || !aggregates.is_empty();

        // a query without FROM still produces one row
        if current.is_none() && (!where_conjuncts.is_empty() || grouped) {
            current = Some(tree.add_node(NodeProps::Project { columns: vec![] }));
        }

        for conjunct in where_conjuncts {
            current = Some(stack(tree, current, NodeProps::select(conjunct))?);
        }
        if grouped {
            current = Some(stack(
                tree,
                current,
                NodeProps::Grouping {
                    group_by: query.group_by.clone(),
                    aggregates,
                },
            )?);
        }
        if let Some(having) = &query.having {
            for conjunct in split_conjuncts(having) {
                current = Some(stack(
                    tree,
                    current,
                    NodeProps::Select {
                        criteria: conjunct,
                        is_having: true,
                    },
                )?);
            }
        }
        let mut node = stack(
            tree,
            current,
            NodeProps::Project {
                columns: query.select.clone(),
            },
        )?;
        if query.distinct {
            node = stack(tree, Some(node), NodeProps::DupRemove)?;
        }
        node = wrap_sort(tree, node, &query.order_by)?;
        wrap_limit(tree, node, query.limit.map(|l| (l.offset, l.count)))
    }

    fn build_from_item(&self, tree: &mut PlanTree, item: &FromItem, depth: usize) -> PlanResult<NodeId> {
        match item {
            FromItem::Group(group) => self.build_group(tree, group, depth),
            FromItem::Join {
                left,
                right,
                join_type,
                criteria,
            } => {
                let left = self.build_from_item(tree, left, depth)?;
                let right = self.build_from_item(tree, right, depth)?;
                // right outer joins are planned as left outer with swapped inputs
                let (join_type, first, second) = match join_type {
                    JoinType::RightOuter => (JoinType::LeftOuter, right, left),
                    other => (*other, left, right),
                };
                let criteria = criteria.iter().flat_map(split_conjuncts).collect();
                let join = tree.add_node(NodeProps::join(join_type, criteria));
                tree.add_child(join, first)?;
                tree.add_child(join, second)?;
                Ok(join)
            }
        }
    }

    fn build_group(&self, tree: &mut PlanTree, group: &GroupSymbol, depth: usize) -> PlanResult<NodeId> {
        let record = self.metadata.group(&group.definition)?;
        let elements: Vec<ElementSymbol> = record
            .elements
            .iter()
            .map(|e| ElementSymbol::new(group, e.name.clone(), e.data_type.clone()))
            .collect();
        let mut source = SourceNode {
            group: group.clone(),
            model: record.model.clone(),
            elements,
            access_patterns: record.access_patterns.clone(),
            cardinality: record.cardinality,
            is_virtual: false,
        };
        let GroupKind::Virtual(definition) = &record.kind else {
            return Ok(tree.add_node(NodeProps::Source(source)));
        };
        if depth >= MAX_VIEW_DEPTH {
            return Err(PlanError::unplannable(
                group.definition.clone(),
                "view definitions nest too deeply",
            ));
        }
        let view_root = self.build_command(tree, definition, depth + 1)?;
        // keep the view's groups distinct from the groups of the outer query
        let renames: BTreeMap<String, String> = tree
            .preorder(view_root)
            .into_iter()
            .filter_map(|id| match tree.props(id) {
                Ok(NodeProps::Source(inner)) => Some(inner.group.name.clone()),
                _ => None,
            })
            .map(|name| {
                let renamed = format!("{}__{}", group.name, name);
                (name, renamed)
            })
            .collect();
        tree.rename_groups(view_root, &renames)?;
        source.is_virtual = true;
        source.access_patterns.clear();
        let node = tree.add_node(NodeProps::Source(source));
        tree.add_child(node, view_root)?;
        Ok(node)
    }
}

/// New node over `child` (if any).
fn stack(tree: &mut PlanTree, child: Option<NodeId>, props: NodeProps) -> PlanResult<NodeId> {
    let node = tree.add_node(props);
    if let Some(child) = child {
        tree.add_child(node, child)?;
    }
    Ok(node)
}

fn wrap_sort(tree: &mut PlanTree, node: NodeId, order_by: &[OrderByItem]) -> PlanResult<NodeId> {
    if order_by.is_empty() {
        return Ok(node);
    }
    let items = order_by
        .iter()
        .map(|o| SortItem {
            expr: o.expr.clone(),
            ascending: o.ascending,
        })
        .collect();
    stack(tree, Some(node), NodeProps::Sort { items })
}

fn wrap_limit(tree: &mut PlanTree, node: NodeId, limit: Option<(u64, Option<u64>)>) -> PlanResult<NodeId> {
    match limit {
        Some((offset, count)) if offset > 0 || count.is_some() => {
            stack(tree, Some(node), NodeProps::Limit { offset, count })
        }
        _ => Ok(node),
    }
}
