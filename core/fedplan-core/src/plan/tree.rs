//! Arena-backed plan tree.
//!
//! Child lists are the source of truth; parent links are maintained by every
//! operation and can be rebuilt with [`PlanTree::recompute_parents`].

use std::collections::{BTreeMap, BTreeSet};

use smallvec::SmallVec;

use super::node::{NodeId, NodeKind, NodeProps, PlanNode};
use crate::command::PlanHints;
use crate::error::{PlanError, PlanResult};
use crate::expr::{Expr, conjoin};

/// Intersection of two LIMIT/OFFSET windows: `outer` applied to the rows
/// produced by `inner`.
pub fn combine_limit_windows(
    inner: (u64, Option<u64>),
    outer: (u64, Option<u64>),
) -> (u64, Option<u64>) {
    let (inner_offset, inner_count) = inner;
    let (outer_offset, outer_count) = outer;
    let offset = inner_offset.saturating_add(outer_offset);
    let remaining = inner_count.map(|c| c.saturating_sub(outer_offset));
    let count = match (remaining, outer_count) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    };
    (offset, count)
}

/// 플랜 트리
#[derive(Debug, Clone, Default)]
pub struct PlanTree {
    nodes: Vec<Option<PlanNode>>,
    root: Option<NodeId>,
    next_dependent: u32,
    /// Planner hints of the command the tree was built from.
    pub hints: PlanHints,
}

fn missing(id: NodeId) -> PlanError {
    PlanError::InvalidTree(format!("node {id} does not exist"))
}

impl PlanTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Make a detached node the root.
    pub fn set_root(&mut self, id: NodeId) -> PlanResult<()> {
        if self.node(id)?.parent.is_some() {
            return Err(PlanError::InvalidTree(format!(
                "root {id} must not have a parent"
            )));
        }
        self.root = Some(id);
        Ok(())
    }

    pub fn add_node(&mut self, props: NodeProps) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(PlanNode::new(props)));
        id
    }

    /// Append a detached node to `parent`'s children.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> PlanResult<()> {
        self.ensure_detached(child)?;
        if parent == child || self.is_ancestor(child, parent) {
            return Err(PlanError::InvalidTree(format!(
                "adding {child} under {parent} creates a cycle"
            )));
        }
        self.node_mut(parent)?.children.push(child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.0), Some(Some(_)))
    }

    pub fn node(&self, id: NodeId) -> PlanResult<&PlanNode> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| missing(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> PlanResult<&mut PlanNode> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| missing(id))
    }

    pub fn props(&self, id: NodeId) -> PlanResult<&NodeProps> {
        Ok(&self.node(id)?.props)
    }

    pub fn props_mut(&mut self, id: NodeId) -> PlanResult<&mut NodeProps> {
        Ok(&mut self.node_mut(id)?.props)
    }

    pub fn kind(&self, id: NodeId) -> PlanResult<NodeKind> {
        Ok(self.node(id)?.kind())
    }

    pub fn children(&self, id: NodeId) -> PlanResult<SmallVec<[NodeId; 2]>> {
        Ok(self.node(id)?.children.clone())
    }

    pub fn child(&self, id: NodeId, index: usize) -> PlanResult<NodeId> {
        self.node(id)?
            .children
            .get(index)
            .copied()
            .ok_or_else(|| PlanError::InvalidTree(format!("node {id} has no child {index}")))
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).ok().and_then(|n| n.children.first().copied())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).ok().and_then(|n| n.parent)
    }

    /// Fresh id for a dependent value slot.
    pub fn next_dependent_id(&mut self) -> u32 {
        let id = self.next_dependent;
        self.next_dependent += 1;
        id
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    fn ensure_detached(&self, id: NodeId) -> PlanResult<()> {
        if self.node(id)?.parent.is_some() || self.root == Some(id) {
            return Err(PlanError::InvalidTree(format!("node {id} is still attached")));
        }
        Ok(())
    }

    fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = self.parent(id);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent(p);
        }
        false
    }

    /// Point whatever held `old` (parent slot or root) at `new`.
    fn relink(&mut self, old: NodeId, new: NodeId) -> PlanResult<()> {
        match self.node(old)?.parent {
            Some(parent) => {
                let slot = self
                    .node(parent)?
                    .children
                    .iter()
                    .position(|c| *c == old)
                    .ok_or_else(|| {
                        PlanError::InvalidTree(format!("{old} missing from its parent {parent}"))
                    })?;
                self.node_mut(parent)?.children[slot] = new;
                self.node_mut(new)?.parent = Some(parent);
            }
            None if self.root == Some(old) => {
                self.root = Some(new);
                self.node_mut(new)?.parent = None;
            }
            None => return Err(PlanError::InvalidTree(format!("node {old} is detached"))),
        }
        self.node_mut(old)?.parent = None;
        Ok(())
    }

    /// `new` (detached) takes `old`'s position; `old` keeps its subtree and
    /// becomes detached.
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> PlanResult<()> {
        self.ensure_detached(new)?;
        if self.is_ancestor(new, old) || new == old {
            return Err(PlanError::InvalidTree(format!(
                "cannot replace {old} with its own ancestor {new}"
            )));
        }
        self.relink(old, new)
    }

    /// `new_parent` (detached) takes `node`'s position and adopts `node`.
    pub fn insert_above(&mut self, node: NodeId, new_parent: NodeId) -> PlanResult<()> {
        self.ensure_detached(new_parent)?;
        self.relink(node, new_parent)?;
        self.node_mut(new_parent)?.children.push(node);
        self.node_mut(node)?.parent = Some(new_parent);
        Ok(())
    }

    /// Remove `node` from its parent (or the root slot) without touching
    /// its subtree.
    pub fn detach(&mut self, node: NodeId) -> PlanResult<()> {
        match self.node(node)?.parent {
            Some(parent) => {
                self.node_mut(parent)?.children.retain(|c| *c != node);
                self.node_mut(node)?.parent = None;
            }
            None if self.root == Some(node) => self.root = None,
            None => {}
        }
        Ok(())
    }

    /// Splice `node` out; its children take its position in the parent.
    pub fn remove_node(&mut self, node: NodeId) -> PlanResult<()> {
        let children = self.node(node)?.children.clone();
        match self.node(node)?.parent {
            Some(parent) => {
                let slot = self
                    .node(parent)?
                    .children
                    .iter()
                    .position(|c| *c == node)
                    .ok_or_else(|| {
                        PlanError::InvalidTree(format!("{node} missing from its parent {parent}"))
                    })?;
                let siblings = &mut self.node_mut(parent)?.children;
                siblings.remove(slot);
                for (i, child) in children.iter().enumerate() {
                    siblings.insert(slot + i, *child);
                }
                for child in &children {
                    self.node_mut(*child)?.parent = Some(parent);
                }
            }
            None if self.root == Some(node) => {
                if children.len() != 1 {
                    return Err(PlanError::InvalidTree(format!(
                        "cannot remove root {node} with {} children",
                        children.len()
                    )));
                }
                self.root = Some(children[0]);
                self.node_mut(children[0])?.parent = None;
            }
            None => {
                for child in &children {
                    self.node_mut(*child)?.parent = None;
                }
            }
        }
        self.nodes[node.0] = None;
        Ok(())
    }

    /// Detach and free a whole subtree.
    pub fn delete_subtree(&mut self, node: NodeId) -> PlanResult<()> {
        self.detach(node)?;
        for id in self.preorder(node) {
            self.nodes[id.0] = None;
        }
        Ok(())
    }

    /// Combine `from` (a child of `into`) into `into` and splice it out.
    pub fn merge(&mut self, into: NodeId, from: NodeId) -> PlanResult<()> {
        if self.node(from)?.parent != Some(into) {
            return Err(PlanError::IncompatibleMerge {
                into: self.kind(into)?.to_string(),
                from: self.kind(from)?.to_string(),
                reason: format!("{from} is not a child of {into}"),
            });
        }
        let from_props = self.props(from)?.clone();
        let incompatible = |into_kind: NodeKind, reason: &str| PlanError::IncompatibleMerge {
            into: into_kind.to_string(),
            from: from_props.kind().to_string(),
            reason: reason.to_string(),
        };
        let into_kind = self.kind(into)?;
        match (self.props_mut(into)?, &from_props) {
            (
                NodeProps::Select {
                    criteria,
                    is_having,
                },
                NodeProps::Select {
                    criteria: inner,
                    is_having: inner_having,
                },
            ) => {
                if *is_having != *inner_having {
                    return Err(incompatible(into_kind, "WHERE and HAVING criteria"));
                }
                if let Some(both) = conjoin([inner.clone(), criteria.clone()]) {
                    *criteria = both;
                }
            }
            (
                NodeProps::Limit { offset, count },
                NodeProps::Limit {
                    offset: inner_offset,
                    count: inner_count,
                },
            ) => {
                let (o, c) = combine_limit_windows((*inner_offset, *inner_count), (*offset, *count));
                *offset = o;
                *count = c;
            }
            // outer order wins
            (NodeProps::Sort { .. }, NodeProps::Sort { .. }) => {}
            (NodeProps::DupRemove, NodeProps::DupRemove) => {}
            (NodeProps::Access { .. }, NodeProps::Access { .. }) => {}
            _ => return Err(incompatible(into_kind, "operators cannot be combined")),
        }
        self.remove_node(from)
    }

    /// Deep copy of a subtree; the copy is detached.
    pub fn clone_subtree(&mut self, root: NodeId) -> PlanResult<NodeId> {
        let props = self.props(root)?.clone();
        let outputs = self.node(root)?.outputs.clone();
        let copy = self.add_node(props);
        self.node_mut(copy)?.outputs = outputs;
        for child in self.children(root)? {
            let child_copy = self.clone_subtree(child)?;
            self.add_child(copy, child_copy)?;
        }
        Ok(copy)
    }

    /// Rename group scope names throughout a subtree.
    pub fn rename_groups(
        &mut self,
        root: NodeId,
        renames: &BTreeMap<String, String>,
    ) -> PlanResult<()> {
        for id in self.preorder(root) {
            let props = self.props_mut(id)?;
            props.map_exprs(&mut |e| e.rename_groups(renames));
            match props {
                NodeProps::Source(source) => {
                    if let Some(new) = renames.get(&source.group.name) {
                        source.group.name = new.clone();
                        for element in &mut source.elements {
                            *element = element.regrouped(new);
                        }
                    }
                }
                NodeProps::Null { groups, .. } => {
                    *groups = groups
                        .iter()
                        .map(|g| renames.get(g).unwrap_or(g).clone())
                        .collect();
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Rebuild every parent link from the child lists.
    pub fn recompute_parents(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.parent = None;
        }
        let links: Vec<(NodeId, NodeId)> = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (NodeId(i), n)))
            .flat_map(|(id, n)| n.children.iter().map(move |c| (*c, id)))
            .collect();
        for (child, parent) in links {
            if let Some(Some(node)) = self.nodes.get_mut(child.0) {
                node.parent = Some(parent);
            }
        }
    }

    /// Check acyclicity, single parenthood, parent links and arity.
    pub fn validate(&self) -> PlanResult<()> {
        let Some(root) = self.root else {
            return Err(PlanError::InvalidTree("tree has no root".to_string()));
        };
        if self.node(root)?.parent.is_some() {
            return Err(PlanError::InvalidTree(format!("root {root} has a parent")));
        }
        let mut seen = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return Err(PlanError::InvalidTree(format!(
                    "node {id} is reachable twice"
                )));
            }
            let node = self.node(id)?;
            let arity = node.children.len();
            let ok = match &node.props {
                NodeProps::Join { .. } | NodeProps::SetOp { .. } => arity == 2,
                NodeProps::Null { .. } => arity == 0,
                NodeProps::Project { .. } => arity <= 1,
                NodeProps::Source(source) => arity == usize::from(source.is_virtual),
                _ => arity == 1,
            };
            if !ok {
                return Err(PlanError::InvalidTree(format!(
                    "{} node {id} has {arity} children",
                    node.kind()
                )));
            }
            for child in &node.children {
                if self.node(*child)?.parent != Some(id) {
                    return Err(PlanError::InvalidTree(format!(
                        "parent link of {child} does not point at {id}"
                    )));
                }
                stack.push(*child);
            }
        }
        Ok(())
    }

    /// Nodes of a subtree in pre-order.
    pub fn preorder(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Ok(node) = self.node(id) else { continue };
            out.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Every node reachable from the root, in pre-order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.root.map(|r| self.preorder(r)).unwrap_or_default()
    }

    /// Parent chain of a node, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(p) = current {
            out.push(p);
            current = self.parent(p);
        }
        out
    }

    /// Scope names of the groups visible in a subtree's output. A view
    /// counts as its own group.
    pub fn groups(&self, id: NodeId) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Ok(node) = self.node(current) else { continue };
            match &node.props {
                NodeProps::Source(source) => {
                    out.insert(source.group.name.clone());
                }
                NodeProps::Null { groups, .. } => out.extend(groups.iter().cloned()),
                _ => stack.extend(node.children.iter().copied()),
            }
        }
        out
    }

    /// Output expressions a node produces before output assignment.
    pub fn natural_outputs(&self, id: NodeId) -> PlanResult<Vec<Expr>> {
        let node = self.node(id)?;
        Ok(match &node.props {
            NodeProps::Source(source) => source
                .elements
                .iter()
                .cloned()
                .map(Expr::Column)
                .collect(),
            NodeProps::Project { columns } => columns
                .iter()
                .map(|c| Expr::Column(c.symbol()))
                .collect(),
            NodeProps::Join { .. } => {
                let mut out = self.natural_outputs(self.child(id, 0)?)?;
                out.extend(self.natural_outputs(self.child(id, 1)?)?);
                out
            }
            NodeProps::Grouping {
                group_by,
                aggregates,
            } => group_by.iter().chain(aggregates.iter()).cloned().collect(),
            NodeProps::Null { outputs, .. } => outputs.clone(),
            _ => self.natural_outputs(self.child(id, 0)?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{JoinType, SelectColumn};
    use crate::expr::{ElementSymbol, GroupSymbol, ScalarValue};
    use crate::plan::node::SourceNode;
    use arrow::datatypes::DataType;

    fn source(tree: &mut PlanTree, name: &str) -> NodeId {
        let group = GroupSymbol::new(name);
        tree.add_node(NodeProps::Source(SourceNode {
            elements: vec![ElementSymbol::new(&group, "e1", DataType::Int32)],
            group,
            model: "pm1".to_string(),
            access_patterns: vec![],
            cardinality: None,
            is_virtual: false,
        }))
    }

    fn lit_eq(group: &str, v: i32) -> Expr {
        Expr::eq(
            Expr::Column(ElementSymbol::new(&GroupSymbol::new(group), "e1", DataType::Int32)),
            Expr::Literal(ScalarValue::Int32(v)),
        )
    }

    #[test]
    fn test_insert_above_and_remove() {
        let mut tree = PlanTree::new();
        let src = source(&mut tree, "pm1.g1");
        tree.set_root(src).unwrap();
        let access = tree.add_node(NodeProps::Access {
            model: "pm1".to_string(),
        });
        tree.insert_above(src, access).unwrap();
        assert_eq!(tree.root(), Some(access));
        assert_eq!(tree.parent(src), Some(access));
        tree.validate().unwrap();

        tree.remove_node(access).unwrap();
        assert_eq!(tree.root(), Some(src));
        assert!(!tree.contains(access));
        tree.validate().unwrap();
    }

    #[test]
    fn test_replace_detaches_old() {
        let mut tree = PlanTree::new();
        let left = source(&mut tree, "pm1.g1");
        let right = source(&mut tree, "pm1.g2");
        let join = tree.add_node(NodeProps::join(JoinType::Cross, vec![]));
        tree.add_child(join, left).unwrap();
        tree.add_child(join, right).unwrap();
        tree.set_root(join).unwrap();
        let null = tree.add_node(NodeProps::Null {
            outputs: vec![],
            groups: BTreeSet::new(),
        });
        tree.replace(right, null).unwrap();
        assert_eq!(tree.child(join, 1).unwrap(), null);
        assert_eq!(tree.parent(right), None);
        assert!(tree.contains(right));
        tree.validate().unwrap();
    }

    #[test]
    fn test_merge_selects_and_limits() {
        let mut tree = PlanTree::new();
        let src = source(&mut tree, "pm1.g1");
        let inner = tree.add_node(NodeProps::select(lit_eq("pm1.g1", 1)));
        let outer = tree.add_node(NodeProps::select(lit_eq("pm1.g1", 2)));
        tree.add_child(inner, src).unwrap();
        tree.add_child(outer, inner).unwrap();
        tree.set_root(outer).unwrap();
        tree.merge(outer, inner).unwrap();
        match tree.props(outer).unwrap() {
            NodeProps::Select { criteria, .. } => assert_eq!(
                criteria.to_string(),
                "(pm1.g1.e1 = 1) AND (pm1.g1.e1 = 2)"
            ),
            other => panic!("Expected Select, got: {:?}", other),
        }
        assert_eq!(tree.child(outer, 0).unwrap(), src);

        let limit_inner = tree.add_node(NodeProps::Limit {
            offset: 10,
            count: Some(100),
        });
        tree.insert_above(src, limit_inner).unwrap();
        let limit_outer = tree.add_node(NodeProps::Limit {
            offset: 20,
            count: Some(75),
        });
        tree.insert_above(limit_inner, limit_outer).unwrap();
        tree.merge(limit_outer, limit_inner).unwrap();
        assert_eq!(
            tree.props(limit_outer).unwrap(),
            &NodeProps::Limit {
                offset: 30,
                count: Some(75)
            }
        );
        tree.validate().unwrap();
    }

    #[test]
    fn test_incompatible_merge() {
        let mut tree = PlanTree::new();
        let src = source(&mut tree, "pm1.g1");
        let select = tree.add_node(NodeProps::select(lit_eq("pm1.g1", 1)));
        tree.add_child(select, src).unwrap();
        tree.set_root(select).unwrap();
        match tree.merge(select, src) {
            Err(PlanError::IncompatibleMerge { into, from, .. }) => {
                assert_eq!(into, "Select");
                assert_eq!(from, "Source");
            }
            other => panic!("Expected IncompatibleMerge, got: {:?}", other),
        }
    }

    #[test]
    fn test_clone_subtree_is_detached_copy() {
        let mut tree = PlanTree::new();
        let src = source(&mut tree, "pm1.g1");
        let project = tree.add_node(NodeProps::Project {
            columns: vec![SelectColumn::new(
                "e1",
                Expr::Column(ElementSymbol::new(&GroupSymbol::new("pm1.g1"), "e1", DataType::Int32)),
            )],
        });
        tree.add_child(project, src).unwrap();
        tree.set_root(project).unwrap();
        let copy = tree.clone_subtree(project).unwrap();
        assert_ne!(copy, project);
        assert_eq!(tree.parent(copy), None);
        assert_eq!(tree.props(copy).unwrap(), tree.props(project).unwrap());
        assert_eq!(tree.preorder(copy).len(), 2);
    }

    #[test]
    fn test_validate_arity_and_parents() {
        let mut tree = PlanTree::new();
        let src = source(&mut tree, "pm1.g1");
        let join = tree.add_node(NodeProps::join(JoinType::Inner, vec![]));
        tree.add_child(join, src).unwrap();
        tree.set_root(join).unwrap();
        assert!(matches!(tree.validate(), Err(PlanError::InvalidTree(_))));

        let other = source(&mut tree, "pm1.g2");
        tree.add_child(join, other).unwrap();
        tree.node_mut(other).unwrap().parent = None;
        assert!(tree.validate().is_err());
        tree.recompute_parents();
        tree.validate().unwrap();
    }

    #[test]
    fn test_rename_groups() {
        let mut tree = PlanTree::new();
        let src = source(&mut tree, "pm1.g1");
        let select = tree.add_node(NodeProps::select(lit_eq("pm1.g1", 1)));
        tree.add_child(select, src).unwrap();
        tree.set_root(select).unwrap();
        let mut renames = BTreeMap::new();
        renames.insert("pm1.g1".to_string(), "v__pm1.g1".to_string());
        tree.rename_groups(select, &renames).unwrap();
        assert_eq!(
            tree.groups(select),
            BTreeSet::from(["v__pm1.g1".to_string()])
        );
        match tree.props(select).unwrap() {
            NodeProps::Select { criteria, .. } => {
                assert_eq!(criteria.to_string(), "v__pm1.g1.e1 = 1")
            }
            other => panic!("Expected Select, got: {:?}", other),
        }
    }

    #[test]
    fn test_combine_limit_windows() {
        assert_eq!(
            combine_limit_windows((10, Some(100)), (20, Some(75))),
            (30, Some(75))
        );
        assert_eq!(combine_limit_windows((0, Some(5)), (10, None)), (10, Some(0)));
        assert_eq!(combine_limit_windows((3, None), (0, Some(7))), (3, Some(7)));
    }
}
