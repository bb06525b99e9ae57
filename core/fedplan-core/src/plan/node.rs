//! Plan node payloads.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use smallvec::SmallVec;

use crate::command::{JoinType, SelectColumn, SetOperator};
use crate::expr::{Expr, GroupSymbol};

/// Handle of a node in a [`PlanTree`](super::PlanTree) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 노드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NodeKind {
    Access,
    Select,
    Project,
    Join,
    Grouping,
    Sort,
    DupRemove,
    Limit,
    Union,
    Except,
    Intersect,
    Null,
    Source,
}

impl NodeKind {
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Access => "Access",
            NodeKind::Select => "Select",
            NodeKind::Project => "Project",
            NodeKind::Join => "Join",
            NodeKind::Grouping => "Grouping",
            NodeKind::Sort => "Sort",
            NodeKind::DupRemove => "DupRemove",
            NodeKind::Limit => "Limit",
            NodeKind::Union => "Union",
            NodeKind::Except => "Except",
            NodeKind::Intersect => "Intersect",
            NodeKind::Null => "Null",
            NodeKind::Source => "Source",
        }
    }

    pub fn is_set_op(self) -> bool {
        matches!(self, NodeKind::Union | NodeKind::Except | NodeKind::Intersect)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Side of a binary node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JoinSide {
    Left,
    Right,
}

impl JoinSide {
    pub fn index(self) -> usize {
        match self {
            JoinSide::Left => 0,
            JoinSide::Right => 1,
        }
    }

    pub fn other(self) -> Self {
        match self {
            JoinSide::Left => JoinSide::Right,
            JoinSide::Right => JoinSide::Left,
        }
    }
}

impl fmt::Display for JoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JoinSide::Left => "left",
            JoinSide::Right => "right",
        })
    }
}

/// Where the ordering an input needs for a sort-based join comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SortSource {
    /// ORDER BY pushed into the source query
    Pushed,
    /// Sorted locally (small input)
    Local,
}

/// Runtime parameters of a dependent semi-join.
#[derive(Debug, Clone, PartialEq)]
pub struct DependentJoin {
    /// Side whose rows supply the values.
    pub independent: JoinSide,
    /// One value slot per key pair, in key order.
    pub sources: Vec<u32>,
    pub independent_keys: Vec<Expr>,
    pub dependent_keys: Vec<Expr>,
    /// Estimate of the independent side that led to the choice.
    pub independent_estimate: Option<u64>,
    pub max_in_list: usize,
    pub expected_batches: Option<u64>,
}

impl DependentJoin {
    pub fn dependent(&self) -> JoinSide {
        self.independent.other()
    }
}

/// 조인 전략
#[derive(Debug, Clone, PartialEq)]
pub enum JoinStrategy {
    NestedLoop,
    MergeSorted {
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        sorted: [SortSource; 2],
    },
    /// The smaller side is sorted, the larger one is probed in partitions.
    PartitionedSort {
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        sorted_side: JoinSide,
    },
    DependentSemiJoin(DependentJoin),
}

impl JoinStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            JoinStrategy::NestedLoop => "NestedLoop",
            JoinStrategy::MergeSorted { .. } => "MergeSorted",
            JoinStrategy::PartitionedSort { .. } => "PartitionedSort",
            JoinStrategy::DependentSemiJoin(_) => "DependentSemiJoin",
        }
    }
}

impl fmt::Display for JoinStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinStrategy::DependentSemiJoin(dep) => write!(
                f,
                "DependentSemiJoin(independent={}, cap={})",
                dep.independent, dep.max_in_list
            ),
            JoinStrategy::PartitionedSort { sorted_side, .. } => {
                write!(f, "PartitionedSort(sorted={sorted_side})")
            }
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortItem {
    pub expr: Expr,
    pub ascending: bool,
}

/// Source node of a physical group or an unmerged view.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceNode {
    pub group: GroupSymbol,
    pub model: String,
    pub elements: Vec<crate::expr::ElementSymbol>,
    pub access_patterns: Vec<Vec<String>>,
    pub cardinality: Option<u64>,
    /// Views keep their definition plan as the only child.
    pub is_virtual: bool,
}

/// Operator-specific payload; the node kind is derived from it.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeProps {
    Access {
        model: String,
    },
    Select {
        criteria: Expr,
        is_having: bool,
    },
    /// Without a child a projection yields a single row.
    Project {
        columns: Vec<SelectColumn>,
    },
    Join {
        join_type: JoinType,
        criteria: Vec<Expr>,
        strategy: Option<JoinStrategy>,
        /// Side that must receive values to satisfy its access patterns.
        dependent_hint: Option<JoinSide>,
        planned: bool,
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
    /// Produces no rows; keeps the schema of the subtree it replaced.
    Null {
        outputs: Vec<Expr>,
        groups: BTreeSet<String>,
    },
    Source(SourceNode),
}

impl NodeProps {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeProps::Access { .. } => NodeKind::Access,
            NodeProps::Select { .. } => NodeKind::Select,
            NodeProps::Project { .. } => NodeKind::Project,
            NodeProps::Join { .. } => NodeKind::Join,
            NodeProps::Grouping { .. } => NodeKind::Grouping,
            NodeProps::Sort { .. } => NodeKind::Sort,
            NodeProps::DupRemove => NodeKind::DupRemove,
            NodeProps::Limit { .. } => NodeKind::Limit,
            NodeProps::SetOp { op, .. } => match op {
                SetOperator::Union => NodeKind::Union,
                SetOperator::Except => NodeKind::Except,
                SetOperator::Intersect => NodeKind::Intersect,
            },
            NodeProps::Null { .. } => NodeKind::Null,
            NodeProps::Source(_) => NodeKind::Source,
        }
    }

    pub fn join(join_type: JoinType, criteria: Vec<Expr>) -> Self {
        NodeProps::Join {
            join_type,
            criteria,
            strategy: None,
            dependent_hint: None,
            planned: false,
        }
    }

    pub fn select(criteria: Expr) -> Self {
        NodeProps::Select {
            criteria,
            is_having: false,
        }
    }

    /// Expressions held by the payload.
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            NodeProps::Select { criteria, .. } => vec![criteria],
            NodeProps::Project { columns } => columns.iter().map(|c| &c.expr).collect(),
            NodeProps::Join { criteria, .. } => criteria.iter().collect(),
            NodeProps::Grouping {
                group_by,
                aggregates,
            } => group_by.iter().chain(aggregates.iter()).collect(),
            NodeProps::Sort { items } => items.iter().map(|i| &i.expr).collect(),
            NodeProps::Null { outputs, .. } => outputs.iter().collect(),
            _ => vec![],
        }
    }

    /// Rebuild every expression of the payload with `f`.
    pub fn map_exprs(&mut self, f: &mut impl FnMut(&Expr) -> Expr) {
        match self {
            NodeProps::Select { criteria, .. } => *criteria = f(criteria),
            NodeProps::Project { columns } => {
                for column in columns {
                    column.expr = f(&column.expr);
                }
            }
            NodeProps::Join { criteria, .. } => {
                for conjunct in criteria.iter_mut() {
                    *conjunct = f(conjunct);
                }
            }
            NodeProps::Grouping {
                group_by,
                aggregates,
            } => {
                for expr in group_by.iter_mut().chain(aggregates.iter_mut()) {
                    *expr = f(expr);
                }
            }
            NodeProps::Sort { items } => {
                for item in items {
                    item.expr = f(&item.expr);
                }
            }
            NodeProps::Null { outputs, .. } => {
                for expr in outputs {
                    *expr = f(expr);
                }
            }
            _ => {}
        }
    }
}

/// One arena slot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    pub props: NodeProps,
    pub(crate) children: SmallVec<[NodeId; 2]>,
    pub(crate) parent: Option<NodeId>,
    /// Output columns assigned by the finalizer.
    pub outputs: Vec<Expr>,
}

impl PlanNode {
    pub fn new(props: NodeProps) -> Self {
        Self {
            props,
            children: SmallVec::new(),
            parent: None,
            outputs: Vec::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.props.kind()
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }
}
