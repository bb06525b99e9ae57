//! 플랜 노드 모델
//!
//! The relational plan the optimizer rewrites: an arena of typed nodes,
//! canonical plan generation from a resolved command, and explain text.

mod access;
mod builder;
mod explain;
mod node;
mod tree;

pub use access::{BlockState, bound_columns, unmet_access_patterns};
pub use builder::PlanBuilder;
pub use explain::{describe, explain, explain_subtree};
pub use node::{
    DependentJoin, JoinSide, JoinStrategy, NodeId, NodeKind, NodeProps, PlanNode, SortItem,
    SortSource, SourceNode,
};
pub use tree::{PlanTree, combine_limit_windows};
