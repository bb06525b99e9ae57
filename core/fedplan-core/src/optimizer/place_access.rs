//! Access node placement.

use super::support::pushed_down;
use super::{OptimizationRule, RuleContext, RuleMode, Transformed};
use crate::error::PlanResult;
use crate::plan::{NodeId, NodeKind, NodeProps, PlanTree};

/// Every physical source gets an Access node directly above it, marking the
/// boundary of the work its model performs.
pub struct PlaceAccess;

impl OptimizationRule for PlaceAccess {
    fn name(&self) -> &'static str {
        "PlaceAccess"
    }

    fn targets(&self) -> &'static [NodeKind] {
        &[NodeKind::Source]
    }

    fn mode(&self) -> RuleMode {
        RuleMode::SinglePass
    }

    fn apply(&self, tree: &mut PlanTree, node: NodeId, _ctx: &RuleContext<'_>) -> PlanResult<Transformed> {
        let NodeProps::Source(source) = tree.props(node)? else {
            return Ok(Transformed::no());
        };
        if source.is_virtual {
            return Ok(Transformed::no());
        }
        let model = source.model.clone();
        if pushed_down(tree, node) {
            return Ok(Transformed::no());
        }
        let access = tree.add_node(NodeProps::Access { model });
        tree.insert_above(node, access)?;
        Ok(Transformed::yes([access, node]))
    }
}
