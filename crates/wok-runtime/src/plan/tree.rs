//! Plan tree access.

use std::collections::HashMap;
use std::sync::Arc;

use wok_core::{Route, Segment};

use super::descriptor::PlanDescriptor;

/// A node in the plan tree.
///
/// Implementations must be deterministic and free of side effects: the
/// scheduler re-walks the same route several times per call.
pub trait PlanNode: Send + Sync {
    /// Child reached through `segment`. `None` behaves as an empty node.
    fn child(&self, segment: &Segment) -> Option<Arc<dyn PlanNode>>;

    /// Plans attached to this node, in dispatch order.
    fn plans(&self) -> &[PlanDescriptor];
}

/// In-memory tree node.
#[derive(Default)]
pub struct StaticNode {
    plans: Vec<PlanDescriptor>,
    children: HashMap<Segment, Arc<dyn PlanNode>>,
}

impl StaticNode {
    /// Node without plans or children.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a plan.
    #[must_use]
    pub fn plan(mut self, plan: PlanDescriptor) -> Self {
        self.plans.push(plan);
        self
    }

    /// Attach a child under `segment`.
    #[must_use]
    pub fn child(mut self, segment: impl Into<Segment>, node: StaticNode) -> Self {
        let _ = self.children.insert(segment.into(), Arc::new(node));
        self
    }

    /// Attach an arbitrary [`PlanNode`] under `segment`.
    #[must_use]
    pub fn mount(mut self, segment: impl Into<Segment>, node: Arc<dyn PlanNode>) -> Self {
        let _ = self.children.insert(segment.into(), node);
        self
    }

    /// Finish building.
    pub fn into_root(self) -> Arc<dyn PlanNode> {
        Arc::new(self)
    }
}

impl PlanNode for StaticNode {
    fn child(&self, segment: &Segment) -> Option<Arc<dyn PlanNode>> {
        self.children.get(segment).cloned()
    }

    fn plans(&self) -> &[PlanDescriptor] {
        &self.plans
    }
}

/// Nodes visited along `route`, one per segment.
///
/// Once a segment fails to resolve, every later position is `None`.
pub fn walk(root: &Arc<dyn PlanNode>, route: &Route) -> Vec<Option<Arc<dyn PlanNode>>> {
    let mut node = Some(Arc::clone(root));
    route
        .iter()
        .map(|segment| {
            node = node.as_ref().and_then(|n| n.child(segment));
            node.clone()
        })
        .collect()
}
