use crate::common::BoundSphere;
use crate::config::BoundsPolicy;
use crate::scene::{walk_tree, Node, NodeId, Scene, TreeVisitor, Visit};

/// Visitor that merges node bounds bottom-up during tree traversal.
pub struct BoundsCollector<'a> {
    scene: &'a Scene,
    policy: BoundsPolicy,
    /// Merged bounds of the processed children at each tree depth, plus
    /// whether that node takes part at all.
    bounds_stack: Vec<(bool, Option<BoundSphere>)>,
    result: Option<BoundSphere>,
}

impl<'a> BoundsCollector<'a> {
    pub fn new(scene: &'a Scene, policy: BoundsPolicy) -> Self {
        Self {
            scene,
            policy,
            bounds_stack: Vec::new(),
            result: None,
        }
    }

    /// Bounds of every subtree walked so far.
    pub fn result(&self) -> Option<BoundSphere> {
        self.result
    }
}

impl<'a> TreeVisitor for BoundsCollector<'a> {
    fn enter_node(&mut self, id: NodeId, _node: &Node) -> Visit {
        let included = match self.policy {
            BoundsPolicy::IncludeHidden => true,
            BoundsPolicy::VisibleOnly => !self.scene.is_hidden(id),
        };
        self.bounds_stack.push((included, None));
        if included {
            Visit::Children
        } else {
            Visit::SkipChildren
        }
    }

    fn exit_node(&mut self, id: NodeId, _node: &Node) {
        let Some((included, child_bounds)) = self.bounds_stack.pop() else {
            return;
        };
        if !included {
            return;
        }

        let node_bounds = BoundSphere::merge_optional(self.scene.node_bounds(id), child_bounds);

        match self.bounds_stack.last_mut() {
            Some((_, parent_bounds)) => *parent_bounds = BoundSphere::merge_optional(*parent_bounds, node_bounds),
            None => self.result = BoundSphere::merge_optional(self.result, node_bounds),
        }
    }
}

/// Bounds of the subtree rooted at `id`.
pub fn compute_node_bounds(scene: &Scene, id: NodeId, policy: BoundsPolicy) -> Option<BoundSphere> {
    let mut visitor = BoundsCollector::new(scene, policy);
    walk_tree(scene, id, &mut visitor);
    visitor.result()
}

/// Merged bounds of every root of the scene.
pub fn compute_scene_bounds(scene: &Scene, policy: BoundsPolicy) -> Option<BoundSphere> {
    let mut visitor = BoundsCollector::new(scene, policy);
    for root in scene.roots().iter() {
        walk_tree(scene, root, &mut visitor);
    }
    visitor.result()
}
