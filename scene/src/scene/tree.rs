//! Depth-first traversal of the node hierarchy.

use std::collections::HashSet;

use super::{Node, NodeId, Scene};

/// What a visitor wants done with the children of the node it entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Children,
    SkipChildren,
}

/// Callbacks for [`walk_tree`].
pub trait TreeVisitor {
    /// Called before the children of `node`.
    fn enter_node(&mut self, id: NodeId, node: &Node) -> Visit;

    /// Called after the children of `node`, or right after `enter_node` when
    /// they were skipped.
    fn exit_node(&mut self, id: NodeId, node: &Node);
}

/// Walks the subtree rooted at `root` depth first, children in list order.
///
/// Each node is entered at most once per walk. Handles that no longer resolve
/// to a node are skipped.
pub fn walk_tree<V: TreeVisitor>(scene: &Scene, root: NodeId, visitor: &mut V) {
    let mut seen = HashSet::new();
    // (node, exiting)
    let mut stack = vec![(root, false)];

    while let Some((id, exiting)) = stack.pop() {
        let Some(node) = scene.get_node(id) else {
            continue;
        };
        if exiting {
            visitor.exit_node(id, node);
            continue;
        }
        if !seen.insert(id) {
            continue;
        }

        stack.push((id, true));
        if visitor.enter_node(id, node) == Visit::Children {
            stack.extend(node.children().iter().rev().map(|&child| (child, false)));
        }
    }
}
