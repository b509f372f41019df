use std::cmp::Ordering;
use std::collections::HashMap;

use super::node::{Node, NodeId};
use crate::model::BlockId;

/// Storage for every node of a scene, with an owner count per node.
///
/// A node lives as long as at least one [`NodeList`] holds it. Releasing the
/// last owner removes the node and releases its children in turn.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: HashMap<NodeId, Node>,
    owners: HashMap<NodeId, usize>,
    next_id: NodeId,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a node built by `make` with a fresh id. The node starts unowned.
    pub fn insert_with(&mut self, make: impl FnOnce(NodeId) -> Node) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, make(id));
        self.owners.insert(id, 0);
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of lists currently holding `id`.
    pub fn ref_count(&self, id: NodeId) -> usize {
        self.owners.get(&id).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    fn acquire(&mut self, id: NodeId) {
        if let Some(count) = self.owners.get_mut(&id) {
            *count += 1;
        }
    }

    /// Drops `count` ownerships of `id`, destroying it when none remain.
    fn release(&mut self, id: NodeId, count: usize) {
        let Some(owners) = self.owners.get_mut(&id) else {
            return;
        };
        if *owners > count {
            *owners -= count;
            return;
        }

        self.owners.remove(&id);
        if let Some(mut node) = self.nodes.remove(&id) {
            log::trace!("Destroying node {} (block {})", id, node.block());
            node.children.clear(self);
        }
    }

    /// Runs `f` on the child list of `id` with the arena available.
    ///
    /// The list is moved out of the node for the duration of the call. If the
    /// node is destroyed meanwhile, the list's ownerships are released.
    pub fn with_children<R>(&mut self, id: NodeId, f: impl FnOnce(&mut NodeList, &mut NodeArena) -> R) -> Option<R> {
        let mut children = std::mem::take(&mut self.nodes.get_mut(&id)?.children);
        let result = f(&mut children, self);
        match self.nodes.get_mut(&id) {
            Some(node) => node.children = children,
            None => children.clear(self),
        }
        Some(result)
    }
}

/// An ordered list of owned node handles.
///
/// Membership is unique. Every member holds one ownership in the arena.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeList {
    nodes: Vec<NodeId>,
}

impl NodeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `id` unless it is already a member or does not exist.
    pub fn add(&mut self, arena: &mut NodeArena, id: NodeId) {
        if !arena.contains(id) || self.nodes.contains(&id) {
            return;
        }
        arena.acquire(id);
        self.nodes.push(id);
    }

    /// Removes every occurrence of `id`, releasing one ownership per occurrence.
    pub fn del(&mut self, arena: &mut NodeArena, id: NodeId) {
        let before = self.nodes.len();
        self.nodes.retain(|&n| n != id);
        let removed = before - self.nodes.len();
        if removed > 0 {
            arena.release(id, removed);
        }
    }

    /// Releases every member.
    pub fn clear(&mut self, arena: &mut NodeArena) {
        for id in std::mem::take(&mut self.nodes) {
            arena.release(id, 1);
        }
    }

    /// First member backed by `block`.
    pub fn get(&self, arena: &NodeArena, block: BlockId) -> Option<NodeId> {
        self.nodes
            .iter()
            .copied()
            .find(|&id| arena.get(id).is_some_and(|n| n.block() == block))
    }

    /// Releases every member for which `is_valid` is false.
    pub fn validate(&mut self, arena: &mut NodeArena, mut is_valid: impl FnMut(&Node) -> bool) {
        let invalid: Vec<NodeId> = self
            .nodes
            .iter()
            .copied()
            .filter(|&id| !arena.get(id).is_some_and(&mut is_valid))
            .collect();
        for id in invalid {
            log::debug!("Pruning invalid node {}", id);
            self.del(arena, id);
        }
    }

    /// Stable sort by `compare`.
    pub fn sort_by(&mut self, compare: impl FnMut(&NodeId, &NodeId) -> Ordering) {
        self.nodes.sort_by(compare);
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    pub fn as_slice(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Block, Record};
    use crate::scene::node::NodeKind;

    fn insert(arena: &mut NodeArena, block: BlockId) -> NodeId {
        let block = Block::new(block, "NiNode", Record::new());
        arena.insert_with(|id| Node::new(id, &block, NodeKind::Plain))
    }

    // ========================================================================
    // Reference Counting Tests
    // ========================================================================

    #[test]
    fn test_add_then_del_restores_count() {
        let mut arena = NodeArena::new();
        let mut owner = NodeList::new();
        let mut list = NodeList::new();
        let id = insert(&mut arena, 0);
        owner.add(&mut arena, id);

        list.add(&mut arena, id);
        assert_eq!(arena.ref_count(id), 2);
        list.del(&mut arena, id);

        assert_eq!(arena.ref_count(id), 1);
        assert!(!list.contains(id));
        assert!(arena.contains(id));
    }

    #[test]
    fn test_add_twice_del_once() {
        let mut arena = NodeArena::new();
        let mut owner = NodeList::new();
        let mut list = NodeList::new();
        let id = insert(&mut arena, 0);
        owner.add(&mut arena, id);

        list.add(&mut arena, id);
        list.add(&mut arena, id);
        assert_eq!(list.len(), 1, "Duplicate add must not append");
        assert_eq!(arena.ref_count(id), 2);

        owner.del(&mut arena, id);
        assert!(list.contains(id));
        assert_eq!(arena.ref_count(id), 1);
        assert!(arena.contains(id));
    }

    #[test]
    fn test_last_release_destroys() {
        let mut arena = NodeArena::new();
        let mut list = NodeList::new();
        let id = insert(&mut arena, 0);

        list.add(&mut arena, id);
        list.del(&mut arena, id);

        assert!(!arena.contains(id));
        assert_eq!(arena.ref_count(id), 0);
    }

    #[test]
    fn test_add_missing_node_is_noop() {
        let mut arena = NodeArena::new();
        let mut list = NodeList::new();

        list.add(&mut arena, 42);
        assert!(list.is_empty());
    }

    #[test]
    fn test_destroy_releases_children() {
        let mut arena = NodeArena::new();
        let mut list = NodeList::new();
        let parent = insert(&mut arena, 0);
        let child = insert(&mut arena, 1);
        list.add(&mut arena, parent);
        arena.with_children(parent, |children, arena| children.add(arena, child));
        assert_eq!(arena.ref_count(child), 1);

        list.del(&mut arena, parent);

        assert!(!arena.contains(parent));
        assert!(!arena.contains(child));
        assert!(arena.is_empty());
    }

    // ========================================================================
    // Lookup and Validation Tests
    // ========================================================================

    #[test]
    fn test_get_by_block() {
        let mut arena = NodeArena::new();
        let mut list = NodeList::new();
        let a = insert(&mut arena, 10);
        let b = insert(&mut arena, 20);
        list.add(&mut arena, a);
        list.add(&mut arena, b);

        assert_eq!(list.get(&arena, 20), Some(b));
        assert_eq!(list.get(&arena, 30), None);
    }

    #[test]
    fn test_validate_prunes_invalid() {
        let mut arena = NodeArena::new();
        let mut list = NodeList::new();
        let keep = insert(&mut arena, 1);
        let drop = insert(&mut arena, 2);
        list.add(&mut arena, keep);
        list.add(&mut arena, drop);

        list.validate(&mut arena, |n| n.block() != 2);

        assert_eq!(list.as_slice(), &[keep]);
        assert!(!arena.contains(drop));
    }

    #[test]
    fn test_sort_is_stable() {
        let mut arena = NodeArena::new();
        let mut list = NodeList::new();
        let ids: Vec<NodeId> = (0..4).map(|b| insert(&mut arena, b)).collect();
        for &id in &ids {
            list.add(&mut arena, id);
        }

        // Even ids first, original order kept within each group.
        list.sort_by(|a, b| (a % 2).cmp(&(b % 2)));
        assert_eq!(list.as_slice(), &[ids[0], ids[2], ids[1], ids[3]]);
    }
}
