use std::cell::RefCell;
use std::collections::HashMap;

use crate::common::Transform;

/// Per-pass evaluation state: scene time, view transform and the memoized
/// world/view transforms keyed by node id.
///
/// Entries are computed on first query and returned unchanged for the rest of
/// the pass, even if a node's local transform changes meanwhile. Call
/// [`EvalContext::clear`] at the start of every pass.
#[derive(Debug, Default)]
pub struct EvalContext {
    pub time: f32,
    pub view: Transform,
    world: RefCell<HashMap<u32, Transform>>,
    view_space: RefCell<HashMap<u32, Transform>>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every memoized transform.
    pub fn clear(&self) {
        self.world.borrow_mut().clear();
        self.view_space.borrow_mut().clear();
    }

    pub fn cached_world(&self, key: u32) -> Option<Transform> {
        self.world.borrow().get(&key).copied()
    }

    pub fn cache_world(&self, key: u32, transform: Transform) {
        self.world.borrow_mut().insert(key, transform);
    }

    pub fn cached_view(&self, key: u32) -> Option<Transform> {
        self.view_space.borrow().get(&key).copied()
    }

    pub fn cache_view(&self, key: u32, transform: Transform) {
        self.view_space.borrow_mut().insert(key, transform);
    }

    pub fn cached_len(&self) -> usize {
        self.world.borrow().len() + self.view_space.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Vector3;

    #[test]
    fn test_cache_and_clear() {
        let ctx = EvalContext::new();
        let t = Transform::from_translation(Vector3::new(1.0, 0.0, 0.0));

        assert_eq!(ctx.cached_world(4), None);
        ctx.cache_world(4, t);
        ctx.cache_view(4, Transform::IDENTITY);
        assert_eq!(ctx.cached_world(4), Some(t));
        assert_eq!(ctx.cached_len(), 2);

        ctx.clear();
        assert_eq!(ctx.cached_world(4), None);
        assert_eq!(ctx.cached_view(4), None);
    }
}
