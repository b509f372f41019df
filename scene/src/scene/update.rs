//! Structural synchronization of the scene with the block model.

use super::attachment::NodeAttachments;
use super::controller;
use super::node::{Node, NodeFlags, NodeId, NodeKind};
use super::property::{Property, PropertyId};
use super::Scene;
use crate::common::Transform;
use crate::model::{BlockId, BlockModel};

impl Scene {
    /// Rebuilds the whole scene from `model`.
    pub fn make<M: BlockModel + ?Sized>(&mut self, model: &M) {
        self.clear();
        self.update(model, None);
    }

    /// Re-synchronizes with `model` after `changed` was edited, or fully
    /// when `changed` is `None`.
    ///
    /// A full update prunes invalid nodes and properties, refreshes every
    /// node and rebuilds the roots from the model's root links.
    pub fn update<M: BlockModel + ?Sized>(&mut self, model: &M, changed: Option<BlockId>) {
        self.context.clear();

        if let Some(changed) = changed {
            if model.block(changed).is_none() {
                return;
            }
            self.update_properties(model, Some(changed));
            for id in self.nodes.iter().collect::<Vec<_>>() {
                self.update_node(model, id, Some(changed));
            }
            return;
        }

        self.validate(model);
        self.update_properties(model, None);
        for id in self.nodes.iter().collect::<Vec<_>>() {
            self.update_node(model, id, None);
        }

        self.roots.clear(&mut self.arena);
        for link in model.root_links() {
            if model.block(link).is_none() {
                continue;
            }
            if let Some(root) = self.get_or_create_node(model, link) {
                self.make_parent(root, None);
                self.roots.add(&mut self.arena, root);
            }
        }
    }

    fn update_properties<M: BlockModel + ?Sized>(&mut self, model: &M, changed: Option<BlockId>) {
        for property in self.properties.values_mut() {
            property.update(model, changed);
        }
    }

    /// Prunes nodes and properties whose blocks no longer resolve.
    pub fn validate<M: BlockModel + ?Sized>(&mut self, model: &M) {
        self.properties.retain(|_, p| {
            let valid = p.is_valid(model);
            if !valid {
                log::debug!("Pruning invalid property {} (block {})", p.id(), p.block());
            }
            valid
        });
        self.nodes.validate(&mut self.arena, |n| n.is_valid(model));
        self.roots.validate(&mut self.arena, |n| n.is_valid(model));
    }

    /// Returns the node for `block`, creating it if the block is a scene object.
    ///
    /// A new node is registered before its first update so that links back to
    /// it resolve to the same node.
    pub fn get_or_create_node<M: BlockModel + ?Sized>(&mut self, model: &M, block: BlockId) -> Option<NodeId> {
        if let Some(id) = self.nodes.get(&self.arena, block) {
            return Some(id);
        }

        let source = model.block(block)?;
        if !model.inherits(&source.type_name, "NiAVObject") {
            return None;
        }

        let kind = NodeKind::for_block(model, source);
        let shape = model.inherits(&source.type_name, "NiGeometry") || model.inherits(&source.type_name, "BSTriShape");
        let id = self.arena.insert_with(|id| {
            let mut node = Node::new(id, source, kind);
            node.set_shape(shape);
            node
        });
        self.nodes.add(&mut self.arena, id);
        self.update_node(model, id, Some(block));
        Some(id)
    }

    /// Returns the property for `block`, creating it if the block is a property.
    pub fn get_or_create_property<M: BlockModel + ?Sized>(
        &mut self,
        model: &M,
        block: BlockId,
    ) -> Option<PropertyId> {
        if let Some(p) = self.properties.values().find(|p| p.block() == block) {
            return Some(p.id());
        }

        let source = model.block(block)?;
        if !model.inherits(&source.type_name, "NiProperty") {
            return None;
        }

        let id = self.next_property;
        self.next_property += 1;
        let mut property = Property::new(model, id, source);
        property.update(model, Some(block));
        self.properties.insert(id, property);
        Some(id)
    }

    /// Moves `id` under `parent`, or detaches it when `parent` is `None`.
    ///
    /// Calling it with the current parent changes nothing. A parent that is
    /// `id` itself or one of its descendants is refused.
    pub fn make_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        let Some(node) = self.arena.get(id) else {
            return;
        };
        let current = node.parent();

        if let Some(new_parent) = parent {
            if !self.arena.contains(new_parent) || self.is_ancestor(id, new_parent) {
                return;
            }
            let attached = self.arena.get(new_parent).is_some_and(|p| p.children.contains(id));
            if current == parent && attached {
                return;
            }
        }

        if let Some(old) = current {
            self.arena.with_children(old, |children, arena| children.del(arena, id));
        }
        if let Some(node) = self.arena.get_mut(id) {
            node.set_parent(parent);
        }
        if let Some(new_parent) = parent {
            self.arena.with_children(new_parent, |children, arena| children.add(arena, id));
        }
    }

    /// Resets a node whose block no longer resolves.
    fn clear_node(&mut self, id: NodeId) {
        self.detach_children(id);
        if let Some(node) = self.arena.get_mut(id) {
            node.set_node_id(0);
            node.flags = NodeFlags::empty();
            node.local = Transform::IDENTITY;
            node.name.clear();
            node.properties.clear();
            node.controllers.clear();
            node.attachments = NodeAttachments::default();
            node.kind_mut().clear();
        }
    }

    /// Releases the children of `id`. Children whose parent is still `id`
    /// become parentless so they can be adopted elsewhere.
    fn detach_children(&mut self, id: NodeId) {
        let former = self.arena.get(id).map(|n| n.children().to_vec()).unwrap_or_default();
        for child in former {
            if let Some(node) = self.arena.get_mut(child) {
                if node.parent() == Some(id) {
                    node.set_parent(None);
                }
            }
        }
        self.arena.with_children(id, |children, arena| children.clear(arena));
    }

    /// Re-synchronizes one node from the model.
    ///
    /// Flags, local transform and name are read on an exact self-match only.
    /// Properties, children and controllers are rebuilt on a self-match or a
    /// full update.
    pub(crate) fn update_node<M: BlockModel + ?Sized>(&mut self, model: &M, id: NodeId, changed: Option<BlockId>) {
        let Some(node) = self.arena.get(id) else {
            return;
        };
        let block_id = node.block();
        let block = match model.block(block_id) {
            Some(block) if node.is_valid(model) => block,
            _ => {
                self.clear_node(id);
                return;
            }
        };

        let self_match = changed == Some(block_id);
        let refresh = self_match || changed.is_none();

        self.update_controllers(model, id, changed, refresh);

        let Some(node) = self.arena.get_mut(id) else {
            return;
        };
        node.set_node_id(block_id);
        if self_match {
            node.read_pose(block);
        }

        if refresh || changed.is_some_and(|c| node.attachments.depends_on(c)) {
            node.attachments = NodeAttachments::read(model, block);
        }

        let lod_data = match node.kind() {
            NodeKind::Lod { data, .. } => *data,
            _ => None,
        };
        if self_match || (lod_data.is_some() && lod_data == changed) {
            node.kind_mut().read_lod(model, block);
        }

        if !refresh {
            return;
        }

        let mut properties: Vec<PropertyId> = Vec::new();
        for link in block.links("Properties").into_iter().chain(block.links("BS Properties")) {
            if let Some(p) = self.get_or_create_property(model, link) {
                if !properties.contains(&p) {
                    properties.push(p);
                }
            }
        }
        if let Some(node) = self.arena.get_mut(id) {
            node.properties = properties;
        }

        self.detach_children(id);
        for link in block.links("Children") {
            if model.block_of_type(Some(link), "NiAVObject").is_none() {
                continue;
            }
            let Some(child) = self.get_or_create_node(model, link) else {
                continue;
            };
            if self.is_ancestor(child, id) {
                log::debug!("Skipping cyclic child link {} -> {}", block_id, link);
                continue;
            }
            self.make_parent(child, Some(id));
        }
    }

    /// Syncs the controller chain of `id` and resolves what a controller's
    /// self-update discovered: extra targets and animation sequences.
    fn update_controllers<M: BlockModel + ?Sized>(
        &mut self,
        model: &M,
        id: NodeId,
        changed: Option<BlockId>,
        refresh: bool,
    ) {
        let Some(node) = self.arena.get_mut(id) else {
            return;
        };
        let existing = std::mem::take(&mut node.controllers);
        let (mut controllers, fresh) = match model.block(node.block()) {
            Some(block) if refresh => controller::sync_controllers(model, block, existing, Some(id)),
            _ => (existing, Vec::new()),
        };

        let mut synced = Vec::new();
        for &i in &fresh {
            let own = controllers[i].block();
            controllers[i].update(model, Some(own));
            synced.push(i);
        }
        for (i, ctrl) in controllers.iter_mut().enumerate() {
            if ctrl.update(model, changed) && !synced.contains(&i) {
                synced.push(i);
            }
        }

        for &i in &synced {
            let Some(ctrl_block) = model.block(controllers[i].block()) else {
                continue;
            };
            if controllers[i].is_multi_target() {
                let targets: Vec<NodeId> = ctrl_block
                    .links("Extra Targets")
                    .into_iter()
                    .filter_map(|link| self.get_or_create_node(model, link))
                    .collect();
                controllers[i].set_extra_targets(targets);
            } else if controllers[i].is_manager() {
                self.register_sequences(model, ctrl_block);
            }
        }

        if let Some(node) = self.arena.get_mut(id) {
            node.controllers = controllers;
        }
    }
}
