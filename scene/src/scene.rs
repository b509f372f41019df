//! The live scene: node hierarchy, properties, controllers and the per-pass
//! evaluation context.

pub mod attachment;
mod animation;
pub mod context;
pub mod controller;
pub mod draw;
pub mod node;
pub mod node_list;
pub mod property;
pub mod tree;
mod update;


use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use cgmath::{InnerSpace, Matrix3, SquareMatrix, Vector3};
use regex::Regex;

pub use self::attachment::NodeAttachments;
pub use self::context::EvalContext;
pub use self::controller::{Controller, ControllerRef};
pub use self::node::{LodRange, Node, NodeFlags, NodeId, NodeKind};
pub use self::node_list::{NodeArena, NodeList};
pub use self::property::{Property, PropertyId};
pub use self::tree::{walk_tree, TreeVisitor, Visit};

use crate::common::{BoundSphere, Transform};
use crate::config::{ConfigError, SceneConfig, SceneOptions};
use crate::model::BlockId;

/// A retained-mode scene built from a block model.
#[derive(Debug, Default)]
pub struct Scene {
    arena: NodeArena,
    /// Every node of the scene; the owner that keeps nodes alive.
    nodes: NodeList,
    roots: NodeList,
    properties: HashMap<PropertyId, Property>,
    next_property: PropertyId,

    context: EvalContext,
    config: SceneConfig,
    options: SceneOptions,
    cull: Option<Regex>,

    anim_groups: Vec<String>,
    anim_tags: HashMap<String, BTreeMap<String, f32>>,
    current_sequence: Option<String>,
    rigid_bodies: HashMap<BlockId, Transform>,
    current: Option<BlockId>,
    current_row: Option<usize>,
}

impl Scene {
    pub fn new() -> Self {
        let config = SceneConfig::default();
        Self {
            options: config.options(),
            config,
            ..Default::default()
        }
    }

    /// Creates a scene with `config`, failing if its cull expression is invalid.
    pub fn with_config(config: SceneConfig) -> Result<Self, ConfigError> {
        let cull = config.cull_regex()?;
        Ok(Self {
            options: config.options(),
            cull,
            config,
            ..Default::default()
        })
    }

    /// Swaps the configuration. An invalid cull expression disables culling.
    pub fn apply_config(&mut self, config: SceneConfig) {
        self.cull = match config.cull_regex() {
            Ok(cull) => cull,
            Err(err) => {
                log::warn!("{}", err);
                None
            }
        };
        self.options = config.options();
        self.config = config;
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn options(&self) -> SceneOptions {
        self.options
    }

    pub fn set_options(&mut self, options: SceneOptions) {
        self.options = options;
    }

    pub fn time(&self) -> f32 {
        self.context.time
    }

    pub fn set_time(&mut self, time: f32) {
        self.context.time = time;
    }

    pub fn view(&self) -> Transform {
        self.context.view
    }

    /// Sets the view transform. Memoized view transforms are dropped.
    pub fn set_view(&mut self, view: Transform) {
        self.context.view = view;
        self.context.clear();
    }

    pub fn context(&self) -> &EvalContext {
        &self.context
    }

    /// Marks `block` (and optionally one of its rows) as the current item for highlighting.
    pub fn set_current(&mut self, block: Option<BlockId>, row: Option<usize>) {
        self.current = block;
        self.current_row = row;
    }

    pub fn current(&self) -> Option<BlockId> {
        self.current
    }

    // ========== Storage Access ==========

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id)
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.arena.get_mut(id)
    }

    /// Every node of the scene.
    pub fn nodes(&self) -> &NodeList {
        &self.nodes
    }

    pub fn roots(&self) -> &NodeList {
        &self.roots
    }

    /// Number of lists holding `id`.
    pub fn ref_count(&self, id: NodeId) -> usize {
        self.arena.ref_count(id)
    }

    pub fn property(&self, id: PropertyId) -> Option<&Property> {
        self.properties.get(&id)
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    /// Node backed by `block`.
    pub fn node_for_block(&self, block: BlockId) -> Option<NodeId> {
        self.nodes.get(&self.arena, block)
    }

    /// Names of the animation sequences discovered so far, in discovery order.
    pub fn anim_groups(&self) -> &[String] {
        &self.anim_groups
    }

    /// Text key tags of sequence `name`, by label.
    pub fn anim_tags(&self, name: &str) -> Option<&BTreeMap<String, f32>> {
        self.anim_tags.get(name)
    }

    pub fn current_sequence(&self) -> Option<&str> {
        self.current_sequence.as_deref()
    }

    /// Drops every node, property and registered sequence.
    pub fn clear(&mut self) {
        self.roots.clear(&mut self.arena);
        self.nodes.clear(&mut self.arena);
        self.properties.clear();
        self.anim_groups.clear();
        self.anim_tags.clear();
        self.current_sequence = None;
        self.rigid_bodies.clear();
        self.context.clear();
    }

    // ========== Transforms ==========

    /// World transform of `id`, memoized for the current pass.
    pub fn world_trans(&self, id: NodeId) -> Transform {
        let Some(node) = self.arena.get(id) else {
            return Transform::IDENTITY;
        };
        if let Some(t) = self.context.cached_world(node.node_id()) {
            return t;
        }

        let t = match self.live_parent(node) {
            Some(parent) => self.world_trans(parent) * node.local,
            None => node.local,
        };
        self.context.cache_world(node.node_id(), t);
        t
    }

    /// View-space transform of `id`, memoized for the current pass.
    ///
    /// Billboards drop the rotation so that they face the viewer.
    pub fn view_trans(&self, id: NodeId) -> Transform {
        let Some(node) = self.arena.get(id) else {
            return self.context.view;
        };
        if let Some(t) = self.context.cached_view(node.node_id()) {
            return t;
        }

        let mut t = match self.live_parent(node) {
            Some(parent) => self.view_trans(parent) * node.local,
            None => self.context.view * self.world_trans(id),
        };
        if node.kind().is_billboard() {
            t.rotation = Matrix3::identity();
        }
        self.context.cache_view(node.node_id(), t);
        t
    }

    /// Composes local transforms from `id` up to, not including, the ancestor
    /// whose node id is `root`. Runs to the top if there is no such ancestor.
    pub fn local_trans_from(&self, id: NodeId, root: u32) -> Transform {
        let mut trans = Transform::IDENTITY;
        let mut current = self.arena.get(id);
        while let Some(node) = current {
            if node.node_id() == root {
                break;
            }
            trans = node.local * trans;
            current = self.live_parent(node).and_then(|p| self.arena.get(p));
        }
        trans
    }

    /// World origin with the draw-order depth bias added to Z.
    pub fn center(&self, id: NodeId) -> Vector3<f32> {
        let mut center = self.world_trans(id).translation;
        if let Some(node) = self.arena.get(id) {
            center.z += node.depth_bias();
        }
        center
    }

    /// Cached world transform of a collision body from the last transform pass.
    pub fn rigid_body_transform(&self, body: BlockId) -> Option<Transform> {
        self.rigid_bodies.get(&body).copied()
    }

    // ========== Hierarchy Queries ==========

    fn live_parent(&self, node: &Node) -> Option<NodeId> {
        node.parent().filter(|&p| self.arena.contains(p))
    }

    /// True if `id` or any ancestor is hidden, or its name matches the cull expression.
    pub fn is_hidden(&self, id: NodeId) -> bool {
        let Some(node) = self.arena.get(id) else {
            return true;
        };
        if node.flags.contains(NodeFlags::HIDDEN) {
            return true;
        }
        if self.live_parent(node).is_some_and(|p| self.is_hidden(p)) {
            return true;
        }
        self.cull.as_ref().is_some_and(|cull| cull.is_match(&node.name))
    }

    /// True if `ancestor` is `id` itself or one of its parents.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.arena.len() {
                break;
            }
            current = self.arena.get(n).and_then(|node| self.live_parent(node));
        }
        false
    }

    /// Depth-first search for a node called `name`, starting with `id` itself.
    pub fn find_child_by_name(&self, id: NodeId, name: &str) -> Option<NodeId> {
        let node = self.arena.get(id)?;
        if node.name == name {
            return Some(id);
        }
        node.children().iter().find_map(|&child| self.find_child_by_name(child, name))
    }

    /// Depth-first search below `id` for the node with node id `node_id`.
    pub fn find_child_by_block(&self, id: NodeId, node_id: u32) -> Option<NodeId> {
        let node = self.arena.get(id)?;
        node.children().iter().find_map(|&child| {
            let found = self.arena.get(child)?;
            if found.node_id() == node_id {
                Some(child)
            } else {
                self.find_child_by_block(child, node_id)
            }
        })
    }

    /// Nearest ancestor of `id` with node id `node_id`.
    pub fn find_parent(&self, id: NodeId, node_id: u32) -> Option<NodeId> {
        let mut current = self.arena.get(id).and_then(|n| self.live_parent(n));
        while let Some(p) = current {
            let parent = self.arena.get(p)?;
            if parent.node_id() == node_id {
                return Some(p);
            }
            current = self.live_parent(parent);
        }
        None
    }

    /// Resolves a controlled-block lookup on node `id`.
    ///
    /// A non-empty `property_type` (other than `<empty>`) searches the first
    /// attached property of that type; otherwise the node's own controllers.
    pub fn find_controller(
        &self,
        id: NodeId,
        property_type: &str,
        controller_type: &str,
        var1: &str,
        var2: &str,
    ) -> Option<ControllerRef> {
        let node = self.arena.get(id)?;

        if !property_type.is_empty() && property_type != "<empty>" {
            let property = node
                .properties()
                .iter()
                .filter_map(|p| self.properties.get(p))
                .find(|p| p.type_name() == property_type)?;
            let index = property.find_controller(controller_type, var1, var2)?;
            return Some(ControllerRef::Property {
                property: property.id(),
                index,
            });
        }

        controller::find_controller(node.controllers(), controller_type, var1, var2)
            .map(|index| ControllerRef::Node { node: id, index })
    }

    pub fn controller(&self, at: ControllerRef) -> Option<&Controller> {
        match at {
            ControllerRef::Node { node, index } => self.arena.get(node)?.controllers.get(index),
            ControllerRef::Property { property, index } => self.properties.get(&property)?.controllers.get(index),
        }
    }

    pub fn controller_mut(&mut self, at: ControllerRef) -> Option<&mut Controller> {
        match at {
            ControllerRef::Node { node, index } => self.arena.get_mut(node)?.controllers.get_mut(index),
            ControllerRef::Property { property, index } => {
                self.properties.get_mut(&property)?.controllers.get_mut(index)
            }
        }
    }

    /// Properties in effect on `id`: its own, then inherited ones of types it
    /// does not set itself.
    pub fn active_properties(&self, id: NodeId) -> Vec<PropertyId> {
        let mut active: Vec<PropertyId> = Vec::new();
        let mut current = self.arena.get(id);
        while let Some(node) = current {
            for prop in node.properties().iter().filter_map(|p| self.properties.get(p)) {
                let shadowed = active
                    .iter()
                    .filter_map(|a| self.properties.get(a))
                    .any(|a| a.type_name() == prop.type_name());
                if !shadowed {
                    active.push(prop.id());
                }
            }
            current = self.live_parent(node).and_then(|p| self.arena.get(p));
        }
        active
    }

    /// True if `id` carries an alpha-blending property of its own.
    pub fn has_alpha(&self, id: NodeId) -> bool {
        self.arena.get(id).is_some_and(|node| {
            node.properties()
                .iter()
                .filter_map(|p| self.properties.get(p))
                .any(|p| p.is_alpha())
        })
    }

    /// Name plus world and local transforms of `id`, for an info panel.
    pub fn text_stats(&self, id: NodeId) -> String {
        match self.arena.get(id) {
            Some(node) => format!("{}\n\nglobal\n{}\nlocal\n{}\n", node.name, self.world_trans(id), node.local),
            None => String::new(),
        }
    }

    // ========== Draw Order and Bounds ==========

    /// Draw-order comparator: opaque nodes first, nearest first; then
    /// alpha-blended nodes, farthest first.
    pub fn compare_draw_order(&self, a: NodeId, b: NodeId) -> Ordering {
        match (self.has_alpha(a), self.has_alpha(b)) {
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (true, true) => self.center(a).z.partial_cmp(&self.center(b).z).unwrap_or(Ordering::Equal),
            (false, false) => self.center(b).z.partial_cmp(&self.center(a).z).unwrap_or(Ordering::Equal),
        }
    }

    /// Stable sort of `ids` into draw order.
    pub fn sort_draw_order(&self, ids: &mut [NodeId]) {
        ids.sort_by(|&a, &b| self.compare_draw_order(a, b));
    }

    /// Stable sort of `list` into draw order.
    pub fn sort_list(&self, list: &mut NodeList) {
        list.sort_by(|&a, &b| self.compare_draw_order(a, b));
    }

    /// Bounds of `id` alone, without its children.
    ///
    /// Covers the world origin when nodes or collision are shown, plus the
    /// node's bounding volumes.
    pub fn node_bounds(&self, id: NodeId) -> Option<BoundSphere> {
        let node = self.arena.get(id)?;
        let mut bounds = None;

        if self.options.intersects(SceneOptions::SHOW_NODES | SceneOptions::SHOW_COLLISION) {
            bounds = Some(BoundSphere::point(self.world_trans(id).translation));
        }

        let attachments = node.attachments();
        if let Some(bbox) = &attachments.bounding_box {
            let sphere = BoundSphere::new(bbox.translation, bbox.radius.magnitude());
            bounds = BoundSphere::merge_optional(bounds, Some(sphere));
        }

        let world = self.world_trans(id);
        for bound in &attachments.bs_bounds {
            let sphere = BoundSphere::new(bound.center, bound.dimensions.magnitude());
            bounds = BoundSphere::merge_optional(bounds, Some(world * sphere));
        }

        if let Some(multi) = &attachments.multi_bound {
            let (placement, half) = multi.box_transform();
            let sphere = BoundSphere::new(Vector3::new(0.0, 0.0, 0.0), half.magnitude());
            bounds = BoundSphere::merge_optional(bounds, Some((world * placement) * sphere));
        }

        bounds
    }

    /// Merged bounds of all roots under the configured bounds policy.
    pub fn bounds(&self) -> Option<BoundSphere> {
        crate::geom_query::compute_scene_bounds(self, self.config.bounds_policy)
    }

    /// Start/stop interval covered by all node controllers.
    pub fn time_range(&self) -> Option<(f32, f32)> {
        controller::time_range(self.arena.iter().flat_map(|(_, node)| node.controllers()))
    }
}
