use bitflags::bitflags;
use cgmath::Vector3;

use super::attachment::NodeAttachments;
use super::controller::Controller;
use super::node_list::NodeList;
use super::property::PropertyId;
use crate::common::Transform;
use crate::model::{Block, BlockId, BlockModel};

/// Unique identifier for a Node in the scene arena.
pub type NodeId = u32;

bitflags! {
    /// Node flags as stored in the block's `Flags` field.
    ///
    /// Only the hidden bit is interpreted; the remaining bits are kept so that
    /// they survive a controller toggling visibility.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u16 {
        const HIDDEN = 0x0001;
        const _ = !0;
    }
}

/// One `[near, far)` distance band of a LOD node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodRange {
    pub near: f32,
    pub far: f32,
}

impl LodRange {
    pub fn contains(&self, distance: f32) -> bool {
        self.near <= distance && distance < self.far
    }
}

/// Behaviour that varies by node block type.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Plain,
    /// Children are switched by their view distance to `center`.
    Lod {
        center: Vector3<f32>,
        ranges: Vec<LodRange>,
        /// `NiRangeLODData` block the ranges came from, if any.
        data: Option<BlockId>,
    },
    /// View rotation is discarded so the node always faces the viewer.
    Billboard,
}

impl NodeKind {
    /// Picks the variant for a node block.
    pub fn for_block<M: BlockModel + ?Sized>(model: &M, block: &Block) -> NodeKind {
        if block.type_name == "NiLODNode" {
            NodeKind::Lod {
                center: Vector3::new(0.0, 0.0, 0.0),
                ranges: Vec::new(),
                data: None,
            }
        } else if model.inherits(&block.type_name, "NiBillboardNode") {
            NodeKind::Billboard
        } else {
            NodeKind::Plain
        }
    }

    /// Reloads the LOD center and ranges. No-op for other variants.
    pub(crate) fn read_lod<M: BlockModel + ?Sized>(&mut self, model: &M, block: &Block) {
        let NodeKind::Lod { center, ranges, data } = self else {
            return;
        };

        let lod_data = model.block_of_type(block.link("LOD Level Data"), "NiRangeLODData");
        let source = lod_data.map(|d| &d.fields).unwrap_or(&block.fields);

        *data = lod_data.map(|d| d.id);
        *center = source.vec3("LOD Center");
        *ranges = source
            .rows("LOD Levels")
            .iter()
            .map(|level| LodRange {
                near: level.float("Near Extent"),
                far: level.float("Far Extent"),
            })
            .collect();
    }

    pub(crate) fn clear(&mut self) {
        if let NodeKind::Lod { ranges, data, .. } = self {
            ranges.clear();
            *data = None;
        }
    }

    pub fn is_lod(&self) -> bool {
        matches!(self, NodeKind::Lod { .. })
    }

    pub fn is_billboard(&self) -> bool {
        matches!(self, NodeKind::Billboard)
    }
}

/// A node in the scene hierarchy, backed by one block of the model.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    block: BlockId,
    type_name: String,
    kind: NodeKind,
    /// Geometry-bearing node, drawn by the shape pass.
    shape: bool,

    /// Block number used as the transform cache key. Zero once cleared.
    node_id: u32,
    pub name: String,
    pub flags: NodeFlags,
    /// Local pose, rewritten by controllers.
    pub local: Transform,

    // Hierarchy
    parent: Option<NodeId>,
    pub(crate) children: NodeList,

    pub(crate) properties: Vec<PropertyId>,
    pub(crate) controllers: Vec<Controller>,
    pub(crate) attachments: NodeAttachments,
}

impl Node {
    pub fn new(id: NodeId, block: &Block, kind: NodeKind) -> Self {
        Self {
            id,
            block: block.id,
            type_name: block.type_name.clone(),
            kind,
            shape: false,
            node_id: 0,
            name: String::new(),
            flags: NodeFlags::empty(),
            local: Transform::IDENTITY,
            parent: None,
            children: NodeList::new(),
            properties: Vec::new(),
            controllers: Vec::new(),
            attachments: NodeAttachments::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The backing block.
    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    pub fn is_shape(&self) -> bool {
        self.shape
    }

    pub(crate) fn set_shape(&mut self, shape: bool) {
        self.shape = shape;
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub(crate) fn set_node_id(&mut self, node_id: u32) {
        self.node_id = node_id;
    }

    /// Gets the parent node ID.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Sets the parent node ID (internal use only - use Scene::make_parent to maintain consistency).
    pub(super) fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    pub fn children(&self) -> &[NodeId] {
        self.children.as_slice()
    }

    pub fn properties(&self) -> &[PropertyId] {
        &self.properties
    }

    pub fn controllers(&self) -> &[Controller] {
        &self.controllers
    }

    pub fn attachments(&self) -> &NodeAttachments {
        &self.attachments
    }

    /// True while the backing block still resolves to a block of the same type.
    pub fn is_valid<M: BlockModel + ?Sized>(&self, model: &M) -> bool {
        model
            .block(self.block)
            .is_some_and(|b| b.type_name == self.type_name)
    }

    /// Reads flags, local transform and name from the backing block.
    pub(crate) fn read_pose(&mut self, block: &Block) {
        self.flags = NodeFlags::from_bits_retain(block.int("Flags") as u16);
        self.local = read_local(block);
        self.name = block.string("Name").to_string();
    }

    /// Depth bias added to the draw-order center. Integer division keeps
    /// coincident origins apart by a stable step.
    pub fn depth_bias(&self) -> f32 {
        if self.node_id == 0 {
            0.0
        } else {
            (1000 / self.node_id) as f32
        }
    }
}

/// Local transform of a block; a missing `Scale` field means 1.
pub fn read_local(block: &Block) -> Transform {
    let scale = if block.has("Scale") { block.float("Scale") } else { 1.0 };
    Transform::new(block.vec3("Translation"), block.matrix3("Rotation"), scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::EPSILON;
    use crate::model::{MemoryModel, Record, Value};

    // ========================================================================
    // Node Creation Tests
    // ========================================================================

    #[test]
    fn test_node_new_defaults() {
        let block = Block::new(3, "NiNode", Record::new());
        let node = Node::new(7, &block, NodeKind::Plain);

        assert_eq!(node.id(), 7);
        assert_eq!(node.block(), 3);
        assert_eq!(node.node_id(), 0);
        assert_eq!(node.parent(), None);
        assert!(node.children().is_empty());
        assert!(node.local.is_identity());
        assert!(node.flags.is_empty());
    }

    #[test]
    fn test_kind_for_block() {
        let model = MemoryModel::new();

        let lod = Block::new(0, "NiLODNode", Record::new());
        assert!(NodeKind::for_block(&model, &lod).is_lod());

        let billboard = Block::new(1, "NiBillboardNode", Record::new());
        assert!(NodeKind::for_block(&model, &billboard).is_billboard());

        let plain = Block::new(2, "NiTriShape", Record::new());
        assert_eq!(NodeKind::for_block(&model, &plain), NodeKind::Plain);
    }

    // ========================================================================
    // Block Reading Tests
    // ========================================================================

    #[test]
    fn test_read_pose() {
        let block = Block::new(
            0,
            "NiNode",
            Record::new()
                .with("Name", "Bip01")
                .with("Flags", 0x0009)
                .with("Translation", Vector3::new(1.0f32, 2.0, 3.0))
                .with("Scale", 2.0f32),
        );
        let mut node = Node::new(1, &block, NodeKind::Plain);
        node.read_pose(&block);

        assert_eq!(node.name, "Bip01");
        assert!(node.flags.contains(NodeFlags::HIDDEN));
        assert_eq!(node.flags.bits(), 0x0009);
        assert_eq!(node.local.translation, Vector3::new(1.0, 2.0, 3.0));
        assert!((node.local.scale - 2.0).abs() < EPSILON);
    }

    #[test]
    fn test_read_local_missing_scale_is_one() {
        let block = Block::new(0, "NiNode", Record::new());
        let local = read_local(&block);
        assert!((local.scale - 1.0).abs() < EPSILON, "Expected unit scale, got {}", local.scale);
    }

    #[test]
    fn test_read_lod_from_data_block() {
        let mut model = MemoryModel::new();
        let data = model.add_block(
            "NiRangeLODData",
            Record::new()
                .with("LOD Center", Vector3::new(0.0f32, 0.0, 1.0))
                .with(
                    "LOD Levels",
                    vec![
                        Record::new().with("Near Extent", 0.0f32).with("Far Extent", 10.0f32),
                        Record::new().with("Near Extent", 10.0f32).with("Far Extent", 100.0f32),
                    ],
                ),
        );
        let lod = model.add_block("NiLODNode", Record::new().with("LOD Level Data", Value::link(data)));
        let block = model.block(lod).unwrap();

        let mut kind = NodeKind::for_block(&model, block);
        kind.read_lod(&model, block);

        let NodeKind::Lod { center, ranges, data: source } = &kind else {
            panic!("Expected a LOD node");
        };
        assert_eq!(*center, Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(ranges.len(), 2);
        assert!(ranges[1].contains(10.0));
        assert!(!ranges[0].contains(10.0));
        assert_eq!(*source, Some(data));
    }

    #[test]
    fn test_read_lod_inline_levels() {
        let mut model = MemoryModel::new();
        let lod = model.add_block(
            "NiLODNode",
            Record::new().with(
                "LOD Levels",
                vec![Record::new().with("Near Extent", 5.0f32).with("Far Extent", 50.0f32)],
            ),
        );
        let block = model.block(lod).unwrap();

        let mut kind = NodeKind::for_block(&model, block);
        kind.read_lod(&model, block);

        let NodeKind::Lod { ranges, data, .. } = &kind else {
            panic!("Expected a LOD node");
        };
        assert_eq!(ranges, &vec![LodRange { near: 5.0, far: 50.0 }]);
        assert_eq!(*data, None);
    }

    #[test]
    fn test_depth_bias() {
        let block = Block::new(0, "NiNode", Record::new());
        let mut node = Node::new(0, &block, NodeKind::Plain);
        assert_eq!(node.depth_bias(), 0.0);

        node.set_node_id(3);
        assert_eq!(node.depth_bias(), 333.0);

        node.set_node_id(2000);
        assert_eq!(node.depth_bias(), 0.0);
    }

    #[test]
    fn test_is_valid_tracks_block_type() {
        let mut model = MemoryModel::new();
        let id = model.add_block("NiNode", Record::new());
        let node = Node::new(0, model.block(id).unwrap(), NodeKind::Plain);
        assert!(node.is_valid(&model));

        model.block_mut(id).unwrap().type_name = "NiTriShape".to_string();
        assert!(!node.is_valid(&model));

        model.remove_block(id);
        assert!(!node.is_valid(&model));
    }
}
