//! Auxiliary data read from a node's block: bounding volumes, the collision
//! body and furniture markers.

use cgmath::{Matrix3, SquareMatrix, Vector3};

use crate::common::Transform;
use crate::model::{Block, BlockId, BlockModel};

/// Old-style collision box. Its placement ignores the node transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub translation: Vector3<f32>,
    pub rotation: Matrix3<f32>,
    pub radius: Vector3<f32>,
}

impl BoundingBox {
    pub fn transform(&self) -> Transform {
        Transform::new(self.translation, self.rotation, 1.0)
    }
}

/// A `BSBound` extra data box in node space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BsBound {
    pub block: BlockId,
    pub center: Vector3<f32>,
    pub dimensions: Vector3<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MultiBoundVolume {
    Aabb {
        position: Vector3<f32>,
        extent: Vector3<f32>,
    },
    Obb {
        center: Vector3<f32>,
        size: Vector3<f32>,
        rotation: Matrix3<f32>,
    },
}

/// A `BSMultiBound` volume in node space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiBound {
    pub block: BlockId,
    pub data: BlockId,
    pub volume: MultiBoundVolume,
}

impl MultiBound {
    /// Placement and half-size of the box in node space.
    pub fn box_transform(&self) -> (Transform, Vector3<f32>) {
        match self.volume {
            MultiBoundVolume::Aabb { position, extent } => (Transform::from_translation(position), extent),
            MultiBoundVolume::Obb { center, size, rotation } => (Transform::new(center, rotation, 1.0), size),
        }
    }
}

/// Scale from physics units to scene units.
const HAVOK_UNIT_SCALE: f32 = 7.0;

/// A rigid body attached through the node's collision object.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionBody {
    pub object: BlockId,
    pub body: BlockId,
    /// Body placement relative to the node.
    pub local: Transform,
    pub shape: Option<BlockId>,
    pub layer: u32,
    pub center: Vector3<f32>,
    pub constraints: Vec<BlockId>,
}

impl CollisionBody {
    fn read<M: BlockModel + ?Sized>(model: &M, block: &Block) -> Option<CollisionBody> {
        let object = block
            .link("Collision Data")
            .and_then(|l| model.block(l))
            .or_else(|| block.link("Collision Object").and_then(|l| model.block(l)))?;
        let body = object.link("Body").and_then(|l| model.block(l))?;

        let havok_scale = if model.user_version() >= 12 { 10.0 } else { 1.0 };
        let mut local = Transform {
            scale: HAVOK_UNIT_SCALE,
            ..Transform::IDENTITY
        };
        if body.type_name == "bhkRigidBodyT" {
            local.rotation = Matrix3::from(body.quat("Rotation"));
            local.translation = body.vec3("Translation") * HAVOK_UNIT_SCALE * havok_scale;
        }

        Some(CollisionBody {
            object: object.id,
            body: body.id,
            local,
            shape: body.link("Shape"),
            layer: (body.int("Layer") & 7) as u32,
            center: body.vec3("Center"),
            constraints: model
                .link_blocks(body, "Constraints", "bhkConstraint")
                .iter()
                .map(|c| c.id)
                .collect(),
        })
    }
}

/// One sitting or sleeping position of a furniture marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FurniturePosition {
    pub offset: Vector3<f32>,
    /// Rotation about Z in milliradians.
    pub orientation: u16,
    pub position_ref1: u8,
    pub position_ref2: u8,
    pub heading: f32,
    pub animation_type: u16,
    pub entry_properties: u32,
}

impl Default for FurniturePosition {
    fn default() -> Self {
        Self {
            offset: Vector3::new(0.0, 0.0, 0.0),
            orientation: 0,
            position_ref1: 0,
            position_ref2: 0,
            heading: 0.0,
            animation_type: 0,
            entry_properties: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FurnitureMarkers {
    pub block: BlockId,
    pub positions: Vec<FurniturePosition>,
}

/// Everything a node reads from its block besides flags, transform, children
/// and properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeAttachments {
    pub bounding_box: Option<BoundingBox>,
    pub bs_bounds: Vec<BsBound>,
    pub multi_bound: Option<MultiBound>,
    pub collision: Option<CollisionBody>,
    pub furniture: Vec<FurnitureMarkers>,
    linked: Vec<BlockId>,
}

impl NodeAttachments {
    pub fn read<M: BlockModel + ?Sized>(model: &M, block: &Block) -> Self {
        let mut linked = Vec::new();

        let bounding_box = block.bool("Has Bounding Box").then(|| {
            let bbox = block.record("Bounding Box");
            BoundingBox {
                translation: bbox.map(|b| b.vec3("Translation")).unwrap_or_else(|| Vector3::new(0.0, 0.0, 0.0)),
                rotation: bbox.map(|b| b.matrix3("Rotation")).unwrap_or_else(Matrix3::identity),
                radius: bbox.map(|b| b.vec3("Radius")).unwrap_or_else(|| Vector3::new(0.0, 0.0, 0.0)),
            }
        });

        let bs_bounds: Vec<BsBound> = model
            .link_blocks(block, "Extra Data List", "BSBound")
            .into_iter()
            .map(|b| BsBound {
                block: b.id,
                center: b.vec3("Center"),
                dimensions: b.vec3("Dimensions"),
            })
            .collect();
        linked.extend(bs_bounds.iter().map(|b| b.block));

        let multi_bound = model
            .block_of_type(block.link("Multi Bound"), "BSMultiBound")
            .and_then(|mb| {
                linked.push(mb.id);
                let data = model.block_of_type(mb.link("Data"), "BSMultiBoundData")?;
                linked.push(data.id);
                let volume = if model.inherits(&data.type_name, "BSMultiBoundAABB") {
                    MultiBoundVolume::Aabb {
                        position: data.vec3("Position"),
                        extent: data.vec3("Extent"),
                    }
                } else if model.inherits(&data.type_name, "BSMultiBoundOBB") {
                    MultiBoundVolume::Obb {
                        center: data.vec3("Center"),
                        size: data.vec3("Size"),
                        rotation: data.matrix3("Rotation"),
                    }
                } else {
                    return None;
                };
                Some(MultiBound {
                    block: mb.id,
                    data: data.id,
                    volume,
                })
            });

        let collision = CollisionBody::read(model, block);
        if let Some(body) = &collision {
            linked.push(body.object);
            linked.push(body.body);
        }

        let furniture: Vec<FurnitureMarkers> = model
            .link_blocks(block, "Extra Data List", "BSFurnitureMarker")
            .into_iter()
            .map(|marker| FurnitureMarkers {
                block: marker.id,
                positions: marker
                    .rows("Positions")
                    .iter()
                    .map(|row| FurniturePosition {
                        offset: row.vec3("Offset"),
                        orientation: row.int("Orientation") as u16,
                        position_ref1: row.int("Position Ref 1") as u8,
                        position_ref2: row.int("Position Ref 2") as u8,
                        heading: row.float("Heading"),
                        animation_type: row.int("Animation Type") as u16,
                        entry_properties: row.int("Entry Properties") as u32,
                    })
                    .collect(),
            })
            .collect();
        linked.extend(furniture.iter().map(|f| f.block));

        Self {
            bounding_box,
            bs_bounds,
            multi_bound,
            collision,
            furniture,
            linked,
        }
    }

    /// True if `block` is one of the blocks these attachments were read from.
    pub fn depends_on(&self, block: BlockId) -> bool {
        self.linked.contains(&block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemoryModel, Record, Value};
    use cgmath::InnerSpace;

    #[test]
    fn test_read_empty_block() {
        let mut model = MemoryModel::new();
        let node = model.add_block("NiNode", Record::new());
        let block = model.block(node).expect("node block");

        let attachments = NodeAttachments::read(&model, block);
        assert_eq!(attachments, NodeAttachments::default());
    }

    #[test]
    fn test_read_bounding_volumes() {
        let mut model = MemoryModel::new();
        let bound = model.add_block(
            "BSBound",
            Record::new()
                .with("Center", Vector3::new(1.0f32, 0.0, 0.0))
                .with("Dimensions", Vector3::new(2.0f32, 2.0, 1.0)),
        );
        let data = model.add_block(
            "BSMultiBoundAABB",
            Record::new()
                .with("Position", Vector3::new(0.0f32, 5.0, 0.0))
                .with("Extent", Vector3::new(1.0f32, 1.0, 1.0)),
        );
        let multi = model.add_block("BSMultiBound", Record::new().with("Data", Value::link(data)));
        let node = model.add_block(
            "NiNode",
            Record::new()
                .with("Has Bounding Box", true)
                .with(
                    "Bounding Box",
                    Record::new()
                        .with("Translation", Vector3::new(0.0f32, 0.0, 3.0))
                        .with("Radius", Vector3::new(1.0f32, 1.0, 1.0)),
                )
                .with("Extra Data List", Value::links(&[bound]))
                .with("Multi Bound", Value::link(multi)),
        );

        let attachments = NodeAttachments::read(&model, model.block(node).expect("node block"));

        let bbox = attachments.bounding_box.expect("bounding box");
        assert_eq!(bbox.translation, Vector3::new(0.0, 0.0, 3.0));
        assert_eq!(attachments.bs_bounds.len(), 1);
        assert_eq!(attachments.bs_bounds[0].dimensions, Vector3::new(2.0, 2.0, 1.0));

        let multi_bound = attachments.multi_bound.expect("multi bound");
        let (t, half) = multi_bound.box_transform();
        assert_eq!(t.translation, Vector3::new(0.0, 5.0, 0.0));
        assert_eq!(half, Vector3::new(1.0, 1.0, 1.0));

        assert!(attachments.depends_on(bound));
        assert!(attachments.depends_on(data));
        assert!(!attachments.depends_on(node));
    }

    #[test]
    fn test_read_collision_body_scale() {
        let mut model = MemoryModel::new();
        model.set_user_version(12);
        let body = model.add_block(
            "bhkRigidBodyT",
            Record::new()
                .with("Translation", Value::Vec4([1.0, 0.0, 0.0, 0.0]))
                .with("Layer", 9),
        );
        let object = model.add_block("bhkCollisionObject", Record::new().with("Body", Value::link(body)));
        let node = model.add_block("NiNode", Record::new().with("Collision Object", Value::link(object)));

        let attachments = NodeAttachments::read(&model, model.block(node).expect("node block"));
        let collision = attachments.collision.expect("collision body");

        assert_eq!(collision.body, body);
        assert_eq!(collision.layer, 1);
        assert_eq!(collision.local.scale, 7.0);
        assert!((collision.local.translation.magnitude() - 70.0).abs() < 1e-4);
    }

    #[test]
    fn test_plain_rigid_body_ignores_translation() {
        let mut model = MemoryModel::new();
        let body = model.add_block("bhkRigidBody", Record::new().with("Translation", Value::Vec4([1.0, 2.0, 3.0, 0.0])));
        let object = model.add_block("bhkCollisionObject", Record::new().with("Body", Value::link(body)));
        let node = model.add_block("NiNode", Record::new().with("Collision Object", Value::link(object)));

        let attachments = NodeAttachments::read(&model, model.block(node).expect("node block"));
        let collision = attachments.collision.expect("collision body");
        assert_eq!(collision.local.translation, Vector3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_furniture_position_default_is_zeroed() {
        let position = FurniturePosition::default();
        assert_eq!(position.offset, Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(position.orientation, 0);
        assert_eq!((position.position_ref1, position.position_ref2), (0, 0));
        assert_eq!(position.entry_properties, 0);
    }

    #[test]
    fn test_read_furniture_positions() {
        let mut model = MemoryModel::new();
        let marker = model.add_block(
            "BSFurnitureMarker",
            Record::new().with(
                "Positions",
                vec![Record::new()
                    .with("Offset", Vector3::new(0.0f32, 10.0, 0.0))
                    .with("Orientation", 1571)
                    .with("Position Ref 1", 11)
                    .with("Position Ref 2", 11)],
            ),
        );
        let node = model.add_block("NiNode", Record::new().with("Extra Data List", Value::links(&[marker])));

        let attachments = NodeAttachments::read(&model, model.block(node).expect("node block"));
        assert_eq!(attachments.furniture.len(), 1);
        let position = attachments.furniture[0].positions[0];
        assert_eq!(position.orientation, 1571);
        assert_eq!(position.position_ref1, 11);
    }
}
