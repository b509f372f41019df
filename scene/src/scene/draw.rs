//! Draw traversals. Primitives are submitted to a [`DrawBackend`] in view
//! space; the core decides what is drawn, where, and in which style.

use cgmath::Vector3;

use super::attachment::{CollisionBody, FurniturePosition};
use super::node::{Node, NodeId};
use super::Scene;
use crate::common::{RgbaColor, Transform};
use crate::config::SceneOptions;
use crate::model::BlockId;

/// Whether a draw produces visible output or selection ids for hit-testing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RenderMode {
    #[default]
    Normal,
    Selecting,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawColor {
    Rgba(RgbaColor),
    /// Opaque id encoded by the backend for hit-testing.
    Selection(u32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawStyle {
    pub color: DrawColor,
    pub line_width: f32,
    pub point_size: f32,
}

impl DrawStyle {
    pub fn new(color: DrawColor, line_width: f32) -> Self {
        Self {
            color,
            line_width,
            point_size: 1.0,
        }
    }
}

/// Furniture marker meshes known to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FurnitureMarker {
    Marker01,
    Marker03,
    Marker04,
    Marker11,
    Marker13,
    Marker14,
    ChairFront,
    ChairBehind,
    ChairLeft,
    BedLeft,
}

/// One marker placement decoded from a furniture position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerPlacement {
    pub marker: FurnitureMarker,
    /// Placement relative to the owning node.
    pub transform: Transform,
    /// Per-axis mirror applied after `transform`.
    pub flip: Vector3<f32>,
}

/// Collision layer colors, indexed by `Layer & 7`.
pub const LAYER_COLORS: [RgbaColor; 8] = [
    RgbaColor::rgb(0.0, 1.0, 0.0),
    RgbaColor::rgb(1.0, 0.0, 0.0),
    RgbaColor::rgb(1.0, 0.0, 1.0),
    RgbaColor::rgb(1.0, 1.0, 1.0),
    RgbaColor::rgb(0.5, 0.5, 1.0),
    RgbaColor::rgb(1.0, 0.8, 0.0),
    RgbaColor::rgb(1.0, 0.8, 0.4),
    RgbaColor::rgb(0.0, 1.0, 1.0),
];

const POINT_SIZE: f32 = 8.5;
const SELECTING_LINE_WIDTH: f32 = 5.0;
const LINE_WIDTH: f32 = 2.5;
const SIT_SLEEP_Z_OFFSET: f32 = -34.0;

/// Rendering backend driven by the draw traversals.
pub trait DrawBackend {
    fn draw_point(&mut self, point: Vector3<f32>, style: &DrawStyle);

    fn draw_line(&mut self, a: Vector3<f32>, b: Vector3<f32>, style: &DrawStyle);

    /// Box spanning corners `a` and `b`, placed by `transform`.
    fn draw_box(&mut self, transform: &Transform, a: Vector3<f32>, b: Vector3<f32>, style: &DrawStyle);

    fn draw_axes(&mut self, transform: &Transform, center: Vector3<f32>, size: f32, style: &DrawStyle);

    /// Physics shape `shape` of a collision body placed by `transform`.
    fn draw_collision_shape(&mut self, transform: &Transform, body: &CollisionBody, shape: BlockId, style: &DrawStyle);

    /// Constraint block `constraint`. Body placements are available through
    /// [`Scene::rigid_body_transform`].
    fn draw_constraint(&mut self, scene: &Scene, constraint: BlockId, mode: RenderMode);

    fn draw_marker(&mut self, placement: &MarkerPlacement, transform: &Transform, style: &DrawStyle);

    /// Geometry of a shape node with its view transform.
    fn draw_shape(&mut self, node: &Node, transform: &Transform, mode: RenderMode);
}

/// Decodes the markers of one furniture position.
///
/// A zero `Position Ref 1` uses the newer animation-type/entry layout.
/// Otherwise both references must agree; unknown references produce nothing.
pub fn furniture_markers(position: &FurniturePosition) -> Vec<MarkerPlacement> {
    let pos = Vector3::new(1.0, 1.0, 1.0);
    let neg = Vector3::new(-1.0, 1.0, 1.0);

    let mut markers: Vec<(FurnitureMarker, Vector3<f32>)> = Vec::new();
    let mut z_offset = 0.0;
    let roll;

    if position.position_ref1 == 0 {
        let entry = position.entry_properties;
        match position.animation_type {
            // Sit
            1 => {
                z_offset = SIT_SLEEP_Z_OFFSET;
                if entry & 0x1 != 0 {
                    markers.push((FurnitureMarker::ChairFront, pos));
                }
                if entry & 0x2 != 0 {
                    markers.push((FurnitureMarker::ChairBehind, pos));
                }
                if entry & 0x4 != 0 {
                    markers.push((FurnitureMarker::ChairLeft, neg));
                }
                if entry & 0x8 != 0 {
                    markers.push((FurnitureMarker::ChairLeft, pos));
                }
            }
            // Sleep
            2 => {
                z_offset = SIT_SLEEP_Z_OFFSET;
                if entry & 0x4 != 0 {
                    markers.push((FurnitureMarker::BedLeft, neg));
                }
                if entry & 0x8 != 0 {
                    markers.push((FurnitureMarker::BedLeft, pos));
                }
                if entry & 0x10 != 0 {
                    markers.push((FurnitureMarker::BedLeft, neg));
                }
            }
            _ => {}
        }
        roll = position.heading;
    } else {
        if position.position_ref1 != position.position_ref2 {
            log::debug!(
                "Furniture position refs differ ({} != {})",
                position.position_ref1,
                position.position_ref2
            );
            return Vec::new();
        }

        let marker = match position.position_ref1 {
            1 => (FurnitureMarker::Marker01, pos),
            2 => (FurnitureMarker::Marker01, neg),
            3 => (FurnitureMarker::Marker03, pos),
            4 => (FurnitureMarker::Marker04, pos),
            11 => (FurnitureMarker::Marker11, pos),
            12 => (FurnitureMarker::Marker11, neg),
            13 => (FurnitureMarker::Marker13, pos),
            14 => (FurnitureMarker::Marker14, pos),
            other => {
                log::warn!("Unknown furniture marker {}", other);
                return Vec::new();
            }
        };
        markers.push(marker);

        // Orientation is in milliradians.
        roll = -(position.orientation as f32) / 1000.0;
    }

    let transform = Transform::new(
        position.offset + Vector3::new(0.0, 0.0, z_offset),
        Transform::euler_rotation(0.0, 0.0, roll),
        1.0,
    );
    markers
        .into_iter()
        .map(|(marker, flip)| MarkerPlacement { marker, transform, flip })
        .collect()
}

/// Selection id of a furniture position: block in the low half, row in the high half.
pub fn furniture_selection_id(block: BlockId, row: usize) -> u32 {
    (block & 0xffff) | (((row as u32) & 0xffff) << 16)
}

impl Scene {
    fn pick_color(&self, mode: RenderMode, id: u32, color: RgbaColor) -> DrawColor {
        match mode {
            RenderMode::Selecting => DrawColor::Selection(id),
            RenderMode::Normal => DrawColor::Rgba(color),
        }
    }

    /// Point at each visible node's origin and a line to its parent.
    pub fn draw_nodes(&self, backend: &mut dyn DrawBackend, mode: RenderMode) {
        if !self.options.contains(SceneOptions::SHOW_NODES) {
            return;
        }
        for root in self.roots.iter() {
            self.draw_node(backend, mode, root);
        }
    }

    fn draw_node(&self, backend: &mut dyn DrawBackend, mode: RenderMode, id: NodeId) {
        if self.is_hidden(id) {
            return;
        }
        let Some(node) = self.get_node(id) else {
            return;
        };

        let style = DrawStyle {
            color: self.pick_color(mode, node.node_id(), self.config.normal_color),
            line_width: match mode {
                RenderMode::Selecting => SELECTING_LINE_WIDTH,
                RenderMode::Normal => LINE_WIDTH,
            },
            point_size: POINT_SIZE,
        };
        self.draw_origin(backend, id, &style);

        for &child in node.children() {
            self.draw_node(backend, mode, child);
        }
    }

    fn draw_origin(&self, backend: &mut dyn DrawBackend, id: NodeId, style: &DrawStyle) {
        let a = self.view_trans(id).translation;
        let b = self
            .get_node(id)
            .and_then(|n| n.parent())
            .filter(|&p| self.get_node(p).is_some())
            .map(|p| self.view_trans(p).translation)
            .unwrap_or(a);

        backend.draw_point(a, style);
        backend.draw_line(a, b, style);
    }

    /// Highlights the node of the current block when node drawing is off.
    pub fn draw_selection(&self, backend: &mut dyn DrawBackend, mode: RenderMode) {
        if self.options.contains(SceneOptions::SHOW_NODES) {
            return;
        }
        let Some(id) = self.current.and_then(|block| self.node_for_block(block)) else {
            return;
        };
        let Some(node) = self.get_node(id) else {
            return;
        };

        let style = DrawStyle {
            color: self.pick_color(mode, node.node_id(), self.config.highlight_color),
            line_width: match mode {
                RenderMode::Selecting => SELECTING_LINE_WIDTH,
                RenderMode::Normal => LINE_WIDTH,
            },
            point_size: POINT_SIZE,
        };
        self.draw_origin(backend, id, &style);
    }

    /// Shape nodes of visible subtrees, in draw order.
    ///
    /// Opaque shapes are drawn during traversal. Alpha-blended shapes are
    /// collected, sorted and drawn afterwards.
    pub fn draw_shapes(&self, backend: &mut dyn DrawBackend, mode: RenderMode) {
        let mut second_pass = Vec::new();
        for root in self.roots.iter() {
            self.draw_shape_tree(backend, mode, root, &mut second_pass);
        }

        self.sort_draw_order(&mut second_pass);
        for id in second_pass {
            if let Some(node) = self.get_node(id) {
                backend.draw_shape(node, &self.view_trans(id), mode);
            }
        }
    }

    fn draw_shape_tree(&self, backend: &mut dyn DrawBackend, mode: RenderMode, id: NodeId, second_pass: &mut Vec<NodeId>) {
        if self.is_hidden(id) {
            return;
        }
        let Some(node) = self.get_node(id) else {
            return;
        };

        if node.is_shape() {
            if self.has_alpha(id) {
                second_pass.push(id);
            } else {
                backend.draw_shape(node, &self.view_trans(id), mode);
            }
        }

        for &child in node.children() {
            self.draw_shape_tree(backend, mode, child, second_pass);
        }
    }

    /// Bounding volumes, collision bodies and constraints of every node.
    pub fn draw_collision(&self, backend: &mut dyn DrawBackend, mode: RenderMode) {
        if !self.options.contains(SceneOptions::SHOW_COLLISION) {
            return;
        }
        for root in self.roots.iter() {
            self.draw_node_collision(backend, mode, root);
        }
    }

    fn draw_node_collision(&self, backend: &mut dyn DrawBackend, mode: RenderMode, id: NodeId) {
        let Some(node) = self.get_node(id) else {
            return;
        };
        for &child in node.children() {
            self.draw_node_collision(backend, mode, child);
        }

        let attachments = node.attachments();
        let view = self.view();

        // The old-style box ignores the node transform.
        if let Some(bbox) = &attachments.bounding_box {
            let style = DrawStyle::new(self.pick_color(mode, node.node_id(), RgbaColor::RED), 1.0);
            backend.draw_box(&(view * bbox.transform()), bbox.radius, -bbox.radius, &style);
        }

        if let Some(multi) = &attachments.multi_bound {
            let (placement, half) = multi.box_transform();
            let style = match mode {
                RenderMode::Selecting => DrawStyle::new(DrawColor::Selection(multi.data), SELECTING_LINE_WIDTH),
                RenderMode::Normal => DrawStyle::new(DrawColor::Rgba(RgbaColor::WHITE.with_alpha(0.6)), 1.0),
            };
            backend.draw_box(&(self.view_trans(id) * placement), half, -half, &style);
        }

        for bound in &attachments.bs_bounds {
            let style = DrawStyle::new(self.pick_color(mode, bound.block, RgbaColor::RED), 1.0);
            backend.draw_box(
                &self.view_trans(id),
                bound.dimensions + bound.center,
                -bound.dimensions + bound.center,
                &style,
            );
        }

        let Some(body) = &attachments.collision else {
            return;
        };
        let placement = view * self.rigid_body_transform(body.body).unwrap_or_else(|| self.world_trans(id) * body.local);

        let highlighted = mode == RenderMode::Normal && body.shape.is_some() && self.current == body.shape;
        let shape_style = match mode {
            RenderMode::Selecting => DrawStyle {
                color: DrawColor::Selection(body.body),
                line_width: SELECTING_LINE_WIDTH,
                point_size: 4.5,
            },
            RenderMode::Normal if highlighted => DrawStyle {
                color: DrawColor::Rgba(self.config.highlight_color),
                line_width: LINE_WIDTH,
                point_size: 4.5,
            },
            RenderMode::Normal => DrawStyle {
                color: DrawColor::Rgba(LAYER_COLORS[body.layer as usize & 7]),
                line_width: 1.0,
                point_size: 4.5,
            },
        };
        if let Some(shape) = body.shape {
            backend.draw_collision_shape(&placement, body, shape, &shape_style);
        }

        let axes_style = DrawStyle::new(self.pick_color(mode, body.body, LAYER_COLORS[body.layer as usize & 7]), 1.0);
        backend.draw_axes(&placement, body.center, 2.0, &axes_style);

        if self.options.contains(SceneOptions::SHOW_CONSTRAINTS) {
            for &constraint in &body.constraints {
                backend.draw_constraint(self, constraint, mode);
            }
        }
    }

    /// Furniture markers of every node.
    pub fn draw_furniture(&self, backend: &mut dyn DrawBackend, mode: RenderMode) {
        if !self.options.contains(SceneOptions::SHOW_MARKERS) {
            return;
        }
        for root in self.roots.iter() {
            self.draw_node_furniture(backend, mode, root);
        }
    }

    fn draw_node_furniture(&self, backend: &mut dyn DrawBackend, mode: RenderMode, id: NodeId) {
        let Some(node) = self.get_node(id) else {
            return;
        };
        for &child in node.children() {
            self.draw_node_furniture(backend, mode, child);
        }

        let view = self.view_trans(id);
        for furniture in &node.attachments().furniture {
            for (row, position) in furniture.positions.iter().enumerate() {
                let current = self.current == Some(furniture.block) && self.current_row == Some(row);
                let color = match mode {
                    RenderMode::Selecting => DrawColor::Selection(furniture_selection_id(furniture.block, row)),
                    RenderMode::Normal if current => DrawColor::Rgba(self.config.highlight_color),
                    RenderMode::Normal => DrawColor::Rgba(self.config.normal_color),
                };
                let style = DrawStyle::new(color, 1.0);

                for placement in furniture_markers(position) {
                    backend.draw_marker(&placement, &(view * placement.transform), &style);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::EPSILON;

    fn marker_position(ref1: u8, ref2: u8, orientation: u16) -> FurniturePosition {
        FurniturePosition {
            offset: Vector3::new(0.0, 10.0, 0.0),
            orientation,
            position_ref1: ref1,
            position_ref2: ref2,
            ..FurniturePosition::default()
        }
    }

    // ========================================================================
    // Furniture Marker Tests
    // ========================================================================

    #[test]
    fn test_marker_refs() {
        let markers = furniture_markers(&marker_position(12, 12, 0));
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].marker, FurnitureMarker::Marker11);
        assert_eq!(markers[0].flip, Vector3::new(-1.0, 1.0, 1.0));

        let markers = furniture_markers(&marker_position(13, 13, 0));
        assert_eq!(markers[0].marker, FurnitureMarker::Marker13);
        assert_eq!(markers[0].flip, Vector3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_marker_refs_must_agree() {
        assert!(furniture_markers(&marker_position(1, 2, 0)).is_empty());
    }

    #[test]
    fn test_unknown_marker_skipped() {
        assert!(furniture_markers(&marker_position(7, 7, 0)).is_empty());
    }

    #[test]
    fn test_marker_roll_from_milliradians() {
        let markers = furniture_markers(&marker_position(1, 1, 1571));
        let (_, _, z) = markers[0].transform.euler_angles();
        assert!(
            (z - -1.571).abs() < 1e-3,
            "Expected roll of -1.571 rad, got {}",
            z
        );
        assert!((markers[0].transform.translation.y - 10.0).abs() < EPSILON);
    }

    #[test]
    fn test_sit_entries() {
        let position = FurniturePosition {
            animation_type: 1,
            entry_properties: 0x1 | 0x4,
            heading: 0.5,
            ..FurniturePosition::default()
        };
        let markers = furniture_markers(&position);

        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].marker, FurnitureMarker::ChairFront);
        assert_eq!(markers[1].marker, FurnitureMarker::ChairLeft);
        assert_eq!(markers[1].flip.x, -1.0);
        assert!((markers[0].transform.translation.z - -34.0).abs() < EPSILON);
    }

    #[test]
    fn test_sleep_entries() {
        let position = FurniturePosition {
            animation_type: 2,
            entry_properties: 0x1 | 0x8 | 0x10,
            ..FurniturePosition::default()
        };
        let markers: Vec<FurnitureMarker> = furniture_markers(&position).iter().map(|m| m.marker).collect();
        assert_eq!(markers, vec![FurnitureMarker::BedLeft, FurnitureMarker::BedLeft]);
    }

    #[test]
    fn test_no_animation_type_draws_nothing() {
        let position = FurniturePosition {
            entry_properties: 0xff,
            ..FurniturePosition::default()
        };
        assert!(furniture_markers(&position).is_empty());
    }

    #[test]
    fn test_selection_id() {
        assert_eq!(furniture_selection_id(0x1_0005, 3), 0x0003_0005);
    }
}
