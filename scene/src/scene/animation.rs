//! Animation sequences and the per-frame transform pass.

use std::collections::BTreeMap;

use cgmath::InnerSpace;

use super::controller::ControllerRef;
use super::node::{NodeFlags, NodeId, NodeKind};
use super::Scene;
use crate::model::{Block, BlockModel, Record};

/// String of a controlled-block row, falling back to the sequence's string
/// palette at `<field> Offset` when the inline string is empty.
fn controlled_string<M: BlockModel + ?Sized>(model: &M, sequence: &Block, row: &Record, field: &str) -> String {
    let inline = row.string(field);
    if !inline.is_empty() {
        return inline.to_string();
    }

    let offset_field = format!("{} Offset", field);
    let offset = row.int(&offset_field);
    if !row.has(&offset_field) || offset < 0 {
        return String::new();
    }
    let palette = match model.block_of_type(sequence.link("String Palette"), "NiStringPalette") {
        Some(block) => match block.record("Palette") {
            Some(record) => record.string("Palette"),
            None => block.string("Palette"),
        },
        None => return String::new(),
    };

    palette
        .get(offset as usize..)
        .and_then(|tail| tail.split('\0').next())
        .unwrap_or_default()
        .to_string()
}

/// Timing copied from a sequence onto the controllers it drives.
#[derive(Debug, Clone, Copy)]
struct SequenceTiming {
    start: f32,
    stop: f32,
    phase: f32,
    frequency: f32,
}

impl Scene {
    /// Registers the sequences of a controller manager block.
    ///
    /// Each sequence name is registered once, together with its text key tags.
    pub(crate) fn register_sequences<M: BlockModel + ?Sized>(&mut self, model: &M, manager: &Block) {
        for sequence in model.link_blocks(manager, "Controller Sequences", "NiControllerSequence") {
            let name = sequence.string("Name");
            if self.anim_groups.iter().any(|g| g == name) {
                continue;
            }
            self.anim_groups.push(name.to_string());

            let tags = self.anim_tags.entry(name.to_string()).or_insert_with(BTreeMap::new);
            if let Some(keys) = model.block_of_type(sequence.link("Text Keys"), "NiTextKeyExtraData") {
                for row in keys.rows("Text Keys") {
                    tags.insert(row.string("Value").to_string(), row.float("Time"));
                }
            }
        }
    }

    /// Binds every controller manager to sequence `name`.
    ///
    /// Controlled blocks whose node or controller cannot be found are skipped.
    pub fn set_sequence<M: BlockModel + ?Sized>(&mut self, model: &M, name: &str) {
        self.current_sequence = Some(name.to_string());

        let managers: Vec<(NodeId, usize)> = self
            .nodes
            .iter()
            .filter_map(|id| self.arena.get(id).map(|n| (id, n)))
            .flat_map(|(id, node)| {
                node.controllers()
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.is_manager())
                    .map(move |(i, _)| (id, i))
            })
            .collect();

        for (owner, index) in managers {
            self.apply_sequence(model, owner, index, name);
        }
    }

    fn apply_sequence<M: BlockModel + ?Sized>(&mut self, model: &M, owner: NodeId, index: usize, name: &str) {
        let Some(node) = self.arena.get(owner) else {
            return;
        };
        let Some(manager) = node.controllers().get(index).and_then(|c| model.block(c.block())) else {
            return;
        };
        let multi = node.controllers().iter().position(|c| c.is_multi_target());

        for sequence in model.link_blocks(manager, "Controller Sequences", "NiControllerSequence") {
            if sequence.string("Name") != name {
                continue;
            }

            let timing = SequenceTiming {
                start: sequence.float("Start Time"),
                stop: sequence.float("Stop Time"),
                phase: sequence.float("Phase"),
                frequency: sequence.float("Frequency"),
            };
            if let Some(manager) = self.controller_mut(ControllerRef::Node { node: owner, index }) {
                manager
                    .timing
                    .set_interval(timing.start, timing.stop, timing.phase, timing.frequency);
            }

            for row in sequence.rows("Controlled Blocks") {
                self.apply_controlled_block(model, owner, multi, sequence, row, timing);
            }
        }
    }

    fn apply_controlled_block<M: BlockModel + ?Sized>(
        &mut self,
        model: &M,
        owner: NodeId,
        multi: Option<usize>,
        sequence: &Block,
        row: &Record,
        timing: SequenceTiming,
    ) {
        let interpolator = model.block_of_type(row.link("Interpolator"), "NiInterpolator");
        let node_name = controlled_string(model, sequence, row, "Node Name");
        let property_type = controlled_string(model, sequence, row, "Property Type");
        let controller_type = controlled_string(model, sequence, row, "Controller Type");
        let var1 = controlled_string(model, sequence, row, "Variable 1");
        let var2 = controlled_string(model, sequence, row, "Variable 2");

        let Some(target) = self.find_child_by_name(owner, &node_name) else {
            log::debug!("Controlled block skipped: no node named '{}'", node_name);
            return;
        };

        if controller_type == "NiTransformController" {
            if let Some(index) = multi {
                if let Some(ctrl) = self.controller_mut(ControllerRef::Node { node: owner, index }) {
                    if ctrl.set_target_interpolator(model, target, interpolator) {
                        ctrl.timing
                            .set_interval(timing.start, timing.stop, timing.phase, timing.frequency);
                        return;
                    }
                }
            }
        }

        let found = self.find_controller(target, &property_type, &controller_type, &var1, &var2);
        match found.and_then(|at| self.controller_mut(at)) {
            Some(ctrl) => {
                ctrl.timing
                    .set_interval(timing.start, timing.stop, timing.phase, timing.frequency);
                ctrl.set_interpolator(model, interpolator);
            }
            None => log::debug!(
                "Controlled block skipped: no {} on '{}' ({})",
                controller_type,
                node_name,
                property_type
            ),
        }
    }

    /// Runs the transform pass: controllers, collision body placement and LOD
    /// switching, depth first from the roots.
    ///
    /// Memoized transforms are dropped first.
    pub fn transform(&mut self) {
        self.context.clear();
        self.rigid_bodies.clear();

        for root in self.roots.iter().collect::<Vec<_>>() {
            self.transform_node(root);
        }
    }

    fn transform_node(&mut self, id: NodeId) {
        if self.config.animate {
            let time = self.context.time;
            let Some(node) = self.arena.get_mut(id) else {
                return;
            };
            let mut controllers = std::mem::take(&mut node.controllers);
            for ctrl in controllers.iter_mut() {
                ctrl.update_time(time, &mut self.arena);
            }
            if let Some(node) = self.arena.get_mut(id) {
                node.controllers = controllers;
            }
        }

        let Some(node) = self.arena.get(id) else {
            return;
        };
        if let Some(body) = node.attachments().collision.as_ref() {
            let world = self.world_trans(id) * body.local;
            self.rigid_bodies.insert(body.body, world);
        }

        let children = node.children().to_vec();
        for &child in &children {
            self.transform_node(child);
        }

        self.apply_lod(id, &children);
    }

    /// Shows the child whose range contains the view distance to the LOD
    /// center and hides the others.
    fn apply_lod(&mut self, id: NodeId, children: &[NodeId]) {
        let Some(NodeKind::Lod { center, ranges, .. }) = self.arena.get(id).map(|n| n.kind()) else {
            return;
        };
        if children.is_empty() {
            return;
        }

        let visible: Vec<bool> = if ranges.is_empty() {
            (0..children.len()).map(|i| i == 0).collect()
        } else {
            let distance = (self.view_trans(id) * *center).magnitude();
            (0..children.len())
                .map(|i| ranges.get(i).is_some_and(|r| r.contains(distance)))
                .collect()
        };

        for (&child, visible) in children.iter().zip(visible) {
            if let Some(node) = self.arena.get_mut(child) {
                node.flags.set(NodeFlags::HIDDEN, !visible);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemoryModel, Value};

    #[test]
    fn test_controlled_string_inline() {
        let sequence = Block::new(0, "NiControllerSequence", Record::new());
        let row = Record::new().with("Node Name", "Bip01");
        let model = MemoryModel::new();

        assert_eq!(controlled_string(&model, &sequence, &row, "Node Name"), "Bip01");
        assert_eq!(controlled_string(&model, &sequence, &row, "Variable 1"), "");
    }

    #[test]
    fn test_controlled_string_palette() {
        let mut model = MemoryModel::new();
        let palette = model.add_block(
            "NiStringPalette",
            Record::new().with("Palette", Record::new().with("Palette", "Root\0Bip01 Head\0")),
        );
        let sequence = model.add_block(
            "NiControllerSequence",
            Record::new().with("String Palette", Value::link(palette)),
        );
        let row = Record::new().with("Node Name Offset", 5).with("Controller Type Offset", -1);
        let sequence = model.block(sequence).unwrap();

        assert_eq!(controlled_string(&model, sequence, &row, "Node Name"), "Bip01 Head");
        assert_eq!(controlled_string(&model, sequence, &row, "Controller Type"), "");
    }
}
