//! Time-driven controllers that animate node transforms and visibility.

pub mod interpolator;
pub mod keys;

use std::collections::HashSet;

use self::interpolator::{create_transform_interpolator, KeyedTransformInterpolator, TransformInterpolator};
use self::keys::{BoolChannel, TransformTracks};
use super::node::{NodeFlags, NodeId};
use super::node_list::NodeArena;
use super::property::PropertyId;
use crate::model::{Block, BlockId, BlockModel, Record};

/// How controller time behaves outside the `[start, stop]` interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extrapolation {
    /// Wrap around (loop).
    #[default]
    Cyclic,
    /// Play forwards and backwards alternately.
    Reverse,
    /// Hold the first/last value.
    Constant,
}

impl Extrapolation {
    /// Decodes the extrapolation bits of controller flags.
    pub fn from_flags(flags: i64) -> Extrapolation {
        match (flags & 0x06) >> 1 {
            0 => Extrapolation::Cyclic,
            1 => Extrapolation::Reverse,
            _ => Extrapolation::Constant,
        }
    }
}

/// Flag bit enabling a controller.
const CONTROLLER_ACTIVE: i64 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerTiming {
    pub active: bool,
    pub start: f32,
    pub stop: f32,
    pub phase: f32,
    pub frequency: f32,
    pub extrapolation: Extrapolation,
}

impl Default for ControllerTiming {
    fn default() -> Self {
        Self {
            active: false,
            start: 0.0,
            stop: 0.0,
            phase: 0.0,
            frequency: 1.0,
            extrapolation: Extrapolation::Cyclic,
        }
    }
}

impl ControllerTiming {
    pub fn from_record(record: &Record) -> Self {
        let flags = record.int("Flags");
        Self {
            active: flags & CONTROLLER_ACTIVE != 0,
            start: record.float("Start Time"),
            stop: record.float("Stop Time"),
            phase: record.float("Phase"),
            frequency: record.float("Frequency"),
            extrapolation: Extrapolation::from_flags(flags),
        }
    }

    /// Copies the interval and rate of an animation sequence, keeping `active`
    /// and the extrapolation policy.
    pub fn set_interval(&mut self, start: f32, stop: f32, phase: f32, frequency: f32) {
        self.start = start;
        self.stop = stop;
        self.phase = phase;
        self.frequency = frequency;
    }

    /// Maps scene time to controller-local time.
    pub fn ctrl_time(&self, time: f32) -> f32 {
        let time = (time - self.phase) * self.frequency;

        if time >= self.start && time <= self.stop {
            return time;
        }

        match self.extrapolation {
            Extrapolation::Cyclic | Extrapolation::Reverse => {
                let delta = self.stop - self.start;
                if delta <= 0.0 {
                    return self.start;
                }

                let x = (time - self.start) / delta;
                let y = (x - x.floor()) * delta;

                if self.extrapolation == Extrapolation::Cyclic || (x.floor().abs() as i64) & 1 == 0 {
                    self.start + y
                } else {
                    self.stop - y
                }
            }
            Extrapolation::Constant => time.clamp(self.start, self.start.max(self.stop)),
        }
    }
}

/// One node driven by a multi-target transform controller.
#[derive(Debug)]
pub struct TransformTarget {
    pub node: NodeId,
    pub interpolator: Option<Box<dyn TransformInterpolator>>,
}

#[derive(Debug)]
pub enum ControllerKind {
    Transform {
        interpolator: Option<Box<dyn TransformInterpolator>>,
    },
    MultiTargetTransform {
        targets: Vec<TransformTarget>,
    },
    /// Dispatches animation sequences; does not animate by itself.
    Manager,
    Keyframe {
        tracks: TransformTracks,
    },
    Visibility {
        channel: BoolChannel,
    },
}

impl ControllerKind {
    /// The variant for a controller block type, `None` for unsupported types.
    pub fn for_type(type_name: &str) -> Option<ControllerKind> {
        let kind = match type_name {
            "NiTransformController" => ControllerKind::Transform { interpolator: None },
            "NiMultiTargetTransformController" => ControllerKind::MultiTargetTransform { targets: Vec::new() },
            "NiControllerManager" => ControllerKind::Manager,
            "NiKeyframeController" => ControllerKind::Keyframe {
                tracks: TransformTracks::default(),
            },
            "NiVisController" => ControllerKind::Visibility {
                channel: BoolChannel::default(),
            },
            _ => return None,
        };
        Some(kind)
    }
}

/// Addresses a controller by its owner and position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerRef {
    Node { node: NodeId, index: usize },
    Property { property: PropertyId, index: usize },
}

#[derive(Debug)]
pub struct Controller {
    block: BlockId,
    type_name: String,
    pub timing: ControllerTiming,
    target: Option<NodeId>,
    interpolator_block: Option<BlockId>,
    data_block: Option<BlockId>,
    kind: ControllerKind,
}

impl Controller {
    /// Creates an unsynchronized controller for a block of a supported type.
    ///
    /// `target` is the node the controller animates; controllers attached to
    /// properties have none and stay inert.
    pub fn new(block: &Block, target: Option<NodeId>) -> Option<Controller> {
        let kind = ControllerKind::for_type(&block.type_name)?;
        Some(Controller {
            block: block.id,
            type_name: block.type_name.clone(),
            timing: ControllerTiming::default(),
            target,
            interpolator_block: None,
            data_block: None,
            kind,
        })
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn target(&self) -> Option<NodeId> {
        self.target
    }

    pub fn kind(&self) -> &ControllerKind {
        &self.kind
    }

    pub fn is_manager(&self) -> bool {
        matches!(self.kind, ControllerKind::Manager)
    }

    pub fn is_multi_target(&self) -> bool {
        matches!(self.kind, ControllerKind::MultiTargetTransform { .. })
    }

    pub fn interpolator_block(&self) -> Option<BlockId> {
        self.interpolator_block
    }

    pub fn set_active(&mut self, active: bool) {
        self.timing.active = active;
    }

    /// Nodes animated by a multi-target controller.
    pub fn extra_targets(&self) -> Vec<NodeId> {
        match &self.kind {
            ControllerKind::MultiTargetTransform { targets } => targets.iter().map(|t| t.node).collect(),
            _ => Vec::new(),
        }
    }

    /// Re-reads state from the model.
    ///
    /// Timing and data are reloaded when `changed` is this controller's own
    /// block; a change to its interpolator or data block reloads only those.
    /// Returns `true` on a self-match, after which the owner resolves extra
    /// targets and registers sequences.
    pub fn update<M: BlockModel + ?Sized>(&mut self, model: &M, changed: Option<BlockId>) -> bool {
        let Some(block) = model.block(self.block) else {
            return false;
        };

        if changed == Some(self.block) {
            self.timing = ControllerTiming::from_record(block);
            self.data_block = None;
            self.interpolator_block = None;

            match model.block_of_type(block.link("Interpolator"), "NiInterpolator") {
                Some(interpolator) => self.set_interpolator(model, Some(interpolator)),
                None => {
                    self.data_block = block.link("Data");
                    self.load_data(model);
                }
            }
            return true;
        }

        let Some(changed) = changed else {
            return false;
        };

        if self.interpolator_block == Some(changed) {
            let interpolator = model.block(changed);
            self.set_interpolator(model, interpolator);
        } else if self.data_block == Some(changed) {
            self.load_data(model);
        } else if let ControllerKind::MultiTargetTransform { targets } = &mut self.kind {
            for target in targets.iter_mut() {
                let stale = target.interpolator.as_ref().is_some_and(|i| i.depends_on(changed));
                if stale {
                    let block = target.interpolator.as_ref().map(|i| i.block());
                    target.interpolator = block
                        .and_then(|b| model.block(b))
                        .and_then(|b| create_transform_interpolator(model, b));
                }
            }
        } else if let ControllerKind::Transform { interpolator: Some(interpolator) } = &self.kind {
            if interpolator.depends_on(changed) {
                let block = interpolator.block();
                if let Some(block) = model.block(block) {
                    self.kind = ControllerKind::Transform {
                        interpolator: create_transform_interpolator(model, block),
                    };
                }
            }
        }
        false
    }

    /// Reloads channel data from `data_block` for variants that read data directly.
    fn load_data<M: BlockModel + ?Sized>(&mut self, model: &M) {
        let data = self.data_block.and_then(|d| model.block(d));
        match &mut self.kind {
            ControllerKind::Transform { interpolator } => {
                *interpolator = data
                    .filter(|d| model.inherits(&d.type_name, "NiKeyframeData"))
                    .map(|d| Box::new(KeyedTransformInterpolator::from_data(d)) as Box<dyn TransformInterpolator>);
            }
            ControllerKind::Keyframe { tracks } => {
                *tracks = data.map(|d| TransformTracks::from_data(d)).unwrap_or_default();
            }
            ControllerKind::Visibility { channel } => {
                *channel = data.map(|d| BoolChannel::from_data(d)).unwrap_or_default();
            }
            ControllerKind::MultiTargetTransform { .. } | ControllerKind::Manager => {}
        }
    }

    /// Binds a new interpolator block.
    ///
    /// Transform controllers rebuild their interpolator (releasing the old
    /// one); keyframe and visibility controllers reload the interpolator's
    /// data block. `None` leaves the controller unchanged.
    pub fn set_interpolator<M: BlockModel + ?Sized>(&mut self, model: &M, interpolator: Option<&Block>) {
        let Some(interpolator) = interpolator else {
            return;
        };
        self.interpolator_block = Some(interpolator.id);

        if let ControllerKind::Transform { interpolator: current } = &mut self.kind {
            *current = create_transform_interpolator(model, interpolator);
        } else if matches!(self.kind, ControllerKind::Keyframe { .. } | ControllerKind::Visibility { .. }) {
            self.data_block = interpolator.link("Data");
            self.load_data(model);
        }
    }

    /// Replaces the set of extra targets of a multi-target controller.
    pub fn set_extra_targets(&mut self, nodes: Vec<NodeId>) {
        if let ControllerKind::MultiTargetTransform { targets } = &mut self.kind {
            *targets = nodes
                .into_iter()
                .map(|node| TransformTarget {
                    node,
                    interpolator: None,
                })
                .collect();
        }
    }

    /// Binds an interpolator to one of a multi-target controller's nodes.
    ///
    /// Returns `false` if `node` is not a current target, the interpolator is
    /// missing, or the controller is not a multi-target controller.
    pub fn set_target_interpolator<M: BlockModel + ?Sized>(
        &mut self,
        model: &M,
        node: NodeId,
        interpolator: Option<&Block>,
    ) -> bool {
        let Some(interpolator) = interpolator else {
            return false;
        };
        let ControllerKind::MultiTargetTransform { targets } = &mut self.kind else {
            return false;
        };

        match targets.iter_mut().find(|t| t.node == node) {
            Some(target) => {
                target.interpolator = create_transform_interpolator(model, interpolator);
                true
            }
            None => false,
        }
    }

    /// Advances the controller to scene time `time`, mutating its targets.
    pub fn update_time(&mut self, time: f32, nodes: &mut NodeArena) {
        if !self.timing.active {
            return;
        }
        let Some(target) = self.target.filter(|&t| nodes.contains(t)) else {
            return;
        };
        let time = self.timing.ctrl_time(time);

        match &mut self.kind {
            ControllerKind::Transform { interpolator } => {
                if let (Some(interpolator), Some(node)) = (interpolator.as_mut(), nodes.get_mut(target)) {
                    interpolator.update_transform(&mut node.local, time);
                }
            }
            ControllerKind::MultiTargetTransform { targets } => {
                for extra in targets.iter_mut() {
                    if let (Some(interpolator), Some(node)) = (extra.interpolator.as_mut(), nodes.get_mut(extra.node)) {
                        interpolator.update_transform(&mut node.local, time);
                    }
                }
            }
            ControllerKind::Keyframe { tracks } => {
                if let Some(node) = nodes.get_mut(target) {
                    tracks.apply(time, &mut node.local);
                }
            }
            ControllerKind::Visibility { channel } => {
                if let (Some(visible), Some(node)) = (channel.sample(time), nodes.get_mut(target)) {
                    node.flags.set(NodeFlags::HIDDEN, !visible);
                }
            }
            ControllerKind::Manager => {}
        }
    }

    /// Whether this controller matches a controlled-block lookup.
    pub fn matches(&self, controller_type: &str) -> bool {
        self.type_name == controller_type
    }
}

/// Finds the single controller of `controller_type` in `controllers`.
///
/// None of the supported variants animate a named variable, so `var1` and
/// `var2` cannot tell two controllers of the same type apart; such an
/// ambiguous lookup finds nothing.
pub fn find_controller(controllers: &[Controller], controller_type: &str, var1: &str, var2: &str) -> Option<usize> {
    let mut found = None;
    for (i, ctrl) in controllers.iter().enumerate() {
        if ctrl.matches(controller_type) {
            if found.is_some() {
                log::debug!(
                    "Ambiguous controller lookup for {} ({}, {})",
                    controller_type,
                    var1,
                    var2
                );
                return None;
            }
            found = Some(i);
        }
    }
    found
}

/// Start/stop interval covered by a set of controllers.
pub(crate) fn time_range<'a>(controllers: impl IntoIterator<Item = &'a Controller>) -> Option<(f32, f32)> {
    controllers.into_iter().fold(None, |range, ctrl| {
        let (start, stop) = (ctrl.timing.start, ctrl.timing.stop);
        Some(match range {
            Some((lo, hi)) => (f32::min(lo, start), f32::max(hi, stop)),
            None => (start, stop),
        })
    })
}

/// Rebuilds a controller list from the `Controller` / `Next Controller` chain
/// of `owner`.
///
/// Controllers already in `existing` are kept by block; new blocks of a
/// supported type get a fresh controller. The second value lists the indices
/// of the fresh ones, which still need their first self-update.
pub(crate) fn sync_controllers<M: BlockModel + ?Sized>(
    model: &M,
    owner: &Block,
    mut existing: Vec<Controller>,
    target: Option<NodeId>,
) -> (Vec<Controller>, Vec<usize>) {
    let mut synced = Vec::new();
    let mut fresh = Vec::new();
    let mut seen = HashSet::new();

    let mut link = owner.link("Controller");
    while let Some(block) = model.block_of_type(link, "NiTimeController") {
        if !seen.insert(block.id) {
            break;
        }
        link = block.link("Next Controller");

        if let Some(pos) = existing.iter().position(|c| c.block == block.id) {
            synced.push(existing.remove(pos));
        } else if let Some(ctrl) = Controller::new(block, target) {
            fresh.push(synced.len());
            synced.push(ctrl);
        } else {
            log::trace!("Ignoring unsupported controller {} ({})", block.id, block.type_name);
        }
    }

    (synced, fresh)
}
