//! Transform interpolators: the objects a transform controller asks for a pose.

use std::fmt::Debug;

use cgmath::{InnerSpace, Matrix3, Quaternion, Vector3};

use super::keys::TransformTracks;
use crate::common::{Transform, EPSILON};
use crate::model::{Block, BlockId, BlockModel, Record};

/// Maps a controller-local time to a pose.
pub trait TransformInterpolator: Debug {
    /// Writes the pose sampled at `time` into `target`.
    ///
    /// Channels without data are left untouched. Returns `false` if nothing was written.
    fn update_transform(&mut self, target: &mut Transform, time: f32) -> bool;

    /// The interpolator block this was built from.
    fn block(&self) -> BlockId;

    /// Blocks whose change requires rebuilding this interpolator.
    fn depends_on(&self, block: BlockId) -> bool {
        block == self.block()
    }
}

/// Builds the interpolator matching the block type, if the type is supported.
pub fn create_transform_interpolator<M: BlockModel + ?Sized>(
    model: &M,
    block: &Block,
) -> Option<Box<dyn TransformInterpolator>> {
    match block.type_name.as_str() {
        "NiBSplineCompTransformInterpolator" => Some(Box::new(BSplineTransformInterpolator::new(model, block))),
        "NiTransformInterpolator" => Some(Box::new(KeyedTransformInterpolator::new(model, block))),
        _ => None,
    }
}

/// Marker the format uses for an unset static pose component.
const UNSET_POSE: f32 = -f32::MAX;

/// The pose stored on an interpolator block itself, used for channels
/// without animation data.
///
/// Components are read from a nested `Transform` record when present and from
/// the block otherwise. Missing or unset components stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StaticPose {
    pub translation: Option<Vector3<f32>>,
    pub rotation: Option<Quaternion<f32>>,
    pub scale: Option<f32>,
}

impl StaticPose {
    pub fn read(block: &Record) -> Self {
        let record = block.record("Transform").unwrap_or(block);
        let is_set = |v: f32| v > UNSET_POSE / 2.0;

        let translation = Some(record)
            .filter(|r| r.has("Translation"))
            .map(|r| r.vec3("Translation"))
            .filter(|t| is_set(t.x) && is_set(t.y) && is_set(t.z));
        let rotation = Some(record)
            .filter(|r| r.has("Rotation"))
            .map(|r| r.quat("Rotation"))
            .filter(|q| is_set(q.s) && q.magnitude2() > EPSILON);
        let scale = Some(record)
            .filter(|r| r.has("Scale"))
            .map(|r| r.float("Scale"))
            .filter(|&s| is_set(s));

        Self { translation, rotation, scale }
    }
}

/// Samples translation, rotation and scale keys from a transform data block.
///
/// Channels without keys fall back to the static pose of the interpolator.
#[derive(Debug, Clone)]
pub struct KeyedTransformInterpolator {
    block: BlockId,
    data: Option<BlockId>,
    tracks: TransformTracks,
    pose: StaticPose,
}

impl KeyedTransformInterpolator {
    pub fn new<M: BlockModel + ?Sized>(model: &M, block: &Block) -> Self {
        let data = model.block_of_type(block.link("Data"), "NiKeyframeData");
        Self {
            block: block.id,
            data: data.map(|d| d.id),
            tracks: data.map(|d| TransformTracks::from_data(d)).unwrap_or_default(),
            pose: StaticPose::read(block),
        }
    }

    /// Uses a keyframe data block directly, for controllers without an interpolator.
    pub fn from_data(data: &Block) -> Self {
        Self {
            block: data.id,
            data: Some(data.id),
            tracks: TransformTracks::from_data(data),
            pose: StaticPose::default(),
        }
    }

    pub fn tracks(&self) -> &TransformTracks {
        &self.tracks
    }
}

impl TransformInterpolator for KeyedTransformInterpolator {
    fn update_transform(&mut self, target: &mut Transform, time: f32) -> bool {
        let mut written = false;
        if let Some(rotation) = self.tracks.rotations.sample(time) {
            target.rotation = rotation;
            written = true;
        } else if let Some(q) = self.pose.rotation {
            target.rotation = Matrix3::from(q.normalize());
            written = true;
        }
        if let Some(translation) = self.tracks.translations.sample(time).or(self.pose.translation) {
            target.translation = translation;
            written = true;
        }
        if let Some(scale) = self.tracks.scales.sample(time).or(self.pose.scale) {
            target.scale = scale;
            written = true;
        }
        written
    }

    fn block(&self) -> BlockId {
        self.block
    }

    fn depends_on(&self, block: BlockId) -> bool {
        block == self.block || self.data == Some(block)
    }
}

/// Handle value marking a channel without control points.
const INVALID_HANDLE: i64 = 0xFFFF;

/// One compressed channel of a B-spline interpolator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct SplineChannel {
    handle: Option<usize>,
    offset: f32,
    half_range: f32,
}

impl SplineChannel {
    fn read(record: &Record, name: &str) -> Self {
        let handle = record.int(&format!("{} Handle", name));
        Self {
            handle: (0..INVALID_HANDLE).contains(&handle).then_some(handle as usize),
            offset: record.float(&format!("{} Offset", name)),
            half_range: record.float(&format!("{} Half Range", name)),
        }
    }
}

/// Evaluates compressed B-spline control points.
///
/// Control values are stored as shorts and expand to
/// `offset + half_range * short / 32767`. The curve is an open uniform
/// B-spline of degree 3, lowered when there are fewer control points.
#[derive(Debug, Clone)]
pub struct BSplineTransformInterpolator {
    block: BlockId,
    spline_data: Option<BlockId>,
    basis_data: Option<BlockId>,
    start: f32,
    stop: f32,
    control_count: usize,
    control_points: Vec<i16>,
    translation: SplineChannel,
    rotation: SplineChannel,
    scale: SplineChannel,
    pose: StaticPose,
}

impl BSplineTransformInterpolator {
    pub fn new<M: BlockModel + ?Sized>(model: &M, block: &Block) -> Self {
        let spline = model.block_of_type(block.link("Spline Data"), "NiBSplineData");
        let basis = model.block_of_type(block.link("Basis Data"), "NiBSplineBasisData");

        let control_points = spline
            .map(|s| {
                s.ints("Compact Control Points")
                    .iter()
                    .map(|&v| v.clamp(i16::MIN as i64, i16::MAX as i64) as i16)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            block: block.id,
            spline_data: spline.map(|s| s.id),
            basis_data: basis.map(|b| b.id),
            start: block.float("Start Time"),
            stop: block.float("Stop Time"),
            control_count: basis.map(|b| b.int("Num Control Points").max(0) as usize).unwrap_or(0),
            control_points,
            translation: SplineChannel::read(block, "Translation"),
            rotation: SplineChannel::read(block, "Rotation"),
            scale: SplineChannel::read(block, "Scale"),
            pose: StaticPose::read(block),
        }
    }

    fn degree(&self) -> usize {
        self.control_count.saturating_sub(1).min(3)
    }

    /// Open uniform knot value `i`.
    fn knot(&self, i: usize) -> f32 {
        let p = self.degree();
        let n = self.control_count;
        if i <= p {
            0.0
        } else if i >= n {
            (n - p) as f32
        } else {
            (i - p) as f32
        }
    }

    fn control_point(&self, channel: &SplineChannel, index: usize, dim: usize) -> Option<Vec<f32>> {
        let base = channel.handle? + index * dim;
        let raw = self.control_points.get(base..base + dim)?;
        Some(
            raw.iter()
                .map(|&v| channel.offset + channel.half_range * (v as f32 / 32767.0))
                .collect(),
        )
    }

    /// De Boor evaluation of a `dim`-dimensional channel at curve parameter `u`.
    fn evaluate(&self, channel: &SplineChannel, dim: usize, u: f32) -> Option<Vec<f32>> {
        channel.handle?;
        let n = self.control_count;
        if n == 0 {
            return None;
        }
        let p = self.degree();

        // Knot span containing u
        let mut k = p;
        while k + 1 < n && self.knot(k + 1) <= u {
            k += 1;
        }

        let mut d: Vec<Vec<f32>> = (0..=p)
            .map(|j| self.control_point(channel, j + k - p, dim))
            .collect::<Option<_>>()?;

        for r in 1..=p {
            for j in (r..=p).rev() {
                let lo = self.knot(j + k - p);
                let hi = self.knot(j + 1 + k - r);
                let alpha = if hi - lo > EPSILON { (u - lo) / (hi - lo) } else { 0.0 };
                let prev = d[j - 1].clone();
                for (value, before) in d[j].iter_mut().zip(prev) {
                    *value = (1.0 - alpha) * before + alpha * *value;
                }
            }
        }

        d.pop()
    }
}

impl TransformInterpolator for BSplineTransformInterpolator {
    fn update_transform(&mut self, target: &mut Transform, time: f32) -> bool {
        let span = self.stop - self.start;
        let fraction = if span > EPSILON { ((time - self.start) / span).clamp(0.0, 1.0) } else { 0.0 };
        let u = fraction * self.control_count.saturating_sub(self.degree()) as f32;

        // A channel whose handle is unset takes the static pose.
        let rotation = match self.rotation.handle {
            Some(_) => self
                .evaluate(&self.rotation, 4, u)
                .map(|q| Quaternion::new(q[0], q[1], q[2], q[3])),
            None => self.pose.rotation,
        };
        let translation = match self.translation.handle {
            Some(_) => self.evaluate(&self.translation, 3, u).map(|t| Vector3::new(t[0], t[1], t[2])),
            None => self.pose.translation,
        };
        let scale = match self.scale.handle {
            Some(_) => self.evaluate(&self.scale, 1, u).map(|s| s[0]),
            None => self.pose.scale,
        };

        let mut written = false;
        if let Some(q) = rotation.filter(|q| q.magnitude2() > EPSILON) {
            target.rotation = Matrix3::from(q.normalize());
            written = true;
        }
        if let Some(t) = translation {
            target.translation = t;
            written = true;
        }
        if let Some(s) = scale {
            target.scale = s;
            written = true;
        }
        written
    }

    fn block(&self) -> BlockId {
        self.block
    }

    fn depends_on(&self, block: BlockId) -> bool {
        block == self.block || self.spline_data == Some(block) || self.basis_data == Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemoryModel, Value};

    fn key_group(keys: Vec<Record>) -> Record {
        Record::new().with("Interpolation", 1).with("Keys", keys)
    }

    #[test]
    fn test_factory_recognizes_types() {
        let mut model = MemoryModel::new();
        let keyed = model.add_block("NiTransformInterpolator", Record::new());
        let spline = model.add_block("NiBSplineCompTransformInterpolator", Record::new());
        let other = model.add_block("NiFloatInterpolator", Record::new());

        let build = |id| model.block(id).and_then(|b| create_transform_interpolator(&model, b));
        assert!(build(keyed).is_some());
        assert!(build(spline).is_some());
        assert!(build(other).is_none());
    }

    #[test]
    fn test_keyed_interpolator_samples_data() {
        let mut model = MemoryModel::new();
        let data = model.add_block(
            "NiTransformData",
            Record::new().with(
                "Translations",
                key_group(vec![
                    Record::new().with("Time", 0.0).with("Value", Vector3::new(0.0f32, 0.0, 0.0)),
                    Record::new().with("Time", 1.0).with("Value", Vector3::new(10.0f32, 0.0, 0.0)),
                ]),
            ),
        );
        let interp = model.add_block("NiTransformInterpolator", Record::new().with("Data", Value::link(data)));

        let block = model.block(interp).expect("interpolator block");
        let mut interpolator = KeyedTransformInterpolator::new(&model, block);
        assert!(interpolator.depends_on(data));

        let mut t = Transform::IDENTITY;
        assert!(interpolator.update_transform(&mut t, 0.5));
        assert!((t.translation.x - 5.0).abs() < EPSILON);
    }

    #[test]
    fn test_keyed_interpolator_without_data_is_noop() {
        let mut model = MemoryModel::new();
        let interp = model.add_block("NiTransformInterpolator", Record::new());
        let block = model.block(interp).expect("interpolator block");

        let mut interpolator = KeyedTransformInterpolator::new(&model, block);
        let mut t = Transform::from_translation(Vector3::new(1.0, 1.0, 1.0));
        assert!(!interpolator.update_transform(&mut t, 0.0));
        assert_eq!(t.translation, Vector3::new(1.0, 1.0, 1.0));
    }

    fn spline_model(points: Vec<i64>, count: i64, translation_handle: i64) -> (MemoryModel, BlockId) {
        let mut model = MemoryModel::new();
        let spline = model.add_block("NiBSplineData", Record::new().with("Compact Control Points", Value::Ints(points)));
        let basis = model.add_block("NiBSplineBasisData", Record::new().with("Num Control Points", count));
        let interp = model.add_block(
            "NiBSplineCompTransformInterpolator",
            Record::new()
                .with("Start Time", 0.0)
                .with("Stop Time", 1.0)
                .with("Spline Data", Value::link(spline))
                .with("Basis Data", Value::link(basis))
                .with("Translation Handle", translation_handle)
                .with("Translation Offset", 0.0)
                .with("Translation Half Range", 32767.0)
                .with("Rotation Handle", 0xFFFF)
                .with("Scale Handle", 0xFFFF),
        );
        (model, interp)
    }

    #[test]
    fn test_bspline_interpolates_endpoints() {
        // Four control points along x: 0, 10, 20, 30
        let points = vec![0, 0, 0, 10, 0, 0, 20, 0, 0, 30, 0, 0];
        let (model, interp) = spline_model(points, 4, 0);
        let block = model.block(interp).expect("interpolator block");
        let mut interpolator = BSplineTransformInterpolator::new(&model, block);

        let mut t = Transform::IDENTITY;
        assert!(interpolator.update_transform(&mut t, 0.0));
        assert!(t.translation.x.abs() < 1e-3, "curve starts at the first point, got {:?}", t.translation);

        assert!(interpolator.update_transform(&mut t, 1.0));
        assert!((t.translation.x - 30.0).abs() < 1e-3, "curve ends at the last point, got {:?}", t.translation);

        assert!(interpolator.update_transform(&mut t, 0.5));
        assert!((t.translation.x - 15.0).abs() < 1e-3, "collinear points map linearly, got {:?}", t.translation);
        assert_eq!(t.scale, 1.0, "scale channel has no handle");
    }

    #[test]
    fn test_bspline_out_of_range_handle_is_noop() {
        let (model, interp) = spline_model(vec![0, 0, 0], 4, 0);
        let block = model.block(interp).expect("interpolator block");
        let mut interpolator = BSplineTransformInterpolator::new(&model, block);

        let mut t = Transform::IDENTITY;
        assert!(!interpolator.update_transform(&mut t, 0.5));
        assert_eq!(t, Transform::IDENTITY);
    }

    // ========================================================================
    // Static Pose Fallback
    // ========================================================================

    #[test]
    fn test_bspline_unset_handle_uses_static_translation() {
        let points = vec![0, 0, 0, 10, 0, 0, 20, 0, 0, 30, 0, 0];
        let (mut model, interp) = spline_model(points, 4, 0xFFFF);
        let fields = model
            .block(interp)
            .expect("interpolator block")
            .fields
            .clone()
            .with(
                "Transform",
                Record::new()
                    .with("Translation", Vector3::new(4.0f32, 5.0, 6.0))
                    .with("Rotation", Quaternion::new(1.0f32, 0.0, 0.0, 0.0))
                    .with("Scale", 2.0f32),
            );
        model.set_fields(interp, fields);

        let block = model.block(interp).expect("interpolator block");
        let mut interpolator = BSplineTransformInterpolator::new(&model, block);

        let mut t = Transform::IDENTITY;
        assert!(interpolator.update_transform(&mut t, 0.5));
        assert!(
            (t.translation - Vector3::new(4.0, 5.0, 6.0)).magnitude() < EPSILON,
            "Expected static translation, got {:?}",
            t.translation
        );
        assert!((t.scale - 2.0).abs() < EPSILON);
    }

    #[test]
    fn test_static_pose_skips_unset_components() {
        let record = Record::new()
            .with("Translation", Vector3::new(-f32::MAX, -f32::MAX, -f32::MAX))
            .with("Scale", 3.0f32);
        let pose = StaticPose::read(&record);

        assert_eq!(pose.translation, None);
        assert_eq!(pose.rotation, None);
        assert_eq!(pose.scale, Some(3.0));
    }

    #[test]
    fn test_keyed_interpolator_empty_track_uses_static_pose() {
        let mut model = MemoryModel::new();
        let data = model.add_block(
            "NiTransformData",
            Record::new().with(
                "Scales",
                key_group(vec![
                    Record::new().with("Time", 0.0).with("Value", 1.0f32),
                    Record::new().with("Time", 1.0).with("Value", 3.0f32),
                ]),
            ),
        );
        let interp = model.add_block(
            "NiTransformInterpolator",
            Record::new()
                .with("Data", Value::link(data))
                .with("Translation", Vector3::new(7.0f32, 0.0, 0.0))
                .with("Scale", 9.0f32),
        );

        let block = model.block(interp).expect("interpolator block");
        let mut interpolator = KeyedTransformInterpolator::new(&model, block);

        let mut t = Transform::IDENTITY;
        assert!(interpolator.update_transform(&mut t, 0.5));
        assert!((t.translation.x - 7.0).abs() < EPSILON, "translation track is empty");
        assert!((t.scale - 2.0).abs() < EPSILON, "scale keys win over the static scale");
    }
}
