//! Keyframe groups and their sampling.

use std::fmt::Debug;

use cgmath::{InnerSpace, Matrix3, Quaternion, Vector3};

use crate::common::{Transform, EPSILON};
use crate::model::Record;

/// How values between two keys are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyType {
    #[default]
    Linear,
    /// Cubic Hermite using the stored tangents.
    Quadratic,
    /// Kochanek-Bartels; tangents are derived when the group is loaded.
    Tbc,
    /// Rotation stored as three independent Euler angle channels.
    XyzRotation,
    /// Step: holds the left key.
    Constant,
}

impl KeyType {
    pub fn from_raw(raw: i64) -> KeyType {
        match raw {
            2 => KeyType::Quadratic,
            3 => KeyType::Tbc,
            4 => KeyType::XyzRotation,
            5 => KeyType::Constant,
            _ => KeyType::Linear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Key<T> {
    pub time: f32,
    pub value: T,
    /// Incoming tangent.
    pub forward: T,
    /// Outgoing tangent.
    pub backward: T,
}

impl<T: Copy> Key<T> {
    pub fn new(time: f32, value: T) -> Self {
        Self {
            time,
            value,
            forward: value,
            backward: value,
        }
    }
}

/// Tension, continuity and bias of a TBC key.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tbc {
    pub t: f32,
    pub c: f32,
    pub b: f32,
}

/// A value type that can be stored in and sampled from a key group.
pub trait KeyValue: Copy + Debug {
    fn read(record: &Record, name: &str) -> Self;

    /// Blends the keys `a` and `b` at fraction `x` in `[0, 1)`.
    fn blend(key_type: KeyType, a: &Key<Self>, b: &Key<Self>, x: f32) -> Self;

    /// Fills in tangents for TBC keys. Types without tangents keep their keys unchanged.
    fn derive_tbc(_keys: &mut [Key<Self>], _params: &[Tbc]) {}
}

fn hermite<T>(p0: T, t0: T, p1: T, t1: T, x: f32) -> T
where
    T: std::ops::Add<Output = T> + std::ops::Mul<f32, Output = T>,
{
    let x2 = x * x;
    let x3 = x2 * x;
    p0 * (2.0 * x3 - 3.0 * x2 + 1.0)
        + p1 * (-2.0 * x3 + 3.0 * x2)
        + t0 * (x3 - 2.0 * x2 + x)
        + t1 * (x3 - x2)
}

macro_rules! impl_linear_key_value {
    ($ty:ty, $read:ident) => {
        impl KeyValue for $ty {
            fn read(record: &Record, name: &str) -> Self {
                record.$read(name)
            }

            fn blend(key_type: KeyType, a: &Key<Self>, b: &Key<Self>, x: f32) -> Self {
                match key_type {
                    KeyType::Constant => a.value,
                    KeyType::Quadratic | KeyType::Tbc => hermite(a.value, a.backward, b.value, b.forward, x),
                    _ => a.value + (b.value - a.value) * x,
                }
            }

            fn derive_tbc(keys: &mut [Key<Self>], params: &[Tbc]) {
                let values: Vec<Self> = keys.iter().map(|k| k.value).collect();
                let last = values.len().saturating_sub(1);

                for (i, key) in keys.iter_mut().enumerate() {
                    let tbc = params.get(i).copied().unwrap_or_default();
                    let prev = values[i.saturating_sub(1)];
                    let next = values[(i + 1).min(last)];
                    let incoming = values[i] - prev;
                    let outgoing = next - values[i];

                    let one_t = 1.0 - tbc.t;
                    key.backward = incoming * (one_t * (1.0 + tbc.b) * (1.0 - tbc.c) * 0.5)
                        + outgoing * (one_t * (1.0 - tbc.b) * (1.0 + tbc.c) * 0.5);
                    key.forward = incoming * (one_t * (1.0 + tbc.b) * (1.0 + tbc.c) * 0.5)
                        + outgoing * (one_t * (1.0 - tbc.b) * (1.0 - tbc.c) * 0.5);
                }
            }
        }
    };
}

impl_linear_key_value!(f32, float);
impl_linear_key_value!(Vector3<f32>, vec3);

/// Spherical interpolation along the shorter arc.
pub fn slerp(a: Quaternion<f32>, b: Quaternion<f32>, x: f32) -> Quaternion<f32> {
    let mut b = b;
    let mut dot = a.dot(b);
    if dot < 0.0 {
        b = -b;
        dot = -dot;
    }

    if dot > 1.0 - EPSILON {
        return (a * (1.0 - x) + b * x).normalize();
    }

    let theta = dot.acos();
    let sin_theta = theta.sin();
    a * (((1.0 - x) * theta).sin() / sin_theta) + b * ((x * theta).sin() / sin_theta)
}

impl KeyValue for Quaternion<f32> {
    fn read(record: &Record, name: &str) -> Self {
        record.quat(name)
    }

    fn blend(key_type: KeyType, a: &Key<Self>, b: &Key<Self>, x: f32) -> Self {
        match key_type {
            KeyType::Constant => a.value,
            _ => slerp(a.value, b.value, x),
        }
    }
}

impl KeyValue for bool {
    fn read(record: &Record, name: &str) -> Self {
        record.bool(name)
    }

    fn blend(_key_type: KeyType, a: &Key<Self>, _b: &Key<Self>, _x: f32) -> Self {
        a.value
    }
}

/// An ordered list of keys plus the cached position of the last lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyGroup<T> {
    key_type: KeyType,
    keys: Vec<Key<T>>,
    last: usize,
}

impl<T> Default for KeyGroup<T> {
    fn default() -> Self {
        Self {
            key_type: KeyType::Linear,
            keys: Vec::new(),
            last: 0,
        }
    }
}

impl<T: KeyValue> KeyGroup<T> {
    pub fn new(key_type: KeyType, keys: Vec<Key<T>>) -> Self {
        Self {
            key_type,
            keys,
            last: 0,
        }
    }

    /// Reads a key group record with an `Interpolation` type and `Keys` rows.
    pub fn from_record(record: &Record) -> Self {
        Self::read(record, "Interpolation", "Keys")
    }

    /// Reads keys from `keys_field` rows, using `type_field` for the key type.
    ///
    /// Each row holds `Time` and `Value`, plus `Forward`/`Backward` tangents
    /// or a `TBC` record depending on the key type.
    pub fn read(record: &Record, type_field: &str, keys_field: &str) -> Self {
        let key_type = KeyType::from_raw(record.int(type_field));
        let rows = record.rows(keys_field);

        let mut keys: Vec<Key<T>> = rows
            .iter()
            .map(|row| {
                let value = T::read(row, "Value");
                let mut key = Key::new(row.float("Time"), value);
                if key_type == KeyType::Quadratic {
                    key.forward = T::read(row, "Forward");
                    key.backward = T::read(row, "Backward");
                }
                key
            })
            .collect();

        if key_type == KeyType::Tbc {
            let params: Vec<Tbc> = rows
                .iter()
                .map(|row| match row.record("TBC") {
                    Some(tbc) => Tbc {
                        t: tbc.float("t"),
                        c: tbc.float("c"),
                        b: tbc.float("b"),
                    },
                    None => Tbc::default(),
                })
                .collect();
            T::derive_tbc(&mut keys, &params);
        }

        Self::new(key_type, keys)
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn keys(&self) -> &[Key<T>] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Finds the keys surrounding `time` and the fraction between them.
    ///
    /// Times before the first key or after the last one clamp to that key.
    fn time_index(&mut self, time: f32) -> Option<(usize, usize, f32)> {
        let count = self.keys.len();
        if count == 0 {
            return None;
        }

        if time <= self.keys[0].time {
            self.last = 0;
            return Some((0, 0, 0.0));
        }
        if time >= self.keys[count - 1].time {
            self.last = count - 1;
            return Some((count - 1, count - 1, 0.0));
        }

        // Resume from the previous lookup; playback usually advances by one key at most
        let mut i = self.last.min(count - 1);
        while i > 0 && self.keys[i].time > time {
            i -= 1;
        }
        while i + 1 < count && self.keys[i + 1].time <= time {
            i += 1;
        }
        self.last = i;

        let t0 = self.keys[i].time;
        let t1 = self.keys[i + 1].time;
        let x = if t1 - t0 > EPSILON { (time - t0) / (t1 - t0) } else { 0.0 };
        Some((i, i + 1, x))
    }

    /// Samples the group at `time`. `None` if the group holds no keys.
    pub fn sample(&mut self, time: f32) -> Option<T> {
        let (i, j, x) = self.time_index(time)?;
        Some(T::blend(self.key_type, &self.keys[i], &self.keys[j], x))
    }
}

/// A rotation channel: quaternion keys or three Euler angle channels.
#[derive(Debug, Clone, PartialEq)]
pub enum RotationTrack {
    Quaternion(KeyGroup<Quaternion<f32>>),
    Euler(Box<[KeyGroup<f32>; 3]>),
}

impl Default for RotationTrack {
    fn default() -> Self {
        RotationTrack::Quaternion(KeyGroup::default())
    }
}

impl RotationTrack {
    /// Reads a rotation group.
    ///
    /// Accepts both a dedicated group (`Interpolation`/`Keys`) and the inline
    /// layout of keyframe data blocks (`Rotation Type`/`Quaternion Keys`).
    /// Euler rotations are read from three `XYZ Rotations` rows.
    pub fn from_record(record: &Record) -> Self {
        let type_field = if record.has("Interpolation") { "Interpolation" } else { "Rotation Type" };
        if KeyType::from_raw(record.int(type_field)) == KeyType::XyzRotation {
            let rows = record.rows("XYZ Rotations");
            let channel = |i: usize| rows.get(i).map(KeyGroup::from_record).unwrap_or_default();
            return RotationTrack::Euler(Box::new([channel(0), channel(1), channel(2)]));
        }

        let keys_field = if record.has("Keys") { "Keys" } else { "Quaternion Keys" };
        RotationTrack::Quaternion(KeyGroup::read(record, type_field, keys_field))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RotationTrack::Quaternion(keys) => keys.is_empty(),
            RotationTrack::Euler(channels) => channels.iter().all(KeyGroup::is_empty),
        }
    }

    pub fn sample(&mut self, time: f32) -> Option<Matrix3<f32>> {
        match self {
            RotationTrack::Quaternion(keys) => keys.sample(time).map(Matrix3::from),
            RotationTrack::Euler(channels) => {
                if channels.iter().all(KeyGroup::is_empty) {
                    return None;
                }
                let mut angles = [0.0f32; 3];
                for (angle, channel) in angles.iter_mut().zip(channels.iter_mut()) {
                    *angle = channel.sample(time).unwrap_or(0.0);
                }
                Some(Transform::euler_rotation(angles[0], angles[1], angles[2]))
            }
        }
    }
}

/// Translation, rotation and scale channels of a keyframe data block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformTracks {
    pub translations: KeyGroup<Vector3<f32>>,
    pub rotations: RotationTrack,
    pub scales: KeyGroup<f32>,
}

impl TransformTracks {
    /// Reads the channels of a keyframe data block.
    ///
    /// Without a `Rotations` group the rotation keys are read from the data
    /// block itself.
    pub fn from_data(data: &Record) -> Self {
        let rotations = match data.record("Rotations") {
            Some(rotations) => RotationTrack::from_record(rotations),
            None => RotationTrack::from_record(data),
        };

        Self {
            translations: data.record("Translations").map(KeyGroup::from_record).unwrap_or_default(),
            rotations,
            scales: data.record("Scales").map(KeyGroup::from_record).unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.translations.is_empty() && self.rotations.is_empty() && self.scales.is_empty()
    }

    /// Overwrites each channel of `target` that has a sample at `time`.
    pub fn apply(&mut self, time: f32, target: &mut Transform) -> bool {
        let mut written = false;
        if let Some(rotation) = self.rotations.sample(time) {
            target.rotation = rotation;
            written = true;
        }
        if let Some(translation) = self.translations.sample(time) {
            target.translation = translation;
            written = true;
        }
        if let Some(scale) = self.scales.sample(time) {
            target.scale = scale;
            written = true;
        }
        written
    }
}

/// A boolean channel, as used by visibility animation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolChannel {
    keys: KeyGroup<bool>,
}

impl BoolChannel {
    pub fn new(keys: KeyGroup<bool>) -> Self {
        Self { keys }
    }

    /// Reads either a bool data block (`Data` group) or visibility data (`Keys` rows).
    pub fn from_data(data: &Record) -> Self {
        match data.record("Data") {
            Some(group) => Self::new(KeyGroup::from_record(group)),
            None => Self::new(KeyGroup::read(data, "Interpolation", "Keys")),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn sample(&mut self, time: f32) -> Option<bool> {
        self.keys.sample(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use cgmath::{Deg, Rotation3};

    fn float_group(key_type: KeyType, points: &[(f32, f32)]) -> KeyGroup<f32> {
        KeyGroup::new(key_type, points.iter().map(|&(t, v)| Key::new(t, v)).collect())
    }

    fn key_row(time: f32, value: impl Into<Value>) -> Record {
        Record::new().with("Time", time).with("Value", value)
    }

    #[test]
    fn test_empty_group_has_no_sample() {
        let mut group: KeyGroup<f32> = KeyGroup::default();
        assert_eq!(group.sample(1.0), None);
    }

    #[test]
    fn test_linear_sampling() {
        let mut group = float_group(KeyType::Linear, &[(0.0, 0.0), (1.0, 10.0), (3.0, 30.0)]);

        assert_eq!(group.sample(-1.0), Some(0.0), "before first key clamps");
        assert_eq!(group.sample(0.5), Some(5.0));
        assert_eq!(group.sample(2.0), Some(20.0));
        assert_eq!(group.sample(5.0), Some(30.0), "after last key clamps");
    }

    #[test]
    fn test_sampling_backwards_in_time() {
        let mut group = float_group(KeyType::Linear, &[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]);

        assert_eq!(group.sample(2.5), Some(2.5));
        assert_eq!(group.sample(0.25), Some(0.25));
        assert_eq!(group.sample(1.0), Some(1.0), "exact key time");
    }

    #[test]
    fn test_constant_keys_step() {
        let mut group = float_group(KeyType::Constant, &[(0.0, 1.0), (1.0, 2.0)]);
        assert_eq!(group.sample(0.99), Some(1.0));
        assert_eq!(group.sample(1.0), Some(2.0));
    }

    #[test]
    fn test_quadratic_zero_tangents_hits_endpoints() {
        let mut group = float_group(KeyType::Quadratic, &[(0.0, 0.0), (1.0, 1.0)]);
        for key in group.keys.iter_mut() {
            key.forward = 0.0;
            key.backward = 0.0;
        }

        let mid = group.sample(0.5).expect("sample");
        assert!((mid - 0.5).abs() < EPSILON, "smoothstep midpoint, got {}", mid);
        let early = group.sample(0.25).expect("sample");
        assert!(early < 0.25, "ease-in expected, got {}", early);
    }

    #[test]
    fn test_tbc_defaults_follow_catmull_rom() {
        let record = Record::new().with("Interpolation", 3).with(
            "Keys",
            vec![
                key_row(0.0, 0.0f32),
                key_row(1.0, 1.0f32),
                key_row(2.0, 2.0f32),
                key_row(3.0, 3.0f32),
            ],
        );
        let mut group: KeyGroup<f32> = KeyGroup::from_record(&record);
        assert_eq!(group.key_type(), KeyType::Tbc);

        // Evenly spaced collinear keys interpolate linearly away from the ends
        let v = group.sample(1.5).expect("sample");
        assert!((v - 1.5).abs() < 1e-4, "got {}", v);
    }

    #[test]
    fn test_read_vector_group() {
        let record = Record::new().with("Interpolation", 1).with(
            "Keys",
            vec![
                key_row(0.0, Vector3::new(0.0f32, 0.0, 0.0)),
                key_row(2.0, Vector3::new(2.0f32, 4.0, 6.0)),
            ],
        );
        let mut group: KeyGroup<Vector3<f32>> = KeyGroup::from_record(&record);
        let v = group.sample(1.0).expect("sample");
        assert!((v - Vector3::new(1.0, 2.0, 3.0)).magnitude() < EPSILON);
    }

    #[test]
    fn test_slerp_midpoint() {
        let a = Quaternion::from_angle_z(Deg(0.0f32));
        let b = Quaternion::from_angle_z(Deg(90.0f32));
        let mid = slerp(a, b, 0.5);
        let expected = Quaternion::from_angle_z(Deg(45.0f32));
        assert!((mid.dot(expected).abs() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_slerp_identical_is_finite() {
        let a = Quaternion::from_angle_x(Deg(30.0f32));
        let q = slerp(a, a, 0.3);
        assert!(q.s.is_finite() && q.v.x.is_finite());
    }

    #[test]
    fn test_rotation_fallback_inline_keys() {
        let data = Record::new().with("Rotation Type", 1).with(
            "Quaternion Keys",
            vec![key_row(0.0, Quaternion::from_angle_z(Deg(90.0f32)))],
        );
        let mut tracks = TransformTracks::from_data(&data);
        assert!(!tracks.rotations.is_empty());

        let mut target = Transform::IDENTITY;
        assert!(tracks.apply(0.0, &mut target));
        let x_axis = target.rotation * Vector3::unit_x();
        assert!((x_axis - Vector3::unit_y()).magnitude() < 1e-5);
    }

    #[test]
    fn test_euler_rotation_track() {
        let channel = |v: f32| Record::new().with("Interpolation", 1).with("Keys", vec![key_row(0.0, v)]);
        let data = Record::new().with(
            "Rotations",
            Record::new()
                .with("Interpolation", 4)
                .with("XYZ Rotations", vec![channel(0.0), channel(0.0), channel(std::f32::consts::FRAC_PI_2)]),
        );
        let mut tracks = TransformTracks::from_data(&data);

        let mut target = Transform::IDENTITY;
        tracks.apply(0.0, &mut target);
        let x_axis = target.rotation * Vector3::unit_x();
        assert!((x_axis - Vector3::unit_y()).magnitude() < 1e-5, "got {:?}", x_axis);
    }

    #[test]
    fn test_apply_only_writes_present_channels() {
        let data = Record::new().with(
            "Scales",
            Record::new().with("Interpolation", 1).with("Keys", vec![key_row(0.0, 3.0f32)]),
        );
        let mut tracks = TransformTracks::from_data(&data);

        let mut target = Transform::from_translation(Vector3::new(1.0, 2.0, 3.0));
        assert!(tracks.apply(0.0, &mut target));
        assert_eq!(target.scale, 3.0);
        assert_eq!(target.translation, Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_bool_channel_steps() {
        let data = Record::new().with("Keys", vec![key_row(0.0, true), key_row(1.0, false)]);
        let mut channel = BoolChannel::from_data(&data);

        assert_eq!(channel.sample(0.5), Some(true));
        assert_eq!(channel.sample(1.5), Some(false));
        assert_eq!(BoolChannel::default().sample(0.0), None);
    }
}
