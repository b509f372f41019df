use std::fmt;
use std::ops::Mul;

use cgmath::{InnerSpace, Matrix3, Matrix4, Quaternion, Rad, SquareMatrix, Vector3, Zero};

use crate::EPSILON;

/// A rigid transform with a uniform scale.
///
/// Points are mapped as `rotation * (scale * p) + translation`. Transforms
/// compose matrix-style: `a * b` applies `b` first and then `a`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Transform {
    pub translation: Vector3<f32>,
    pub rotation: Matrix3<f32>,
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        translation: Vector3::new(0.0, 0.0, 0.0),
        rotation: Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0),
        scale: 1.0,
    };

    pub fn new(translation: Vector3<f32>, rotation: Matrix3<f32>, scale: f32) -> Self {
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn from_translation(translation: Vector3<f32>) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn from_quaternion(translation: Vector3<f32>, rotation: Quaternion<f32>, scale: f32) -> Self {
        Self::new(translation, Matrix3::from(rotation), scale)
    }

    /// Composes two transforms: the result applies `other` in this transform's space.
    pub fn compose(&self, other: &Transform) -> Transform {
        Transform {
            rotation: self.rotation * other.rotation,
            translation: self.translation + self.rotation * (other.translation * self.scale),
            scale: self.scale * other.scale,
        }
    }

    /// Maps a point through this transform.
    pub fn transform_point(&self, p: Vector3<f32>) -> Vector3<f32> {
        self.rotation * (p * self.scale) + self.translation
    }

    /// Splits a generic 4x4 matrix into translation, rotation and a uniform scale.
    ///
    /// The scale is the average of the three per-axis scale factors, so a
    /// non-uniformly scaled or skewed matrix only decomposes approximately.
    /// A zero-length basis column keeps the corresponding identity axis.
    pub fn decompose(m: &Matrix4<f32>) -> Transform {
        let translation = m.w.truncate();
        let columns = [m.x.truncate(), m.y.truncate(), m.z.truncate()];
        let units = [Vector3::unit_x(), Vector3::unit_y(), Vector3::unit_z()];

        let mut axes = [Vector3::zero(); 3];
        let mut total = 0.0;
        for (i, column) in columns.iter().enumerate() {
            let len = column.magnitude();
            total += len;
            axes[i] = if len > EPSILON { column / len } else { units[i] };
        }

        Transform {
            translation,
            rotation: Matrix3::from_cols(axes[0], axes[1], axes[2]),
            scale: total / 3.0,
        }
    }

    pub fn to_matrix4(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.translation)
            * Matrix4::from(self.rotation)
            * Matrix4::from_scale(self.scale)
    }

    /// Builds a rotation matrix from Euler angles (radians), applied as X * Y * Z.
    pub fn euler_rotation(x: f32, y: f32, z: f32) -> Matrix3<f32> {
        Matrix3::from_angle_x(Rad(x)) * Matrix3::from_angle_y(Rad(y)) * Matrix3::from_angle_z(Rad(z))
    }

    /// Recovers X * Y * Z Euler angles (radians) from the rotation part.
    ///
    /// At gimbal lock the Z angle is reported as zero.
    pub fn euler_angles(&self) -> (f32, f32, f32) {
        // element (row, col)
        let m = |r: usize, c: usize| self.rotation[c][r];

        if m(0, 2) < 1.0 {
            if m(0, 2) > -1.0 {
                (
                    (-m(1, 2)).atan2(m(2, 2)),
                    m(0, 2).asin(),
                    (-m(0, 1)).atan2(m(0, 0)),
                )
            } else {
                (-(-m(1, 0)).atan2(m(1, 1)), -std::f32::consts::FRAC_PI_2, 0.0)
            }
        } else {
            (m(1, 0).atan2(m(1, 1)), std::f32::consts::FRAC_PI_2, 0.0)
        }
    }

    pub fn is_identity(&self) -> bool {
        self.translation.magnitude2() < EPSILON * EPSILON
            && (self.scale - 1.0).abs() < EPSILON
            && self.rotation == Matrix3::identity()
    }
}

impl Mul for Transform {
    type Output = Transform;

    fn mul(self, rhs: Transform) -> Transform {
        self.compose(&rhs)
    }
}

impl Mul<&Transform> for &Transform {
    type Output = Transform;

    fn mul(self, rhs: &Transform) -> Transform {
        self.compose(rhs)
    }
}

impl Mul<Vector3<f32>> for Transform {
    type Output = Vector3<f32>;

    fn mul(self, rhs: Vector3<f32>) -> Vector3<f32> {
        self.transform_point(rhs)
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (x, y, z) = self.euler_angles();
        let t = self.translation;
        writeln!(f, "translation  X {:.3}, Y {:.3}, Z {:.3}", t.x, t.y, t.z)?;
        writeln!(
            f,
            "rotation     Y {:.3}, P {:.3}, R {:.3}",
            x.to_degrees(),
            y.to_degrees(),
            z.to_degrees()
        )?;
        writeln!(f, "scale        {:.3}", self.scale)
    }
}
