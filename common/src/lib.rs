//! Value types shared by the nifview crates: rigid/scale transforms,
//! bounding spheres and colors.

mod bound_sphere;
mod transform;

pub use bound_sphere::BoundSphere;
pub use transform::Transform;

use serde::{Deserialize, Serialize};

/// Tolerance used for degenerate-geometry checks and float comparisons.
pub const EPSILON: f32 = 1e-5;

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct RgbaColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl RgbaColor {
    pub const WHITE: RgbaColor = RgbaColor::new(1.0, 1.0, 1.0, 1.0);
    pub const RED: RgbaColor = RgbaColor::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: RgbaColor = RgbaColor::new(0.0, 1.0, 0.0, 1.0);
    pub const YELLOW: RgbaColor = RgbaColor::new(1.0, 1.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Returns the same color with a different alpha.
    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }
}

impl From<[f32; 4]> for RgbaColor {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<RgbaColor> for [f32; 4] {
    fn from(c: RgbaColor) -> Self {
        [c.r, c.g, c.b, c.a]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_array_conversion() {
        let c = RgbaColor::from([0.1, 0.2, 0.3, 0.4]);
        assert_eq!(c, RgbaColor::new(0.1, 0.2, 0.3, 0.4));

        let arr: [f32; 4] = c.into();
        assert_eq!(arr, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_color_with_alpha() {
        let c = RgbaColor::WHITE.with_alpha(0.6);
        assert_eq!(c.r, 1.0);
        assert_eq!(c.a, 0.6);
    }
}
