use std::ops::Mul;

use cgmath::{InnerSpace, Vector3};

use crate::{Transform, EPSILON};

/// A bounding sphere. A zero radius represents a single point.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoundSphere {
    pub center: Vector3<f32>,
    pub radius: f32,
}

impl BoundSphere {
    pub fn new(center: Vector3<f32>, radius: f32) -> Self {
        Self {
            center,
            radius: radius.max(0.0),
        }
    }

    pub fn point(center: Vector3<f32>) -> Self {
        Self::new(center, 0.0)
    }

    /// Returns the minimal sphere enclosing both spheres.
    ///
    /// If one sphere already contains the other the larger one is returned
    /// unchanged. Otherwise the result passes through the two extreme points
    /// on the line connecting the centers.
    pub fn merge(&self, other: &BoundSphere) -> BoundSphere {
        let offset = other.center - self.center;
        let distance = offset.magnitude();

        // Coincident centers: the larger sphere covers the smaller one
        if distance < EPSILON {
            return if other.radius > self.radius { *other } else { *self };
        }

        if self.radius >= distance + other.radius {
            return *self;
        }
        if other.radius >= distance + self.radius {
            return *other;
        }

        let radius = (distance + self.radius + other.radius) * 0.5;
        let center = self.center + offset * ((radius - self.radius) / distance);

        BoundSphere { center, radius }
    }

    /// Merges two optional bounds, treating `None` as empty.
    pub fn merge_optional(a: Option<BoundSphere>, b: Option<BoundSphere>) -> Option<BoundSphere> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.merge(&b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        }
    }

    pub fn contains_point(&self, p: Vector3<f32>) -> bool {
        (p - self.center).magnitude() <= self.radius + EPSILON * self.radius.max(1.0)
    }

    pub fn contains_sphere(&self, other: &BoundSphere) -> bool {
        let distance = (other.center - self.center).magnitude();
        distance + other.radius <= self.radius + EPSILON * self.radius.max(1.0)
    }
}

impl Mul<BoundSphere> for Transform {
    type Output = BoundSphere;

    fn mul(self, rhs: BoundSphere) -> BoundSphere {
        BoundSphere {
            center: self.transform_point(rhs.center),
            radius: rhs.radius * self.scale.abs(),
        }
    }
}
