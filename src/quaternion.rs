//! Quaternion helpers for orientation tracking
//!
//! Components are stored in (x, y, z, w) order, the layout Android rotation-vector
//! sensors report. Products follow the Hamilton convention: `multiply(a, b)` applies
//! `b` first, then `a`.

use nalgebra::{Quaternion, UnitQuaternion};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Build from a raw `[x, y, z, w]` slice. Any other length is rejected.
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        match values {
            [x, y, z, w] => Some(Self::new(*x, *y, *z, *w)),
            _ => None,
        }
    }

    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    /// Unit-length copy. A zero quaternion normalizes to identity.
    pub fn normalize(&self) -> Self {
        let n = self.norm();
        if n <= f32::EPSILON || !n.is_finite() {
            return Self::IDENTITY;
        }
        Self::new(self.x / n, self.y / n, self.z / n, self.w / n)
    }

    /// Vector part negated, scalar kept. Inverse rotation for unit quaternions.
    pub fn conjugate(&self) -> Self {
        Self::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Flip into the w >= 0 hemisphere so consecutive samples don't jump sign.
    pub fn canonicalize(&self) -> Self {
        if self.w < 0.0 {
            Self::new(-self.x, -self.y, -self.z, -self.w)
        } else {
            *self
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.w.is_finite()
    }

    pub fn to_unit(self) -> UnitQuaternion<f32> {
        UnitQuaternion::from_quaternion(Quaternion::new(self.w, self.x, self.y, self.z))
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<UnitQuaternion<f32>> for Quat {
    fn from(q: UnitQuaternion<f32>) -> Self {
        Self::new(q.i, q.j, q.k, q.w)
    }
}

/// Hamilton product `a ⊗ b`.
pub fn multiply(a: &Quat, b: &Quat) -> Quat {
    Quat {
        x: a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
        y: a.w * b.y - a.x * b.z + a.y * b.w + a.z * b.x,
        z: a.w * b.z + a.x * b.y - a.y * b.x + a.z * b.w,
        w: a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
    }
}

/// Rebuild a unit quaternion from its vector part (rotation-vector sensors
/// may omit the scalar). Noise pushing the magnitude past 1 clamps w to 0.
pub fn complete_from_vector(x: f32, y: f32, z: f32) -> Quat {
    let w = (1.0 - x * x - y * y - z * z).max(0.0).sqrt();
    Quat::new(x, y, z, w).canonicalize()
}
