//! Fixed-point 2D vector and rotation quaternion, used by synced transform
//! components and the physics stepper.

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Vec2 {
    pub x: Fixed,
    pub y: Fixed,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
    };

    pub fn new(x: Fixed, y: Fixed) -> Vec2 {
        Vec2 { x, y }
    }

    pub fn add(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x - other.x, self.y - other.y)
    }

    pub fn scale(self, s: Fixed) -> Vec2 {
        Vec2::new(self.x * s, self.y * s)
    }

    pub fn dot(self, other: Vec2) -> Fixed {
        self.x * other.x + self.y * other.y
    }

    pub fn length(self) -> Fixed {
        self.dot(self).sqrt()
    }
}

/// 2D rotation represented as a unit quaternion restricted to the z-axis,
/// kept four-field-wide even though only `(z, w)` are nonzero for planar
/// rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quat {
    pub x: Fixed,
    pub y: Fixed,
    pub z: Fixed,
    pub w: Fixed,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: Fixed::ZERO,
        y: Fixed::ZERO,
        z: Fixed::ZERO,
        w: Fixed::ONE,
    };

    pub fn from_angle(angle: Fixed) -> Quat {
        let half = angle.div(Fixed::from_int(2));
        Quat {
            x: Fixed::ZERO,
            y: Fixed::ZERO,
            z: half.sin(),
            w: half.cos(),
        }
    }

    pub fn angle(self) -> Fixed {
        Fixed::from_int(2) * self.z.atan2(self.w)
    }
}

impl Default for Quat {
    fn default() -> Quat {
        Quat::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec2_add_sub_roundtrip() {
        let a = Vec2::new(Fixed::from_int(3), Fixed::from_int(4));
        let b = Vec2::new(Fixed::from_int(1), Fixed::from_int(2));
        assert_eq!(a.add(b).sub(b), a);
    }

    #[test]
    fn vec2_length_of_3_4_5_triangle() {
        let v = Vec2::new(Fixed::from_int(3), Fixed::from_int(4));
        assert!((v.length().to_float() - 5.0).abs() < 0.01);
    }

    #[test]
    fn quat_identity_has_zero_angle() {
        assert!(Quat::IDENTITY.angle().to_float().abs() < 0.05);
    }

    #[test]
    fn quat_from_angle_roundtrips_roughly() {
        let angle = Fixed::to_fixed(0.5);
        let q = Quat::from_angle(angle);
        assert!((q.angle().to_float() - 0.5).abs() < 0.05);
    }
}
