//! Math types for spatialmix

pub use glam::Vec3;

/// Orthonormal listener frame.
///
/// Listener space follows the usual right-handed audio convention: +X is to
/// the listener's right, +Y is up and -Z is straight ahead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenerBasis {
    pub right: Vec3,
    pub up: Vec3,
    pub back: Vec3,
}

impl ListenerBasis {
    /// Builds the basis from an "at" and "up" orientation pair.
    ///
    /// Degenerate input (zero or parallel vectors) falls back to the identity
    /// frame so that a badly configured listener never produces NaNs.
    pub fn from_orientation(forward: Vec3, up: Vec3) -> Self {
        let forward = forward.normalize_or_zero();
        let right = forward.cross(up).normalize_or_zero();
        let up = right.cross(forward).normalize_or_zero();
        if forward == Vec3::ZERO || right == Vec3::ZERO || up == Vec3::ZERO {
            return Self::identity();
        }
        Self {
            right,
            up,
            back: -forward,
        }
    }

    pub fn identity() -> Self {
        Self {
            right: Vec3::X,
            up: Vec3::Y,
            back: Vec3::Z,
        }
    }

    /// Rotates a world-space vector into listener space.
    pub fn to_listener_space(&self, v: Vec3) -> Vec3 {
        Vec3::new(v.dot(self.right), v.dot(self.up), v.dot(self.back))
    }
}

impl Default for ListenerBasis {
    fn default() -> Self {
        Self::identity()
    }
}

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_orientation_keeps_vectors() {
        let basis = ListenerBasis::from_orientation(-Vec3::Z, Vec3::Y);
        let v = Vec3::new(1.0, 2.0, -3.0);
        let out = basis.to_listener_space(v);
        assert!((out - v).length() < 1e-6);
    }

    #[test]
    fn facing_right_moves_right_side_to_front() {
        // Listener looks down +X, so a point at +X ends up straight ahead.
        let basis = ListenerBasis::from_orientation(Vec3::X, Vec3::Y);
        let out = basis.to_listener_space(Vec3::new(5.0, 0.0, 0.0));
        assert!((out - Vec3::new(0.0, 0.0, -5.0)).length() < 1e-5);
    }

    #[test]
    fn degenerate_orientation_falls_back_to_identity() {
        let basis = ListenerBasis::from_orientation(Vec3::Y, Vec3::Y);
        assert_eq!(basis, ListenerBasis::identity());
    }
}
