use crate::math::{ListenerBasis, Vec3};

/// The single point of audition in a context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Listener {
    pub position: Vec3,
    pub velocity: Vec3,
    /// "At" vector
    pub forward: Vec3,
    pub up: Vec3,
    /// Master gain applied to every source in the context
    pub gain: f32,
    /// World units per meter, used for air absorption
    pub meters_per_unit: f32,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            forward: -Vec3::Z,
            up: Vec3::Y,
            gain: 1.0,
            meters_per_unit: 1.0,
        }
    }
}

impl Listener {
    pub fn basis(&self) -> ListenerBasis {
        ListenerBasis::from_orientation(self.forward, self.up)
    }
}
