use serde::Serialize;

use crate::prtls::ParticleState;

/// Transverse state at the observation point.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct Observation {
    pub x: f64,
    pub y: f64,
    pub sx: f64,
    pub sy: f64,
}

/// Projects a state known at `z` back to `target < z` along straight
/// lines. Only valid when no element acts between the two points.
pub fn extrapolate(x: f64, y: f64, z: f64, sx: f64, sy: f64, target: f64) -> Observation {
    let dz = z - target;
    Observation {
        x: x - sx * dz,
        y: y - sy * dz,
        sx,
        sy,
    }
}

/// Returns the observation once the particle has passed `target`.
pub fn observe(state: &ParticleState, target: f64) -> Option<Observation> {
    if state.z > target {
        Some(extrapolate(
            state.x, state.y, state.z, state.sx, state.sy, target,
        ))
    } else {
        None
    }
}
