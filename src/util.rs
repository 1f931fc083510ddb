use core::f32::consts::{PI, TAU};

use libm::{fabsf, fmodf};

/// A polar vector in the stator-fixed frame. Used for FOC drive commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vector {
    pub magnitude: f32,
    /// Radians, always in [0..2PI)
    pub phase: f32,
    // Block construction so magnitude and phase invariants can be upheld
    _private: (),
}

impl Vector {
    /// A negative magnitude is folded into the phase.
    pub fn new(magnitude: f32, phase: f32) -> Vector {
        Vector {
            magnitude: fabsf(magnitude),
            phase: wrap_angle(if magnitude.is_sign_positive() {
                phase
            } else {
                phase + PI
            }),
            _private: (),
        }
    }
    pub fn clamped_magnitude(self, limit: f32) -> Self {
        Vector {
            magnitude: self.magnitude.clamp(0., limit),
            ..self
        }
    }
    pub fn rotated(self, angle: f32) -> Self {
        Vector {
            phase: wrap_angle(self.phase + angle),
            ..self
        }
    }
}

impl Default for Vector {
    fn default() -> Self {
        Vector::new(0., 0.)
    }
}

/// Re-range an angle in radians to [0..2PI)
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = fmodf(angle, TAU);
    let wrapped = if wrapped < 0. { wrapped + TAU } else { wrapped };
    // Rounding can land exactly on 2PI after the correction
    if wrapped >= TAU {
        0.
    } else {
        wrapped
    }
}

/// Microseconds elapsed between two wrapping `u32` timestamps
pub fn elapsed_us(earlier: u32, later: u32) -> u32 {
    later.wrapping_sub(earlier)
}
