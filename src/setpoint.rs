//! Throttle to setpoint mapping.
use crate::config::{ControlMode, SetpointScaling};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setpoint {
    /// Mechanical RPM, sign selects direction
    Velocity { rpm: f32 },
    /// Phase amps, sign selects direction
    Torque { current_a: f32 },
}

impl Setpoint {
    pub fn value(&self) -> f32 {
        match *self {
            Setpoint::Velocity { rpm } => rpm,
            Setpoint::Torque { current_a } => current_a,
        }
    }
}

/// `throttle` is expected in [-1..1]
pub fn resolve(mode: ControlMode, scaling: &SetpointScaling, throttle: f32) -> Setpoint {
    match mode {
        ControlMode::Velocity => Setpoint::Velocity {
            rpm: throttle * scaling.max_velocity_rpm,
        },
        ControlMode::Torque => Setpoint::Torque {
            current_a: throttle * scaling.max_torque_current_a,
        },
    }
}
