//! Controller configuration and the startup validation gate.
use thiserror::Error;

use crate::motor::MotorConfig;
use crate::pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Throttle maps to a mechanical speed target
    Velocity,
    /// Throttle maps to a phase current target
    Torque,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommutationMethod {
    /// Six-step block commutation
    Trapezoidal,
    FieldOriented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackMechanism {
    /// Hall effect sensors
    Sensored,
    /// Back-EMF zero crossing detection
    Sensorless,
}

/// Runtime limits enforced by the limit monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscLimits {
    pub max_phase_current_a: f32,
    pub max_temp_c: f32,
    /// Undervoltage lockout threshold
    pub vbus_uvlo_v: f32,
    /// Overvoltage lockout threshold
    pub vbus_ovlo_v: f32,
    /// Full scale of `InverterCommand::duty`
    pub max_duty: f32,
}

/// Absolute ceilings of the power stage. A configuration may be stricter
/// than these, never looser.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardLimits {
    pub max_phase_current_a: f32,
    pub max_temp_c: f32,
    /// Lowest undervoltage lockout the board accepts
    pub vbus_floor_v: f32,
    /// Highest overvoltage lockout the board accepts
    pub vbus_ceiling_v: f32,
    pub max_duty: f32,
}

impl BoardLimits {
    /// Every ceiling must be a finite number for the comparisons in
    /// `EscConfig::validate` to mean anything
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("max_phase_current_a", self.max_phase_current_a),
            ("max_temp_c", self.max_temp_c),
            ("vbus_floor_v", self.vbus_floor_v),
            ("vbus_ceiling_v", self.vbus_ceiling_v),
            ("max_duty", self.max_duty),
        ];
        match fields.iter().find(|(_, value)| !value.is_finite()) {
            Some(&(field, value)) => Err(ConfigError::InvalidBoard { field, value }),
            None => Ok(()),
        }
    }

    /// Provisional board values. Current and voltage ceilings are not yet
    /// characterized and sit at zero; duty is in microseconds of pulse width.
    pub const PROVISIONAL: BoardLimits = BoardLimits {
        max_phase_current_a: 0.,
        max_temp_c: 75.,
        vbus_floor_v: 0.,
        vbus_ceiling_v: 0.,
        max_duty: 2000.,
    };
}

impl Default for BoardLimits {
    fn default() -> Self {
        BoardLimits::PROVISIONAL
    }
}

/// Full-scale setpoints reached at a throttle of +/-1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetpointScaling {
    pub max_velocity_rpm: f32,
    pub max_torque_current_a: f32,
}

/// Loop constants. Both loops output a drive fraction in [-1..1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gains {
    /// RPM error -> drive fraction
    pub velocity: pid::Constants,
    /// Amp error -> drive fraction, on top of the torque feed-forward
    pub current: pid::Constants,
}

impl Default for Gains {
    fn default() -> Self {
        Gains {
            velocity: pid::Constants::new(1E-3, 5E-3, 0., 100.),
            current: pid::Constants::new(5E-2, 1., 0., 0.5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorlessConfig {
    /// Amps. Floating phase signals with a smaller peak are treated as noise.
    pub bemf_noise_floor_a: f32,
}

impl Default for SensorlessConfig {
    fn default() -> Self {
        SensorlessConfig {
            bemf_noise_floor_a: 5E-2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be finite and non-negative, was {value}")]
    InvalidLimit { field: &'static str, value: f32 },
    #[error("board {field} must be finite, was {value}")]
    InvalidBoard { field: &'static str, value: f32 },
    #[error("max phase current {configured} A exceeds board ceiling {ceiling} A")]
    PhaseCurrentAboveBoard { configured: f32, ceiling: f32 },
    #[error("max temperature {configured} C exceeds board ceiling {ceiling} C")]
    TemperatureAboveBoard { configured: f32, ceiling: f32 },
    #[error("undervoltage lockout {configured} V is below board floor {floor} V")]
    UvloBelowBoard { configured: f32, floor: f32 },
    #[error("overvoltage lockout {configured} V exceeds board ceiling {ceiling} V")]
    OvloAboveBoard { configured: f32, ceiling: f32 },
    #[error("max duty {configured} exceeds board ceiling {ceiling}")]
    DutyAboveBoard { configured: f32, ceiling: f32 },
    #[error("undervoltage lockout {uvlo} V is above overvoltage lockout {ovlo} V")]
    LockoutOrder { uvlo: f32, ovlo: f32 },
    #[error("motor must have at least one pole pair")]
    ZeroPolePairs,
    #[error("torque scale {scale} A exceeds max phase current {limit} A")]
    TorqueScaleAboveLimit { scale: f32, limit: f32 },
    #[error("invalid {0} loop constants")]
    InvalidGains(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscConfig {
    pub control_mode: ControlMode,
    pub commutation_method: CommutationMethod,
    pub feedback_mechanism: FeedbackMechanism,
    pub limits: EscLimits,
    pub motor: MotorConfig,
    pub scaling: SetpointScaling,
    pub gains: Gains,
    pub sensorless: SensorlessConfig,
    /// Microseconds without a Hall transition before the rotor counts as stopped
    pub stall_timeout_us: u32,
}

impl EscConfig {
    /// Velocity control, trapezoidal commutation and Hall feedback.
    /// Torque scaling defaults to the phase current limit.
    pub fn new(motor: MotorConfig, limits: EscLimits) -> Self {
        EscConfig {
            control_mode: ControlMode::Velocity,
            commutation_method: CommutationMethod::Trapezoidal,
            feedback_mechanism: FeedbackMechanism::Sensored,
            limits,
            motor,
            scaling: SetpointScaling {
                max_velocity_rpm: 10_000.,
                max_torque_current_a: limits.max_phase_current_a,
            },
            gains: Gains::default(),
            sensorless: SensorlessConfig::default(),
            stall_timeout_us: 500_000,
        }
    }
    pub fn set_control_mode(&mut self, control_mode: ControlMode) -> &mut Self {
        self.control_mode = control_mode;
        self
    }
    pub fn set_commutation_method(&mut self, commutation_method: CommutationMethod) -> &mut Self {
        self.commutation_method = commutation_method;
        self
    }
    pub fn set_feedback_mechanism(&mut self, feedback_mechanism: FeedbackMechanism) -> &mut Self {
        self.feedback_mechanism = feedback_mechanism;
        self
    }
    pub fn set_scaling(&mut self, scaling: SetpointScaling) -> &mut Self {
        self.scaling = scaling;
        self
    }
    pub fn set_gains(&mut self, gains: Gains) -> &mut Self {
        self.gains = gains;
        self
    }
    pub fn set_sensorless(&mut self, sensorless: SensorlessConfig) -> &mut Self {
        self.sensorless = sensorless;
        self
    }
    pub fn set_stall_timeout_us(&mut self, stall_timeout_us: u32) -> &mut Self {
        self.stall_timeout_us = stall_timeout_us;
        self
    }

    /// Check the configuration against the board ceilings and its own
    /// consistency rules. Returns the first violation found.
    pub fn validate(&self, board: &BoardLimits) -> Result<(), ConfigError> {
        board.validate()?;

        let EscLimits {
            max_phase_current_a,
            max_temp_c,
            vbus_uvlo_v,
            vbus_ovlo_v,
            max_duty,
        } = self.limits;

        non_negative("max_phase_current_a", max_phase_current_a)?;
        if !max_temp_c.is_finite() {
            return Err(ConfigError::InvalidLimit {
                field: "max_temp_c",
                value: max_temp_c,
            });
        }
        non_negative("vbus_uvlo_v", vbus_uvlo_v)?;
        non_negative("vbus_ovlo_v", vbus_ovlo_v)?;
        non_negative("max_duty", max_duty)?;

        if max_phase_current_a > board.max_phase_current_a {
            return Err(ConfigError::PhaseCurrentAboveBoard {
                configured: max_phase_current_a,
                ceiling: board.max_phase_current_a,
            });
        }
        if max_temp_c > board.max_temp_c {
            return Err(ConfigError::TemperatureAboveBoard {
                configured: max_temp_c,
                ceiling: board.max_temp_c,
            });
        }
        if vbus_uvlo_v < board.vbus_floor_v {
            return Err(ConfigError::UvloBelowBoard {
                configured: vbus_uvlo_v,
                floor: board.vbus_floor_v,
            });
        }
        if vbus_ovlo_v > board.vbus_ceiling_v {
            return Err(ConfigError::OvloAboveBoard {
                configured: vbus_ovlo_v,
                ceiling: board.vbus_ceiling_v,
            });
        }
        if max_duty > board.max_duty {
            return Err(ConfigError::DutyAboveBoard {
                configured: max_duty,
                ceiling: board.max_duty,
            });
        }
        if vbus_uvlo_v > vbus_ovlo_v {
            return Err(ConfigError::LockoutOrder {
                uvlo: vbus_uvlo_v,
                ovlo: vbus_ovlo_v,
            });
        }

        if self.motor.pole_pairs == 0 {
            return Err(ConfigError::ZeroPolePairs);
        }

        non_negative("max_velocity_rpm", self.scaling.max_velocity_rpm)?;
        non_negative("max_torque_current_a", self.scaling.max_torque_current_a)?;
        if self.scaling.max_torque_current_a > max_phase_current_a {
            return Err(ConfigError::TorqueScaleAboveLimit {
                scale: self.scaling.max_torque_current_a,
                limit: max_phase_current_a,
            });
        }

        if !self.gains.velocity.is_valid() {
            return Err(ConfigError::InvalidGains("velocity"));
        }
        if !self.gains.current.is_valid() {
            return Err(ConfigError::InvalidGains("current"));
        }
        non_negative("bemf_noise_floor_a", self.sensorless.bemf_noise_floor_a)?;

        Ok(())
    }
}

fn non_negative(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0. {
        Ok(())
    } else {
        Err(ConfigError::InvalidLimit { field, value })
    }
}
