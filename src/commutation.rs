//! Commutation sequencing and drive magnitude.
//!
//! The sequencer turns the resolved setpoint and this tick's feedback into a
//! drive fraction in [0..1], a direction, and either a six-step index or a
//! stator-frame drive angle.
use core::f32::consts::FRAC_PI_2;

use libm::{cosf, fabsf, sinf, sqrtf};

use crate::config::{CommutationMethod, EscConfig};
use crate::feedback::Feedback;
use crate::modulation::sector_of;
use crate::motor::{MotorState, PhaseCurrents};
use crate::pid::Pid;
use crate::setpoint::Setpoint;
use crate::util::Vector;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    /// Reverse for negative values, forward otherwise
    pub fn of(value: f32) -> Self {
        if value < 0. {
            Direction::Reverse
        } else {
            Direction::Forward
        }
    }
    pub fn sign(self) -> f32 {
        match self {
            Direction::Forward => 1.,
            Direction::Reverse => -1.,
        }
    }
    /// Next electrical sector when rotating this way
    pub fn advance(self, sector: u8) -> u8 {
        match self {
            Direction::Forward => (sector + 1) % 6,
            Direction::Reverse => (sector + 5) % 6,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ClarkeCurrent {
    alpha: f32,
    beta: f32,
}

impl From<PhaseCurrents> for ClarkeCurrent {
    fn from(currents: PhaseCurrents) -> Self {
        ClarkeCurrent {
            alpha: currents.a,
            beta: 1. / sqrtf(3.) * (currents.b - currents.c),
        }
    }
}

/// Quadrature (torque producing) current in the rotor frame, `angle` in
/// electrical radians
fn quadrature_current(currents: PhaseCurrents, angle: f32) -> f32 {
    let clarke = ClarkeCurrent::from(currents);
    -sinf(angle) * clarke.alpha + cosf(angle) * clarke.beta
}

/// What the sequencer wants energized this tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Commutation {
    /// Six-step index, or the space vector sector of `electrical_angle`
    pub step: u8,
    /// Stator-frame drive angle in radians. Zero for trapezoidal drive.
    pub electrical_angle: f32,
    /// Drive magnitude, [0..1]
    pub drive: f32,
    pub direction: Direction,
}

#[derive(Debug, Clone)]
pub struct Sequencer {
    method: CommutationMethod,
    max_torque_current_a: f32,
    // Speed -> drive fraction
    velocity_pid: Pid,
    // Current -> drive fraction
    current_pid: Pid,
    last: Commutation,
}

impl Sequencer {
    pub fn new(config: &EscConfig) -> Self {
        Sequencer {
            method: config.commutation_method,
            max_torque_current_a: config.scaling.max_torque_current_a,
            velocity_pid: Pid::new(config.gains.velocity),
            current_pid: Pid::new(config.gains.current),
            last: Commutation::default(),
        }
    }

    pub fn reset(&mut self) {
        self.velocity_pid.reset();
        self.current_pid.reset();
        self.last = Commutation::default();
    }

    /// Direction commanded on the most recent update
    pub fn direction(&self) -> Direction {
        self.last.direction
    }

    pub fn update(
        &mut self,
        setpoint: Setpoint,
        feedback: &Feedback,
        sample: &MotorState,
        dt_us: u32,
    ) -> Commutation {
        let dt = dt_us as f32 * 1E-6;
        let target = setpoint.value();

        let (direction, drive) = if target == 0. {
            // Explicit stop, not coast. Loops restart from rest.
            self.velocity_pid.reset();
            self.current_pid.reset();
            (self.last.direction, 0.)
        } else {
            let direction = Direction::of(target);
            let demand = match setpoint {
                Setpoint::Velocity { rpm } => {
                    direction.sign() * self.velocity_pid.update(feedback.speed_rpm, rpm, dt)
                }
                Setpoint::Torque { current_a } => {
                    let measured = self.torque_current(feedback, sample, direction);
                    let feed_forward = if self.max_torque_current_a > 0. {
                        fabsf(current_a) / self.max_torque_current_a
                    } else {
                        0.
                    };
                    feed_forward + self.current_pid.update(measured, fabsf(current_a), dt)
                }
            };
            (direction, if demand.is_finite() { demand.clamp(0., 1.) } else { 0. })
        };

        let commutation = if !feedback.hall_valid {
            // No trustworthy position, keep energizing what we had
            Commutation {
                drive,
                direction,
                ..self.last
            }
        } else {
            match self.method {
                CommutationMethod::Trapezoidal => Commutation {
                    step: match direction {
                        Direction::Forward => feedback.sector,
                        // Opposite polarity of the same sector
                        Direction::Reverse => (feedback.sector + 3) % 6,
                    },
                    electrical_angle: 0.,
                    drive,
                    direction,
                },
                CommutationMethod::FieldOriented => {
                    // Drive along the quadrature axis, leading or trailing the rotor
                    let vector = Vector::new(drive, feedback.electrical_angle)
                        .rotated(direction.sign() * FRAC_PI_2);
                    Commutation {
                        step: sector_of(vector.phase),
                        electrical_angle: vector.phase,
                        drive,
                        direction,
                    }
                }
            }
        };

        log::trace!("Commutation: {:?}", commutation);
        self.last = commutation;
        commutation
    }

    /// Magnitude of the torque producing current, positive when it pushes
    /// in `direction`
    fn torque_current(
        &self,
        feedback: &Feedback,
        sample: &MotorState,
        direction: Direction,
    ) -> f32 {
        match self.method {
            // Only one phase pair conducts, so the largest phase current is
            // the winding current
            CommutationMethod::Trapezoidal => sample.currents.max_magnitude(),
            CommutationMethod::FieldOriented => {
                direction.sign() * quadrature_current(sample.currents, feedback.electrical_angle)
            }
        }
    }
}
