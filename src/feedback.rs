//! Rotor position and speed estimation from motor state samples.
//!
//! Sensored operation decodes the Hall pattern and times the transitions
//! between sectors. Sensorless operation watches the floating phase of the
//! active six-step sector for back-EMF zero crossings and commutates 30
//! electrical degrees after each one.
use core::f32::consts::{PI, TAU};

use libm::fabsf;

use crate::commutation::Direction;
use crate::config::{EscConfig, FeedbackMechanism};
use crate::hall;
use crate::modulation::floating_phase;
use crate::motor::MotorState;
use crate::util::{elapsed_us, wrap_angle};

const SECTOR_ANGLE: f32 = PI / 3.;

/// Output of one estimator update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feedback {
    /// Electrical sector the rotor is in, [0..5]
    pub sector: u8,
    /// Radians, [0..2PI)
    pub electrical_angle: f32,
    /// Mechanical speed, signed by direction of rotation
    pub speed_rpm: f32,
    /// False when this tick's Hall pattern could not be decoded
    pub hall_valid: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct BemfTracker {
    // Sign of the floating phase signal at the previous tick
    last_positive: Option<bool>,
    // Largest floating phase magnitude since the last commutation
    peak: f32,
    // Set once a crossing has been timed against a previous one
    seen_crossing: bool,
    // Time left until the scheduled commutation
    commutate_in_us: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct FeedbackEstimator {
    mechanism: FeedbackMechanism,
    pole_pairs: u8,
    stall_timeout_us: u32,
    bemf_noise_floor_a: f32,
    sector: Option<u8>,
    speed_rpm: f32,
    // Timestamp of the last Hall transition that was timed
    last_edge_us: Option<u32>,
    // Tick time accumulated since the last Hall edge or BEMF crossing
    since_edge_us: u32,
    // Tick time accumulated since the rotor entered the current sector
    in_sector_us: u32,
    bemf: BemfTracker,
}

impl FeedbackEstimator {
    pub fn new(config: &EscConfig) -> Self {
        FeedbackEstimator {
            mechanism: config.feedback_mechanism,
            pole_pairs: config.motor.pole_pairs,
            stall_timeout_us: config.stall_timeout_us,
            bemf_noise_floor_a: config.sensorless.bemf_noise_floor_a,
            sector: None,
            speed_rpm: 0.,
            last_edge_us: None,
            since_edge_us: 0,
            in_sector_us: 0,
            bemf: BemfTracker::default(),
        }
    }

    pub fn reset(&mut self) {
        self.sector = None;
        self.speed_rpm = 0.;
        self.last_edge_us = None;
        self.since_edge_us = 0;
        self.in_sector_us = 0;
        self.bemf = BemfTracker::default();
    }

    pub fn speed_rpm(&self) -> f32 {
        self.speed_rpm
    }

    /// `direction` is the drive direction commanded on the previous tick,
    /// used to advance the sector in sensorless operation.
    pub fn update(&mut self, sample: &MotorState, dt_us: u32, direction: Direction) -> Feedback {
        self.since_edge_us = self.since_edge_us.saturating_add(dt_us);
        self.in_sector_us = self.in_sector_us.saturating_add(dt_us);

        let hall_valid = match self.mechanism {
            FeedbackMechanism::Sensored => self.update_sensored(sample),
            FeedbackMechanism::Sensorless => {
                self.update_sensorless(sample, dt_us, direction);
                true
            }
        };

        if self.since_edge_us > self.stall_timeout_us && self.speed_rpm != 0. {
            log::debug!("No transition for {} us, rotor stalled", self.since_edge_us);
            self.speed_rpm = 0.;
        }

        let sector = self.sector.unwrap_or(0);
        Feedback {
            sector,
            electrical_angle: self.electrical_angle(sector),
            speed_rpm: self.speed_rpm,
            hall_valid,
        }
    }

    fn update_sensored(&mut self, sample: &MotorState) -> bool {
        let step = match hall::decode(sample.hall_abc) {
            Some(step) => step,
            None => {
                log::debug!("Invalid Hall pattern: {:#05b}", sample.hall_abc);
                return false;
            }
        };

        match self.sector {
            Some(previous) if previous != step => {
                if let Some(last_edge_us) = self.last_edge_us {
                    if sample.hall_timestamp_us != last_edge_us {
                        let interval = elapsed_us(last_edge_us, sample.hall_timestamp_us);
                        match (step + 6 - previous) % 6 {
                            1 => self.speed_rpm = self.rpm_from_interval(interval),
                            5 => self.speed_rpm = -self.rpm_from_interval(interval),
                            // A skipped sector can't be timed
                            delta => log::debug!("Hall skipped {} sectors", delta - 1),
                        }
                    }
                }
                log::trace!("Hall edge: {} -> {}", previous, step);
                self.last_edge_us = Some(sample.hall_timestamp_us);
                self.since_edge_us = 0;
                self.in_sector_us = 0;
            }
            Some(_) => {}
            None => {
                self.last_edge_us = Some(sample.hall_timestamp_us);
                self.since_edge_us = 0;
                self.in_sector_us = 0;
            }
        }
        self.sector = Some(step);
        true
    }

    fn update_sensorless(&mut self, sample: &MotorState, dt_us: u32, direction: Direction) {
        let sector = *self.sector.get_or_insert(0);

        if let Some(remaining) = self.bemf.commutate_in_us {
            if remaining <= dt_us {
                let next = direction.advance(sector);
                log::trace!("BEMF commutation: {} -> {}", sector, next);
                self.sector = Some(next);
                self.in_sector_us = 0;
                self.bemf.commutate_in_us = None;
                // A new phase floats from here on
                self.bemf.last_positive = None;
                self.bemf.peak = 0.;
            } else {
                self.bemf.commutate_in_us = Some(remaining - dt_us);
            }
            return;
        }

        let signal = sample.currents.phase(floating_phase(sector));
        if !signal.is_finite() {
            return;
        }
        self.bemf.peak = self.bemf.peak.max(fabsf(signal));
        if self.bemf.peak < self.bemf_noise_floor_a {
            // Too little back-EMF to tell a crossing from noise
            return;
        }

        let positive = signal >= 0.;
        let crossed = matches!(self.bemf.last_positive, Some(last) if last != positive);
        self.bemf.last_positive = Some(positive);
        if !crossed {
            return;
        }

        let interval = self.since_edge_us;
        self.since_edge_us = 0;
        if self.bemf.seen_crossing && interval > 0 {
            // Crossings are one sector apart
            self.speed_rpm = direction.sign() * self.rpm_from_interval(interval);
            self.bemf.commutate_in_us = Some(interval / 2);
        } else {
            self.bemf.commutate_in_us = Some(0);
        }
        self.bemf.seen_crossing = true;
    }

    fn rpm_from_interval(&self, sector_interval_us: u32) -> f32 {
        // Six sectors per electrical revolution, `pole_pairs` electrical
        // revolutions per mechanical revolution
        60E6 / (sector_interval_us as f32 * 6. * self.pole_pairs as f32)
    }

    /// Sector centre at standstill. While turning, the boundary the rotor
    /// entered through, advanced by the time spent in the sector at the
    /// current speed, never leaving the sector.
    fn electrical_angle(&self, sector: u8) -> f32 {
        if self.speed_rpm == 0. {
            return wrap_angle((sector as f32 + 0.5) * SECTOR_ANGLE);
        }
        let electrical_rad_s = fabsf(self.speed_rpm) * (TAU / 60.) * self.pole_pairs as f32;
        let advance =
            (electrical_rad_s * self.in_sector_us as f32 * 1E-6).clamp(0., SECTOR_ANGLE);
        if self.speed_rpm > 0. {
            wrap_angle(sector as f32 * SECTOR_ANGLE + advance)
        } else {
            wrap_angle((sector as f32 + 1.) * SECTOR_ANGLE - advance)
        }
    }
}
