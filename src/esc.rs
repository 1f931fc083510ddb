//! The ESC controller: configuration, runtime state and the per-tick pipeline.
use crate::commutation::{Commutation, Sequencer};
use crate::config::{BoardLimits, CommutationMethod, ConfigError, EscConfig, FeedbackMechanism};
use crate::fault::{self, FaultFlags};
use crate::feedback::FeedbackEstimator;
use crate::modulation::{self, PhaseDuties};
use crate::motor::MotorState;
use crate::setpoint::{self, Setpoint};
use crate::util::Vector;

/// Command for the three-phase inverter, produced once per tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InverterCommand {
    pub enable: bool,
    /// In units of `EscLimits::max_duty`, [0..max_duty]
    pub duty: f32,
    /// Six-step index [0..5]. For FOC, the space vector sector of
    /// `electrical_angle`.
    pub commutation_step: u8,
    /// Stator-frame drive angle in radians, FOC only
    pub electrical_angle: f32,
}

impl InverterCommand {
    pub const DISABLED: InverterCommand = InverterCommand {
        enable: false,
        duty: 0.,
        commutation_step: 0,
        electrical_angle: 0.,
    };

    /// Per-phase duty fractions for the PWM peripheral. All zero while
    /// disabled.
    pub fn phase_duties(&self, method: CommutationMethod, max_duty: f32) -> PhaseDuties {
        if !self.enable || !(max_duty > 0.) {
            return PhaseDuties::default();
        }
        let fraction = (self.duty / max_duty).clamp(0., 1.);
        match method {
            CommutationMethod::Trapezoidal => modulation::six_step(self.commutation_step, fraction),
            CommutationMethod::FieldOriented => {
                modulation::space_vector_modulation(Vector::new(fraction, self.electrical_angle))
            }
        }
    }
}

/// Output composer. Any fault forces the inverter off.
fn compose(commutation: &Commutation, faults: FaultFlags, max_duty: f32) -> InverterCommand {
    if !faults.is_empty() {
        return InverterCommand {
            commutation_step: commutation.step,
            ..InverterCommand::DISABLED
        };
    }
    InverterCommand {
        enable: true,
        duty: (commutation.drive * max_duty).clamp(0., max_duty),
        commutation_step: commutation.step,
        electrical_angle: commutation.electrical_angle,
    }
}

/// State that only exists once a configuration has been adopted
#[derive(Debug, Clone)]
struct Runtime {
    config: EscConfig,
    motor_state: MotorState,
    inverter_cmd: InverterCommand,
    throttle: f32,
    velocity_setpoint_rpm: f32,
    torque_setpoint_a: f32,
    speed_rpm: f32,
    faults: FaultFlags,
    estimator: FeedbackEstimator,
    sequencer: Sequencer,
}

impl Runtime {
    fn new(config: EscConfig) -> Self {
        Runtime {
            config,
            motor_state: MotorState::default(),
            inverter_cmd: InverterCommand::DISABLED,
            throttle: 0.,
            velocity_setpoint_rpm: 0.,
            torque_setpoint_a: 0.,
            speed_rpm: 0.,
            faults: FaultFlags::NONE,
            estimator: FeedbackEstimator::new(&config),
            sequencer: Sequencer::new(&config),
        }
    }

    fn reset(&mut self) {
        self.inverter_cmd = InverterCommand::DISABLED;
        self.throttle = 0.;
        self.velocity_setpoint_rpm = 0.;
        self.torque_setpoint_a = 0.;
        self.speed_rpm = 0.;
        self.faults.clear();
        self.estimator.reset();
        self.sequencer.reset();
    }

    fn step(&mut self, dt_us: u32) {
        let config = self.config;

        let feedback = self
            .estimator
            .update(&self.motor_state, dt_us, self.sequencer.direction());
        self.speed_rpm = feedback.speed_rpm;

        let setpoint = setpoint::resolve(config.control_mode, &config.scaling, self.throttle);
        match setpoint {
            Setpoint::Velocity { rpm } => self.velocity_setpoint_rpm = rpm,
            Setpoint::Torque { current_a } => self.torque_setpoint_a = current_a,
        }

        let commutation = self
            .sequencer
            .update(setpoint, &feedback, &self.motor_state, dt_us);

        let hall_invalid =
            config.feedback_mechanism == FeedbackMechanism::Sensored && !feedback.hall_valid;
        let tripped = fault::check_limits(&config.limits, &self.motor_state, hall_invalid);
        let latched = tripped.difference(self.faults);
        if !latched.is_empty() {
            log::error!("Fault latched: {}, sample: {:?}", latched, self.motor_state);
        }
        self.faults |= tripped;

        self.inverter_cmd = compose(&commutation, self.faults, config.limits.max_duty);
        log::debug!(
            "Setpoint: {:?}, speed: {} rpm, output: {:?}",
            setpoint,
            self.speed_rpm,
            self.inverter_cmd
        );
    }
}

/// Controller for one motor. Calls made before a successful `init` are
/// ignored and accessors report a disabled, fault-free controller.
#[derive(Debug, Clone)]
pub struct EscController {
    board: BoardLimits,
    runtime: Option<Runtime>,
}

impl EscController {
    /// An uninitialized controller for a board with the given ceilings
    pub fn new(board: BoardLimits) -> Self {
        EscController {
            board,
            runtime: None,
        }
    }

    /// Validate and adopt `config`, starting from zeroed runtime state.
    /// A rejected configuration leaves the controller uninitialized.
    pub fn init(&mut self, config: &EscConfig) -> Result<(), ConfigError> {
        if let Err(err) = config.validate(&self.board) {
            log::warn!("Rejected configuration: {}", err);
            self.runtime = None;
            return Err(err);
        }
        log::info!(
            "Initialized: {:?} control, {:?} commutation, {:?} feedback",
            config.control_mode,
            config.commutation_method,
            config.feedback_mechanism
        );
        self.runtime = Some(Runtime::new(*config));
        Ok(())
    }

    /// Clear throttle, setpoints, estimates and latched faults. The
    /// configuration is kept.
    pub fn reset(&mut self) {
        match self.runtime.as_mut() {
            Some(runtime) => {
                log::info!("Reset, clearing faults: {}", runtime.faults);
                runtime.reset();
            }
            None => log::warn!("Reset ignored, controller not initialized"),
        }
    }

    /// Clamped to [-1..1]. NaN is taken as a stop.
    pub fn set_throttle(&mut self, throttle: f32) {
        match self.runtime.as_mut() {
            Some(runtime) => {
                runtime.throttle = if throttle.is_nan() {
                    log::warn!("NaN throttle, stopping");
                    0.
                } else {
                    throttle.clamp(-1., 1.)
                };
            }
            None => log::warn!("Throttle ignored, controller not initialized"),
        }
    }

    pub fn set_motor_state(&mut self, sample: &MotorState) {
        match self.runtime.as_mut() {
            Some(runtime) => runtime.motor_state = *sample,
            None => log::debug!("Motor state ignored, controller not initialized"),
        }
    }

    /// Run one control tick. `dt_us` is the time since the previous tick.
    pub fn step(&mut self, dt_us: u32) {
        match self.runtime.as_mut() {
            Some(runtime) if dt_us > 0 => runtime.step(dt_us),
            Some(_) => log::trace!("Zero length tick skipped"),
            None => log::trace!("Step ignored, controller not initialized"),
        }
    }

    pub fn inverter_cmd(&self) -> InverterCommand {
        self.runtime
            .as_ref()
            .map_or(InverterCommand::DISABLED, |runtime| runtime.inverter_cmd)
    }

    pub fn is_faulted(&self) -> bool {
        !self.fault_flags().is_empty()
    }

    pub fn fault_flags(&self) -> FaultFlags {
        self.runtime
            .as_ref()
            .map_or(FaultFlags::NONE, |runtime| runtime.faults)
    }

    pub fn is_initialized(&self) -> bool {
        self.runtime.is_some()
    }

    pub fn config(&self) -> Option<&EscConfig> {
        self.runtime.as_ref().map(|runtime| &runtime.config)
    }

    pub fn board(&self) -> &BoardLimits {
        &self.board
    }

    pub fn throttle(&self) -> f32 {
        self.runtime.as_ref().map_or(0., |runtime| runtime.throttle)
    }

    pub fn velocity_setpoint_rpm(&self) -> f32 {
        self.runtime
            .as_ref()
            .map_or(0., |runtime| runtime.velocity_setpoint_rpm)
    }

    pub fn torque_setpoint_a(&self) -> f32 {
        self.runtime
            .as_ref()
            .map_or(0., |runtime| runtime.torque_setpoint_a)
    }

    /// Estimated mechanical speed
    pub fn speed_rpm(&self) -> f32 {
        self.runtime.as_ref().map_or(0., |runtime| runtime.speed_rpm)
    }

    /// Last motor state sample handed to the controller
    pub fn motor_state(&self) -> Option<&MotorState> {
        self.runtime.as_ref().map(|runtime| &runtime.motor_state)
    }
}

impl Default for EscController {
    fn default() -> Self {
        EscController::new(BoardLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_vetoes_on_fault() {
        let commutation = Commutation {
            step: 3,
            drive: 1.,
            ..Commutation::default()
        };
        let command = compose(&commutation, FaultFlags::OVLO, 100.);
        assert!(!command.enable);
        assert_eq!(command.duty, 0.);
    }

    #[test]
    fn compose_scales_and_clamps_duty() {
        let commutation = Commutation {
            step: 2,
            drive: 0.25,
            ..Commutation::default()
        };
        let command = compose(&commutation, FaultFlags::NONE, 2000.);
        assert!(command.enable);
        assert_eq!(command.duty, 500.);
        assert_eq!(command.commutation_step, 2);

        let over = Commutation {
            drive: 3.,
            ..commutation
        };
        assert_eq!(compose(&over, FaultFlags::NONE, 2000.).duty, 2000.);
    }

    #[test]
    fn disabled_command_has_no_phase_duties() {
        assert_eq!(
            InverterCommand::DISABLED.phase_duties(CommutationMethod::FieldOriented, 1.),
            PhaseDuties::default()
        );
    }

    #[test]
    fn trapezoidal_phase_duties() {
        let command = InverterCommand {
            enable: true,
            duty: 1000.,
            commutation_step: 3,
            electrical_angle: 0.,
        };
        assert_eq!(
            command.phase_duties(CommutationMethod::Trapezoidal, 2000.),
            PhaseDuties::new(0., 0.5, 0.)
        );
    }
}
