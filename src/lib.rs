//! Control core of a brushless DC motor electronic speed controller.
//!
//! An [`EscController`] takes a throttle command and motor state samples and,
//! once per tick, produces an [`InverterCommand`] while latching safety faults.
#![no_std]
pub mod commutation;
pub mod config;
pub mod esc;
pub mod fault;
pub mod feedback;
pub mod hall;
pub mod modulation;
pub mod motor;
pub mod pid;
pub mod setpoint;
mod util;

pub use config::{
    BoardLimits, CommutationMethod, ConfigError, ControlMode, EscConfig, EscLimits,
    FeedbackMechanism, Gains, SensorlessConfig, SetpointScaling,
};
pub use esc::{EscController, InverterCommand};
pub use fault::FaultFlags;
pub use motor::{MotorConfig, MotorState, PhaseCurrents};
pub use util::Vector;

#[cfg(test)]
mod tests {

    use crate::{
        BoardLimits, CommutationMethod, ControlMode, EscConfig, EscController, EscLimits,
        FaultFlags, FeedbackMechanism, InverterCommand, MotorConfig, MotorState, PhaseCurrents,
        SetpointScaling,
    };

    fn init_logs() {
        let _ = env_logger::builder()
            .is_test(true)
            .filter_level(log::LevelFilter::Debug)
            .try_init();
    }

    fn provisional_config() -> EscConfig {
        EscConfig::new(
            MotorConfig::new(7),
            EscLimits {
                max_phase_current_a: 0.,
                max_temp_c: 75.,
                vbus_uvlo_v: 0.,
                vbus_ovlo_v: 0.,
                max_duty: 2000.,
            },
        )
    }

    fn board() -> BoardLimits {
        BoardLimits {
            max_phase_current_a: 40.,
            max_temp_c: 100.,
            vbus_floor_v: 6.,
            vbus_ceiling_v: 60.,
            max_duty: 1.,
        }
    }

    fn config() -> EscConfig {
        let mut config = EscConfig::new(
            MotorConfig::new(7),
            EscLimits {
                max_phase_current_a: 30.,
                max_temp_c: 80.,
                vbus_uvlo_v: 10.,
                vbus_ovlo_v: 50.,
                max_duty: 0.9,
            },
        );
        config.set_scaling(SetpointScaling {
            max_velocity_rpm: 6000.,
            max_torque_current_a: 20.,
        });
        config
    }

    fn nominal() -> MotorState {
        MotorState {
            currents: PhaseCurrents::new(2., -2., 0.),
            vbus_v: 24.,
            temperature_c: 35.,
            hall_abc: 0b100,
            hall_timestamp_us: 0,
        }
    }

    fn running() -> EscController {
        let mut esc = EscController::new(board());
        esc.init(&config()).unwrap();
        esc.set_motor_state(&nominal());
        esc.set_throttle(1.);
        esc.step(100);
        esc
    }

    #[test]
    fn init_with_provisional_limits() {
        init_logs();

        let mut esc = EscController::default();
        assert!(esc.init(&provisional_config()).is_ok());
        assert!(esc.is_initialized());
        assert!(!esc.is_faulted());
        assert_eq!(
            esc.inverter_cmd(),
            InverterCommand {
                enable: false,
                duty: 0.,
                commutation_step: 0,
                electrical_angle: 0.,
            }
        );
    }

    #[test]
    fn overtemperature_disables_output() {
        init_logs();

        let mut esc = EscController::default();
        esc.init(&provisional_config()).unwrap();
        esc.set_motor_state(&MotorState {
            temperature_c: 80.,
            hall_abc: 0b101,
            ..MotorState::default()
        });
        esc.step(100);

        assert!(esc.fault_flags().contains(FaultFlags::OVERTEMP));
        assert!(!esc.inverter_cmd().enable);
    }

    #[test]
    fn throttle_is_clamped_before_setpoint() {
        init_logs();

        let mut esc = EscController::new(board());
        esc.init(&config()).unwrap();
        esc.set_throttle(1.5);
        assert_eq!(esc.throttle(), 1.);
        esc.set_motor_state(&nominal());
        esc.step(100);
        assert_eq!(esc.velocity_setpoint_rpm(), 6000.);

        esc.set_throttle(-3.);
        assert_eq!(esc.throttle(), -1.);
        esc.set_throttle(0.37);
        assert_eq!(esc.throttle(), 0.37);
    }

    #[test]
    fn nominal_operation_drives_inverter() {
        init_logs();

        let esc = running();
        let command = esc.inverter_cmd();
        assert!(command.enable);
        assert!(command.duty > 0. && command.duty <= 0.9);
        assert_eq!(command.commutation_step, 0);
    }

    #[test]
    fn zero_throttle_stops_next_step() {
        init_logs();

        let mut esc = running();
        esc.set_throttle(0.);
        esc.step(100);
        assert_eq!(esc.velocity_setpoint_rpm(), 0.);
        assert_eq!(esc.inverter_cmd().duty, 0.);
    }

    #[test]
    fn inactive_setpoint_is_untouched() {
        init_logs();

        let mut esc = EscController::new(board());
        let mut torque = config();
        torque.set_control_mode(ControlMode::Torque);
        esc.init(&torque).unwrap();
        esc.set_motor_state(&nominal());
        esc.set_throttle(0.5);
        esc.step(100);
        assert_eq!(esc.torque_setpoint_a(), 10.);
        assert_eq!(esc.velocity_setpoint_rpm(), 0.);
    }

    #[test]
    fn faults_latch_until_reset() {
        init_logs();

        let mut esc = running();
        esc.set_motor_state(&MotorState {
            currents: PhaseCurrents::new(35., -35., 0.),
            ..nominal()
        });
        esc.step(100);
        assert_eq!(esc.fault_flags(), FaultFlags::OVERCURRENT);

        // Condition clears, fault stays and keeps vetoing the output
        esc.set_motor_state(&nominal());
        for _ in 0..10 {
            esc.step(100);
            assert_eq!(esc.fault_flags(), FaultFlags::OVERCURRENT);
            assert!(!esc.inverter_cmd().enable);
            assert_eq!(esc.inverter_cmd().duty, 0.);
        }

        esc.reset();
        assert_eq!(esc.fault_flags().bits(), 0);
        esc.set_throttle(1.);
        esc.step(100);
        assert!(esc.inverter_cmd().enable);
    }

    #[test]
    fn faults_accumulate() {
        init_logs();

        let mut esc = running();
        esc.set_motor_state(&MotorState {
            vbus_v: 5.,
            ..nominal()
        });
        esc.step(100);
        esc.set_motor_state(&MotorState {
            temperature_c: 90.,
            ..nominal()
        });
        esc.step(100);
        assert_eq!(esc.fault_flags(), FaultFlags::UVLO | FaultFlags::OVERTEMP);
    }

    #[test]
    fn fault_vetoes_the_same_tick() {
        init_logs();

        let mut esc = running();
        esc.set_motor_state(&MotorState {
            vbus_v: 55.,
            ..nominal()
        });
        esc.step(100);
        assert!(esc.fault_flags().contains(FaultFlags::OVLO));
        assert!(!esc.inverter_cmd().enable);
        assert_eq!(esc.inverter_cmd().duty, 0.);
    }

    #[test]
    fn invalid_hall_faults_in_sensored_mode_only() {
        init_logs();

        let mut esc = running();
        esc.set_motor_state(&MotorState {
            hall_abc: 0b111,
            ..nominal()
        });
        esc.step(100);
        assert_eq!(esc.fault_flags(), FaultFlags::HALL_INVALID);
        // Commutation did not advance
        assert_eq!(esc.inverter_cmd().commutation_step, 0);

        let mut sensorless = config();
        sensorless.set_feedback_mechanism(FeedbackMechanism::Sensorless);
        let mut esc = EscController::new(board());
        esc.init(&sensorless).unwrap();
        esc.set_motor_state(&MotorState {
            hall_abc: 0,
            ..nominal()
        });
        esc.step(100);
        assert!(!esc.is_faulted());
    }

    #[test]
    fn reset_is_idempotent() {
        init_logs();

        let snapshot = |esc: &EscController| {
            (
                esc.throttle(),
                esc.velocity_setpoint_rpm(),
                esc.torque_setpoint_a(),
                esc.speed_rpm(),
                esc.fault_flags(),
                esc.inverter_cmd(),
            )
        };

        let mut esc = running();
        esc.set_motor_state(&MotorState {
            temperature_c: 95.,
            ..nominal()
        });
        esc.step(100);
        esc.reset();
        let once = snapshot(&esc);
        esc.reset();
        assert_eq!(snapshot(&esc), once);
        assert_eq!(once.4, FaultFlags::NONE);
        assert_eq!(once.5, InverterCommand::DISABLED);
        assert!(esc.config().is_some());
    }

    #[test]
    fn rejected_config_leaves_controller_uninitialized() {
        init_logs();

        let mut esc = EscController::new(board());
        let mut too_hot = config();
        too_hot.limits.max_temp_c = 150.;
        assert!(esc.init(&too_hot).is_err());
        assert!(!esc.is_initialized());

        esc.set_throttle(1.);
        esc.set_motor_state(&nominal());
        esc.step(100);
        assert_eq!(esc.throttle(), 0.);
        assert_eq!(esc.inverter_cmd(), InverterCommand::DISABLED);
        assert_eq!(esc.fault_flags(), FaultFlags::NONE);
        assert!(esc.motor_state().is_none());

        // A later rejection also drops a previously adopted config
        esc.init(&config()).unwrap();
        assert!(esc.init(&too_hot).is_err());
        assert!(esc.config().is_none());
    }

    #[test]
    fn reset_before_init_is_ignored() {
        init_logs();

        let mut esc = EscController::new(board());
        esc.reset();
        assert!(!esc.is_initialized());
        assert_eq!(esc.fault_flags(), FaultFlags::NONE);
        assert_eq!(esc.inverter_cmd(), InverterCommand::DISABLED);
    }

    #[test]
    fn nan_throttle_stops() {
        init_logs();

        let mut esc = running();
        esc.set_throttle(f32::NAN);
        assert_eq!(esc.throttle(), 0.);
        esc.step(100);
        assert_eq!(esc.velocity_setpoint_rpm(), 0.);
        assert_eq!(esc.inverter_cmd().duty, 0.);
    }

    #[test]
    fn zero_dt_is_ignored() {
        init_logs();

        let mut esc = EscController::new(board());
        esc.init(&config()).unwrap();
        esc.set_motor_state(&MotorState {
            temperature_c: 95.,
            ..nominal()
        });
        esc.step(0);
        assert!(!esc.is_faulted());
    }

    #[test]
    fn reverse_throttle_flips_commutation() {
        init_logs();

        let mut esc = EscController::new(board());
        esc.init(&config()).unwrap();
        esc.set_motor_state(&nominal());
        esc.set_throttle(-0.5);
        esc.step(100);
        assert_eq!(esc.velocity_setpoint_rpm(), -3000.);
        assert_eq!(esc.inverter_cmd().commutation_step, 3);
    }

    #[test]
    fn field_oriented_output() {
        init_logs();

        let mut foc = config();
        foc.set_commutation_method(CommutationMethod::FieldOriented);
        let mut esc = EscController::new(board());
        esc.init(&foc).unwrap();
        esc.set_motor_state(&nominal());
        esc.set_throttle(1.);
        esc.step(100);

        let command = esc.inverter_cmd();
        assert!(command.enable);
        let duties = command.phase_duties(CommutationMethod::FieldOriented, 0.9);
        log::debug!("Calculated phase duties: {:?}", duties);
        for duty in [duties.a, duties.b, duties.c] {
            assert!((0. ..=1.).contains(&duty));
        }
    }

    #[test]
    fn controllers_are_independent() {
        init_logs();

        let mut first = running();
        let second = running();
        first.set_motor_state(&MotorState {
            temperature_c: 95.,
            ..nominal()
        });
        first.step(100);
        assert!(first.is_faulted());
        assert!(!second.is_faulted());
    }
}
