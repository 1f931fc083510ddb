//! Measured motor state and per-motor constants.
use libm::fabsf;

/// Amps
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseCurrents {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl PhaseCurrents {
    pub fn new(a: f32, b: f32, c: f32) -> Self {
        PhaseCurrents { a, b, c }
    }

    /// Phase current by index, 0 => A, 1 => B, 2 => C
    pub fn phase(&self, index: usize) -> f32 {
        match index % 3 {
            0 => self.a,
            1 => self.b,
            _ => self.c,
        }
    }

    /// Largest magnitude across the three phases. NaN if any phase is NaN.
    pub fn max_magnitude(&self) -> f32 {
        if self.a.is_nan() || self.b.is_nan() || self.c.is_nan() {
            return f32::NAN;
        }
        fabsf(self.a).max(fabsf(self.b)).max(fabsf(self.c))
    }
}

/// A sample of the motor as seen by the peripheral drivers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorState {
    pub currents: PhaseCurrents,
    /// DC bus voltage from the battery pack
    pub vbus_v: f32,
    pub temperature_c: f32,
    /// 3-bit Hall state, bit 2 = A, bit 1 = B, bit 0 = C
    pub hall_abc: u8,
    /// Microseconds, wrapping allowed. Time of the last Hall transition.
    pub hall_timestamp_us: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorConfig {
    pub pole_pairs: u8,
}

impl MotorConfig {
    pub fn new(pole_pairs: u8) -> Self {
        MotorConfig { pole_pairs }
    }
}
