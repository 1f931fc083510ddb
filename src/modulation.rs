use core::{
    f32::consts::PI,
    ops::{Add, Mul},
};

use libm::sinf;

use crate::util::{wrap_angle, Vector};

const SECTOR_ANGLE: f32 = PI / 3.;

/// Duty cycles per phase, [0..1]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseDuties {
    pub a: f32,
    pub b: f32,
    pub c: f32,
}

impl PhaseDuties {
    pub fn new(a: f32, b: f32, c: f32) -> Self {
        PhaseDuties { a, b, c }
    }
}

impl Add for PhaseDuties {
    type Output = PhaseDuties;
    fn add(self, rhs: Self) -> Self::Output {
        PhaseDuties {
            a: self.a + rhs.a,
            b: self.b + rhs.b,
            c: self.c + rhs.c,
        }
    }
}

impl Mul<f32> for PhaseDuties {
    type Output = PhaseDuties;
    fn mul(self, rhs: f32) -> Self::Output {
        PhaseDuties {
            a: self.a * rhs,
            b: self.b * rhs,
            c: self.c * rhs,
        }
    }
}

/// Six-step energization table, (high side phase, low side phase) per
/// step. The remaining phase floats.
const SIX_STEP: [(usize, usize); 6] = [(0, 1), (0, 2), (1, 2), (1, 0), (2, 0), (2, 1)];

/// Index of the phase left floating in `step`, 0 => A, 1 => B, 2 => C
pub fn floating_phase(step: u8) -> usize {
    let (high, low) = SIX_STEP[(step % 6) as usize];
    3 - high - low
}

/// Block commutation duties. The high side phase is switched at
/// `fraction`, the low side is held at zero and the floating phase is
/// reported as zero (its gates are expected to be off).
pub fn six_step(step: u8, fraction: f32) -> PhaseDuties {
    let (high, _) = SIX_STEP[(step % 6) as usize];
    let fraction = fraction.clamp(0., 1.);
    match high {
        0 => PhaseDuties::new(fraction, 0., 0.),
        1 => PhaseDuties::new(0., fraction, 0.),
        _ => PhaseDuties::new(0., 0., fraction),
    }
}

/// Space vector sector [0..5] containing `angle` in radians
pub fn sector_of(angle: f32) -> u8 {
    // A wrap around to 6 is possible due to floating point rounding
    ((wrap_angle(angle) / SECTOR_ANGLE) as u8) % 6
}

/// Active switching vectors bounding each sector
const ACTIVE_VECTORS: [PhaseDuties; 6] = [
    PhaseDuties { a: 1., b: 0., c: 0. },
    PhaseDuties { a: 1., b: 1., c: 0. },
    PhaseDuties { a: 0., b: 1., c: 0. },
    PhaseDuties { a: 0., b: 1., c: 1. },
    PhaseDuties { a: 0., b: 0., c: 1. },
    PhaseDuties { a: 1., b: 0., c: 1. },
];

/// Implements centre-aligned Space Vector (Pulse-Width) modulation.
/// A magnitude of 1 reaches the edge of the linear region.
pub fn space_vector_modulation(vector: Vector) -> PhaseDuties {
    if vector.magnitude > 1. {
        log::warn!("Space Vector saturated driver, magnitude: {}", vector.magnitude)
    }
    let Vector {
        magnitude, phase, ..
    } = vector.clamped_magnitude(1.);
    let sector = sector_of(phase);
    let within = wrap_angle(phase) - sector as f32 * SECTOR_ANGLE;

    // Dwell times of the two adjacent active vectors, normalized to the
    // period. At unit magnitude they sum to one mid-sector.
    let leading = magnitude * sinf(SECTOR_ANGLE - within);
    let trailing = magnitude * sinf(within);
    // Split the zero vector time evenly between 000 and 111
    let zero = (1. - leading - trailing).max(0.) / 2.;

    let duties = ACTIVE_VECTORS[sector as usize] * leading
        + ACTIVE_VECTORS[(sector as usize + 1) % 6] * trailing
        + PhaseDuties::new(zero, zero, zero);
    PhaseDuties::new(
        duties.a.clamp(0., 1.),
        duties.b.clamp(0., 1.),
        duties.c.clamp(0., 1.),
    )
}
