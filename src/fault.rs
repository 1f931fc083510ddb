//! Latching fault flags and the per-tick limit monitor.
use core::fmt;
use core::ops::{BitOr, BitOrAssign};

use crate::config::EscLimits;
use crate::motor::MotorState;

/// Set of fault conditions. Flags only accumulate through `union`; the
/// controller clears them exclusively on reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FaultFlags(u32);

impl FaultFlags {
    pub const NONE: FaultFlags = FaultFlags(0);
    pub const UVLO: FaultFlags = FaultFlags(1 << 0);
    pub const OVLO: FaultFlags = FaultFlags(1 << 1);
    pub const OVERTEMP: FaultFlags = FaultFlags(1 << 2);
    pub const OVERCURRENT: FaultFlags = FaultFlags(1 << 3);
    pub const HALL_INVALID: FaultFlags = FaultFlags(1 << 4);

    const ALL: [(FaultFlags, &'static str); 5] = [
        (FaultFlags::UVLO, "UVLO"),
        (FaultFlags::OVLO, "OVLO"),
        (FaultFlags::OVERTEMP, "OVERTEMP"),
        (FaultFlags::OVERCURRENT, "OVERCURRENT"),
        (FaultFlags::HALL_INVALID, "HALL_INVALID"),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
    /// True if every flag in `other` is set
    pub fn contains(self, other: FaultFlags) -> bool {
        self.0 & other.0 == other.0
    }
    pub fn union(self, other: FaultFlags) -> FaultFlags {
        FaultFlags(self.0 | other.0)
    }
    /// Flags set in `self` but not in `other`
    pub fn difference(self, other: FaultFlags) -> FaultFlags {
        FaultFlags(self.0 & !other.0)
    }
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl BitOr for FaultFlags {
    type Output = FaultFlags;
    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl BitOrAssign for FaultFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Display for FaultFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut first = true;
        for (flag, name) in FaultFlags::ALL {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Conditions violated by `sample` this tick. Comparisons are written so a
/// NaN reading trips its fault.
pub fn check_limits(limits: &EscLimits, sample: &MotorState, hall_invalid: bool) -> FaultFlags {
    let mut faults = FaultFlags::NONE;

    if !(sample.currents.max_magnitude() <= limits.max_phase_current_a) {
        faults |= FaultFlags::OVERCURRENT;
    }
    if !(sample.temperature_c <= limits.max_temp_c) {
        faults |= FaultFlags::OVERTEMP;
    }
    if !(sample.vbus_v >= limits.vbus_uvlo_v) {
        faults |= FaultFlags::UVLO;
    }
    if !(sample.vbus_v <= limits.vbus_ovlo_v) {
        faults |= FaultFlags::OVLO;
    }
    if hall_invalid {
        faults |= FaultFlags::HALL_INVALID;
    }

    faults
}
