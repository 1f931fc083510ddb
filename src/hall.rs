//! Hall sensor pattern decoding.
//!
//! The pattern to step mapping depends on how the sensors are wired on the
//! board, so it lives in a table rather than being computed.

/// Commutation step for each 3-bit Hall pattern. `None` marks the patterns
/// where no sensor or every sensor is active, which a healthy motor never
/// produces.
const HALL_TO_STEP: [Option<u8>; 8] = [
    None,    // 000
    Some(2), // 001
    Some(4), // 010
    Some(3), // 011
    Some(0), // 100
    Some(1), // 101
    Some(5), // 110
    None,    // 111
];

/// Decode a Hall pattern into a commutation step in [0..5].
/// Bits above the low three are ignored.
pub fn decode(hall_abc: u8) -> Option<u8> {
    HALL_TO_STEP[(hall_abc & 0b111) as usize]
}
