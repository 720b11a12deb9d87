//! CAN transport layer: frame representation, 11/29-bit identifiers, ISO-TP
//! segmentation and reassembly, and link abstraction traits.
//!
//! ## ISO-TP timing constants
//!
//! Separation-time values as carried in the third byte of a flow-control frame.

pub mod can_frame;
pub mod can_id;
pub mod isotp;
pub mod traits;

/// Largest separation time expressible in milliseconds (`STmin` 0x7F).
///
/// Reserved `STmin` encodings are interpreted as this value, the most
/// conservative pacing a receiver can ask for.
pub const MAX_SEPARATION_MS: u64 = 127;

/// First `STmin` byte of the sub-millisecond range (`0xF1` = 100 µs).
pub const ST_MIN_MICROS_FIRST: u8 = 0xF1;

/// Last `STmin` byte of the sub-millisecond range (`0xF9` = 900 µs).
pub const ST_MIN_MICROS_LAST: u8 = 0xF9;
