//! aural-core: Shared types and utilities for the Aural renderer
//!
//! This crate provides the foundational types used across all Aural crates:
//! the sample alias, channel layouts, storage formats, ambisonic
//! bookkeeping, and the handle-API error taxonomy.

mod ambi;
mod channels;
mod error;
mod format;
mod math;
mod sample;

pub use ambi::*;
pub use channels::*;
pub use error::*;
pub use format::*;
pub use math::*;
pub use sample::*;

/// Fractional bits of the fixed-point resampling cursor.
pub const FRACTION_BITS: u32 = 12;

/// One whole sample step in fixed-point cursor units.
pub const FRACTION_ONE: u32 = 1 << FRACTION_BITS;

/// Mask extracting the fractional part of a fixed-point cursor.
pub const FRACTION_MASK: u32 = FRACTION_ONE - 1;

/// Upper bound on the pitch step, in whole samples per output sample.
///
/// Keeps the per-update input requirement bounded regardless of the
/// requested pitch and doppler shift.
pub const MAX_PITCH: u32 = 255;

/// Largest number of channels any dry bus can carry.
pub const MAX_OUTPUT_CHANNELS: usize = 16;

/// Gain below which a mixing path is treated as silent (-100 dB).
pub const SILENCE_THRESHOLD_GAIN: f32 = 0.00001;
