//! aural-dsp: DSP building blocks for the Aural renderer
//!
//! ## Core modules
//! - `codec` - storage-format decode to float, device-format encode
//! - `resampler` - fixed-point cursor resampling (point/linear/cubic/bsinc)
//! - `biquad` - RBJ cookbook biquads, transposed direct form II
//! - `splitter` - all-pass-preserving two-band crossover
//! - `smoothing` - linear gain ramps for click-free parameter changes
//!
//! ## Effect processors
//! One module per effect kind under `effects/`; each is a plain struct
//! processing planar f32 blocks with no allocation after construction.

pub mod biquad;
pub mod codec;
pub mod effects;
pub mod resampler;
pub mod smoothing;
pub mod splitter;

pub use biquad::{BiquadFilter, BiquadType};
pub use codec::{decode_to_float, encode_from_float, OutputType};
pub use resampler::{Resampler, ResamplerKind, RESAMPLER_PADDING};
pub use smoothing::GainRamp;
pub use splitter::BandSplitter;
