//! aural-spatial: spatialization math for the Aural renderer
//!
//! - `position` - 3-vectors and the listener-relative transform
//! - `ambisonics` - ACN/SN3D coefficient computation with spread
//! - `panner` - device decode matrices and channel-direction maps
//! - `hrtf` - synthetic head-related impulse responses for headphones
//! - `nfc` - near-field compensation filters for ambisonic channels
//!
//! Coordinate convention follows the usual 3D-audio model: listener space
//! has +X right, +Y up, -Z forward. Ambisonic math uses the ACN channel
//! ordering with SN3D normalization, +X front, +Y left, +Z up.

pub mod ambisonics;
pub mod hrtf;
pub mod nfc;
pub mod panner;
pub mod position;

pub use ambisonics::{apply_norm, calc_ambi_coeffs, truncate_to_order, MAX_AMBI_CHANNELS};
pub use hrtf::{Hrir, HrtfTable, HRIR_LENGTH, HRTF_HISTORY};
pub use nfc::NfcFilter;
pub use panner::{channel_directions, speaker_direction, DecodeMatrix, StereoPanner};
pub use position::{ListenerBasis, Vec3};
