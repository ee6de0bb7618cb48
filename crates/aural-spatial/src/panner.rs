//! Device decode matrices and channel-direction maps
//!
//! The dry bus is ambisonic; this module turns it back into loudspeaker
//! feeds with a sampling decoder using max-rE order weights, and supplies
//! the per-channel directions used when panning multichannel buffers.

use aural_core::{acn_order, AmbiNorm, AmbiOrder, BufferLayout, DeviceLayout, Speaker};

use crate::ambisonics::{calc_ambi_coeffs, MAX_AMBI_CHANNELS};
use crate::position::Vec3;

/// Max-rE weights per component order, indexed by decode order.
fn order_weights(order: AmbiOrder) -> [f32; 4] {
    match order {
        AmbiOrder::First => [1.0, 0.5774, 0.0, 0.0],
        AmbiOrder::Second => [1.0, 0.7746, 0.4, 0.0],
        AmbiOrder::Third => [1.0, 0.8611, 0.6123, 0.3057],
    }
}

/// Listener-space unit direction for a loudspeaker azimuth in degrees
/// (0 front, positive right, horizontal plane).
fn azimuth_dir(az_degrees: f32) -> Vec3 {
    let az = az_degrees.to_radians();
    Vec3::new(az.sin(), 0.0, -az.cos())
}

/// Ambisonic-to-speaker decode matrix for a device layout.
#[derive(Debug, Clone)]
pub struct DecodeMatrix {
    /// rows[output_channel][acn]
    rows: Vec<[f32; MAX_AMBI_CHANNELS]>,
    ambi_channels: usize,
}

impl DecodeMatrix {
    pub fn new(layout: DeviceLayout, order: AmbiOrder) -> Self {
        Self::with_norm(layout, order, AmbiNorm::Sn3d)
    }

    /// Builds the matrix with an explicit output normalization; only the
    /// ambisonic passthrough layout is affected (the mix bus is SN3D).
    pub fn with_norm(layout: DeviceLayout, order: AmbiOrder, norm: AmbiNorm) -> Self {
        let ambi_channels = order.channel_count();
        match layout {
            DeviceLayout::Ambisonic(_) => {
                // Passthrough: each output channel is one ACN channel,
                // rescaled to the requested normalization.
                let mut rows = Vec::with_capacity(ambi_channels);
                for acn in 0..ambi_channels {
                    let mut row = [0.0f32; MAX_AMBI_CHANNELS];
                    row[acn] = norm.scale_from_sn3d(acn_order(acn));
                    rows.push(row);
                }
                Self {
                    rows,
                    ambi_channels,
                }
            }
            DeviceLayout::Mono => {
                // W only.
                let mut row = [0.0f32; MAX_AMBI_CHANNELS];
                row[0] = 1.0;
                Self {
                    rows: vec![row],
                    ambi_channels,
                }
            }
            _ => {
                let speakers = layout.speakers();
                let directional = speakers.iter().filter(|s| !s.is_lfe()).count().max(1);
                let weights = order_weights(order);
                let mut rows = Vec::with_capacity(speakers.len());
                for speaker in speakers {
                    let mut row = [0.0f32; MAX_AMBI_CHANNELS];
                    if !speaker.is_lfe() {
                        let mut coeffs = [0.0f32; MAX_AMBI_CHANNELS];
                        calc_ambi_coeffs(azimuth_dir(speaker.azimuth()), 0.0, &mut coeffs);
                        for (acn, r) in row.iter_mut().enumerate().take(ambi_channels) {
                            let n = aural_core::acn_order(acn);
                            *r = coeffs[acn] * (2 * n + 1) as f32 * weights[n]
                                / directional as f32;
                        }
                    }
                    rows.push(row);
                }
                Self {
                    rows,
                    ambi_channels,
                }
            }
        }
    }

    pub fn output_channels(&self) -> usize {
        self.rows.len()
    }

    /// Decodes the ambisonic dry bus into per-speaker feeds.
    ///
    /// `dry` holds one buffer per ACN channel; `out` one buffer per output
    /// channel. Output buffers are overwritten.
    pub fn decode(&self, out: &mut [Vec<f32>], dry: &[Vec<f32>], frames: usize) {
        for out_buf in out.iter_mut() {
            out_buf[..frames].fill(0.0);
        }
        self.decode_add(out, dry, frames);
    }

    /// Like `decode`, but sums into the output buffers so other paths
    /// (binaural, dedicated routing) can write first.
    pub fn decode_add(&self, out: &mut [Vec<f32>], dry: &[Vec<f32>], frames: usize) {
        for (row, out_buf) in self.rows.iter().zip(out.iter_mut()) {
            for (acn, &gain) in row.iter().enumerate().take(self.ambi_channels) {
                if gain.abs() < 1e-9 {
                    continue;
                }
                let src = &dry[acn][..frames];
                for (o, &s) in out_buf[..frames].iter_mut().zip(src.iter()) {
                    *o += s * gain;
                }
            }
        }
    }

    /// Decode gain row for one output channel.
    pub fn row(&self, channel: usize) -> &[f32; MAX_AMBI_CHANNELS] {
        &self.rows[channel]
    }
}

/// Listener-space directions for each channel of a loudspeaker-mapped
/// buffer layout, used to pan multichannel content. B-format layouts have
/// no directions (their channels are ambisonic components).
pub fn channel_directions(layout: BufferLayout) -> &'static [Option<Speaker>] {
    use Speaker::*;
    match layout {
        BufferLayout::Mono => &[Some(FrontCenter)],
        BufferLayout::Stereo => &[Some(FrontLeft), Some(FrontRight)],
        BufferLayout::Rear => &[Some(BackLeft), Some(BackRight)],
        BufferLayout::Quad => &[
            Some(FrontLeft),
            Some(FrontRight),
            Some(BackLeft),
            Some(BackRight),
        ],
        BufferLayout::Surround51 => &[
            Some(FrontLeft),
            Some(FrontRight),
            Some(FrontCenter),
            None, // LFE
            Some(SideLeft),
            Some(SideRight),
        ],
        BufferLayout::Surround61 => &[
            Some(FrontLeft),
            Some(FrontRight),
            Some(FrontCenter),
            None,
            Some(BackCenter),
            Some(SideLeft),
            Some(SideRight),
        ],
        BufferLayout::Surround71 => &[
            Some(FrontLeft),
            Some(FrontRight),
            Some(FrontCenter),
            None,
            Some(BackLeft),
            Some(BackRight),
            Some(SideLeft),
            Some(SideRight),
        ],
        BufferLayout::BFormat2D | BufferLayout::BFormat3D => &[],
    }
}

/// Direction of a speaker-mapped channel in listener space.
pub fn speaker_direction(speaker: Speaker) -> Vec3 {
    azimuth_dir(speaker.azimuth())
}

/// Maps stereo-pan angles to listener-space directions for the two
/// channels of a stereo source.
#[derive(Debug, Clone, Copy)]
pub struct StereoPanner {
    /// Pan angles in radians, positive left (the usual convention for
    /// stereo-angle extensions); defaults are +-30 degrees.
    pub angles: [f32; 2],
}

impl Default for StereoPanner {
    fn default() -> Self {
        Self {
            angles: [
                30.0f32.to_radians(),
                -30.0f32.to_radians(),
            ],
        }
    }
}

impl StereoPanner {
    /// Listener-space direction for one channel.
    pub fn direction(&self, channel: usize) -> Vec3 {
        let angle = self.angles[channel.min(1)];
        // Positive angle pans left.
        Vec3::new(-angle.sin(), 0.0, -angle.cos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dry_with_source(dir: Vec3, order: AmbiOrder, frames: usize) -> Vec<Vec<f32>> {
        let mut coeffs = [0.0f32; MAX_AMBI_CHANNELS];
        calc_ambi_coeffs(dir, 0.0, &mut coeffs);
        (0..order.channel_count())
            .map(|acn| vec![coeffs[acn]; frames])
            .collect()
    }

    #[test]
    fn test_stereo_front_is_symmetric() {
        let matrix = DecodeMatrix::new(DeviceLayout::Stereo, AmbiOrder::First);
        let dry = dry_with_source(Vec3::new(0.0, 0.0, -1.0), AmbiOrder::First, 8);
        let mut out = vec![vec![0.0f32; 8]; 2];
        matrix.decode(&mut out, &dry, 8);
        for i in 0..8 {
            assert!((out[0][i] - out[1][i]).abs() < 1e-6);
        }
        assert!(out[0][0] > 0.0);
    }

    #[test]
    fn test_stereo_right_source_favors_right() {
        let matrix = DecodeMatrix::new(DeviceLayout::Stereo, AmbiOrder::First);
        let dry = dry_with_source(Vec3::new(1.0, 0.0, 0.0), AmbiOrder::First, 4);
        let mut out = vec![vec![0.0f32; 4]; 2];
        matrix.decode(&mut out, &dry, 4);
        assert!(
            out[1][0] > out[0][0] + 0.1,
            "left {} right {}",
            out[0][0],
            out[1][0]
        );
    }

    #[test]
    fn test_lfe_row_is_silent() {
        let matrix = DecodeMatrix::new(DeviceLayout::Surround51, AmbiOrder::First);
        assert!(matrix.row(3).iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_ambisonic_passthrough() {
        let matrix = DecodeMatrix::new(
            DeviceLayout::Ambisonic(AmbiOrder::First),
            AmbiOrder::First,
        );
        assert_eq!(matrix.output_channels(), 4);
        let dry: Vec<Vec<f32>> = (0..4).map(|i| vec![i as f32; 2]).collect();
        let mut out = vec![vec![0.0f32; 2]; 4];
        matrix.decode(&mut out, &dry, 2);
        for (i, ch) in out.iter().enumerate() {
            assert_eq!(ch[0], i as f32);
        }
    }

    #[test]
    fn test_mono_takes_omni_only() {
        let matrix = DecodeMatrix::new(DeviceLayout::Mono, AmbiOrder::First);
        let dry = dry_with_source(Vec3::new(1.0, 0.0, 0.0), AmbiOrder::First, 2);
        let mut out = vec![vec![0.0f32; 2]; 1];
        matrix.decode(&mut out, &dry, 2);
        assert!((out[0][0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_panner_defaults() {
        let panner = StereoPanner::default();
        let left = panner.direction(0);
        let right = panner.direction(1);
        assert!(left.x < 0.0 && right.x > 0.0);
        assert!(left.z < 0.0 && right.z < 0.0);
    }
}
