//! Distortion: 4x-oversampled waveshaper with pre-gain and band filters

use aural_core::clampf;

use crate::biquad::{BiquadFilter, BiquadType};

/// Distortion parameters.
#[derive(Debug, Clone, Copy)]
pub struct DistortionParams {
    /// Shape hardness, 0..1.
    pub edge: f32,
    /// Output gain, 0.01..1.
    pub gain: f32,
    /// Post-shape low-pass cutoff in Hz.
    pub lowpass_cutoff: f32,
    /// Center of the post-shape band-pass emphasis in Hz.
    pub eq_center: f32,
    /// Bandwidth of the emphasis in Hz.
    pub eq_bandwidth: f32,
}

impl Default for DistortionParams {
    fn default() -> Self {
        Self {
            edge: 0.2,
            gain: 0.05,
            lowpass_cutoff: 8000.0,
            eq_center: 3600.0,
            eq_bandwidth: 3600.0,
        }
    }
}

const OVERSAMPLE: usize = 4;

/// Distortion state. The shaper runs at 4x the device rate with the
/// filters tuned against the oversampled rate, which keeps the folding
/// products of the nonlinearity out of the audible band.
pub struct Distortion {
    edge_coeff: f32,
    gain: f32,
    lowpass: BiquadFilter,
    bandpass: BiquadFilter,
    sample_rate: u32,
}

impl Distortion {
    pub fn new(sample_rate: u32) -> Self {
        let mut state = Self {
            edge_coeff: 0.0,
            gain: 0.05,
            lowpass: BiquadFilter::new(),
            bandpass: BiquadFilter::new(),
            sample_rate,
        };
        state.set_params(&DistortionParams::default());
        state
    }

    pub fn device_update(&mut self, sample_rate: u32, _max_frames: usize) {
        self.sample_rate = sample_rate;
        self.lowpass.clear();
        self.bandpass.clear();
    }

    pub fn set_params(&mut self, params: &DistortionParams) {
        // Fold the edge into a shaper coefficient; 1.0 would divide by
        // zero at full drive.
        let edge = clampf(params.edge, 0.0, 1.0).min(0.99);
        self.edge_coeff = 2.0 * edge / (1.0 - edge);
        self.gain = clampf(params.gain, 0.01, 1.0);

        let over_rate = (self.sample_rate as usize * OVERSAMPLE) as f32;
        let cutoff = clampf(params.lowpass_cutoff, 80.0, 24000.0);
        // Bandwidth scaling keeps the design stable at the oversampled rate.
        let bw = (cutoff / 2.0) / (cutoff * 0.67);
        self.lowpass.set_params(
            BiquadType::LowPass,
            1.0,
            cutoff / over_rate,
            BiquadFilter::rcp_q_from_bandwidth(cutoff / over_rate, bw),
        );

        let center = clampf(params.eq_center, 80.0, 24000.0);
        let bandwidth = clampf(params.eq_bandwidth, 80.0, 24000.0);
        let bw = bandwidth / (center * 0.67);
        self.bandpass.set_params(
            BiquadType::BandPass,
            1.0,
            center / over_rate,
            BiquadFilter::rcp_q_from_bandwidth(center / over_rate, bw),
        );
    }

    pub fn process(&mut self, input: &[f32], out_left: &mut [f32], out_right: &mut [f32]) {
        for i in 0..input.len() {
            let mut wet = 0.0;
            // Zero-stuffed 4x oversampling; the low-pass doubles as the
            // interpolation filter.
            for step in 0..OVERSAMPLE {
                let x = if step == 0 { input[i] * OVERSAMPLE as f32 } else { 0.0 };

                // Soft clip: x * (1 + k) / (1 + k * |x|).
                let shaped =
                    x * (1.0 + self.edge_coeff) / (1.0 + self.edge_coeff * x.abs());

                let filtered = self.lowpass.process_one(shaped);
                wet = self.bandpass.process_one(filtered);
            }
            let wet = wet * self.gain;
            out_left[i] = wet;
            out_right[i] = wet;
        }
    }

    pub fn clear(&mut self) {
        self.lowpass.clear();
        self.bandpass.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_is_bounded() {
        let mut dist = Distortion::new(44100);
        dist.set_params(&DistortionParams {
            edge: 0.9,
            gain: 1.0,
            ..DistortionParams::default()
        });
        let input: Vec<f32> = (0..1024)
            .map(|i| (std::f32::consts::TAU * 0.01 * i as f32).sin() * 2.0)
            .collect();
        let mut left = vec![0.0f32; 1024];
        let mut right = vec![0.0f32; 1024];
        dist.process(&input, &mut left, &mut right);
        for &s in &left {
            assert!(s.abs() < 8.0);
        }
    }

    #[test]
    fn test_drive_adds_harmonics() {
        // A driven sine should no longer be a pure tone: compare the
        // crest factor against the clean input.
        let mut dist = Distortion::new(44100);
        dist.set_params(&DistortionParams {
            edge: 0.95,
            gain: 1.0,
            lowpass_cutoff: 20000.0,
            eq_center: 3600.0,
            eq_bandwidth: 3600.0,
        });
        let input: Vec<f32> = (0..4096)
            .map(|i| (std::f32::consts::TAU * 0.02 * i as f32).sin())
            .collect();
        let mut left = vec![0.0f32; 4096];
        let mut right = vec![0.0f32; 4096];
        dist.process(&input, &mut left, &mut right);

        let tail = &left[2048..];
        let peak = tail.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        let rms =
            (tail.iter().map(|&x| x * x).sum::<f32>() / tail.len() as f32).sqrt();
        assert!(peak > 0.0 && rms > 0.0);
        let crest = peak / rms;
        // A pure sine has crest sqrt(2); shaping plus band emphasis moves it.
        assert!((crest - std::f32::consts::SQRT_2).abs() > 0.05);
    }
}
