//! Auto-wah: envelope-driven sweeping band-pass filter

use aural_core::clampf;

use crate::biquad::{BiquadFilter, BiquadType};

/// Auto-wah parameters.
#[derive(Debug, Clone, Copy)]
pub struct AutowahParams {
    /// Envelope attack time in seconds.
    pub attack_time: f32,
    /// Envelope release time in seconds.
    pub release_time: f32,
    /// Peak resonance of the sweeping filter (Q scale), 2..1000.
    pub resonance: f32,
    /// Gain at the resonant peak, linear.
    pub peak_gain: f32,
}

impl Default for AutowahParams {
    fn default() -> Self {
        Self {
            attack_time: 0.06,
            release_time: 0.06,
            resonance: 1000.0,
            peak_gain: 11.22,
        }
    }
}

/// Sweep range of the resonant filter.
const MIN_FREQ: f32 = 20.0;
const MAX_FREQ: f32 = 2500.0;
/// Re-tuning the filter every sample is wasteful; the envelope moves
/// slowly enough to update in small hops.
const UPDATE_HOP: usize = 16;

/// Auto-wah state.
pub struct Autowah {
    attack_coeff: f32,
    release_coeff: f32,
    resonance: f32,
    peak_gain: f32,
    envelope: f32,
    filter: BiquadFilter,
    sample_rate: u32,
}

impl Autowah {
    pub fn new(sample_rate: u32) -> Self {
        let mut state = Self {
            attack_coeff: 0.0,
            release_coeff: 0.0,
            resonance: 1000.0,
            peak_gain: 11.22,
            envelope: 0.0,
            filter: BiquadFilter::new(),
            sample_rate,
        };
        state.set_params(&AutowahParams::default());
        state
    }

    pub fn device_update(&mut self, sample_rate: u32, _max_frames: usize) {
        self.sample_rate = sample_rate;
        self.envelope = 0.0;
        self.filter.clear();
    }

    pub fn set_params(&mut self, params: &AutowahParams) {
        let rate = self.sample_rate as f32;
        let attack = clampf(params.attack_time, 0.0001, 1.0);
        let release = clampf(params.release_time, 0.0001, 1.0);
        self.attack_coeff = (-1.0 / (attack * rate)).exp();
        self.release_coeff = (-1.0 / (release * rate)).exp();
        self.resonance = clampf(params.resonance, 2.0, 1000.0);
        self.peak_gain = clampf(params.peak_gain, 0.00003, 31621.0);
    }

    fn retune(&mut self) {
        let rate = self.sample_rate as f32;
        // Envelope sweeps the center frequency across the wah range.
        let sweep = clampf(self.envelope * 4.0, 0.0, 1.0);
        let center = MIN_FREQ + (MAX_FREQ - MIN_FREQ) * sweep * sweep;
        // Higher resonance narrows the band.
        let q = 1.0 + (self.resonance / 1000.0) * 9.0;
        let gain = 1.0 + (self.peak_gain - 1.0).max(0.0) / 11.22;
        self.filter
            .set_params(BiquadType::Peaking, gain.max(1.0), center / rate, 1.0 / q);
    }

    pub fn process(&mut self, input: &[f32], out_left: &mut [f32], out_right: &mut [f32]) {
        for (start, chunk) in input.chunks(UPDATE_HOP).enumerate() {
            // Track the envelope across the hop.
            for &x in chunk {
                let level = x.abs();
                let coeff = if level > self.envelope {
                    self.attack_coeff
                } else {
                    self.release_coeff
                };
                self.envelope = level + (self.envelope - level) * coeff;
            }
            self.retune();

            let base = start * UPDATE_HOP;
            for (i, &x) in chunk.iter().enumerate() {
                let wet = self.filter.process_one(x);
                out_left[base + i] = wet;
                out_right[base + i] = wet;
            }
        }
    }

    pub fn clear(&mut self) {
        self.envelope = 0.0;
        self.filter.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_rises_on_loud_input() {
        let mut wah = Autowah::new(44100);
        let input = vec![0.8f32; 8192];
        let mut left = vec![0.0f32; 8192];
        let mut right = vec![0.0f32; 8192];
        wah.process(&input, &mut left, &mut right);
        assert!(wah.envelope > 0.5);
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut wah = Autowah::new(44100);
        let input = vec![0.0f32; 1024];
        let mut left = vec![1.0f32; 1024];
        let mut right = vec![1.0f32; 1024];
        wah.process(&input, &mut left, &mut right);
        for &s in &left {
            assert_eq!(s, 0.0);
        }
    }

    #[test]
    fn test_output_follows_input_scale() {
        let mut wah = Autowah::new(44100);
        let input: Vec<f32> = (0..4096)
            .map(|i| (std::f32::consts::TAU * 300.0 / 44100.0 * i as f32).sin() * 0.5)
            .collect();
        let mut left = vec![0.0f32; 4096];
        let mut right = vec![0.0f32; 4096];
        wah.process(&input, &mut left, &mut right);
        let rms = (left.iter().map(|&x| x * x).sum::<f32>() / 4096.0).sqrt();
        assert!(rms > 0.01 && rms < 4.0);
    }
}
