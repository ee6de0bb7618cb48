//! Automatic-gain compressor with a peak-hold envelope follower

use aural_core::clampf;

/// Compressor parameters. The effect is a fixed-character automatic gain
/// control; the only user control is the on/off switch.
#[derive(Debug, Clone, Copy)]
pub struct CompressorParams {
    pub enabled: bool,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Compressor state.
pub struct Compressor {
    enabled: bool,
    envelope: f32,
    attack_coeff: f32,
    release_coeff: f32,
}

/// Level the AGC pulls signals toward.
const TARGET_LEVEL: f32 = 0.5;
const ATTACK_SECONDS: f32 = 0.005;
const RELEASE_SECONDS: f32 = 0.2;

impl Compressor {
    pub fn new(sample_rate: u32) -> Self {
        let mut state = Self {
            enabled: true,
            envelope: 0.0,
            attack_coeff: 0.0,
            release_coeff: 0.0,
        };
        state.device_update(sample_rate, 0);
        state
    }

    pub fn device_update(&mut self, sample_rate: u32, _max_frames: usize) {
        let rate = sample_rate as f32;
        self.attack_coeff = (-1.0 / (ATTACK_SECONDS * rate)).exp();
        self.release_coeff = (-1.0 / (RELEASE_SECONDS * rate)).exp();
        self.envelope = 0.0;
    }

    pub fn set_params(&mut self, params: &CompressorParams) {
        self.enabled = params.enabled;
    }

    pub fn process(&mut self, input: &[f32], out_left: &mut [f32], out_right: &mut [f32]) {
        if !self.enabled {
            out_left[..input.len()].copy_from_slice(input);
            out_right[..input.len()].copy_from_slice(input);
            return;
        }
        for i in 0..input.len() {
            let level = input[i].abs();
            let coeff = if level > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = level + (self.envelope - level) * coeff;

            let gain = if self.envelope > TARGET_LEVEL {
                TARGET_LEVEL / self.envelope
            } else {
                1.0
            };
            let wet = input[i] * clampf(gain, 0.1, 1.0);
            out_left[i] = wet;
            out_right[i] = wet;
        }
    }

    pub fn clear(&mut self) {
        self.envelope = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_passes_through() {
        let mut comp = Compressor::new(44100);
        comp.set_params(&CompressorParams { enabled: false });
        let input = vec![0.9f32; 32];
        let mut left = vec![0.0f32; 32];
        let mut right = vec![0.0f32; 32];
        comp.process(&input, &mut left, &mut right);
        assert_eq!(left, input);
    }

    #[test]
    fn test_loud_signal_is_reduced() {
        let mut comp = Compressor::new(44100);
        let input = vec![1.0f32; 44100];
        let mut left = vec![0.0f32; 44100];
        let mut right = vec![0.0f32; 44100];
        comp.process(&input, &mut left, &mut right);
        // After the attack settles, the output sits near the target level.
        let settled = left[44100 - 1];
        assert!(settled < 0.6, "expected gain reduction, got {settled}");
        assert!(settled > 0.4);
    }

    #[test]
    fn test_quiet_signal_unchanged() {
        let mut comp = Compressor::new(44100);
        let input = vec![0.1f32; 4410];
        let mut left = vec![0.0f32; 4410];
        let mut right = vec![0.0f32; 4410];
        comp.process(&input, &mut left, &mut right);
        assert!((left[4409] - 0.1).abs() < 1e-3);
    }
}
