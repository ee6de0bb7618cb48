//! Ring modulator: carrier multiply with a pre-modulation high-pass

use aural_core::clampf;

use crate::biquad::{BiquadFilter, BiquadType};

/// Carrier waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModulatorWaveform {
    #[default]
    Sinusoid,
    Sawtooth,
    Square,
}

/// Ring modulator parameters.
#[derive(Debug, Clone, Copy)]
pub struct ModulatorParams {
    /// Carrier frequency in Hz.
    pub frequency: f32,
    /// Cutoff of the high-pass applied before modulation, in Hz.
    pub highpass_cutoff: f32,
    pub waveform: ModulatorWaveform,
}

impl Default for ModulatorParams {
    fn default() -> Self {
        Self {
            frequency: 440.0,
            highpass_cutoff: 800.0,
            waveform: ModulatorWaveform::Sinusoid,
        }
    }
}

/// Ring modulator state.
pub struct RingModulator {
    phase: f32,
    step: f32,
    waveform: ModulatorWaveform,
    highpass: BiquadFilter,
    sample_rate: u32,
}

impl RingModulator {
    pub fn new(sample_rate: u32) -> Self {
        let mut state = Self {
            phase: 0.0,
            step: 0.0,
            waveform: ModulatorWaveform::Sinusoid,
            highpass: BiquadFilter::new(),
            sample_rate,
        };
        state.set_params(&ModulatorParams::default());
        state
    }

    pub fn device_update(&mut self, sample_rate: u32, _max_frames: usize) {
        self.sample_rate = sample_rate;
        self.phase = 0.0;
        self.highpass.clear();
    }

    pub fn set_params(&mut self, params: &ModulatorParams) {
        let rate = self.sample_rate as f32;
        self.step = clampf(params.frequency, 0.0, rate / 2.0) / rate;
        self.waveform = params.waveform;
        let cutoff = clampf(params.highpass_cutoff, 0.0, rate / 2.0 - 1.0);
        if cutoff > 0.0 {
            self.highpass.set_params(
                BiquadType::HighPass,
                1.0,
                cutoff / rate,
                BiquadFilter::rcp_q_from_slope(1.0, 0.75),
            );
        } else {
            self.highpass = BiquadFilter::new();
        }
    }

    #[inline]
    fn carrier(&self, phase: f32) -> f32 {
        match self.waveform {
            ModulatorWaveform::Sinusoid => (std::f32::consts::TAU * phase).sin(),
            ModulatorWaveform::Sawtooth => 2.0 * phase - 1.0,
            ModulatorWaveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }

    pub fn process(&mut self, input: &[f32], out_left: &mut [f32], out_right: &mut [f32]) {
        for i in 0..input.len() {
            let filtered = self.highpass.process_one(input[i]);
            let wet = filtered * self.carrier(self.phase);
            self.phase += self.step;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
            out_left[i] = wet;
            out_right[i] = wet;
        }
    }

    pub fn clear(&mut self) {
        self.highpass.clear();
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_input_produces_carrier() {
        let mut state = RingModulator::new(8000);
        state.set_params(&ModulatorParams {
            frequency: 1000.0,
            highpass_cutoff: 0.0,
            waveform: ModulatorWaveform::Square,
        });
        let input = vec![1.0f32; 64];
        let mut left = vec![0.0f32; 64];
        let mut right = vec![0.0f32; 64];
        state.process(&input, &mut left, &mut right);
        // Square carrier on DC input flips sign every 4 samples at 1 kHz.
        assert_eq!(left[0], 1.0);
        assert_eq!(left[4], -1.0);
        assert_eq!(left, right);
    }

    #[test]
    fn test_zero_frequency_sine_mutes() {
        let mut state = RingModulator::new(8000);
        state.set_params(&ModulatorParams {
            frequency: 0.0,
            highpass_cutoff: 0.0,
            waveform: ModulatorWaveform::Sinusoid,
        });
        let input = vec![0.5f32; 16];
        let mut left = vec![1.0f32; 16];
        let mut right = vec![1.0f32; 16];
        state.process(&input, &mut left, &mut right);
        // sin(0) carrier everywhere.
        for &s in &left {
            assert_eq!(s, 0.0);
        }
    }
}
