//! Dedicated-output effect: a plain gain tap
//!
//! Routes the slot input, scaled, to a dedicated output (dialog center or
//! LFE). The routing target is chosen by the slot; the effect itself is a
//! gain stage.

use aural_core::clampf;

/// Dedicated-output parameters.
#[derive(Debug, Clone, Copy)]
pub struct DedicatedParams {
    pub gain: f32,
}

impl Default for DedicatedParams {
    fn default() -> Self {
        Self { gain: 1.0 }
    }
}

/// Dedicated-output state.
pub struct Dedicated {
    gain: f32,
}

impl Dedicated {
    pub fn new(_sample_rate: u32) -> Self {
        Self { gain: 1.0 }
    }

    pub fn device_update(&mut self, _sample_rate: u32, _max_frames: usize) {}

    pub fn set_params(&mut self, params: &DedicatedParams) {
        self.gain = clampf(params.gain, 0.0, 16.0);
    }

    pub fn process(&mut self, input: &[f32], out_left: &mut [f32], out_right: &mut [f32]) {
        for i in 0..input.len() {
            let wet = input[i] * self.gain;
            out_left[i] = wet;
            out_right[i] = wet;
        }
    }

    pub fn clear(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_applies() {
        let mut fx = Dedicated::new(44100);
        fx.set_params(&DedicatedParams { gain: 2.0 });
        let input = [0.25f32; 4];
        let mut left = [0.0f32; 4];
        let mut right = [0.0f32; 4];
        fx.process(&input, &mut left, &mut right);
        assert_eq!(left, [0.5; 4]);
        assert_eq!(left, right);
    }
}
