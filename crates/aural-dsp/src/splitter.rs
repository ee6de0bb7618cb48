//! Two-band crossover that preserves the all-pass response
//!
//! The low band is two cascaded one-pole low-pass stages; the high band is
//! a matched first-order all-pass minus the low band. Summing the two bands
//! reconstructs the all-passed input sample for sample, so per-band gains
//! can differ without phase cancellation at the crossover.

use std::f32::consts::TAU;

/// Band splitter state for one channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct BandSplitter {
    coeff: f32,
    lp_z1: f32,
    lp_z2: f32,
    ap_z1: f32,
}

impl BandSplitter {
    /// Creates a splitter with its crossover at `f0norm` (freq / rate).
    pub fn new(f0norm: f32) -> Self {
        let mut s = Self::default();
        s.init(f0norm);
        s
    }

    /// Re-tunes the crossover and clears state.
    pub fn init(&mut self, f0norm: f32) {
        let w = f0norm * TAU;
        let cw = w.cos();
        self.coeff = if cw > f32::EPSILON {
            (w.sin() - 1.0) / cw
        } else {
            cw * -0.5
        };
        self.lp_z1 = 0.0;
        self.lp_z2 = 0.0;
        self.ap_z1 = 0.0;
    }

    /// Clears filter state.
    pub fn clear(&mut self) {
        self.lp_z1 = 0.0;
        self.lp_z2 = 0.0;
        self.ap_z1 = 0.0;
    }

    /// Splits `input` into high-band and low-band outputs.
    pub fn process(&mut self, hp_out: &mut [f32], lp_out: &mut [f32], input: &[f32]) {
        let ap_coeff = self.coeff;
        let lp_coeff = self.coeff * 0.5 + 0.5;
        let mut lp_z1 = self.lp_z1;
        let mut lp_z2 = self.lp_z2;
        let mut ap_z1 = self.ap_z1;

        for ((hp, lp), &input) in hp_out.iter_mut().zip(lp_out.iter_mut()).zip(input.iter()) {
            let mut d = (input - lp_z1) * lp_coeff;
            let mut lp_y = lp_z1 + d;
            lp_z1 = lp_y + d;

            d = (lp_y - lp_z2) * lp_coeff;
            lp_y = lp_z2 + d;
            lp_z2 = lp_y + d;

            *lp = lp_y;

            let ap_y = input * ap_coeff + ap_z1;
            ap_z1 = input - ap_y * ap_coeff;

            *hp = ap_y - lp_y;
        }

        self.lp_z1 = lp_z1;
        self.lp_z2 = lp_z2;
        self.ap_z1 = ap_z1;
    }

    /// Applies a gain to the high band in place, leaving the low band
    /// untouched: `out = hf_scale * hp + lp`.
    pub fn apply_hf_scale(&mut self, samples: &mut [f32], hf_scale: f32) {
        let ap_coeff = self.coeff;
        let lp_coeff = self.coeff * 0.5 + 0.5;
        let mut lp_z1 = self.lp_z1;
        let mut lp_z2 = self.lp_z2;
        let mut ap_z1 = self.ap_z1;

        for s in samples.iter_mut() {
            let input = *s;

            let mut d = (input - lp_z1) * lp_coeff;
            let mut lp_y = lp_z1 + d;
            lp_z1 = lp_y + d;

            d = (lp_y - lp_z2) * lp_coeff;
            lp_y = lp_z2 + d;
            lp_z2 = lp_y + d;

            let ap_y = input * ap_coeff + ap_z1;
            ap_z1 = input - ap_y * ap_coeff;

            *s = (ap_y - lp_y) * hf_scale + lp_y;
        }

        self.lp_z1 = lp_z1;
        self.lp_z2 = lp_z2;
        self.ap_z1 = ap_z1;
    }

    /// Runs only the matched all-pass over `samples`, with fresh state.
    /// Used to phase-align signals that bypass the split.
    pub fn apply_allpass(&self, samples: &mut [f32]) {
        let coeff = self.coeff;
        let mut z1 = 0.0f32;
        for s in samples.iter_mut() {
            let input = *s;
            let out = input * coeff + z1;
            z1 = input - out * coeff;
            *s = out;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(n: usize) -> Vec<f32> {
        // Deterministic pseudo-noise.
        let mut state = 0x12345678u32;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 8) as f32 / (1 << 24) as f32 - 0.5
            })
            .collect()
    }

    #[test]
    fn test_bands_sum_to_allpass() {
        let input = noise(512);
        let mut splitter = BandSplitter::new(400.0 / 44100.0);
        let mut hp = vec![0.0f32; 512];
        let mut lp = vec![0.0f32; 512];
        splitter.process(&mut hp, &mut lp, &input);

        let reference = BandSplitter::new(400.0 / 44100.0);
        let mut ap = input.clone();
        reference.apply_allpass(&mut ap);

        for i in 0..512 {
            assert!(
                (hp[i] + lp[i] - ap[i]).abs() < 1e-6,
                "reconstruction failed at {i}: {} vs {}",
                hp[i] + lp[i],
                ap[i]
            );
        }
    }

    #[test]
    fn test_unity_hf_scale_is_allpass() {
        let input = noise(256);
        let mut a = BandSplitter::new(0.01);
        let mut scaled = input.clone();
        a.apply_hf_scale(&mut scaled, 1.0);

        let b = BandSplitter::new(0.01);
        let mut ap = input;
        b.apply_allpass(&mut ap);

        for i in 0..256 {
            assert!((scaled[i] - ap[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_lowpass_band_rejects_high_freq() {
        // A high-frequency sine should land almost entirely in the hp band.
        let input: Vec<f32> = (0..1024)
            .map(|i| (TAU * 0.45 * i as f32).sin())
            .collect();
        let mut splitter = BandSplitter::new(500.0 / 44100.0);
        let mut hp = vec![0.0f32; 1024];
        let mut lp = vec![0.0f32; 1024];
        splitter.process(&mut hp, &mut lp, &input);

        let lp_energy: f32 = lp[512..].iter().map(|x| x * x).sum();
        let hp_energy: f32 = hp[512..].iter().map(|x| x * x).sum();
        assert!(hp_energy > lp_energy * 100.0);
    }
}
