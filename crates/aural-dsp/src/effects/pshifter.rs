//! Pitch shifter: STFT phase vocoder
//!
//! 1024-point frames at 4x overlap with Hann windows on both sides of the
//! transform. Analysis derives each bin's true frequency from its phase
//! advance, synthesis remaps bins by the pitch ratio and re-accumulates
//! phase, keeping transients acceptable at the usual one-octave range.

use std::sync::Arc;

use aural_core::clampf;
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

/// Pitch shifter parameters.
#[derive(Debug, Clone, Copy)]
pub struct PshifterParams {
    /// Shift in semitones, -12..12.
    pub coarse_tune: i32,
    /// Additional shift in cents, -50..50.
    pub fine_tune: i32,
}

impl Default for PshifterParams {
    fn default() -> Self {
        Self {
            coarse_tune: 12,
            fine_tune: 0,
        }
    }
}

const STFT_SIZE: usize = 1024;
const OVERSAMP: usize = 4;
const HOP: usize = STFT_SIZE / OVERSAMP;
const BINS: usize = STFT_SIZE / 2 + 1;
/// Overlap-add normalization for double Hann windows at 4x overlap.
const OLA_SCALE: f32 = 2.0 / 3.0;

/// Pitch shifter state.
pub struct PitchShifter {
    ratio: f64,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    window: [f32; STFT_SIZE],
    in_fifo: [f32; STFT_SIZE],
    out_fifo: [f32; HOP],
    output_accum: [f32; STFT_SIZE + HOP],
    last_phase: [f32; BINS],
    sum_phase: [f32; BINS],
    workspace: Vec<Complex32>,
    syn_magnitude: [f32; BINS],
    syn_frequency: [f32; BINS],
    rover: usize,
}

impl PitchShifter {
    pub fn new(_sample_rate: u32) -> Self {
        let mut planner = FftPlanner::new();
        let mut window = [0.0f32; STFT_SIZE];
        for (n, w) in window.iter_mut().enumerate() {
            *w = 0.5
                - 0.5 * (std::f32::consts::TAU * n as f32 / STFT_SIZE as f32).cos();
        }
        let mut state = Self {
            ratio: 2.0,
            fft_forward: planner.plan_fft_forward(STFT_SIZE),
            fft_inverse: planner.plan_fft_inverse(STFT_SIZE),
            window,
            in_fifo: [0.0; STFT_SIZE],
            out_fifo: [0.0; HOP],
            output_accum: [0.0; STFT_SIZE + HOP],
            last_phase: [0.0; BINS],
            sum_phase: [0.0; BINS],
            workspace: vec![Complex32::new(0.0, 0.0); STFT_SIZE],
            syn_magnitude: [0.0; BINS],
            syn_frequency: [0.0; BINS],
            rover: STFT_SIZE - HOP,
        };
        state.set_params(&PshifterParams::default());
        state
    }

    pub fn device_update(&mut self, _sample_rate: u32, _max_frames: usize) {
        self.in_fifo = [0.0; STFT_SIZE];
        self.out_fifo = [0.0; HOP];
        self.output_accum = [0.0; STFT_SIZE + HOP];
        self.last_phase = [0.0; BINS];
        self.sum_phase = [0.0; BINS];
        self.rover = STFT_SIZE - HOP;
    }

    pub fn set_params(&mut self, params: &PshifterParams) {
        let coarse = params.coarse_tune.clamp(-12, 12);
        let fine = params.fine_tune.clamp(-50, 50);
        self.ratio = 2.0f64.powf((coarse * 100 + fine) as f64 / 1200.0);
    }

    fn process_frame(&mut self) {
        let expected = std::f32::consts::TAU / OVERSAMP as f32;

        for (n, w) in self.workspace.iter_mut().enumerate() {
            *w = Complex32::new(self.in_fifo[n] * self.window[n], 0.0);
        }
        self.fft_forward.process(&mut self.workspace);

        // Analysis: true frequency per bin, in radians per hop relative to
        // the bin center.
        self.syn_magnitude = [0.0; BINS];
        self.syn_frequency = [0.0; BINS];
        for k in 0..BINS {
            let magnitude = self.workspace[k].norm();
            let phase = self.workspace[k].arg();

            let mut delta = phase - self.last_phase[k];
            self.last_phase[k] = phase;
            delta -= k as f32 * expected;
            // Wrap to +-pi.
            let qpd = (delta / std::f32::consts::PI) as i32;
            let wrap = if qpd >= 0 { qpd + (qpd & 1) } else { qpd - (qpd & 1) };
            delta -= std::f32::consts::PI * wrap as f32;

            let true_bin = k as f32 + delta * OVERSAMP as f32 / std::f32::consts::TAU;

            // Synthesis remap.
            let index = (k as f64 * self.ratio) as usize;
            if index < BINS {
                self.syn_magnitude[index] += magnitude;
                self.syn_frequency[index] = true_bin * self.ratio as f32;
            }
        }

        // Resynthesize with accumulated phase.
        for k in 0..BINS {
            let delta = self.syn_frequency[k] - k as f32;
            self.sum_phase[k] += (k as f32 + delta) * expected;
            let phase = self.sum_phase[k];
            self.workspace[k] = Complex32::from_polar(self.syn_magnitude[k], phase);
        }
        // Hermitian symmetry for the real inverse transform.
        for k in BINS..STFT_SIZE {
            self.workspace[k] = self.workspace[STFT_SIZE - k].conj();
        }
        self.fft_inverse.process(&mut self.workspace);

        let norm = OLA_SCALE / STFT_SIZE as f32;
        for n in 0..STFT_SIZE {
            self.output_accum[n] += self.window[n] * self.workspace[n].re * norm;
        }
        self.out_fifo.copy_from_slice(&self.output_accum[..HOP]);
        self.output_accum.copy_within(HOP.., 0);
        self.output_accum[STFT_SIZE..].fill(0.0);
        self.in_fifo.copy_within(HOP.., 0);
    }

    pub fn process(&mut self, input: &[f32], out_left: &mut [f32], out_right: &mut [f32]) {
        let latency = STFT_SIZE - HOP;
        for i in 0..input.len() {
            self.in_fifo[self.rover] = input[i];
            let wet = self.out_fifo[self.rover - latency];
            out_left[i] = wet;
            out_right[i] = wet;
            self.rover += 1;
            if self.rover >= STFT_SIZE {
                self.rover = latency;
                self.process_frame();
            }
        }
    }

    pub fn clear(&mut self) {
        self.device_update(0, 0);
    }
}
