//! Frequency shifter: single-sideband modulation via a Hilbert pair
//!
//! The analytic signal comes from a windowed FIR Hilbert transformer plus
//! a matching group delay on the real path. Multiplying by a complex
//! carrier then shifts every component by the same number of Hz (unlike a
//! pitch shifter, which scales frequencies).

use aural_core::clampf;

/// Shift direction for one ear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FshifterDirection {
    #[default]
    Down,
    Up,
    /// Pass the delayed dry signal instead of shifting.
    Off,
}

/// Frequency shifter parameters.
#[derive(Debug, Clone, Copy)]
pub struct FshifterParams {
    /// Shift amount in Hz.
    pub frequency: f32,
    pub left_direction: FshifterDirection,
    pub right_direction: FshifterDirection,
}

impl Default for FshifterParams {
    fn default() -> Self {
        Self {
            frequency: 0.0,
            left_direction: FshifterDirection::Down,
            right_direction: FshifterDirection::Down,
        }
    }
}

/// Hilbert FIR length; odd so the group delay is an integer.
const HILBERT_TAPS: usize = 127;
const HILBERT_CENTER: usize = HILBERT_TAPS / 2;

/// Frequency shifter state.
pub struct FrequencyShifter {
    taps: [f32; HILBERT_TAPS],
    history: [f32; HILBERT_TAPS],
    write: usize,
    phase: f64,
    step: f64,
    dir_l: FshifterDirection,
    dir_r: FshifterDirection,
    sample_rate: u32,
}

impl FrequencyShifter {
    pub fn new(sample_rate: u32) -> Self {
        let mut taps = [0.0f32; HILBERT_TAPS];
        for (n, tap) in taps.iter_mut().enumerate() {
            let k = n as isize - HILBERT_CENTER as isize;
            if k % 2 != 0 {
                // Ideal Hilbert response under a Blackman window.
                let ideal = 2.0 / (std::f64::consts::PI * k as f64);
                let x = n as f64 / (HILBERT_TAPS - 1) as f64;
                let window = 0.42 - 0.5 * (std::f64::consts::TAU * x).cos()
                    + 0.08 * (2.0 * std::f64::consts::TAU * x).cos();
                *tap = (ideal * window) as f32;
            }
        }

        let mut state = Self {
            taps,
            history: [0.0; HILBERT_TAPS],
            write: 0,
            phase: 0.0,
            step: 0.0,
            dir_l: FshifterDirection::Down,
            dir_r: FshifterDirection::Down,
            sample_rate,
        };
        state.set_params(&FshifterParams::default());
        state
    }

    pub fn device_update(&mut self, sample_rate: u32, _max_frames: usize) {
        self.sample_rate = sample_rate;
        self.history = [0.0; HILBERT_TAPS];
        self.write = 0;
        self.phase = 0.0;
    }

    pub fn set_params(&mut self, params: &FshifterParams) {
        let rate = self.sample_rate as f32;
        self.step = clampf(params.frequency, 0.0, rate / 2.0) as f64 / rate as f64;
        self.dir_l = params.left_direction;
        self.dir_r = params.right_direction;
    }

    pub fn process(&mut self, input: &[f32], out_left: &mut [f32], out_right: &mut [f32]) {
        for i in 0..input.len() {
            self.history[self.write] = input[i];

            // Real path: input delayed to the FIR center.
            let in_phase =
                self.history[(self.write + HILBERT_TAPS - HILBERT_CENTER) % HILBERT_TAPS];
            // Quadrature path: Hilbert FIR over the history ring.
            let mut quadrature = 0.0f32;
            for (n, &tap) in self.taps.iter().enumerate() {
                if tap != 0.0 {
                    let idx = (self.write + HILBERT_TAPS - n) % HILBERT_TAPS;
                    quadrature += tap * self.history[idx];
                }
            }
            self.write = (self.write + 1) % HILBERT_TAPS;

            let (sin, cos) = (std::f64::consts::TAU * self.phase).sin_cos();
            self.phase += self.step;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
            let (sin, cos) = (sin as f32, cos as f32);

            out_left[i] = match self.dir_l {
                FshifterDirection::Up => in_phase * cos - quadrature * sin,
                FshifterDirection::Down => in_phase * cos + quadrature * sin,
                FshifterDirection::Off => in_phase,
            };
            out_right[i] = match self.dir_r {
                FshifterDirection::Up => in_phase * cos - quadrature * sin,
                FshifterDirection::Down => in_phase * cos + quadrature * sin,
                FshifterDirection::Off => in_phase,
            };
        }
    }

    pub fn clear(&mut self) {
        self.history = [0.0; HILBERT_TAPS];
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dominant_bin(signal: &[f32], rate: f32) -> f32 {
        // Coarse DFT peak search, good enough to locate a shifted tone.
        let n = signal.len();
        let mut best = (0.0f64, 0usize);
        for bin in 1..n / 2 {
            let mut re = 0.0f64;
            let mut im = 0.0f64;
            for (i, &s) in signal.iter().enumerate() {
                let a = std::f64::consts::TAU * bin as f64 * i as f64 / n as f64;
                re += s as f64 * a.cos();
                im += s as f64 * a.sin();
            }
            let mag = re * re + im * im;
            if mag > best.0 {
                best = (mag, bin);
            }
        }
        best.1 as f32 * rate / n as f32
    }

    #[test]
    fn test_zero_shift_passes_tone() {
        let rate = 8000u32;
        let mut fx = FrequencyShifter::new(rate);
        let input: Vec<f32> = (0..2048)
            .map(|i| (std::f32::consts::TAU * 1000.0 / 8000.0 * i as f32).sin())
            .collect();
        let mut left = vec![0.0f32; 2048];
        let mut right = vec![0.0f32; 2048];
        fx.process(&input, &mut left, &mut right);
        let freq = dominant_bin(&left[256..1024 + 256], 8000.0);
        assert!((freq - 1000.0).abs() < 30.0, "got {freq} Hz");
    }

    #[test]
    fn test_upshift_moves_tone_up() {
        let rate = 8000u32;
        let mut fx = FrequencyShifter::new(rate);
        fx.set_params(&FshifterParams {
            frequency: 500.0,
            left_direction: FshifterDirection::Up,
            right_direction: FshifterDirection::Down,
        });
        let input: Vec<f32> = (0..4096)
            .map(|i| (std::f32::consts::TAU * 1000.0 / 8000.0 * i as f32).sin())
            .collect();
        let mut left = vec![0.0f32; 4096];
        let mut right = vec![0.0f32; 4096];
        fx.process(&input, &mut left, &mut right);

        let up = dominant_bin(&left[1024..3072], 8000.0);
        let down = dominant_bin(&right[1024..3072], 8000.0);
        assert!((up - 1500.0).abs() < 40.0, "up path got {up} Hz");
        assert!((down - 500.0).abs() < 40.0, "down path got {down} Hz");
    }
}
