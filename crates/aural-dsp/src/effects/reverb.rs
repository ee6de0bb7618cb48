//! Algorithmic reverb: early reflections plus a damped comb network
//!
//! Early reflections are prime-spaced taps off a mono delay line. The late
//! field is four parallel lowpass-damped combs, decorrelated per ear and
//! diffused through serial allpasses. Decay time sets each comb's feedback
//! so a -60 dB tail lands at the requested time; the HF ratio shortens the
//! damped band's tail relative to it.

use aural_core::clampf;

/// Reverb parameters (environmental reverb set).
#[derive(Debug, Clone, Copy)]
pub struct ReverbParams {
    /// Modal density, 0..1; scales the comb delays.
    pub density: f32,
    /// Echo diffusion, 0..1.
    pub diffusion: f32,
    /// Master wet gain, 0..1.
    pub gain: f32,
    /// High-frequency wet gain, 0..1.
    pub gain_hf: f32,
    /// Late decay time in seconds, 0.1..20.
    pub decay_time: f32,
    /// HF decay time as a fraction of the LF decay, 0.1..2.
    pub decay_hf_ratio: f32,
    /// Early reflections gain, 0..3.16.
    pub reflections_gain: f32,
    /// Early reflections onset in seconds, 0..0.3.
    pub reflections_delay: f32,
    /// Late field gain, 0..10.
    pub late_gain: f32,
    /// Late field onset in seconds past the reflections, 0..0.1.
    pub late_delay: f32,
    /// Per-comb air absorption applied each pass, 0.892..1.
    pub air_absorption_hf: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            density: 1.0,
            diffusion: 1.0,
            gain: 0.32,
            gain_hf: 0.89,
            decay_time: 1.49,
            decay_hf_ratio: 0.83,
            reflections_gain: 0.05,
            reflections_delay: 0.007,
            late_gain: 1.26,
            late_delay: 0.011,
            air_absorption_hf: 0.994,
        }
    }
}

/// Early reflection tap delays in ms, prime-spaced.
const EARLY_TAP_MS: [f32; 4] = [5.3, 7.9, 11.3, 17.0];
const EARLY_TAP_GAINS: [f32; 4] = [1.0, 0.82, 0.67, 0.55];

/// Late comb delays in ms; mutually prime so modes interleave.
const COMB_MS: [f32; 4] = [29.7, 37.1, 41.1, 43.7];
/// Extra right-ear offset in ms, decorrelating the tail.
const COMB_SPREAD_MS: f32 = 1.3;

/// Diffusion allpass delays in ms.
const ALLPASS_MS: [f32; 2] = [5.0, 1.7];

#[derive(Debug, Clone)]
struct DampedComb {
    buffer: Vec<f32>,
    pos: usize,
    feedback: f32,
    damp: f32,
    lp_state: f32,
}

impl DampedComb {
    fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            pos: 0,
            feedback: 0.7,
            damp: 0.2,
            lp_state: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.lp_state += (output - self.lp_state) * (1.0 - self.damp);
        self.buffer[self.pos] = input + self.lp_state * self.feedback;
        self.pos += 1;
        if self.pos >= self.buffer.len() {
            self.pos = 0;
        }
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
        self.lp_state = 0.0;
    }
}

#[derive(Debug, Clone)]
struct DiffusionAllpass {
    buffer: Vec<f32>,
    pos: usize,
    feedback: f32,
}

impl DiffusionAllpass {
    fn new(delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            pos: 0,
            feedback: 0.5,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        let output = delayed - input * self.feedback;
        self.buffer[self.pos] = input + delayed * self.feedback;
        self.pos += 1;
        if self.pos >= self.buffer.len() {
            self.pos = 0;
        }
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
    }
}

/// Reverb state.
pub struct Reverb {
    input_line: Vec<f32>,
    input_pos: usize,
    early_taps: [usize; 4],
    early_gain: f32,
    late_feed_delay: usize,
    combs_l: [DampedComb; 4],
    combs_r: [DampedComb; 4],
    allpass_l: [DiffusionAllpass; 2],
    allpass_r: [DiffusionAllpass; 2],
    late_gain: f32,
    gain: f32,
    hf_gain: f32,
    hf_state_l: f32,
    hf_state_r: f32,
    sample_rate: u32,
}

impl Reverb {
    pub fn new(sample_rate: u32) -> Self {
        let rate = sample_rate as f32;
        let ms = |v: f32| ((v / 1000.0 * rate) as usize).max(1);
        let line_len = (ms(420.0)).next_power_of_two();

        let mut state = Self {
            input_line: vec![0.0; line_len],
            input_pos: 0,
            early_taps: [1; 4],
            early_gain: 0.05,
            late_feed_delay: 1,
            combs_l: std::array::from_fn(|i| DampedComb::new(ms(COMB_MS[i]))),
            combs_r: std::array::from_fn(|i| DampedComb::new(ms(COMB_MS[i] + COMB_SPREAD_MS))),
            allpass_l: std::array::from_fn(|i| DiffusionAllpass::new(ms(ALLPASS_MS[i]))),
            allpass_r: std::array::from_fn(|i| DiffusionAllpass::new(ms(ALLPASS_MS[i] * 1.11))),
            late_gain: 1.26,
            gain: 0.32,
            hf_gain: 0.89,
            hf_state_l: 0.0,
            hf_state_r: 0.0,
            sample_rate,
        };
        state.set_params(&ReverbParams::default());
        state
    }

    pub fn device_update(&mut self, sample_rate: u32, _max_frames: usize) {
        *self = Reverb::new(sample_rate);
    }

    pub fn set_params(&mut self, params: &ReverbParams) {
        let rate = self.sample_rate as f32;
        let ms = |v: f32| ((v / 1000.0 * rate) as usize).max(1);

        let reflections_delay = clampf(params.reflections_delay, 0.0, 0.3);
        for (i, tap) in self.early_taps.iter_mut().enumerate() {
            *tap = (ms((reflections_delay * 1000.0) + EARLY_TAP_MS[i]))
                .min(self.input_line.len() - 1);
        }
        self.early_gain = clampf(params.reflections_gain, 0.0, 3.16);
        self.late_feed_delay = ms((reflections_delay + clampf(params.late_delay, 0.0, 0.1)) * 1000.0)
            .min(self.input_line.len() - 1);

        // Density stretches the comb delays; feedback then hits -60 dB at
        // the decay time.
        let density_scale = 0.6 + 0.4 * clampf(params.density, 0.0, 1.0);
        let decay = clampf(params.decay_time, 0.1, 20.0);
        let hf_ratio = clampf(params.decay_hf_ratio, 0.1, 2.0);
        let air = clampf(params.air_absorption_hf, 0.892, 1.0);
        for i in 0..4 {
            for (comb, spread) in [(&mut self.combs_l[i], 0.0), (&mut self.combs_r[i], COMB_SPREAD_MS)]
            {
                let delay_ms = (COMB_MS[i] + spread) * density_scale;
                let delay_samples = ms(delay_ms);
                if comb.buffer.len() != delay_samples {
                    comb.buffer = vec![0.0; delay_samples];
                    comb.pos = 0;
                    comb.lp_state = 0.0;
                }
                let delay_seconds = delay_ms / 1000.0;
                comb.feedback = 10.0f32.powf(-3.0 * delay_seconds / decay);
                // Damping makes HF decay hf_ratio times faster; fold the
                // per-pass air absorption into it.
                let hf_feedback = 10.0f32.powf(-3.0 * delay_seconds / (decay * hf_ratio)) * air;
                comb.damp = clampf(1.0 - hf_feedback / comb.feedback, 0.0, 0.95);
            }
        }

        let diffusion = clampf(params.diffusion, 0.0, 1.0);
        for ap in self.allpass_l.iter_mut().chain(self.allpass_r.iter_mut()) {
            ap.feedback = 0.5 * diffusion;
        }

        self.gain = clampf(params.gain, 0.0, 1.0);
        self.hf_gain = clampf(params.gain_hf, 0.0, 1.0);
        self.late_gain = clampf(params.late_gain, 0.0, 10.0);
    }

    pub fn process(&mut self, input: &[f32], out_left: &mut [f32], out_right: &mut [f32]) {
        let mask = self.input_line.len() - 1;
        for i in 0..input.len() {
            self.input_line[self.input_pos & mask] = input[i];

            // Early reflections, alternating ears per tap.
            let mut early_l = 0.0;
            let mut early_r = 0.0;
            for (t, &tap) in self.early_taps.iter().enumerate() {
                let s = self.input_line[(self.input_pos.wrapping_sub(tap)) & mask]
                    * EARLY_TAP_GAINS[t];
                if t % 2 == 0 {
                    early_l += s;
                    early_r += s * 0.7;
                } else {
                    early_r += s;
                    early_l += s * 0.7;
                }
            }

            // Late field input.
            let late_in =
                self.input_line[(self.input_pos.wrapping_sub(self.late_feed_delay)) & mask];
            let mut late_l = 0.0;
            let mut late_r = 0.0;
            for c in 0..4 {
                late_l += self.combs_l[c].process(late_in);
                late_r += self.combs_r[c].process(late_in);
            }
            late_l *= 0.25;
            late_r *= 0.25;
            for a in 0..2 {
                late_l = self.allpass_l[a].process(late_l);
                late_r = self.allpass_r[a].process(late_r);
            }

            let mut wet_l = early_l * self.early_gain + late_l * self.late_gain;
            let mut wet_r = early_r * self.early_gain + late_r * self.late_gain;

            // Split off the high band and scale it by the HF gain.
            self.hf_state_l += (wet_l - self.hf_state_l) * 0.35;
            self.hf_state_r += (wet_r - self.hf_state_r) * 0.35;
            wet_l = self.hf_state_l + (wet_l - self.hf_state_l) * self.hf_gain;
            wet_r = self.hf_state_r + (wet_r - self.hf_state_r) * self.hf_gain;

            out_left[i] = wet_l * self.gain;
            out_right[i] = wet_r * self.gain;

            self.input_pos = self.input_pos.wrapping_add(1);
        }
    }

    pub fn clear(&mut self) {
        self.input_line.fill(0.0);
        self.input_pos = 0;
        for comb in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            comb.reset();
        }
        for ap in self.allpass_l.iter_mut().chain(self.allpass_r.iter_mut()) {
            ap.reset();
        }
        self.hf_state_l = 0.0;
        self.hf_state_r = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_response(reverb: &mut Reverb, len: usize) -> (Vec<f32>, Vec<f32>) {
        let mut input = vec![0.0f32; len];
        input[0] = 1.0;
        let mut left = vec![0.0f32; len];
        let mut right = vec![0.0f32; len];
        reverb.process(&input, &mut left, &mut right);
        (left, right)
    }

    #[test]
    fn test_tail_exists_and_decays() {
        let mut reverb = Reverb::new(44100);
        reverb.set_params(&ReverbParams {
            decay_time: 0.5,
            ..ReverbParams::default()
        });
        let (left, _) = impulse_response(&mut reverb, 44100);

        let early: f32 = left[..11025].iter().map(|x| x * x).sum();
        let late: f32 = left[33075..].iter().map(|x| x * x).sum();
        assert!(early > 0.0, "no reverb output at all");
        assert!(late < early * 0.05, "tail not decaying: {late} vs {early}");
    }

    #[test]
    fn test_longer_decay_means_longer_tail() {
        let mut short = Reverb::new(44100);
        short.set_params(&ReverbParams {
            decay_time: 0.3,
            ..ReverbParams::default()
        });
        let mut long = Reverb::new(44100);
        long.set_params(&ReverbParams {
            decay_time: 3.0,
            ..ReverbParams::default()
        });

        let (short_ir, _) = impulse_response(&mut short, 44100);
        let (long_ir, _) = impulse_response(&mut long, 44100);

        let tail = |ir: &[f32]| ir[22050..].iter().map(|x| x * x).sum::<f32>();
        assert!(tail(&long_ir) > tail(&short_ir) * 4.0);
    }

    #[test]
    fn test_stereo_tail_is_decorrelated() {
        let mut reverb = Reverb::new(44100);
        let (left, right) = impulse_response(&mut reverb, 22050);

        let mut dot = 0.0f64;
        let mut norm_l = 0.0f64;
        let mut norm_r = 0.0f64;
        for i in 4410..22050 {
            dot += left[i] as f64 * right[i] as f64;
            norm_l += (left[i] as f64).powi(2);
            norm_r += (right[i] as f64).powi(2);
        }
        let correlation = dot / (norm_l.sqrt() * norm_r.sqrt()).max(1e-12);
        assert!(correlation.abs() < 0.9, "tail fully correlated: {correlation}");
    }

    #[test]
    fn test_silence_in_silence_out() {
        let mut reverb = Reverb::new(44100);
        let input = vec![0.0f32; 1024];
        let mut left = vec![0.0f32; 1024];
        let mut right = vec![0.0f32; 1024];
        reverb.process(&input, &mut left, &mut right);
        assert!(left.iter().all(|&x| x == 0.0));
    }
}
