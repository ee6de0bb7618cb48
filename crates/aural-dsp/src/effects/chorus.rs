//! Chorus and flanger: LFO-modulated delay taps
//!
//! Both share one implementation; a flanger is a chorus with a much
//! shorter base delay and stronger feedback. The two ears read the delay
//! line with LFOs a configurable phase apart.

use aural_core::{clampf, lerp};

use super::Lfo;

/// LFO waveform for the delay modulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChorusWaveform {
    Sinusoid,
    #[default]
    Triangle,
}

/// Chorus/flanger parameters.
#[derive(Debug, Clone, Copy)]
pub struct ChorusParams {
    pub waveform: ChorusWaveform,
    /// Phase offset between the ear LFOs in degrees, -180..180.
    pub phase: f32,
    /// Modulation rate in Hz, 0..10.
    pub rate: f32,
    /// Modulation depth as a fraction of the base delay, 0..1.
    pub depth: f32,
    /// Feedback gain, -1..1.
    pub feedback: f32,
    /// Base delay in seconds.
    pub delay: f32,
}

impl ChorusParams {
    /// EFX chorus defaults.
    pub fn chorus() -> Self {
        Self {
            waveform: ChorusWaveform::Triangle,
            phase: 90.0,
            rate: 1.1,
            depth: 0.1,
            feedback: 0.25,
            delay: 0.016,
        }
    }

    /// EFX flanger defaults.
    pub fn flanger() -> Self {
        Self {
            waveform: ChorusWaveform::Triangle,
            phase: 0.0,
            rate: 0.27,
            depth: 1.0,
            feedback: -0.5,
            delay: 0.002,
        }
    }
}

impl Default for ChorusParams {
    fn default() -> Self {
        Self::chorus()
    }
}

/// Maximum supported base delay (flanger and chorus ranges both fit).
const MAX_DELAY_SECONDS: f32 = 0.032;

/// Chorus state.
pub struct Chorus {
    line: Vec<f32>,
    mask: usize,
    write: usize,
    lfo_l: Lfo,
    lfo_r: Lfo,
    waveform: ChorusWaveform,
    delay_samples: f32,
    depth_samples: f32,
    feedback: f32,
    sample_rate: u32,
}

impl Chorus {
    pub fn new(sample_rate: u32) -> Self {
        let len = ((MAX_DELAY_SECONDS * 2.0 * sample_rate as f32) as usize + 2).next_power_of_two();
        let mut state = Self {
            line: vec![0.0; len],
            mask: len - 1,
            write: 0,
            lfo_l: Lfo::new(1.1, sample_rate, 0.0),
            lfo_r: Lfo::new(1.1, sample_rate, 0.25),
            waveform: ChorusWaveform::Triangle,
            delay_samples: 0.0,
            depth_samples: 0.0,
            feedback: 0.25,
            sample_rate,
        };
        state.set_params(&ChorusParams::chorus());
        state
    }

    pub fn device_update(&mut self, sample_rate: u32, _max_frames: usize) {
        let len = ((MAX_DELAY_SECONDS * 2.0 * sample_rate as f32) as usize + 2).next_power_of_two();
        self.line = vec![0.0; len];
        self.mask = len - 1;
        self.write = 0;
        self.sample_rate = sample_rate;
    }

    pub fn set_params(&mut self, params: &ChorusParams) {
        let rate = self.sample_rate as f32;
        self.delay_samples = clampf(params.delay, 0.0, MAX_DELAY_SECONDS) * rate;
        self.depth_samples = clampf(params.depth, 0.0, 1.0) * self.delay_samples;
        self.feedback = clampf(params.feedback, -1.0, 1.0);
        self.waveform = params.waveform;

        let lfo_rate = clampf(params.rate, 0.0, 10.0);
        let phase_offset = clampf(params.phase, -180.0, 180.0) / 360.0;
        self.lfo_l.set_rate(lfo_rate, self.sample_rate);
        self.lfo_r = Lfo::new(lfo_rate, self.sample_rate, phase_offset);
    }

    #[inline]
    fn read_tap(&self, delay: f32) -> f32 {
        // Fractional read behind the write head.
        let delay = delay.max(1.0);
        let whole = delay as usize;
        let frac = delay - whole as f32;
        let a = self.line[(self.write.wrapping_sub(whole)) & self.mask];
        let b = self.line[(self.write.wrapping_sub(whole + 1)) & self.mask];
        lerp(a, b, frac)
    }

    pub fn process(&mut self, input: &[f32], out_left: &mut [f32], out_right: &mut [f32]) {
        for i in 0..input.len() {
            let (mod_l, mod_r) = match self.waveform {
                ChorusWaveform::Triangle => {
                    (self.lfo_l.next_triangle(), self.lfo_r.next_triangle())
                }
                ChorusWaveform::Sinusoid => (self.lfo_l.next_sine(), self.lfo_r.next_sine()),
            };
            // Modulation swings the tap between delay-depth and delay+depth,
            // never in front of the write head.
            let tap_l = self.delay_samples + self.depth_samples * mod_l;
            let tap_r = self.delay_samples + self.depth_samples * mod_r;

            let wet_l = self.read_tap(tap_l);
            let wet_r = self.read_tap(tap_r);
            out_left[i] = wet_l;
            out_right[i] = wet_r;

            self.line[self.write & self.mask] = input[i] + wet_l * self.feedback;
            self.write = self.write.wrapping_add(1) & self.mask;
        }
    }

    pub fn clear(&mut self) {
        self.line.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delayed_signal_appears() {
        let mut chorus = Chorus::new(8000);
        chorus.set_params(&ChorusParams {
            depth: 0.0,
            feedback: 0.0,
            ..ChorusParams::chorus()
        });
        let mut input = vec![0.0f32; 512];
        input[0] = 1.0;
        let mut left = vec![0.0f32; 512];
        let mut right = vec![0.0f32; 512];
        chorus.process(&input, &mut left, &mut right);

        // Base delay 16 ms at 8 kHz = 128 samples.
        let peak_at = left
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert!((peak_at as i32 - 128).abs() <= 1, "peak at {peak_at}");
    }

    #[test]
    fn test_modulation_moves_the_tap() {
        let mut chorus = Chorus::new(8000);
        chorus.set_params(&ChorusParams {
            rate: 5.0,
            depth: 0.9,
            feedback: 0.0,
            ..ChorusParams::chorus()
        });
        // Steady tone in, modulated tap out: the output is no longer
        // periodic with the input period.
        let input: Vec<f32> = (0..4096)
            .map(|i| (std::f32::consts::TAU * 0.05 * i as f32).sin())
            .collect();
        let mut left = vec![0.0f32; 4096];
        let mut right = vec![0.0f32; 4096];
        chorus.process(&input, &mut left, &mut right);

        let period = 20; // 0.05 cycles/sample
        let mut max_dev = 0.0f32;
        for i in 2048..4096 - period {
            max_dev = max_dev.max((left[i] - left[i + period]).abs());
        }
        assert!(max_dev > 0.05, "no audible modulation, dev {max_dev}");
    }

    #[test]
    fn test_flanger_defaults_are_short() {
        let p = ChorusParams::flanger();
        assert!(p.delay < 0.01);
        assert!(p.feedback < 0.0);
    }
}
