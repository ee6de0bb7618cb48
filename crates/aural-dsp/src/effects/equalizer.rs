//! Four-band equalizer: low shelf, two peaking bands, high shelf

use aural_core::clampf;

use crate::biquad::{BiquadFilter, BiquadType};

/// Equalizer parameters. Gains are linear (0.126..7.943, i.e. +-18 dB).
#[derive(Debug, Clone, Copy)]
pub struct EqualizerParams {
    pub low_gain: f32,
    pub low_cutoff: f32,
    pub mid1_gain: f32,
    pub mid1_center: f32,
    pub mid1_width: f32,
    pub mid2_gain: f32,
    pub mid2_center: f32,
    pub mid2_width: f32,
    pub high_gain: f32,
    pub high_cutoff: f32,
}

impl Default for EqualizerParams {
    fn default() -> Self {
        Self {
            low_gain: 1.0,
            low_cutoff: 200.0,
            mid1_gain: 1.0,
            mid1_center: 500.0,
            mid1_width: 1.0,
            mid2_gain: 1.0,
            mid2_center: 3000.0,
            mid2_width: 1.0,
            high_gain: 1.0,
            high_cutoff: 6000.0,
        }
    }
}

/// Equalizer state: four biquads in series.
pub struct Equalizer {
    bands: [BiquadFilter; 4],
    sample_rate: u32,
}

impl Equalizer {
    pub fn new(sample_rate: u32) -> Self {
        let mut state = Self {
            bands: [BiquadFilter::new(); 4],
            sample_rate,
        };
        state.set_params(&EqualizerParams::default());
        state
    }

    pub fn device_update(&mut self, sample_rate: u32, _max_frames: usize) {
        self.sample_rate = sample_rate;
        for band in &mut self.bands {
            band.clear();
        }
    }

    pub fn set_params(&mut self, params: &EqualizerParams) {
        let rate = self.sample_rate as f32;
        let gain_limit = |g: f32| clampf(g, 0.126, 7.943).max(0.0001);

        // The shelf gain parameter is measured at the reference frequency,
        // so take the square root of the full band gain.
        let f0 = clampf(params.low_cutoff, 50.0, 800.0) / rate;
        self.bands[0].set_params(
            BiquadType::LowShelf,
            gain_limit(params.low_gain).sqrt(),
            f0,
            BiquadFilter::rcp_q_from_slope(gain_limit(params.low_gain).sqrt(), 0.75),
        );

        let f0 = clampf(params.mid1_center, 200.0, 3000.0) / rate;
        self.bands[1].set_params(
            BiquadType::Peaking,
            gain_limit(params.mid1_gain),
            f0,
            BiquadFilter::rcp_q_from_bandwidth(f0, clampf(params.mid1_width, 0.01, 1.0)),
        );

        let f0 = clampf(params.mid2_center, 1000.0, 8000.0) / rate;
        self.bands[2].set_params(
            BiquadType::Peaking,
            gain_limit(params.mid2_gain),
            f0,
            BiquadFilter::rcp_q_from_bandwidth(f0, clampf(params.mid2_width, 0.01, 1.0)),
        );

        let f0 = clampf(params.high_cutoff, 4000.0, 16000.0).min(rate * 0.49) / rate;
        self.bands[3].set_params(
            BiquadType::HighShelf,
            gain_limit(params.high_gain).sqrt(),
            f0,
            BiquadFilter::rcp_q_from_slope(gain_limit(params.high_gain).sqrt(), 0.75),
        );
    }

    pub fn process(&mut self, input: &[f32], out_left: &mut [f32], out_right: &mut [f32]) {
        for i in 0..input.len() {
            let mut s = input[i];
            for band in &mut self.bands {
                s = band.process_one(s);
            }
            out_left[i] = s;
            out_right[i] = s;
        }
    }

    pub fn clear(&mut self) {
        for band in &mut self.bands {
            band.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band_rms(eq: &mut Equalizer, f0norm: f32) -> f32 {
        let n = 16384;
        let input: Vec<f32> = (0..n)
            .map(|i| (std::f32::consts::TAU * f0norm * i as f32).sin())
            .collect();
        let mut left = vec![0.0f32; n];
        let mut right = vec![0.0f32; n];
        eq.process(&input, &mut left, &mut right);
        (left[n / 2..].iter().map(|&x| x * x).sum::<f32>() / (n / 2) as f32).sqrt()
    }

    #[test]
    fn test_flat_at_unity_gains() {
        let mut eq = Equalizer::new(44100);
        let rms = band_rms(&mut eq, 1000.0 / 44100.0);
        let reference = (0.5f32).sqrt();
        assert!((rms - reference).abs() / reference < 0.02);
    }

    #[test]
    fn test_low_cut_attenuates_bass() {
        let mut eq = Equalizer::new(44100);
        eq.set_params(&EqualizerParams {
            low_gain: 0.126,
            ..EqualizerParams::default()
        });
        let low = band_rms(&mut eq, 60.0 / 44100.0);
        eq.clear();
        let mid = band_rms(&mut eq, 1000.0 / 44100.0);
        assert!(low < mid * 0.3, "low {low} vs mid {mid}");
    }

    #[test]
    fn test_mid_boost_raises_center() {
        let mut eq = Equalizer::new(44100);
        eq.set_params(&EqualizerParams {
            mid1_gain: 4.0,
            ..EqualizerParams::default()
        });
        let boosted = band_rms(&mut eq, 500.0 / 44100.0);
        let reference = (0.5f32).sqrt();
        assert!(boosted > reference * 2.0, "boost missing: {boosted}");
    }
}
