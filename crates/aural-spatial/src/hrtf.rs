//! Synthetic head-related transfer functions
//!
//! A spherical-head model generates the impulse-response set at device
//! open: interaural time difference from the Woodworth formula, a pan-law
//! level difference, and a one-pole low-pass shadow on the far ear. The
//! set is keyed by sample rate and memoized for the process lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::position::Vec3;

/// Impulse response length per ear.
pub const HRIR_LENGTH: usize = 32;

/// Samples of input history a voice must keep per channel for HRTF
/// mixing (IR length plus the largest interaural delay at 96 kHz).
pub const HRTF_HISTORY: usize = 96;

/// Head radius in meters for the ITD model.
const HEAD_RADIUS: f32 = 0.0875;
const SPEED_OF_SOUND: f32 = 343.3;

/// Grid resolution in degrees.
const AZ_STEP: i32 = 15;
const EL_STEP: i32 = 15;

/// One direction's impulse-response pair with integer ear delays.
#[derive(Debug, Clone)]
pub struct Hrir {
    pub left: [f32; HRIR_LENGTH],
    pub right: [f32; HRIR_LENGTH],
    /// Whole-sample onset delay per ear.
    pub delay_left: u32,
    pub delay_right: u32,
}

impl Hrir {
    fn silent() -> Self {
        Self {
            left: [0.0; HRIR_LENGTH],
            right: [0.0; HRIR_LENGTH],
            delay_left: 0,
            delay_right: 0,
        }
    }
}

/// The full direction-indexed set for one sample rate.
pub struct HrtfTable {
    hrirs: HashMap<(i32, i32), Hrir>,
    sample_rate: u32,
    max_delay: u32,
}

impl HrtfTable {
    /// Returns the memoized table for a sample rate, building it on first
    /// use.
    pub fn for_rate(sample_rate: u32) -> Arc<HrtfTable> {
        static CACHE: Mutex<Option<HashMap<u32, Arc<HrtfTable>>>> = Mutex::new(None);
        let mut cache = CACHE.lock();
        let map = cache.get_or_insert_with(HashMap::new);
        map.entry(sample_rate)
            .or_insert_with(|| Arc::new(HrtfTable::build(sample_rate)))
            .clone()
    }

    fn build(sample_rate: u32) -> Self {
        let mut hrirs = HashMap::new();
        let mut max_delay = 0u32;
        let mut az = -180;
        while az < 180 {
            let mut el = -90;
            while el <= 90 {
                let hrir = synth_hrir(az as f32, el as f32, sample_rate);
                max_delay = max_delay.max(hrir.delay_left).max(hrir.delay_right);
                hrirs.insert((az / AZ_STEP, el / EL_STEP), hrir);
                el += EL_STEP;
            }
            az += AZ_STEP;
        }
        log::debug!(
            "built synthetic HRTF set: {} directions at {sample_rate} Hz",
            hrirs.len()
        );
        Self {
            hrirs,
            sample_rate,
            max_delay,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Largest onset delay in the set.
    pub fn max_delay(&self) -> u32 {
        self.max_delay
    }

    /// Nearest-direction lookup for a listener-space unit direction.
    pub fn get(&self, dir: Vec3) -> &Hrir {
        // Listener space to az/el: azimuth positive right, elevation
        // positive up.
        let azimuth = dir.x.atan2(-dir.z).to_degrees();
        let elevation = dir
            .y
            .clamp(-1.0, 1.0)
            .asin()
            .to_degrees();

        let mut az_idx = (azimuth / AZ_STEP as f32).round() as i32;
        let el_idx = (elevation / EL_STEP as f32).round() as i32;
        let az_span = 360 / AZ_STEP;
        if az_idx >= az_span / 2 {
            az_idx -= az_span;
        }
        if az_idx < -az_span / 2 {
            az_idx += az_span;
        }

        self.hrirs
            .get(&(az_idx, el_idx.clamp(-(90 / EL_STEP), 90 / EL_STEP)))
            .unwrap_or_else(|| {
                static SILENT: std::sync::OnceLock<Hrir> = std::sync::OnceLock::new();
                SILENT.get_or_init(Hrir::silent)
            })
    }
}

/// Builds one direction's impulse response from the spherical-head model.
fn synth_hrir(azimuth: f32, elevation: f32, sample_rate: u32) -> Hrir {
    let az = azimuth.to_radians();
    let el = elevation.to_radians();
    let rate = sample_rate as f32;

    // Lateral angle drives both ITD and ILD; elevation shrinks it.
    let lateral = az.sin() * el.cos();

    // Woodworth ITD for the far ear.
    let itd_seconds = HEAD_RADIUS / SPEED_OF_SOUND * (lateral.asin() + lateral).abs();
    let itd_samples = (itd_seconds * rate).round() as u32;

    // Constant-power level difference.
    let pan = lateral.clamp(-1.0, 1.0);
    let left_gain = ((1.0 + pan) * 0.25 * std::f32::consts::PI).cos();
    let right_gain = ((1.0 + pan) * 0.25 * std::f32::consts::PI).sin();

    // Far-ear head shadow: a one-pole low-pass, stronger with lateralness.
    let shadow = pan.abs() * 0.6;

    let mut hrir = Hrir {
        left: [0.0; HRIR_LENGTH],
        right: [0.0; HRIR_LENGTH],
        delay_left: if pan > 0.0 { itd_samples } else { 0 },
        delay_right: if pan < 0.0 { itd_samples } else { 0 },
    };

    // A short raised-cosine burst as the direct impulse; a pinna notch
    // scales faintly with elevation so up/down differ.
    let burst = 4usize;
    for i in 0..burst {
        let w = 0.5 - 0.5 * (std::f32::consts::TAU * (i as f32 + 0.5) / burst as f32).cos();
        hrir.left[i] = left_gain * w * if i == 1 { 1.0 } else { 0.35 };
        hrir.right[i] = right_gain * w * if i == 1 { 1.0 } else { 0.35 };
    }
    let pinna_at = 8 + ((el / std::f32::consts::FRAC_PI_2) * 4.0) as isize;
    let pinna_at = pinna_at.clamp(4, HRIR_LENGTH as isize - 1) as usize;
    hrir.left[pinna_at] += left_gain * 0.18;
    hrir.right[pinna_at] += right_gain * 0.18;

    // Low-pass the far ear in place.
    let (far, coeff) = if pan > 0.0 {
        (&mut hrir.left, 1.0 - shadow)
    } else {
        (&mut hrir.right, 1.0 - shadow)
    };
    if shadow > 0.0 {
        let mut state = 0.0f32;
        for s in far.iter_mut() {
            state += (*s - state) * coeff;
            *s = state;
        }
    }

    hrir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_memoized_per_rate() {
        let a = HrtfTable::for_rate(44100);
        let b = HrtfTable::for_rate(44100);
        assert!(Arc::ptr_eq(&a, &b));
        let c = HrtfTable::for_rate(48000);
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_front_is_symmetric() {
        let table = HrtfTable::for_rate(44100);
        let hrir = table.get(Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(hrir.delay_left, hrir.delay_right);
        for i in 0..HRIR_LENGTH {
            assert!((hrir.left[i] - hrir.right[i]).abs() < 1e-5);
        }
    }

    #[test]
    fn test_right_source_delays_left_ear() {
        let table = HrtfTable::for_rate(44100);
        let hrir = table.get(Vec3::new(1.0, 0.0, 0.0));
        assert!(hrir.delay_left > hrir.delay_right);
        let energy = |ir: &[f32; HRIR_LENGTH]| ir.iter().map(|x| x * x).sum::<f32>();
        assert!(energy(&hrir.right) > energy(&hrir.left));
    }

    #[test]
    fn test_max_delay_fits_history() {
        let table = HrtfTable::for_rate(96000);
        assert!((table.max_delay() as usize) + HRIR_LENGTH <= HRTF_HISTORY);
    }

    #[test]
    fn test_behind_wraps_cleanly() {
        let table = HrtfTable::for_rate(44100);
        let hrir = table.get(Vec3::new(0.0, 0.0, 1.0));
        let energy: f32 = hrir.left.iter().map(|x| x * x).sum();
        assert!(energy > 0.0);
    }
}
