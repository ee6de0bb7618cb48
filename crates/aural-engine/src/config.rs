//! Device configuration loaded from a TOML file
//!
//! Every field has a default; unknown keys are ignored and out-of-range
//! values fall back with a warning, so a stale config never prevents a
//! device from opening.

use std::path::Path;

use serde::Deserialize;

use aural_core::{AmbiNorm, AmbiOrder, DeviceLayout};
use aural_dsp::{OutputType, ResamplerKind};

/// HRTF request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HrtfMode {
    /// Use HRTF when the output layout is stereo.
    #[default]
    Auto,
    On,
    Off,
}

/// Raw file schema; everything optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    sample_rate: Option<u32>,
    period_frames: Option<u32>,
    period_count: Option<u32>,
    channels: Option<String>,
    sample_format: Option<String>,
    ambisonic_order: Option<u32>,
    ambisonic_scaling: Option<String>,
    hrtf: Option<String>,
    resampler: Option<String>,
    max_voices: Option<u32>,
    sends: Option<u32>,
}

/// Resolved device configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceConfig {
    pub sample_rate: u32,
    /// Frames mixed per update.
    pub period_frames: u32,
    /// Periods in the backend buffer.
    pub period_count: u32,
    pub layout: DeviceLayout,
    pub output_type: OutputType,
    /// Ambisonic order of the dry bus.
    pub order: AmbiOrder,
    /// Normalization of raw ambisonic output.
    pub ambi_scaling: AmbiNorm,
    pub hrtf: HrtfMode,
    pub default_resampler: ResamplerKind,
    pub max_voices: u32,
    /// Auxiliary sends per source.
    pub sends: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            period_frames: 1024,
            period_count: 3,
            layout: DeviceLayout::Stereo,
            output_type: OutputType::F32,
            order: AmbiOrder::First,
            ambi_scaling: AmbiNorm::Sn3d,
            hrtf: HrtfMode::Auto,
            default_resampler: ResamplerKind::Linear,
            max_voices: 64,
            sends: 2,
        }
    }
}

/// Hard cap on per-source sends.
pub const MAX_SENDS: usize = 4;

impl DeviceConfig {
    /// Parses a TOML string, falling back per field.
    pub fn from_toml(text: &str) -> Self {
        match toml::from_str::<RawConfig>(text) {
            Ok(raw) => Self::from_raw(raw),
            Err(err) => {
                log::warn!("config parse failed, using defaults: {err}");
                Self::default()
            }
        }
    }

    /// Loads a config file; a missing file is not an error.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(err) => {
                log::info!("no config at {}: {err}", path.display());
                Self::default()
            }
        }
    }

    fn from_raw(raw: RawConfig) -> Self {
        let defaults = Self::default();
        let mut config = defaults;

        if let Some(rate) = raw.sample_rate {
            if (8000..=192000).contains(&rate) {
                config.sample_rate = rate;
            } else {
                log::warn!("sample_rate {rate} out of range, keeping {}", config.sample_rate);
            }
        }
        if let Some(frames) = raw.period_frames {
            if (64..=8192).contains(&frames) {
                config.period_frames = frames;
            } else {
                log::warn!("period_frames {frames} out of range");
            }
        }
        if let Some(count) = raw.period_count {
            config.period_count = count.clamp(2, 8);
        }
        if let Some(ref name) = raw.channels {
            match parse_layout(name) {
                Some(layout) => config.layout = layout,
                None => log::warn!("unknown channel layout {name:?}"),
            }
        }
        if let Some(ref name) = raw.sample_format {
            match name.as_str() {
                "u8" => config.output_type = OutputType::U8,
                "i16" => config.output_type = OutputType::I16,
                "i32" => config.output_type = OutputType::I32,
                "f32" => config.output_type = OutputType::F32,
                other => log::warn!("unknown sample format {other:?}"),
            }
        }
        if let Some(order) = raw.ambisonic_order {
            match AmbiOrder::from_order(order as usize) {
                Some(order) => config.order = order,
                None => log::warn!("ambisonic order {order} unsupported"),
            }
        }
        if let Some(ref name) = raw.ambisonic_scaling {
            match name.as_str() {
                "sn3d" => config.ambi_scaling = AmbiNorm::Sn3d,
                "n3d" => config.ambi_scaling = AmbiNorm::N3d,
                other => log::warn!("unknown ambisonic scaling {other:?}"),
            }
        }
        if let Some(ref mode) = raw.hrtf {
            match mode.as_str() {
                "auto" => config.hrtf = HrtfMode::Auto,
                "on" | "true" => config.hrtf = HrtfMode::On,
                "off" | "false" => config.hrtf = HrtfMode::Off,
                other => log::warn!("unknown hrtf mode {other:?}"),
            }
        }
        if let Some(ref name) = raw.resampler {
            match parse_resampler(name) {
                Some(kind) => config.default_resampler = kind,
                None => log::warn!("unknown resampler {name:?}"),
            }
        }
        if let Some(voices) = raw.max_voices {
            config.max_voices = voices.clamp(1, 1024);
        }
        if let Some(sends) = raw.sends {
            config.sends = sends.min(MAX_SENDS as u32);
        }
        config
    }

    /// Total backend buffer size in frames.
    pub fn buffer_frames(&self) -> u32 {
        self.period_frames * self.period_count
    }
}

fn parse_layout(name: &str) -> Option<DeviceLayout> {
    match name {
        "mono" => Some(DeviceLayout::Mono),
        "stereo" => Some(DeviceLayout::Stereo),
        "quad" => Some(DeviceLayout::Quad),
        "surround51" | "5.1" => Some(DeviceLayout::Surround51),
        "surround61" | "6.1" => Some(DeviceLayout::Surround61),
        "surround71" | "7.1" => Some(DeviceLayout::Surround71),
        "ambi1" => Some(DeviceLayout::Ambisonic(AmbiOrder::First)),
        "ambi2" => Some(DeviceLayout::Ambisonic(AmbiOrder::Second)),
        "ambi3" => Some(DeviceLayout::Ambisonic(AmbiOrder::Third)),
        _ => None,
    }
}

fn parse_resampler(name: &str) -> Option<ResamplerKind> {
    match name {
        "point" => Some(ResamplerKind::Point),
        "linear" => Some(ResamplerKind::Linear),
        "cubic" => Some(ResamplerKind::Cubic),
        "bsinc12" => Some(ResamplerKind::Bsinc12),
        "bsinc24" => Some(ResamplerKind::Bsinc24),
        "fast_bsinc12" => Some(ResamplerKind::FastBsinc12),
        "fast_bsinc24" => Some(ResamplerKind::FastBsinc24),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.period_frames, 1024);
        assert_eq!(config.layout, DeviceLayout::Stereo);
    }

    #[test]
    fn test_parse_full_config() {
        let config = DeviceConfig::from_toml(
            r#"
            sample_rate = 48000
            period_frames = 512
            channels = "7.1"
            sample_format = "i16"
            ambisonic_order = 2
            hrtf = "off"
            resampler = "bsinc12"
            sends = 4
            "#,
        );
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.period_frames, 512);
        assert_eq!(config.layout, DeviceLayout::Surround71);
        assert_eq!(config.output_type, OutputType::I16);
        assert_eq!(config.order, AmbiOrder::Second);
        assert_eq!(config.hrtf, HrtfMode::Off);
        assert_eq!(config.default_resampler, ResamplerKind::Bsinc12);
        assert_eq!(config.sends, 4);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = DeviceConfig::from_toml(
            r#"
            sample_rate = 999999
            channels = "11.2"
            unknown_key = 3
            "#,
        );
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.layout, DeviceLayout::Stereo);
    }

    #[test]
    fn test_garbage_is_defaults() {
        let config = DeviceConfig::from_toml("not [valid toml");
        assert_eq!(config, DeviceConfig::default());
    }
}
