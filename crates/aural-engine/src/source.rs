//! Sources: the user-facing playing objects
//!
//! A source is control-plane state (properties, the buffer queue, the
//! requested offset) plus a shared block the mixer reads: the property
//! publication cell and the status mirror a voice writes back. All
//! validation happens here before any state mutates.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use aural_core::{invalid_value, AuralResult};
use aural_dsp::ResamplerKind;
use aural_spatial::Vec3;

use crate::buffer::QueueEntry;
use crate::config::MAX_SENDS;
use crate::props::PropsCell;

/// Distance attenuation models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceModel {
    Inverse,
    #[default]
    InverseClamped,
    Linear,
    LinearClamped,
    Exponent,
    ExponentClamped,
    /// No distance attenuation.
    Off,
}

/// Playback state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SourceState {
    #[default]
    Initial = 0,
    Playing = 1,
    Paused = 2,
    Stopped = 3,
}

impl SourceState {
    pub fn from_u8(value: u8) -> SourceState {
        match value {
            1 => SourceState::Playing,
            2 => SourceState::Paused,
            3 => SourceState::Stopped,
            _ => SourceState::Initial,
        }
    }
}

/// How a source's queue was populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceType {
    #[default]
    Undetermined,
    /// A single item installed directly; the queue is immutable.
    Static,
    /// Populated through queue operations.
    Streaming,
}

/// Spatialization override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpatializeMode {
    Off,
    On,
    /// Spatialize mono content, pass multichannel content through.
    #[default]
    Auto,
}

/// Unit of a requested playback offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetKind {
    Seconds,
    Samples,
    Bytes,
}

/// Direct or send filter parameters (gains at the reference frequencies).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterProps {
    pub gain: f32,
    pub gain_hf: f32,
    pub hf_reference: f32,
    pub gain_lf: f32,
    pub lf_reference: f32,
}

impl Default for FilterProps {
    fn default() -> Self {
        Self {
            gain: 1.0,
            gain_hf: 1.0,
            hf_reference: 5000.0,
            gain_lf: 1.0,
            lf_reference: 250.0,
        }
    }
}

/// One auxiliary send: target slot plus its filter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SendProps {
    /// Target effect slot id, 0 for none.
    pub slot: u32,
    pub filter: FilterProps,
}

/// The complete user-facing property snapshot published to the mixer.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProps {
    pub position: Vec3,
    pub velocity: Vec3,
    pub direction: Vec3,
    /// Orientation for B-format content: (at, up).
    pub orientation: (Vec3, Vec3),
    pub head_relative: bool,
    pub distance_model: DistanceModel,

    pub gain: f32,
    pub min_gain: f32,
    pub max_gain: f32,
    pub pitch: f32,

    pub cone_inner_angle: f32,
    pub cone_outer_angle: f32,
    pub cone_outer_gain: f32,
    pub cone_outer_gain_hf: f32,

    pub reference_distance: f32,
    pub max_distance: f32,
    pub rolloff_factor: f32,
    pub room_rolloff_factor: f32,
    pub doppler_factor: f32,
    pub radius: f32,

    /// Stereo-pan angles in radians, positive left.
    pub stereo_angles: [f32; 2],

    pub direct_filter: FilterProps,
    pub sends: [SendProps; MAX_SENDS],
    pub dry_gain_hf_auto: bool,
    pub wet_gain_auto: bool,
    pub wet_gain_hf_auto: bool,

    pub resampler: ResamplerKind,
    pub direct_channels: bool,
    pub spatialize: SpatializeMode,
    pub looping: bool,
}

impl Default for SourceProps {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            direction: Vec3::ZERO,
            orientation: (Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 1.0, 0.0)),
            head_relative: false,
            distance_model: DistanceModel::InverseClamped,
            gain: 1.0,
            min_gain: 0.0,
            max_gain: 1.0,
            pitch: 1.0,
            cone_inner_angle: 360.0,
            cone_outer_angle: 360.0,
            cone_outer_gain: 0.0,
            cone_outer_gain_hf: 1.0,
            reference_distance: 1.0,
            max_distance: f32::MAX,
            rolloff_factor: 1.0,
            room_rolloff_factor: 0.0,
            doppler_factor: 1.0,
            radius: 0.0,
            stereo_angles: [std::f32::consts::FRAC_PI_6, -std::f32::consts::FRAC_PI_6],
            direct_filter: FilterProps::default(),
            sends: [SendProps::default(); MAX_SENDS],
            dry_gain_hf_auto: true,
            wet_gain_auto: true,
            wet_gain_hf_auto: true,
            resampler: ResamplerKind::Linear,
            direct_channels: false,
            spatialize: SpatializeMode::Auto,
            looping: false,
        }
    }
}

/// Status mirror written by the voice, read by control threads.
#[derive(Debug, Default)]
pub struct SourceStatus {
    state: AtomicU8,
    /// Index of the current queue item, absolute from the queue head.
    entry_index: AtomicU32,
    /// Sample frame within the current item.
    position: AtomicU64,
    position_frac: AtomicU32,
}

impl SourceStatus {
    pub fn state(&self) -> SourceState {
        SourceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: SourceState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn entry_index(&self) -> u32 {
        self.entry_index.load(Ordering::Acquire)
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn position_frac(&self) -> u32 {
        self.position_frac.load(Ordering::Acquire)
    }

    /// Voice-side bulk update at the end of a mix chunk.
    pub fn store_cursor(&self, entry_index: u32, position: u64, frac: u32) {
        self.entry_index.store(entry_index, Ordering::Relaxed);
        self.position.store(position, Ordering::Relaxed);
        self.position_frac.store(frac, Ordering::Release);
    }

    pub fn reset_cursor(&self) {
        self.store_cursor(0, 0, 0);
    }
}

/// The part of a source both sides share.
pub struct SourceShared {
    pub id: u32,
    pub status: SourceStatus,
    pub props: PropsCell<SourceProps>,
}

/// Control-plane source entity.
pub struct Source {
    pub shared: Arc<SourceShared>,
    /// Authoritative property values.
    pub params: SourceProps,
    /// The buffer queue, oldest first. Entries are shared with the voice
    /// by snapshot at play time.
    pub queue: VecDeque<Arc<QueueEntry>>,
    /// Items unqueued since the queue head was snapshotted; offsets the
    /// voice's absolute entry index.
    pub unqueued_items: u32,
    pub source_type: SourceType,
    /// Requested offset to apply at the next play (or immediately while
    /// playing).
    pub pending_offset: Option<(OffsetKind, f64)>,
    /// Whether a voice currently owns this source.
    pub has_voice: bool,
}

impl Source {
    pub fn new(id: u32) -> Self {
        Self {
            shared: Arc::new(SourceShared {
                id,
                status: SourceStatus::default(),
                props: PropsCell::new(),
            }),
            params: SourceProps::default(),
            queue: VecDeque::new(),
            unqueued_items: 0,
            source_type: SourceType::Undetermined,
            pending_offset: None,
            has_voice: false,
        }
    }

    /// Current state as the user sees it.
    pub fn state(&self) -> SourceState {
        self.shared.status.state()
    }

    /// Items fully played, as reported to the user: every queue entry
    /// before the voice's current one. A looping source reports zero.
    pub fn processed_count(&self) -> u32 {
        if self.params.looping {
            return 0;
        }
        self.shared
            .status
            .entry_index()
            .saturating_sub(self.unqueued_items)
            .min(self.queue.len() as u32)
    }

    /// Total queue length in sample frames.
    pub fn queue_frames(&self) -> u64 {
        self.queue.iter().map(|e| e.max_frames as u64).sum()
    }

    /// The sample offset as the user sees it: frames of all items before
    /// the current one, plus the intra-item position.
    ///
    /// A stopped source on a connected device reads 0; after a
    /// disconnect the offset freezes at the last rendered position.
    pub fn sample_offset(&self, device_connected: bool) -> u64 {
        match self.state() {
            SourceState::Initial => return 0,
            SourceState::Stopped if device_connected => return 0,
            _ => {}
        }
        let status = &self.shared.status;
        let entry = status.entry_index().saturating_sub(self.unqueued_items) as usize;
        let mut offset: u64 = self
            .queue
            .iter()
            .take(entry)
            .map(|e| e.max_frames as u64)
            .sum();
        offset += status.position();
        if self.params.looping {
            let total = self.queue_frames();
            if total > 0 {
                offset %= total;
            }
        }
        offset
    }

    /// Converts a requested offset into (absolute entry index, frame
    /// within that entry), walking the current queue.
    pub fn resolve_offset(&self, kind: OffsetKind, value: f64) -> AuralResult<(u32, u64)> {
        if !value.is_finite() || value < 0.0 {
            return Err(invalid_value(format!("offset {value} out of range")));
        }
        let head = self
            .queue
            .front()
            .ok_or_else(|| invalid_value("offset on an empty queue"))?;
        let data = &head.layers[0];

        let frames = match kind {
            OffsetKind::Samples => value as u64,
            OffsetKind::Seconds => (value * head.sample_rate as f64) as u64,
            OffsetKind::Bytes => {
                // Bytes round down to the containing block.
                let block_bytes = data.format.frame_or_block_size(data.align) as u64;
                let block = (value as u64) / block_bytes.max(1);
                block * data.align as u64
            }
        };

        let mut remaining = frames;
        for (index, entry) in self.queue.iter().enumerate() {
            let len = entry.max_frames as u64;
            if remaining < len {
                // Align into the entry's compressed blocks.
                let aligned = data
                    .format
                    .align_frame_down(remaining as usize, data.align)
                    as u64;
                return Ok(((index as u32) + self.unqueued_items, aligned));
            }
            remaining -= len;
        }
        Err(invalid_value(format!(
            "offset {frames} frames past the end of the queue"
        )))
    }
}

/// Validation helpers used by the property setters.
pub mod validate {
    use super::*;

    pub fn finite(value: f32, what: &str) -> AuralResult<f32> {
        if value.is_finite() {
            Ok(value)
        } else {
            Err(invalid_value(format!("{what} must be finite")))
        }
    }

    pub fn non_negative(value: f32, what: &str) -> AuralResult<f32> {
        if value.is_finite() && value >= 0.0 {
            Ok(value)
        } else {
            Err(invalid_value(format!("{what} must be >= 0, got {value}")))
        }
    }

    pub fn unit_range(value: f32, what: &str) -> AuralResult<f32> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(value)
        } else {
            Err(invalid_value(format!("{what} must be in 0..1, got {value}")))
        }
    }

    pub fn angle_degrees(value: f32, what: &str) -> AuralResult<f32> {
        if value.is_finite() && (0.0..=360.0).contains(&value) {
            Ok(value)
        } else {
            Err(invalid_value(format!(
                "{what} must be in 0..360 degrees, got {value}"
            )))
        }
    }

    pub fn vector(v: Vec3, what: &str) -> AuralResult<Vec3> {
        if v.is_finite() {
            Ok(v)
        } else {
            Err(invalid_value(format!("{what} must be finite")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aural_core::{BufferLayout, SampleType, StorageFormat};
    use crate::buffer::BufferData;

    fn entry(frames: usize, rate: u32) -> Arc<QueueEntry> {
        let data = Arc::new(BufferData {
            format: StorageFormat::new(BufferLayout::Mono, SampleType::I16),
            sample_rate: rate,
            frames,
            align: 1,
            loop_start: 0,
            loop_end: frames,
            bytes: vec![0; frames * 2],
        });
        QueueEntry::from_layers(vec![(1, data)]).unwrap()
    }

    #[test]
    fn test_default_props_match_contract() {
        let props = SourceProps::default();
        assert_eq!(props.gain, 1.0);
        assert_eq!(props.pitch, 1.0);
        assert_eq!(props.cone_inner_angle, 360.0);
        assert_eq!(props.distance_model, DistanceModel::InverseClamped);
        assert!(!props.looping);
    }

    #[test]
    fn test_processed_count_zero_when_looping() {
        let mut source = Source::new(1);
        source.queue.push_back(entry(100, 44100));
        source.shared.status.store_cursor(1, 0, 0);
        assert_eq!(source.processed_count(), 1);
        source.params.looping = true;
        assert_eq!(source.processed_count(), 0);
    }

    #[test]
    fn test_sample_offset_accumulates_entries() {
        let mut source = Source::new(1);
        source.queue.push_back(entry(100, 44100));
        source.queue.push_back(entry(50, 44100));
        source.shared.status.set_state(SourceState::Playing);
        source.shared.status.store_cursor(1, 20, 0);
        assert_eq!(source.sample_offset(true), 120);
    }

    #[test]
    fn test_sample_offset_wraps_when_looping() {
        let mut source = Source::new(1);
        source.queue.push_back(entry(100, 44100));
        source.params.looping = true;
        source.shared.status.set_state(SourceState::Playing);
        source.shared.status.store_cursor(0, 100, 0);
        assert_eq!(source.sample_offset(true), 0);
    }

    #[test]
    fn test_resolve_offset_seconds() {
        let mut source = Source::new(1);
        source.queue.push_back(entry(44100, 44100));
        let (index, frame) = source.resolve_offset(OffsetKind::Seconds, 0.5).unwrap();
        assert_eq!(index, 0);
        assert_eq!(frame, 22050);
    }

    #[test]
    fn test_resolve_offset_across_entries() {
        let mut source = Source::new(1);
        source.queue.push_back(entry(100, 44100));
        source.queue.push_back(entry(100, 44100));
        let (index, frame) = source.resolve_offset(OffsetKind::Samples, 150.0).unwrap();
        assert_eq!(index, 1);
        assert_eq!(frame, 50);
    }

    #[test]
    fn test_resolve_offset_past_end_fails() {
        let mut source = Source::new(1);
        source.queue.push_back(entry(100, 44100));
        assert!(source.resolve_offset(OffsetKind::Samples, 100.0).is_err());
        assert!(source.resolve_offset(OffsetKind::Samples, -1.0).is_err());
        assert!(source
            .resolve_offset(OffsetKind::Samples, f64::NAN)
            .is_err());
    }

    #[test]
    fn test_validate_helpers() {
        assert!(validate::non_negative(-0.1, "gain").is_err());
        assert!(validate::non_negative(0.0, "gain").is_ok());
        assert!(validate::unit_range(1.5, "cone").is_err());
        assert!(validate::angle_degrees(400.0, "angle").is_err());
        assert!(validate::vector(Vec3::new(f32::NAN, 0.0, 0.0), "pos").is_err());
    }
}
