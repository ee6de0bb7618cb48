//! Contexts: the per-listener world and its control API
//!
//! A context owns the listener, the source/slot/filter/effect tables, and
//! the async event consumer. Every handle operation validates first, then
//! mutates under the context lock, then publishes property snapshots to
//! the mixer (immediately, or on `process_updates` while updates are
//! deferred). Structural changes ride the device's message ring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_utils::atomic::AtomicCell;
use parking_lot::Mutex;

use aural_core::{invalid_op, invalid_value, AuralError, AuralResult};
use aural_dsp::ResamplerKind;
use aural_spatial::Vec3;

use crate::buffer::QueueEntry;
use crate::config::MAX_SENDS;
use crate::device::Device;
use crate::events::EngineEvent;
use crate::handle::HandleTable;
use crate::mixer::MixMsg;
use crate::slot::{EffectObject, EffectParams, EffectSlot, EffectState, FilterObject};
use crate::source::{
    validate, DistanceModel, OffsetKind, Source, SourceProps, SourceState, SourceType,
    SpatializeMode,
};

/// Listener snapshot published to the mixer.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerProps {
    pub position: Vec3,
    pub velocity: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    pub gain: f32,
    pub meters_per_unit: f32,
}

impl Default for ListenerProps {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            forward: Vec3::new(0.0, 0.0, -1.0),
            up: Vec3::new(0.0, 1.0, 0.0),
            gain: 1.0,
            meters_per_unit: 1.0,
        }
    }
}

/// Context globals published to the mixer.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextProps {
    pub distance_model: DistanceModel,
    /// Per-source distance models are honored when set.
    pub source_distance_model: bool,
    pub doppler_factor: f32,
    pub speed_of_sound: f32,
}

impl Default for ContextProps {
    fn default() -> Self {
        Self {
            distance_model: DistanceModel::InverseClamped,
            source_distance_model: false,
            doppler_factor: 1.0,
            speed_of_sound: 343.3,
        }
    }
}

/// The context block shared with the mixer.
pub struct ContextShared {
    pub id: u32,
    pub listener: crate::props::PropsCell<ListenerProps>,
    pub globals: crate::props::PropsCell<ContextProps>,
    /// Freshly published active-slot snapshot (topologically ordered,
    /// targets after their feeders).
    pub pending_slots: AtomicCell<Option<Arc<Vec<u32>>>>,
    /// Snapshot the mixer displaced; reclaimed control-side.
    pub retired_slots: AtomicCell<Option<Arc<Vec<u32>>>>,
}

struct ContextInner {
    listener: ListenerProps,
    globals: ContextProps,
    sources: HandleTable<Source>,
    slots: HandleTable<EffectSlot>,
    filters: HandleTable<FilterObject>,
    effects: HandleTable<EffectObject>,
}

/// A per-listener rendering context.
pub struct Context {
    pub(crate) shared: Arc<ContextShared>,
    pub(crate) device: Arc<Device>,
    inner: Mutex<ContextInner>,
    events: Mutex<rtrb::Consumer<EngineEvent>>,
    defer: AtomicBool,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.shared.id)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub(crate) fn new(
        device: Arc<Device>,
        id: u32,
        events: rtrb::Consumer<EngineEvent>,
    ) -> Arc<Context> {
        Arc::new(Context {
            shared: Arc::new(ContextShared {
                id,
                listener: crate::props::PropsCell::new(),
                globals: crate::props::PropsCell::new(),
                pending_slots: AtomicCell::new(None),
                retired_slots: AtomicCell::new(None),
            }),
            device,
            inner: Mutex::new(ContextInner {
                listener: ListenerProps::default(),
                globals: ContextProps::default(),
                sources: HandleTable::new(),
                slots: HandleTable::new(),
                filters: HandleTable::new(),
                effects: HandleTable::new(),
            }),
            events: Mutex::new(events),
            defer: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u32 {
        self.shared.id
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Drains one pending async event.
    pub fn poll_event(&self) -> Option<EngineEvent> {
        self.shared.retired_slots.take();
        self.events.lock().pop().ok()
    }

    // ---------------------------------------------------------------
    // Deferred updates
    // ---------------------------------------------------------------

    /// While set, property mutations accumulate without reaching the
    /// mixer.
    pub fn defer_updates(&self, defer: bool) {
        let was = self.defer.swap(defer, Ordering::AcqRel);
        if was && !defer {
            self.process_updates();
        }
    }

    pub fn updates_deferred(&self) -> bool {
        self.defer.load(Ordering::Acquire)
    }

    /// Publishes every dirty entity in one pass.
    pub fn process_updates(&self) {
        let inner = self.inner.lock();
        if !self.shared.listener.is_clean() {
            let snapshot = inner.listener.clone();
            self.shared.listener.publish(|p| *p = snapshot.clone());
        }
        if !self.shared.globals.is_clean() {
            let snapshot = inner.globals.clone();
            self.shared.globals.publish(|p| *p = snapshot.clone());
        }
        for (_, source) in inner.sources.iter() {
            if !source.shared.props.is_clean() {
                let snapshot = source.params.clone();
                source.shared.props.publish(|p| *p = snapshot.clone());
            }
        }
        for (_, slot) in inner.slots.iter() {
            if !slot.shared.props.is_clean() {
                slot.publish();
            }
        }
    }

    fn publish_listener(&self, inner: &ContextInner) {
        if self.updates_deferred() {
            self.shared.listener.mark_dirty();
        } else {
            let snapshot = inner.listener.clone();
            self.shared.listener.publish(|p| *p = snapshot.clone());
        }
    }

    fn publish_globals(&self, inner: &ContextInner) {
        if self.updates_deferred() {
            self.shared.globals.mark_dirty();
        } else {
            let snapshot = inner.globals.clone();
            self.shared.globals.publish(|p| *p = snapshot.clone());
        }
    }

    fn publish_source(&self, source: &Source) {
        if self.updates_deferred() {
            source.shared.props.mark_dirty();
        } else {
            let snapshot = source.params.clone();
            source.shared.props.publish(|p| *p = snapshot.clone());
        }
    }

    fn publish_slot(&self, slot: &EffectSlot) {
        if self.updates_deferred() {
            slot.shared.props.mark_dirty();
        } else {
            slot.publish();
        }
    }

    // ---------------------------------------------------------------
    // Listener and globals
    // ---------------------------------------------------------------

    pub fn set_listener_position(&self, position: Vec3) -> AuralResult<()> {
        let position = validate::vector(position, "listener position")?;
        let mut inner = self.inner.lock();
        inner.listener.position = position;
        self.publish_listener(&inner);
        Ok(())
    }

    pub fn set_listener_velocity(&self, velocity: Vec3) -> AuralResult<()> {
        let velocity = validate::vector(velocity, "listener velocity")?;
        let mut inner = self.inner.lock();
        inner.listener.velocity = velocity;
        self.publish_listener(&inner);
        Ok(())
    }

    pub fn set_listener_orientation(&self, forward: Vec3, up: Vec3) -> AuralResult<()> {
        let forward = validate::vector(forward, "listener at-vector")?;
        let up = validate::vector(up, "listener up-vector")?;
        let mut inner = self.inner.lock();
        inner.listener.forward = forward;
        inner.listener.up = up;
        self.publish_listener(&inner);
        Ok(())
    }

    pub fn set_listener_gain(&self, gain: f32) -> AuralResult<()> {
        let gain = validate::non_negative(gain, "listener gain")?;
        let mut inner = self.inner.lock();
        inner.listener.gain = gain;
        self.publish_listener(&inner);
        Ok(())
    }

    pub fn set_meters_per_unit(&self, meters: f32) -> AuralResult<()> {
        if !meters.is_finite() || meters <= 0.0 {
            return Err(invalid_value("meters-per-unit must be positive"));
        }
        let mut inner = self.inner.lock();
        inner.listener.meters_per_unit = meters;
        self.publish_listener(&inner);
        Ok(())
    }

    pub fn listener(&self) -> ListenerProps {
        self.inner.lock().listener.clone()
    }

    pub fn set_distance_model(&self, model: DistanceModel) {
        let mut inner = self.inner.lock();
        inner.globals.distance_model = model;
        self.publish_globals(&inner);
    }

    pub fn set_source_distance_model(&self, enabled: bool) {
        let mut inner = self.inner.lock();
        inner.globals.source_distance_model = enabled;
        self.publish_globals(&inner);
    }

    pub fn set_doppler_factor(&self, factor: f32) -> AuralResult<()> {
        let factor = validate::non_negative(factor, "doppler factor")?;
        let mut inner = self.inner.lock();
        inner.globals.doppler_factor = factor;
        self.publish_globals(&inner);
        Ok(())
    }

    pub fn set_speed_of_sound(&self, speed: f32) -> AuralResult<()> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(invalid_value("speed of sound must be positive"));
        }
        let mut inner = self.inner.lock();
        inner.globals.speed_of_sound = speed;
        self.publish_globals(&inner);
        Ok(())
    }

    pub fn globals(&self) -> ContextProps {
        self.inner.lock().globals.clone()
    }

    // ---------------------------------------------------------------
    // Sources
    // ---------------------------------------------------------------

    pub fn gen_sources(&self, count: usize) -> AuralResult<Vec<u32>> {
        let mut inner = self.inner.lock();
        if inner.sources.len() + count > self.device.config().max_voices as usize * 4 {
            return Err(AuralError::OutOfMemory("source cap reached"));
        }
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            // The slab hands us the slot index; the entity needs its own
            // id, so insert a placeholder and fix it up.
            let id = inner.sources.insert(Source::new(0));
            *inner.sources.get_mut(id).unwrap() = Source::new(id);
            ids.push(id);
        }
        Ok(ids)
    }

    pub fn delete_sources(&self, ids: &[u32]) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        for &id in ids {
            if !inner.sources.contains(id) {
                return Err(AuralError::InvalidName(id));
            }
        }
        for &id in ids {
            if let Some(source) = inner.sources.remove(id) {
                if source.has_voice {
                    self.device.push_msg(MixMsg::Detach { source_id: id });
                }
                self.release_send_refs(&mut inner, &source.params);
                for entry in &source.queue {
                    for &buffer_id in &entry.buffer_ids {
                        self.device.buffers().release(buffer_id);
                    }
                }
            }
        }
        Ok(())
    }

    fn release_send_refs(&self, inner: &mut ContextInner, params: &SourceProps) {
        for send in &params.sends {
            if send.slot != 0 {
                if let Some(slot) = inner.slots.get_mut(send.slot) {
                    slot.refs = slot.refs.saturating_sub(1);
                }
            }
        }
    }

    /// Runs a closure against one source and republishes its properties.
    fn with_source<R>(
        &self,
        id: u32,
        op: impl FnOnce(&mut Source, &ContextProps) -> AuralResult<R>,
    ) -> AuralResult<R> {
        let mut inner = self.inner.lock();
        let globals = inner.globals.clone();
        let source = inner
            .sources
            .get_mut(id)
            .ok_or(AuralError::InvalidName(id))?;
        let result = op(source, &globals)?;
        let source = inner.sources.get(id).expect("source still present");
        self.publish_source(source);
        Ok(result)
    }

    /// Read-only access without republication.
    fn read_source<R>(&self, id: u32, op: impl FnOnce(&Source) -> R) -> AuralResult<R> {
        let inner = self.inner.lock();
        let source = inner.sources.get(id).ok_or(AuralError::InvalidName(id))?;
        Ok(op(source))
    }

    pub fn source_set_position(&self, id: u32, position: Vec3) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.position = validate::vector(position, "source position")?;
            Ok(())
        })
    }

    pub fn source_set_velocity(&self, id: u32, velocity: Vec3) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.velocity = validate::vector(velocity, "source velocity")?;
            Ok(())
        })
    }

    pub fn source_set_direction(&self, id: u32, direction: Vec3) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.direction = validate::vector(direction, "source direction")?;
            Ok(())
        })
    }

    pub fn source_set_orientation(&self, id: u32, at: Vec3, up: Vec3) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.orientation = (
                validate::vector(at, "source at-vector")?,
                validate::vector(up, "source up-vector")?,
            );
            Ok(())
        })
    }

    pub fn source_set_head_relative(&self, id: u32, relative: bool) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.head_relative = relative;
            Ok(())
        })
    }

    pub fn source_set_gain(&self, id: u32, gain: f32) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.gain = validate::non_negative(gain, "source gain")?;
            Ok(())
        })
    }

    pub fn source_set_min_gain(&self, id: u32, gain: f32) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.min_gain = validate::unit_range(gain, "min gain")?;
            Ok(())
        })
    }

    pub fn source_set_max_gain(&self, id: u32, gain: f32) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.max_gain = validate::unit_range(gain, "max gain")?;
            Ok(())
        })
    }

    /// Pitch 0 is accepted; the mixer clamps the step to its minimum so
    /// playback crawls without dividing by zero.
    pub fn source_set_pitch(&self, id: u32, pitch: f32) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            if !pitch.is_finite() || pitch < 0.0 {
                return Err(invalid_value(format!("pitch {pitch} out of range")));
            }
            s.params.pitch = pitch;
            Ok(())
        })
    }

    pub fn source_set_cone(
        &self,
        id: u32,
        inner_angle: f32,
        outer_angle: f32,
        outer_gain: f32,
    ) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.cone_inner_angle = validate::angle_degrees(inner_angle, "cone inner angle")?;
            s.params.cone_outer_angle = validate::angle_degrees(outer_angle, "cone outer angle")?;
            s.params.cone_outer_gain = validate::unit_range(outer_gain, "cone outer gain")?;
            Ok(())
        })
    }

    pub fn source_set_cone_outer_gain_hf(&self, id: u32, gain: f32) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.cone_outer_gain_hf = validate::unit_range(gain, "cone outer gainHF")?;
            Ok(())
        })
    }

    pub fn source_set_reference_distance(&self, id: u32, distance: f32) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.reference_distance = validate::non_negative(distance, "reference distance")?;
            Ok(())
        })
    }

    pub fn source_set_max_distance(&self, id: u32, distance: f32) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.max_distance = validate::non_negative(distance, "max distance")?;
            Ok(())
        })
    }

    pub fn source_set_rolloff(&self, id: u32, rolloff: f32) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.rolloff_factor = validate::non_negative(rolloff, "rolloff factor")?;
            Ok(())
        })
    }

    pub fn source_set_room_rolloff(&self, id: u32, rolloff: f32) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.room_rolloff_factor =
                validate::non_negative(rolloff, "room rolloff factor")?;
            Ok(())
        })
    }

    pub fn source_set_doppler_factor(&self, id: u32, factor: f32) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.doppler_factor = validate::unit_range(factor, "source doppler factor")?;
            Ok(())
        })
    }

    pub fn source_set_radius(&self, id: u32, radius: f32) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.radius = validate::non_negative(radius, "source radius")?;
            Ok(())
        })
    }

    pub fn source_set_stereo_angles(&self, id: u32, left: f32, right: f32) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.stereo_angles = [
                validate::finite(left, "stereo angle")?,
                validate::finite(right, "stereo angle")?,
            ];
            Ok(())
        })
    }

    pub fn source_set_looping(&self, id: u32, looping: bool) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.looping = looping;
            Ok(())
        })
    }

    /// Requires the per-source distance model switch to be enabled.
    pub fn source_set_distance_model(&self, id: u32, model: DistanceModel) -> AuralResult<()> {
        self.with_source(id, |s, globals| {
            if !globals.source_distance_model {
                return Err(invalid_op(
                    "per-source distance models are disabled on this context",
                ));
            }
            s.params.distance_model = model;
            Ok(())
        })
    }

    pub fn source_set_resampler(&self, id: u32, kind: ResamplerKind) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.resampler = kind;
            Ok(())
        })
    }

    pub fn source_set_direct_channels(&self, id: u32, enabled: bool) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.direct_channels = enabled;
            Ok(())
        })
    }

    pub fn source_set_spatialize(&self, id: u32, mode: SpatializeMode) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.spatialize = mode;
            Ok(())
        })
    }

    pub fn source_set_auto_flags(
        &self,
        id: u32,
        dry_hf: bool,
        wet: bool,
        wet_hf: bool,
    ) -> AuralResult<()> {
        self.with_source(id, |s, _| {
            s.params.dry_gain_hf_auto = dry_hf;
            s.params.wet_gain_auto = wet;
            s.params.wet_gain_hf_auto = wet_hf;
            Ok(())
        })
    }

    /// Installs a filter object on the direct path (0 clears it).
    pub fn source_set_direct_filter(&self, id: u32, filter_id: u32) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        let filter = if filter_id == 0 {
            FilterObject::default()
        } else {
            *inner
                .filters
                .get(filter_id)
                .ok_or(AuralError::InvalidName(filter_id))?
        };
        let source = inner
            .sources
            .get_mut(id)
            .ok_or(AuralError::InvalidName(id))?;
        source.params.direct_filter = filter.to_props();
        let source = inner.sources.get(id).expect("present");
        self.publish_source(source);
        Ok(())
    }

    /// Routes a send to an effect slot with an optional filter.
    pub fn source_set_send(
        &self,
        id: u32,
        send: usize,
        slot_id: u32,
        filter_id: u32,
    ) -> AuralResult<()> {
        if send >= self.device.config().sends.min(MAX_SENDS as u32) as usize {
            return Err(invalid_value(format!("send index {send} out of range")));
        }
        let mut inner = self.inner.lock();
        if slot_id != 0 && !inner.slots.contains(slot_id) {
            return Err(AuralError::InvalidName(slot_id));
        }
        let filter = if filter_id == 0 {
            FilterObject::default()
        } else {
            *inner
                .filters
                .get(filter_id)
                .ok_or(AuralError::InvalidName(filter_id))?
        };
        if !inner.sources.contains(id) {
            return Err(AuralError::InvalidName(id));
        }

        let old_slot = inner.sources.get(id).expect("present").params.sends[send].slot;
        if old_slot != 0 {
            if let Some(slot) = inner.slots.get_mut(old_slot) {
                slot.refs = slot.refs.saturating_sub(1);
            }
        }
        if slot_id != 0 {
            inner.slots.get_mut(slot_id).expect("validated").refs += 1;
        }
        let source = inner.sources.get_mut(id).expect("present");
        source.params.sends[send].slot = slot_id;
        source.params.sends[send].filter = filter.to_props();
        let source = inner.sources.get(id).expect("present");
        self.publish_source(source);
        Ok(())
    }

    /// Requests a playback offset. Applied at the next play, or
    /// immediately when a voice is attached.
    pub fn source_set_offset(&self, id: u32, kind: OffsetKind, value: f64) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        let source = inner
            .sources
            .get_mut(id)
            .ok_or(AuralError::InvalidName(id))?;
        if source.state() == SourceState::Playing || source.state() == SourceState::Paused {
            let (entry_abs, frame) = source.resolve_offset(kind, value)?;
            self.device.push_msg(MixMsg::Seek {
                source_id: id,
                entry_abs,
                frame,
            });
            source.pending_offset = None;
        } else {
            // Validated against the queue shape now, applied at play.
            source.resolve_offset(kind, value)?;
            source.pending_offset = Some((kind, value));
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Source getters
    // ---------------------------------------------------------------

    pub fn source_state(&self, id: u32) -> AuralResult<SourceState> {
        self.read_source(id, |s| s.state())
    }

    pub fn source_props(&self, id: u32) -> AuralResult<SourceProps> {
        self.read_source(id, |s| s.params.clone())
    }

    pub fn source_type(&self, id: u32) -> AuralResult<SourceType> {
        self.read_source(id, |s| s.source_type)
    }

    pub fn source_sample_offset(&self, id: u32) -> AuralResult<u64> {
        let connected = self.device.is_connected();
        self.read_source(id, |s| s.sample_offset(connected))
    }

    pub fn source_seconds_offset(&self, id: u32) -> AuralResult<f64> {
        let connected = self.device.is_connected();
        self.read_source(id, |s| {
            let rate = s
                .queue
                .front()
                .map(|e| e.sample_rate)
                .unwrap_or(self.device.config().sample_rate);
            s.sample_offset(connected) as f64 / rate as f64
        })
    }

    pub fn source_processed_count(&self, id: u32) -> AuralResult<u32> {
        self.read_source(id, |s| s.processed_count())
    }

    pub fn source_queued_count(&self, id: u32) -> AuralResult<u32> {
        self.read_source(id, |s| s.queue.len() as u32)
    }

    // ---------------------------------------------------------------
    // Queue operations
    // ---------------------------------------------------------------

    /// Installs a single buffer as the whole queue (static source).
    /// Buffer 0 clears the queue. Requires a stopped or initial source.
    pub fn source_set_buffer(&self, id: u32, buffer_id: u32) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        let state = inner
            .sources
            .get(id)
            .ok_or(AuralError::InvalidName(id))?
            .state();
        if state == SourceState::Playing || state == SourceState::Paused {
            return Err(invalid_op("cannot replace the buffer of an active source"));
        }

        let new_entry = if buffer_id != 0 {
            let buffers = self.device.buffers();
            let data = Arc::clone(&buffers.get(buffer_id)?.data);
            let entry = QueueEntry::from_layers(vec![(buffer_id, data)])?;
            buffers.add_ref(buffer_id)?;
            Some(entry)
        } else {
            None
        };

        let source = inner.sources.get_mut(id).expect("present");
        for entry in source.queue.drain(..) {
            for &old_id in &entry.buffer_ids {
                self.device.buffers().release(old_id);
            }
        }
        source.unqueued_items = 0;
        source.shared.status.reset_cursor();
        match new_entry {
            Some(entry) => {
                source.queue.push_back(entry);
                source.source_type = SourceType::Static;
            }
            None => source.source_type = SourceType::Undetermined,
        }
        Ok(())
    }

    /// Appends buffers to the queue, one item per buffer.
    pub fn queue_buffers(&self, id: u32, buffer_ids: &[u32]) -> AuralResult<()> {
        self.queue_impl(id, buffer_ids, false)
    }

    /// Appends one item holding all the given buffers as co-indexed
    /// layers.
    pub fn queue_buffer_layers(&self, id: u32, buffer_ids: &[u32]) -> AuralResult<()> {
        self.queue_impl(id, buffer_ids, true)
    }

    fn queue_impl(&self, id: u32, buffer_ids: &[u32], layered: bool) -> AuralResult<()> {
        if buffer_ids.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        {
            let source = inner.sources.get(id).ok_or(AuralError::InvalidName(id))?;
            if source.source_type == SourceType::Static {
                return Err(invalid_op("cannot queue onto a static source"));
            }
        }

        // Gather payloads and check format compatibility against the
        // existing queue before touching any ref count.
        let buffers = self.device.buffers();
        let mut layers = Vec::with_capacity(buffer_ids.len());
        for &buffer_id in buffer_ids {
            layers.push((buffer_id, Arc::clone(&buffers.get(buffer_id)?.data)));
        }
        let entries: Vec<Arc<QueueEntry>> = if layered {
            vec![QueueEntry::from_layers(layers)?]
        } else {
            layers
                .into_iter()
                .map(|layer| QueueEntry::from_layers(vec![layer]))
                .collect::<AuralResult<_>>()?
        };
        {
            let source = inner.sources.get(id).expect("present");
            if let Some(head) = source.queue.front() {
                for entry in &entries {
                    if entry.sample_rate != head.sample_rate || entry.layout != head.layout {
                        return Err(invalid_op(
                            "queued buffer format does not match the queue",
                        ));
                    }
                }
            }
        }

        for entry in &entries {
            for &buffer_id in &entry.buffer_ids {
                buffers.add_ref(buffer_id)?;
            }
        }
        let source = inner.sources.get_mut(id).expect("present");
        source.queue.extend(entries.iter().cloned());
        source.source_type = SourceType::Streaming;
        if source.has_voice {
            self.device.push_msg(MixMsg::QueueAppend {
                source_id: id,
                entries,
            });
        }
        Ok(())
    }

    /// Removes up to `count` processed items, returning the buffer ids
    /// in their original queue order.
    pub fn unqueue_buffers(&self, id: u32, count: u32) -> AuralResult<Vec<u32>> {
        let mut inner = self.inner.lock();
        let source = inner
            .sources
            .get_mut(id)
            .ok_or(AuralError::InvalidName(id))?;
        if source.source_type == SourceType::Static {
            return Err(invalid_op("cannot unqueue from a static source"));
        }
        let processed = source.processed_count();
        if count > processed {
            return Err(invalid_value(format!(
                "cannot unqueue {count} items, only {processed} processed"
            )));
        }
        let mut freed = Vec::new();
        for _ in 0..count {
            if let Some(entry) = source.queue.pop_front() {
                source.unqueued_items += 1;
                for &buffer_id in &entry.buffer_ids {
                    freed.push(buffer_id);
                }
            }
        }
        if source.queue.is_empty() && source.state() != SourceState::Playing {
            source.source_type = SourceType::Undetermined;
        }
        drop(inner);
        for &buffer_id in &freed {
            self.device.buffers().release(buffer_id);
        }
        Ok(freed)
    }

    // ---------------------------------------------------------------
    // Playback transitions
    // ---------------------------------------------------------------

    pub fn source_play(&self, ids: &[u32]) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        for &id in ids {
            if !inner.sources.contains(id) {
                return Err(AuralError::InvalidName(id));
            }
        }
        if !self.device.is_connected() {
            // Disconnected devices refuse playback outright.
            for &id in ids {
                let source = inner.sources.get_mut(id).expect("present");
                source.shared.status.set_state(SourceState::Stopped);
            }
            return Ok(());
        }
        // Voice budget check up front so a partial batch never starts.
        let starting = ids
            .iter()
            .filter(|&&id| {
                let source = inner.sources.get(id).expect("present");
                source.state() != SourceState::Paused && !source.has_voice
            })
            .count() as u32;
        if self.device.voices_used() + starting > self.device.config().max_voices {
            return Err(AuralError::OutOfMemory("voice pool exhausted"));
        }

        for &id in ids {
            let source = inner.sources.get_mut(id).expect("present");
            match source.state() {
                SourceState::Paused => {
                    source.shared.status.set_state(SourceState::Playing);
                    self.device.push_msg(MixMsg::Resume { source_id: id });
                }
                _ => {
                    let (start_entry, start_frame) = match source.pending_offset.take() {
                        Some((kind, value)) => source
                            .resolve_offset(kind, value)
                            .map(|(abs, frame)| {
                                ((abs - source.unqueued_items) as usize, frame)
                            })
                            .unwrap_or((0, 0)),
                        None => (0, 0),
                    };
                    let queue: Vec<Arc<QueueEntry>> = source.queue.iter().cloned().collect();
                    // The voice must see current properties from its very
                    // first period, deferred updates or not.
                    let snapshot = source.params.clone();
                    source.shared.props.publish(|p| *p = snapshot.clone());
                    source.shared.status.store_cursor(
                        source.unqueued_items + start_entry as u32,
                        start_frame,
                        0,
                    );
                    source.shared.status.set_state(SourceState::Playing);
                    source.has_voice = true;
                    self.device.push_msg(MixMsg::Play {
                        ctx_id: self.shared.id,
                        source: Arc::clone(&source.shared),
                        queue,
                        entry_base: source.unqueued_items,
                        start_entry,
                        start_frame,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn source_pause(&self, ids: &[u32]) -> AuralResult<()> {
        let inner = self.inner.lock();
        for &id in ids {
            if !inner.sources.contains(id) {
                return Err(AuralError::InvalidName(id));
            }
        }
        for &id in ids {
            let source = inner.sources.get(id).expect("present");
            if source.state() == SourceState::Playing {
                source.shared.status.set_state(SourceState::Paused);
                self.device.push_msg(MixMsg::Pause { source_id: id });
            }
        }
        Ok(())
    }

    pub fn source_stop(&self, ids: &[u32]) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        for &id in ids {
            if !inner.sources.contains(id) {
                return Err(AuralError::InvalidName(id));
            }
        }
        for &id in ids {
            let source = inner.sources.get_mut(id).expect("present");
            if source.state() != SourceState::Stopped {
                // Visible immediately; the voice detaches on the next
                // period and posts the state-change event.
                source.shared.status.set_state(SourceState::Stopped);
                if source.has_voice {
                    source.has_voice = false;
                    self.device.push_msg(MixMsg::Stop { source_id: id });
                } else {
                    source.shared.status.reset_cursor();
                }
            }
        }
        Ok(())
    }

    pub fn source_rewind(&self, ids: &[u32]) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        for &id in ids {
            if !inner.sources.contains(id) {
                return Err(AuralError::InvalidName(id));
            }
        }
        for &id in ids {
            let source = inner.sources.get_mut(id).expect("present");
            source.shared.status.set_state(SourceState::Initial);
            if source.has_voice {
                source.has_voice = false;
                self.device.push_msg(MixMsg::Rewind { source_id: id });
            } else {
                source.shared.status.reset_cursor();
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Filters and effects
    // ---------------------------------------------------------------

    pub fn gen_filters(&self, count: usize) -> Vec<u32> {
        let mut inner = self.inner.lock();
        (0..count)
            .map(|_| inner.filters.insert(FilterObject::default()))
            .collect()
    }

    pub fn delete_filters(&self, ids: &[u32]) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        for &id in ids {
            if !inner.filters.contains(id) {
                return Err(AuralError::InvalidName(id));
            }
        }
        for &id in ids {
            inner.filters.remove(id);
        }
        Ok(())
    }

    pub fn filter_set(
        &self,
        id: u32,
        op: impl FnOnce(&mut FilterObject) -> AuralResult<()>,
    ) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        let filter = inner
            .filters
            .get_mut(id)
            .ok_or(AuralError::InvalidName(id))?;
        op(filter)
    }

    pub fn filter_get(&self, id: u32) -> AuralResult<FilterObject> {
        let inner = self.inner.lock();
        inner
            .filters
            .get(id)
            .copied()
            .ok_or(AuralError::InvalidName(id))
    }

    pub fn gen_effects(&self, count: usize) -> Vec<u32> {
        let mut inner = self.inner.lock();
        (0..count)
            .map(|_| inner.effects.insert(EffectObject::default()))
            .collect()
    }

    pub fn delete_effects(&self, ids: &[u32]) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        for &id in ids {
            if !inner.effects.contains(id) {
                return Err(AuralError::InvalidName(id));
            }
        }
        for &id in ids {
            inner.effects.remove(id);
        }
        Ok(())
    }

    pub fn effect_set(&self, id: u32, params: EffectParams) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        let effect = inner
            .effects
            .get_mut(id)
            .ok_or(AuralError::InvalidName(id))?;
        effect.params = params;
        Ok(())
    }

    pub fn effect_get(&self, id: u32) -> AuralResult<EffectParams> {
        let inner = self.inner.lock();
        inner
            .effects
            .get(id)
            .map(|e| e.params)
            .ok_or(AuralError::InvalidName(id))
    }

    // ---------------------------------------------------------------
    // Effect slots
    // ---------------------------------------------------------------

    pub fn gen_effect_slots(&self, count: usize) -> AuralResult<Vec<u32>> {
        let mut inner = self.inner.lock();
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = inner.slots.insert(EffectSlot::new(0));
            *inner.slots.get_mut(id).unwrap() = EffectSlot::new(id);
            let slot = inner.slots.get(id).unwrap();
            slot.publish();
            self.device.push_msg(MixMsg::AddSlot {
                ctx_id: self.shared.id,
                shared: Arc::clone(&slot.shared),
                state: Box::new(EffectState::new(
                    &EffectParams::Null,
                    self.device.config().sample_rate,
                )),
            });
            ids.push(id);
        }
        self.publish_active_slots(&inner);
        Ok(ids)
    }

    pub fn delete_effect_slots(&self, ids: &[u32]) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        for &id in ids {
            let slot = inner.slots.get(id).ok_or(AuralError::InvalidName(id))?;
            if slot.refs != 0 {
                return Err(invalid_op(format!("effect slot {id} is still referenced")));
            }
        }
        for &id in ids {
            if let Some(slot) = inner.slots.remove(id) {
                if slot.target != 0 {
                    if let Some(target) = inner.slots.get_mut(slot.target) {
                        target.refs = target.refs.saturating_sub(1);
                    }
                }
                slot.drain_retired();
                self.device.push_msg(MixMsg::RemoveSlot {
                    ctx_id: self.shared.id,
                    slot_id: id,
                });
            }
        }
        self.publish_active_slots(&inner);
        Ok(())
    }

    /// Installs an effect object's parameters into a slot. A kind change
    /// swaps the mixer-side state; a parameter change reuses it.
    pub fn slot_set_effect(&self, slot_id: u32, effect_id: u32) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        let params = if effect_id == 0 {
            EffectParams::Null
        } else {
            inner
                .effects
                .get(effect_id)
                .map(|e| e.params)
                .ok_or(AuralError::InvalidName(effect_id))?
        };
        let slot = inner
            .slots
            .get_mut(slot_id)
            .ok_or(AuralError::InvalidName(slot_id))?;
        let kind_changed = !slot.params.same_kind(&params);
        slot.params = params;
        slot.drain_retired();
        if kind_changed {
            self.device.push_msg(MixMsg::ReplaceSlotEffect {
                ctx_id: self.shared.id,
                slot_id,
                state: Box::new(EffectState::new(
                    &params,
                    self.device.config().sample_rate,
                )),
            });
        } else {
            self.device.push_msg(MixMsg::UpdateSlotEffect {
                ctx_id: self.shared.id,
                slot_id,
                params,
            });
        }
        let slot = inner.slots.get(slot_id).expect("present");
        self.publish_slot(slot);
        Ok(())
    }

    pub fn slot_set_gain(&self, slot_id: u32, gain: f32) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        if !gain.is_finite() || !(0.0..=1.0).contains(&gain) {
            return Err(invalid_value(format!("slot gain {gain} out of range")));
        }
        let slot = inner
            .slots
            .get_mut(slot_id)
            .ok_or(AuralError::InvalidName(slot_id))?;
        slot.gain = gain;
        let slot = inner.slots.get(slot_id).expect("present");
        self.publish_slot(slot);
        Ok(())
    }

    pub fn slot_set_auto_send(&self, slot_id: u32, auto: bool) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        let slot = inner
            .slots
            .get_mut(slot_id)
            .ok_or(AuralError::InvalidName(slot_id))?;
        slot.auto_send = auto;
        let slot = inner.slots.get(slot_id).expect("present");
        self.publish_slot(slot);
        Ok(())
    }

    /// Chains a slot's output into another slot (0 restores the dry bus).
    /// A target that would close a cycle is rejected.
    pub fn slot_set_target(&self, slot_id: u32, target_id: u32) -> AuralResult<()> {
        let mut inner = self.inner.lock();
        if !inner.slots.contains(slot_id) {
            return Err(AuralError::InvalidName(slot_id));
        }
        if target_id != 0 {
            if !inner.slots.contains(target_id) {
                return Err(AuralError::InvalidName(target_id));
            }
            // Walk the chain from the proposed target; finding ourselves
            // means a cycle.
            let mut walker = target_id;
            let mut steps = inner.slots.len() + 1;
            while walker != 0 && steps > 0 {
                if walker == slot_id {
                    return Err(invalid_op(format!(
                        "targeting slot {target_id} from {slot_id} creates a cycle"
                    )));
                }
                walker = inner.slots.get(walker).map(|s| s.target).unwrap_or(0);
                steps -= 1;
            }
        }

        let old_target = inner.slots.get(slot_id).expect("present").target;
        if old_target != 0 {
            if let Some(old) = inner.slots.get_mut(old_target) {
                old.refs = old.refs.saturating_sub(1);
            }
        }
        if target_id != 0 {
            inner.slots.get_mut(target_id).expect("validated").refs += 1;
        }
        inner.slots.get_mut(slot_id).expect("present").target = target_id;
        let slot = inner.slots.get(slot_id).expect("present");
        self.publish_slot(slot);
        self.publish_active_slots(&inner);
        Ok(())
    }

    pub fn slot_target(&self, slot_id: u32) -> AuralResult<u32> {
        let inner = self.inner.lock();
        inner
            .slots
            .get(slot_id)
            .map(|s| s.target)
            .ok_or(AuralError::InvalidName(slot_id))
    }

    /// Publishes the topologically-ordered active-slot snapshot: feeders
    /// first, targets later, so one forward pass per period suffices.
    fn publish_active_slots(&self, inner: &ContextInner) {
        let mut remaining: Vec<(u32, u32)> = inner
            .slots
            .iter()
            .map(|(id, slot)| (id, slot.target))
            .collect();
        let mut ordered = Vec::with_capacity(remaining.len());
        // Repeatedly emit slots that nothing un-emitted feeds into...
        // cheaper on these tiny graphs: emit slots whose feeders are all
        // emitted. Feeder = a slot whose target is this slot.
        while !remaining.is_empty() {
            let before = ordered.len();
            let mut index = 0;
            while index < remaining.len() {
                let (id, _) = remaining[index];
                let has_unemitted_feeder = remaining
                    .iter()
                    .any(|&(other, target)| other != id && target == id);
                if !has_unemitted_feeder {
                    ordered.push(id);
                    remaining.remove(index);
                } else {
                    index += 1;
                }
            }
            if ordered.len() == before {
                // A cycle slipped in (cannot happen through the checked
                // setters); emit the rest in table order.
                ordered.extend(remaining.drain(..).map(|(id, _)| id));
            }
        }

        if let Some(old) = self.shared.pending_slots.swap(Some(Arc::new(ordered))) {
            drop(old);
        }
        self.shared.retired_slots.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_defaults() {
        let listener = ListenerProps::default();
        assert_eq!(listener.gain, 1.0);
        assert_eq!(listener.forward, Vec3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn test_context_props_defaults() {
        let globals = ContextProps::default();
        assert_eq!(globals.distance_model, DistanceModel::InverseClamped);
        assert!((globals.speed_of_sound - 343.3).abs() < 1e-3);
    }
}
