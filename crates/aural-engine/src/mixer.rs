//! The renderer: per-period mixing on the backend thread
//!
//! One renderer exists per device, driven by the backend's pull. Each
//! period it drains the structural message ring, consumes property
//! snapshots, mixes every live voice into the ambisonic dry bus and the
//! slot inputs, runs the effect chain, decodes to the output layout, and
//! hands interleaved frames back to the device for encoding. Control
//! threads never touch any of this state.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use aural_core::{acn_order, DeviceLayout, MAX_OUTPUT_CHANNELS};
use aural_dsp::BandSplitter;
use aural_spatial::{calc_ambi_coeffs, DecodeMatrix, HrtfTable, Vec3};

use crate::buffer::QueueEntry;
use crate::config::{DeviceConfig, HrtfMode};
use crate::context::{ContextProps, ContextShared, ListenerProps};
use crate::events::{post, EngineEvent};
use crate::slot::{EffectParams, EffectState, SlotProps, SlotShared};
use crate::source::{SourceShared, SourceState};
use crate::voice::{MixEnv, MixScratch, Voice};

/// Structural control-to-mixer messages.
pub enum MixMsg {
    AddContext {
        shared: Arc<ContextShared>,
        events: rtrb::Producer<EngineEvent>,
    },
    RemoveContext {
        ctx_id: u32,
    },
    AddSlot {
        ctx_id: u32,
        shared: Arc<SlotShared>,
        state: Box<EffectState>,
    },
    RemoveSlot {
        ctx_id: u32,
        slot_id: u32,
    },
    /// Effect kind changed; swap the running state, retiring the old one.
    ReplaceSlotEffect {
        ctx_id: u32,
        slot_id: u32,
        state: Box<EffectState>,
    },
    /// Same effect kind, new parameters.
    UpdateSlotEffect {
        ctx_id: u32,
        slot_id: u32,
        params: EffectParams,
    },
    Play {
        ctx_id: u32,
        source: Arc<SourceShared>,
        queue: Vec<Arc<QueueEntry>>,
        entry_base: u32,
        start_entry: usize,
        start_frame: u64,
    },
    Resume {
        source_id: u32,
    },
    Pause {
        source_id: u32,
    },
    Stop {
        source_id: u32,
    },
    Rewind {
        source_id: u32,
    },
    QueueAppend {
        source_id: u32,
        entries: Vec<Arc<QueueEntry>>,
    },
    Seek {
        source_id: u32,
        entry_abs: u32,
        frame: u64,
    },
    /// Source deleted; drop the voice without posting events.
    Detach {
        source_id: u32,
    },
}

/// Capacity of the control-to-mixer message ring.
pub const MIX_MSG_CAPACITY: usize = 1024;

/// Starting voice-pool size; the pool doubles on demand up to the
/// configured maximum.
const INITIAL_VOICES: u32 = 16;

/// Per-slot accumulation buffers, addressed by slot id.
pub struct SlotBus {
    ids: Vec<u32>,
    bufs: Vec<Vec<f32>>,
}

impl SlotBus {
    fn new() -> Self {
        Self {
            ids: Vec::new(),
            bufs: Vec::new(),
        }
    }

    fn add(&mut self, id: u32, frames: usize) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
            self.bufs.push(vec![0.0; frames]);
        }
    }

    fn remove(&mut self, id: u32) {
        if let Some(index) = self.ids.iter().position(|&i| i == id) {
            self.ids.remove(index);
            self.bufs.remove(index);
        }
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Vec<f32>> {
        let index = self.ids.iter().position(|&i| i == id)?;
        Some(&mut self.bufs[index])
    }

    fn clear_all(&mut self, frames: usize) {
        for buf in &mut self.bufs {
            buf[..frames].fill(0.0);
        }
    }
}

/// Mixer-side state for one effect slot.
struct SlotRender {
    id: u32,
    shared: Arc<SlotShared>,
    state: Box<EffectState>,
    props: SlotProps,
}

/// Mixer-side state for one context.
struct ContextRender {
    shared: Arc<ContextShared>,
    events: rtrb::Producer<EngineEvent>,
    listener: ListenerProps,
    globals: ContextProps,
    slots: Vec<SlotRender>,
    /// Topologically ordered active slots (targets later).
    active: Arc<Vec<u32>>,
    bus: SlotBus,
    /// (slot id, send-auto) snapshot rebuilt when slot props change.
    slot_info: Vec<(u32, bool)>,
}

/// Shared counters the device exposes.
pub struct MixClock {
    /// Odd while a period is being mixed.
    pub mix_count: AtomicU64,
    /// Total frames rendered.
    pub samples: AtomicU64,
    pub connected: AtomicBool,
    pub voices_used: AtomicU32,
}

impl MixClock {
    pub fn new() -> Self {
        Self {
            mix_count: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            connected: AtomicBool::new(true),
            voices_used: AtomicU32::new(0),
        }
    }
}

impl Default for MixClock {
    fn default() -> Self {
        Self::new()
    }
}

/// The device's mixing engine. Owned by the render path; control threads
/// communicate exclusively through the message ring and property cells.
pub struct Renderer {
    config: DeviceConfig,
    msg_rx: rtrb::Consumer<MixMsg>,
    clock: Arc<MixClock>,
    contexts: Vec<ContextRender>,
    voices: Vec<Voice>,
    /// Ambisonic dry bus.
    dry: Vec<Vec<f32>>,
    /// Output speaker bus.
    out: Vec<Vec<f32>>,
    decode: DecodeMatrix,
    hrtf: Option<Arc<HrtfTable>>,
    scratch: MixScratch,
    slot_in: Vec<f32>,
    slot_out_l: Vec<f32>,
    slot_out_r: Vec<f32>,
    /// Per-dry-channel shelf filters scaling ambisonic HF content before
    /// the speaker decode; (splitter, hf gain) per ACN channel.
    hf_shelves: Vec<(BandSplitter, f32)>,
    /// Ambisonic rows for panning slot wet output left/right of front.
    wet_row_left: [f32; MAX_OUTPUT_CHANNELS],
    wet_row_right: [f32; MAX_OUTPUT_CHANNELS],
}

impl Renderer {
    pub fn new(config: DeviceConfig, msg_rx: rtrb::Consumer<MixMsg>, clock: Arc<MixClock>) -> Self {
        let update = config.period_frames as usize;
        let dry_channels = config.order.channel_count();
        let out_channels = config.layout.channel_count();

        let hrtf_active = match config.hrtf {
            HrtfMode::On => true,
            HrtfMode::Off => false,
            HrtfMode::Auto => config.layout.is_headphone_capable(),
        } && config.layout.is_headphone_capable();

        let mut wet_row_left = [0.0f32; MAX_OUTPUT_CHANNELS];
        let mut wet_row_right = [0.0f32; MAX_OUTPUT_CHANNELS];
        calc_ambi_coeffs(
            Vec3::new(-0.5, 0.0, -0.866),
            std::f32::consts::FRAC_PI_2,
            &mut wet_row_left,
        );
        calc_ambi_coeffs(
            Vec3::new(0.5, 0.0, -0.866),
            std::f32::consts::FRAC_PI_2,
            &mut wet_row_right,
        );

        log::info!(
            "renderer: {} Hz, {:?} output, order {:?}, update {} frames, hrtf {}",
            config.sample_rate,
            config.layout,
            config.order,
            update,
            hrtf_active
        );

        // Higher-order components get a slight HF emphasis before decode
        // so the energy vector holds up across the band. W runs through
        // the same splitter at unity so every channel shares the all-pass
        // phase. Raw ambisonic output stays untouched.
        let shelving = !matches!(config.layout, DeviceLayout::Ambisonic(_)) && !hrtf_active;
        let xover = 400.0 / config.sample_rate as f32;
        let hf_shelves: Vec<(BandSplitter, f32)> = if shelving {
            (0..dry_channels)
                .map(|acn| {
                    let gain = match acn_order(acn) {
                        0 => 1.0,
                        1 => 1.225,
                        2 => 1.3,
                        _ => 1.4,
                    };
                    (BandSplitter::new(xover), gain)
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            config,
            msg_rx,
            clock,
            contexts: Vec::new(),
            voices: (0..config.max_voices.min(INITIAL_VOICES))
                .map(|_| Voice::default())
                .collect(),
            dry: (0..dry_channels).map(|_| vec![0.0; update]).collect(),
            out: (0..out_channels).map(|_| vec![0.0; update]).collect(),
            decode: DecodeMatrix::with_norm(config.layout, config.order, config.ambi_scaling),
            hrtf: hrtf_active.then(|| HrtfTable::for_rate(config.sample_rate)),
            scratch: MixScratch::new(update),
            slot_in: vec![0.0; update],
            slot_out_l: vec![0.0; update],
            slot_out_r: vec![0.0; update],
            hf_shelves,
            wet_row_left,
            wet_row_right,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Whether this renderer mixes binaurally.
    pub fn hrtf_active(&self) -> bool {
        self.hrtf.is_some()
    }

    fn context_index(&self, ctx_id: u32) -> Option<usize> {
        self.contexts.iter().position(|c| c.shared.id == ctx_id)
    }

    fn voice_for_source(&mut self, source_id: u32) -> Option<&mut Voice> {
        self.voices
            .iter_mut()
            .find(|v| v.source_id() == source_id)
    }

    fn process_messages(&mut self) {
        while let Ok(msg) = self.msg_rx.pop() {
            match msg {
                MixMsg::AddContext { shared, events } => {
                    self.contexts.push(ContextRender {
                        shared,
                        events,
                        listener: ListenerProps::default(),
                        globals: ContextProps::default(),
                        slots: Vec::new(),
                        active: Arc::new(Vec::new()),
                        bus: SlotBus::new(),
                        slot_info: Vec::new(),
                    });
                }
                MixMsg::RemoveContext { ctx_id } => {
                    for voice in &mut self.voices {
                        if !voice.is_free() && voice.ctx_id() == ctx_id {
                            voice.detach(SourceState::Stopped, true);
                        }
                    }
                    self.contexts.retain(|c| c.shared.id != ctx_id);
                }
                MixMsg::AddSlot {
                    ctx_id,
                    shared,
                    state,
                } => {
                    let frames = self.config.period_frames as usize;
                    if let Some(index) = self.context_index(ctx_id) {
                        let ctx = &mut self.contexts[index];
                        ctx.bus.add(shared.id, frames);
                        ctx.slots.push(SlotRender {
                            id: shared.id,
                            shared,
                            state,
                            props: SlotProps::default(),
                        });
                        rebuild_slot_info(ctx);
                    }
                }
                MixMsg::RemoveSlot { ctx_id, slot_id } => {
                    if let Some(index) = self.context_index(ctx_id) {
                        let ctx = &mut self.contexts[index];
                        ctx.bus.remove(slot_id);
                        ctx.slots.retain(|s| s.id != slot_id);
                        rebuild_slot_info(ctx);
                    }
                }
                MixMsg::ReplaceSlotEffect {
                    ctx_id,
                    slot_id,
                    state,
                } => {
                    if let Some(index) = self.context_index(ctx_id) {
                        let ctx = &mut self.contexts[index];
                        if let Some(slot) = ctx.slots.iter_mut().find(|s| s.id == slot_id) {
                            let old = std::mem::replace(&mut slot.state, state);
                            // Hand the displaced state back for control-side
                            // disposal once we have moved on.
                            slot.shared.retired_state.store(Some(old));
                        }
                    }
                }
                MixMsg::UpdateSlotEffect {
                    ctx_id,
                    slot_id,
                    params,
                } => {
                    if let Some(index) = self.context_index(ctx_id) {
                        let ctx = &mut self.contexts[index];
                        if let Some(slot) = ctx.slots.iter_mut().find(|s| s.id == slot_id) {
                            slot.state.set_params(&params);
                        }
                    }
                }
                MixMsg::Play {
                    ctx_id,
                    source,
                    queue,
                    entry_base,
                    start_entry,
                    start_frame,
                } => {
                    let mut slot = self
                        .voices
                        .iter()
                        .position(|v| v.source_id() == source.id)
                        .or_else(|| self.voices.iter().position(|v| v.is_free()));
                    if slot.is_none() && self.voices.len() < self.config.max_voices as usize {
                        // Grow the pool in powers of two up to the cap;
                        // happens at a period boundary, never mid-mix.
                        let grown = (self.voices.len() * 2)
                            .min(self.config.max_voices as usize);
                        slot = Some(self.voices.len());
                        self.voices.resize_with(grown, Voice::default);
                    }
                    match slot {
                        Some(vi) => self.voices[vi].start(
                            source,
                            ctx_id,
                            queue,
                            entry_base,
                            start_entry,
                            start_frame,
                        ),
                        None => {
                            // Pool exhausted despite the control-side check.
                            source.status.set_state(SourceState::Stopped);
                            if let Some(index) = self.context_index(ctx_id) {
                                post(
                                    &mut self.contexts[index].events,
                                    EngineEvent::SourceStateChanged {
                                        source: source.id,
                                        state: SourceState::Stopped,
                                    },
                                );
                            }
                        }
                    }
                }
                MixMsg::Resume { source_id } => {
                    if let Some(voice) = self.voice_for_source(source_id) {
                        voice.resume();
                    }
                }
                MixMsg::Pause { source_id } => {
                    if let Some(voice) = self.voice_for_source(source_id) {
                        voice.pause();
                    }
                }
                MixMsg::Stop { source_id } => {
                    if let Some(vi) = self.voices.iter().position(|v| v.source_id() == source_id)
                    {
                        let ctx_id = self.voices[vi].ctx_id();
                        self.voices[vi].detach(SourceState::Stopped, true);
                        if let Some(index) = self.context_index(ctx_id) {
                            post(
                                &mut self.contexts[index].events,
                                EngineEvent::SourceStateChanged {
                                    source: source_id,
                                    state: SourceState::Stopped,
                                },
                            );
                        }
                    }
                }
                MixMsg::Rewind { source_id } => {
                    if let Some(vi) = self.voices.iter().position(|v| v.source_id() == source_id)
                    {
                        let ctx_id = self.voices[vi].ctx_id();
                        self.voices[vi].detach(SourceState::Initial, true);
                        if let Some(index) = self.context_index(ctx_id) {
                            post(
                                &mut self.contexts[index].events,
                                EngineEvent::SourceStateChanged {
                                    source: source_id,
                                    state: SourceState::Initial,
                                },
                            );
                        }
                    }
                }
                MixMsg::QueueAppend { source_id, entries } => {
                    if let Some(voice) = self.voice_for_source(source_id) {
                        voice.append_entries(entries);
                    }
                }
                MixMsg::Seek {
                    source_id,
                    entry_abs,
                    frame,
                } => {
                    if let Some(voice) = self.voice_for_source(source_id) {
                        voice.seek(entry_abs, frame);
                    }
                }
                MixMsg::Detach { source_id } => {
                    if let Some(voice) = self.voice_for_source(source_id) {
                        voice.detach(SourceState::Stopped, true);
                    }
                }
            }
        }
    }

    /// Mixes one chunk of up to one period into the internal output bus.
    fn mix_chunk(&mut self, frames: usize) {
        self.clock.mix_count.fetch_add(1, Ordering::AcqRel);

        self.process_messages();

        for buf in &mut self.dry {
            buf[..frames].fill(0.0);
        }
        for buf in &mut self.out {
            buf[..frames].fill(0.0);
        }

        // Snapshot per-context properties; remember which changed so the
        // voices re-derive their targets.
        let mut force_flags = [false; 64];
        for (index, ctx) in self.contexts.iter_mut().enumerate() {
            let mut force = false;
            if let Some(listener) = ctx.shared.listener.consume() {
                ctx.listener = (*listener).clone();
                ctx.shared.listener.recycle(listener);
                force = true;
            }
            if let Some(globals) = ctx.shared.globals.consume() {
                ctx.globals = (*globals).clone();
                ctx.shared.globals.recycle(globals);
                force = true;
            }
            if let Some(active) = ctx.shared.pending_slots.take() {
                let old = std::mem::replace(&mut ctx.active, active);
                ctx.shared.retired_slots.store(Some(old));
            }
            let mut slot_props_changed = false;
            for slot in &mut ctx.slots {
                if let Some(props) = slot.shared.props.consume() {
                    slot.props = *props;
                    slot.shared.props.recycle(props);
                    slot_props_changed = true;
                }
            }
            if slot_props_changed {
                rebuild_slot_info(ctx);
                force = true;
            }
            ctx.bus.clear_all(frames);
            if index < force_flags.len() {
                force_flags[index] = force;
            }
        }

        // Mix voices.
        let hrtf = self.hrtf.clone();
        let hrtf_table = hrtf.as_deref();
        let update_frames = frames;
        for vi in 0..self.voices.len() {
            // Split disjoint borrows of the renderer's fields.
            let Renderer {
                voices,
                contexts,
                dry,
                out,
                scratch,
                config,
                ..
            } = self;
            let voice = &mut voices[vi];
            if voice.is_free() {
                continue;
            }
            let Some(ci) = contexts.iter().position(|c| c.shared.id == voice.ctx_id())
            else {
                voice.detach(SourceState::Stopped, true);
                continue;
            };
            let ctx = &mut contexts[ci];

            let (hrtf_out, order) = if hrtf_table.is_some() {
                let (left, rest) = out.split_at_mut(1);
                (
                    Some((&mut left[0][..update_frames], &mut rest[0][..update_frames])),
                    config.order,
                )
            } else {
                (None, config.order)
            };

            let mut env = MixEnv {
                frames: update_frames,
                listener: &ctx.listener,
                globals: &ctx.globals,
                dry,
                order,
                hrtf_out,
                hrtf_table,
                slot_bus: &mut ctx.bus,
                slot_info: &ctx.slot_info,
                device_rate: config.sample_rate,
                num_sends: config.sends as usize,
                force_update: force_flags.get(ci).copied().unwrap_or(false),
                events: &mut ctx.events,
                scratch,
            };
            voice.mix(&mut env);
        }

        // Effect chains, one forward pass per context.
        for ci in 0..self.contexts.len() {
            self.process_slots(ci, frames);
        }

        // Shelve the directional components, then decode into the speaker
        // bus (additive: the binaural and dedicated paths may already have
        // written).
        let Renderer {
            out,
            dry,
            decode,
            hf_shelves,
            ..
        } = self;
        for (buf, (splitter, gain)) in dry.iter_mut().zip(hf_shelves.iter_mut()) {
            splitter.apply_hf_scale(&mut buf[..frames], *gain);
        }
        decode.decode_add(out, dry, frames);

        self.clock.mix_count.fetch_add(1, Ordering::AcqRel);
        self.clock
            .samples
            .fetch_add(frames as u64, Ordering::AcqRel);
        let used = self.voices.iter().filter(|v| !v.is_free()).count() as u32;
        self.clock.voices_used.store(used, Ordering::Release);
    }

    fn process_slots(&mut self, ci: usize, frames: usize) {
        let active = Arc::clone(&self.contexts[ci].active);
        for &slot_id in active.iter() {
            let ctx = &mut self.contexts[ci];
            let Some(input) = ctx.bus.get_mut(slot_id) else {
                continue;
            };
            self.slot_in[..frames].copy_from_slice(&input[..frames]);
            input[..frames].fill(0.0);

            let Some(slot) = ctx.slots.iter_mut().find(|s| s.id == slot_id) else {
                continue;
            };
            let props = slot.props;
            slot.state.process(
                &self.slot_in[..frames],
                &mut self.slot_out_l[..frames],
                &mut self.slot_out_r[..frames],
            );

            if props.gain != 1.0 {
                for s in &mut self.slot_out_l[..frames] {
                    *s *= props.gain;
                }
                for s in &mut self.slot_out_r[..frames] {
                    *s *= props.gain;
                }
            }

            if props.target != 0 {
                if let Some(target) = ctx.bus.get_mut(props.target) {
                    for i in 0..frames {
                        target[i] += (self.slot_out_l[i] + self.slot_out_r[i]) * 0.5;
                    }
                    continue;
                }
            }

            if props.lfe_routing {
                if let Some(lfe) = lfe_channel(&self.config) {
                    let out = &mut self.out[lfe];
                    for i in 0..frames {
                        out[i] += (self.slot_out_l[i] + self.slot_out_r[i]) * 0.5;
                    }
                    continue;
                }
            }

            if self.hrtf.is_some() {
                // Binaural mode: wet output goes straight to the ears.
                let (left, rest) = self.out.split_at_mut(1);
                for i in 0..frames {
                    left[0][i] += self.slot_out_l[i];
                    rest[0][i] += self.slot_out_r[i];
                }
            } else {
                let dry_channels = self.config.order.channel_count().min(self.dry.len());
                for acn in 0..dry_channels {
                    let (gl, gr) = (self.wet_row_left[acn], self.wet_row_right[acn]);
                    if gl.abs() < 1e-9 && gr.abs() < 1e-9 {
                        continue;
                    }
                    let dry = &mut self.dry[acn];
                    for i in 0..frames {
                        dry[i] += self.slot_out_l[i] * gl + self.slot_out_r[i] * gr;
                    }
                }
            }
        }
    }

    /// Renders `frames` frames of interleaved f32 output. The core entry
    /// point for backends and loopback rendering.
    pub fn render_f32(&mut self, dst: &mut [f32]) {
        let channels = self.config.layout.channel_count();
        let update = self.config.period_frames as usize;
        let total = dst.len() / channels;

        let mut done = 0usize;
        while done < total {
            let chunk = (total - done).min(update);
            self.mix_chunk(chunk);
            for i in 0..chunk {
                for (ch, buf) in self.out.iter().enumerate() {
                    dst[(done + i) * channels + ch] = buf[i];
                }
            }
            done += chunk;
        }
    }

    /// Stops everything after a backend failure: every playing or paused
    /// source goes to stopped (cursor left in place) and each context
    /// receives a disconnect event.
    pub fn disconnect(&mut self) {
        self.clock.connected.store(false, Ordering::Release);
        for vi in 0..self.voices.len() {
            let voice = &mut self.voices[vi];
            if voice.is_free() {
                continue;
            }
            let source_id = voice.source_id();
            let ctx_id = voice.ctx_id();
            voice.detach(SourceState::Stopped, false);
            if let Some(index) = self.contexts.iter().position(|c| c.shared.id == ctx_id) {
                post(
                    &mut self.contexts[index].events,
                    EngineEvent::SourceStateChanged {
                        source: source_id,
                        state: SourceState::Stopped,
                    },
                );
            }
        }
        for ctx in &mut self.contexts {
            post(&mut ctx.events, EngineEvent::Disconnected);
        }
        self.clock.voices_used.store(0, Ordering::Release);
        log::warn!("device disconnected; all sources stopped");
    }
}

fn rebuild_slot_info(ctx: &mut ContextRender) {
    ctx.slot_info = ctx
        .slots
        .iter()
        .map(|s| (s.id, s.props.auto_send))
        .collect();
}

/// Index of the LFE channel in the output layout, if any.
fn lfe_channel(config: &DeviceConfig) -> Option<usize> {
    config
        .layout
        .speakers()
        .iter()
        .position(|s| s.is_lfe())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_renderer(config: DeviceConfig) -> (Renderer, rtrb::Producer<MixMsg>) {
        let (tx, rx) = rtrb::RingBuffer::new(MIX_MSG_CAPACITY);
        let renderer = Renderer::new(config, rx, Arc::new(MixClock::new()));
        (renderer, tx)
    }

    #[test]
    fn test_silence_when_idle() {
        let (mut renderer, _tx) = test_renderer(DeviceConfig::default());
        let mut dst = vec![1.0f32; 2048];
        renderer.render_f32(&mut dst);
        assert!(dst.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_mix_count_parity() {
        let config = DeviceConfig::default();
        let (tx, rx) = rtrb::RingBuffer::new(8);
        let clock = Arc::new(MixClock::new());
        let mut renderer = Renderer::new(config, rx, Arc::clone(&clock));
        drop(tx);
        let mut dst = vec![0.0f32; 1024 * 2];
        renderer.render_f32(&mut dst);
        // One chunk: two increments, even afterwards.
        assert_eq!(clock.mix_count.load(Ordering::Acquire) % 2, 0);
        assert_eq!(clock.samples.load(Ordering::Acquire), 1024);
    }

    #[test]
    fn test_hrtf_selection_follows_layout() {
        let mut config = DeviceConfig::default();
        config.hrtf = HrtfMode::Auto;
        let (renderer, _tx) = test_renderer(config);
        assert!(renderer.hrtf_active());

        let mut config = DeviceConfig::default();
        config.layout = aural_core::DeviceLayout::Quad;
        let (renderer, _tx) = test_renderer(config);
        assert!(!renderer.hrtf_active());

        let mut config = DeviceConfig::default();
        config.hrtf = HrtfMode::Off;
        let (renderer, _tx) = test_renderer(config);
        assert!(!renderer.hrtf_active());
    }

    #[test]
    fn test_slot_bus_addressing() {
        let mut bus = SlotBus::new();
        bus.add(3, 64);
        bus.add(7, 64);
        assert!(bus.get_mut(3).is_some());
        assert!(bus.get_mut(9).is_none());
        bus.remove(3);
        assert!(bus.get_mut(3).is_none());
        assert!(bus.get_mut(7).is_some());
    }
}
