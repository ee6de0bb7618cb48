//! Voices: the mixer-private counterpart of a playing source
//!
//! A voice owns the playback cursor over a queue snapshot, per-channel
//! resampler history, per-path filters and gain ramps, and the optional
//! HRTF and near-field state. Everything here runs on the mixer thread;
//! the only shared surfaces are the source's property cell (consumed) and
//! status mirror (written).

use std::sync::Arc;

use aural_core::{
    clampf, AmbiOrder, BufferLayout, FRACTION_BITS, FRACTION_MASK, FRACTION_ONE,
    MAX_OUTPUT_CHANNELS, MAX_PITCH, SILENCE_THRESHOLD_GAIN,
};
use aural_dsp::biquad::BiquadType;
use aural_dsp::{
    codec::decode_to_float, BiquadFilter, GainRamp, Resampler, ResamplerKind, RESAMPLER_PADDING,
};
use aural_spatial::{
    calc_ambi_coeffs, channel_directions, speaker_direction, truncate_to_order, Hrir, HrtfTable,
    ListenerBasis, NfcFilter, StereoPanner, Vec3, HRIR_LENGTH, HRTF_HISTORY, MAX_AMBI_CHANNELS,
};

use crate::buffer::QueueEntry;
use crate::config::MAX_SENDS;
use crate::context::{ContextProps, ListenerProps};
use crate::events::{post, EngineEvent};
use crate::mixer::SlotBus;
use crate::source::{
    DistanceModel, SourceProps, SourceShared, SourceState, SpatializeMode,
};

/// Most input channels a voice can carry (7.1 content).
pub const MAX_VOICE_CHANNELS: usize = 8;

/// Per-input-channel HRTF state.
#[derive(Clone)]
struct HrtfChannel {
    current: Hrir,
    target: Hrir,
    crossfade: bool,
    history: [f32; HRTF_HISTORY],
}

impl Default for HrtfChannel {
    fn default() -> Self {
        Self {
            current: Hrir {
                left: [0.0; HRIR_LENGTH],
                right: [0.0; HRIR_LENGTH],
                delay_left: 0,
                delay_right: 0,
            },
            target: Hrir {
                left: [0.0; HRIR_LENGTH],
                right: [0.0; HRIR_LENGTH],
                delay_left: 0,
                delay_right: 0,
            },
            crossfade: false,
            history: [0.0; HRTF_HISTORY],
        }
    }
}

/// Direct-path mixing state for one input channel.
#[derive(Debug, Clone, Copy)]
struct DirectChannel {
    gains: [GainRamp; MAX_OUTPUT_CHANNELS],
    lowpass: BiquadFilter,
    highpass: BiquadFilter,
}

impl Default for DirectChannel {
    fn default() -> Self {
        Self {
            gains: [GainRamp::default(); MAX_OUTPUT_CHANNELS],
            lowpass: BiquadFilter::new(),
            highpass: BiquadFilter::new(),
        }
    }
}

/// One auxiliary send's state for one input channel.
#[derive(Debug, Clone, Copy)]
struct SendChannel {
    gain: GainRamp,
    lowpass: BiquadFilter,
    highpass: BiquadFilter,
}

impl Default for SendChannel {
    fn default() -> Self {
        Self {
            gain: GainRamp::default(),
            lowpass: BiquadFilter::new(),
            highpass: BiquadFilter::new(),
        }
    }
}

/// Pre-sized scratch shared by all voices in one renderer.
pub struct MixScratch {
    /// Resampler input: history prefix plus decoded source frames.
    pub input: Vec<f32>,
    /// Per-layer decode temp.
    pub layer: Vec<f32>,
    pub resampled: Vec<f32>,
    pub filtered: Vec<f32>,
    /// Near-field band temp.
    pub band: Vec<f32>,
    /// HRTF history prefix plus current frames.
    pub hrtf_ext: Vec<f32>,
}

impl MixScratch {
    pub fn new(update_frames: usize) -> Self {
        let max_input = RESAMPLER_PADDING + update_frames * MAX_PITCH as usize + 16;
        Self {
            input: vec![0.0; max_input],
            layer: vec![0.0; max_input],
            resampled: vec![0.0; update_frames],
            filtered: vec![0.0; update_frames],
            band: vec![0.0; update_frames],
            hrtf_ext: vec![0.0; HRTF_HISTORY + update_frames],
        }
    }
}

/// Everything a voice needs from the renderer for one chunk.
pub struct MixEnv<'a> {
    pub frames: usize,
    pub listener: &'a ListenerProps,
    pub globals: &'a ContextProps,
    /// Ambisonic dry bus, one buffer per ACN channel.
    pub dry: &'a mut [Vec<f32>],
    pub order: AmbiOrder,
    /// Binaural output buffers (left, right) when HRTF rendering is on.
    pub hrtf_out: Option<(&'a mut [f32], &'a mut [f32])>,
    pub hrtf_table: Option<&'a HrtfTable>,
    pub slot_bus: &'a mut SlotBus,
    /// (slot id, send-auto) for every live slot in this context.
    pub slot_info: &'a [(u32, bool)],
    pub device_rate: u32,
    pub num_sends: usize,
    /// Listener or context globals changed this chunk.
    pub force_update: bool,
    pub events: &'a mut rtrb::Producer<EngineEvent>,
    pub scratch: &'a mut MixScratch,
}

/// A playing instance.
pub struct Voice {
    source: Option<Arc<SourceShared>>,
    ctx_id: u32,
    queue: Vec<Arc<QueueEntry>>,
    /// Absolute index of `queue[0]` from the source's original head.
    entry_base: u32,
    /// Current item, relative to `queue`.
    entry: usize,
    /// Sample frame within the current item.
    position: usize,
    frac: u32,
    step: u32,
    paused: bool,
    finished: bool,
    channels: usize,
    src_rate: u32,
    layout: BufferLayout,
    props: SourceProps,
    resampler: Resampler,
    history: [[f32; RESAMPLER_PADDING]; MAX_VOICE_CHANNELS],
    direct: [DirectChannel; MAX_VOICE_CHANNELS],
    sends: [[SendChannel; MAX_VOICE_CHANNELS]; MAX_SENDS],
    hrtf: Option<Box<[HrtfChannel; MAX_VOICE_CHANNELS]>>,
    nfc: [[NfcFilter; MAX_VOICE_CHANNELS]; 3],
    nfc_active: bool,
    /// First parameter evaluation snaps gains instead of fading.
    first_update: bool,
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            source: None,
            ctx_id: 0,
            queue: Vec::new(),
            entry_base: 0,
            entry: 0,
            position: 0,
            frac: 0,
            step: FRACTION_ONE,
            paused: false,
            finished: false,
            channels: 1,
            src_rate: 44100,
            layout: BufferLayout::Mono,
            props: SourceProps::default(),
            resampler: Resampler::new(ResamplerKind::Linear),
            history: [[0.0; RESAMPLER_PADDING]; MAX_VOICE_CHANNELS],
            direct: [DirectChannel::default(); MAX_VOICE_CHANNELS],
            sends: [[SendChannel::default(); MAX_VOICE_CHANNELS]; MAX_SENDS],
            hrtf: None,
            nfc: [[NfcFilter::default(); MAX_VOICE_CHANNELS]; 3],
            nfc_active: false,
            first_update: true,
        }
    }
}

impl Voice {
    pub fn is_free(&self) -> bool {
        self.source.is_none()
    }

    pub fn source_id(&self) -> u32 {
        self.source.as_ref().map_or(0, |s| s.id)
    }

    pub fn ctx_id(&self) -> u32 {
        self.ctx_id
    }

    /// Claims this voice for a source and primes the cursor. Reuses ramp
    /// state when the same source restarts on this voice.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        source: Arc<SourceShared>,
        ctx_id: u32,
        queue: Vec<Arc<QueueEntry>>,
        entry_base: u32,
        start_entry: usize,
        start_frame: u64,
    ) {
        let restart = self.source_id() == source.id;
        if !restart {
            self.first_update = true;
            self.history = [[0.0; RESAMPLER_PADDING]; MAX_VOICE_CHANNELS];
            for ch in self.direct.iter_mut() {
                ch.lowpass.clear();
                ch.highpass.clear();
            }
            for send in self.sends.iter_mut() {
                for ch in send.iter_mut() {
                    ch.lowpass.clear();
                    ch.highpass.clear();
                }
            }
            self.hrtf = None;
        }

        self.channels = queue
            .first()
            .map_or(1, |e| e.channels().min(MAX_VOICE_CHANNELS));
        self.src_rate = queue.first().map_or(44100, |e| e.sample_rate);
        self.layout = queue.first().map_or(BufferLayout::Mono, |e| e.layout);
        self.queue = queue;
        self.entry_base = entry_base;
        self.entry = start_entry;
        self.position = start_frame as usize;
        self.frac = 0;
        self.paused = false;
        self.finished = self.total_frames() == 0;
        self.source = Some(source);
        self.ctx_id = ctx_id;

        if let Some(source) = &self.source {
            source
                .status
                .store_cursor(self.entry_base + self.entry as u32, self.position as u64, 0);
        }
    }

    /// Appends streamed entries.
    pub fn append_entries(&mut self, entries: impl IntoIterator<Item = Arc<QueueEntry>>) {
        self.queue.extend(entries);
        if self.finished && self.entry < self.queue.len() {
            self.finished = false;
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Seeks to an absolute entry index and frame.
    pub fn seek(&mut self, entry_abs: u32, frame: u64) {
        self.entry = (entry_abs.saturating_sub(self.entry_base)) as usize;
        self.position = frame as usize;
        self.frac = 0;
        self.finished = self.entry >= self.queue.len();
        self.history = [[0.0; RESAMPLER_PADDING]; MAX_VOICE_CHANNELS];
    }

    /// Detaches from the source, leaving the status mirror as directed.
    pub fn detach(&mut self, final_state: SourceState, reset_cursor: bool) {
        if let Some(source) = self.source.take() {
            if reset_cursor {
                source.status.reset_cursor();
            }
            source.status.set_state(final_state);
        }
        self.queue.clear();
        self.finished = false;
        self.paused = false;
    }

    fn total_frames(&self) -> u64 {
        self.queue.iter().map(|e| e.max_frames as u64).sum()
    }

    /// Loop bounds of the current entry: a single-item looping queue
    /// honors the buffer's loop points, otherwise items play out fully.
    fn entry_bounds(&self, entry: usize) -> (usize, Option<usize>) {
        let item = &self.queue[entry];
        if self.props.looping && self.queue.len() == 1 {
            let data = &item.layers[0];
            if data.loop_end > data.loop_start && data.loop_end <= item.max_frames {
                return (data.loop_end, Some(data.loop_start));
            }
        }
        (item.max_frames, None)
    }

    /// Reads `count` frames of one channel from the queue starting at the
    /// cursor, without committing the cursor. Fills silence past the end.
    fn read_input(&self, channel: usize, dst: &mut [f32], layer_tmp: &mut [f32]) {
        let mut entry = self.entry;
        let mut pos = self.position;
        let mut written = 0usize;
        let count = dst.len();
        let mut hops = 0usize;

        while written < count {
            hops += 1;
            if entry >= self.queue.len() || hops > self.queue.len() * 2 + 4 {
                if self.props.looping && !self.queue.is_empty() && hops <= self.queue.len() * 2 + 4
                {
                    entry = 0;
                    pos = 0;
                    continue;
                }
                dst[written..].fill(0.0);
                return;
            }
            let (end, wrap) = self.entry_bounds(entry);
            if pos >= end {
                match wrap {
                    Some(start) if end > start => pos = start,
                    _ => {
                        entry += 1;
                        pos = 0;
                    }
                }
                continue;
            }
            let take = (count - written).min(end - pos);
            let item = &self.queue[entry];
            for (layer_index, layer) in item.layers.iter().enumerate() {
                if layer_index == 0 {
                    decode_to_float(
                        &mut dst[written..written + take],
                        &layer.bytes,
                        layer.format,
                        layer.align,
                        channel,
                        pos,
                    );
                } else {
                    decode_to_float(
                        &mut layer_tmp[..take],
                        &layer.bytes,
                        layer.format,
                        layer.align,
                        channel,
                        pos,
                    );
                    for (d, &s) in dst[written..written + take].iter_mut().zip(&layer_tmp[..take])
                    {
                        *d += s;
                    }
                }
            }
            written += take;
            pos += take;
        }
    }

    /// Commits a cursor advance of `frames` input frames, posting
    /// buffer-completed events and detecting the end of the queue.
    fn advance_cursor(&mut self, frames: usize, events: &mut rtrb::Producer<EngineEvent>) {
        let mut remaining = frames;
        let mut completed = 0u32;
        let mut hops = 0usize;
        while remaining > 0 {
            hops += 1;
            if self.entry >= self.queue.len() || hops > self.queue.len() * 2 + 4 {
                if self.props.looping && !self.queue.is_empty() && hops <= self.queue.len() * 2 + 4
                {
                    self.entry = 0;
                    self.position = 0;
                    continue;
                }
                self.finished = true;
                self.entry = self.queue.len();
                self.position = 0;
                break;
            }
            let (end, wrap) = self.entry_bounds(self.entry);
            let left = end.saturating_sub(self.position);
            if remaining < left {
                self.position += remaining;
                remaining = 0;
            } else {
                remaining -= left;
                match wrap {
                    Some(start) if end > start => self.position = start,
                    _ => {
                        self.entry += 1;
                        self.position = 0;
                        if !self.props.looping {
                            completed += 1;
                        }
                        if self.entry >= self.queue.len() {
                            if self.props.looping && !self.queue.is_empty() {
                                self.entry = 0;
                            } else {
                                self.finished = true;
                                self.entry = self.queue.len();
                                break;
                            }
                        }
                    }
                }
            }
        }
        if completed > 0 {
            if let Some(source) = &self.source {
                post(
                    events,
                    EngineEvent::BufferCompleted {
                        source: source.id,
                        count: completed,
                    },
                );
            }
        }
    }

    /// Mixes one chunk. Returns false when the voice finished and should
    /// be released by the renderer.
    pub fn mix(&mut self, env: &mut MixEnv<'_>) -> bool {
        let source = match &self.source {
            Some(s) => Arc::clone(s),
            None => return false,
        };

        let mut force = env.force_update || self.first_update;
        if let Some(props) = source.props.consume() {
            self.props = (*props).clone();
            source.props.recycle(props);
            force = true;
        }
        if force {
            self.update_params(env);
            self.first_update = false;
        }

        if self.paused {
            return true;
        }
        if self.finished {
            self.finish(&source, env);
            return false;
        }

        let frames = env.frames;
        let advance =
            ((self.frac as u64 + self.step as u64 * frames as u64) >> FRACTION_BITS) as usize;
        let needed = advance + self.resampler.kind().right_padding() + 1;

        for ch in 0..self.channels {
            let scratch = &mut *env.scratch;
            let input = &mut scratch.input[..RESAMPLER_PADDING + needed];
            input[..RESAMPLER_PADDING].copy_from_slice(&self.history[ch]);
            self.read_input(
                ch,
                &mut input[RESAMPLER_PADDING..],
                &mut scratch.layer[..],
            );

            // Save the window ending at the new cursor as next history.
            let hist_start = advance.min(needed);
            self.history[ch]
                .copy_from_slice(&input[hist_start..hist_start + RESAMPLER_PADDING]);

            let resampled = &mut scratch.resampled[..frames];
            self.resampler
                .resample(input, RESAMPLER_PADDING, self.frac, self.step, resampled);

            self.mix_channel(ch, env);
        }

        self.frac = ((self.frac as u64 + self.step as u64 * frames as u64) & FRACTION_MASK as u64)
            as u32;
        self.advance_cursor(advance, env.events);

        source.status.store_cursor(
            self.entry_base + self.entry.min(self.queue.len()) as u32,
            self.position as u64,
            self.frac,
        );

        if self.finished {
            self.finish(&source, env);
            return false;
        }
        true
    }

    /// Queue exhausted: stop the source and report it.
    fn finish(&mut self, source: &Arc<SourceShared>, env: &mut MixEnv<'_>) {
        source.status.set_state(SourceState::Stopped);
        post(
            env.events,
            EngineEvent::SourceStateChanged {
                source: source.id,
                state: SourceState::Stopped,
            },
        );
        self.source = None;
        self.queue.clear();
    }

    /// Mixes the already-resampled signal of one channel into the dry bus
    /// and sends.
    fn mix_channel(&mut self, ch: usize, env: &mut MixEnv<'_>) {
        let frames = env.frames;

        // Direct path.
        {
            let scratch = &mut *env.scratch;
            scratch.filtered[..frames].copy_from_slice(&scratch.resampled[..frames]);
            let direct = &mut self.direct[ch];
            direct.lowpass.process_in_place(&mut scratch.filtered[..frames]);
            direct
                .highpass
                .process_in_place(&mut scratch.filtered[..frames]);
        }

        if let Some(hrtf_channels) = self.hrtf.as_mut() {
            if let Some((out_l, out_r)) = env.hrtf_out.as_mut() {
                let scratch = &mut *env.scratch;
                mix_hrtf(
                    &mut hrtf_channels[ch],
                    &scratch.filtered[..frames],
                    &mut scratch.hrtf_ext,
                    out_l,
                    out_r,
                );
            }
        } else {
            let dry_channels = env.order.channel_count().min(env.dry.len());
            if self.nfc_active {
                // Band-split copies: order-n channels take the n-times
                // compensated signal.
                for order_band in 1..=order_of_channels(env.order) {
                    let scratch = &mut *env.scratch;
                    scratch.band[..frames].copy_from_slice(&scratch.filtered[..frames]);
                    self.nfc[order_band - 1][ch].process(&mut scratch.band[..frames]);
                    for acn in 0..dry_channels {
                        if aural_core::acn_order(acn) != order_band {
                            continue;
                        }
                        self.direct[ch].gains[acn].mix_into(
                            &mut env.dry[acn][..frames],
                            &scratch.band[..frames],
                            frames,
                        );
                    }
                }
                let scratch = &mut *env.scratch;
                self.direct[ch].gains[0].mix_into(
                    &mut env.dry[0][..frames],
                    &scratch.filtered[..frames],
                    frames,
                );
            } else {
                let scratch = &mut *env.scratch;
                for acn in 0..dry_channels {
                    self.direct[ch].gains[acn].mix_into(
                        &mut env.dry[acn][..frames],
                        &scratch.filtered[..frames],
                        frames,
                    );
                }
            }
        }

        // Sends.
        for send_index in 0..env.num_sends.min(MAX_SENDS) {
            let slot_id = self.props.sends[send_index].slot;
            if slot_id == 0 {
                continue;
            }
            let Some(slot_input) = env.slot_bus.get_mut(slot_id) else {
                continue;
            };
            let scratch = &mut *env.scratch;
            scratch.filtered[..frames].copy_from_slice(&scratch.resampled[..frames]);
            let send = &mut self.sends[send_index][ch];
            send.lowpass.process_in_place(&mut scratch.filtered[..frames]);
            send.highpass
                .process_in_place(&mut scratch.filtered[..frames]);
            send.gain
                .mix_into(&mut slot_input[..frames], &scratch.filtered[..frames], frames);
        }
    }

    /// Recomputes the step, target gains, filters, and spatial state from
    /// the current property snapshots.
    fn update_params(&mut self, env: &mut MixEnv<'_>) {
        let props = self.props.clone();
        let props = &props;
        let listener = env.listener;
        let globals = env.globals;

        let basis = ListenerBasis::new(listener.forward, listener.up);
        let local_pos = if props.head_relative {
            props.position
        } else {
            basis.to_local(props.position.sub(listener.position))
        };
        let distance = local_pos.length();

        // Distance attenuation.
        let model = if globals.source_distance_model {
            props.distance_model
        } else {
            globals.distance_model
        };
        let dry_atten = distance_gain(model, distance, props, props.rolloff_factor);
        let wet_atten = distance_gain(model, distance, props, wet_rolloff(props));

        // Cone.
        let (cone_gain, cone_hf) = cone_gains(props, listener, local_pos, &basis);

        // Base gains.
        let listener_gain = listener.gain;
        let dry_base = clampf(
            props.gain * dry_atten * cone_gain,
            props.min_gain,
            props.max_gain,
        ) * listener_gain;
        let dry_gain = dry_base * props.direct_filter.gain;
        let auto_hf = if props.dry_gain_hf_auto { cone_hf } else { 1.0 };
        let dry_hf = auto_hf * props.direct_filter.gain_hf;
        let dry_lf = props.direct_filter.gain_lf;

        // Pitch step with doppler.
        let shift = doppler_shift(props, listener, globals);
        let pitch = (props.pitch * shift).clamp(0.0, MAX_PITCH as f32);
        let step = (pitch as f64 * self.src_rate as f64 / env.device_rate as f64
            * FRACTION_ONE as f64) as u64;
        self.step = step.clamp(1, (MAX_PITCH as u64) << FRACTION_BITS) as u32;
        if self.resampler.kind() != props.resampler {
            self.resampler = Resampler::new(props.resampler);
        }
        self.resampler.update_rate(self.step);

        // Spatial targets.
        let spread = if props.radius > 0.0 && distance > 0.0 {
            if distance < props.radius {
                std::f32::consts::TAU - distance / props.radius * std::f32::consts::PI
            } else {
                2.0 * (props.radius / distance).asin()
            }
        } else {
            0.0
        };
        let direction = if distance > 1e-5 {
            local_pos.scale(1.0 / distance)
        } else {
            Vec3::new(0.0, 0.0, -1.0)
        };

        let spatialize = match props.spatialize {
            SpatializeMode::On => true,
            SpatializeMode::Off => false,
            SpatializeMode::Auto => true,
        };
        let bformat = self.layout.is_bformat();

        let use_hrtf = env.hrtf_table.is_some() && !props.direct_channels && !bformat;
        if use_hrtf {
            if self.hrtf.is_none() {
                self.hrtf = Some(Box::new(std::array::from_fn(|_| HrtfChannel::default())));
            }
        } else {
            self.hrtf = None;
        }

        // Near-field compensation on the spatialized dry path.
        self.nfc_active = !use_hrtf
            && !bformat
            && distance > 1e-3
            && globals.speed_of_sound > 0.0
            && env.order.channel_count() > 1;
        if self.nfc_active {
            let meters = (distance * listener.meters_per_unit).max(0.1);
            let w0 = globals.speed_of_sound * listener.meters_per_unit
                / (meters * env.device_rate as f32);
            // Control distance fixed at 1 m.
            let w1 = globals.speed_of_sound * listener.meters_per_unit
                / env.device_rate as f32;
            for band in 1..=3usize {
                for ch in 0..self.channels {
                    self.nfc[band - 1][ch].init(band, w0, w1);
                }
            }
        }

        // Per-channel directions.
        let two_d = self.layout == BufferLayout::BFormat2D;
        for ch in 0..self.channels {
            let mut coeffs = [0.0f32; MAX_AMBI_CHANNELS];
            let mut channel_dir = direction;
            if bformat {
                bformat_coeffs(ch, two_d, props, &basis, &mut coeffs);
            } else if (!spatialize && self.channels > 1) || props.direct_channels {
                // Channel keeps its own loudspeaker direction.
                let dirs = channel_directions(self.layout);
                match dirs.get(ch).copied().flatten() {
                    Some(speaker) => {
                        channel_dir = speaker_direction(speaker);
                        calc_ambi_coeffs(channel_dir, 0.0, &mut coeffs)
                    }
                    None => coeffs = [0.0; MAX_AMBI_CHANNELS], // LFE content
                }
            } else if !spatialize {
                // Non-spatialized mono plays from dead center.
                channel_dir = Vec3::new(0.0, 0.0, -1.0);
                calc_ambi_coeffs(channel_dir, 0.0, &mut coeffs);
            } else if self.channels == 2 && self.layout == BufferLayout::Stereo {
                let panner = StereoPanner {
                    angles: props.stereo_angles,
                };
                channel_dir = panner.direction(ch);
                calc_ambi_coeffs(channel_dir, spread, &mut coeffs);
            } else if self.channels > 1 {
                let dirs = channel_directions(self.layout);
                match dirs.get(ch).copied().flatten() {
                    Some(speaker) => {
                        channel_dir = speaker_direction(speaker);
                        calc_ambi_coeffs(channel_dir, spread, &mut coeffs)
                    }
                    None => coeffs = [0.0; MAX_AMBI_CHANNELS],
                }
            } else {
                calc_ambi_coeffs(direction, spread, &mut coeffs);
            }
            truncate_to_order(&mut coeffs, env.order);

            if let (Some(hrtf_state), Some(table)) = (self.hrtf.as_mut(), env.hrtf_table) {
                let hrir = table.get(channel_dir);
                let state = &mut hrtf_state[ch];
                state.target = hrir.clone();
                scale_hrir(&mut state.target, dry_gain);
                if self.first_update {
                    state.current = state.target.clone();
                    state.crossfade = false;
                } else {
                    state.crossfade = true;
                }
            } else {
                for (acn, gain) in self.direct[ch].gains.iter_mut().enumerate() {
                    let target = coeffs[acn] * dry_gain;
                    if self.first_update {
                        gain.snap(target);
                    } else {
                        gain.set_target(target);
                    }
                }
            }

            // Direct-path filters.
            let direct = &mut self.direct[ch];
            design_shelves(
                &mut direct.lowpass,
                &mut direct.highpass,
                dry_hf,
                props.direct_filter.hf_reference,
                dry_lf,
                props.direct_filter.lf_reference,
                env.device_rate,
            );
        }

        // Sends.
        for send_index in 0..env.num_sends.min(MAX_SENDS) {
            let send = &props.sends[send_index];
            let auto = env
                .slot_info
                .iter()
                .find(|(id, _)| *id == send.slot)
                .map(|(_, auto)| *auto)
                .unwrap_or(true);
            let wet_base = if auto && props.wet_gain_auto {
                clampf(
                    props.gain * wet_atten * cone_gain,
                    props.min_gain,
                    props.max_gain,
                )
            } else {
                clampf(props.gain * cone_gain, props.min_gain, props.max_gain)
            } * listener_gain;
            let wet_gain = wet_base * send.filter.gain;
            let auto_hf = if props.wet_gain_hf_auto { cone_hf } else { 1.0 };
            let wet_hf = auto_hf * send.filter.gain_hf;

            for ch in 0..self.channels {
                let state = &mut self.sends[send_index][ch];
                if self.first_update {
                    state.gain.snap(wet_gain);
                } else {
                    state.gain.set_target(wet_gain);
                }
                design_shelves(
                    &mut state.lowpass,
                    &mut state.highpass,
                    wet_hf,
                    send.filter.hf_reference,
                    send.filter.gain_lf,
                    send.filter.lf_reference,
                    env.device_rate,
                );
            }
        }
    }
}

fn order_of_channels(order: AmbiOrder) -> usize {
    order.as_usize()
}

/// Designs the HF/LF shelf pair for one path.
fn design_shelves(
    lowpass: &mut BiquadFilter,
    highpass: &mut BiquadFilter,
    gain_hf: f32,
    hf_reference: f32,
    gain_lf: f32,
    lf_reference: f32,
    rate: u32,
) {
    let rate = rate as f32;
    let gain_hf = clampf(gain_hf, 0.0001, 1.0);
    let gain_lf = clampf(gain_lf, 0.0001, 1.0);

    if gain_hf < 1.0 {
        let f0 = (hf_reference / rate).clamp(0.0001, 0.49);
        lowpass.set_params(
            BiquadType::HighShelf,
            gain_hf,
            f0,
            BiquadFilter::rcp_q_from_slope(gain_hf, 1.0),
        );
    } else {
        *lowpass = BiquadFilter::new();
    }
    if gain_lf < 1.0 {
        let f0 = (lf_reference / rate).clamp(0.0001, 0.49);
        highpass.set_params(
            BiquadType::LowShelf,
            gain_lf,
            f0,
            BiquadFilter::rcp_q_from_slope(gain_lf, 1.0),
        );
    } else {
        *highpass = BiquadFilter::new();
    }
}

/// Distance attenuation per model.
fn distance_gain(model: DistanceModel, distance: f32, props: &SourceProps, rolloff: f32) -> f32 {
    let reference = props.reference_distance.max(1e-6);
    let max_distance = props.max_distance.max(reference);
    match model {
        DistanceModel::Off => 1.0,
        DistanceModel::Inverse | DistanceModel::InverseClamped => {
            let d = if model == DistanceModel::InverseClamped {
                distance.clamp(reference, max_distance)
            } else {
                distance
            };
            let denom = reference + rolloff * (d - reference);
            if denom > 1e-6 {
                reference / denom
            } else {
                1.0
            }
        }
        DistanceModel::Linear | DistanceModel::LinearClamped => {
            let d = if model == DistanceModel::LinearClamped {
                distance.clamp(reference, max_distance)
            } else {
                distance
            };
            if max_distance > reference {
                clampf(1.0 - rolloff * (d - reference) / (max_distance - reference), 0.0, 1.0)
            } else {
                1.0
            }
        }
        DistanceModel::Exponent | DistanceModel::ExponentClamped => {
            let d = if model == DistanceModel::ExponentClamped {
                distance.clamp(reference, max_distance)
            } else {
                distance
            };
            if d > 1e-6 {
                (d / reference).powf(-rolloff)
            } else {
                1.0
            }
        }
    }
}

/// Wet-path rolloff: the room rolloff factor replaces the dry one when
/// set.
fn wet_rolloff(props: &SourceProps) -> f32 {
    if props.room_rolloff_factor > 0.0 {
        props.room_rolloff_factor
    } else {
        props.rolloff_factor
    }
}

/// Cone attenuation: (gain, hf-gain).
fn cone_gains(
    props: &SourceProps,
    _listener: &ListenerProps,
    local_pos: Vec3,
    basis: &ListenerBasis,
) -> (f32, f32) {
    let direction = props.direction;
    if direction.length() < 1e-6 || props.cone_inner_angle >= 360.0 {
        return (1.0, 1.0);
    }
    let dir_local = if props.head_relative {
        direction.normalized_or_zero()
    } else {
        basis.to_local(direction).normalized_or_zero()
    };
    // Angle between the source's facing and the vector source-to-listener.
    let to_listener = local_pos.scale(-1.0).normalized_or_zero();
    let cos_angle = dir_local.dot(to_listener).clamp(-1.0, 1.0);
    let angle = cos_angle.acos().to_degrees() * 2.0;

    let inner = props.cone_inner_angle;
    let outer = props.cone_outer_angle.max(inner);
    if angle <= inner {
        (1.0, 1.0)
    } else if angle >= outer {
        (props.cone_outer_gain, props.cone_outer_gain_hf)
    } else {
        let scale = (angle - inner) / (outer - inner).max(1e-6);
        (
            aural_core::lerp(1.0, props.cone_outer_gain, scale),
            aural_core::lerp(1.0, props.cone_outer_gain_hf, scale),
        )
    }
}

/// Doppler pitch multiplier.
fn doppler_shift(props: &SourceProps, listener: &ListenerProps, globals: &ContextProps) -> f32 {
    let factor = globals.doppler_factor * props.doppler_factor;
    if factor <= 0.0 || globals.speed_of_sound <= 0.0 {
        return 1.0;
    }
    let to_source = if props.head_relative {
        props.position
    } else {
        props.position.sub(listener.position)
    };
    if to_source.normalized_or_zero() == Vec3::ZERO {
        return 1.0;
    }
    // Unit vector from the source toward the listener; closing velocities
    // come out positive.
    let u = to_source.normalized_or_zero().scale(-1.0);
    let c = globals.speed_of_sound;
    let vl = listener.velocity.dot(u) * factor;
    let vs = props.velocity.dot(u) * factor;

    let numerator = c - vl;
    let denominator = c - vs;
    if denominator <= 1e-6 {
        // Source approaching at or beyond the speed of sound.
        MAX_PITCH as f32
    } else if numerator <= 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// First-order rotation of B-format content into listener space.
fn bformat_coeffs(
    channel: usize,
    two_d: bool,
    props: &SourceProps,
    listener_basis: &ListenerBasis,
    coeffs: &mut [f32; MAX_AMBI_CHANNELS],
) {
    *coeffs = [0.0; MAX_AMBI_CHANNELS];
    if channel == 0 {
        coeffs[0] = 1.0;
        return;
    }
    // Source-local ambisonic axes rotated by the source orientation, then
    // into listener space.
    let (at, up) = props.orientation;
    let source_basis = ListenerBasis::new(at, up);
    // Component axes in source-local listener convention: full-sphere
    // items are W, Y, Z, X; horizontal-only items are W, X, Y.
    let source_axis = match (two_d, channel) {
        (false, 1) | (true, 2) => Vec3::new(-1.0, 0.0, 0.0), // Y: left
        (false, 2) => Vec3::new(0.0, 1.0, 0.0),              // Z: up
        _ => Vec3::new(0.0, 0.0, -1.0),                      // X: front
    };
    // Undo the source basis, then apply the listener's.
    let world = undo_basis(&source_basis, source_axis);
    let local = if props.head_relative {
        source_axis
    } else {
        listener_basis.to_local(world)
    };
    // Project onto the first-order components.
    coeffs[1] = -local.x;
    coeffs[2] = local.y;
    coeffs[3] = -local.z;
}

/// Maps a listener-local unit vector back to world space.
fn undo_basis(basis: &ListenerBasis, local: Vec3) -> Vec3 {
    // The basis rows are orthonormal; transpose to invert.
    let (r, u, b) = basis.axes();
    Vec3::new(
        r.x * local.x + u.x * local.y + b.x * local.z,
        r.y * local.x + u.y * local.y + b.y * local.z,
        r.z * local.x + u.z * local.y + b.z * local.z,
    )
}

fn scale_hrir(hrir: &mut Hrir, gain: f32) {
    for tap in hrir.left.iter_mut() {
        *tap *= gain;
    }
    for tap in hrir.right.iter_mut() {
        *tap *= gain;
    }
}

/// Convolves one channel with its impulse response pair, crossfading to
/// the target response over the chunk when the direction changed.
fn mix_hrtf(
    state: &mut HrtfChannel,
    input: &[f32],
    ext: &mut [f32],
    out_l: &mut [f32],
    out_r: &mut [f32],
) {
    let frames = input.len();
    ext[..HRTF_HISTORY].copy_from_slice(&state.history);
    ext[HRTF_HISTORY..HRTF_HISTORY + frames].copy_from_slice(input);

    let convolve = |hrir: &Hrir, at: usize| -> (f32, f32) {
        let mut left = 0.0f32;
        let mut right = 0.0f32;
        let base_l = at - hrir.delay_left as usize;
        let base_r = at - hrir.delay_right as usize;
        for t in 0..HRIR_LENGTH {
            left += hrir.left[t] * ext[base_l - t];
            right += hrir.right[t] * ext[base_r - t];
        }
        (left, right)
    };

    if state.crossfade {
        let step = 1.0 / frames as f32;
        for i in 0..frames {
            let at = HRTF_HISTORY + i;
            let (cl, cr) = convolve(&state.current, at);
            let (tl, tr) = convolve(&state.target, at);
            let fade = (i + 1) as f32 * step;
            out_l[i] += cl + (tl - cl) * fade;
            out_r[i] += cr + (tr - cr) * fade;
        }
        state.current = state.target.clone();
        state.crossfade = false;
    } else {
        if hrir_is_silent(&state.current) {
            // Keep history warm even when silent.
        } else {
            for i in 0..frames {
                let (l, r) = convolve(&state.current, HRTF_HISTORY + i);
                out_l[i] += l;
                out_r[i] += r;
            }
        }
    }

    // Preserve the trailing window for the next chunk.
    if frames >= HRTF_HISTORY {
        state
            .history
            .copy_from_slice(&ext[frames..frames + HRTF_HISTORY]);
    } else {
        state.history.copy_within(frames.., 0);
        let keep = HRTF_HISTORY - frames;
        state.history[keep..].copy_from_slice(&ext[HRTF_HISTORY..HRTF_HISTORY + frames]);
    }
}

fn hrir_is_silent(hrir: &Hrir) -> bool {
    hrir.left.iter().chain(hrir.right.iter()).all(|&t| t.abs() < SILENCE_THRESHOLD_GAIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_models() {
        let props = SourceProps {
            reference_distance: 1.0,
            max_distance: 10.0,
            ..SourceProps::default()
        };
        // Inverse: gain halves at twice the reference distance.
        let g = distance_gain(DistanceModel::Inverse, 2.0, &props, 1.0);
        assert!((g - 0.5).abs() < 1e-6);
        // Clamped variants pin below the reference distance.
        let g = distance_gain(DistanceModel::InverseClamped, 0.1, &props, 1.0);
        assert_eq!(g, 1.0);
        // Linear hits zero at max distance.
        let g = distance_gain(DistanceModel::Linear, 10.0, &props, 1.0);
        assert!(g.abs() < 1e-6);
        // Exponent follows a power law.
        let g = distance_gain(DistanceModel::Exponent, 4.0, &props, 1.0);
        assert!((g - 0.25).abs() < 1e-6);
        // Off is unity everywhere.
        assert_eq!(distance_gain(DistanceModel::Off, 100.0, &props, 1.0), 1.0);
    }

    #[test]
    fn test_doppler_approaching_source_raises_pitch() {
        let props = SourceProps {
            position: Vec3::new(0.0, 0.0, -10.0),
            velocity: Vec3::new(0.0, 0.0, 10.0), // moving toward listener
            ..SourceProps::default()
        };
        let listener = ListenerProps::default();
        let globals = ContextProps::default();
        let shift = doppler_shift(&props, &listener, &globals);
        assert!(shift > 1.0, "approaching source must raise pitch: {shift}");
    }

    #[test]
    fn test_doppler_receding_source_lowers_pitch() {
        let props = SourceProps {
            position: Vec3::new(0.0, 0.0, -10.0),
            velocity: Vec3::new(0.0, 0.0, -20.0),
            ..SourceProps::default()
        };
        let shift = doppler_shift(&props, &ListenerProps::default(), &ContextProps::default());
        assert!(shift < 1.0);
    }

    #[test]
    fn test_doppler_supersonic_clamps() {
        let props = SourceProps {
            position: Vec3::new(0.0, 0.0, -10.0),
            velocity: Vec3::new(0.0, 0.0, 400.0),
            ..SourceProps::default()
        };
        let shift = doppler_shift(&props, &ListenerProps::default(), &ContextProps::default());
        assert_eq!(shift, MAX_PITCH as f32);
    }

    #[test]
    fn test_cone_inside_and_outside() {
        let mut props = SourceProps {
            position: Vec3::new(0.0, 0.0, -1.0),
            direction: Vec3::new(0.0, 0.0, 1.0), // facing the listener
            cone_inner_angle: 90.0,
            cone_outer_angle: 180.0,
            cone_outer_gain: 0.25,
            ..SourceProps::default()
        };
        let listener = ListenerProps::default();
        let basis = ListenerBasis::default();
        let (gain, _) = cone_gains(&props, &listener, Vec3::new(0.0, 0.0, -1.0), &basis);
        assert_eq!(gain, 1.0);

        // Facing away: fully outside the cone.
        props.direction = Vec3::new(0.0, 0.0, -1.0);
        let (gain, _) = cone_gains(&props, &listener, Vec3::new(0.0, 0.0, -1.0), &basis);
        assert_eq!(gain, 0.25);
    }

    #[test]
    fn test_voice_claims_and_detaches() {
        let mut voice = Voice::default();
        assert!(voice.is_free());
        let shared = Arc::new(SourceShared {
            id: 9,
            status: Default::default(),
            props: crate::props::PropsCell::new(),
        });
        voice.start(Arc::clone(&shared), 1, Vec::new(), 0, 0, 0);
        assert_eq!(voice.source_id(), 9);
        assert!(voice.finished); // empty queue
        voice.detach(SourceState::Stopped, true);
        assert!(voice.is_free());
        assert_eq!(shared.status.state(), SourceState::Stopped);
    }
}
