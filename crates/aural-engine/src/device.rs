//! Devices: the mix target and root object
//!
//! A device owns its configuration, the buffer table, the renderer, and
//! the contexts created on it. The backend (or a loopback caller) pulls
//! rendered frames through `render_samples`/`render_f32`; control threads
//! reach the renderer only through the message ring.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use aural_core::{invalid_value, AmbiNorm, AuralResult, DeviceLayout, StorageFormat};
use aural_dsp::codec::encode_from_float;
use aural_dsp::OutputType;

use crate::buffer::BufferTable;
use crate::config::{DeviceConfig, HrtfMode, MAX_SENDS};
use crate::context::Context;
use crate::events::event_queue;
use crate::mixer::{MixClock, MixMsg, Renderer, MIX_MSG_CAPACITY};

/// Context-creation attributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContextAttr {
    /// Requested mix rate; refused when it differs from the device rate.
    Frequency(u32),
    /// Requested updates per second; advisory.
    Refresh(u32),
    /// Synchronous mixing; always reported false.
    Sync(bool),
    MonoSources(u32),
    StereoSources(u32),
    MaxAuxiliarySends(u32),
    /// Output-mode hint (headphones/speakers); the device configuration
    /// is authoritative.
    OutputMode(DeviceLayout),
    Hrtf(HrtfMode),
    /// Specific HRTF set request; only the built-in set exists.
    HrtfId(u32),
    AmbisonicLayout(AmbiNorm),
    AmbisonicScaling(AmbiNorm),
    AmbisonicOrder(u32),
}

/// The mix target.
pub struct Device {
    config: DeviceConfig,
    clock: Arc<MixClock>,
    buffers: Mutex<BufferTable>,
    msg_tx: Mutex<rtrb::Producer<MixMsg>>,
    renderer: Mutex<Renderer>,
    contexts: Mutex<Vec<Weak<Context>>>,
    next_ctx_id: AtomicU32,
}

impl Device {
    /// Opens a device with the given configuration.
    pub fn open(config: DeviceConfig) -> Arc<Device> {
        let clock = Arc::new(MixClock::new());
        let (msg_tx, msg_rx) = rtrb::RingBuffer::new(MIX_MSG_CAPACITY);
        let renderer = Renderer::new(config, msg_rx, Arc::clone(&clock));
        log::info!(
            "device open: {} Hz {:?} x{} periods",
            config.sample_rate,
            config.layout,
            config.period_count
        );
        Arc::new(Device {
            config,
            clock,
            buffers: Mutex::new(BufferTable::new()),
            msg_tx: Mutex::new(msg_tx),
            renderer: Mutex::new(renderer),
            contexts: Mutex::new(Vec::new()),
            next_ctx_id: AtomicU32::new(1),
        })
    }

    pub fn config(&self) -> DeviceConfig {
        self.config
    }

    pub fn is_connected(&self) -> bool {
        self.clock.connected.load(Ordering::Acquire)
    }

    /// Voices currently owned by the mixer.
    pub fn voices_used(&self) -> u32 {
        self.clock.voices_used.load(Ordering::Acquire)
    }

    /// Total frames rendered since open.
    pub fn rendered_samples(&self) -> u64 {
        self.clock.samples.load(Ordering::Acquire)
    }

    /// Pushes a structural message, waiting for ring space if the mixer
    /// is far behind. Control threads may block here; the mixer never
    /// does.
    pub(crate) fn push_msg(&self, msg: MixMsg) {
        let mut tx = self.msg_tx.lock();
        let mut msg = msg;
        loop {
            match tx.push(msg) {
                Ok(()) => return,
                Err(rtrb::PushError::Full(back)) => {
                    msg = back;
                    std::thread::yield_now();
                }
            }
        }
    }

    pub(crate) fn buffers(&self) -> MutexGuard<'_, BufferTable> {
        self.buffers.lock()
    }

    /// Spins until the mixer is outside a mix period, bounding how long a
    /// caller must wait before reclaiming anything a voice might have
    /// referenced.
    pub fn wait_mix_idle(&self) {
        loop {
            if self.clock.mix_count.load(Ordering::Acquire) % 2 == 0 {
                return;
            }
            std::hint::spin_loop();
        }
    }

    // ---------------------------------------------------------------
    // Buffer handle API
    // ---------------------------------------------------------------

    pub fn gen_buffers(&self, count: usize) -> Vec<u32> {
        self.buffers.lock().gen(count)
    }

    pub fn delete_buffers(&self, ids: &[u32]) -> AuralResult<()> {
        self.buffers.lock().delete(ids)
    }

    pub fn buffer_data(
        &self,
        id: u32,
        format: StorageFormat,
        bytes: &[u8],
        sample_rate: u32,
    ) -> AuralResult<()> {
        self.buffers.lock().data(id, format, bytes, sample_rate)
    }

    pub fn buffer_set_loop_points(&self, id: u32, start: usize, end: usize) -> AuralResult<()> {
        self.buffers.lock().set_loop_points(id, start, end)
    }

    pub fn buffer_set_unpack_align(&self, id: u32, align: usize) -> AuralResult<()> {
        self.buffers.lock().set_unpack_align(id, align)
    }

    pub fn buffer_ref_count(&self, id: u32) -> AuralResult<u32> {
        self.buffers.lock().ref_count(id)
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.lock().len()
    }

    // ---------------------------------------------------------------
    // Contexts
    // ---------------------------------------------------------------

    /// Creates a context. Attribute validation is strict; unsupported
    /// requests fail rather than silently degrade.
    pub fn create_context(
        self: &Arc<Self>,
        attrs: &[ContextAttr],
    ) -> AuralResult<Arc<Context>> {
        for attr in attrs {
            match *attr {
                ContextAttr::Frequency(rate) => {
                    if rate != self.config.sample_rate {
                        return Err(invalid_value(format!(
                            "context frequency {rate} differs from device rate {}",
                            self.config.sample_rate
                        )));
                    }
                }
                ContextAttr::Refresh(refresh) => {
                    if refresh == 0 {
                        return Err(invalid_value("refresh must be positive"));
                    }
                }
                ContextAttr::MaxAuxiliarySends(sends) => {
                    if sends as usize > MAX_SENDS {
                        log::warn!("clamping requested sends {sends} to {MAX_SENDS}");
                    }
                }
                ContextAttr::AmbisonicOrder(order) => {
                    if !(1..=3).contains(&order) {
                        return Err(invalid_value(format!(
                            "ambisonic order {order} unsupported"
                        )));
                    }
                }
                ContextAttr::HrtfId(id) => {
                    if id != 0 {
                        return Err(invalid_value(format!("unknown HRTF set {id}")));
                    }
                }
                ContextAttr::MonoSources(_)
                | ContextAttr::StereoSources(_)
                | ContextAttr::Sync(_)
                | ContextAttr::OutputMode(_)
                | ContextAttr::AmbisonicLayout(_)
                | ContextAttr::AmbisonicScaling(_)
                | ContextAttr::Hrtf(_) => {}
            }
        }

        let id = self.next_ctx_id.fetch_add(1, Ordering::AcqRel);
        let (event_tx, event_rx) = event_queue();
        let context = Context::new(Arc::clone(self), id, event_rx);
        self.push_msg(MixMsg::AddContext {
            shared: Arc::clone(&context.shared),
            events: event_tx,
        });
        self.contexts.lock().push(Arc::downgrade(&context));
        Ok(context)
    }

    /// Destroys a context: detaches its mixer state and drops the device
    /// registration. The caller's `Arc` keeps the control data alive
    /// until it goes out of scope.
    pub fn destroy_context(&self, context: &Arc<Context>) {
        self.push_msg(MixMsg::RemoveContext {
            ctx_id: context.id(),
        });
        self.contexts
            .lock()
            .retain(|weak| weak.upgrade().map(|c| c.id()) != Some(context.id()));
    }

    // ---------------------------------------------------------------
    // Rendering
    // ---------------------------------------------------------------

    /// Renders interleaved f32 frames; the loopback entry point and the
    /// core of `render_samples`.
    pub fn render_f32(&self, dst: &mut [f32]) {
        if !self.is_connected() {
            dst.fill(0.0);
            return;
        }
        self.renderer.lock().render_f32(dst);
    }

    /// Renders `frames` frames into a backend byte buffer in the device's
    /// output sample type. `scratch` must hold `frames x channels` f32
    /// samples; backends keep one allocated.
    pub fn render_samples(&self, dst: &mut [u8], scratch: &mut [f32], frames: usize) {
        let channels = self.config.layout.channel_count();
        let samples = frames * channels;
        let scratch = &mut scratch[..samples];
        self.render_f32(scratch);
        encode_from_float(dst, scratch, self.config.output_type);
    }

    pub fn output_type(&self) -> OutputType {
        self.config.output_type
    }

    /// Bytes per rendered frame in the output format.
    pub fn frame_bytes(&self) -> usize {
        self.config.layout.channel_count() * self.config.output_type.bytes_per_sample()
    }

    /// Reports an unrecoverable backend failure: stops all sources,
    /// freezes offsets, and posts disconnect events.
    pub fn handle_disconnect(&self, reason: &str) {
        if !self.clock.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        log::error!("backend disconnect: {reason}");
        self.renderer.lock().disconnect();
    }
}
