//! Null backends: paced discard playback and silence capture

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use aural_engine::Device;

use crate::backend::{BackendResult, CaptureBackend, PlaybackBackend};
use crate::ringbuf::CaptureRing;
use crate::thread_priority;

/// Playback backend that renders periods on schedule and discards them.
/// Keeps the mixer, clocks, and events running without an audio device.
#[derive(Default)]
pub struct NullBackend {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaybackBackend for NullBackend {
    fn reset(&mut self, _device: &Arc<Device>) -> BackendResult<()> {
        Ok(())
    }

    fn start(&mut self, device: &Arc<Device>) -> BackendResult<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let device = Arc::clone(device);
        self.thread = Some(std::thread::spawn(move || {
            thread_priority::set_realtime_priority();
            let config = device.config();
            let frames = config.period_frames as usize;
            let channels = config.layout.channel_count();
            let period = Duration::from_secs_f64(frames as f64 / config.sample_rate as f64);
            let mut scratch = vec![0.0f32; frames * channels];
            let mut next = Instant::now();
            while running.load(Ordering::Acquire) {
                device.render_f32(&mut scratch);
                next += period;
                let now = Instant::now();
                if next > now {
                    std::thread::sleep(next - now);
                } else {
                    // Fell behind; resynchronize instead of spiraling.
                    next = now;
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for NullBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Capture backend producing silence at the configured rate.
pub struct NullCapture {
    ring: Arc<CaptureRing>,
    channels: usize,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl NullCapture {
    pub fn new(sample_rate: u32, channels: usize, capacity_frames: usize) -> Self {
        Self {
            ring: Arc::new(CaptureRing::new(capacity_frames * channels)),
            channels,
            sample_rate,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl CaptureBackend for NullCapture {
    fn start(&mut self) -> BackendResult<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let ring = Arc::clone(&self.ring);
        let channels = self.channels;
        let rate = self.sample_rate;
        self.thread = Some(std::thread::spawn(move || {
            let chunk_frames = 256usize;
            let silence = vec![0.0f32; chunk_frames * channels];
            let period = Duration::from_secs_f64(chunk_frames as f64 / rate as f64);
            while running.load(Ordering::Acquire) {
                ring.write(&silence);
                std::thread::sleep(period);
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    fn available_samples(&self) -> usize {
        self.ring.available() / self.channels
    }

    fn capture_samples(&mut self, dst: &mut [f32]) -> usize {
        self.ring.read(dst) / self.channels
    }
}

impl Drop for NullCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
