//! WAV-writer backend: renders periods into a RIFF file
//!
//! Runs the same paced loop as the null backend but writes each rendered
//! period through `hound`. Pacing can be disabled for offline rendering
//! faster than real time.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use aural_engine::Device;

use crate::backend::{BackendError, BackendResult, PlaybackBackend};

/// File-writer playback backend.
pub struct WaveBackend {
    path: PathBuf,
    /// Sleep between periods to mimic a real device; off renders as fast
    /// as possible.
    paced: bool,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    /// Frames to render when unpaced, then stop on its own.
    render_limit: Option<u64>,
}

impl WaveBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            paced: true,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            render_limit: None,
        }
    }

    /// Renders `frames` as fast as possible, then stops.
    pub fn offline(path: impl AsRef<Path>, frames: u64) -> Self {
        let mut backend = Self::new(path);
        backend.paced = false;
        backend.render_limit = Some(frames);
        backend
    }

    /// Blocks until the writer thread exits (offline mode completion).
    pub fn wait(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl PlaybackBackend for WaveBackend {
    fn reset(&mut self, device: &Arc<Device>) -> BackendResult<()> {
        // Probe writability up front so start() cannot half-fail.
        let spec = wav_spec(device);
        let writer = hound::WavWriter::create(&self.path, spec)
            .map_err(|e| BackendError::DeviceError(e.to_string()))?;
        writer
            .finalize()
            .map_err(|e| BackendError::DeviceError(e.to_string()))?;
        Ok(())
    }

    fn start(&mut self, device: &Arc<Device>) -> BackendResult<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        let spec = wav_spec(device);
        let writer = hound::WavWriter::create(&self.path, spec)
            .map_err(|e| BackendError::DeviceError(e.to_string()))?;

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let device = Arc::clone(device);
        let paced = self.paced;
        let limit = self.render_limit;
        self.thread = Some(std::thread::spawn(move || {
            let config = device.config();
            let frames = config.period_frames as usize;
            let channels = config.layout.channel_count();
            let period = Duration::from_secs_f64(frames as f64 / config.sample_rate as f64);
            let mut scratch = vec![0.0f32; frames * channels];
            let mut writer = writer;
            let mut rendered = 0u64;
            let mut next = Instant::now();

            while running.load(Ordering::Acquire) {
                device.render_f32(&mut scratch);
                for &sample in &scratch {
                    if writer.write_sample(sample).is_err() {
                        device.handle_disconnect("wav writer failed");
                        return;
                    }
                }
                rendered += frames as u64;
                if let Some(limit) = limit {
                    if rendered >= limit {
                        break;
                    }
                }
                if paced {
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        std::thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
            }
            if let Err(err) = writer.finalize() {
                log::warn!("wav finalize failed: {err}");
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.wait();
    }
}

impl Drop for WaveBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wav_spec(device: &Arc<Device>) -> hound::WavSpec {
    let config = device.config();
    hound::WavSpec {
        channels: config.layout.channel_count() as u16,
        sample_rate: config.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    }
}
