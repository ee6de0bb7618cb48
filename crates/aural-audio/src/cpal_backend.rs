//! cpal output backend
//!
//! The cpal stream is owned by a dedicated thread (streams are not Send
//! on every host), which builds it, starts it, and parks until stopped.
//! The data callback pulls straight from the device renderer; callback
//! errors become a disconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use aural_engine::Device;

use crate::backend::{BackendError, BackendResult, PlaybackBackend};
use crate::thread_priority;

/// Playback through the system's default cpal output device.
#[derive(Default)]
pub struct CpalBackend {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaybackBackend for CpalBackend {
    fn reset(&mut self, device: &Arc<Device>) -> BackendResult<()> {
        // Verify a usable output device exists and supports the
        // configured rate before claiming the format is final.
        let host = cpal::default_host();
        let output = host
            .default_output_device()
            .ok_or_else(|| BackendError::NoDevice("no default output device".into()))?;
        let rate = device.config().sample_rate;
        let supported = output
            .supported_output_configs()
            .map_err(|e| BackendError::DeviceError(e.to_string()))?
            .any(|range| {
                range.min_sample_rate().0 <= rate && rate <= range.max_sample_rate().0
            });
        if !supported {
            return Err(BackendError::DeviceError(format!(
                "output device does not support {rate} Hz"
            )));
        }
        Ok(())
    }

    fn start(&mut self, device: &Arc<Device>) -> BackendResult<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let device = Arc::clone(device);
        let (ready_tx, ready_rx) = mpsc::channel::<BackendResult<()>>();

        self.thread = Some(std::thread::spawn(move || {
            let result = build_and_play(&device, &running);
            match result {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    while running.load(Ordering::Acquire) {
                        std::thread::sleep(Duration::from_millis(20));
                    }
                    drop(stream);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            }
        }));

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.stop();
                Err(err)
            }
            Err(_) => {
                self.stop();
                Err(BackendError::DeviceError("stream thread died".into()))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_and_play(
    device: &Arc<Device>,
    _running: &Arc<AtomicBool>,
) -> BackendResult<cpal::Stream> {
    let host = cpal::default_host();
    let output = host
        .default_output_device()
        .ok_or_else(|| BackendError::NoDevice("no default output device".into()))?;

    let config = device.config();
    let stream_config = cpal::StreamConfig {
        channels: config.layout.channel_count() as u16,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let render_device = Arc::clone(device);
    let error_device = Arc::clone(device);
    let mut priority_set = false;

    let stream = output
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                if !priority_set {
                    thread_priority::set_realtime_priority();
                    priority_set = true;
                }
                render_device.render_f32(data);
            },
            move |err| {
                error_device.handle_disconnect(&err.to_string());
            },
            None,
        )
        .map_err(|e| BackendError::DeviceError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| BackendError::DeviceError(e.to_string()))?;
    log::info!(
        "cpal stream started: {} Hz, {} channels",
        config.sample_rate,
        stream_config.channels
    );
    Ok(stream)
}
