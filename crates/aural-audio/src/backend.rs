//! Backend traits and errors

use std::sync::Arc;

use thiserror::Error;

use aural_engine::Device;

/// Errors at the backend boundary. These never surface through the
/// handle API; an unrecoverable one becomes a disconnect.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("no such device: {0}")]
    NoDevice(String),

    #[error("device error: {0}")]
    DeviceError(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("backend disconnected")]
    Disconnected,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// A playback backend drives the device by pulling rendered periods from
/// a dedicated thread.
///
/// Lifecycle: `reset` finalizes the negotiated format (the device's
/// configuration is authoritative here; a backend that cannot honor it
/// fails), `start` spins up the render thread, `stop` joins it. On an
/// unrecoverable failure the backend calls `Device::handle_disconnect`
/// and exits its thread.
pub trait PlaybackBackend: Send {
    /// Re-negotiates the stream against the device configuration.
    fn reset(&mut self, device: &Arc<Device>) -> BackendResult<()>;

    /// Starts pulling periods.
    fn start(&mut self, device: &Arc<Device>) -> BackendResult<()>;

    /// Stops pulling and joins the thread.
    fn stop(&mut self);

    /// (device clock in rendered samples, latency in frames).
    fn clock_and_latency(&self, device: &Arc<Device>) -> (u64, u32) {
        (device.rendered_samples(), device.config().buffer_frames())
    }
}

/// A capture backend produces frames into a ring the application drains.
pub trait CaptureBackend: Send {
    fn start(&mut self) -> BackendResult<()>;
    fn stop(&mut self);

    /// Frames ready to read.
    fn available_samples(&self) -> usize;

    /// Reads up to `dst` frames of interleaved f32; returns frames read.
    fn capture_samples(&mut self, dst: &mut [f32]) -> usize;
}
