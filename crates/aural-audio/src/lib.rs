//! aural-audio: backend boundary for the Aural renderer
//!
//! Backends pull rendered periods from a device on their own thread. The
//! crate ships a null backend (paced discard), a WAV-writer backend
//! (offline render to file), and a cpal output backend behind the
//! `cpal-backend` feature, plus the capture-side trait with a silence
//! source and the real-time priority helper the playback threads use.

mod backend;
mod null;
mod ringbuf;
pub mod thread_priority;
mod wave;

#[cfg(feature = "cpal-backend")]
mod cpal_backend;

pub use backend::{BackendError, BackendResult, CaptureBackend, PlaybackBackend};
pub use null::{NullBackend, NullCapture};
pub use ringbuf::CaptureRing;
pub use wave::WaveBackend;

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::CpalBackend;
