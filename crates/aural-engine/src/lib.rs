//! aural-engine: the Aural rendering core
//!
//! Positioned sources with queued PCM buffers are mixed by a per-device
//! renderer into an ambisonic dry bus plus auxiliary effect sends, then
//! decoded to the output layout. Control threads operate on handles
//! through [`Device`] and [`Context`]; the renderer runs on whichever
//! thread the backend pulls from and shares nothing with the control
//! plane but lock-free cells, rings, and atomics.
//!
//! ```no_run
//! use aural_engine::{Device, DeviceConfig};
//! use aural_core::{BufferLayout, SampleType, StorageFormat};
//!
//! let device = Device::open(DeviceConfig::default());
//! let context = device.create_context(&[]).unwrap();
//!
//! let buffer = device.gen_buffers(1)[0];
//! let format = StorageFormat::new(BufferLayout::Mono, SampleType::I16);
//! device.buffer_data(buffer, format, &[0u8; 2048], 44100).unwrap();
//!
//! let source = context.gen_sources(1).unwrap()[0];
//! context.source_set_buffer(source, buffer).unwrap();
//! context.source_play(&[source]).unwrap();
//!
//! let mut frames = vec![0.0f32; 1024 * 2];
//! device.render_f32(&mut frames);
//! ```

mod buffer;
mod config;
mod context;
mod device;
mod events;
mod handle;
mod mixer;
mod props;
mod slot;
mod source;
mod voice;

pub use buffer::{Buffer, BufferData, QueueEntry};
pub use config::{DeviceConfig, HrtfMode, MAX_SENDS};
pub use context::{Context, ContextProps, ListenerProps};
pub use device::{ContextAttr, Device};
pub use events::EngineEvent;
pub use slot::{EffectParams, EffectSlot, FilterKind, FilterObject};
pub use source::{
    DistanceModel, FilterProps, OffsetKind, SourceProps, SourceState, SourceType, SpatializeMode,
};

pub use aural_core::{AuralError, AuralResult};
