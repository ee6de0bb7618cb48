//! PCM buffers, the buffer table, and queue entries
//!
//! Buffer payloads are immutable once uploaded: `buffer_data` installs a
//! fresh `Arc<BufferData>`, and queue entries capture their own clones, so
//! the mixer can read without locks while a re-upload replaces the
//! control-side copy. The user-visible reference count is an explicit
//! counter maintained by queue/unqueue, independent of the `Arc` strong
//! count that guards memory.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use aural_core::{
    invalid_op, invalid_value, AuralError, AuralResult, BufferLayout, SampleType, StorageFormat,
};

use crate::handle::HandleTable;

/// Immutable decoded-side description of one upload.
#[derive(Debug)]
pub struct BufferData {
    pub format: StorageFormat,
    pub sample_rate: u32,
    /// Whole sample frames in the payload.
    pub frames: usize,
    /// Samples per compressed block (1 for linear formats).
    pub align: usize,
    pub loop_start: usize,
    pub loop_end: usize,
    pub bytes: Vec<u8>,
}

impl BufferData {
    /// Empty placeholder for freshly generated buffers.
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            format: StorageFormat::new(BufferLayout::Mono, SampleType::I16),
            sample_rate: 44100,
            frames: 0,
            align: 1,
            loop_start: 0,
            loop_end: 0,
            bytes: Vec::new(),
        })
    }
}

/// One buffer-table entry.
pub struct Buffer {
    pub data: Arc<BufferData>,
    /// Queue references; non-zero forbids deletion and re-upload.
    pub refs: AtomicU32,
    /// Pending samples-per-block override for the next upload.
    pub unpack_align: Option<usize>,
}

impl Buffer {
    fn new() -> Self {
        Self {
            data: BufferData::empty(),
            refs: AtomicU32::new(0),
            unpack_align: None,
        }
    }
}

/// The device's buffer table with the handle-API operations.
#[derive(Default)]
pub struct BufferTable {
    table: HandleTable<Buffer>,
}

impl BufferTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn gen(&mut self, count: usize) -> Vec<u32> {
        (0..count).map(|_| self.table.insert(Buffer::new())).collect()
    }

    pub fn get(&self, id: u32) -> AuralResult<&Buffer> {
        self.table.get(id).ok_or(AuralError::InvalidName(id))
    }

    fn get_mut(&mut self, id: u32) -> AuralResult<&mut Buffer> {
        self.table.get_mut(id).ok_or(AuralError::InvalidName(id))
    }

    /// Deletes buffers; validation-first, so one bad id leaves everything
    /// in place.
    pub fn delete(&mut self, ids: &[u32]) -> AuralResult<()> {
        for &id in ids {
            let buffer = self.get(id)?;
            if buffer.refs.load(Ordering::Acquire) != 0 {
                return Err(invalid_op(format!("buffer {id} is still queued")));
            }
        }
        for &id in ids {
            self.table.remove(id);
        }
        Ok(())
    }

    /// Uploads PCM data, replacing the payload.
    pub fn data(
        &mut self,
        id: u32,
        format: StorageFormat,
        bytes: &[u8],
        sample_rate: u32,
    ) -> AuralResult<()> {
        if sample_rate == 0 {
            return Err(invalid_value("sample rate must be positive"));
        }
        let buffer = self.get_mut(id)?;
        if buffer.refs.load(Ordering::Acquire) != 0 {
            return Err(invalid_op(format!("buffer {id} is still queued")));
        }

        let align = match buffer.unpack_align {
            Some(align) => validate_align(format.sample_type, align)?,
            None => format.sample_type.default_block_align(),
        };
        let frames = format.frames_for_bytes(bytes.len(), align);

        buffer.data = Arc::new(BufferData {
            format,
            sample_rate,
            frames,
            align,
            loop_start: 0,
            loop_end: frames,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    /// Sets the samples-per-block used by the next upload.
    pub fn set_unpack_align(&mut self, id: u32, align: usize) -> AuralResult<()> {
        let buffer = self.get_mut(id)?;
        if buffer.refs.load(Ordering::Acquire) != 0 {
            return Err(invalid_op(format!("buffer {id} is still queued")));
        }
        if align == 0 {
            buffer.unpack_align = None;
            return Ok(());
        }
        buffer.unpack_align = Some(align);
        Ok(())
    }

    /// Sets loop points in sample frames.
    pub fn set_loop_points(&mut self, id: u32, start: usize, end: usize) -> AuralResult<()> {
        let buffer = self.get_mut(id)?;
        if buffer.refs.load(Ordering::Acquire) != 0 {
            return Err(invalid_op(format!("buffer {id} is still queued")));
        }
        if start >= end || end > buffer.data.frames {
            return Err(invalid_value(format!(
                "loop points {start}..{end} outside 0..{}",
                buffer.data.frames
            )));
        }
        let data = &buffer.data;
        buffer.data = Arc::new(BufferData {
            format: data.format,
            sample_rate: data.sample_rate,
            frames: data.frames,
            align: data.align,
            loop_start: start,
            loop_end: end,
            bytes: data.bytes.clone(),
        });
        Ok(())
    }

    pub fn add_ref(&self, id: u32) -> AuralResult<()> {
        self.get(id)?.refs.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub fn release(&self, id: u32) {
        if let Ok(buffer) = self.get(id) {
            buffer.refs.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub fn ref_count(&self, id: u32) -> AuralResult<u32> {
        Ok(self.get(id)?.refs.load(Ordering::Acquire))
    }
}

fn validate_align(sample_type: SampleType, align: usize) -> AuralResult<usize> {
    match sample_type {
        SampleType::Ima4 if align % 8 != 1 => Err(invalid_value(format!(
            "IMA4 block alignment {align} must be 8n+1 samples"
        ))),
        SampleType::Msadpcm if align % 2 != 0 => Err(invalid_value(format!(
            "MSADPCM block alignment {align} must be even"
        ))),
        _ => Ok(align),
    }
}

/// One node of a source's queue as the mixer sees it: co-indexed buffer
/// layers plus the cached longest length.
#[derive(Debug)]
pub struct QueueEntry {
    pub layers: Vec<Arc<BufferData>>,
    /// Handle ids matching `layers`, for unqueue reporting.
    pub buffer_ids: Vec<u32>,
    pub max_frames: usize,
    pub sample_rate: u32,
    pub layout: BufferLayout,
}

impl QueueEntry {
    /// Builds an entry from co-indexed layers. All layers must share the
    /// sample rate and channel layout.
    pub fn from_layers(layers: Vec<(u32, Arc<BufferData>)>) -> AuralResult<Arc<QueueEntry>> {
        let first = layers
            .first()
            .ok_or_else(|| invalid_value("queue entry needs at least one buffer"))?;
        let sample_rate = first.1.sample_rate;
        let layout = first.1.format.layout;
        for (id, data) in &layers {
            if data.sample_rate != sample_rate || data.format.layout != layout {
                return Err(invalid_op(format!(
                    "buffer {id} format does not match the queue"
                )));
            }
        }
        let max_frames = layers.iter().map(|(_, d)| d.frames).max().unwrap_or(0);
        let (buffer_ids, layers) = layers.into_iter().unzip();
        Ok(Arc::new(QueueEntry {
            layers,
            buffer_ids,
            max_frames,
            sample_rate,
            layout,
        }))
    }

    pub fn channels(&self) -> usize {
        self.layout.channel_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i16_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_gen_and_delete_roundtrip() {
        let mut table = BufferTable::new();
        let ids = table.gen(3);
        assert_eq!(table.len(), 3);
        table.delete(&ids).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_delete_unknown_is_invalid_name() {
        let mut table = BufferTable::new();
        let err = table.delete(&[7]).unwrap_err();
        assert_eq!(err, AuralError::InvalidName(7));
    }

    #[test]
    fn test_data_upload_sets_frames() {
        let mut table = BufferTable::new();
        let id = table.gen(1)[0];
        let format = StorageFormat::new(BufferLayout::Stereo, SampleType::I16);
        table
            .data(id, format, &i16_bytes(&[0; 200]), 44100)
            .unwrap();
        let buffer = table.get(id).unwrap();
        assert_eq!(buffer.data.frames, 100);
        assert_eq!(buffer.data.loop_end, 100);
    }

    #[test]
    fn test_referenced_buffer_rejects_mutation() {
        let mut table = BufferTable::new();
        let id = table.gen(1)[0];
        let format = StorageFormat::new(BufferLayout::Mono, SampleType::I16);
        table.data(id, format, &i16_bytes(&[0; 10]), 44100).unwrap();
        table.add_ref(id).unwrap();

        assert!(matches!(
            table.delete(&[id]),
            Err(AuralError::InvalidOperation(_))
        ));
        assert!(matches!(
            table.data(id, format, &[], 44100),
            Err(AuralError::InvalidOperation(_))
        ));

        table.release(id);
        assert!(table.delete(&[id]).is_ok());
    }

    #[test]
    fn test_loop_points_validated() {
        let mut table = BufferTable::new();
        let id = table.gen(1)[0];
        let format = StorageFormat::new(BufferLayout::Mono, SampleType::I16);
        table.data(id, format, &i16_bytes(&[0; 50]), 44100).unwrap();

        assert!(table.set_loop_points(id, 10, 40).is_ok());
        let buffer = table.get(id).unwrap();
        assert_eq!((buffer.data.loop_start, buffer.data.loop_end), (10, 40));

        assert!(matches!(
            table.set_loop_points(id, 40, 10),
            Err(AuralError::InvalidValue(_))
        ));
        assert!(matches!(
            table.set_loop_points(id, 0, 51),
            Err(AuralError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_ima4_align_validation() {
        let mut table = BufferTable::new();
        let id = table.gen(1)[0];
        table.set_unpack_align(id, 64).unwrap();
        let format = StorageFormat::new(BufferLayout::Mono, SampleType::Ima4);
        assert!(matches!(
            table.data(id, format, &[0; 36], 44100),
            Err(AuralError::InvalidValue(_))
        ));
        table.set_unpack_align(id, 65).unwrap();
        assert!(table.data(id, format, &[0; 36], 44100).is_ok());
        assert_eq!(table.get(id).unwrap().data.frames, 65);
    }

    #[test]
    fn test_queue_entry_format_mismatch() {
        let mono = Arc::new(BufferData {
            format: StorageFormat::new(BufferLayout::Mono, SampleType::I16),
            sample_rate: 44100,
            frames: 10,
            align: 1,
            loop_start: 0,
            loop_end: 10,
            bytes: vec![0; 20],
        });
        let stereo = Arc::new(BufferData {
            format: StorageFormat::new(BufferLayout::Stereo, SampleType::I16),
            sample_rate: 44100,
            frames: 10,
            align: 1,
            loop_start: 0,
            loop_end: 10,
            bytes: vec![0; 40],
        });
        let err = QueueEntry::from_layers(vec![(1, mono), (2, stereo)]).unwrap_err();
        assert!(matches!(err, AuralError::InvalidOperation(_)));
    }

    #[test]
    fn test_queue_entry_max_frames() {
        let make = |frames: usize| {
            Arc::new(BufferData {
                format: StorageFormat::new(BufferLayout::Mono, SampleType::I16),
                sample_rate: 22050,
                frames,
                align: 1,
                loop_start: 0,
                loop_end: frames,
                bytes: vec![0; frames * 2],
            })
        };
        let entry = QueueEntry::from_layers(vec![(1, make(10)), (2, make(25))]).unwrap();
        assert_eq!(entry.max_frames, 25);
        assert_eq!(entry.channels(), 1);
    }
}
