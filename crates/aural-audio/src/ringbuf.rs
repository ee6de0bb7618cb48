//! SPSC ring buffer for captured audio
//!
//! Wait-free on both sides: the capture thread writes, the application
//! reads. Positions are monotonically increasing and masked on index, so
//! full/empty never ambiguates.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Single-producer single-consumer sample ring.
pub struct CaptureRing {
    buffer: Box<[f32]>,
    mask: usize,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

impl CaptureRing {
    /// Capacity rounds up to a power of two.
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.next_power_of_two().max(2);
        Self {
            buffer: vec![0.0; capacity].into_boxed_slice(),
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Samples ready for reading.
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Space left for writing.
    pub fn space(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Producer side: writes as many samples as fit, returning the count.
    pub fn write(&self, src: &[f32]) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let count = src.len().min(self.space());
        for (i, &sample) in src[..count].iter().enumerate() {
            // Sound because only this side writes inside [write, write+count).
            let index = (write.wrapping_add(i)) & self.mask;
            unsafe {
                let slot = self.buffer.as_ptr().add(index) as *mut f32;
                slot.write(sample);
            }
        }
        self.write_pos
            .store(write.wrapping_add(count), Ordering::Release);
        count
    }

    /// Consumer side: reads up to `dst.len()` samples, returning the
    /// count.
    pub fn read(&self, dst: &mut [f32]) -> usize {
        let read = self.read_pos.load(Ordering::Relaxed);
        let count = dst.len().min(self.available());
        for (i, slot) in dst[..count].iter_mut().enumerate() {
            let index = (read.wrapping_add(i)) & self.mask;
            *slot = self.buffer[index];
        }
        self.read_pos
            .store(read.wrapping_add(count), Ordering::Release);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let ring = CaptureRing::new(16);
        assert_eq!(ring.write(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(ring.available(), 3);
        let mut out = [0.0f32; 3];
        assert_eq!(ring.read(&mut out), 3);
        assert_eq!(out, [1.0, 2.0, 3.0]);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn test_overflow_truncates() {
        let ring = CaptureRing::new(4);
        let written = ring.write(&[0.0; 100]);
        assert_eq!(written, ring.capacity());
        assert_eq!(ring.write(&[1.0]), 0);
    }

    #[test]
    fn test_wraparound() {
        let ring = CaptureRing::new(4);
        let mut out = [0.0f32; 4];
        for round in 0..10 {
            let value = round as f32;
            assert_eq!(ring.write(&[value, value + 0.5]), 2);
            assert_eq!(ring.read(&mut out[..2]), 2);
            assert_eq!(out[0], value);
            assert_eq!(out[1], value + 0.5);
        }
    }

    #[test]
    fn test_threaded_transfer() {
        use std::sync::Arc;
        let ring = Arc::new(CaptureRing::new(256));
        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                let mut sent = 0u32;
                while sent < 10_000 {
                    if ring.write(&[sent as f32]) == 1 {
                        sent += 1;
                    }
                }
            })
        };
        let mut expected = 0u32;
        let mut out = [0.0f32; 64];
        while expected < 10_000 {
            let read = ring.read(&mut out);
            for &sample in &out[..read] {
                assert_eq!(sample, expected as f32);
                expected += 1;
            }
        }
        producer.join().unwrap();
    }
}
