//! Sample type and atomic float helpers

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Type alias for mixer-internal audio samples.
///
/// The mix bus is f32 end to end; storage formats are converted on decode
/// and the device format is produced on encode.
pub type Sample = f32;

/// Atomic f32 stored as its bit pattern, for lock-free status mirrors.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Atomic f64 stored as its bit pattern.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_f32_roundtrip() {
        let a = AtomicF32::new(0.25);
        assert_eq!(a.load(), 0.25);
        a.store(-1.5);
        assert_eq!(a.load(), -1.5);
    }

    #[test]
    fn test_atomic_f64_roundtrip() {
        let a = AtomicF64::new(1e-12);
        assert_eq!(a.load(), 1e-12);
        a.store(f64::MAX);
        assert_eq!(a.load(), f64::MAX);
    }
}
