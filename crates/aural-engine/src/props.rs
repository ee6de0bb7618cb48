//! Lock-free property publication between control threads and the mixer
//!
//! Each entity owns a `PropsCell`: control threads fill a boxed record and
//! swap it into the pending slot; the mixer takes it, copies the fields it
//! needs, and pushes the box back through the spare slot for reuse. Both
//! slots are pointer-sized atomic cells, so neither side ever blocks, and
//! the record allocation count per entity is bounded by two.
//!
//! The `clean` flag implements deferred updates: mutation clears it, and
//! publication (immediately, or from `process_updates` when deferral ends)
//! sets it again.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::atomic::AtomicCell;

/// One entity's publication cell.
pub struct PropsCell<T> {
    pending: AtomicCell<Option<Box<T>>>,
    spare: AtomicCell<Option<Box<T>>>,
    clean: AtomicBool,
}

impl<T: Default> Default for PropsCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default> PropsCell<T> {
    pub fn new() -> Self {
        Self {
            pending: AtomicCell::new(None),
            spare: AtomicCell::new(None),
            clean: AtomicBool::new(true),
        }
    }

    /// Marks the entity dirty without publishing (deferred updates).
    pub fn mark_dirty(&self) {
        self.clean.store(false, Ordering::Release);
    }

    /// Whether the last mutation has been published.
    pub fn is_clean(&self) -> bool {
        self.clean.load(Ordering::Acquire)
    }

    /// Control side: fills a record (recycling the spare if available)
    /// and swaps it into the pending slot.
    pub fn publish(&self, fill: impl FnOnce(&mut T)) {
        let mut boxed = self.spare.take().unwrap_or_default();
        fill(&mut boxed);
        if let Some(stale) = self.pending.swap(Some(boxed)) {
            // The mixer never saw the previous record; recycle it.
            self.spare.store(Some(stale));
        }
        self.clean.store(true, Ordering::Release);
    }

    /// Mixer side: takes the pending record if one was published.
    pub fn consume(&self) -> Option<Box<T>> {
        self.pending.take()
    }

    /// Mixer side: returns a consumed record for reuse.
    pub fn recycle(&self, boxed: Box<T>) {
        // If control refilled the spare in the meantime the box is simply
        // dropped; occupancy stays bounded either way.
        self.spare.store(Some(boxed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone, PartialEq, Debug)]
    struct TestProps {
        value: i32,
    }

    #[test]
    fn test_publish_consume_roundtrip() {
        let cell = PropsCell::<TestProps>::new();
        assert!(cell.consume().is_none());

        cell.publish(|p| p.value = 42);
        assert!(cell.is_clean());
        let boxed = cell.consume().expect("published record");
        assert_eq!(boxed.value, 42);
        cell.recycle(boxed);
        assert!(cell.consume().is_none());
    }

    #[test]
    fn test_republish_overwrites_unconsumed() {
        let cell = PropsCell::<TestProps>::new();
        cell.publish(|p| p.value = 1);
        cell.publish(|p| p.value = 2);
        let boxed = cell.consume().expect("record");
        assert_eq!(boxed.value, 2);
        assert!(cell.consume().is_none());
    }

    #[test]
    fn test_mark_dirty_without_publish() {
        let cell = PropsCell::<TestProps>::new();
        cell.mark_dirty();
        assert!(!cell.is_clean());
        assert!(cell.consume().is_none());
        cell.publish(|p| p.value = 7);
        assert!(cell.is_clean());
    }

    #[test]
    fn test_recycled_box_is_reused() {
        let cell = PropsCell::<TestProps>::new();
        cell.publish(|p| p.value = 1);
        let boxed = cell.consume().unwrap();
        let addr = Box::as_ref(&boxed) as *const TestProps as usize;
        cell.recycle(boxed);
        cell.publish(|p| p.value = 2);
        let again = cell.consume().unwrap();
        assert_eq!(Box::as_ref(&again) as *const TestProps as usize, addr);
    }

    #[test]
    fn test_cross_thread_publish() {
        use std::sync::Arc;
        let cell = Arc::new(PropsCell::<TestProps>::new());
        let writer = {
            let cell = Arc::clone(&cell);
            std::thread::spawn(move || {
                for i in 0..1000 {
                    cell.publish(|p| p.value = i);
                }
            })
        };
        let mut last = -1;
        while !writer.is_finished() {
            if let Some(boxed) = cell.consume() {
                assert!(boxed.value >= last);
                last = boxed.value;
                cell.recycle(boxed);
            }
        }
        writer.join().unwrap();
    }
}
