//! Async events from the mixer back to the application

use crate::source::SourceState;

/// Events the mixer posts for control-side consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// A source changed playback state on the mixer side (queue ran out,
    /// disconnect, or an explicit transition was applied).
    SourceStateChanged { source: u32, state: SourceState },
    /// One or more queue items finished playing on a source.
    BufferCompleted { source: u32, count: u32 },
    /// The device lost its backend; all sources stopped.
    Disconnected,
}

/// Capacity of each context's event ring.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Creates the pair: the producer side lives in the renderer, the
/// consumer side in the context.
pub fn event_queue() -> (rtrb::Producer<EngineEvent>, rtrb::Consumer<EngineEvent>) {
    rtrb::RingBuffer::new(EVENT_QUEUE_CAPACITY)
}

/// Pushes an event, dropping it when the ring is full. The mixer must
/// never block, and a slow consumer losing notifications is the
/// documented tradeoff.
pub fn post(tx: &mut rtrb::Producer<EngineEvent>, event: EngineEvent) {
    if tx.push(event).is_err() {
        log::debug!("event ring full, dropped {event:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_flow_in_order() {
        let (mut tx, mut rx) = event_queue();
        post(
            &mut tx,
            EngineEvent::SourceStateChanged {
                source: 1,
                state: SourceState::Stopped,
            },
        );
        post(&mut tx, EngineEvent::Disconnected);
        assert_eq!(
            rx.pop().unwrap(),
            EngineEvent::SourceStateChanged {
                source: 1,
                state: SourceState::Stopped
            }
        );
        assert_eq!(rx.pop().unwrap(), EngineEvent::Disconnected);
        assert!(rx.pop().is_err());
    }

    #[test]
    fn test_full_ring_drops_instead_of_blocking() {
        let (mut tx, _rx) = event_queue();
        for _ in 0..EVENT_QUEUE_CAPACITY * 2 {
            post(&mut tx, EngineEvent::Disconnected);
        }
    }
}
