//! Best-effort real-time priority for backend render threads
//!
//! Failure is non-fatal; the thread keeps its default priority and audio
//! still flows, just with weaker scheduling guarantees.

use std::sync::atomic::{AtomicBool, Ordering};

static PRIORITY_SET: AtomicBool = AtomicBool::new(false);

/// Outcome of a priority elevation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityResult {
    Success,
    AlreadySet,
    Failed,
    Unsupported,
}

/// Elevates the calling thread to real-time scheduling. Call once from
/// the render thread after it starts.
pub fn set_realtime_priority() -> PriorityResult {
    if PRIORITY_SET.swap(true, Ordering::SeqCst) {
        return PriorityResult::AlreadySet;
    }
    let result = platform_set_priority();
    match result {
        PriorityResult::Success => log::info!("render thread elevated to real-time priority"),
        PriorityResult::Failed => {
            log::warn!("could not set real-time thread priority");
            PRIORITY_SET.store(false, Ordering::SeqCst);
        }
        PriorityResult::Unsupported => {
            log::debug!("real-time priority unsupported on this platform")
        }
        PriorityResult::AlreadySet => {}
    }
    result
}

#[cfg(target_os = "linux")]
fn platform_set_priority() -> PriorityResult {
    // SCHED_FIFO needs CAP_SYS_NICE or an rtprio rlimit; try a middling
    // priority and accept rejection.
    let param = libc::sched_param { sched_priority: 45 };
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc == 0 {
        PriorityResult::Success
    } else {
        PriorityResult::Failed
    }
}

#[cfg(target_os = "macos")]
fn platform_set_priority() -> PriorityResult {
    let param = libc::sched_param { sched_priority: 45 };
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc == 0 {
        PriorityResult::Success
    } else {
        PriorityResult::Failed
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn platform_set_priority() -> PriorityResult {
    PriorityResult::Unsupported
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_call_does_not_panic() {
        // Either it works, already happened, or fails gracefully.
        let result = set_realtime_priority();
        assert!(matches!(
            result,
            PriorityResult::Success
                | PriorityResult::AlreadySet
                | PriorityResult::Failed
                | PriorityResult::Unsupported
        ));
    }
}
