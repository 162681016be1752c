//! Frame scheduling abstraction. The controller never talks to a host event
//! loop directly; it requests frames through this trait and the host calls
//! [`crate::map::Map::tick`] back. Animations themselves are pure functions
//! of elapsed time, so schedulers never influence their results.

use crate::map::events::IdAllocator;

/// Cancelable handle for one requested frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(pub u64);

/// Strategy the map uses to ask its host for animation frames.
pub trait FrameScheduler: Send {
    /// Asks the host to call `Map::tick` soon.
    fn request(&mut self) -> FrameHandle;
    /// Cancels a previously requested frame; the host must not deliver it.
    fn cancel(&mut self, handle: FrameHandle);
}

/// Scheduler for headless hosts and tests: records outstanding requests so
/// the driver (or an assertion) can see exactly what the map asked for.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    pending: Vec<u64>,
    ids: IdAllocator,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames requested and not yet canceled or taken.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Consumes all outstanding requests, as a host delivering frames would.
    pub fn take_pending(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }
}

impl FrameScheduler for ManualScheduler {
    fn request(&mut self) -> FrameHandle {
        let id = self.ids.next_id();
        self.pending.push(id);
        FrameHandle(id)
    }

    fn cancel(&mut self, handle: FrameHandle) {
        self.pending.retain(|id| *id != handle.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_and_cancel() {
        let mut scheduler = ManualScheduler::new();
        let a = scheduler.request();
        let b = scheduler.request();
        assert_ne!(a, b);
        assert_eq!(scheduler.pending(), 2);

        scheduler.cancel(a);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.take_pending(), 1);
        assert_eq!(scheduler.pending(), 0);
    }
}
