//! Force-save ceiling.
//!
//! Continuous typing keeps pushing the debounce deadline out. The guard
//! bounds how long edits can stay unsaved regardless of the debounce.

use super::tracker::DirtyTracker;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct ForceSaveGuard {
    max_delay: Duration,
}

impl ForceSaveGuard {
    pub fn new(max_delay: Duration) -> Self {
        Self { max_delay }
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn set_max_delay(&mut self, max_delay: Duration) {
        self.max_delay = max_delay;
    }

    /// Whether the next save must bypass the debounce.
    ///
    /// A document that was never saved is never forced.
    pub fn should_force(&self, tracker: &DirtyTracker, now: Instant) -> bool {
        if !tracker.is_dirty() {
            return false;
        }
        tracker
            .elapsed_since_save(now)
            .is_some_and(|elapsed| elapsed >= self.max_delay)
    }
}
