//! Debounce scheduling for auto-save.
//!
//! Timers are deadlines owned by the scheduler and checked by the host's
//! event loop through [`DebounceScheduler::take_expired`]. There is never
//! more than one armed timer; arming a new one drops the previous handle.

use super::DEFAULT_DEBOUNCE_DELAY;
use log::{trace, warn};
use std::time::{Duration, Instant};

/// An armed debounce timer.
///
/// Deliberately not `Clone`: the scheduler holds the only handle, and firing
/// or cancelling moves it out.
#[derive(Debug, PartialEq, Eq)]
pub struct PendingTimer {
    id: u64,
    armed_at: Instant,
    deadline: Instant,
}

impl PendingTimer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn armed_at(&self) -> Instant {
        self.armed_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Coalesces bursts of edits into a single save after a quiet period.
#[derive(Debug)]
pub struct DebounceScheduler {
    delay: Duration,
    pending: Option<PendingTimer>,
    next_id: u64,
}

impl DebounceScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            next_id: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Change the quiet period. An already armed timer keeps its deadline.
    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    /// Drop any pending timer and arm a new one at `now + delay`.
    ///
    /// A delay too large to represent as an `Instant` falls back to
    /// [`DEFAULT_DEBOUNCE_DELAY`]. Returns the new deadline.
    pub fn reschedule(&mut self, now: Instant) -> Instant {
        self.next_id = self.next_id.wrapping_add(1);
        let deadline = now.checked_add(self.delay).unwrap_or_else(|| {
            warn!(
                "Debounce delay {:?} out of range; using {:?}",
                self.delay, DEFAULT_DEBOUNCE_DELAY
            );
            now.checked_add(DEFAULT_DEBOUNCE_DELAY).unwrap_or(now)
        });
        let timer = PendingTimer {
            id: self.next_id,
            armed_at: now,
            deadline,
        };
        let deadline = timer.deadline;
        if let Some(previous) = self.pending.replace(timer) {
            trace!("Debounce timer {} superseded", previous.id);
        }
        deadline
    }

    /// Drop the pending timer without arming a replacement.
    pub fn cancel(&mut self) -> Option<PendingTimer> {
        self.pending.take()
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(PendingTimer::deadline)
    }

    /// How long until the pending timer fires; zero if already due.
    pub fn time_until_fire(&self, now: Instant) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Fire the pending timer if its deadline has passed.
    pub fn take_expired(&mut self, now: Instant) -> Option<PendingTimer> {
        if self.pending.as_ref().is_some_and(|timer| timer.is_due(now)) {
            self.pending.take()
        } else {
            None
        }
    }
}
