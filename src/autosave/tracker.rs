//! Dirty-state tracking for an open document.

use std::time::{Duration, Instant};

/// Records whether unsaved edits exist and when the document was last saved.
///
/// Every edit bumps a generation counter. A save request snapshots the
/// generation so a completion can tell whether edits landed while the write
/// was in flight.
#[derive(Debug, Clone, Default)]
pub struct DirtyTracker {
    dirty: bool,
    last_save: Option<Instant>,
    generation: u64,
}

impl DirtyTracker {
    /// A tracker for a document that has never been saved.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clean tracker for a document just loaded from disk at `now`.
    pub fn opened_at(now: Instant) -> Self {
        Self {
            dirty: false,
            last_save: Some(now),
            generation: 0,
        }
    }

    /// Record an edit. Returns the new generation.
    pub fn mark_dirty(&mut self) -> u64 {
        self.dirty = true;
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    /// Record a successful save that covered every edit so far.
    pub fn mark_clean(&mut self, at: Instant) {
        self.dirty = false;
        self.last_save = Some(at);
    }

    /// Record a successful save that did not cover the latest edits.
    pub fn record_partial_save(&mut self, at: Instant) {
        self.last_save = Some(at);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn last_save(&self) -> Option<Instant> {
        self.last_save
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Time since the last successful save, `None` if never saved.
    pub fn elapsed_since_save(&self, now: Instant) -> Option<Duration> {
        self.last_save
            .map(|saved| now.saturating_duration_since(saved))
    }
}
