//! Auto-save coordination
//!
//! Decides when in-memory edits are written back: a short debounce after
//! typing stops, plus a ceiling that forces a save under continuous typing.
//! Persistence itself is delegated to an injected [`Persister`].

mod guard;
mod persister;
mod scheduler;
mod session;
mod tracker;

pub use guard::ForceSaveGuard;
pub use persister::{
    Persister, SaveCompletion, SaveDispatch, SaveRequest, SaveTicket, SaveTrigger,
};
pub use scheduler::{DebounceScheduler, PendingTimer};
pub use session::{EditOutcome, EditSession, SaveEvent, SessionState};
pub use tracker::DirtyTracker;

use std::time::Duration;

/// Quiet period after the last edit before an auto-save.
pub const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_secs(2);

/// Longest time edits may remain unsaved while the user keeps typing.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Explicit timing configuration for an [`EditSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoSaveConfig {
    pub enabled: bool,
    pub debounce_delay: Duration,
    pub max_delay: Duration,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_delay: DEFAULT_DEBOUNCE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}
