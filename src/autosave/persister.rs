//! The persistence capability injected into an edit session.

use crate::error::SaveError;

/// Identifies one save attempt.
///
/// `session` distinguishes documents sharing a persister, `sequence` orders
/// attempts within a session and `generation` is the edit generation the
/// attempt was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SaveTicket {
    pub session: u64,
    pub sequence: u64,
    pub generation: u64,
}

/// What caused a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    /// The debounce timer fired after a quiet period
    Debounce,
    /// Edits stayed unsaved past the force-save ceiling
    Forced,
    /// The user asked for a save
    Manual,
}

impl SaveTrigger {
    pub fn label(&self) -> &'static str {
        match self {
            SaveTrigger::Debounce => "auto-save",
            SaveTrigger::Forced => "forced save",
            SaveTrigger::Manual => "save",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveRequest {
    pub ticket: SaveTicket,
    pub trigger: SaveTrigger,
    /// Whether the host should confirm success to the user
    pub show_toast: bool,
}

/// Immediate answer from a persister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveDispatch {
    /// The write finished before `save` returned
    Completed(Result<(), SaveError>),
    /// The write continues elsewhere; its result arrives via `poll_completed`
    Pending,
}

/// Deferred result of a save that returned [`SaveDispatch::Pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveCompletion {
    pub ticket: SaveTicket,
    pub result: Result<(), SaveError>,
}

/// Performs the actual serialization and write of a document.
///
/// The session decides *when* to save; implementors decide *how*. A session
/// cannot exist without one, so there is no "not registered" state to check.
pub trait Persister {
    type Document: ?Sized;

    fn save(&mut self, document: &Self::Document, request: SaveRequest) -> SaveDispatch;

    /// Results of saves that previously returned `Pending`.
    fn poll_completed(&mut self) -> Vec<SaveCompletion> {
        Vec::new()
    }
}
