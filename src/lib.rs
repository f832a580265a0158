//! draftguard
//!
//! Auto-save coordination and safe persistence for markdown/MDX content
//! editors: debounced saves, a force-save ceiling under continuous typing,
//! atomic project-confined writes, recovery snapshots and external change
//! detection.

pub mod autosave;
pub mod config;
pub mod document;
pub mod error;
pub mod state;

pub use autosave::{AutoSaveConfig, EditSession, Persister};
pub use document::{BackgroundPersister, Document, FilePersister};
pub use error::{Error, Result, SaveError};
pub use state::Editor;
