//! External change detection for the open document.
//!
//! Watches the document's directory (not the file itself, since atomic
//! writes replace the inode) and reports events for the one file name.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Duration;

use crate::error::{Error, Result};

/// File system events the editor cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// The file was written or replaced by someone
    Modified(PathBuf),
    /// The file was deleted or renamed away
    Removed(PathBuf),
    /// The watcher encountered an error
    Error(String),
}

/// Watches a single document for changes made outside the editor.
#[derive(Debug)]
pub struct DocumentWatcher {
    _watcher: RecommendedWatcher,
    receiver: Receiver<DocumentEvent>,
    path: PathBuf,
}

impl DocumentWatcher {
    pub fn new(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .map(OsStr::to_os_string)
            .ok_or_else(|| Error::InvalidPath(path.to_path_buf()))?;
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| {
                Self::handle_event(result, &file_name, &tx);
            },
            Config::default().with_poll_interval(Duration::from_millis(500)),
        )
        .map_err(|e| Error::Application(format!("Failed to create file watcher: {}", e)))?;

        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|e| {
                Error::Application(format!(
                    "Failed to watch {}: {}",
                    directory.display(),
                    e
                ))
            })?;

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
            path: path.to_path_buf(),
        })
    }

    fn handle_event(
        result: std::result::Result<Event, notify::Error>,
        file_name: &OsString,
        tx: &Sender<DocumentEvent>,
    ) {
        match result {
            Ok(event) => {
                for path in event.paths {
                    if let Some(evt) = classify(&event.kind, path, file_name) {
                        let _ = tx.send(evt);
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(DocumentEvent::Error(e.to_string()));
            }
        }
    }

    /// Drain pending events without blocking.
    pub fn poll_events(&self) -> Vec<DocumentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Map a raw notify event on `path` to a document event, if it concerns
/// the watched file name.
pub fn classify(kind: &EventKind, path: PathBuf, file_name: &OsStr) -> Option<DocumentEvent> {
    if path.file_name() != Some(file_name) {
        return None;
    }
    match kind {
        EventKind::Create(_) | EventKind::Modify(_) => Some(DocumentEvent::Modified(path)),
        EventKind::Remove(_) => Some(DocumentEvent::Removed(path)),
        _ => None,
    }
}
