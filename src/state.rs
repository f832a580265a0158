//! Editor state management for draftguard
//!
//! This module defines the central `Editor` struct that owns the open
//! document, its auto-save session, the settings and the status messages
//! shown to the user. Hosts drive it with explicit timestamps.

use crate::autosave::{EditOutcome, EditSession, Persister, SaveEvent, SessionState};
use crate::config::{save_config_silent, Settings};
use crate::document::{write_recovery_snapshot, Document, DocumentEvent, DocumentWatcher};
use crate::error::{Error, Result, SaveError};
use log::{debug, info, warn};
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Upper bound on how long a host may sleep while a save is in flight.
const SAVE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on how long a host may sleep while watching for external edits.
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);

// ─────────────────────────────────────────────────────────────────────────────
// Status Messages
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A message for the status line or a toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub level: StatusLevel,
    pub text: String,
}

/// What [`Editor::check_external_change`] found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalChange {
    /// Disk matches the document or one of our own writes
    Unchanged,
    /// The document was clean and has been replaced by the disk version
    Reloaded,
    /// The document has local edits; they were kept
    Conflict,
    /// The file no longer exists
    Missing,
    /// The disk version could not be parsed
    Invalid(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Open Document
// ─────────────────────────────────────────────────────────────────────────────

struct OpenDocument<P: Persister<Document = Document>> {
    document: Document,
    session: EditSession<P>,
    watcher: Option<DocumentWatcher>,
    /// Text we last know to be on disk because we wrote or read it
    disk_text: Option<String>,
    /// Rendering of the document at the time the in-flight save was issued
    pending_write: Option<String>,
}

impl<P: Persister<Document = Document>> OpenDocument<P> {
    /// Remember what an in-flight save is writing, so its watcher event is
    /// not mistaken for an external edit.
    fn capture_pending_write(&mut self) {
        if self.session.is_saving() && self.pending_write.is_none() {
            self.pending_write = self.document.render().ok();
        }
    }

    fn is_own_write(&self, disk: &str) -> bool {
        self.disk_text.as_deref() == Some(disk) || self.pending_write.as_deref() == Some(disk)
    }
}

fn load_with_text(path: &Path) -> Result<(Document, String)> {
    let text = fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let document = Document::from_markdown(path.to_path_buf(), &text)?;
    Ok((document, text))
}

// ─────────────────────────────────────────────────────────────────────────────
// Editor
// ─────────────────────────────────────────────────────────────────────────────

/// Central editor state.
///
/// Exactly one of `idle_persister` and the open document's session holds
/// the persister at any time.
pub struct Editor<P: Persister<Document = Document>> {
    settings: Settings,
    /// Whether settings have been modified and need saving
    settings_dirty: bool,
    idle_persister: Option<P>,
    open: Option<OpenDocument<P>>,
    recovery_dir: Option<PathBuf>,
    status: Vec<StatusMessage>,
    failed_saves: u64,
}

impl<P: Persister<Document = Document>> Editor<P> {
    pub fn new(persister: P, mut settings: Settings) -> Self {
        settings.sanitize();
        Self {
            settings,
            settings_dirty: false,
            idle_persister: Some(persister),
            open: None,
            recovery_dir: None,
            status: Vec::new(),
            failed_saves: 0,
        }
    }

    /// Directory for recovery snapshots; `None` disables them.
    pub fn with_recovery_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.recovery_dir = dir;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Document Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Open `path`, replacing any open document.
    ///
    /// Unsaved edits in the replaced document are written to a recovery
    /// snapshot (when enabled) and then discarded. On error the current
    /// document stays open.
    pub fn open_document(&mut self, path: &Path, now: Instant) -> Result<()> {
        let (document, text) = load_with_text(path)?;
        self.open_loaded(document, text, now)
    }

    /// Open `path` and write its frontmatter with `field_order` first.
    pub fn open_document_with_schema(
        &mut self,
        path: &Path,
        field_order: Vec<String>,
        now: Instant,
    ) -> Result<()> {
        let (document, text) = load_with_text(path)?;
        self.open_loaded(document.with_schema_field_order(field_order), text, now)
    }

    fn open_loaded(&mut self, document: Document, disk_text: String, now: Instant) -> Result<()> {
        let path = document.path().to_path_buf();
        let watcher = self.start_watcher(&path);
        let config = self.settings.auto_save_config();

        let session = match self.open.take() {
            Some(previous) => {
                if previous.session.is_dirty() {
                    warn!(
                        "Discarding unsaved edits in {} to open {}",
                        previous.document.path().display(),
                        path.display()
                    );
                    self.write_recovery(
                        &previous.document,
                        &SaveError::new("unsaved edits discarded when another document was opened"),
                    );
                }
                let mut session = previous.session;
                session.reset(now);
                session.set_config(config);
                session
            }
            None => {
                let persister = self
                    .idle_persister
                    .take()
                    .ok_or_else(|| Error::Application("persister unavailable".to_string()))?;
                EditSession::open(persister, config, now)
            }
        };

        info!("Opened {}", path.display());
        self.push_status(
            StatusLevel::Info,
            format!("Opened {}", document.file_name()),
        );
        self.open = Some(OpenDocument {
            document,
            session,
            watcher,
            disk_text: Some(disk_text),
            pending_write: None,
        });
        self.settings.add_recent_file(path);
        self.settings_dirty = true;
        Ok(())
    }

    /// Close the open document without saving.
    ///
    /// Returns `false` if nothing was open.
    pub fn close_document(&mut self) -> bool {
        match self.open.take() {
            Some(open) => {
                debug!("Closing {}", open.document.path().display());
                self.idle_persister = Some(open.session.close());
                true
            }
            None => false,
        }
    }

    fn start_watcher(&self, path: &Path) -> Option<DocumentWatcher> {
        if !self.settings.watch_external_changes {
            return None;
        }
        match DocumentWatcher::new(path) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("External change detection unavailable: {}", e);
                None
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Editing
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply `change` to the open document and notify the session if it
    /// reports a modification.
    fn edit<F>(&mut self, now: Instant, change: F) -> Option<EditOutcome>
    where
        F: FnOnce(&mut Document) -> bool,
    {
        let open = self.open.as_mut()?;
        if !change(&mut open.document) {
            return None;
        }
        let outcome = open.session.on_edit(&open.document, now);
        let events = open.session.take_events();
        self.handle_save_events(events);
        Some(outcome)
    }

    /// Replace the document body. Returns `None` if nothing changed.
    pub fn set_content(&mut self, content: String, now: Instant) -> Option<EditOutcome> {
        self.edit(now, |doc| doc.set_content(content))
    }

    /// Append a line to the document body.
    pub fn append_line(&mut self, line: &str, now: Instant) -> Option<EditOutcome> {
        self.edit(now, |doc| {
            let mut content = doc.content().to_string();
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(line);
            doc.set_content(content)
        })
    }

    /// Set a frontmatter field. `raw` is read as a YAML scalar, falling back
    /// to a plain string.
    pub fn set_frontmatter_field(
        &mut self,
        key: &str,
        raw: &str,
        now: Instant,
    ) -> Option<EditOutcome> {
        let value = serde_yaml::from_str::<Value>(raw)
            .unwrap_or_else(|_| Value::String(raw.to_string()));
        self.edit(now, |doc| doc.set_field(key, value))
    }

    pub fn remove_frontmatter_field(&mut self, key: &str, now: Instant) -> Option<EditOutcome> {
        self.edit(now, |doc| doc.remove_field(key))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Saving
    // ─────────────────────────────────────────────────────────────────────────

    /// Save the open document now. Returns `false` if there was nothing to
    /// save or the request was folded into an in-flight save.
    pub fn save_now(&mut self, now: Instant) -> bool {
        let Some(open) = self.open.as_mut() else {
            return false;
        };
        let issued = open.session.save_now(&open.document, now);
        let events = open.session.take_events();
        self.handle_save_events(events);
        issued
    }

    /// Drive timers, collect save results and react to disk changes.
    ///
    /// Returns the save events handled during this call.
    pub fn poll(&mut self, now: Instant) -> Vec<SaveEvent> {
        let Some(open) = self.open.as_mut() else {
            return Vec::new();
        };
        let events = open.session.poll(&open.document, now);
        let watcher_events = open
            .watcher
            .as_ref()
            .map(DocumentWatcher::poll_events)
            .unwrap_or_default();

        self.handle_save_events(events.clone());
        self.handle_document_events(watcher_events, now);
        events
    }

    fn handle_document_events(&mut self, events: Vec<DocumentEvent>, now: Instant) {
        let mut modified = false;
        let mut removed = false;
        for event in events {
            match event {
                DocumentEvent::Modified(_) => modified = true,
                DocumentEvent::Removed(_) => removed = true,
                DocumentEvent::Error(e) => warn!("File watcher error: {}", e),
            }
        }
        // A rename away shows up as a modification of the old name
        if modified && self.check_external_change(now) == ExternalChange::Missing {
            removed = true;
        }
        if removed {
            self.report_removed();
        }
    }

    fn report_removed(&mut self) {
        if let Some(path) = self.document().map(|d| d.path().to_path_buf()) {
            warn!("{} was removed on disk", path.display());
        }
        self.push_status(
            StatusLevel::Warning,
            "File was removed on disk; the next save recreates it",
        );
    }

    fn handle_save_events(&mut self, events: Vec<SaveEvent>) {
        for event in events {
            match event {
                SaveEvent::Saved {
                    request,
                    covered_all_edits,
                    ..
                } => {
                    let Some(open) = self.open.as_mut() else {
                        continue;
                    };
                    let written = if covered_all_edits {
                        open.pending_write = None;
                        open.document.render().ok()
                    } else {
                        open.pending_write.take()
                    };
                    if written.is_some() {
                        open.disk_text = written;
                    }
                    if request.show_toast {
                        let text = format!("Saved {}", open.document.file_name());
                        self.push_status(StatusLevel::Success, text);
                    }
                }
                SaveEvent::Failed { request, error } => {
                    self.failed_saves += 1;
                    let Some(open) = self.open.as_mut() else {
                        continue;
                    };
                    open.pending_write = None;
                    let document = open.document.clone();
                    let recovery = self.write_recovery(&document, &error);
                    let text = match recovery {
                        Some(path) => format!(
                            "{} ({}); recovery copy at {}",
                            error,
                            request.trigger.label(),
                            path.display()
                        ),
                        None => format!("{} ({})", error, request.trigger.label()),
                    };
                    self.push_status(StatusLevel::Error, text);
                }
            }
        }

        if let Some(open) = self.open.as_mut() {
            open.capture_pending_write();
        }
    }

    fn write_recovery(&self, document: &Document, error: &SaveError) -> Option<PathBuf> {
        if !self.settings.recovery_enabled {
            return None;
        }
        let dir = self.recovery_dir.as_ref()?;
        match write_recovery_snapshot(dir, document, error, chrono::Local::now()) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Failed to write recovery snapshot: {}", e);
                None
            }
        }
    }

    /// Save any pending edits and wait for in-flight saves to finish.
    ///
    /// Returns `true` if the document ended clean. Gives up on the first
    /// failed save or when `timeout` elapses.
    pub fn flush(&mut self, timeout: Duration) -> bool {
        let started = Instant::now();
        let failures_before = self.failed_saves;

        loop {
            let now = Instant::now();
            self.poll(now);
            if self.failed_saves != failures_before {
                return false;
            }
            if !self.is_saving() {
                if !self.is_dirty() {
                    return true;
                }
                self.save_now(now);
                if self.failed_saves != failures_before {
                    return false;
                }
                if !self.is_dirty() {
                    return true;
                }
            }
            if now.duration_since(started) >= timeout {
                warn!("Timed out waiting for saves to finish");
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // External Changes
    // ─────────────────────────────────────────────────────────────────────────

    /// Compare the file on disk with the open document.
    ///
    /// A clean document is reloaded; a dirty one keeps its edits and the
    /// conflict is reported. Our own writes are recognised by their text.
    pub fn check_external_change(&mut self, now: Instant) -> ExternalChange {
        let Some(open) = self.open.as_mut() else {
            return ExternalChange::Unchanged;
        };
        let path = open.document.path().to_path_buf();

        let disk = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ExternalChange::Missing;
            }
            Err(e) => {
                warn!("Could not read {}: {}", path.display(), e);
                return ExternalChange::Unchanged;
            }
        };

        if open.document.render().ok().as_deref() == Some(disk.as_str()) {
            open.disk_text = Some(disk);
            return ExternalChange::Unchanged;
        }
        if open.is_own_write(&disk) {
            return ExternalChange::Unchanged;
        }

        if open.session.is_dirty() {
            warn!("{} changed on disk while it has unsaved edits", path.display());
            open.disk_text = Some(disk);
            let text = format!(
                "{} changed on disk; keeping your unsaved edits",
                open.document.file_name()
            );
            self.push_status(StatusLevel::Warning, text);
            return ExternalChange::Conflict;
        }

        let reloaded = match Document::from_markdown(path.clone(), &disk) {
            Ok(doc) => match open.document.schema_field_order() {
                Some(order) => doc.with_schema_field_order(order.to_vec()),
                None => doc,
            },
            Err(e) => {
                let message = e.to_string();
                self.push_status(
                    StatusLevel::Error,
                    format!("Could not reload {}: {}", path.display(), message),
                );
                return ExternalChange::Invalid(message);
            }
        };

        info!("Reloaded {} after external change", path.display());
        open.document = reloaded;
        open.disk_text = Some(disk);
        open.pending_write = None;
        open.session.reset(now);
        let text = format!("Reloaded {}", open.document.file_name());
        self.push_status(StatusLevel::Info, text);
        ExternalChange::Reloaded
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn document(&self) -> Option<&Document> {
        self.open.as_ref().map(|open| &open.document)
    }

    pub fn is_dirty(&self) -> bool {
        self.open
            .as_ref()
            .map(|open| open.session.is_dirty())
            .unwrap_or(false)
    }

    pub fn is_saving(&self) -> bool {
        self.open
            .as_ref()
            .map(|open| open.session.is_saving())
            .unwrap_or(false)
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.open.as_ref().map(|open| open.session.state())
    }

    /// Window/prompt title with a `*` for unsaved edits.
    pub fn title(&self) -> String {
        match &self.open {
            Some(open) if open.session.is_dirty() => format!("{}*", open.document.file_name()),
            Some(open) => open.document.file_name().to_string(),
            None => "draftguard".to_string(),
        }
    }

    /// How long the host may wait before the next [`Editor::poll`].
    ///
    /// `None` means nothing is scheduled and the host may block on input.
    pub fn next_wakeup(&self, now: Instant) -> Option<Duration> {
        let open = self.open.as_ref()?;
        let mut wait = open.session.time_until_next(now);
        if open.session.is_saving() {
            wait = Some(wait.map_or(SAVE_POLL_INTERVAL, |w| w.min(SAVE_POLL_INTERVAL)));
        }
        if open.watcher.is_some() {
            wait = Some(wait.map_or(WATCH_POLL_INTERVAL, |w| w.min(WATCH_POLL_INTERVAL)));
        }
        wait
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Settings Management
    // ─────────────────────────────────────────────────────────────────────────

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace settings and apply them to the open session.
    pub fn apply_settings(&mut self, mut settings: Settings) {
        settings.sanitize();
        let watch_changed = settings.watch_external_changes != self.settings.watch_external_changes;
        self.settings = settings;
        self.settings_dirty = true;

        let config = self.settings.auto_save_config();
        let watch = self.settings.watch_external_changes;
        if let Some(open) = self.open.as_mut() {
            open.session.set_config(config);
            if watch_changed {
                open.watcher = None;
            }
        }
        if watch_changed && watch {
            if let Some(path) = self.document().map(|d| d.path().to_path_buf()) {
                let watcher = self.start_watcher(&path);
                if let Some(open) = self.open.as_mut() {
                    open.watcher = watcher;
                }
            }
        }
        debug!("Settings applied: {:?}", config);
    }

    /// Save settings to the config file if modified.
    ///
    /// Returns `true` if settings were saved.
    pub fn save_settings_if_dirty(&mut self) -> bool {
        if self.settings_dirty {
            if save_config_silent(&self.settings) {
                self.settings_dirty = false;
                info!("Settings saved");
                return true;
            }
            warn!("Failed to save settings");
        }
        false
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────────

    fn push_status(&mut self, level: StatusLevel, text: impl Into<String>) {
        self.status.push(StatusMessage {
            level,
            text: text.into(),
        });
    }

    /// Drain status messages produced since the last call.
    pub fn take_status(&mut self) -> Vec<StatusMessage> {
        std::mem::take(&mut self.status)
    }

    /// Prepare for exit: flush edits, close the document and save settings.
    ///
    /// Returns `true` if every edit reached disk.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        let flushed = self.flush(timeout);
        self.close_document();
        self.save_settings_if_dirty();
        info!("Editor shutdown complete");
        flushed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
