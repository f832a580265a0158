//! User settings and preferences for draftguard
//!
//! This module defines the `Settings` struct that holds all user-configurable
//! options, with serde support for JSON persistence.

use crate::autosave::AutoSaveConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Main Settings Struct
// ─────────────────────────────────────────────────────────────────────────────

/// User preferences persisted between sessions.
///
/// Missing fields fall back to their defaults when deserializing so older
/// config files keep loading after new options are added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // ─────────────────────────────────────────────────────────────────────────
    // Auto-Save
    // ─────────────────────────────────────────────────────────────────────────
    /// Whether edits are saved automatically
    pub auto_save: bool,

    /// Quiet period after the last edit before an auto-save fires, in seconds
    pub auto_save_delay_secs: f64,

    /// Longest time edits may stay unsaved under continuous typing, in seconds
    pub max_unsaved_secs: f64,

    // ─────────────────────────────────────────────────────────────────────────
    // Safety
    // ─────────────────────────────────────────────────────────────────────────
    /// Write a recovery snapshot when a save fails
    pub recovery_enabled: bool,

    /// Reload or flag the open document when it changes on disk
    pub watch_external_changes: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // Session & History
    // ─────────────────────────────────────────────────────────────────────────
    /// Recently opened files (most recent first)
    pub recent_files: Vec<PathBuf>,

    /// Maximum number of recent files to remember
    pub max_recent_files: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Auto-Save
            auto_save: true,
            auto_save_delay_secs: Self::DEFAULT_AUTO_SAVE_DELAY_SECS,
            max_unsaved_secs: Self::DEFAULT_MAX_UNSAVED_SECS,

            // Safety
            recovery_enabled: true,
            watch_external_changes: true,

            // Session & History
            recent_files: Vec::new(),
            max_recent_files: 10,
        }
    }
}

impl Settings {
    /// Add a file to the recent files list.
    ///
    /// If the file already exists in the list, it's moved to the front.
    /// The list is trimmed to `max_recent_files`.
    pub fn add_recent_file(&mut self, path: PathBuf) {
        self.recent_files.retain(|p| p != &path);
        self.recent_files.insert(0, path);
        self.recent_files.truncate(self.max_recent_files);
    }

    /// Build the explicit configuration handed to an edit session.
    pub fn auto_save_config(&self) -> AutoSaveConfig {
        AutoSaveConfig {
            enabled: self.auto_save,
            debounce_delay: secs_to_duration(
                self.auto_save_delay_secs,
                Self::DEFAULT_AUTO_SAVE_DELAY_SECS,
            ),
            max_delay: secs_to_duration(self.max_unsaved_secs, Self::DEFAULT_MAX_UNSAVED_SECS),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Validation Constants and Sanitization
    // ─────────────────────────────────────────────────────────────────────────

    /// Default debounce delay.
    pub const DEFAULT_AUTO_SAVE_DELAY_SECS: f64 = 2.0;
    /// Default force-save ceiling.
    pub const DEFAULT_MAX_UNSAVED_SECS: f64 = 10.0;
    /// Minimum allowed debounce delay.
    pub const MIN_AUTO_SAVE_DELAY_SECS: f64 = 0.5;
    /// Maximum allowed debounce delay.
    pub const MAX_AUTO_SAVE_DELAY_SECS: f64 = 300.0;
    /// Maximum allowed force-save ceiling.
    pub const MAX_MAX_UNSAVED_SECS: f64 = 3600.0;

    /// Sanitize settings by clamping values to valid ranges.
    ///
    /// This is useful after loading settings from a file that might have
    /// been manually edited with invalid values.
    pub fn sanitize(&mut self) {
        if !self.auto_save_delay_secs.is_finite() {
            self.auto_save_delay_secs = Self::DEFAULT_AUTO_SAVE_DELAY_SECS;
        }
        self.auto_save_delay_secs = self
            .auto_save_delay_secs
            .clamp(Self::MIN_AUTO_SAVE_DELAY_SECS, Self::MAX_AUTO_SAVE_DELAY_SECS);

        // The force-save ceiling must never undercut the debounce
        if !self.max_unsaved_secs.is_finite() {
            self.max_unsaved_secs = Self::DEFAULT_MAX_UNSAVED_SECS;
        }
        self.max_unsaved_secs = self
            .max_unsaved_secs
            .clamp(self.auto_save_delay_secs, Self::MAX_MAX_UNSAVED_SECS);

        if self.max_recent_files == 0 {
            self.max_recent_files = 10;
        } else if self.max_recent_files > 100 {
            self.max_recent_files = 100;
        }
        self.recent_files.truncate(self.max_recent_files);
    }

    /// Load settings and sanitize them to ensure validity.
    pub fn from_json_sanitized(json: &str) -> Result<Self, serde_json::Error> {
        let mut settings: Self = serde_json::from_str(json)?;
        settings.sanitize();
        Ok(settings)
    }
}

fn secs_to_duration(secs: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
