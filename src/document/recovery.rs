//! Recovery snapshots written when a save fails.
//!
//! A snapshot is a JSON record of the document state plus the rendered text
//! as a plain markdown file next to it, so edits survive even when the
//! target file cannot be written.

use super::model::Document;
use crate::error::{Error, Result, SaveError};
use chrono::{DateTime, Local};
use log::info;
use serde::Serialize;
use serde_yaml::Mapping;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct RecoverySnapshot<'a> {
    path: &'a Path,
    saved_at: String,
    frontmatter: &'a Mapping,
    imports: &'a str,
    content: &'a str,
    error: &'a str,
}

fn snapshot_stem(document: &Document, at: &DateTime<Local>) -> String {
    let stem = document
        .path()
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled");
    format!("{}-{}", at.format("%Y%m%d-%H%M%S"), stem)
}

/// Write `<timestamp>-<stem>.recovery.json` and `.recovery.md` into `dir`.
///
/// Returns the path of the JSON snapshot.
pub fn write_recovery_snapshot(
    dir: &Path,
    document: &Document,
    error: &SaveError,
    at: DateTime<Local>,
) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| Error::FileWrite {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let stem = snapshot_stem(document, &at);
    let json_path = dir.join(format!("{}.recovery.json", stem));
    let markdown_path = dir.join(format!("{}.recovery.md", stem));

    let snapshot = RecoverySnapshot {
        path: document.path(),
        saved_at: at.to_rfc3339(),
        frontmatter: document.frontmatter(),
        imports: document.imports(),
        content: document.content(),
        error: error.message(),
    };
    let json = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| Error::Application(format!("Failed to encode recovery snapshot: {}", e)))?;

    fs::write(&json_path, json).map_err(|e| Error::FileWrite {
        path: json_path.clone(),
        source: e,
    })?;

    // A document that cannot be rendered still has its body worth keeping
    let markdown = document
        .render()
        .unwrap_or_else(|_| document.content().to_string());
    fs::write(&markdown_path, markdown).map_err(|e| Error::FileWrite {
        path: markdown_path.clone(),
        source: e,
    })?;

    info!("Recovery snapshot written to {}", json_path.display());
    Ok(json_path)
}
