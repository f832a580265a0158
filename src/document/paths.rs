//! Project path validation.
//!
//! Every write goes through [`resolve_in_project`] so a document path can
//! never escape the project directory via `..` or symlinks.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Canonicalize `file` and ensure it lies inside `project_root`.
///
/// The file itself may not exist yet; its parent directory must.
pub fn resolve_in_project(file: &Path, project_root: &Path) -> Result<PathBuf> {
    let canonical_file = match file.canonicalize() {
        Ok(path) => path,
        Err(_) => {
            let name = file
                .file_name()
                .ok_or_else(|| Error::InvalidPath(file.to_path_buf()))?;
            let parent = match file.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            parent
                .canonicalize()
                .map(|dir| dir.join(name))
                .map_err(|_| Error::InvalidPath(file.to_path_buf()))?
        }
    };

    let canonical_root = project_root
        .canonicalize()
        .map_err(|_| Error::InvalidPath(project_root.to_path_buf()))?;

    if !canonical_file.starts_with(&canonical_root) {
        return Err(Error::PathOutsideProject {
            path: canonical_file,
            root: canonical_root,
        });
    }

    Ok(canonical_file)
}

/// Path of `file` relative to `project_root`, for display.
pub fn relative_to_project(file: &Path, project_root: &Path) -> Option<PathBuf> {
    let file = file.canonicalize().ok()?;
    let root = project_root.canonicalize().ok()?;
    file.strip_prefix(root).ok().map(Path::to_path_buf)
}
