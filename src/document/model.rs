//! In-memory state of an open content file.

use super::frontmatter::{parse_markdown, render_markdown};
use crate::error::{Error, Result};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// An open markdown/MDX document.
///
/// Holds the parsed parts separately so frontmatter edits never have to
/// round-trip through the body text.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    path: PathBuf,
    frontmatter: Mapping,
    imports: String,
    content: String,
    /// Collection schema field order used when writing frontmatter
    schema_field_order: Option<Vec<String>>,
}

impl Document {
    /// Read and parse a document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_markdown(path.to_path_buf(), &text)
    }

    pub fn from_markdown(path: PathBuf, text: &str) -> Result<Self> {
        let parsed = parse_markdown(text)?;
        Ok(Self {
            path,
            frontmatter: parsed.frontmatter,
            imports: parsed.imports,
            content: parsed.content,
            schema_field_order: None,
        })
    }

    pub fn with_schema_field_order(mut self, order: Vec<String>) -> Self {
        self.schema_field_order = Some(order);
        self
    }

    /// Serialize back to file text.
    pub fn render(&self) -> Result<String> {
        render_markdown(
            &self.frontmatter,
            &self.imports,
            &self.content,
            self.schema_field_order.as_deref(),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name for titles and recovery snapshots.
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("untitled")
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn imports(&self) -> &str {
        &self.imports
    }

    pub fn frontmatter(&self) -> &Mapping {
        &self.frontmatter
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.frontmatter.get(key)
    }

    pub fn schema_field_order(&self) -> Option<&[String]> {
        self.schema_field_order.as_deref()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────
    //
    // Each setter reports whether anything changed so callers only mark the
    // document dirty for real edits.

    pub fn set_content(&mut self, content: String) -> bool {
        if content == self.content {
            return false;
        }
        self.content = content;
        true
    }

    pub fn set_imports(&mut self, imports: String) -> bool {
        if imports == self.imports {
            return false;
        }
        self.imports = imports;
        true
    }

    pub fn set_field(&mut self, key: &str, value: Value) -> bool {
        if self.frontmatter.get(key) == Some(&value) {
            return false;
        }
        self.frontmatter.insert(Value::String(key.to_string()), value);
        true
    }

    pub fn remove_field(&mut self, key: &str) -> bool {
        self.frontmatter.remove(key).is_some()
    }
}
