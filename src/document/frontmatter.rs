//! Markdown/MDX frontmatter parsing and serialization.
//!
//! A content file is an optional YAML frontmatter block fenced by `---`
//! lines, optional MDX `import`/`export` statements, then the markdown body.

use crate::error::{Error, Result};
use serde_yaml::{Mapping, Value};

const FENCE: &str = "---";

/// The three parts of a content file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMarkdown {
    pub frontmatter: Mapping,
    /// Frontmatter text exactly as it appeared between the fences
    pub raw_frontmatter: String,
    pub imports: String,
    pub content: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Split a content file into frontmatter, imports and body.
///
/// # Errors
///
/// Returns `Error::Frontmatter` if the opening fence is never closed or the
/// block is not a YAML mapping.
pub fn parse_markdown(text: &str) -> Result<ParsedMarkdown> {
    let lines: Vec<&str> = text.lines().collect();

    if lines.first() != Some(&FENCE) {
        let (imports, content) = split_imports(&lines);
        return Ok(ParsedMarkdown {
            imports,
            content,
            ..ParsedMarkdown::default()
        });
    }

    let end = lines
        .iter()
        .skip(1)
        .position(|line| *line == FENCE)
        .map(|offset| offset + 1)
        .ok_or_else(|| Error::Frontmatter("frontmatter not closed with '---'".to_string()))?;

    let raw_frontmatter = lines[1..end].join("\n");
    let frontmatter = if raw_frontmatter.trim().is_empty() {
        Mapping::new()
    } else {
        match serde_yaml::from_str::<Value>(&raw_frontmatter)? {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            _ => {
                return Err(Error::Frontmatter(
                    "frontmatter must be a key/value mapping".to_string(),
                ))
            }
        }
    };

    let (imports, content) = split_imports(&lines[end + 1..]);

    Ok(ParsedMarkdown {
        frontmatter,
        raw_frontmatter,
        imports,
        content,
    })
}

fn is_import_start(line: &str) -> bool {
    line.starts_with("import ") || line.starts_with("export ")
}

fn skip_blank(lines: &[&str], mut idx: usize) -> usize {
    while idx < lines.len() && lines[idx].trim().is_empty() {
        idx += 1;
    }
    idx
}

/// Separate leading MDX statements from the markdown body.
///
/// A statement that does not end in `;` continues on following lines until
/// one does, or until a blank line.
fn split_imports(lines: &[&str]) -> (String, String) {
    let mut imports = Vec::new();
    let mut idx = skip_blank(lines, 0);

    while idx < lines.len() {
        let line = lines[idx].trim();

        if is_import_start(line) {
            imports.push(lines[idx]);
            idx += 1;
            if line.ends_with(';') {
                continue;
            }
            while idx < lines.len() {
                let continuation = lines[idx].trim();
                if continuation.is_empty() {
                    break;
                }
                imports.push(lines[idx]);
                idx += 1;
                if continuation.ends_with(';') {
                    break;
                }
            }
        } else if line.is_empty() {
            let next = skip_blank(lines, idx);
            if next < lines.len() && is_import_start(lines[next].trim()) {
                idx = next;
            } else {
                break;
            }
        } else {
            break;
        }
    }

    let body_start = skip_blank(lines, idx);
    (imports.join("\n"), lines[body_start..].join("\n"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Serialization
// ─────────────────────────────────────────────────────────────────────────────

/// Reassemble a content file.
///
/// Frontmatter keys listed in `field_order` come first in that order, the
/// remaining keys follow alphabetically. ISO datetimes are reduced to dates.
/// The output ends with exactly one newline, or is empty.
pub fn render_markdown(
    frontmatter: &Mapping,
    imports: &str,
    content: &str,
    field_order: Option<&[String]>,
) -> Result<String> {
    let mut out = String::new();
    let has_frontmatter = !frontmatter.is_empty();
    let has_imports = !imports.trim().is_empty();

    if has_frontmatter {
        let mut ordered = order_fields(frontmatter, field_order);
        normalize_dates(&mut ordered);
        out.push_str(FENCE);
        out.push('\n');
        out.push_str(&serde_yaml::to_string(&ordered)?);
        out.push_str(FENCE);
        out.push('\n');
    }

    if has_imports {
        if has_frontmatter {
            out.push('\n');
        }
        out.push_str(imports);
        if !imports.ends_with('\n') {
            out.push('\n');
        }
    }

    if !content.is_empty() {
        if has_frontmatter || has_imports {
            out.push('\n');
        }
        out.push_str(content);
    }

    if !out.is_empty() {
        let trimmed = out.trim_end_matches('\n').len();
        out.truncate(trimmed);
        out.push('\n');
    }

    Ok(out)
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Schema fields first, in schema order, then the rest alphabetically.
fn order_fields(frontmatter: &Mapping, field_order: Option<&[String]>) -> Mapping {
    let mut ordered = Mapping::new();

    for name in field_order.unwrap_or_default() {
        let key = Value::String(name.clone());
        if let Some(value) = frontmatter.get(&key) {
            ordered.insert(key, value.clone());
        }
    }

    let mut remaining: Vec<(&Value, &Value)> = frontmatter
        .iter()
        .filter(|(key, _)| !ordered.contains_key(*key))
        .collect();
    remaining.sort_by_cached_key(|(key, _)| key_label(key));

    for (key, value) in remaining {
        ordered.insert(key.clone(), value.clone());
    }
    ordered
}

fn normalize_dates(mapping: &mut Mapping) {
    for (_, value) in mapping.iter_mut() {
        normalize_value(value);
    }
}

/// `2024-01-15T00:00:00Z` becomes `2024-01-15`.
fn normalize_value(value: &mut Value) {
    match value {
        Value::String(s) => {
            if let Some(date) = date_part(s) {
                *s = date;
            }
        }
        Value::Mapping(mapping) => normalize_dates(mapping),
        Value::Sequence(items) => items.iter_mut().for_each(normalize_value),
        Value::Tagged(tagged) => normalize_value(&mut tagged.value),
        _ => {}
    }
}

fn date_part(s: &str) -> Option<String> {
    if s.len() <= 10 || !s.contains('T') || !(s.ends_with('Z') || s.contains('+')) {
        return None;
    }
    let date = s.split('T').next()?;
    (date.len() == 10 && date.matches('-').count() == 2).then(|| date.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
