//! Markdown/MDX documents and the ways they reach disk.

mod frontmatter;
mod model;
mod paths;
mod persister;
mod recovery;
mod watcher;

pub use frontmatter::{parse_markdown, render_markdown, ParsedMarkdown};
pub use model::Document;
pub use paths::{relative_to_project, resolve_in_project};
pub use persister::{write_atomic, BackgroundPersister, FilePersister};
pub use recovery::write_recovery_snapshot;
pub use watcher::{classify, DocumentEvent, DocumentWatcher};
