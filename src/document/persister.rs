//! Persisters that write documents into a project directory.
//!
//! `FilePersister` writes on the calling thread. `BackgroundPersister`
//! renders on the calling thread and hands the bytes to a writer thread,
//! reporting results through [`Persister::poll_completed`].

use super::model::Document;
use super::paths::resolve_in_project;
use crate::autosave::{Persister, SaveCompletion, SaveDispatch, SaveRequest, SaveTicket};
use crate::error::{Error, Result, SaveError};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

/// Write `contents` to `path` through a temporary sibling and a rename.
///
/// Readers never observe a partially written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::InvalidPath(path.to_path_buf()))?;
    let temp_path = path.with_file_name(format!(".{}.draftguard-tmp", name.to_string_lossy()));

    fs::write(&temp_path, contents).map_err(|e| Error::FileWrite {
        path: temp_path.clone(),
        source: e,
    })?;

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}

fn write_validated(path: &Path, project_root: &Path, contents: &str) -> Result<PathBuf> {
    let target = resolve_in_project(path, project_root)?;
    write_atomic(&target, contents.as_bytes())?;
    Ok(target)
}

// ─────────────────────────────────────────────────────────────────────────────
// Synchronous Persister
// ─────────────────────────────────────────────────────────────────────────────

/// Writes documents synchronously, confined to a project root.
#[derive(Debug, Clone)]
pub struct FilePersister {
    project_root: PathBuf,
}

impl FilePersister {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}

impl Persister for FilePersister {
    type Document = Document;

    fn save(&mut self, document: &Document, request: SaveRequest) -> SaveDispatch {
        let result = document
            .render()
            .and_then(|text| write_validated(document.path(), &self.project_root, &text));

        match result {
            Ok(target) => {
                debug!(
                    "Wrote {} ({} #{})",
                    target.display(),
                    request.trigger.label(),
                    request.ticket.sequence
                );
                SaveDispatch::Completed(Ok(()))
            }
            Err(e) => SaveDispatch::Completed(Err(SaveError::from(e))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Background Persister
// ─────────────────────────────────────────────────────────────────────────────

struct WriteJob {
    ticket: SaveTicket,
    path: PathBuf,
    contents: String,
}

/// Writes documents on a dedicated thread.
///
/// Dropping the persister closes the job channel and joins the writer after
/// it finishes any queued writes.
pub struct BackgroundPersister {
    project_root: PathBuf,
    jobs: Option<Sender<WriteJob>>,
    results: Receiver<SaveCompletion>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundPersister {
    pub fn new(project_root: impl Into<PathBuf>) -> Result<Self> {
        let project_root = project_root.into();
        let (job_tx, job_rx) = channel::<WriteJob>();
        let (result_tx, result_rx) = channel();

        let root = project_root.clone();
        let worker = std::thread::Builder::new()
            .name("draftguard-writer".to_string())
            .spawn(move || {
                for job in job_rx {
                    let result = write_validated(&job.path, &root, &job.contents)
                        .map(|_| ())
                        .map_err(SaveError::from);
                    let completion = SaveCompletion {
                        ticket: job.ticket,
                        result,
                    };
                    if result_tx.send(completion).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            project_root,
            jobs: Some(job_tx),
            results: result_rx,
            worker: Some(worker),
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Block until at least one completion arrives or `timeout` elapses.
    pub fn wait_completed(&mut self, timeout: Duration) -> Vec<SaveCompletion> {
        let mut completions = Vec::new();
        match self.results.recv_timeout(timeout) {
            Ok(completion) => completions.push(completion),
            Err(RecvTimeoutError::Timeout) => return completions,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Background writer stopped unexpectedly");
                return completions;
            }
        }
        completions.extend(self.poll_completed());
        completions
    }
}

impl Persister for BackgroundPersister {
    type Document = Document;

    fn save(&mut self, document: &Document, request: SaveRequest) -> SaveDispatch {
        let contents = match document.render() {
            Ok(text) => text,
            Err(e) => return SaveDispatch::Completed(Err(SaveError::from(e))),
        };

        let job = WriteJob {
            ticket: request.ticket,
            path: document.path().to_path_buf(),
            contents,
        };

        match &self.jobs {
            Some(jobs) if jobs.send(job).is_ok() => {
                debug!(
                    "Queued {} #{} for {}",
                    request.trigger.label(),
                    request.ticket.sequence,
                    document.path().display()
                );
                SaveDispatch::Pending
            }
            _ => SaveDispatch::Completed(Err(SaveError::new("background writer is not running"))),
        }
    }

    fn poll_completed(&mut self) -> Vec<SaveCompletion> {
        let mut completions = Vec::new();
        while let Ok(completion) = self.results.try_recv() {
            completions.push(completion);
        }
        completions
    }
}

impl Drop for BackgroundPersister {
    fn drop(&mut self) {
        drop(self.jobs.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Background writer panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autosave::SaveTrigger;
    use tempfile::TempDir;

    fn request(sequence: u64) -> SaveRequest {
        SaveRequest {
            ticket: SaveTicket {
                session: 1,
                sequence,
                generation: sequence,
            },
            trigger: SaveTrigger::Debounce,
            show_toast: false,
        }
    }

    fn document(path: PathBuf) -> Document {
        Document::from_markdown(path, "---\ntitle: Post\n---\n\nBody\n").unwrap()
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.md");
        fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_file_persister_writes_rendered_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("post.md");
        let mut persister = FilePersister::new(dir.path());

        let dispatch = persister.save(&document(path.clone()), request(1));

        assert_eq!(dispatch, SaveDispatch::Completed(Ok(())));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "---\ntitle: Post\n---\n\nBody\n"
        );
    }

    #[test]
    fn test_file_persister_rejects_outside_project() {
        let outer = TempDir::new().unwrap();
        let project = outer.path().join("project");
        fs::create_dir(&project).unwrap();
        let mut persister = FilePersister::new(&project);

        let escaped = project.join("..").join("escape.md");
        let dispatch = persister.save(&document(escaped), request(1));

        match dispatch {
            SaveDispatch::Completed(Err(error)) => {
                assert!(error.message().contains("outside the project"))
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!outer.path().join("escape.md").exists());
    }

    #[test]
    fn test_background_persister_reports_completion() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("post.md");
        let mut persister = BackgroundPersister::new(dir.path()).unwrap();

        let dispatch = persister.save(&document(path.clone()), request(7));
        assert_eq!(dispatch, SaveDispatch::Pending);

        let completions = persister.wait_completed(Duration::from_secs(5));
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].ticket.sequence, 7);
        assert!(completions[0].result.is_ok());
        assert!(fs::read_to_string(&path).unwrap().contains("title: Post"));
    }

    #[test]
    fn test_background_persister_reports_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("post.md");
        let mut persister = BackgroundPersister::new(dir.path()).unwrap();

        assert_eq!(
            persister.save(&document(path), request(1)),
            SaveDispatch::Pending
        );
        let completions = persister.wait_completed(Duration::from_secs(5));
        assert!(completions[0].result.is_err());
    }
}
