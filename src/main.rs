//! draftguard - Main Entry Point
//!
//! Line-oriented driver for the auto-save editor core. Each stdin line is an
//! edit or a command; saves happen in the background of the loop exactly as
//! they would in a graphical host.

use clap::Parser;
use draftguard::autosave::Persister;
use draftguard::config::{get_recovery_dir, load_config};
use draftguard::document::{relative_to_project, BackgroundPersister, Document, FilePersister};
use draftguard::error::{Error, Result};
use draftguard::state::{Editor, StatusLevel};
use log::{error, info};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Application name constant.
const APP_NAME: &str = "draftguard";

/// How long to wait for outstanding saves on exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "draftguard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Markdown or MDX file to edit
    file: PathBuf,

    /// Directory writes are confined to (defaults to the file's directory)
    #[arg(long)]
    project_root: Option<PathBuf>,

    /// Seconds of inactivity before an auto-save
    #[arg(long)]
    delay: Option<f64>,

    /// Longest time edits may stay unsaved while typing continues
    #[arg(long)]
    max_unsaved: Option<f64>,

    /// Frontmatter fields written first, in this order (comma separated)
    #[arg(long, value_delimiter = ',')]
    schema_fields: Vec<String>,

    /// Write files on a background thread
    #[arg(long)]
    background: bool,
}

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Append(String),
    SetField { key: String, value: String },
    RemoveField(String),
    Save,
    Status,
    Quit,
}

impl Command {
    fn parse(line: &str) -> std::result::Result<Self, String> {
        let Some(rest) = line.strip_prefix(':') else {
            return Ok(Command::Append(line.to_string()));
        };
        // "::text" appends a line starting with ':'
        if rest.starts_with(':') {
            return Ok(Command::Append(rest.to_string()));
        }

        let (name, args) = match rest.split_once(' ') {
            Some((name, args)) => (name, args.trim()),
            None => (rest.trim(), ""),
        };
        match name {
            "save" | "w" => Ok(Command::Save),
            "quit" | "q" => Ok(Command::Quit),
            "status" => Ok(Command::Status),
            "fm" => {
                let (key, value) = args
                    .split_once('=')
                    .ok_or_else(|| "usage: :fm key=value".to_string())?;
                let key = key.trim();
                if key.is_empty() {
                    return Err("frontmatter key cannot be empty".to_string());
                }
                Ok(Command::SetField {
                    key: key.to_string(),
                    value: value.trim().to_string(),
                })
            }
            "rm" if !args.is_empty() => Ok(Command::RemoveField(args.to_string())),
            "rm" => Err("usage: :rm key".to_string()),
            other => Err(format!("unknown command ':{}'", other)),
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!("Starting {}", APP_NAME);

    let mut settings = load_config();
    if let Some(delay) = cli.delay {
        settings.auto_save_delay_secs = delay;
    }
    if let Some(max_unsaved) = cli.max_unsaved {
        settings.max_unsaved_secs = max_unsaved;
    }

    let project_root = match &cli.project_root {
        Some(root) => root.clone(),
        None => match cli.file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        },
    };
    let recovery_dir = get_recovery_dir().ok();

    if cli.background {
        let persister = BackgroundPersister::new(&project_root)?;
        let editor = Editor::new(persister, settings).with_recovery_dir(recovery_dir);
        run(editor, &cli, &project_root)
    } else {
        let persister = FilePersister::new(&project_root);
        let editor = Editor::new(persister, settings).with_recovery_dir(recovery_dir);
        run(editor, &cli, &project_root)
    }
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("draftguard-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

fn run<P>(mut editor: Editor<P>, cli: &Cli, project_root: &Path) -> Result<()>
where
    P: Persister<Document = Document>,
{
    let file = cli.file.as_path();
    if cli.schema_fields.is_empty() {
        editor.open_document(file, Instant::now())?;
    } else {
        editor.open_document_with_schema(file, cli.schema_fields.clone(), Instant::now())?;
    }
    let display = relative_to_project(file, project_root).unwrap_or_else(|| file.to_path_buf());
    println!(
        "Editing {} (auto-save {}). Type lines to append; :fm key=value, :rm key, :save, :status, :quit.",
        display.display(),
        if editor.settings().auto_save { "on" } else { "off" }
    );

    let input = spawn_stdin_reader()?;

    loop {
        let now = Instant::now();
        let received = match editor.next_wakeup(now) {
            Some(wait) => input.recv_timeout(wait),
            None => input.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        let now = Instant::now();
        match received {
            Ok(line) => match Command::parse(&line) {
                Ok(Command::Append(text)) => {
                    editor.append_line(&text, now);
                }
                Ok(Command::SetField { key, value }) => {
                    editor.set_frontmatter_field(&key, &value, now);
                }
                Ok(Command::RemoveField(key)) => {
                    if editor.remove_frontmatter_field(&key, now).is_none() {
                        eprintln!("no frontmatter field '{}'", key);
                    }
                }
                Ok(Command::Save) => {
                    if !editor.save_now(now) && !editor.is_saving() {
                        println!("Nothing to save");
                    }
                }
                Ok(Command::Status) => {
                    println!("{} {:?}", editor.title(), editor.session_state());
                }
                Ok(Command::Quit) => break,
                Err(message) => eprintln!("{}", message),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        editor.poll(now);
        print_status(&mut editor);
    }

    let flushed = editor.shutdown(SHUTDOWN_TIMEOUT);
    print_status(&mut editor);
    if !flushed {
        error!("Exited with unsaved edits");
        return Err(Error::Application(
            "some edits could not be saved".to_string(),
        ));
    }
    info!("{} exited cleanly", APP_NAME);
    Ok(())
}

fn print_status<P>(editor: &mut Editor<P>)
where
    P: Persister<Document = Document>,
{
    for message in editor.take_status() {
        match message.level {
            StatusLevel::Info | StatusLevel::Success => println!("{}", message.text),
            StatusLevel::Warning => eprintln!("warning: {}", message.text),
            StatusLevel::Error => eprintln!("error: {}", message.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_line_appends() {
        assert_eq!(
            Command::parse("Hello world"),
            Ok(Command::Append("Hello world".to_string()))
        );
        assert_eq!(Command::parse(""), Ok(Command::Append(String::new())));
    }

    #[test]
    fn test_parse_escaped_colon() {
        assert_eq!(
            Command::parse("::not a command"),
            Ok(Command::Append(":not a command".to_string()))
        );
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(":save"), Ok(Command::Save));
        assert_eq!(Command::parse(":w"), Ok(Command::Save));
        assert_eq!(Command::parse(":quit"), Ok(Command::Quit));
        assert_eq!(Command::parse(":status"), Ok(Command::Status));
        assert_eq!(
            Command::parse(":rm draft"),
            Ok(Command::RemoveField("draft".to_string()))
        );
    }

    #[test]
    fn test_parse_frontmatter_field() {
        assert_eq!(
            Command::parse(":fm title = My Post"),
            Ok(Command::SetField {
                key: "title".to_string(),
                value: "My Post".to_string()
            })
        );
        assert!(Command::parse(":fm title").is_err());
        assert!(Command::parse(":fm =x").is_err());
    }

    #[test]
    fn test_parse_unknown_command() {
        assert!(Command::parse(":bogus").is_err());
        assert!(Command::parse(":rm").is_err());
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::parse_from([
            "draftguard",
            "post.md",
            "--delay",
            "3",
            "--max-unsaved",
            "20",
            "--background",
        ]);
        assert_eq!(cli.file, PathBuf::from("post.md"));
        assert_eq!(cli.delay, Some(3.0));
        assert_eq!(cli.max_unsaved, Some(20.0));
        assert!(cli.background);
        assert!(cli.project_root.is_none());
        assert!(cli.schema_fields.is_empty());
    }

    #[test]
    fn test_cli_parses_schema_fields() {
        let cli = Cli::parse_from(["draftguard", "post.md", "--schema-fields", "title,pubDate"]);
        assert_eq!(cli.schema_fields, vec!["title", "pubDate"]);
    }
}
