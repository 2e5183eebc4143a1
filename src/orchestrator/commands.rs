//! Operator command queue (`state/inbox.md`).
//!
//! The inbox is drained once per loop pass: it is renamed aside before it is
//! read, so commands appended while a drain is in progress land in a fresh
//! inbox and are picked up on the next pass.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;

/// Inbox file name under the state directory.
pub const INBOX_FILE: &str = "inbox.md";

const DRAINING_SUFFIX: &str = ".draining";

/// A mid-flight operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Save the session and stop.
    Pause,
    /// Save a named snapshot; an empty label means "use a timestamp".
    Checkpoint(String),
    /// Restore state and mode from a named snapshot.
    Rollback(String),
}

impl Command {
    /// Parse one inbox line. Lines that are not commands yield `None`.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let rest = line.strip_prefix('/')?;
        let (verb, arg) = match rest.split_once(char::is_whitespace) {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (rest, ""),
        };
        match verb.to_ascii_lowercase().as_str() {
            "pause" => Some(Self::Pause),
            "checkpoint" => Some(Self::Checkpoint(arg.to_string())),
            "rollback" if !arg.is_empty() => Some(Self::Rollback(arg.to_string())),
            "rollback" => {
                warn!("/rollback needs a checkpoint label");
                None
            }
            other => {
                warn!("Ignoring unknown inbox command /{other}");
                None
            }
        }
    }

    /// The inbox line for this command.
    #[must_use]
    pub fn to_line(&self) -> String {
        match self {
            Self::Pause => "/pause".to_string(),
            Self::Checkpoint(label) if label.is_empty() => "/checkpoint".to_string(),
            Self::Checkpoint(label) => format!("/checkpoint {label}"),
            Self::Rollback(label) => format!("/rollback {label}"),
        }
    }
}

/// Inbox path for a state directory.
#[must_use]
pub fn inbox_path(state_dir: &Path) -> PathBuf {
    state_dir.join(INBOX_FILE)
}

/// Take every queued command, leaving the inbox empty.
pub fn drain_inbox(state_dir: &Path) -> Result<Vec<Command>> {
    let inbox = inbox_path(state_dir);
    let draining = state_dir.join(format!("{INBOX_FILE}{DRAINING_SUFFIX}"));

    match fs::rename(&inbox, &draining) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    let contents = fs::read_to_string(&draining)?;
    fs::remove_file(&draining)?;

    // Editors and UTF-8-with-signature writers prefix a byte order mark.
    let commands: Vec<Command> = contents
        .trim_start_matches('\u{feff}')
        .lines()
        .filter_map(Command::parse)
        .collect();
    debug!("Drained {} inbox command(s)", commands.len());
    Ok(commands)
}

/// Append a command to the inbox.
pub fn enqueue(state_dir: &Path, command: &Command) -> Result<()> {
    fs::create_dir_all(state_dir)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(inbox_path(state_dir))?;
    writeln!(file, "{}", command.to_line())?;
    Ok(())
}
