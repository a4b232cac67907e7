//! Message logging.
//!
//! Every message that passes through a session, in either direction, can
//! be appended to a plain-text log:
//!
//! ```text
//! <log_dir>/<identity>/<destination>/<YYYY-MM-DD>[-ads].txt
//! ```
//!
//! Destinations are `#<title> - <id>` for channels and the partner's name
//! for private conversations, both lowercased. Which kinds get logged is
//! decided by a [`LogPolicy`]; where they go is up to the
//! [`MessageLogger`].

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chatbnc_protocol::{ClientCommand, ServerCommand};
use chrono::{DateTime, Local};

use crate::ChatState;

/// One line to be logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The managed character whose log this is.
    pub identity: String,
    /// Lowercased conversation name (see module docs).
    pub destination: String,
    pub timestamp: DateTime<Local>,
    /// Who spoke. `None` for rolls, whose text already names the roller.
    pub sender: Option<String>,
    pub text: String,
    /// Ads go to a separate daily file.
    pub is_ad: bool,
}

impl LogEntry {
    /// Renders the entry as a log line, including the trailing newline.
    ///
    /// ```text
    /// [21:04] Bob: hello
    /// [21:04] *Bob waves
    /// [21:04] Bob rolls 2d6: 7
    /// ```
    pub fn format_line(&self) -> String {
        let time = self.timestamp.format("%H:%M");
        match &self.sender {
            None => format!("[{time}] {}\n", self.text),
            Some(sender) => match self.text.strip_prefix("/me") {
                Some(rest) => format!("[{time}] *{sender}{rest}\n"),
                None => format!("[{time}] {sender}: {}\n", self.text),
            },
        }
    }

    /// File name for this entry's day.
    pub fn file_name(&self) -> String {
        let date = self.timestamp.format("%Y-%m-%d");
        if self.is_ad {
            format!("{date}-ads.txt")
        } else {
            format!("{date}.txt")
        }
    }
}

/// Sink for message log entries.
///
/// Implementations must not fail the caller: a broken log is reported,
/// never allowed to take the session down.
pub trait MessageLogger: Send + Sync + 'static {
    fn log(&self, entry: &LogEntry);
}

/// Logger that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl MessageLogger for NoopLogger {
    fn log(&self, _entry: &LogEntry) {}
}

// ---------------------------------------------------------------------------
// FileLogger
// ---------------------------------------------------------------------------

/// Appends entries to per-day text files under a root directory.
#[derive(Debug, Clone)]
pub struct FileLogger {
    root: PathBuf,
}

impl FileLogger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of the file `entry` belongs in.
    pub fn path_for(&self, entry: &LogEntry) -> PathBuf {
        self.root
            .join(path_segment(&entry.identity))
            .join(path_segment(&entry.destination))
            .join(entry.file_name())
    }

    fn append(&self, entry: &LogEntry) -> io::Result<()> {
        let path = self.path_for(entry);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(entry.format_line().as_bytes())
    }
}

impl MessageLogger for FileLogger {
    fn log(&self, entry: &LogEntry) {
        if let Err(e) = self.append(entry) {
            tracing::warn!(
                identity = %entry.identity,
                destination = %entry.destination,
                error = %e,
                "failed to write message log"
            );
        }
    }
}

/// Names come from the chat service; keep them from escaping the tree.
fn path_segment(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_owned(),
        _ => cleaned,
    }
}

// ---------------------------------------------------------------------------
// LogPolicy
// ---------------------------------------------------------------------------

/// Which message kinds get logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPolicy {
    /// Channel messages and channel rolls.
    pub channels: bool,
    /// Channel ads.
    pub ads: bool,
    /// Private messages and private rolls.
    pub private: bool,
}

impl Default for LogPolicy {
    fn default() -> Self {
        Self {
            channels: true,
            ads: false,
            private: true,
        }
    }
}

impl LogPolicy {
    /// Logs nothing.
    pub fn none() -> Self {
        Self {
            channels: false,
            ads: false,
            private: false,
        }
    }

    /// The entry for a message received from the chat service, if this
    /// policy logs it.
    pub fn upstream_entry(
        &self,
        cmd: &ServerCommand,
        state: &ChatState,
        now: DateTime<Local>,
    ) -> Option<LogEntry> {
        let entry = |destination: String, sender: Option<&str>, text: &str, is_ad| LogEntry {
            identity: state.identity().to_owned(),
            destination,
            timestamp: now,
            sender: sender.map(str::to_owned),
            text: text.to_owned(),
            is_ad,
        };

        match cmd {
            ServerCommand::Msg {
                character,
                message,
                channel,
            } if self.channels => Some(entry(
                channel_destination(state, channel),
                Some(character.as_str()),
                message.as_str(),
                false,
            )),
            ServerCommand::Lrp {
                character,
                message,
                channel,
            } if self.ads => Some(entry(
                channel_destination(state, channel),
                Some(character.as_str()),
                message.as_str(),
                true,
            )),
            ServerCommand::Pri { character, message } if self.private => Some(entry(
                character.to_lowercase(),
                Some(character.as_str()),
                message.as_str(),
                false,
            )),
            ServerCommand::Rll {
                character,
                message,
                channel,
                recipient,
            } => match (channel, recipient) {
                (Some(channel), _) if self.channels => Some(entry(
                    channel_destination(state, channel),
                    None,
                    message.as_str(),
                    false,
                )),
                (None, Some(recipient)) if self.private => {
                    let partner = if recipient == state.identity() {
                        character
                    } else {
                        recipient
                    };
                    Some(entry(partner.to_lowercase(), None, message.as_str(), false))
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// The entry for a message one of our clients sent, if this policy
    /// logs it.
    pub fn client_entry(
        &self,
        cmd: &ClientCommand,
        state: &ChatState,
        now: DateTime<Local>,
    ) -> Option<LogEntry> {
        let (destination, message, is_ad) = match cmd {
            ClientCommand::Msg { channel, message } if self.channels => {
                (channel_destination(state, channel), message, false)
            }
            ClientCommand::Lrp { channel, message } if self.ads => {
                (channel_destination(state, channel), message, true)
            }
            ClientCommand::Pri { recipient, message } if self.private => {
                (recipient.to_lowercase(), message, false)
            }
            _ => return None,
        };
        Some(LogEntry {
            identity: state.identity().to_owned(),
            destination,
            timestamp: now,
            sender: Some(state.identity().to_owned()),
            text: message.clone(),
            is_ad,
        })
    }
}

fn channel_destination(state: &ChatState, channel: &str) -> String {
    format!("#{} - {}", state.channel_title(channel), channel).to_lowercase()
}
