//! Command Dispatcher — parses one inbound line into a [`Command`] and
//! executes it against the shared state.
//!
//! Grounded on `original_source/command.c`'s `executeCommand` for the
//! command set and the actor/announcement split, reworded into the
//! crate's own catalog text per `SPEC_FULL.md` §4.4.

mod dispatch;

pub use dispatch::{execute, Action};

/// One parsed inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Command,
    Help,
    Credits,
    Ping,
    Msg { user: String, text: String },
    Connect { user: String, password: String },
    Create { name: String, capacity: Option<i64> },
    Join { name: String },
    Leave,
    Upload { filename: String },
    Download { filename: String },
    Shutdown,
    /// A line with no leading `@`: broadcast to the sender's channel.
    Chat(String),
}

/// Parse a single trimmed inbound line. Never fails: unrecognised `@words`
/// become [`Command::Chat`] verbatim (the whole line, `@` included), so a
/// typo'd command is broadcast as ordinary chat rather than rejected.
pub fn parse(line: &str) -> Command {
    let Some(rest) = line.strip_prefix('@') else {
        return Command::Chat(line.to_string());
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let keyword = parts.next().unwrap_or("").to_ascii_lowercase();
    let args = parts.next().unwrap_or("").trim();

    match keyword.as_str() {
        "command" => Command::Command,
        "help" => Command::Help,
        "credits" => Command::Credits,
        "ping" => Command::Ping,
        "leave" => Command::Leave,
        "shutdown" => Command::Shutdown,
        "msg" => {
            let mut it = args.splitn(2, char::is_whitespace);
            let user = it.next().unwrap_or("").to_string();
            let text = it.next().unwrap_or("").trim().to_string();
            Command::Msg { user, text }
        }
        "connect" => {
            let mut it = args.split_whitespace();
            let user = it.next().unwrap_or("").to_string();
            let password = it.next().unwrap_or("").to_string();
            Command::Connect { user, password }
        }
        "create" => {
            let mut it = args.split_whitespace();
            let name = it.next().unwrap_or("").to_string();
            let capacity = it.next().and_then(|s| s.parse::<i64>().ok());
            Command::Create { name, capacity }
        }
        "join" => Command::Join {
            name: args.split_whitespace().next().unwrap_or("").to_string(),
        },
        "upload" => Command::Upload {
            filename: args.split_whitespace().next().unwrap_or("").to_string(),
        },
        "download" => Command::Download {
            filename: args.split_whitespace().next().unwrap_or("").to_string(),
        },
        _ => Command::Chat(line.to_string()),
    }
}
