//! Configuration loading.
//!
//! All fields have defaults that reproduce the server's fixed constants
//! (port 31473, `users.json`, `save_channels.txt`, `uploads/`, a 2000-byte
//! message ceiling), so running with no config file at all matches the
//! spec exactly. An optional TOML file, resolved the same way as `-c` /
//! `--config <path>` on the command line, can override any of them.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

fn default_listen() -> SocketAddr {
    "0.0.0.0:31473".parse().unwrap()
}

fn default_accounts_path() -> PathBuf {
    PathBuf::from("users.json")
}

fn default_channels_path() -> PathBuf {
    PathBuf::from("save_channels.txt")
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}

const fn default_max_message_bytes() -> usize {
    2000
}

const fn default_listen_backlog() -> u32 {
    5
}

const fn default_shutdown_poll_secs() -> u64 {
    1
}

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the listener binds to.
    pub listen: SocketAddr,
    /// Path to the account store (JSON, with legacy line-format fallback).
    pub accounts_path: PathBuf,
    /// Path to the channel definitions store (`<name> <capacity>` lines).
    pub channels_path: PathBuf,
    /// Directory uploaded files are written into.
    pub uploads_dir: PathBuf,
    /// Maximum bytes accepted per inbound line; longer reads are truncated.
    pub max_message_bytes: usize,
    /// How often the listener checks the shutdown flag between accepts.
    pub shutdown_poll_secs: u64,
    /// TCP listen backlog.
    pub listen_backlog: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            accounts_path: default_accounts_path(),
            channels_path: default_channels_path(),
            uploads_dir: default_uploads_dir(),
            max_message_bytes: default_max_message_bytes(),
            shutdown_poll_secs: default_shutdown_poll_secs(),
            listen_backlog: default_listen_backlog(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any field the file omits.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Resolve the configuration path from CLI arguments: `-c <path>`,
    /// `--config <path>`, or a bare path. Returns `None` when no argument
    /// is given, meaning "run with built-in defaults".
    pub fn resolve_path_from_args<I: Iterator<Item = String>>(mut args: I) -> Option<String> {
        match args.next() {
            Some(flag) if flag == "-c" || flag == "--config" => args.next(),
            Some(path) => Some(path),
            None => None,
        }
    }
}
