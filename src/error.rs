//! Unified error handling for chatd.
//!
//! Mirrors the error kinds named in the spec's error handling design:
//! protocol violations, permission denials, not-found lookups, resource
//! exhaustion, I/O failures, and fatal startup errors. Recoverable kinds
//! carry a client-facing reply line; I/O and fatal kinds do not.

use thiserror::Error;

/// Errors raised while handling a single client command or chat line.
///
/// All variants except [`ChatError::Io`] are recoverable: the session
/// stays open and the caller sends [`ChatError::client_line`] back to the
/// sender.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("resource full: {0}")]
    ResourceFull(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// The single human-readable line sent back to the issuing session.
    ///
    /// Returns `None` for [`ChatError::Io`], which tears the session down
    /// instead of replying to it.
    pub fn client_line(&self) -> Option<String> {
        match self {
            ChatError::ProtocolViolation(msg)
            | ChatError::PermissionDenied(msg)
            | ChatError::NotFound(msg)
            | ChatError::ResourceFull(msg)
            | ChatError::InvalidFilename(msg) => Some(msg.clone()),
            ChatError::Io(_) => None,
        }
    }

    /// Short tag for log correlation, independent of the client-facing text.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::ProtocolViolation(_) => "protocol_violation",
            ChatError::PermissionDenied(_) => "permission_denied",
            ChatError::NotFound(_) => "not_found",
            ChatError::ResourceFull(_) => "resource_full",
            ChatError::InvalidFilename(_) => "invalid_filename",
            ChatError::Io(_) => "io_error",
        }
    }
}

/// Fatal startup errors: bind/listen failures that abort the process.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load config from {path}: {source}")]
    Config {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}
