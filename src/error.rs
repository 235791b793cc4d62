//! Error types for the collector
//!
//! Every failure on the file path is classified where it happens: the
//! transfer clients decide whether a failure is worth another attempt, and
//! the collector/publisher turn that decision into a terminal outcome or a
//! retry.

use std::path::PathBuf;
use thiserror::Error;

/// Whether a failed operation may succeed if attempted again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network blip, timeout, dropped connection
    Transient,
    /// Bad credentials, missing file, permission denied, unsupported reply
    Terminal,
}

/// Failure reported by a file transfer client
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct TransferError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransferError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Terminal,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                TransferError::terminal(e.to_string())
            }
            _ => TransferError::transient(e.to_string()),
        }
    }
}

/// Outcome of a failed collection
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("unsupported scheme '{0}' in file location")]
    UnsupportedScheme(String),

    #[error("non-retryable failure collecting '{location}': {source}")]
    Terminal {
        location: String,
        #[source]
        source: TransferError,
    },

    #[error("collecting '{location}' failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        location: String,
        attempts: u32,
        last: TransferError,
    },
}

/// Outcome of a failed publish
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("invalid publish URL '{url}': {reason}")]
    Target { url: String, reason: String },

    #[error("cannot read staged file {path}: {source}")]
    Staged {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode publish metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("publishing '{file}' failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        file: String,
        attempts: u32,
        last: String,
    },
}

/// Failure of the HTTP layer beneath publishing and polling
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("too many redirects (limit {0})")]
    TooManyRedirects(usize),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed response body: {0}")]
    Body(String),
}

/// Failure loading the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A notification that could not be turned into file descriptors
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("event is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("change type '{0}' is not FileReady")]
    WrongChangeType(String),

    #[error("invalid file location '{location}': {reason}")]
    InvalidLocation { location: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_is_terminal() {
        let e: TransferError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(e.kind, FailureKind::Terminal);
        assert!(!e.is_retryable());
    }

    #[test]
    fn io_reset_is_transient() {
        let e: TransferError =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert!(e.is_retryable());
    }
}
