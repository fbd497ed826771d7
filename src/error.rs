//! Error types for chan-dl
//!
//! Thread-level failures are [`Error`] values returned from the orchestrator.
//! Per-file failures inside an attempt are not errors: they are carried as
//! [`FailureReason`] inside a [`TransferOutcome`](crate::types::TransferOutcome)
//! so that one broken file never aborts its siblings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for chan-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chan-dl
#[derive(Debug, Error)]
pub enum Error {
    /// The manifest endpoint answered 404: the thread was pruned or never existed
    #[error("thread {board}/{thread} not found")]
    ThreadNotFound {
        /// Board identifier (e.g. "g")
        board: String,
        /// Thread identifier
        thread: u64,
    },

    /// The manifest endpoint could not be reached or returned an unusable response
    #[error("manifest unavailable at {url}: {reason}")]
    ManifestUnavailable {
        /// The manifest URL that was requested
        url: String,
        /// What went wrong on the final attempt
        reason: String,
    },

    /// Every attempt of a batch left at least one file unfinished
    #[error("{failed} file(s) still failing after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        /// Total attempts made, including the first
        attempts: u32,
        /// Number of files that failed in the final attempt
        failed: usize,
        /// One representative failure from the final attempt
        last_error: FailureReason,
    },

    /// Directory creation, rename, or removal failed
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        /// The path being operated on
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A thread reference that does not look like a thread URL
    #[error("malformed thread reference: {0}")]
    MalformedInput(String),

    /// The invocation was interrupted before the batch finished
    #[error("cancelled")]
    Cancelled,

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "connections")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an I/O error with the path it happened on
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Build a configuration error for a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Why a single file transfer did not complete
///
/// None of these are retried by the worker itself; the orchestrator resubmits
/// the whole batch when its retry budget allows.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Connecting to or reading from the remote host failed
    #[error("connection failed: {0}")]
    Connection(String),

    /// The media server answered with a non-success status
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// Fewer bytes arrived than the server announced
    #[error("truncated transfer: got {received} of {expected} bytes")]
    Truncated {
        /// Bytes written to the temporary artifact
        received: u64,
        /// Content-Length announced by the server
        expected: u64,
    },

    /// The bytes on disk do not hash to the value in the manifest
    #[error("content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Hash from the manifest
        expected: String,
        /// Hash of the received bytes
        actual: String,
    },

    /// Writing, flushing, or renaming the file failed
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// The transfer was interrupted by cancellation
    #[error("cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for FailureReason {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FailureReason::HttpStatus(status.as_u16()),
            None => FailureReason::Connection(e.to_string()),
        }
    }
}

impl From<std::io::Error> for FailureReason {
    fn from(e: std::io::Error) -> Self {
        FailureReason::Filesystem(e.to_string())
    }
}
