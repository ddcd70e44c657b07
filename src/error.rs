//! Error types for pypi-sync
//!
//! Two layers of errors live here:
//! - [`Error`] is returned by operations that can stop a run from starting or
//!   that fail outright (opening the catalog, invalid configuration).
//! - [`FailureKind`] classifies a single package or artifact that could not be
//!   synchronized. These are collected into the [`SyncReport`](crate::SyncReport)
//!   rather than propagated, so one bad artifact never aborts the run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pypi-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pypi-sync
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "feed")
        key: Option<String>,
    },

    /// Catalog database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// HTTP transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Manifest could not be parsed
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Content store error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was cancelled before it could complete
    #[error("sync cancelled")]
    Cancelled,
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Errors raised while fetching a single URL
#[derive(Debug, Error)]
pub enum TransportError {
    /// Server answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    Status {
        /// The URL that was requested
        url: String,
        /// HTTP status code returned by the server
        status: u16,
    },

    /// Request timed out
    #[error("timed out fetching {url}")]
    Timeout {
        /// The URL that was requested
        url: String,
    },

    /// Could not connect to the server
    #[error("connection failed for {url}: {reason}")]
    Connect {
        /// The URL that was requested
        url: String,
        /// Underlying connection error
        reason: String,
    },

    /// Any other request or body error reported by the HTTP client
    #[error("request to {url} failed: {reason}")]
    Request {
        /// The URL that was requested
        url: String,
        /// Underlying client error
        reason: String,
    },

    /// Writing the response to its destination failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// Destination file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    /// Classify a reqwest error for the given URL
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
            }
        } else if err.is_connect() {
            TransportError::Connect {
                url: url.to_string(),
                reason: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            TransportError::Request {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Manifest parsing errors
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Body was not valid JSON or did not match the expected shape
    #[error("malformed manifest: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A release entry has no filename
    #[error("release {version} has an entry without a filename")]
    MissingFilename {
        /// Release version the entry belongs to
        version: String,
    },

    /// A release entry's filename is not a single plain path component
    #[error("invalid filename {filename:?}")]
    InvalidFilename {
        /// Filename as given by the feed
        filename: String,
    },

    /// A release entry has no download URL
    #[error("{filename} has no download url")]
    MissingUrl {
        /// Filename of the entry
        filename: String,
    },

    /// None of the preferred checksum algorithms has an upstream digest
    #[error("{filename} has no digest for any of: {algorithms}")]
    MissingDigest {
        /// Filename of the entry
        filename: String,
        /// Comma-separated list of accepted algorithms
        algorithms: String,
    },
}

/// Content store errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Unit has no storage path assigned yet
    #[error("{filename} has no storage path")]
    NoStoragePath {
        /// Filename of the unit
        filename: String,
    },

    /// Moving the working file into the store failed
    #[error("failed to move {source_path} to {dest_path}: {reason}")]
    MoveFailed {
        /// The source path of the file being moved
        source_path: PathBuf,
        /// The destination path where the file should be moved
        dest_path: PathBuf,
        /// The reason the move failed
        reason: String,
    },

    /// A computed storage path does not lie beneath the content root
    #[error("{path} is outside the content root")]
    OutsideRoot {
        /// The rejected destination
        path: PathBuf,
    },

    /// Reading a file for hashing or inspection failed
    #[error("failed to read {path}: {source}")]
    ReadFailed {
        /// The file that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Why a single package or artifact failed to synchronize
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Network or HTTP error while fetching
    TransportFailure {
        /// Error description
        reason: String,
    },
    /// Manifest was malformed or lacked required keys
    ParseFailure {
        /// Error description
        reason: String,
    },
    /// Downloaded bytes did not match the declared digest
    ChecksumMismatch {
        /// Digest algorithm used for the comparison
        algorithm: String,
        /// Digest declared by the feed
        expected: String,
        /// Digest computed from the downloaded file
        actual: String,
    },
    /// Finalizing or committing the artifact failed
    StorageFailure {
        /// Error description
        reason: String,
    },
}

impl FailureKind {
    /// Short machine-readable code for this failure
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::TransportFailure { .. } => "transport_failure",
            FailureKind::ParseFailure { .. } => "parse_failure",
            FailureKind::ChecksumMismatch { .. } => "checksum_mismatch",
            FailureKind::StorageFailure { .. } => "storage_failure",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::TransportFailure { reason }
            | FailureKind::ParseFailure { reason }
            | FailureKind::StorageFailure { reason } => write!(f, "{}: {}", self.code(), reason),
            FailureKind::ChecksumMismatch {
                algorithm,
                expected,
                actual,
            } => write!(
                f,
                "checksum_mismatch: {algorithm} expected {expected}, got {actual}"
            ),
        }
    }
}

impl From<&TransportError> for FailureKind {
    fn from(err: &TransportError) -> Self {
        FailureKind::TransportFailure {
            reason: err.to_string(),
        }
    }
}

impl From<&ManifestError> for FailureKind {
    fn from(err: &ManifestError) -> Self {
        FailureKind::ParseFailure {
            reason: err.to_string(),
        }
    }
}

impl From<&Error> for FailureKind {
    fn from(err: &Error) -> Self {
        match err {
            Error::Transport(e) => e.into(),
            Error::Manifest(e) => e.into(),
            other => FailureKind::StorageFailure {
                reason: other.to_string(),
            },
        }
    }
}
