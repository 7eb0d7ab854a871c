//! Error types for pipewarden-state

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the durable storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Key does not satisfy the key grammar
    #[error("Invalid store key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Digest is not 64 lowercase hex chars
    #[error("Invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Filesystem failure
    #[error("I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backend refused the write; previous value is untouched
    #[error("Write rejected for key {key}: {reason}")]
    WriteRejected { key: String, reason: String },

    /// A blocking storage task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}
