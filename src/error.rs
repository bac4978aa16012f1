// src/error.rs
//
// Error taxonomy for uploads and for the external blob store.

use std::time::Duration;
use thiserror::Error;

/// Errors reported by a `BlockBlobStore` implementation.
///
/// `NotFound` is the only variant callers may turn into a boolean answer;
/// everything else is propagated unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("storage service returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum UploadError {
    /// Fatal, raised before any upload attempt.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{codec} compression failed: {source}")]
    Compression {
        codec: String,
        #[source]
        source: std::io::Error,
    },

    #[error("The block is corrupt: block = {block_id} (sent md5 {expected}, store reported {reported})")]
    Corrupt {
        block_id: String,
        expected: String,
        reported: String,
    },

    #[error("put block {block_id} timed out after {timeout:?}")]
    Timeout { block_id: String, timeout: Duration },

    #[error("failed to read block {block_id}: {source}")]
    BlockRead {
        block_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("put block {block_id} failed: {source}")]
    BlockStore {
        block_id: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A worker task panicked or was cancelled before returning.
    #[error("upload worker failed: {0}")]
    Worker(String),

    /// One or more workers failed; commit was not attempted.
    #[error("{message}")]
    BlockUpload {
        message: String,
        errors: Vec<UploadError>,
    },
}

impl UploadError {
    /// Build the aggregated batch failure from every worker error.
    pub fn block_upload(errors: Vec<UploadError>) -> Self {
        let joined = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        UploadError::BlockUpload {
            message: format!("multipart upload failed: {}", joined),
            errors,
        }
    }

    /// Constituent errors of an aggregated failure (empty otherwise).
    pub fn errors(&self) -> &[UploadError] {
        match self {
            UploadError::BlockUpload { errors, .. } => errors,
            _ => &[],
        }
    }
}

pub type Result<T, E = UploadError> = std::result::Result<T, E>;
