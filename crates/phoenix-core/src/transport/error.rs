//! Error type for a single fetch attempt: transfer, verification, or storage.
//! Kept structured so the retry policy can classify it before it is reported.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Curl reported an error (timeout, connection, etc.).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// HTTP response had a non-2xx status.
    #[error("HTTP {0}")]
    Http(u32),
    /// Server closed before sending everything it announced.
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },
    /// Registry metadata was unusable (bad JSON, no files).
    #[error("metadata: {0}")]
    Metadata(String),
    /// Downloaded bytes do not hash to the expected digest.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    /// Staging volume cannot hold the file plus the configured margin.
    #[error("insufficient space: need {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },
    /// Disk/storage operation failed (e.g. disk full, permission denied). Not retried.
    #[error("storage: {0}")]
    Storage(#[from] std::io::Error),
    /// Shutdown or step timeout requested the transfer stop.
    #[error("aborted")]
    Aborted,
}

impl TransferError {
    /// Short label for summaries and the fetch result's failure reason.
    pub fn label(&self) -> &'static str {
        match self {
            TransferError::Curl(_) | TransferError::PartialTransfer { .. } => "network",
            TransferError::Http(_) => "http",
            TransferError::Metadata(_) => "metadata",
            TransferError::ChecksumMismatch { .. } => "checksum",
            TransferError::InsufficientSpace { .. } => "space",
            TransferError::Storage(_) => "storage",
            TransferError::Aborted => "aborted",
        }
    }
}
