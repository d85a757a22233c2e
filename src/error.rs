//! Error types for the check-in store.

use crate::types::{BlobId, RecordId, SubmissionId};
use thiserror::Error;

/// Low-level persistence faults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error("Storage full: {0}")]
    StorageFull(String),

    #[error("Blob not found: {0}")]
    BlobNotFound(BlobId),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),
}

impl StoreError {
    /// Whether this is a missing blob or record rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::BlobNotFound(_) | StoreError::RecordNotFound(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::StorageFull {
            StoreError::StorageFull(e.to_string())
        } else {
            StoreError::Io(e)
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Rejections raised before any persistence is attempted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("user code must not be empty")]
    EmptyUserCode,

    #[error("submission id must not be empty")]
    EmptySubmissionId,

    #[error("image payload must not be empty")]
    EmptyImage,

    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("accuracy {0} must be a finite, non-negative number of meters")]
    InvalidAccuracy(f64),

    #[error("submission id already recorded: {0}")]
    DuplicateSubmission(SubmissionId),
}

/// Caller-facing error for store operations.
#[derive(Debug, Error)]
pub enum CheckinError {
    #[error("invalid check-in: {0}")]
    Validation(#[from] ValidationError),

    /// Local persistence failed. The submission did not complete and may be retried.
    #[error("storage error: {0}")]
    Storage(#[source] StoreError),

    /// A referenced blob or record is missing. Affects only the failing read.
    #[error("not found: {0}")]
    NotFound(#[source] StoreError),
}

impl CheckinError {
    /// Whether the user should be told to try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckinError::Storage(_))
    }
}

impl From<StoreError> for CheckinError {
    fn from(e: StoreError) -> Self {
        if e.is_not_found() {
            CheckinError::NotFound(e)
        } else {
            CheckinError::Storage(e)
        }
    }
}

/// Result type for low-level store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Result type for caller-facing check-in operations.
pub type CheckinResult<T> = std::result::Result<T, CheckinError>;
