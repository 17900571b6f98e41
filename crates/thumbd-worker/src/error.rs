//! Worker error types.

use thiserror::Error;
use thumbd_media::MediaError;
use thumbd_models::StoredStatus;
use thumbd_queue::QueueError;
use thumbd_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Detail stored on rows whose upload credentials were rejected.
pub const UNAUTHORIZED_DETAIL: &str = "Unauthorized upload credentials";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Unsupported content: {0}")]
    UnsupportedContent(String),

    #[error("Process table error: {0}")]
    ProcessTable(String),

    #[error("Giving up after {0} consecutive failures")]
    CircuitOpen(u32),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn precondition_failed(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn unsupported_content(msg: impl Into<String>) -> Self {
        Self::UnsupportedContent(msg.into())
    }

    pub fn process_table(msg: impl Into<String>) -> Self {
        Self::ProcessTable(msg.into())
    }

    /// Setup errors: print the banner and exit 255, never retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            WorkerError::ConfigError(_)
            | WorkerError::PreconditionFailed(_)
            | WorkerError::CircuitOpen(_) => true,
            WorkerError::Storage(StorageError::ConfigError(_)) => true,
            WorkerError::Queue(e) => matches!(
                e,
                QueueError::SchemaMissing(_)
                    | QueueError::ColumnsMissing { .. }
                    | QueueError::InvalidIdentifier(_)
            ),
            WorkerError::Media(e) => matches!(
                e,
                MediaError::FfmpegNotFound | MediaError::FfprobeNotFound
            ),
            _ => false,
        }
    }

    /// Check if the uploader rejected its credentials.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, WorkerError::Storage(e) if e.is_unauthenticated())
    }

    /// Check if a later attempt on the same row may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Media(e) => e.is_retryable(),
            WorkerError::Storage(e) => matches!(
                e,
                StorageError::UploadFailed(_) | StorageError::Io(_) | StorageError::FileNotFound(_)
            ),
            WorkerError::Queue(_) | WorkerError::Io(_) => true,
            _ => false,
        }
    }

    /// Status written to a row whose pipeline failed with this error.
    ///
    /// Retryable failures get the bare `Failed` marker so the row is picked
    /// up again while its counter allows. Everything else is terminal.
    pub fn status_for(&self) -> StoredStatus {
        if self.is_unauthenticated() {
            StoredStatus::error(UNAUTHORIZED_DETAIL)
        } else if self.is_retryable() {
            StoredStatus::failed(self.to_string())
        } else {
            StoredStatus::error(self.to_string())
        }
    }
}
