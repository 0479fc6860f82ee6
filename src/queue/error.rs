//! Error types for buffer queue operations

use crate::error::AppError;

/// Result type for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Errors that can occur while talking to a running queue
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// The queue's task has stopped
    #[error("Queue {0} is closed")]
    Closed(String),

    /// No queue is registered under the name
    #[error("Queue {0} not found")]
    NotFound(String),

    /// The queue implementation could not be created
    #[error("Failed to create queue: {0}")]
    CreationFailed(String),
}

/// Reasons a queue start request is refused
///
/// Both variants are fatal to producer startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueStartError {
    /// The supervisor declined to start the queue (e.g. it is shutting down)
    #[error("ignore: {0}")]
    Ignore(String),

    /// The queue could not be started
    #[error("{0}")]
    Failed(String),
}

impl From<QueueError> for QueueStartError {
    fn from(err: QueueError) -> Self {
        QueueStartError::Failed(err.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        AppError::Queue(err.to_string())
    }
}

impl From<QueueStartError> for AppError {
    fn from(err: QueueStartError) -> Self {
        AppError::Queue(err.to_string())
    }
}
