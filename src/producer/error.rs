//! Error types for the producer module

use crate::client::ClientStartError;
use crate::error::AppError;
use crate::queue::{QueueError, QueueName, QueueStartError};

/// Result type for producer operations
pub type ProducerResult<T> = std::result::Result<T, ProducerError>;

/// Errors that stop a producer
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// The buffer queue could not be started or attached
    #[error("Failed to start queue {queue}: {source}")]
    QueueStart {
        queue: QueueName,
        #[source]
        source: QueueStartError,
    },

    /// The transport client refused to start
    #[error("Failed to start client {client_id}: {source}")]
    ClientStart {
        client_id: String,
        #[source]
        source: ClientStartError,
    },

    /// A running producer could not read from its queue
    #[error("Failed to dequeue from {queue}: {source}")]
    Dequeue {
        queue: QueueName,
        #[source]
        source: QueueError,
    },

    /// The producer task is no longer running
    #[error("Producer stopped: {0}")]
    Stopped(String),

    /// The producer task panicked or was cancelled
    #[error("Producer task failed: {0}")]
    TaskFailed(String),
}

impl ProducerError {
    /// Subsystem the failure originated in
    pub fn subsystem(&self) -> &'static str {
        match self {
            ProducerError::QueueStart { .. } | ProducerError::Dequeue { .. } => "queue",
            ProducerError::ClientStart { .. } => "client",
            ProducerError::Stopped(_) | ProducerError::TaskFailed(_) => "producer",
        }
    }

    /// Whether this error was raised while starting
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            ProducerError::QueueStart { .. } | ProducerError::ClientStart { .. }
        )
    }
}

impl From<ProducerError> for AppError {
    fn from(err: ProducerError) -> Self {
        AppError::Producer {
            subsystem: err.subsystem().to_string(),
            message: err.to_string(),
        }
    }
}
