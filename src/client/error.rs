//! Error types for transport client operations

use crate::error::AppError;
use crate::queue::QueueError;

/// Result type for client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors raised by a running transport client
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The connection could not be closed cleanly
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),

    /// Inbound message could not be handed to the buffer queue
    #[error("Delivery to queue failed: {0}")]
    Delivery(#[from] QueueError),
}

/// Reasons a client start request is refused
///
/// Every variant is fatal to producer startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientStartError {
    /// A session with this client identifier is already running
    #[error("client {client_id} already started")]
    AlreadyStarted { client_id: String },

    /// The client declined the request (e.g. wrong transport kind)
    #[error("ignore: {0}")]
    Ignore(String),

    /// The session could not be started
    #[error("{0}")]
    Failed(String),
}

impl From<ClientError> for AppError {
    fn from(err: ClientError) -> Self {
        AppError::Client(err.to_string())
    }
}

impl From<ClientStartError> for AppError {
    fn from(err: ClientStartError) -> Self {
        match err {
            ClientStartError::AlreadyStarted { .. } | ClientStartError::Ignore(_) => {
                AppError::Configuration(err.to_string())
            }
            ClientStartError::Failed(_) => AppError::Client(err.to_string()),
        }
    }
}
