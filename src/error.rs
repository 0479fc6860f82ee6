use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Buffer queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// Transport client errors
    #[error("Client error: {0}")]
    Client(String),

    /// Producer lifecycle errors
    #[error("Producer error ({subsystem}): {message}")]
    Producer { subsystem: String, message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

}

impl AppError {
    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Queue(_) => "QUEUE_ERROR",
            AppError::Client(_) => "CLIENT_ERROR",
            AppError::Producer { .. } => "PRODUCER_ERROR",
            AppError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether retrying the failed operation could succeed without a config change
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Client(_) | AppError::Io(_))
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
