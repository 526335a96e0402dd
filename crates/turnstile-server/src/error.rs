//! Error types for the Turnstile server

use thiserror::Error;
use turnstile_core::CoreError;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    /// Error raised by the routing core
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Resource not found
    #[error("{0} not found")]
    NotFound(String),

    /// Malformed request
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Invalid or unusable configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Shared store could not be created or reached at start-up
    #[error("Store error: {0}")]
    StoreError(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl From<serde_yaml::Error> for ServerError {
    fn from(err: serde_yaml::Error) -> Self {
        ServerError::ConfigurationError(format!("YAML error: {}", err))
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::InternalError(format!("IO error: {}", err))
    }
}

impl ServerError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::Core(core) => match core {
                CoreError::LockAcquisitionTimeout { .. } => 409,
                CoreError::ConfigNotFound(_) => 404,
                CoreError::StepNotFound(_) | CoreError::FlowCycleExceeded { .. } => 422,
                CoreError::FlowInactive { .. } => 409,
                _ => 500,
            },
            ServerError::NotFound(_) => 404,
            ServerError::ValidationError(_) => 400,
            _ => 500,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Core(core) => match core {
                CoreError::LockAcquisitionTimeout { .. } => "CONVERSATION_BUSY",
                CoreError::ConfigNotFound(_) => "BOT_NOT_FOUND",
                CoreError::StepNotFound(_) => "STEP_NOT_FOUND",
                CoreError::FlowCycleExceeded { .. } => "FLOW_CYCLE_EXCEEDED",
                CoreError::FlowInactive { .. } => "FLOW_INACTIVE",
                CoreError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
                _ => "INTERNAL_ERROR",
            },
            ServerError::NotFound(_) => "NOT_FOUND",
            ServerError::ValidationError(_) => "VALIDATION_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether the client may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServerError::Core(core) if core.is_retryable())
    }
}
