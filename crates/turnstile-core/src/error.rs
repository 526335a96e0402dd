use thiserror::Error;

/// Core error type for the Turnstile router
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The conversation lock could not be acquired within the timeout
    #[error("Lock acquisition timed out for {key} after {timeout_ms}ms")]
    LockAcquisitionTimeout {
        /// Lock key that was contended
        key: String,
        /// Timeout that elapsed, in milliseconds
        timeout_ms: u64,
    },

    /// No bot configuration is known for the bot
    #[error("Bot configuration not found: {0}")]
    ConfigNotFound(String),

    /// A step id is referenced but absent from the flow snapshot
    #[error("Step not found: {0}")]
    StepNotFound(String),

    /// The hop ceiling was hit while advancing a flow
    #[error("Flow cycle exceeded after {max_hops} hops, stopped at step {last_step}")]
    FlowCycleExceeded {
        /// Configured ceiling
        max_hops: usize,
        /// Last step that was successfully persisted
        last_step: String,
    },

    /// The flow engine was invoked for a conversation whose flow is inactive
    #[error("Flow is not active for bot {bot_id}, conversation {conversation_id}")]
    FlowInactive {
        /// Bot identifier
        bot_id: String,
        /// Conversation identifier
        conversation_id: String,
    },

    /// The shared store could not be reached
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Outbound send failed
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Condition evaluation error
    #[error("Condition evaluation error: {0}")]
    ConditionEvaluationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Whether the caller can safely resubmit the same event
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::LockAcquisitionTimeout { .. } | CoreError::StoreUnavailable(_)
        )
    }

    /// Whether the error aborts the turn and needs the flow graph repaired
    pub fn is_fatal_to_turn(&self) -> bool {
        matches!(
            self,
            CoreError::StepNotFound(_) | CoreError::FlowCycleExceeded { .. }
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}
