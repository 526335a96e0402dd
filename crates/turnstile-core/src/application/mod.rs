/// Per-conversation locking
pub mod lock_manager;

/// Flow state persistence
pub mod flow_state_store;

/// Cached bot configuration
pub mod config_resolver;

/// Step-graph interpreter
pub mod flow_engine;

/// Fallback responder
pub mod traditional_engine;

/// Turn dispatch
pub mod router;
