/// Step graph nodes and edges
pub mod step;

/// Per-conversation flow cursor
pub mod flow_state;

/// Inbound events and turn context
pub mod event;

/// Bot configuration and the flow activity predicate
pub mod bot_config;

/// External collaborator contracts
pub mod collaborators;
