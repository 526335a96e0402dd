//!
//! Turnstile Core - conversation routing for the Turnstile bot platform
//!
//! Every inbound event for a conversation is handled by exactly one of two
//! engines: the flow engine, which walks an editor-authored step graph, or
//! the traditional engine, which sends the bot's legacy welcome response.
//! A per-conversation lock guarantees that no two events for the same
//! conversation are processed at the same time, in one process or across
//! many.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - steps, flow state, events, bot configuration
pub mod domain;

/// Application services - locking, engines, router
pub mod application;

/// Shared store contract and in-memory backend
pub mod store;

/// Error types
pub mod error;

// Re-export key types
pub use error::{CoreError, CoreResult};
pub use store::{InMemoryStore, SharedStore};

pub use domain::bot_config::{flow_is_active, BotConfig};
pub use domain::collaborators::{ConditionEvaluator, ConfigProvider, Transport};
pub use domain::event::{Callback, InboundEvent, TurnContext};
pub use domain::flow_state::FlowState;
pub use domain::step::{Button, ConnectionKind, Connections, Step, StepConfig, StepId, StepType};

pub use application::config_resolver::BotConfigResolver;
pub use application::flow_engine::{EdgeKind, FlowEngine, FlowEngineConfig, FlowOutcome, Transition};
pub use application::flow_state_store::FlowStateStore;
pub use application::lock_manager::{LockConfig, LockGuard, LockManager};
pub use application::router::{Router, TurnOutcome};
pub use application::traditional_engine::TraditionalEngine;
