//! Entry point for inbound events
//!
//! The router takes the conversation lock, asks the flow engine whether the
//! bot's flow is active, hands the whole turn to exactly one engine and
//! releases the lock on every exit path. It makes no business decisions of
//! its own.

use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::application::flow_engine::{FlowEngine, FlowOutcome};
use crate::application::lock_manager::LockManager;
use crate::application::traditional_engine::TraditionalEngine;
use crate::domain::bot_config::BotConfig;
use crate::domain::event::{InboundEvent, TurnContext};
use crate::domain::flow_state::FlowState;
use crate::error::{CoreError, CoreResult};
use crate::store::keys;

/// Which engine handled a turn, and what it produced
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "engine", content = "result", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The flow engine advanced the conversation
    Flow(FlowOutcome),
    /// The traditional engine responded, or stood down with `None`
    Traditional(Option<Value>),
}

/// Routes each turn to the flow engine or the traditional engine
pub struct Router {
    locks: Arc<LockManager>,
    flow: Arc<FlowEngine>,
    traditional: Arc<TraditionalEngine>,
}

impl Router {
    /// Create a router
    pub fn new(
        locks: Arc<LockManager>,
        flow: Arc<FlowEngine>,
        traditional: Arc<TraditionalEngine>,
    ) -> Self {
        Self {
            locks,
            flow,
            traditional,
        }
    }

    /// The lock manager serializing conversations
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// The flow engine
    pub fn flow_engine(&self) -> &Arc<FlowEngine> {
        &self.flow
    }

    /// Process one inbound event for a conversation
    ///
    /// Fails with `LockAcquisitionTimeout` without invoking either engine
    /// when the conversation stays locked past the configured timeout.
    /// Engine errors are returned unchanged after the lock is released.
    pub async fn process_event(
        &self,
        event: InboundEvent,
        bot_id: &str,
        conversation_id: &str,
        user_id: &str,
        context: TurnContext,
    ) -> CoreResult<TurnOutcome> {
        let span = info_span!("turn", bot_id, conversation_id);
        self.with_conversation_lock(bot_id, conversation_id, || {
            self.dispatch(&event, bot_id, conversation_id, user_id, &context)
        })
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        event: &InboundEvent,
        bot_id: &str,
        conversation_id: &str,
        user_id: &str,
        context: &TurnContext,
    ) -> CoreResult<TurnOutcome> {
        if self.flow.owns_conversation(bot_id, conversation_id).await? {
            debug!("Routing turn to flow engine");
            let outcome = self
                .flow
                .process(event, bot_id, conversation_id, user_id, context)
                .await?;
            Ok(TurnOutcome::Flow(outcome))
        } else {
            debug!("Routing turn to traditional engine");
            let response = self
                .traditional
                .process(event, bot_id, conversation_id, user_id, context)
                .await?;
            Ok(TurnOutcome::Traditional(response))
        }
    }

    /// Activate the flow for a conversation under its lock
    pub async fn activate_flow(
        &self,
        bot_id: &str,
        conversation_id: &str,
        flow_config: &BotConfig,
    ) -> CoreResult<FlowState> {
        self.with_conversation_lock(bot_id, conversation_id, || {
            self.flow.activate_flow(bot_id, conversation_id, flow_config)
        })
        .await
    }

    /// Deactivate the flow for a conversation under its lock
    pub async fn deactivate_flow(&self, bot_id: &str, conversation_id: &str) -> CoreResult<()> {
        self.with_conversation_lock(bot_id, conversation_id, || {
            self.flow.deactivate_flow(bot_id, conversation_id)
        })
        .await
    }

    /// Run `critical` while holding the conversation lock
    ///
    /// The lock is released whether `critical` succeeds or fails; if the
    /// future is dropped mid-way the guard releases on drop.
    pub async fn with_conversation_lock<F, Fut, T>(
        &self,
        bot_id: &str,
        conversation_id: &str,
        critical: F,
    ) -> CoreResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        let key = keys::lock(bot_id, conversation_id);
        let guard = self.locks.acquire(&key).await.map_err(|e| {
            if matches!(e, CoreError::LockAcquisitionTimeout { .. }) {
                info!(key = %key, "Conversation busy, turn not executed");
            }
            e
        })?;

        let result = critical().await;

        if let Err(e) = guard.release().await {
            warn!(key = %key, error = %e, "Lock release failed, lock will expire");
        }
        result
    }
}
