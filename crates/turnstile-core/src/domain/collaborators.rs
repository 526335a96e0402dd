//! Contracts for the systems the router depends on but does not own.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::bot_config::BotConfig;
use crate::domain::event::{InboundEvent, TurnContext};
use crate::domain::step::Step;
use crate::error::CoreResult;

/// Source of bot configuration
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Fetch the configuration for a bot, `None` if the bot is unknown
    async fn get_bot_config(&self, bot_id: &str) -> CoreResult<Option<BotConfig>>;

    /// Record the per-conversation flow flag in the system of record
    async fn set_flow_active_flag(
        &self,
        _bot_id: &str,
        _conversation_id: &str,
        _active: bool,
    ) -> CoreResult<()> {
        Ok(())
    }
}

/// Outbound message delivery, used only by the traditional engine
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the bot's welcome response for an inbound event
    async fn send_welcome(
        &self,
        bot_id: &str,
        channel_token: Option<&str>,
        config: &BotConfig,
        conversation_id: &str,
        event: &InboundEvent,
    ) -> CoreResult<Value>;
}

/// Evaluates condition steps
pub trait ConditionEvaluator: Send + Sync {
    /// Decide which branch of `step` to take
    fn evaluate(
        &self,
        step: &Step,
        event: Option<&InboundEvent>,
        context: &TurnContext,
    ) -> CoreResult<bool>;
}
