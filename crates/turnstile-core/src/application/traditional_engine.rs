//! Legacy responder for bots without an active flow
//!
//! Never reads or writes flow state. It re-checks the shared activity
//! predicate itself so a caller that bypasses the router cannot make a
//! flow-driven conversation also receive a legacy response.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::config_resolver::BotConfigResolver;
use crate::domain::bot_config::flow_is_active;
use crate::domain::collaborators::Transport;
use crate::domain::event::{InboundEvent, TurnContext};
use crate::error::CoreResult;

/// Sends the bot's welcome response through the transport
pub struct TraditionalEngine {
    configs: Arc<BotConfigResolver>,
    transport: Arc<dyn Transport>,
}

impl TraditionalEngine {
    /// Create a traditional engine
    pub fn new(configs: Arc<BotConfigResolver>, transport: Arc<dyn Transport>) -> Self {
        Self { configs, transport }
    }

    /// Respond to an event. Returns `None` without side effects when a flow is active.
    pub async fn process(
        &self,
        event: &InboundEvent,
        bot_id: &str,
        conversation_id: &str,
        user_id: &str,
        context: &TurnContext,
    ) -> CoreResult<Option<Value>> {
        let config = self.configs.resolve(bot_id).await?;

        if flow_is_active(config.as_deref()) {
            debug!(bot_id, conversation_id, "Flow is active, traditional engine stands down");
            return Ok(None);
        }

        let Some(config) = config else {
            warn!(bot_id, conversation_id, "No bot configuration, nothing to send");
            return Ok(None);
        };

        let channel_token = context
            .channel_token
            .as_deref()
            .or(config.channel_token.as_deref());

        let result = self
            .transport
            .send_welcome(
                bot_id,
                channel_token,
                &config,
                conversation_id,
                &event.minimal(user_id),
            )
            .await?;

        debug!(bot_id, conversation_id, "Traditional engine sent welcome");
        Ok(Some(result))
    }
}
