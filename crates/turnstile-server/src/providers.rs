//! Collaborators wired into the router by the server
//!
//! Bot configuration is read from a YAML file, outbound welcome sends go to
//! a webhook, or to the log when no webhook is configured.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use turnstile_core::{BotConfig, ConfigProvider, CoreError, CoreResult, InboundEvent, Transport};

use crate::error::{ServerError, ServerResult};

#[derive(Debug, Default, Deserialize)]
struct BotsFile {
    #[serde(default)]
    bots: Vec<BotConfig>,
}

/// Bot configuration loaded from YAML
///
/// ```yaml
/// bots:
///   - bot_id: sales
///     flow_enabled: "true"
///     flow_steps: [{ id: "1", connections: { next: "2" } }, { id: "2" }]
/// ```
#[derive(Debug, Default)]
pub struct FileConfigProvider {
    bots: DashMap<String, BotConfig>,
    flags: DashMap<(String, String), bool>,
}

impl FileConfigProvider {
    /// Provider with no bots
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> ServerResult<Self> {
        let file: BotsFile = serde_yaml::from_str(yaml)?;
        let provider = Self::new();
        for bot in file.bots {
            if bot.bot_id.trim().is_empty() {
                return Err(ServerError::ConfigurationError(
                    "Bot entry without bot_id".to_string(),
                ));
            }
            provider.upsert(bot);
        }
        Ok(provider)
    }

    /// Read and parse a YAML file
    pub fn from_path(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            ServerError::ConfigurationError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let provider = Self::from_yaml_str(&yaml)?;
        info!(path = %path.display(), bots = provider.len(), "Loaded bot configurations");
        Ok(provider)
    }

    /// Insert or replace a bot
    pub fn upsert(&self, config: BotConfig) {
        self.bots.insert(config.bot_id.clone(), config);
    }

    /// Number of configured bots
    pub fn len(&self) -> usize {
        self.bots.len()
    }

    /// Whether no bot is configured
    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    /// Last flag recorded for a conversation
    pub fn flow_active_flag(&self, bot_id: &str, conversation_id: &str) -> Option<bool> {
        self.flags
            .get(&(bot_id.to_string(), conversation_id.to_string()))
            .map(|flag| *flag)
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    async fn get_bot_config(&self, bot_id: &str) -> CoreResult<Option<BotConfig>> {
        Ok(self.bots.get(bot_id).map(|entry| entry.value().clone()))
    }

    async fn set_flow_active_flag(
        &self,
        bot_id: &str,
        conversation_id: &str,
        active: bool,
    ) -> CoreResult<()> {
        self.flags
            .insert((bot_id.to_string(), conversation_id.to_string()), active);
        Ok(())
    }
}

/// Posts welcome sends to an HTTP endpoint
pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
}

impl WebhookTransport {
    /// Create a transport posting to `url`
    pub fn new(url: impl Into<String>) -> ServerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServerError::ConfigurationError(format!("HTTP client error: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    async fn send_welcome(
        &self,
        bot_id: &str,
        channel_token: Option<&str>,
        config: &BotConfig,
        conversation_id: &str,
        event: &InboundEvent,
    ) -> CoreResult<Value> {
        let payload = json!({
            "bot_id": bot_id,
            "conversation_id": conversation_id,
            "channel_token": channel_token,
            "event": event,
            "config": config.extra,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CoreError::TransportError(format!("Webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::TransportError(format!(
                "Webhook returned {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CoreError::TransportError(format!("Webhook response unreadable: {}", e)))?;
        debug!(bot_id, conversation_id, status = status.as_u16(), "Welcome delivered");
        Ok(serde_json::from_str(&body).unwrap_or_else(|_| json!({ "status": status.as_u16() })))
    }
}

/// Logs welcome sends instead of delivering them
#[derive(Debug, Default)]
pub struct LoggingTransport;

#[async_trait]
impl Transport for LoggingTransport {
    async fn send_welcome(
        &self,
        bot_id: &str,
        channel_token: Option<&str>,
        _config: &BotConfig,
        conversation_id: &str,
        event: &InboundEvent,
    ) -> CoreResult<Value> {
        info!(
            bot_id,
            conversation_id,
            has_token = channel_token.is_some(),
            text = ?event.text,
            "Welcome send (no webhook configured)"
        );
        Ok(json!({
            "delivered": false,
            "transport": "log",
            "conversation_id": conversation_id,
        }))
    }
}
