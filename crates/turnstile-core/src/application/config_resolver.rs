//! Cached access to bot configuration
//!
//! Entries expire after a short TTL so configuration changes made through
//! the editor reach every process without a restart.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::domain::bot_config::{flow_is_active, BotConfig};
use crate::domain::collaborators::ConfigProvider;
use crate::error::CoreResult;

struct CachedConfig {
    config: Option<Arc<BotConfig>>,
    fetched_at: Instant,
}

/// Resolves bot configuration, cache first
pub struct BotConfigResolver {
    provider: Arc<dyn ConfigProvider>,
    cache: DashMap<String, CachedConfig>,
    ttl: Duration,
}

impl BotConfigResolver {
    /// Create a resolver over `provider`
    pub fn new(provider: Arc<dyn ConfigProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// The underlying provider
    pub fn provider(&self) -> &Arc<dyn ConfigProvider> {
        &self.provider
    }

    /// Resolve a bot's configuration. `None` means the bot is unknown.
    ///
    /// Provider failures fall back to a stale cache entry when one exists.
    pub async fn resolve(&self, bot_id: &str) -> CoreResult<Option<Arc<BotConfig>>> {
        if let Some(entry) = self.cache.get(bot_id) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.config.clone());
            }
        }

        match self.provider.get_bot_config(bot_id).await {
            Ok(config) => {
                let config = config.map(Arc::new);
                debug!(bot_id, found = config.is_some(), "Fetched bot configuration");
                self.cache.insert(
                    bot_id.to_string(),
                    CachedConfig {
                        config: config.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(config)
            }
            Err(e) => match self.cache.get(bot_id) {
                Some(stale) => {
                    warn!(bot_id, error = %e, "Config provider failed, using stale configuration");
                    Ok(stale.config.clone())
                }
                None => Err(e),
            },
        }
    }

    /// Whether the bot's flow is active; unknown bots are inactive
    pub async fn is_flow_active(&self, bot_id: &str) -> CoreResult<bool> {
        let config = self.resolve(bot_id).await?;
        Ok(flow_is_active(config.as_deref()))
    }

    /// Drop the cached entry for a bot
    pub fn invalidate(&self, bot_id: &str) {
        self.cache.remove(bot_id);
    }
}
