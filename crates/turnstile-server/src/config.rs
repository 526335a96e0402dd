//! Configuration for the Turnstile server
//!
//! Values come from environment variables; anything unset keeps its default.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

use turnstile_core::{FlowEngineConfig, LockConfig};

use crate::error::ServerResult;

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub bind_address: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// `memory://...` or `redis://...`
    #[serde(default = "default_shared_store_url")]
    pub shared_store_url: String,

    /// Lock acquisition bound, also used as the lock expiry
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Polling interval while waiting for a distributed lock
    #[serde(default = "default_lock_retry_interval_ms")]
    pub lock_retry_interval_ms: u64,

    /// Hop ceiling per inbound event
    #[serde(default = "default_flow_max_hops")]
    pub flow_max_hops: usize,

    /// Expiry of flow state records and active markers
    #[serde(default = "default_flow_state_ttl_secs")]
    pub flow_state_ttl_secs: u64,

    /// Lifetime of cached bot configuration
    #[serde(default = "default_config_cache_ttl_secs")]
    pub config_cache_ttl_secs: u64,

    /// YAML file holding bot configurations
    #[serde(default)]
    pub bots_config_path: Option<String>,

    /// Webhook receiving outbound welcome sends
    #[serde(default)]
    pub transport_webhook_url: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shared_store_url() -> String {
    "memory://local".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_lock_retry_interval_ms() -> u64 {
    50
}

fn default_flow_max_hops() -> usize {
    50
}

fn default_flow_state_ttl_secs() -> u64 {
    86_400
}

fn default_config_cache_ttl_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_host(),
            port: default_port(),
            shared_store_url: default_shared_store_url(),
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_retry_interval_ms: default_lock_retry_interval_ms(),
            flow_max_hops: default_flow_max_hops(),
            flow_state_ttl_secs: default_flow_state_ttl_secs(),
            config_cache_ttl_secs: default_config_cache_ttl_secs(),
            bots_config_path: None,
            transport_webhook_url: None,
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn load() -> ServerResult<Self> {
        Ok(Self::from_lookup(|name| env::var(name).ok()))
    }

    /// Build a configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("SERVER_HOST") {
            config.bind_address = host;
        }
        parse_into(&lookup, "SERVER_PORT", &mut config.port);

        if let Some(url) = lookup("SHARED_STORE_URL") {
            config.shared_store_url = url;
        }

        parse_into(&lookup, "LOCK_TIMEOUT_MS", &mut config.lock_timeout_ms);
        parse_into(&lookup, "LOCK_RETRY_INTERVAL_MS", &mut config.lock_retry_interval_ms);
        parse_into(&lookup, "FLOW_MAX_HOPS", &mut config.flow_max_hops);
        parse_into(&lookup, "FLOW_STATE_TTL_SECS", &mut config.flow_state_ttl_secs);
        parse_into(&lookup, "CONFIG_CACHE_TTL_SECS", &mut config.config_cache_ttl_secs);

        config.bots_config_path = lookup("BOTS_CONFIG_PATH").filter(|v| !v.is_empty());
        config.transport_webhook_url = lookup("TRANSPORT_WEBHOOK_URL").filter(|v| !v.is_empty());

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            config.log_format = format;
        }

        config
    }

    /// Socket address string to bind
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Lock settings for the core
    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            timeout: Duration::from_millis(self.lock_timeout_ms),
            retry_interval: Duration::from_millis(self.lock_retry_interval_ms),
            ttl: Duration::from_millis(self.lock_timeout_ms),
        }
    }

    /// Flow engine settings for the core
    pub fn flow_engine_config(&self) -> FlowEngineConfig {
        FlowEngineConfig {
            max_hops: self.flow_max_hops,
            state_ttl: Duration::from_secs(self.flow_state_ttl_secs),
        }
    }

    /// Bot configuration cache lifetime
    pub fn config_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.config_cache_ttl_secs)
    }

    /// Whether logs should be emitted as JSON
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

fn parse_into<F, T>(lookup: &F, name: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(name) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!("Invalid {} value: {}", name, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[]));
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
        assert_eq!(config.shared_store_url, "memory://local");
        assert_eq!(config.lock_config().timeout, Duration::from_secs(5));
        assert_eq!(config.lock_config().retry_interval, Duration::from_millis(50));
        assert_eq!(config.flow_engine_config().max_hops, 50);
        assert_eq!(config.flow_engine_config().state_ttl, Duration::from_secs(86_400));
        assert_eq!(config.config_cache_ttl(), Duration::from_secs(30));
        assert!(!config.json_logs());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SERVER_PORT", "9090"),
            ("SHARED_STORE_URL", "redis://cache:6379"),
            ("LOCK_TIMEOUT_MS", "250"),
            ("FLOW_MAX_HOPS", "7"),
            ("BOTS_CONFIG_PATH", "/etc/turnstile/bots.yaml"),
            ("TRANSPORT_WEBHOOK_URL", ""),
            ("LOG_FORMAT", "JSON"),
        ]));

        assert_eq!(config.port, 9090);
        assert_eq!(config.shared_store_url, "redis://cache:6379");
        assert_eq!(config.lock_config().ttl, Duration::from_millis(250));
        assert_eq!(config.flow_max_hops, 7);
        assert_eq!(config.bots_config_path.as_deref(), Some("/etc/turnstile/bots.yaml"));
        assert_eq!(config.transport_webhook_url, None);
        assert!(config.json_logs());
    }

    #[test]
    fn test_invalid_numbers_keep_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SERVER_PORT", "eighty"),
            ("LOCK_RETRY_INTERVAL_MS", "-5"),
        ]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.lock_retry_interval_ms, 50);
    }
}
