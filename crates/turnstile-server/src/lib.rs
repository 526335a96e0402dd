//!
//! Turnstile Server - HTTP entry point for the Turnstile conversation router
//!
//! Loads configuration, selects the shared store, wires the collaborators
//! into the router and serves inbound events over HTTP.

use std::sync::Arc;
use tracing::{info, warn};

use turnstile_core::{
    BotConfigResolver, FlowEngine, FlowStateStore, Router, TraditionalEngine, Transport,
};

/// API module
pub mod api;

/// Configuration module
pub mod config;

/// Error module
pub mod error;

/// Config provider and transport implementations
pub mod providers;

/// Server module
pub mod server;

/// Shared store factory
pub mod store;

// Re-export key types
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use providers::{FileConfigProvider, LoggingTransport, WebhookTransport};
pub use server::TurnstileServer;

/// Run the server until shutdown
pub async fn run(config: ServerConfig) -> ServerResult<()> {
    init_logging(&config);
    let server = build_server(config).await?;
    Arc::new(server).run().await
}

/// Initialize logging
pub fn init_logging(config: &ServerConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let result = if config.json_logs() {
        fmt().with_env_filter(filter).with_target(true).json().try_init()
    } else {
        fmt().with_env_filter(filter).with_target(true).try_init()
    };
    if result.is_err() {
        warn!("Logging already initialized");
    }
}

/// Assemble the server from configuration
pub async fn build_server(config: ServerConfig) -> ServerResult<TurnstileServer> {
    let provider = Arc::new(match &config.bots_config_path {
        Some(path) => FileConfigProvider::from_path(path)?,
        None => {
            warn!("BOTS_CONFIG_PATH not set, no bots are configured");
            FileConfigProvider::new()
        }
    });
    let transport = create_transport(&config)?;
    build_server_with(config, provider, transport).await
}

/// Assemble the server around the given collaborators
pub async fn build_server_with(
    config: ServerConfig,
    provider: Arc<FileConfigProvider>,
    transport: Arc<dyn Transport>,
) -> ServerResult<TurnstileServer> {
    let shared_store = store::create_shared_store(&config.shared_store_url).await?;
    let locks = store::create_lock_manager(&shared_store, config.lock_config()).await;

    let configs = Arc::new(BotConfigResolver::new(provider, config.config_cache_ttl()));
    let engine_config = config.flow_engine_config();
    let flow = FlowEngine::new(
        FlowStateStore::new(shared_store.clone(), engine_config.state_ttl),
        configs.clone(),
        engine_config,
    );
    let traditional = TraditionalEngine::new(configs.clone(), transport);

    let router = Router::new(Arc::new(locks), Arc::new(flow), Arc::new(traditional));
    info!(
        store = shared_store.kind(),
        distributed_locks = router.locks().is_distributed(),
        "Router assembled"
    );

    Ok(TurnstileServer::new(
        config,
        Arc::new(router),
        configs,
        shared_store,
    ))
}

fn create_transport(config: &ServerConfig) -> ServerResult<Arc<dyn Transport>> {
    match &config.transport_webhook_url {
        Some(url) => {
            info!("Sending welcome responses to {}", url);
            Ok(Arc::new(WebhookTransport::new(url.clone())?))
        }
        None => {
            warn!("TRANSPORT_WEBHOOK_URL not set, welcome responses are only logged");
            Ok(Arc::new(LoggingTransport))
        }
    }
}
