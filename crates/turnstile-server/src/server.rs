//! The Turnstile server: wiring between HTTP and the router

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use turnstile_core::{
    BotConfigResolver, CoreError, FlowState, InboundEvent, Router, SharedStore, TurnContext,
    TurnOutcome,
};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Main server implementation
pub struct TurnstileServer {
    /// Configuration
    pub config: ServerConfig,

    router: Arc<Router>,
    configs: Arc<BotConfigResolver>,
    store: Arc<dyn SharedStore>,
}

impl std::fmt::Debug for TurnstileServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnstileServer")
            .field("config", &self.config)
            .field("store", &self.store.kind())
            .field("distributed_locks", &self.router.locks().is_distributed())
            .finish()
    }
}

impl TurnstileServer {
    /// Create a server around an assembled router
    pub fn new(
        config: ServerConfig,
        router: Arc<Router>,
        configs: Arc<BotConfigResolver>,
        store: Arc<dyn SharedStore>,
    ) -> Self {
        Self {
            config,
            router,
            configs,
            store,
        }
    }

    /// The conversation router
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The shared store backing locks and flow state
    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    /// Route one inbound event
    pub async fn handle_event(
        &self,
        bot_id: &str,
        conversation_id: &str,
        user_id: &str,
        event: InboundEvent,
        context: TurnContext,
    ) -> ServerResult<TurnOutcome> {
        if conversation_id.trim().is_empty() || user_id.trim().is_empty() {
            return Err(ServerError::ValidationError(
                "conversation_id and user_id are required".to_string(),
            ));
        }
        let event = event.from_sender(user_id);
        Ok(self
            .router
            .process_event(event, bot_id, conversation_id, user_id, context)
            .await?)
    }

    /// Start the bot's flow for a conversation from its current configuration
    pub async fn activate_flow(&self, bot_id: &str, conversation_id: &str) -> ServerResult<FlowState> {
        self.configs.invalidate(bot_id);
        let config = self
            .configs
            .resolve(bot_id)
            .await?
            .ok_or_else(|| CoreError::ConfigNotFound(bot_id.to_string()))?;

        Ok(self
            .router
            .activate_flow(bot_id, conversation_id, &config)
            .await?)
    }

    /// Stop the flow for a conversation
    pub async fn deactivate_flow(&self, bot_id: &str, conversation_id: &str) -> ServerResult<()> {
        Ok(self.router.deactivate_flow(bot_id, conversation_id).await?)
    }

    /// Current flow state of a conversation
    pub async fn flow_state(&self, bot_id: &str, conversation_id: &str) -> ServerResult<FlowState> {
        self.router
            .flow_engine()
            .flow_state(bot_id, conversation_id)
            .await?
            .ok_or_else(|| {
                ServerError::NotFound(format!("Flow state for {}/{}", bot_id, conversation_id))
            })
    }

    /// Check the shared store
    pub async fn check_store_health(&self) -> ServerResult<bool> {
        Ok(self.store.health_check().await?)
    }

    /// Serve HTTP until ctrl-c
    pub async fn run(self: Arc<Self>) -> ServerResult<()> {
        info!("Starting Turnstile server");

        let addr = self.config.listen_addr();
        let app = crate::api::build_router(self.clone());

        let listener = TcpListener::bind(&addr).await?;
        info!(
            "Listening on {} (store: {}, distributed locks: {})",
            listener.local_addr()?,
            self.store.kind(),
            self.router.locks().is_distributed()
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Turnstile server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
