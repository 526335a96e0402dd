//! HTTP surface of the Turnstile server

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub mod errors;
pub mod events;
pub mod flow;
pub mod health;

use crate::server::TurnstileServer;

/// Build the router for API endpoints
pub fn build_router(server: Arc<TurnstileServer>) -> Router {
    Router::new()
        // Inbound conversational events
        .route("/v1/bots/:bot_id/events", post(events::handle_event))
        // Flow administration
        .route(
            "/v1/bots/:bot_id/conversations/:conversation_id/flow",
            post(flow::activate_flow)
                .delete(flow::deactivate_flow)
                .get(flow::get_flow_state),
        )
        .route("/health", get(health::health_check))
        .with_state(server)
}
