//! Health check endpoint

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::server::TurnstileServer;

/// Report server and store health
pub async fn health_check(State(server): State<Arc<TurnstileServer>>) -> impl IntoResponse {
    debug!("Health check requested");

    let store_status = match server.check_store_health().await {
        Ok(true) => "UP",
        Ok(false) => "DEGRADED",
        Err(_) => "DOWN",
    };
    let status = if store_status == "UP" { "UP" } else { "DEGRADED" };
    let code = if store_status == "DOWN" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(json!({
            "status": status,
            "version": env!("CARGO_PKG_VERSION"),
            "dependencies": {
                "sharedStore": {
                    "status": store_status,
                    "kind": server.store().kind(),
                },
                "locks": {
                    "distributed": server.router().locks().is_distributed(),
                },
            },
        })),
    )
}
