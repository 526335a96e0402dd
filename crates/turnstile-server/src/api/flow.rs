//! Flow administration endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use turnstile_core::FlowState;

use crate::error::ServerResult;
use crate::server::TurnstileServer;

/// Activate the bot's flow for a conversation
pub async fn activate_flow(
    State(server): State<Arc<TurnstileServer>>,
    Path((bot_id, conversation_id)): Path<(String, String)>,
) -> ServerResult<(StatusCode, Json<FlowState>)> {
    let state = server.activate_flow(&bot_id, &conversation_id).await?;
    Ok((StatusCode::CREATED, Json(state)))
}

/// Deactivate the flow for a conversation
pub async fn deactivate_flow(
    State(server): State<Arc<TurnstileServer>>,
    Path((bot_id, conversation_id)): Path<(String, String)>,
) -> ServerResult<StatusCode> {
    server.deactivate_flow(&bot_id, &conversation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Current flow state of a conversation
pub async fn get_flow_state(
    State(server): State<Arc<TurnstileServer>>,
    Path((bot_id, conversation_id)): Path<(String, String)>,
) -> ServerResult<Json<FlowState>> {
    Ok(Json(server.flow_state(&bot_id, &conversation_id).await?))
}
