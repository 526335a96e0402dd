//! Inbound event endpoint

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use turnstile_core::{Callback, InboundEvent, TurnContext, TurnOutcome};

use crate::error::ServerResult;
use crate::server::TurnstileServer;

/// Body of `POST /v1/bots/:bot_id/events`
#[derive(Debug, Clone, Deserialize)]
pub struct EventRequest {
    /// Conversation the event belongs to
    pub conversation_id: String,

    /// Sender
    pub user_id: String,

    /// Message text
    #[serde(default)]
    pub text: Option<String>,

    /// Button press
    #[serde(default)]
    pub callback: Option<Callback>,

    /// Turn context
    #[serde(default)]
    pub context: TurnContext,
}

impl EventRequest {
    fn event(&self) -> InboundEvent {
        InboundEvent {
            text: self.text.clone(),
            callback: self.callback.clone(),
            sender_id: Some(self.user_id.clone()),
            received_at: Utc::now(),
        }
    }
}

/// Route an inbound event through the conversation router
pub async fn handle_event(
    State(server): State<Arc<TurnstileServer>>,
    Path(bot_id): Path<String>,
    Json(request): Json<EventRequest>,
) -> ServerResult<Json<TurnOutcome>> {
    let outcome = server
        .handle_event(
            &bot_id,
            &request.conversation_id,
            &request.user_id,
            request.event(),
            request.context.clone(),
        )
        .await?;
    Ok(Json(outcome))
}
