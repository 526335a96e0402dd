//! Persistence of per-conversation flow state
//!
//! Records live in the shared store under `flow_state:{bot}:{conversation}`
//! with a companion `flow_active:{bot}:{conversation}` marker. An in-process
//! cache mirrors every read and write; it is consulted only when the store
//! reports itself unavailable, and is refreshed from the store otherwise.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::flow_state::FlowState;
use crate::error::{CoreError, CoreResult};
use crate::store::{keys, SharedStore};

const ACTIVE_MARKER: &str = "1";

/// Reads and writes [`FlowState`] records
pub struct FlowStateStore {
    store: Arc<dyn SharedStore>,
    cache: DashMap<String, FlowState>,
    ttl: Duration,
}

impl FlowStateStore {
    /// Create a state store writing records with the given expiry
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Load the state of a conversation
    pub async fn load(&self, bot_id: &str, conversation_id: &str) -> CoreResult<Option<FlowState>> {
        let key = keys::flow_state(bot_id, conversation_id);

        match self.store.get(&key).await {
            Ok(Some(raw)) => {
                let state: FlowState = serde_json::from_str(&raw)?;
                state.validate()?;
                self.cache.insert(key, state.clone());
                Ok(Some(state))
            }
            Ok(None) => {
                self.cache.remove(&key);
                Ok(None)
            }
            Err(CoreError::StoreUnavailable(reason)) => {
                warn!(
                    key = %key,
                    reason = %reason,
                    "Store unavailable, serving flow state from process cache; state is not durable"
                );
                Ok(self.cache.get(&key).map(|entry| entry.value().clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// Persist a state and mirror it into the cache
    pub async fn save(&self, state: &FlowState) -> CoreResult<()> {
        let key = keys::flow_state(&state.bot_id, &state.conversation_id);
        let raw = serde_json::to_string(state)?;

        self.cache.insert(key.clone(), state.clone());
        match self.store.set(&key, &raw, self.ttl).await {
            Ok(()) => {
                debug!(key = %key, current_step = ?state.current_step, "Saved flow state");
                Ok(())
            }
            Err(CoreError::StoreUnavailable(reason)) => {
                warn!(key = %key, reason = %reason, "Store unavailable, flow state kept in process cache only");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Set or clear the active marker
    pub async fn set_active(&self, bot_id: &str, conversation_id: &str, active: bool) -> CoreResult<()> {
        let key = keys::flow_active(bot_id, conversation_id);
        let result = if active {
            self.store.set(&key, ACTIVE_MARKER, self.ttl).await
        } else {
            self.store.delete(&key).await
        };

        match result {
            Err(CoreError::StoreUnavailable(reason)) => {
                warn!(key = %key, reason = %reason, "Store unavailable, active marker not persisted");
                Ok(())
            }
            other => other,
        }
    }

    /// Read the active marker; falls back to the cached record when the store is down
    pub async fn is_active(&self, bot_id: &str, conversation_id: &str) -> CoreResult<bool> {
        match self.store.get(&keys::flow_active(bot_id, conversation_id)).await {
            Ok(marker) => Ok(marker.is_some()),
            Err(CoreError::StoreUnavailable(_)) => Ok(self
                .cache
                .get(&keys::flow_state(bot_id, conversation_id))
                .map(|entry| entry.is_active)
                .unwrap_or(false)),
            Err(e) => Err(e),
        }
    }

    /// Remove the record, the marker and the cached copy
    pub async fn delete(&self, bot_id: &str, conversation_id: &str) -> CoreResult<()> {
        let state_key = keys::flow_state(bot_id, conversation_id);
        self.cache.remove(&state_key);

        for key in [state_key, keys::flow_active(bot_id, conversation_id)] {
            match self.store.delete(&key).await {
                Ok(()) => {}
                Err(CoreError::StoreUnavailable(reason)) => {
                    warn!(key = %key, reason = %reason, "Store unavailable, record will expire instead");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// The state this process last read or wrote, without touching the store
    pub fn cached(&self, bot_id: &str, conversation_id: &str) -> Option<FlowState> {
        self.cache
            .get(&keys::flow_state(bot_id, conversation_id))
            .map(|entry| entry.value().clone())
    }

    /// Drop the cached copy only
    pub fn evict(&self, bot_id: &str, conversation_id: &str) {
        self.cache.remove(&keys::flow_state(bot_id, conversation_id));
    }
}
