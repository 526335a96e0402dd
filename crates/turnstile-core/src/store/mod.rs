//! Shared store contract
//!
//! The store is the only state shared between processes: locks, flow state
//! records and active flags all live here. Implementations must provide an
//! atomic set-if-absent with expiry.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::CoreResult;

/// In-memory store
pub mod memory;

pub use memory::InMemoryStore;

/// Minimal key/value capability the router needs from a backing store
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> CoreResult<Option<String>>;

    /// Atomically set `key` only if it is absent; returns whether it was set
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<bool>;

    /// Set `key` unconditionally with an expiry
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<()>;

    /// Remove `key`; absent keys are not an error
    async fn delete(&self, key: &str) -> CoreResult<()>;

    /// Remove `key` only if it currently holds `expected`
    ///
    /// The default implementation is a read followed by a delete and is only
    /// as atomic as the caller's surrounding exclusion.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> CoreResult<bool> {
        match self.get(key).await? {
            Some(current) if current == expected => {
                self.delete(key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Short name of the backend, for logs and health output
    fn kind(&self) -> &'static str;

    /// Health check
    async fn health_check(&self) -> CoreResult<bool> {
        Ok(true)
    }
}

/// Key layout shared by every backend
pub mod keys {
    /// Serialized flow state of a conversation
    pub fn flow_state(bot_id: &str, conversation_id: &str) -> String {
        format!("flow_state:{}:{}", bot_id, conversation_id)
    }

    /// Active-flow marker of a conversation
    pub fn flow_active(bot_id: &str, conversation_id: &str) -> String {
        format!("flow_active:{}:{}", bot_id, conversation_id)
    }

    /// Conversation lock
    pub fn lock(bot_id: &str, conversation_id: &str) -> String {
        format!("lock:{}:{}", bot_id, conversation_id)
    }
}
