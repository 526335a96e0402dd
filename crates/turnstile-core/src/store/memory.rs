//! In-memory implementation of [`SharedStore`]
//!
//! State lives in this process only. Two processes each holding an
//! `InMemoryStore` do not see each other's locks, so this backend is NOT
//! safe for horizontally scaled deployments; it is the single-process
//! fallback and the test backend.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info};

use super::SharedStore;
use crate::error::CoreResult;

/// Entry in the in-memory store
struct StoreEntry {
    value: String,
    expires_at: Instant,
}

impl StoreEntry {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

type Entries = Arc<RwLock<HashMap<String, StoreEntry>>>;

/// Single-process key/value store with expiry
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Entries,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a background task that drops expired entries every `interval`.
    ///
    /// Reads never return expired values whether or not the sweeper runs.
    pub fn spawn_cleanup(&self, interval: Duration) -> JoinHandle<()> {
        let entries = self.entries.clone();
        info!(interval_ms = interval.as_millis() as u64, "Starting in-memory store sweeper");
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = Self::sweep(&entries).await;
                if removed > 0 {
                    debug!("In-memory store sweeper removed {} expired keys", removed);
                }
            }
        })
    }

    async fn sweep(entries: &Entries) -> usize {
        let mut entries = entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    /// Number of live keys
    pub async fn len(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| !entry.is_expired())
            .count()
    }

    /// Whether the store holds no live keys
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone()))
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<bool> {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| !entry.is_expired()) {
            return Ok(false);
        }
        entries.insert(key.to_string(), StoreEntry::new(value, ttl));
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), StoreEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> CoreResult<bool> {
        let mut entries = self.entries.write().await;
        let matches = entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired() && entry.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
