//! Per-conversation mutual exclusion
//!
//! Two backends, chosen when the manager is built:
//!
//! * **distributed**: set-if-absent on a [`SharedStore`] with a random
//!   holder token and an expiry, polled until the timeout elapses. Release is
//!   a compare-and-delete on the token, so a holder whose lock already
//!   expired and was taken by someone else cannot remove the new lock.
//! * **local**: a FIFO waiter queue per key inside this process. This backend
//!   is NOT safe across processes and exists only as the degraded mode for
//!   deployments without a reachable shared store.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{self, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::store::SharedStore;

/// Lock timing configuration
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// How long `acquire` waits before failing
    pub timeout: Duration,

    /// Polling interval of the distributed backend
    pub retry_interval: Duration,

    /// Expiry of a distributed lock, bounding how long a crashed holder blocks a conversation
    pub ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            retry_interval: Duration::from_millis(50),
            ttl: Duration::from_millis(5000),
        }
    }
}

type LocalSlots = Arc<DashMap<String, Arc<Mutex<()>>>>;

enum Backend {
    Distributed(Arc<dyn SharedStore>),
    Local(LocalSlots),
}

/// Acquires and releases named locks
pub struct LockManager {
    backend: Backend,
    config: LockConfig,
}

impl LockManager {
    /// Lock manager backed by a shared store, safe across processes
    pub fn distributed(store: Arc<dyn SharedStore>, config: LockConfig) -> Self {
        debug!(store = store.kind(), "Creating distributed lock manager");
        Self {
            backend: Backend::Distributed(store),
            config,
        }
    }

    /// Process-local lock manager. Not safe across multiple processes.
    pub fn local(config: LockConfig) -> Self {
        warn!("Using process-local conversation locks; concurrent processes will not be serialized");
        Self {
            backend: Backend::Local(Arc::new(DashMap::new())),
            config,
        }
    }

    /// Whether locks are visible to other processes
    pub fn is_distributed(&self) -> bool {
        matches!(self.backend, Backend::Distributed(_))
    }

    /// Configured timing
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire `key` within the configured timeout
    pub async fn acquire(&self, key: &str) -> CoreResult<LockGuard> {
        self.acquire_with_timeout(key, self.config.timeout).await
    }

    /// Acquire `key`, failing with `LockAcquisitionTimeout` once `timeout` elapses
    pub async fn acquire_with_timeout(&self, key: &str, timeout: Duration) -> CoreResult<LockGuard> {
        match &self.backend {
            Backend::Distributed(store) => self.acquire_distributed(store, key, timeout).await,
            Backend::Local(slots) => Self::acquire_local(slots, key, timeout).await,
        }
    }

    async fn acquire_distributed(
        &self,
        store: &Arc<dyn SharedStore>,
        key: &str,
        timeout: Duration,
    ) -> CoreResult<LockGuard> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if store.set_nx(key, &token, self.config.ttl).await? {
                debug!(key, attempts, "Acquired distributed lock");
                return Ok(LockGuard {
                    key: key.to_string(),
                    held: Some(Held::Distributed {
                        store: store.clone(),
                        token,
                    }),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(key, attempts, "Distributed lock acquisition timed out");
                return Err(timeout_error(key, timeout));
            }
            time::sleep(self.config.retry_interval.min(deadline - now)).await;
        }
    }

    async fn acquire_local(slots: &LocalSlots, key: &str, timeout: Duration) -> CoreResult<LockGuard> {
        let slot = slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        match time::timeout(timeout, slot.lock_owned()).await {
            Ok(guard) => {
                debug!(key, "Acquired local lock");
                Ok(LockGuard {
                    key: key.to_string(),
                    held: Some(Held::Local {
                        guard,
                        slots: slots.clone(),
                    }),
                })
            }
            Err(_) => {
                forget_idle_slot(slots, key);
                Err(timeout_error(key, timeout))
            }
        }
    }
}

fn timeout_error(key: &str, timeout: Duration) -> CoreError {
    CoreError::LockAcquisitionTimeout {
        key: key.to_string(),
        timeout_ms: timeout.as_millis() as u64,
    }
}

/// Drop the queue for `key` once nobody holds or waits on it
fn forget_idle_slot(slots: &LocalSlots, key: &str) {
    slots.remove_if(key, |_, slot| Arc::strong_count(slot) == 1);
}

enum Held {
    Distributed {
        store: Arc<dyn SharedStore>,
        token: String,
    },
    Local {
        guard: OwnedMutexGuard<()>,
        slots: LocalSlots,
    },
}

/// Scoped ownership of a lock
///
/// Call [`LockGuard::release`] to release and observe the outcome. A guard
/// dropped without `release` still releases: local locks immediately,
/// distributed locks on a spawned task (or by expiry when no runtime is
/// available).
pub struct LockGuard {
    key: String,
    held: Option<Held>,
}

impl LockGuard {
    /// Key this guard holds
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock. Returns `false` when a distributed lock had already
    /// expired and been taken by another holder.
    pub async fn release(mut self) -> CoreResult<bool> {
        match self.held.take() {
            Some(held) => release_held(&self.key, held).await,
            None => Ok(false),
        }
    }
}

async fn release_held(key: &str, held: Held) -> CoreResult<bool> {
    match held {
        Held::Distributed { store, token } => {
            let released = store.delete_if_equals(key, &token).await?;
            if released {
                debug!(key, "Released distributed lock");
            } else {
                warn!(key, "Lock expired before release and is now held by someone else");
            }
            Ok(released)
        }
        Held::Local { guard, slots } => {
            drop(guard);
            forget_idle_slot(&slots, key);
            debug!(key, "Released local lock");
            Ok(true)
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };

        match held {
            Held::Local { guard, slots } => {
                drop(guard);
                forget_idle_slot(&slots, &self.key);
            }
            distributed @ Held::Distributed { .. } => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let key = std::mem::take(&mut self.key);
                    handle.spawn(async move {
                        if let Err(e) = release_held(&key, distributed).await {
                            warn!(key = %key, error = %e, "Deferred lock release failed, lock will expire");
                        }
                    });
                }
                Err(_) => {
                    warn!(key = %self.key, "No runtime to release lock on drop, lock will expire");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn fast_config() -> LockConfig {
        LockConfig {
            timeout: Duration::from_millis(200),
            retry_interval: Duration::from_millis(10),
            ttl: Duration::from_millis(200),
        }
    }

    fn managers() -> Vec<LockManager> {
        vec![
            LockManager::distributed(Arc::new(InMemoryStore::new()), fast_config()),
            LockManager::local(fast_config()),
        ]
    }

    #[tokio::test]
    async fn test_second_acquire_times_out_while_held() {
        for manager in managers() {
            let guard = manager.acquire("lock:b:c").await.unwrap();

            let err = manager
                .acquire_with_timeout("lock:b:c", Duration::from_millis(50))
                .await
                .err()
                .unwrap();
            assert_eq!(
                err,
                CoreError::LockAcquisitionTimeout {
                    key: "lock:b:c".to_string(),
                    timeout_ms: 50,
                }
            );

            assert!(guard.release().await.unwrap());
            let again = manager.acquire("lock:b:c").await.unwrap();
            assert_eq!(again.key(), "lock:b:c");
        }
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        for manager in managers() {
            let _a = manager.acquire("lock:b:1").await.unwrap();
            let b = manager
                .acquire_with_timeout("lock:b:2", Duration::from_millis(10))
                .await;
            assert!(b.is_ok());
        }
    }

    #[tokio::test]
    async fn test_waiter_is_woken_on_release() {
        for manager in managers() {
            let manager = Arc::new(manager);
            let guard = manager.acquire("lock:b:c").await.unwrap();

            let waiter = {
                let manager = manager.clone();
                tokio::spawn(async move { manager.acquire("lock:b:c").await.map(|g| g.key().to_string()) })
            };

            time::sleep(Duration::from_millis(30)).await;
            guard.release().await.unwrap();

            assert_eq!(waiter.await.unwrap().unwrap(), "lock:b:c");
        }
    }

    #[tokio::test]
    async fn test_drop_releases_lock() {
        for manager in managers() {
            {
                let _guard = manager.acquire("lock:b:c").await.unwrap();
            }
            // Let a deferred distributed release run
            time::sleep(Duration::from_millis(20)).await;
            assert!(manager.acquire("lock:b:c").await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_stale_holder_cannot_release_new_lock() {
        let store = Arc::new(InMemoryStore::new());
        let config = LockConfig {
            timeout: Duration::from_millis(200),
            retry_interval: Duration::from_millis(10),
            ttl: Duration::from_millis(30),
        };
        let manager = LockManager::distributed(store.clone(), config);

        let stale = manager.acquire("lock:b:c").await.unwrap();
        time::sleep(Duration::from_millis(50)).await;

        let fresh = manager.acquire("lock:b:c").await.unwrap();
        assert!(!stale.release().await.unwrap());
        assert!(store.get("lock:b:c").await.unwrap().is_some());

        assert!(fresh.release().await.unwrap());
        assert!(store.get("lock:b:c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_slots_are_forgotten_when_idle() {
        let slots: LocalSlots = Arc::new(DashMap::new());
        let guard = LockManager::acquire_local(&slots, "k", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(slots.len(), 1);

        guard.release().await.unwrap();
        assert!(slots.is_empty());
    }
}
