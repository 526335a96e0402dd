//! Shared store and lock manager selection
//!
//! The backend is chosen once at start-up from `SHARED_STORE_URL`:
//! `memory://` keeps everything in this process, `redis://` (with the
//! `redis` feature) shares locks and flow state across processes.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use turnstile_core::{InMemoryStore, LockConfig, LockManager, SharedStore};

use crate::error::{ServerError, ServerResult};

/// How often the in-memory store sweeps expired entries
const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Create the shared store named by `url`
pub async fn create_shared_store(url: &str) -> ServerResult<Arc<dyn SharedStore>> {
    if url.starts_with("memory://") {
        info!("Using in-memory shared store");
        let store = InMemoryStore::new();
        store.spawn_cleanup(MEMORY_SWEEP_INTERVAL);
        return Ok(Arc::new(store));
    }

    if url.starts_with("redis://") || url.starts_with("rediss://") {
        return create_redis_store(url).await;
    }

    Err(ServerError::ConfigurationError(format!(
        "Unsupported shared store URL: {}",
        url
    )))
}

#[cfg(feature = "redis")]
async fn create_redis_store(url: &str) -> ServerResult<Arc<dyn SharedStore>> {
    info!("Using Redis shared store");
    let store = redis::RedisStore::connect(url).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn create_redis_store(url: &str) -> ServerResult<Arc<dyn SharedStore>> {
    tracing::error!("Redis shared store requested but the redis feature is not enabled");
    Err(ServerError::ConfigurationError(format!(
        "{} requires the redis feature",
        url
    )))
}

/// Build the lock manager for `store`
///
/// A memory store only serializes this process, so it gets the local lock
/// manager. A remote store that fails its health check also falls back to
/// local locks, which no longer protect conversations across processes.
pub async fn create_lock_manager(store: &Arc<dyn SharedStore>, config: LockConfig) -> LockManager {
    if store.kind() == "memory" {
        return LockManager::local(config);
    }

    match store.health_check().await {
        Ok(true) => LockManager::distributed(store.clone(), config),
        Ok(false) => {
            warn!(store = store.kind(), "Shared store unhealthy at start-up, using process-local locks");
            LockManager::local(config)
        }
        Err(e) => {
            warn!(store = store.kind(), error = %e, "Shared store unreachable at start-up, using process-local locks");
            LockManager::local(config)
        }
    }
}

/// Redis-backed shared store
#[cfg(feature = "redis")]
pub mod redis {
    use async_trait::async_trait;
    use redis::aio::ConnectionManager;
    use redis::{Client, RedisError, Script};
    use std::time::Duration;
    use tracing::{debug, info};

    use turnstile_core::{CoreError, CoreResult, SharedStore};

    use crate::error::{ServerError, ServerResult};

    const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

    fn unavailable(op: &str, err: RedisError) -> CoreError {
        CoreError::StoreUnavailable(format!("Redis {} error: {}", op, err))
    }

    fn ttl_ms(ttl: Duration) -> u64 {
        (ttl.as_millis() as u64).max(1)
    }

    /// Shared store over a multiplexed Redis connection
    #[derive(Clone)]
    pub struct RedisStore {
        conn: ConnectionManager,
        compare_and_delete: Script,
    }

    impl RedisStore {
        /// Connect to `url`
        pub async fn connect(url: &str) -> ServerResult<Self> {
            let client = Client::open(url)
                .map_err(|e| ServerError::StoreError(format!("Invalid Redis URL: {}", e)))?;
            let conn = ConnectionManager::new(client)
                .await
                .map_err(|e| ServerError::StoreError(format!("Redis connection error: {}", e)))?;
            info!("Connected to Redis shared store");
            Ok(Self {
                conn,
                compare_and_delete: Script::new(COMPARE_AND_DELETE),
            })
        }
    }

    #[async_trait]
    impl SharedStore for RedisStore {
        async fn get(&self, key: &str) -> CoreResult<Option<String>> {
            let mut conn = self.conn.clone();
            redis::cmd("GET")
                .arg(key)
                .query_async::<_, Option<String>>(&mut conn)
                .await
                .map_err(|e| unavailable("get", e))
        }

        async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<bool> {
            let mut conn = self.conn.clone();
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms(ttl))
                .query_async(&mut conn)
                .await
                .map_err(|e| unavailable("set nx", e))?;
            debug!(key, acquired = reply.is_some(), "SET NX");
            Ok(reply.is_some())
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<()> {
            let mut conn = self.conn.clone();
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms(ttl))
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| unavailable("set", e))
        }

        async fn delete(&self, key: &str) -> CoreResult<()> {
            let mut conn = self.conn.clone();
            redis::cmd("DEL")
                .arg(key)
                .query_async::<_, i64>(&mut conn)
                .await
                .map(|_| ())
                .map_err(|e| unavailable("del", e))
        }

        async fn delete_if_equals(&self, key: &str, expected: &str) -> CoreResult<bool> {
            let mut conn = self.conn.clone();
            let removed: i64 = self
                .compare_and_delete
                .key(key)
                .arg(expected)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| unavailable("compare-and-delete", e))?;
            Ok(removed == 1)
        }

        fn kind(&self) -> &'static str {
            "redis"
        }

        async fn health_check(&self) -> CoreResult<bool> {
            let mut conn = self.conn.clone();
            let pong: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| unavailable("ping", e))?;
            Ok(pong == "PONG")
        }
    }
}
