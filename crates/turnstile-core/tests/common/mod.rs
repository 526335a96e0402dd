//! Fakes shared by the router integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use turnstile_core::{
    BotConfig, BotConfigResolver, ConfigProvider, CoreError, CoreResult, FlowEngine,
    FlowEngineConfig, FlowStateStore, InMemoryStore, InboundEvent, LockConfig, LockManager,
    Router, SharedStore, TraditionalEngine, Transport,
};

/// Store wrapper remembering every key that was read or written
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemoryStore,
    touched: Mutex<Vec<String>>,
}

impl RecordingStore {
    fn touch(&self, key: &str) {
        self.touched.lock().unwrap().push(key.to_string());
    }

    /// Keys touched that start with `prefix`
    pub fn touched_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.touched
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SharedStore for RecordingStore {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        self.touch(key);
        self.inner.get(key).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<bool> {
        self.touch(key);
        self.inner.set_nx(key, value, ttl).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<()> {
        self.touch(key);
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.touch(key);
        self.inner.delete(key).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> CoreResult<bool> {
        self.touch(key);
        self.inner.delete_if_equals(key, expected).await
    }

    fn kind(&self) -> &'static str {
        "recording"
    }
}

/// Config provider over a fixed map
#[derive(Default)]
pub struct MapProvider {
    configs: Mutex<HashMap<String, BotConfig>>,
}

impl MapProvider {
    pub fn with_bot(config: BotConfig) -> Self {
        let provider = Self::default();
        provider
            .configs
            .lock()
            .unwrap()
            .insert(config.bot_id.clone(), config);
        provider
    }
}

#[async_trait]
impl ConfigProvider for MapProvider {
    async fn get_bot_config(&self, bot_id: &str) -> CoreResult<Option<BotConfig>> {
        Ok(self.configs.lock().unwrap().get(bot_id).cloned())
    }
}

/// Transport that measures how many sends overlap
#[derive(Default)]
pub struct MeteredTransport {
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub fail: AtomicBool,
    pub delay_ms: AtomicUsize,
}

#[async_trait]
impl Transport for MeteredTransport {
    async fn send_welcome(
        &self,
        bot_id: &str,
        _channel_token: Option<&str>,
        _config: &BotConfig,
        conversation_id: &str,
        event: &InboundEvent,
    ) -> CoreResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst) as u64;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CoreError::TransportError("upstream returned 502".to_string()));
        }
        Ok(json!({
            "bot": bot_id,
            "conversation": conversation_id,
            "text": event.text,
        }))
    }
}

pub fn bot(enabled: Value, steps: Value) -> BotConfig {
    BotConfig {
        bot_id: "bot".to_string(),
        flow_enabled: enabled,
        flow_steps: steps,
        ..Default::default()
    }
}

pub fn lock_config(timeout_ms: u64) -> LockConfig {
    LockConfig {
        timeout: Duration::from_millis(timeout_ms),
        retry_interval: Duration::from_millis(5),
        ttl: Duration::from_secs(10),
    }
}

pub struct Harness {
    pub router: Arc<Router>,
    pub store: Arc<RecordingStore>,
    pub transport: Arc<MeteredTransport>,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Which lock backend a harness runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockBackend {
    Distributed,
    Local,
}

pub fn harness(config: BotConfig, locks: LockConfig) -> Harness {
    harness_with(config, locks, LockBackend::Distributed)
}

pub fn harness_with(config: BotConfig, locks: LockConfig, backend: LockBackend) -> Harness {
    init_tracing();
    let store = Arc::new(RecordingStore::default());
    let transport = Arc::new(MeteredTransport::default());
    let resolver = Arc::new(BotConfigResolver::new(
        Arc::new(MapProvider::with_bot(config)),
        Duration::from_secs(60),
    ));

    let engine_config = FlowEngineConfig::default();
    let flow = FlowEngine::new(
        FlowStateStore::new(store.clone(), engine_config.state_ttl),
        resolver.clone(),
        engine_config,
    );
    let traditional = TraditionalEngine::new(resolver, transport.clone());
    let lock_manager = match backend {
        LockBackend::Distributed => LockManager::distributed(store.clone(), locks),
        LockBackend::Local => LockManager::local(locks),
    };
    let router = Router::new(
        Arc::new(lock_manager),
        Arc::new(flow),
        Arc::new(traditional),
    );

    Harness {
        router: Arc::new(router),
        store,
        transport,
    }
}
