use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay::{
    AdapterFactory, AdapterId, BackendAdapter, BackendSettings, DispatcherOptions, LazyInitializer,
    MemorySessionStore, RelayError, Result, RpcDispatcher, SessionHost, SessionScope,
};
use serde_json::{json, Value};

/// Adapter that answers every operation with what it was asked.
pub struct SpyAdapter {
    id: AdapterId,
    generation: usize,
    delay: Arc<Mutex<Duration>>,
}

#[async_trait]
impl BackendAdapter for SpyAdapter {
    fn id(&self) -> AdapterId {
        self.id
    }

    async fn call(&self, operation: &str, args: Value) -> Result<Value> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(json!({
            "id": format!("{}_{}", self.id, self.generation),
            "adapter": self.id,
            "operation": operation,
            "generation": self.generation,
            "args": args,
        }))
    }
}

/// Factory counting constructions per adapter, optionally refusing some.
#[derive(Default)]
pub struct SpyFactory {
    constructions: Mutex<HashMap<AdapterId, usize>>,
    refused: Mutex<Vec<AdapterId>>,
    call_delay: Arc<Mutex<Duration>>,
}

impl SpyFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse(&self, adapter: AdapterId) {
        self.refused.lock().push(adapter);
    }

    /// Delays every adapter call, including on adapters already built.
    pub fn delay_calls(&self, delay: Duration) {
        *self.call_delay.lock() = delay;
    }

    pub fn constructions(&self, adapter: AdapterId) -> usize {
        self.constructions.lock().get(&adapter).copied().unwrap_or(0)
    }

    pub fn total_constructions(&self) -> usize {
        self.constructions.lock().values().sum()
    }
}

#[async_trait]
impl AdapterFactory for SpyFactory {
    async fn connect(
        &self,
        adapter: AdapterId,
        _settings: &BackendSettings,
    ) -> Result<Arc<dyn BackendAdapter>> {
        let generation = {
            let mut constructions = self.constructions.lock();
            let count = constructions.entry(adapter).or_default();
            *count += 1;
            *count
        };
        if self.refused.lock().contains(&adapter) {
            return Err(RelayError::unavailable(adapter, "connection refused"));
        }
        Ok(Arc::new(SpyAdapter {
            id: adapter,
            generation,
            delay: self.call_delay.clone(),
        }))
    }
}

pub fn dispatcher(factory: Arc<SpyFactory>) -> anyhow::Result<RpcDispatcher> {
    Ok(RpcDispatcher::new(
        Arc::new(relay::default_registry()?),
        LazyInitializer::new(factory),
    ))
}

pub fn host(
    factory: Arc<SpyFactory>,
    store: Arc<MemorySessionStore>,
    scope: SessionScope,
) -> anyhow::Result<SessionHost> {
    Ok(SessionHost::new(Arc::new(dispatcher(factory)?), store, scope))
}

/// Host whose sessions accept `session/configure`.
pub fn configurable_host(
    factory: Arc<SpyFactory>,
    store: Arc<MemorySessionStore>,
    scope: SessionScope,
) -> anyhow::Result<SessionHost> {
    let dispatcher = dispatcher(factory)?.with_options(DispatcherOptions {
        allow_remote_configuration: true,
        ..DispatcherOptions::default()
    });
    Ok(SessionHost::new(Arc::new(dispatcher), store, scope))
}

pub fn envelope(id: i64, method: &str, params: Value) -> Vec<u8> {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
        .to_string()
        .into_bytes()
}

pub fn tool_call(id: i64, name: &str, arguments: Value) -> Vec<u8> {
    envelope(id, "tools/call", json!({ "name": name, "arguments": arguments }))
}
