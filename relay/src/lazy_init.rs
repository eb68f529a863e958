use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::adapters::{AdapterFactory, AdapterId};
use crate::errors::{RelayError, Result};
use crate::session::{AdapterState, Session};

pub const MISSING_CONFIGURATION: &str = "missing configuration";
pub const DISABLED_BY_CONFIGURATION: &str = "disabled by configuration";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Constructs adapters on first use and memoizes them on the session.
#[derive(Clone)]
pub struct LazyInitializer {
    factory: Arc<dyn AdapterFactory>,
    connect_timeout: Duration,
}

impl LazyInitializer {
    pub fn new(factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            factory,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout.max(Duration::from_millis(1));
        self
    }

    /// Ensures `adapter` is ready on `session`.
    ///
    /// A ready adapter is returned untouched. Missing or disabled
    /// configuration fails without any I/O. Failures are recorded on the
    /// adapter only, and the next call retries.
    #[instrument(skip_all, fields(session_id = %session.id(), %adapter))]
    pub async fn ensure(&self, session: &mut Session, adapter: AdapterId) -> Result<()> {
        if session.adapter_state(adapter) == AdapterState::Ready {
            return Ok(());
        }
        if session.is_hibernating() {
            return Err(RelayError::Hibernating(session.id().to_string()));
        }
        if !session.config().is_enabled(adapter) {
            session.mark_failed(adapter, DISABLED_BY_CONFIGURATION);
            return Err(RelayError::unavailable(adapter, DISABLED_BY_CONFIGURATION));
        }
        let Some(settings) = session.config().backend(adapter) else {
            session.mark_failed(adapter, MISSING_CONFIGURATION);
            return Err(RelayError::unavailable(adapter, MISSING_CONFIGURATION));
        };

        let guard = session.begin_initialization(adapter);
        match timeout(self.connect_timeout, self.factory.connect(adapter, &settings)).await {
            Ok(Ok(handle)) => {
                guard.ready(handle);
                info!("adapter ready");
                Ok(())
            }
            Ok(Err(err)) => {
                let reason = failure_reason(&err);
                warn!(%reason, "adapter construction failed");
                guard.fail(&reason);
                Err(RelayError::unavailable(adapter, reason))
            }
            Err(_) => {
                let reason = RelayError::Timeout(self.connect_timeout).to_string();
                warn!(%reason, "adapter construction timed out");
                guard.fail(&reason);
                Err(RelayError::unavailable(adapter, reason))
            }
        }
    }

    /// Ensures every adapter in order, stopping at the first failure.
    pub async fn ensure_all(&self, session: &mut Session, adapters: &[AdapterId]) -> Result<()> {
        for adapter in adapters {
            self.ensure(session, *adapter).await?;
        }
        Ok(())
    }
}

fn failure_reason(err: &RelayError) -> String {
    match err {
        RelayError::AdapterUnavailable { reason, .. } => reason.clone(),
        RelayError::Backend { status, detail, .. } => {
            let message = detail
                .get("message")
                .or_else(|| detail.pointer("/error/message"))
                .and_then(|value| value.as_str())
                .unwrap_or("backend rejected the handshake");
            match status {
                Some(code) => format!("{message} (status {code})"),
                None => message.to_string(),
            }
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::BackendAdapter;
    use crate::config::{BackendSettings, SessionConfig};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    struct EchoAdapter(AdapterId);

    #[async_trait]
    impl BackendAdapter for EchoAdapter {
        fn id(&self) -> AdapterId {
            self.0
        }

        async fn call(&self, operation: &str, args: Value) -> Result<Value> {
            Ok(json!({ "operation": operation, "args": args }))
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        connects: Mutex<HashMap<AdapterId, usize>>,
        failing: Vec<AdapterId>,
        stall: bool,
    }

    #[async_trait]
    impl AdapterFactory for CountingFactory {
        async fn connect(
            &self,
            adapter: AdapterId,
            _settings: &BackendSettings,
        ) -> Result<Arc<dyn BackendAdapter>> {
            *self.connects.lock().entry(adapter).or_default() += 1;
            if self.stall {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if self.failing.contains(&adapter) {
                return Err(RelayError::Network("connection refused".to_string()));
            }
            Ok(Arc::new(EchoAdapter(adapter)))
        }
    }

    fn full_config() -> SessionConfig {
        SessionConfig::from_pairs([
            ("data.url", "http://localhost:8090"),
            ("payment.secret_key", "sk_test"),
            ("notification.api_key", "re_test"),
        ])
    }

    #[tokio::test]
    async fn constructs_each_adapter_at_most_once() {
        let factory = Arc::new(CountingFactory::default());
        let initializer = LazyInitializer::new(factory.clone());
        let mut session = Session::new(Some(full_config()));
        for _ in 0..5 {
            initializer
                .ensure(&mut session, AdapterId::Data)
                .await
                .expect("data adapter");
        }
        assert_eq!(factory.connects.lock()[&AdapterId::Data], 1);
        assert_eq!(session.adapter_state(AdapterId::Data), AdapterState::Ready);
    }

    #[tokio::test]
    async fn missing_configuration_short_circuits() {
        let factory = Arc::new(CountingFactory::default());
        let initializer = LazyInitializer::new(factory.clone());
        let mut session = Session::new(None);
        let err = initializer
            .ensure(&mut session, AdapterId::Payment)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RelayError::AdapterUnavailable { adapter: AdapterId::Payment, ref reason } if reason == MISSING_CONFIGURATION
        ));
        assert!(factory.connects.lock().is_empty());
    }

    #[tokio::test]
    async fn failures_are_isolated_and_retried() {
        let factory = Arc::new(CountingFactory {
            failing: vec![AdapterId::Payment],
            ..Default::default()
        });
        let initializer = LazyInitializer::new(factory.clone());
        let mut session = Session::new(Some(full_config()));

        assert!(initializer.ensure(&mut session, AdapterId::Payment).await.is_err());
        assert!(initializer.ensure(&mut session, AdapterId::Payment).await.is_err());
        initializer
            .ensure(&mut session, AdapterId::Notification)
            .await
            .expect("notification unaffected");

        assert_eq!(factory.connects.lock()[&AdapterId::Payment], 2);
        assert_eq!(
            session.adapter_state(AdapterId::Payment),
            AdapterState::Failed("network request failed: connection refused".to_string())
        );
        assert_eq!(session.adapter_state(AdapterId::Notification), AdapterState::Ready);
    }

    #[tokio::test]
    async fn disabled_adapters_fail_without_connecting() {
        let factory = Arc::new(CountingFactory::default());
        let initializer = LazyInitializer::new(factory.clone());
        let mut config = full_config();
        config.insert("data.enabled", "false");
        let mut session = Session::new(Some(config));
        let err = initializer.ensure(&mut session, AdapterId::Data).await.unwrap_err();
        assert!(err.to_string().contains(DISABLED_BY_CONFIGURATION));
        assert!(factory.connects.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connections_settle_as_failed() {
        let factory = Arc::new(CountingFactory {
            stall: true,
            ..Default::default()
        });
        let initializer =
            LazyInitializer::new(factory).with_connect_timeout(Duration::from_millis(50));
        let mut session = Session::new(Some(full_config()));
        let err = initializer.ensure(&mut session, AdapterId::Data).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(matches!(
            session.adapter_state(AdapterId::Data),
            AdapterState::Failed(_)
        ));
    }
}
