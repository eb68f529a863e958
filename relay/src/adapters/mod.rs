//! Thin clients for the external backends a session wraps.
//!
//! Every backend is reached through the narrow [`BackendAdapter`] interface;
//! the lazy initializer only ever talks to an [`AdapterFactory`].

pub mod data;
pub mod http;
pub mod notification;
pub mod payment;

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::BackendSettings;
use crate::errors::Result;

pub use data::DataAdapter;
pub use notification::NotificationAdapter;
pub use payment::PaymentAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterId {
    Data,
    Payment,
    Notification,
}

impl AdapterId {
    pub const ALL: [AdapterId; 3] = [AdapterId::Data, AdapterId::Payment, AdapterId::Notification];

    pub fn as_str(self) -> &'static str {
        match self {
            AdapterId::Data => "data",
            AdapterId::Payment => "payment",
            AdapterId::Notification => "notification",
        }
    }

    pub fn config_prefix(self) -> &'static str {
        self.as_str()
    }

    pub fn required_keys(self) -> &'static [&'static str] {
        match self {
            AdapterId::Data => &["url"],
            AdapterId::Payment => &["secret_key"],
            AdapterId::Notification => &["api_key"],
        }
    }
}

impl Display for AdapterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live connection to one backend, exclusively owned by one session.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn id(&self) -> AdapterId;

    async fn call(&self, operation: &str, args: Value) -> Result<Value>;
}

/// Builds adapters from configuration. Construction may perform network I/O.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn connect(
        &self,
        adapter: AdapterId,
        settings: &BackendSettings,
    ) -> Result<Arc<dyn BackendAdapter>>;
}

/// Production factory connecting to the real HTTP backends.
#[derive(Debug, Clone)]
pub struct HttpAdapterFactory {
    request_timeout: Duration,
}

impl HttpAdapterFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Default for HttpAdapterFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl AdapterFactory for HttpAdapterFactory {
    async fn connect(
        &self,
        adapter: AdapterId,
        settings: &BackendSettings,
    ) -> Result<Arc<dyn BackendAdapter>> {
        let handle: Arc<dyn BackendAdapter> = match adapter {
            AdapterId::Data => Arc::new(DataAdapter::connect(settings, self.request_timeout).await?),
            AdapterId::Payment => {
                Arc::new(PaymentAdapter::connect(settings, self.request_timeout).await?)
            }
            AdapterId::Notification => {
                Arc::new(NotificationAdapter::connect(settings, self.request_timeout).await?)
            }
        };
        Ok(handle)
    }
}
