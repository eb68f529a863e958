use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::adapters::AdapterId;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("method '{0}' not found")]
    MethodNotFound(String),
    #[error("tool '{0}' not found")]
    ToolNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("{adapter} adapter unavailable: {reason}")]
    AdapterUnavailable { adapter: AdapterId, reason: String },
    #[error("{adapter} backend rejected the request")]
    Backend {
        adapter: AdapterId,
        status: Option<u16>,
        detail: Value,
    },
    #[error("network request failed: {0}")]
    Network(String),
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("session '{0}' is hibernating")]
    Hibernating(String),
    #[error("unsupported session record version {0}")]
    UnsupportedRecord(u32),
    #[error("duplicate capability '{0}'")]
    DuplicateCapability(String),
    #[error("session store error: {0}")]
    Store(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn unavailable(adapter: AdapterId, reason: impl Into<String>) -> Self {
        RelayError::AdapterUnavailable {
            adapter,
            reason: reason.into(),
        }
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        RelayError::InvalidParams(detail.into())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
