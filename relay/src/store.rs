use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::{RelayError, Result};
use crate::session::{SerializedSession, SessionId};

/// Durable storage for hibernated or request-scoped sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &SessionId) -> Result<Option<SerializedSession>>;
    async fn save(&self, record: &SerializedSession) -> Result<()>;
    /// Returns whether a record existed.
    async fn delete(&self, id: &SessionId) -> Result<bool>;
}

/// In-process store keeping each record as JSON text.
#[derive(Default)]
pub struct MemorySessionStore {
    records: Mutex<HashMap<SessionId, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// The stored JSON text for `id`, as it would sit in external storage.
    pub fn raw(&self, id: &SessionId) -> Option<String> {
        self.records.lock().get(id).cloned()
    }

    /// Overwrites the stored text directly.
    pub fn put_raw(&self, id: SessionId, text: impl Into<String>) {
        self.records.lock().insert(id, text.into());
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<SerializedSession>> {
        let text = self.records.lock().get(id).cloned();
        match text {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|err| RelayError::Store(format!("corrupt record for '{id}': {err}"))),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &SerializedSession) -> Result<()> {
        let text = serde_json::to_string(record)?;
        self.records.lock().insert(record.session_id.clone(), text);
        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<bool> {
        Ok(self.records.lock().remove(id).is_some())
    }
}
