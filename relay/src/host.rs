use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::dispatcher::RpcDispatcher;
use crate::errors::{RelayError, Result};
use crate::rpc::{correlation_id, RpcError, RpcRequest, RpcResponse};
use crate::session::{Session, SessionId};
use crate::store::SessionStore;

/// How long a session lives in memory between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionScope {
    /// Sessions stay live between calls and are hibernated when idle.
    Resident,
    /// Each call restores from the store and persists before returning.
    RequestScoped,
}

#[derive(Debug, Clone)]
pub struct HostReply {
    pub session_id: SessionId,
    pub response: RpcResponse,
    /// Method name when the envelope was valid.
    pub method: Option<String>,
    /// The caller sent no id and expects no reply.
    pub notification: bool,
}

type SessionCell = Arc<AsyncMutex<Option<Session>>>;

/// Owns live sessions and routes raw messages to them.
pub struct SessionHost {
    dispatcher: Arc<RpcDispatcher>,
    store: Arc<dyn SessionStore>,
    scope: SessionScope,
    defaults: SessionConfig,
    live: Mutex<HashMap<SessionId, SessionCell>>,
}

impl SessionHost {
    pub fn new(
        dispatcher: Arc<RpcDispatcher>,
        store: Arc<dyn SessionStore>,
        scope: SessionScope,
    ) -> Self {
        Self {
            dispatcher,
            store,
            scope,
            defaults: SessionConfig::new(),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Configuration seeded into every new session.
    pub fn with_defaults(mut self, defaults: SessionConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn scope(&self) -> SessionScope {
        self.scope
    }

    pub fn dispatcher(&self) -> &RpcDispatcher {
        &self.dispatcher
    }

    /// Number of sessions currently tracked in memory.
    pub fn live_sessions(&self) -> usize {
        self.live.lock().len()
    }

    /// Handles one raw message for `session_id`, creating the session when
    /// the id is absent or unknown.
    #[instrument(skip_all, fields(scope = ?self.scope))]
    pub async fn handle(&self, session_id: Option<&str>, raw: &[u8]) -> HostReply {
        let id = match session_id {
            Some(raw_id) => match SessionId::parse(raw_id) {
                Ok(id) => id,
                Err(err) => {
                    return HostReply {
                        session_id: SessionId::generate(),
                        response: RpcResponse::failure(correlation_id(raw), RpcError::from(err)),
                        method: None,
                        notification: false,
                    }
                }
            },
            None => SessionId::generate(),
        };

        let request = match RpcRequest::parse(raw) {
            Ok(request) => request,
            Err((correlation, error)) => {
                warn!(session_id = %id, code = error.code, "rejected malformed envelope");
                return HostReply {
                    session_id: id,
                    response: RpcResponse::failure(correlation, error),
                    method: None,
                    notification: false,
                };
            }
        };
        let method = request.method.clone();
        let notification = request.notification;
        let correlation = request.id.clone();

        let cell = self.cell(&id);
        let (response, vacant) = {
            // the session never leaves its slot, so a dropped call cannot lose it
            let mut slot = cell.lock().await;
            let response = match self.checkout(&id, &mut slot).await {
                Ok(session) => {
                    let response = self.dispatcher.handle(session, request).await;
                    if self.scope == SessionScope::RequestScoped {
                        self.persist(session).await;
                    }
                    response
                }
                Err(err) => {
                    warn!(session_id = %id, error = %err, "session could not be loaded");
                    RpcResponse::failure(correlation, RpcError::from(err))
                }
            };
            (response, slot.is_none())
        };
        if vacant || self.scope == SessionScope::RequestScoped {
            self.release(&id, &cell);
        }

        HostReply {
            session_id: id,
            response,
            method: Some(method),
            notification,
        }
    }

    /// Hibernates every resident session idle for at least `idle_threshold`.
    /// Busy sessions are skipped. Returns how many were hibernated.
    pub async fn hibernate_idle(&self, now: DateTime<Utc>, idle_threshold: Duration) -> usize {
        let cells: Vec<(SessionId, SessionCell)> = self
            .live
            .lock()
            .iter()
            .map(|(id, cell)| (id.clone(), cell.clone()))
            .collect();

        let mut hibernated = 0;
        for (id, cell) in cells {
            let Ok(mut slot) = cell.try_lock() else {
                continue;
            };
            let Some(session) = slot.as_mut() else {
                self.release(&id, &cell);
                continue;
            };
            if session.is_hibernating() || !session.should_hibernate(now, idle_threshold) {
                continue;
            }
            let record = session.hibernate();
            match self.store.save(&record).await {
                Ok(()) => {
                    if self.release(&id, &cell) {
                        *slot = None;
                    }
                }
                // keep the hibernated copy so the next call can still wake it
                Err(err) => {
                    warn!(session_id = %id, error = %err, "failed to persist hibernated session")
                }
            }
            hibernated += 1;
        }
        if hibernated > 0 {
            info!(count = hibernated, "hibernated idle sessions");
        }
        hibernated
    }

    /// Tears a session down and removes its stored record. Waits for any
    /// in-flight call on the session to finish.
    pub async fn close(&self, id: &SessionId) -> Result<bool> {
        let cell = self.live.lock().remove(id);
        let was_live = match cell {
            Some(cell) => cell.lock().await.take().is_some(),
            None => false,
        };
        let was_stored = self.store.delete(id).await?;
        info!(session_id = %id, was_live, was_stored, "session closed");
        Ok(was_live || was_stored)
    }

    fn cell(&self, id: &SessionId) -> SessionCell {
        self.live
            .lock()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    /// Drops the lock cell of `id` once nobody else holds it. Returns
    /// whether the cell was removed.
    fn release(&self, id: &SessionId, cell: &SessionCell) -> bool {
        let mut live = self.live.lock();
        // one reference in the map, one held by the caller
        if Arc::strong_count(cell) == 2 {
            live.remove(id);
            return true;
        }
        false
    }

    /// Makes the slot hold a usable session: wakes a hibernated one,
    /// restores from the store, or creates a fresh one. On error the slot
    /// is left untouched.
    async fn checkout<'s>(
        &self,
        id: &SessionId,
        slot: &'s mut Option<Session>,
    ) -> Result<&'s mut Session> {
        let loaded = match slot.as_ref() {
            Some(session) if !session.is_hibernating() => None,
            Some(session) => {
                let record = match self.store.load(id).await? {
                    Some(record) => record,
                    None => session.serialize(),
                };
                let restored = Session::restore(record)?;
                debug!(session_id = %id, "session woke from hibernation");
                Some(restored)
            }
            None => match self.store.load(id).await? {
                Some(record) => {
                    let restored = Session::restore(record)?;
                    debug!(session_id = %id, "session restored from store");
                    Some(restored)
                }
                None => {
                    let initial = (!self.defaults.is_empty()).then(|| self.defaults.clone());
                    info!(session_id = %id, "session created");
                    Some(Session::with_id(id.clone(), initial))
                }
            },
        };
        if let Some(session) = loaded {
            *slot = Some(session);
        }
        slot.as_mut()
            .ok_or_else(|| RelayError::Internal(format!("session '{id}' vanished from its slot")))
    }

    async fn persist(&self, session: &Session) {
        if let Err(err) = self.store.save(&session.serialize()).await {
            warn!(session_id = %session.id(), error = %err, "failed to persist session");
        }
    }
}
