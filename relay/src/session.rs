use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapters::{AdapterId, BackendAdapter};
use crate::config::SessionConfig;
use crate::errors::{RelayError, Result};

pub const SESSION_RECORD_VERSION: u32 = 1;
const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts caller supplied identifiers made of visible ASCII characters.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_SESSION_ID_LEN {
            return Err(RelayError::InvalidRequest(format!(
                "session id must be 1..={MAX_SESSION_ID_LEN} characters"
            )));
        }
        if !trimmed.chars().all(|ch| ch.is_ascii_graphic()) {
            return Err(RelayError::InvalidRequest(
                "session id must contain visible ascii characters only".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    ConfigLoaded,
    PartiallyReady,
    Ready,
    Hibernating,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AdapterState {
    NotStarted,
    InProgress,
    Ready,
    Failed(String),
}

impl AdapterState {
    pub fn is_ready(&self) -> bool {
        matches!(self, AdapterState::Ready)
    }

    /// The state a persisted record may claim. Live handles never travel, so
    /// neither `Ready` nor `InProgress` survives serialization.
    fn portable(&self) -> AdapterState {
        match self {
            AdapterState::Failed(reason) => AdapterState::Failed(reason.clone()),
            _ => AdapterState::NotStarted,
        }
    }
}

/// The persistence record written to external durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedSession {
    pub format_version: u32,
    pub session_id: SessionId,
    pub configuration: SessionConfig,
    pub initialization_state: BTreeMap<AdapterId, AdapterState>,
    pub created_at: DateTime<Utc>,
    pub last_active_timestamp: DateTime<Utc>,
}

/// Introspection view of a session; configuration values are not exposed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub phase: SessionPhase,
    pub adapters: BTreeMap<AdapterId, AdapterState>,
    pub configured_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

struct AdapterSlot {
    state: AdapterState,
    handle: Option<Arc<dyn BackendAdapter>>,
}

impl AdapterSlot {
    fn idle() -> Self {
        Self {
            state: AdapterState::NotStarted,
            handle: None,
        }
    }
}

/// One logical client conversation: configuration, adapter handles and
/// activity tracking.
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    config_loaded: bool,
    phase: SessionPhase,
    adapters: BTreeMap<AdapterId, AdapterSlot>,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
}

impl Session {
    /// Creates a session. Supplying configuration moves it straight to
    /// `ConfigLoaded`; no connection is attempted here.
    pub fn new(initial: Option<SessionConfig>) -> Self {
        Self::with_id(SessionId::generate(), initial)
    }

    pub fn with_id(id: SessionId, initial: Option<SessionConfig>) -> Self {
        let now = Utc::now();
        let config_loaded = initial.is_some();
        let adapters = AdapterId::ALL
            .into_iter()
            .map(|adapter| (adapter, AdapterSlot::idle()))
            .collect();
        Self {
            id,
            config: initial.unwrap_or_default(),
            config_loaded,
            phase: if config_loaded {
                SessionPhase::ConfigLoaded
            } else {
                SessionPhase::Uninitialized
            },
            adapters,
            created_at: now,
            last_active: now,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    pub fn is_hibernating(&self) -> bool {
        self.phase == SessionPhase::Hibernating
    }

    pub fn adapter_state(&self, adapter: AdapterId) -> AdapterState {
        self.adapters
            .get(&adapter)
            .map(|slot| slot.state.clone())
            .unwrap_or(AdapterState::NotStarted)
    }

    pub fn adapter_states(&self) -> BTreeMap<AdapterId, AdapterState> {
        self.adapters
            .iter()
            .map(|(adapter, slot)| (*adapter, slot.state.clone()))
            .collect()
    }

    /// The live handle for a ready adapter.
    pub fn adapter(&self, adapter: AdapterId) -> Result<Arc<dyn BackendAdapter>> {
        self.adapters
            .get(&adapter)
            .and_then(|slot| slot.handle.clone())
            .ok_or_else(|| RelayError::unavailable(adapter, "adapter is not initialized"))
    }

    /// Merges configuration; later keys win. Adapters already `Ready` keep
    /// their handles.
    pub fn apply_configuration(&mut self, config: &SessionConfig) -> Result<()> {
        if self.is_hibernating() {
            return Err(RelayError::Hibernating(self.id.to_string()));
        }
        self.config.merge(config);
        self.config_loaded = true;
        self.refresh_phase();
        debug!(session_id = %self.id, keys = config.len(), "configuration applied");
        Ok(())
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.clone(),
            phase: self.phase,
            adapters: self.adapter_states(),
            configured_keys: self.config.keys().map(str::to_string).collect(),
            created_at: self.created_at,
            last_active: self.last_active,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_active {
            self.last_active = now;
        }
    }

    pub fn should_hibernate(&self, now: DateTime<Utc>, idle_threshold: Duration) -> bool {
        should_hibernate(self.last_active, now, idle_threshold)
    }

    pub fn serialize(&self) -> SerializedSession {
        SerializedSession {
            format_version: SESSION_RECORD_VERSION,
            session_id: self.id.clone(),
            configuration: self.config.clone(),
            initialization_state: self
                .adapters
                .iter()
                .map(|(adapter, slot)| (*adapter, slot.state.portable()))
                .collect(),
            created_at: self.created_at,
            last_active_timestamp: self.last_active,
        }
    }

    /// Produces the persistence record and releases every live handle.
    pub fn hibernate(&mut self) -> SerializedSession {
        let record = self.serialize();
        for slot in self.adapters.values_mut() {
            *slot = AdapterSlot::idle();
        }
        self.phase = SessionPhase::Hibernating;
        debug!(session_id = %self.id, "session hibernated");
        record
    }

    /// Rebuilds a session from a persistence record. Every adapter starts
    /// over at `NotStarted`.
    pub fn restore(record: SerializedSession) -> Result<Self> {
        if record.format_version != SESSION_RECORD_VERSION {
            return Err(RelayError::UnsupportedRecord(record.format_version));
        }
        let id = SessionId::parse(record.session_id.as_str())?;
        let mut session = Session::with_id(id, Some(record.configuration));
        session.created_at = record.created_at;
        session.last_active = record.last_active_timestamp;
        Ok(session)
    }

    /// Replaces this session wholesale; on error the current state is kept.
    pub fn restore_from(&mut self, record: SerializedSession) -> Result<()> {
        *self = Session::restore(record)?;
        Ok(())
    }

    pub(crate) fn mark_failed(&mut self, adapter: AdapterId, reason: &str) {
        let slot = self.adapters.entry(adapter).or_insert_with(AdapterSlot::idle);
        slot.handle = None;
        slot.state = AdapterState::Failed(reason.to_string());
        self.refresh_phase();
    }

    /// Marks `adapter` as `InProgress`. The returned guard settles the slot
    /// as `Ready` or `Failed`; dropping it unsettled records an interruption.
    pub(crate) fn begin_initialization(&mut self, adapter: AdapterId) -> InitializationGuard<'_> {
        let slot = self.adapters.entry(adapter).or_insert_with(AdapterSlot::idle);
        slot.state = AdapterState::InProgress;
        InitializationGuard {
            session: self,
            adapter,
            settled: false,
        }
    }

    fn refresh_phase(&mut self) {
        if self.is_hibernating() {
            return;
        }
        let ready = self
            .adapters
            .values()
            .filter(|slot| slot.state.is_ready())
            .count();
        let configured = AdapterId::ALL
            .into_iter()
            .filter(|adapter| {
                self.config.is_enabled(*adapter) && self.config.backend(*adapter).is_some()
            })
            .count();
        self.phase = if ready == 0 {
            if self.config_loaded {
                SessionPhase::ConfigLoaded
            } else {
                SessionPhase::Uninitialized
            }
        } else if ready >= configured {
            SessionPhase::Ready
        } else {
            SessionPhase::PartiallyReady
        };
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("config", &self.config)
            .field("adapters", &self.adapter_states())
            .field("last_active", &self.last_active)
            .finish()
    }
}

pub(crate) struct InitializationGuard<'a> {
    session: &'a mut Session,
    adapter: AdapterId,
    settled: bool,
}

impl InitializationGuard<'_> {
    pub(crate) fn ready(mut self, handle: Arc<dyn BackendAdapter>) {
        let adapter = self.adapter;
        let slot = self
            .session
            .adapters
            .entry(adapter)
            .or_insert_with(AdapterSlot::idle);
        slot.state = AdapterState::Ready;
        slot.handle = Some(handle);
        self.settled = true;
        self.session.refresh_phase();
    }

    pub(crate) fn fail(mut self, reason: &str) {
        self.settled = true;
        self.session.mark_failed(self.adapter, reason);
    }
}

impl Drop for InitializationGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(session_id = %self.session.id, adapter = %self.adapter, "adapter initialization interrupted");
            self.session
                .mark_failed(self.adapter, "initialization interrupted");
        }
    }
}

/// Pure idle predicate: `now - last_active >= idle_threshold`. A clock that
/// runs backwards never reports idleness.
pub fn should_hibernate(
    last_active: DateTime<Utc>,
    now: DateTime<Utc>,
    idle_threshold: Duration,
) -> bool {
    match (now - last_active).to_std() {
        Ok(idle) => idle >= idle_threshold,
        Err(_) => false,
    }
}
