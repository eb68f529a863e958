use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

use serde::{Deserialize, Serialize};

use crate::adapters::AdapterId;
use crate::errors::{RelayError, Result};

/// Environment variables that seed a session configuration, paired with the
/// dotted key they populate.
pub const KNOWN_KEYS: &[(&str, &str)] = &[
    ("DATA_URL", "data.url"),
    ("DATA_IDENTITY", "data.identity"),
    ("DATA_PASSWORD", "data.password"),
    ("DATA_AUTH_COLLECTION", "data.auth_collection"),
    ("DATA_ENABLED", "data.enabled"),
    ("PAYMENT_SECRET_KEY", "payment.secret_key"),
    ("PAYMENT_API_BASE", "payment.api_base"),
    ("PAYMENT_ENABLED", "payment.enabled"),
    ("NOTIFICATION_API_KEY", "notification.api_key"),
    ("NOTIFICATION_FROM", "notification.from"),
    ("NOTIFICATION_API_BASE", "notification.api_base"),
    ("NOTIFICATION_ENABLED", "notification.enabled"),
];

const SECRET_MARKERS: &[&str] = &["secret", "password", "key", "token"];

/// Flat key/value configuration owned by a single session.
///
/// Keys are dotted (`payment.secret_key`). Applying configuration never
/// performs I/O; connections are only attempted by the lazy initializer.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionConfig(BTreeMap<String, String>);

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = Self::new();
        for (key, value) in pairs {
            config.insert(key, value);
        }
        config
    }

    /// Reads every entry of [`KNOWN_KEYS`] through `lookup`, skipping blanks.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new();
        for (variable, key) in KNOWN_KEYS {
            if let Some(value) = lookup(variable) {
                if !value.trim().is_empty() {
                    config.insert(*key, value.trim());
                }
            }
        }
        config
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Parses a JSON object of scalar values. Nested values are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| RelayError::invalid_params("configuration must be an object"))?;
        let mut config = Self::new();
        for (key, value) in object {
            let text = match value {
                serde_json::Value::String(text) => text.clone(),
                serde_json::Value::Bool(flag) => flag.to_string(),
                serde_json::Value::Number(number) => number.to_string(),
                _ => {
                    return Err(RelayError::invalid_params(format!(
                        "configuration value for '{key}' must be a scalar"
                    )))
                }
            };
            config.insert(key.as_str(), text);
        }
        Ok(config)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            return;
        }
        self.0.insert(key, value.into());
    }

    /// Merges `other` into `self`; keys from `other` win on conflict.
    pub fn merge(&mut self, other: &SessionConfig) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_enabled(&self, adapter: AdapterId) -> bool {
        let key = format!("{}.enabled", adapter.config_prefix());
        match self.get(&key) {
            Some(value) => !matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "false" | "0" | "off" | "no"
            ),
            None => true,
        }
    }

    /// The prefix-stripped settings for one backend, or `None` when any key
    /// the backend requires is absent.
    pub fn backend(&self, adapter: AdapterId) -> Option<BackendSettings> {
        let prefix = format!("{}.", adapter.config_prefix());
        let values: BTreeMap<String, String> = self
            .0
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&prefix)
                    .map(|field| (field.to_string(), value.clone()))
            })
            .collect();
        let complete = adapter
            .required_keys()
            .iter()
            .all(|field| values.get(*field).is_some_and(|value| !value.trim().is_empty()));
        if !complete {
            return None;
        }
        Some(BackendSettings { adapter, values })
    }
}

impl Debug for SessionConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.0 {
            if is_secret_key(key) {
                map.entry(key, &"<redacted>");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

fn is_secret_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SECRET_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Connection parameters for one backend with the `<adapter>.` prefix removed.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendSettings {
    adapter: AdapterId,
    values: BTreeMap<String, String>,
}

impl BackendSettings {
    pub fn adapter(&self) -> AdapterId {
        self.adapter
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.values
            .get(field)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn get_or<'a>(&'a self, field: &str, default: &'a str) -> &'a str {
        self.get(field).unwrap_or(default)
    }

    pub fn require(&self, field: &str) -> Result<&str> {
        self.get(field).ok_or_else(|| {
            RelayError::unavailable(self.adapter, format!("missing configuration '{field}'"))
        })
    }
}

impl Debug for BackendSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<&String> = self.values.keys().collect();
        f.debug_struct("BackendSettings")
            .field("adapter", &self.adapter)
            .field("keys", &keys)
            .finish()
    }
}
