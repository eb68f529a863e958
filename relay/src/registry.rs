use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use crate::adapters::AdapterId;
use crate::errors::{RelayError, Result};
use crate::session::Session;

pub type HandlerFuture<'a> = BoxFuture<'a, Result<Value>>;

/// A tool implementation. It receives the session with every required
/// adapter already `Ready`, plus arguments that passed schema validation.
pub type Handler = for<'a> fn(&'a Session, Value) -> HandlerFuture<'a>;

#[derive(Clone)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub required_adapters: Vec<AdapterId>,
    pub handler: Handler,
}

impl CapabilityDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: Handler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            required_adapters: Vec::new(),
            handler,
        }
    }

    /// Declares the adapters that must be ready before the handler runs, in
    /// the order they are initialized. Duplicates are dropped.
    pub fn requires(mut self, adapters: &[AdapterId]) -> Self {
        for adapter in adapters {
            if !self.required_adapters.contains(adapter) {
                self.required_adapters.push(*adapter);
            }
        }
        self
    }

    pub fn summary(&self) -> CapabilitySummary {
        CapabilitySummary {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

impl Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("name", &self.name)
            .field("required_adapters", &self.required_adapters)
            .finish()
    }
}

/// Discovery view of a capability; carries no handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySummary {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<CapabilityDescriptor>,
    index: HashMap<String, usize>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: CapabilityDescriptor) -> Result<&mut Self> {
        let name = descriptor.name.trim();
        if name.is_empty() || name != descriptor.name {
            return Err(RelayError::Internal(format!(
                "capability name '{}' must be non-empty without surrounding whitespace",
                descriptor.name
            )));
        }
        if descriptor.input_schema.get("type").and_then(Value::as_str) != Some("object") {
            return Err(RelayError::Internal(format!(
                "capability '{name}' must declare an object input schema"
            )));
        }
        if self.index.contains_key(name) {
            return Err(RelayError::DuplicateCapability(name.to_string()));
        }
        self.index.insert(name.to_string(), self.entries.len());
        self.entries.push(descriptor);
        Ok(self)
    }

    pub fn build(self) -> CapabilityRegistry {
        CapabilityRegistry {
            entries: self.entries,
            index: self.index,
        }
    }
}

/// Immutable table of every operation a session exposes. Built once and
/// shared read-only across sessions.
#[derive(Debug)]
pub struct CapabilityRegistry {
    entries: Vec<CapabilityDescriptor>,
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn resolve(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.index.get(name).map(|position| &self.entries[*position])
    }

    /// Summaries in registration order.
    pub fn list_all(&self) -> Vec<CapabilitySummary> {
        self.entries.iter().map(CapabilityDescriptor::summary).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
