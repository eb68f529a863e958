use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::errors::{RelayError, Result};
use crate::lazy_init::LazyInitializer;
use crate::registry::CapabilityRegistry;
use crate::rpc::{RpcError, RpcRequest, RpcResponse};
use crate::schema;
use crate::session::Session;

pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";
const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub server_name: String,
    pub allow_remote_configuration: bool,
    pub instructions: Option<String>,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            server_name: "relay".to_string(),
            allow_remote_configuration: false,
            instructions: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ConfigureParams {
    config: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    #[serde(default)]
    protocol_version: Option<String>,
}

/// Routes envelopes to the registry and converts every outcome, including
/// panics in handlers or adapter factories, into a single outbound envelope.
#[derive(Clone)]
pub struct RpcDispatcher {
    registry: Arc<CapabilityRegistry>,
    initializer: LazyInitializer,
    options: DispatcherOptions,
}

impl RpcDispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>, initializer: LazyInitializer) -> Self {
        Self {
            registry,
            initializer,
            options: DispatcherOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DispatcherOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Handles one raw inbound message. Always yields exactly one envelope.
    pub async fn handle_bytes(&self, session: &mut Session, raw: &[u8]) -> RpcResponse {
        match RpcRequest::parse(raw) {
            Ok(request) => self.handle(session, request).await,
            Err((id, error)) => {
                warn!(session_id = %session.id(), code = error.code, "rejected malformed envelope");
                RpcResponse::failure(id, error)
            }
        }
    }

    #[instrument(skip_all, fields(session_id = %session.id(), method = %request.method))]
    pub async fn handle(&self, session: &mut Session, request: RpcRequest) -> RpcResponse {
        let RpcRequest {
            id, method, params, ..
        } = request;
        let outcome = AssertUnwindSafe(self.route(session, &method, params))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(RelayError::HandlerPanicked(panic_message(panic))));
        match outcome {
            Ok(result) => {
                session.touch(Utc::now());
                debug!("request completed");
                RpcResponse::success(id, result)
            }
            Err(err) => {
                let error = RpcError::from(err);
                warn!(code = error.code, message = %error.message, "request failed");
                RpcResponse::failure(id, error)
            }
        }
    }

    async fn route(&self, session: &mut Session, method: &str, params: Option<Value>) -> Result<Value> {
        match method {
            "initialize" => self.initialize(session, params),
            "ping" => Ok(json!({})),
            "notifications/initialized" | "notifications/cancelled" => Ok(json!({})),
            "tools/list" | "capabilities/list" => Ok(self.discovery_payload()),
            "tools/call" => self.call_tool(session, params).await,
            "session/status" => Ok(serde_json::to_value(session.status())?),
            "session/configure" if self.options.allow_remote_configuration => {
                let params: ConfigureParams = parse_params(params)?;
                let config = SessionConfig::from_json(&params.config)?;
                session.apply_configuration(&config)?;
                info!(keys = config.len(), "session reconfigured");
                Ok(serde_json::to_value(session.status())?)
            }
            other => Err(RelayError::MethodNotFound(other.to_string())),
        }
    }

    fn initialize(&self, session: &Session, params: Option<Value>) -> Result<Value> {
        let params: InitializeParams = match params {
            Some(value) => parse_params(Some(value))?,
            None => InitializeParams::default(),
        };
        let protocol_version = params
            .protocol_version
            .as_deref()
            .filter(|requested| SUPPORTED_PROTOCOL_VERSIONS.contains(requested))
            .unwrap_or(MCP_PROTOCOL_VERSION);
        let mut payload = json!({
            "protocolVersion": protocol_version,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": self.options.server_name,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "sessionId": session.id(),
        });
        if let Some(instructions) = &self.options.instructions {
            payload["instructions"] = Value::String(instructions.clone());
        }
        Ok(payload)
    }

    /// Discovery never touches adapters or configuration.
    pub fn discovery_payload(&self) -> Value {
        json!({ "tools": self.registry.list_all() })
    }

    async fn call_tool(&self, session: &mut Session, params: Option<Value>) -> Result<Value> {
        let params: ToolCallParams = parse_params(params)?;
        let descriptor = self
            .registry
            .resolve(&params.name)
            .ok_or_else(|| RelayError::ToolNotFound(params.name.clone()))?;

        let arguments = match params.arguments {
            None | Some(Value::Null) => json!({}),
            Some(value @ Value::Object(_)) => value,
            Some(_) => return Err(RelayError::invalid_params("'arguments' must be an object")),
        };
        schema::validate(&descriptor.input_schema, &arguments)?;

        if session.is_hibernating() {
            return Err(RelayError::Hibernating(session.id().to_string()));
        }
        self.initializer
            .ensure_all(session, &descriptor.required_adapters)
            .await?;

        // panics from here on unwind into `handle`
        let value = (descriptor.handler)(session, arguments).await?;
        info!(tool = %descriptor.name, "tool call succeeded");
        Ok(tool_result(value))
    }
}

fn parse_params<T: for<'a> Deserialize<'a>>(params: Option<Value>) -> Result<T> {
    let value = params.unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(value).map_err(|err| RelayError::invalid_params(err.to_string()))
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Wraps a handler value in the tool result shape clients expect.
fn tool_result(value: Value) -> Value {
    let text = match &value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    let mut result = json!({
        "content": [{ "type": "text", "text": text }],
        "isError": false,
    });
    if value.is_object() {
        result["structuredContent"] = value;
    }
    result
}
