//! JSON-RPC envelopes exchanged with the client.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::RelayError;

pub const JSONRPC_VERSION: &str = "2.0";

pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const ADAPTER_UNAVAILABLE: i64 = -32000;
    pub const BACKEND_REJECTED: i64 = -32001;
    pub const SESSION_HIBERNATING: i64 = -32002;
}

/// A validated inbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub id: Value,
    pub method: String,
    pub params: Option<Value>,
    /// True when the client sent no `id` and expects no reply.
    pub notification: bool,
}

impl RpcRequest {
    pub fn new(id: Value, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
            notification: false,
        }
    }

    /// Validates raw bytes into a request. On failure returns the best
    /// correlation id that could be recovered together with the error.
    pub fn parse(raw: &[u8]) -> Result<Self, (Value, RpcError)> {
        let value: Value = serde_json::from_slice(raw).map_err(|err| {
            (
                Value::Null,
                RpcError::from(RelayError::Parse(err.to_string())),
            )
        })?;
        let object = match value {
            Value::Object(object) => object,
            Value::Array(_) => {
                return Err((
                    Value::Null,
                    RpcError::from(RelayError::InvalidRequest(
                        "batch requests are not supported".to_string(),
                    )),
                ))
            }
            other => {
                return Err((
                    Value::Null,
                    RpcError::from(RelayError::InvalidRequest(format!(
                        "envelope must be an object, found {}",
                        kind(&other)
                    ))),
                ))
            }
        };
        Self::from_object(object)
    }

    fn from_object(mut object: Map<String, Value>) -> Result<Self, (Value, RpcError)> {
        let (id, notification) = match object.remove("id") {
            None => (Value::Null, true),
            Some(id @ (Value::String(_) | Value::Number(_) | Value::Null)) => (id, false),
            Some(other) => {
                return Err(invalid(
                    Value::Null,
                    format!("id must be a string, number or null, found {}", kind(&other)),
                ))
            }
        };
        match object.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(invalid(id, format!("unsupported jsonrpc version '{other}'")))
            }
            None => return Err(invalid(id, "missing jsonrpc version tag")),
        }
        let method = match object.remove("method") {
            Some(Value::String(method)) if !method.trim().is_empty() => method,
            Some(_) => return Err(invalid(id, "method must be a non-empty string")),
            None => return Err(invalid(id, "missing method")),
        };
        let params = match object.remove("params") {
            None | Some(Value::Null) => None,
            Some(params @ (Value::Object(_) | Value::Array(_))) => Some(params),
            Some(other) => {
                return Err(invalid(
                    id,
                    format!("params must be an object or array, found {}", kind(&other)),
                ))
            }
        };
        Ok(Self {
            id,
            method,
            params,
            notification,
        })
    }
}

fn invalid(id: Value, detail: impl Into<String>) -> (Value, RpcError) {
    (id, RpcError::from(RelayError::InvalidRequest(detail.into())))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Best-effort extraction of the correlation id from bytes that may not form
/// a valid envelope.
pub fn correlation_id(raw: &[u8]) -> Value {
    serde_json::from_slice::<Value>(raw)
        .ok()
        .and_then(|value| value.get("id").cloned())
        .filter(|id| matches!(id, Value::String(_) | Value::Number(_)))
        .unwrap_or(Value::Null)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error_code(&self) -> Option<i64> {
        self.error.as_ref().map(|error| error.code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn internal(detail: &str) -> Self {
        Self::new(
            codes::INTERNAL_ERROR,
            "internal error",
            Some(json!({ "detail": detail })),
        )
    }
}

impl From<RelayError> for RpcError {
    fn from(err: RelayError) -> Self {
        let message = err.to_string();
        match err {
            RelayError::Parse(detail) => {
                RpcError::new(codes::PARSE_ERROR, "parse error", Some(json!({ "detail": detail })))
            }
            RelayError::InvalidRequest(detail) => RpcError::new(
                codes::INVALID_REQUEST,
                "invalid request",
                Some(json!({ "detail": detail })),
            ),
            RelayError::MethodNotFound(method) => RpcError::new(
                codes::METHOD_NOT_FOUND,
                message,
                Some(json!({ "method": method })),
            ),
            RelayError::ToolNotFound(tool) => RpcError::new(
                codes::METHOD_NOT_FOUND,
                message,
                Some(json!({ "tool": tool })),
            ),
            RelayError::InvalidParams(detail) => RpcError::new(
                codes::INVALID_PARAMS,
                "invalid params",
                Some(json!({ "detail": detail })),
            ),
            RelayError::AdapterUnavailable { adapter, reason } => RpcError::new(
                codes::ADAPTER_UNAVAILABLE,
                message,
                Some(json!({ "adapter": adapter, "reason": reason })),
            ),
            RelayError::Backend {
                adapter,
                status,
                detail,
            } => RpcError::new(
                codes::BACKEND_REJECTED,
                message,
                Some(json!({ "adapter": adapter, "status": status, "detail": detail })),
            ),
            RelayError::Hibernating(session_id) => RpcError::new(
                codes::SESSION_HIBERNATING,
                message,
                Some(json!({ "sessionId": session_id })),
            ),
            other => RpcError::internal(&other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_err(raw: &str) -> (Value, RpcError) {
        RpcRequest::parse(raw.as_bytes()).expect_err("invalid envelope")
    }

    #[test]
    fn parses_request_and_notification() {
        let request =
            RpcRequest::parse(br#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#).unwrap();
        assert_eq!(request.id, json!(7));
        assert!(!request.notification);

        let note = RpcRequest::parse(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .unwrap();
        assert!(note.notification);
        assert_eq!(note.id, Value::Null);
    }

    #[test]
    fn classifies_malformed_envelopes() {
        assert_eq!(parse_err("").1.code, codes::PARSE_ERROR);
        assert_eq!(parse_err("{not json").1.code, codes::PARSE_ERROR);
        assert_eq!(parse_err("[]").1.code, codes::INVALID_REQUEST);
        assert_eq!(parse_err("42").1.code, codes::INVALID_REQUEST);

        let (id, error) = parse_err(r#"{"jsonrpc":"1.0","id":"a","method":"ping"}"#);
        assert_eq!(id, json!("a"));
        assert_eq!(error.code, codes::INVALID_REQUEST);

        assert_eq!(parse_err(r#"{"id":1,"method":"ping"}"#).1.code, codes::INVALID_REQUEST);
        assert_eq!(parse_err(r#"{"jsonrpc":"2.0","id":1}"#).1.code, codes::INVALID_REQUEST);
        assert_eq!(
            parse_err(r#"{"jsonrpc":"2.0","id":{"x":1},"method":"ping"}"#).1.code,
            codes::INVALID_REQUEST
        );
        assert_eq!(
            parse_err(r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":"x"}"#).1.code,
            codes::INVALID_REQUEST
        );
    }

    #[test]
    fn responses_carry_exactly_one_outcome() {
        let ok = serde_json::to_value(RpcResponse::success(json!(1), json!({}))).unwrap();
        assert!(ok.get("result").is_some() && ok.get("error").is_none());
        let failed =
            serde_json::to_value(RpcResponse::failure(json!(1), RpcError::internal("boom")))
                .unwrap();
        assert!(failed.get("result").is_none() && failed.get("error").is_some());
        assert_eq!(failed["jsonrpc"], "2.0");
    }

    #[test]
    fn correlation_id_survives_bad_envelopes() {
        assert_eq!(correlation_id(br#"{"id":"abc","jsonrpc":"1"}"#), json!("abc"));
        assert_eq!(correlation_id(b"garbage"), Value::Null);
    }
}
