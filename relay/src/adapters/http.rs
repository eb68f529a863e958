use std::time::Duration;

use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::adapters::AdapterId;
use crate::errors::{RelayError, Result};

/// Request payload shapes understood by the backends.
#[derive(Debug, Clone, Copy)]
pub enum Body<'a> {
    Empty,
    Json(&'a Value),
    Form(&'a [(String, String)]),
}

/// Shared HTTP plumbing for the REST-style backends.
#[derive(Clone)]
pub struct HttpBackend {
    adapter: AdapterId,
    http: Client,
    base_url: Url,
    bearer: Option<String>,
}

impl HttpBackend {
    pub fn new(adapter: AdapterId, base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim()).map_err(|err| {
            RelayError::unavailable(adapter, format!("invalid base url '{base_url}': {err}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RelayError::unavailable(
                adapter,
                format!("base url '{base_url}' cannot carry a path"),
            ));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RelayError::unavailable(adapter, err.to_string()))?;
        Ok(Self {
            adapter,
            http,
            base_url,
            bearer: None,
        })
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn set_bearer(&mut self, token: Option<String>) {
        self.bearer = token;
    }

    pub fn adapter(&self) -> AdapterId {
        self.adapter
    }

    /// Joins percent-encoded path segments onto the base url.
    pub fn url(&self, segments: &[&str], query: &[(String, String)]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| RelayError::Internal("base url cannot carry a path".to_string()))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Ok(url)
    }

    pub async fn get(&self, segments: &[&str], query: &[(String, String)]) -> Result<Value> {
        self.send(Method::GET, segments, query, Body::Empty).await
    }

    pub async fn send(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(String, String)],
        body: Body<'_>,
    ) -> Result<Value> {
        let url = self.url(segments, query)?;
        let request_id = Uuid::new_v4();
        debug!(adapter = %self.adapter, %method, path = url.path(), %request_id, "backend request");
        let mut builder = self
            .http
            .request(method, url)
            .header("X-Request-Id", request_id.to_string());
        if let Some(token) = &self.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(value),
            Body::Form(fields) => builder.form(fields),
        };
        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                RelayError::Network(format!("{} backend timed out: {err}", self.adapter))
            } else {
                RelayError::Network(format!("{} backend unreachable: {err}", self.adapter))
            }
        })?;
        self.handle_response(response).await
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RelayError::Network(err.to_string()))?;
        let body: Value = if bytes.is_empty() {
            json!({})
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(
                |_| json!({ "message": String::from_utf8_lossy(&bytes).trim().to_string() }),
            )
        };
        if status.is_success() {
            return Ok(body);
        }
        let detail = if status == StatusCode::NOT_FOUND && body.get("message").is_none() {
            json!({ "message": "not found", "body": body })
        } else {
            body
        };
        Err(RelayError::Backend {
            adapter: self.adapter,
            status: Some(status.as_u16()),
            detail,
        })
    }
}

/// Pulls a required string field out of operation arguments.
pub fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| RelayError::invalid_params(format!("'{field}' is required")))
}

pub fn optional_str<'a>(args: &'a Value, field: &str) -> Option<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
}

/// Renders a scalar argument as a query or form value.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
