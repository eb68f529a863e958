use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value};
use tracing::{info, instrument};

use crate::adapters::http::{optional_str, required_str, Body, HttpBackend};
use crate::adapters::{AdapterId, BackendAdapter};
use crate::config::BackendSettings;
use crate::errors::{RelayError, Result};

const DEFAULT_API_BASE: &str = "https://api.resend.com";

/// Client for the outbound email transport (Resend-style JSON API).
pub struct NotificationAdapter {
    backend: HttpBackend,
    default_from: Option<String>,
}

impl NotificationAdapter {
    #[instrument(skip_all, fields(adapter = "notification"))]
    pub async fn connect(settings: &BackendSettings, timeout: Duration) -> Result<Self> {
        let api_key = settings.require("api_key")?;
        let base = settings.get_or("api_base", DEFAULT_API_BASE);
        let backend =
            HttpBackend::new(AdapterId::Notification, base, timeout)?.with_bearer(api_key);
        backend.get(&["domains"], &[]).await?;
        let default_from = settings.get("from").map(str::to_string);
        info!(has_default_sender = default_from.is_some(), "notification backend connected");
        Ok(Self {
            backend,
            default_from,
        })
    }

    fn build_email(&self, args: &Value) -> Result<Value> {
        let from = optional_str(args, "from")
            .map(str::to_string)
            .or_else(|| self.default_from.clone())
            .ok_or_else(|| {
                RelayError::invalid_params(
                    "'from' is required when no default sender is configured",
                )
            })?;
        let to = recipients(args.get("to"))
            .ok_or_else(|| RelayError::invalid_params("'to' must name at least one recipient"))?;
        let subject = required_str(args, "subject")?;
        if optional_str(args, "html").is_none() && optional_str(args, "text").is_none() {
            return Err(RelayError::invalid_params(
                "one of 'html' or 'text' must be provided",
            ));
        }

        let mut email = Map::new();
        email.insert("from".to_string(), Value::String(from));
        email.insert("to".to_string(), to);
        email.insert("subject".to_string(), Value::String(subject.to_string()));
        for field in ["html", "text"] {
            if let Some(body) = optional_str(args, field) {
                email.insert(field.to_string(), Value::String(body.to_string()));
            }
        }
        for field in ["cc", "bcc", "reply_to"] {
            if let Some(list) = recipients(args.get(field)) {
                email.insert(field.to_string(), list);
            }
        }
        Ok(Value::Object(email))
    }
}

/// Accepts a single address or a list, returning a non-empty JSON array.
fn recipients(value: Option<&Value>) -> Option<Value> {
    let list: Vec<Value> = match value? {
        Value::String(address) if !address.trim().is_empty() => {
            vec![Value::String(address.trim().to_string())]
        }
        Value::Array(entries) => entries
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(|address| Value::String(address.to_string()))
            .collect(),
        _ => Vec::new(),
    };
    if list.is_empty() {
        None
    } else {
        Some(Value::Array(list))
    }
}

#[async_trait]
impl BackendAdapter for NotificationAdapter {
    fn id(&self) -> AdapterId {
        AdapterId::Notification
    }

    async fn call(&self, operation: &str, args: Value) -> Result<Value> {
        match operation {
            "email.send" => {
                let email = self.build_email(&args)?;
                self.backend
                    .send(Method::POST, &["emails"], &[], Body::Json(&email))
                    .await
            }
            "email.get" => {
                let id = required_str(&args, "id")?;
                self.backend.get(&["emails", id], &[]).await
            }
            other => Err(RelayError::invalid_params(format!(
                "notification backend has no operation '{other}'"
            ))),
        }
    }
}
