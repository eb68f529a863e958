use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::adapters::http::{optional_str, required_str, scalar_text, Body, HttpBackend};
use crate::adapters::{AdapterId, BackendAdapter};
use crate::config::BackendSettings;
use crate::errors::{RelayError, Result};

const DEFAULT_AUTH_COLLECTION: &str = "_superusers";
const DEFAULT_PER_PAGE: u64 = 30;
const MAX_PER_PAGE: u64 = 500;

/// Client for the record/collection service (PocketBase-style REST API).
pub struct DataAdapter {
    backend: HttpBackend,
    authenticated_as: Option<String>,
}

impl DataAdapter {
    #[instrument(skip_all, fields(adapter = "data"))]
    pub async fn connect(settings: &BackendSettings, timeout: Duration) -> Result<Self> {
        let url = settings.require("url")?;
        let mut backend = HttpBackend::new(AdapterId::Data, url, timeout)?;
        backend.get(&["api", "health"], &[]).await?;

        let mut authenticated_as = None;
        if let (Some(identity), Some(password)) =
            (settings.get("identity"), settings.get("password"))
        {
            let collection = settings.get_or("auth_collection", DEFAULT_AUTH_COLLECTION);
            let body = json!({ "identity": identity, "password": password });
            let response = backend
                .send(
                    Method::POST,
                    &["api", "collections", collection, "auth-with-password"],
                    &[],
                    Body::Json(&body),
                )
                .await?;
            let token = response
                .get("token")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    RelayError::unavailable(AdapterId::Data, "auth response carried no token")
                })?;
            backend.set_bearer(Some(token.to_string()));
            authenticated_as = Some(identity.to_string());
        }
        info!(authenticated = authenticated_as.is_some(), "data backend connected");
        Ok(Self {
            backend,
            authenticated_as,
        })
    }

    pub fn authenticated_as(&self) -> Option<&str> {
        self.authenticated_as.as_deref()
    }

    async fn list_records(&self, args: &Value) -> Result<Value> {
        let collection = required_str(args, "collection")?;
        let page = args.get("page").and_then(Value::as_u64).unwrap_or(1).max(1);
        let per_page = args
            .get("per_page")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        let mut query = vec![
            ("page".to_string(), page.to_string()),
            ("perPage".to_string(), per_page.to_string()),
        ];
        for (field, param) in [("filter", "filter"), ("sort", "sort"), ("expand", "expand")] {
            if let Some(value) = args.get(field).and_then(scalar_text) {
                query.push((param.to_string(), value));
            }
        }
        self.backend
            .get(&["api", "collections", collection, "records"], &query)
            .await
    }

    async fn record_call(&self, method: Method, args: &Value, with_body: bool) -> Result<Value> {
        let collection = required_str(args, "collection")?;
        let id = required_str(args, "id")?;
        let data = args.get("data").cloned().unwrap_or_else(|| json!({}));
        let body = if with_body { Body::Json(&data) } else { Body::Empty };
        self.backend
            .send(
                method,
                &["api", "collections", collection, "records", id],
                &[],
                body,
            )
            .await
    }
}

#[async_trait]
impl BackendAdapter for DataAdapter {
    fn id(&self) -> AdapterId {
        AdapterId::Data
    }

    async fn call(&self, operation: &str, args: Value) -> Result<Value> {
        match operation {
            "collections.list" => self.backend.get(&["api", "collections"], &[]).await,
            "records.list" => self.list_records(&args).await,
            "records.get" => self.record_call(Method::GET, &args, false).await,
            "records.create" => {
                let collection = required_str(&args, "collection")?;
                let data = args.get("data").cloned().unwrap_or_else(|| json!({}));
                self.backend
                    .send(
                        Method::POST,
                        &["api", "collections", collection, "records"],
                        &[],
                        Body::Json(&data),
                    )
                    .await
            }
            "records.update" => self.record_call(Method::PATCH, &args, true).await,
            "records.delete" => {
                self.record_call(Method::DELETE, &args, false).await?;
                Ok(json!({ "deleted": true, "id": required_str(&args, "id")? }))
            }
            "users.authenticate" => {
                let collection = optional_str(&args, "collection").unwrap_or("users");
                let body = json!({
                    "identity": required_str(&args, "identity")?,
                    "password": required_str(&args, "password")?,
                });
                self.backend
                    .send(
                        Method::POST,
                        &["api", "collections", collection, "auth-with-password"],
                        &[],
                        Body::Json(&body),
                    )
                    .await
            }
            other => Err(RelayError::invalid_params(format!(
                "data backend has no operation '{other}'"
            ))),
        }
    }
}
