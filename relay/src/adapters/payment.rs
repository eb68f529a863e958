use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::{info, instrument};

use crate::adapters::http::{required_str, scalar_text, Body, HttpBackend};
use crate::adapters::{AdapterId, BackendAdapter};
use crate::config::BackendSettings;
use crate::errors::{RelayError, Result};

const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Client for the payment backend (Stripe-style, form-encoded requests).
pub struct PaymentAdapter {
    backend: HttpBackend,
    livemode: bool,
}

impl PaymentAdapter {
    #[instrument(skip_all, fields(adapter = "payment"))]
    pub async fn connect(settings: &BackendSettings, timeout: Duration) -> Result<Self> {
        let secret = settings.require("secret_key")?;
        let base = settings.get_or("api_base", DEFAULT_API_BASE);
        let backend = HttpBackend::new(AdapterId::Payment, base, timeout)?.with_bearer(secret);
        let balance = backend.get(&["v1", "balance"], &[]).await?;
        let livemode = balance
            .get("livemode")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        info!(livemode, "payment backend connected");
        Ok(Self { backend, livemode })
    }

    pub fn livemode(&self) -> bool {
        self.livemode
    }

    async fn post_form(&self, segments: &[&str], fields: Vec<(String, String)>) -> Result<Value> {
        self.backend
            .send(Method::POST, segments, &[], Body::Form(&fields))
            .await
    }
}

/// Flattens the listed scalar arguments into form fields, plus `metadata[...]`.
fn form_fields(args: &Value, fields: &[&str]) -> Vec<(String, String)> {
    let mut form = Vec::new();
    for field in fields {
        if let Some(value) = args.get(*field).and_then(scalar_text) {
            form.push((field.to_string(), value));
        }
    }
    if let Some(metadata) = args.get("metadata").and_then(Value::as_object) {
        for (key, value) in metadata {
            if let Some(text) = scalar_text(value) {
                form.push((format!("metadata[{key}]"), text));
            }
        }
    }
    form
}

#[async_trait]
impl BackendAdapter for PaymentAdapter {
    fn id(&self) -> AdapterId {
        AdapterId::Payment
    }

    async fn call(&self, operation: &str, args: Value) -> Result<Value> {
        match operation {
            "customers.create" => {
                let fields = form_fields(&args, &["email", "name", "description", "phone"]);
                self.post_form(&["v1", "customers"], fields).await
            }
            "customers.get" => {
                let id = required_str(&args, "id")?;
                self.backend.get(&["v1", "customers", id], &[]).await
            }
            "customers.list" => {
                let query = form_fields(&args, &["limit", "email", "starting_after"]);
                self.backend.get(&["v1", "customers"], &query).await
            }
            "payment_intents.create" => {
                required_str(&args, "currency")?;
                if args.get("amount").and_then(Value::as_u64).is_none() {
                    return Err(RelayError::invalid_params("'amount' must be a positive integer"));
                }
                let mut fields = form_fields(
                    &args,
                    &["amount", "currency", "customer", "description", "receipt_email"],
                );
                if let Some(kinds) = args.get("payment_method_types").and_then(Value::as_array) {
                    for kind in kinds.iter().filter_map(Value::as_str) {
                        fields.push(("payment_method_types[]".to_string(), kind.to_string()));
                    }
                }
                self.post_form(&["v1", "payment_intents"], fields).await
            }
            "payment_intents.get" => {
                let id = required_str(&args, "id")?;
                self.backend.get(&["v1", "payment_intents", id], &[]).await
            }
            "refunds.create" => {
                required_str(&args, "payment_intent")?;
                let fields = form_fields(&args, &["payment_intent", "amount", "reason"]);
                self.post_form(&["v1", "refunds"], fields).await
            }
            "subscriptions.create" => {
                let customer = required_str(&args, "customer")?;
                let price = required_str(&args, "price")?;
                let mut fields = vec![
                    ("customer".to_string(), customer.to_string()),
                    ("items[0][price]".to_string(), price.to_string()),
                ];
                if let Some(quantity) = args.get("quantity").and_then(Value::as_u64) {
                    fields.push(("items[0][quantity]".to_string(), quantity.to_string()));
                }
                if let Some(days) = args.get("trial_period_days").and_then(Value::as_u64) {
                    fields.push(("trial_period_days".to_string(), days.to_string()));
                }
                self.post_form(&["v1", "subscriptions"], fields).await
            }
            "subscriptions.cancel" => {
                let id = required_str(&args, "id")?;
                self.backend
                    .send(Method::DELETE, &["v1", "subscriptions", id], &[], Body::Empty)
                    .await
            }
            other => Err(RelayError::invalid_params(format!(
                "payment backend has no operation '{other}'"
            ))),
        }
    }
}
