//! Composite workflow spanning all three backends.

use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::adapters::AdapterId;
use crate::errors::{RelayError, Result};
use crate::registry::{CapabilityDescriptor, HandlerFuture};
use crate::session::Session;
use crate::tools::forward;

const DEFAULT_COLLECTION: &str = "customers";

#[derive(Debug, Deserialize)]
struct OnboardCustomer {
    email: String,
    name: Option<String>,
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    welcome_subject: Option<String>,
    #[serde(default)]
    welcome_text: Option<String>,
}

pub fn descriptors() -> Vec<CapabilityDescriptor> {
    vec![CapabilityDescriptor::new(
        "onboard_customer",
        "Creates a payment customer, stores it in the data backend and sends a welcome email.",
        json!({
            "type": "object",
            "properties": {
                "email": { "type": "string", "minLength": 3 },
                "name": { "type": "string" },
                "collection": { "type": "string", "minLength": 1 },
                "welcome_subject": { "type": "string", "minLength": 1 },
                "welcome_text": { "type": "string" }
            },
            "required": ["email"],
            "additionalProperties": false
        }),
        onboard_customer,
    )
    .requires(&[AdapterId::Payment, AdapterId::Data, AdapterId::Notification])]
}

fn onboard_customer<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    async move {
        let params: OnboardCustomer = serde_json::from_value(args)
            .map_err(|err| RelayError::invalid_params(err.to_string()))?;
        run(session, params).await
    }
    .boxed()
}

async fn run(session: &Session, params: OnboardCustomer) -> Result<Value> {
    let display_name = params.name.clone().unwrap_or_else(|| params.email.clone());

    let customer = forward(
        session,
        AdapterId::Payment,
        "customers.create",
        json!({ "email": params.email, "name": params.name }),
    )
    .await?;
    let customer_id = customer
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::Internal("payment backend returned no customer id".to_string()))?
        .to_string();

    let record = forward(
        session,
        AdapterId::Data,
        "records.create",
        json!({
            "collection": params.collection.as_deref().unwrap_or(DEFAULT_COLLECTION),
            "data": {
                "email": params.email,
                "name": display_name,
                "payment_customer_id": customer_id,
            }
        }),
    )
    .await?;

    let subject = params
        .welcome_subject
        .unwrap_or_else(|| "Welcome aboard".to_string());
    let text = params
        .welcome_text
        .unwrap_or_else(|| format!("Hi {display_name}, your account is ready."));
    let email = forward(
        session,
        AdapterId::Notification,
        "email.send",
        json!({ "to": params.email, "subject": subject, "text": text }),
    )
    .await?;

    info!(session_id = %session.id(), customer = %customer_id, "customer onboarded");
    Ok(json!({ "customer": customer, "record": record, "email": email }))
}
