use futures::FutureExt;
use serde_json::{json, Value};

use crate::adapters::AdapterId;
use crate::registry::{CapabilityDescriptor, HandlerFuture};
use crate::session::Session;
use crate::tools::forward;

fn by_id() -> Value {
    json!({
        "type": "object",
        "properties": { "id": { "type": "string", "minLength": 1 } },
        "required": ["id"],
        "additionalProperties": false
    })
}

pub fn descriptors() -> Vec<CapabilityDescriptor> {
    let payment = [AdapterId::Payment];
    vec![
        CapabilityDescriptor::new(
            "payment_create_customer",
            "Creates a customer on the payment processor.",
            json!({
                "type": "object",
                "properties": {
                    "email": { "type": "string", "minLength": 3 },
                    "name": { "type": "string" },
                    "description": { "type": "string" },
                    "phone": { "type": "string" },
                    "metadata": { "type": "object" }
                },
                "additionalProperties": false
            }),
            create_customer,
        )
        .requires(&payment),
        CapabilityDescriptor::new(
            "payment_get_customer",
            "Retrieves a customer by id.",
            by_id(),
            get_customer,
        )
        .requires(&payment),
        CapabilityDescriptor::new(
            "payment_list_customers",
            "Lists customers, optionally filtered by email.",
            json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "minimum": 1 },
                    "email": { "type": "string" },
                    "starting_after": { "type": "string" }
                },
                "additionalProperties": false
            }),
            list_customers,
        )
        .requires(&payment),
        CapabilityDescriptor::new(
            "payment_create_payment_intent",
            "Creates a payment intent for an amount in the currency's smallest unit.",
            json!({
                "type": "object",
                "properties": {
                    "amount": { "type": "integer", "minimum": 1 },
                    "currency": { "type": "string", "minLength": 3 },
                    "customer": { "type": "string" },
                    "description": { "type": "string" },
                    "receipt_email": { "type": "string" },
                    "payment_method_types": { "type": "array", "items": { "type": "string" } },
                    "metadata": { "type": "object" }
                },
                "required": ["amount", "currency"],
                "additionalProperties": false
            }),
            create_payment_intent,
        )
        .requires(&payment),
        CapabilityDescriptor::new(
            "payment_get_payment_intent",
            "Retrieves a payment intent by id.",
            by_id(),
            get_payment_intent,
        )
        .requires(&payment),
        CapabilityDescriptor::new(
            "payment_create_refund",
            "Refunds a payment intent in full or in part.",
            json!({
                "type": "object",
                "properties": {
                    "payment_intent": { "type": "string", "minLength": 1 },
                    "amount": { "type": "integer", "minimum": 1 },
                    "reason": {
                        "type": "string",
                        "enum": ["duplicate", "fraudulent", "requested_by_customer"]
                    }
                },
                "required": ["payment_intent"],
                "additionalProperties": false
            }),
            create_refund,
        )
        .requires(&payment),
        CapabilityDescriptor::new(
            "payment_create_subscription",
            "Subscribes a customer to a recurring price.",
            json!({
                "type": "object",
                "properties": {
                    "customer": { "type": "string", "minLength": 1 },
                    "price": { "type": "string", "minLength": 1 },
                    "quantity": { "type": "integer", "minimum": 1 },
                    "trial_period_days": { "type": "integer", "minimum": 0 }
                },
                "required": ["customer", "price"],
                "additionalProperties": false
            }),
            create_subscription,
        )
        .requires(&payment),
        CapabilityDescriptor::new(
            "payment_cancel_subscription",
            "Cancels a subscription immediately.",
            by_id(),
            cancel_subscription,
        )
        .requires(&payment),
    ]
}

fn create_customer<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Payment, "customers.create", args).boxed()
}

fn get_customer<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Payment, "customers.get", args).boxed()
}

fn list_customers<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Payment, "customers.list", args).boxed()
}

fn create_payment_intent<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Payment, "payment_intents.create", args).boxed()
}

fn get_payment_intent<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Payment, "payment_intents.get", args).boxed()
}

fn create_refund<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Payment, "refunds.create", args).boxed()
}

fn create_subscription<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Payment, "subscriptions.create", args).boxed()
}

fn cancel_subscription<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Payment, "subscriptions.cancel", args).boxed()
}
