use futures::FutureExt;
use serde_json::{json, Value};

use crate::adapters::AdapterId;
use crate::registry::{CapabilityDescriptor, HandlerFuture};
use crate::session::Session;
use crate::tools::forward;

pub fn descriptors() -> Vec<CapabilityDescriptor> {
    let notification = [AdapterId::Notification];
    vec![
        CapabilityDescriptor::new(
            "email_send",
            "Sends an email. 'to', 'cc' and 'bcc' accept one address or a list.",
            json!({
                "type": "object",
                "properties": {
                    "from": { "type": "string" },
                    "to": { "type": ["string", "array"], "items": { "type": "string" } },
                    "cc": { "type": ["string", "array"], "items": { "type": "string" } },
                    "bcc": { "type": ["string", "array"], "items": { "type": "string" } },
                    "reply_to": { "type": ["string", "array"], "items": { "type": "string" } },
                    "subject": { "type": "string", "minLength": 1 },
                    "html": { "type": "string" },
                    "text": { "type": "string" }
                },
                "required": ["to", "subject"],
                "additionalProperties": false
            }),
            send_email,
        )
        .requires(&notification),
        CapabilityDescriptor::new(
            "email_get",
            "Retrieves delivery details for a sent email.",
            json!({
                "type": "object",
                "properties": { "id": { "type": "string", "minLength": 1 } },
                "required": ["id"],
                "additionalProperties": false
            }),
            get_email,
        )
        .requires(&notification),
    ]
}

fn send_email<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Notification, "email.send", args).boxed()
}

fn get_email<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Notification, "email.get", args).boxed()
}
