use futures::FutureExt;
use serde_json::{json, Value};

use crate::errors::RelayError;
use crate::registry::{CapabilityDescriptor, HandlerFuture};
use crate::session::Session;

pub fn descriptors() -> Vec<CapabilityDescriptor> {
    vec![CapabilityDescriptor::new(
        "session_info",
        "Reports the session phase, adapter readiness and configured keys.",
        json!({ "type": "object", "properties": {}, "additionalProperties": false }),
        session_info,
    )]
}

fn session_info<'a>(session: &'a Session, _args: Value) -> HandlerFuture<'a> {
    async move { serde_json::to_value(session.status()).map_err(RelayError::from) }.boxed()
}
