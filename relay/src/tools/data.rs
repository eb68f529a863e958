use futures::FutureExt;
use serde_json::{json, Value};

use crate::adapters::AdapterId;
use crate::registry::{CapabilityDescriptor, HandlerFuture};
use crate::session::Session;
use crate::tools::forward;

fn record_ref(extra: Value) -> Value {
    let mut schema = json!({
        "type": "object",
        "properties": {
            "collection": { "type": "string", "minLength": 1 },
            "id": { "type": "string", "minLength": 1 }
        },
        "required": ["collection", "id"],
        "additionalProperties": false
    });
    if let (Some(properties), Value::Object(extra)) = (schema["properties"].as_object_mut(), extra) {
        properties.extend(extra);
    }
    schema
}

pub fn descriptors() -> Vec<CapabilityDescriptor> {
    let data = [AdapterId::Data];
    vec![
        CapabilityDescriptor::new(
            "data_list_collections",
            "Lists the collections defined on the data backend.",
            json!({ "type": "object", "properties": {}, "additionalProperties": false }),
            list_collections,
        )
        .requires(&data),
        CapabilityDescriptor::new(
            "data_list_records",
            "Lists records in a collection with optional filter, sort and paging.",
            json!({
                "type": "object",
                "properties": {
                    "collection": { "type": "string", "minLength": 1 },
                    "page": { "type": "integer", "minimum": 1 },
                    "per_page": { "type": "integer", "minimum": 1 },
                    "filter": { "type": "string" },
                    "sort": { "type": "string" },
                    "expand": { "type": "string" }
                },
                "required": ["collection"],
                "additionalProperties": false
            }),
            list_records,
        )
        .requires(&data),
        CapabilityDescriptor::new(
            "data_get_record",
            "Fetches one record by id.",
            record_ref(json!({})),
            get_record,
        )
        .requires(&data),
        CapabilityDescriptor::new(
            "data_create_record",
            "Creates a record in a collection.",
            json!({
                "type": "object",
                "properties": {
                    "collection": { "type": "string", "minLength": 1 },
                    "data": { "type": "object" }
                },
                "required": ["collection", "data"],
                "additionalProperties": false
            }),
            create_record,
        )
        .requires(&data),
        CapabilityDescriptor::new(
            "data_update_record",
            "Patches fields of an existing record.",
            {
                let mut schema = record_ref(json!({ "data": { "type": "object" } }));
                schema["required"] = json!(["collection", "id", "data"]);
                schema
            },
            update_record,
        )
        .requires(&data),
        CapabilityDescriptor::new(
            "data_delete_record",
            "Deletes a record by id.",
            record_ref(json!({})),
            delete_record,
        )
        .requires(&data),
        CapabilityDescriptor::new(
            "data_authenticate_user",
            "Authenticates an end user against an auth collection and returns the token.",
            json!({
                "type": "object",
                "properties": {
                    "collection": { "type": "string", "minLength": 1 },
                    "identity": { "type": "string", "minLength": 1 },
                    "password": { "type": "string", "minLength": 1 }
                },
                "required": ["identity", "password"],
                "additionalProperties": false
            }),
            authenticate_user,
        )
        .requires(&data),
    ]
}

fn list_collections<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Data, "collections.list", args).boxed()
}

fn list_records<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Data, "records.list", args).boxed()
}

fn get_record<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Data, "records.get", args).boxed()
}

fn create_record<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Data, "records.create", args).boxed()
}

fn update_record<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Data, "records.update", args).boxed()
}

fn delete_record<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Data, "records.delete", args).boxed()
}

fn authenticate_user<'a>(session: &'a Session, args: Value) -> HandlerFuture<'a> {
    forward(session, AdapterId::Data, "users.authenticate", args).boxed()
}
