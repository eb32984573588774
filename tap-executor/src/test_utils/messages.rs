use serde_json::json;

use crate::types::{
    Bookmark, RecordMessage, SchemaMessage, StateMessage, TapMessage, Value,
};

/// Builds a SCHEMA message for an object with the given properties.
pub fn schema(
    stream: &str,
    properties: serde_json::Value,
    key_properties: &[&str],
) -> TapMessage {
    TapMessage::Schema(SchemaMessage {
        stream: stream.to_string(),
        schema: Value::from(json!({"type": "object", "properties": properties})),
        key_properties: key_properties.iter().map(|key| key.to_string()).collect(),
        bookmark_properties: vec![],
    })
}

/// Builds a RECORD message.
///
/// # Panics
///
/// Panics if `record` is not a JSON object.
pub fn record(stream: &str, record: serde_json::Value) -> TapMessage {
    let Value::Object(record) = Value::from(record) else {
        panic!("test records must be JSON objects");
    };

    TapMessage::Record(RecordMessage {
        stream: stream.to_string(),
        record,
        time_extracted: None,
    })
}

pub fn state(value: serde_json::Value) -> TapMessage {
    TapMessage::State(StateMessage {
        value: Value::from(value),
    })
}

pub fn bookmark(value: serde_json::Value) -> Bookmark {
    Bookmark::new(Value::from(value))
}

/// SCHEMA message of the `orders` stream used throughout the tests: integer `id` key and a
/// numeric `total`.
pub fn orders_schema() -> TapMessage {
    schema(
        "orders",
        json!({
            "id": {"type": "integer"},
            "total": {"type": ["number", "null"]}
        }),
        &["id"],
    )
}

pub fn order(id: i64) -> TapMessage {
    record("orders", json!({"id": id, "total": id * 10}))
}
