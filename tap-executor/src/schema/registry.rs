use std::collections::HashMap;

use tracing::debug;

use crate::schema::node::SchemaNode;
use crate::schema::violation::SchemaViolation;
use crate::types::{RecordMessage, SchemaMessage};

/// The schema of one stream, as declared by its latest SCHEMA message.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSchema {
    pub node: SchemaNode,
    pub key_properties: Vec<String>,
    pub bookmark_properties: Vec<String>,
}

/// Latest schema of every stream seen during one run.
///
/// A registry belongs to a single run and is dropped with it; a schema declared in one run is
/// never used to validate records of another.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, StreamSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the schema of a stream, replacing any previous one.
    pub fn update(&mut self, message: &SchemaMessage) {
        let schema = StreamSchema {
            node: SchemaNode::compile(&message.schema),
            key_properties: message.key_properties.clone(),
            bookmark_properties: message.bookmark_properties.clone(),
        };

        let replaced = self.schemas.insert(message.stream.clone(), schema).is_some();
        debug!(stream = %message.stream, replaced, "registered stream schema");
    }

    pub fn get(&self, stream: &str) -> Option<&StreamSchema> {
        self.schemas.get(stream)
    }

    pub fn contains(&self, stream: &str) -> bool {
        self.schemas.contains_key(stream)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Checks a record against the latest schema of its stream.
    ///
    /// Key properties are checked first, then the record's shape.
    pub fn validate(&self, message: &RecordMessage) -> Result<(), SchemaViolation> {
        let Some(schema) = self.schemas.get(&message.stream) else {
            return Err(SchemaViolation::MissingSchema {
                stream: message.stream.clone(),
            });
        };

        for key in &schema.key_properties {
            let present = message
                .record
                .get(key)
                .is_some_and(|value| !value.is_null());

            if !present {
                return Err(SchemaViolation::MissingKeyProperty {
                    stream: message.stream.clone(),
                    field: key.clone(),
                });
            }
        }

        schema
            .node
            .validate_record(&message.record)
            .map_err(|violation| SchemaViolation::from_node(&message.stream, violation))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::{Record, Value};

    fn schema(stream: &str, descriptor: serde_json::Value, keys: &[&str]) -> SchemaMessage {
        SchemaMessage {
            stream: stream.to_string(),
            schema: Value::from(descriptor),
            key_properties: keys.iter().map(|key| key.to_string()).collect(),
            bookmark_properties: vec![],
        }
    }

    fn record(stream: &str, fields: serde_json::Value) -> RecordMessage {
        let Value::Object(record) = Value::from(fields) else {
            panic!("record fields must be an object");
        };

        RecordMessage {
            stream: stream.to_string(),
            record,
            time_extracted: None,
        }
    }

    fn orders_schema() -> SchemaMessage {
        schema(
            "orders",
            json!({
                "type": "object",
                "properties": {
                    "id": {"type": "integer"},
                    "total": {"type": "number"}
                }
            }),
            &["id"],
        )
    }

    #[test]
    fn records_without_schema_are_rejected() {
        let registry = SchemaRegistry::new();

        let violation = registry
            .validate(&record("orders", json!({"id": 1})))
            .unwrap_err();

        assert_eq!(
            violation,
            SchemaViolation::MissingSchema {
                stream: "orders".to_string()
            }
        );
        assert!(violation.is_ordering_violation());
    }

    #[test]
    fn valid_records_pass() {
        let mut registry = SchemaRegistry::new();
        registry.update(&orders_schema());

        assert!(
            registry
                .validate(&record("orders", json!({"id": 1, "total": 10})))
                .is_ok()
        );
    }

    #[test]
    fn key_properties_must_be_present_and_not_null() {
        let mut registry = SchemaRegistry::new();
        registry.update(&orders_schema());

        for fields in [json!({"total": 10}), json!({"id": null, "total": 10})] {
            assert_eq!(
                registry.validate(&record("orders", fields)),
                Err(SchemaViolation::MissingKeyProperty {
                    stream: "orders".to_string(),
                    field: "id".to_string(),
                })
            );
        }
    }

    #[test]
    fn type_mismatches_name_stream_and_field() {
        let mut registry = SchemaRegistry::new();
        registry.update(&orders_schema());

        assert_eq!(
            registry.validate(&record("orders", json!({"id": 1, "total": "ten"}))),
            Err(SchemaViolation::TypeMismatch {
                stream: "orders".to_string(),
                field: "total".to_string(),
                expected: "number".to_string(),
                found: "string",
            })
        );
    }

    #[test]
    fn new_schema_replaces_the_previous_one() {
        let mut registry = SchemaRegistry::new();
        registry.update(&orders_schema());
        registry.update(&schema(
            "orders",
            json!({"type": "object", "properties": {"id": {"type": "string"}}}),
            &[],
        ));

        assert_eq!(registry.len(), 1);
        assert!(
            registry
                .validate(&record("orders", json!({"id": "A-1"})))
                .is_ok()
        );
        assert!(
            registry
                .validate(&record("orders", json!({"id": 1})))
                .is_err()
        );
        assert!(registry.get("orders").unwrap().key_properties.is_empty());
    }

    #[test]
    fn streams_are_validated_independently() {
        let mut registry = SchemaRegistry::new();
        registry.update(&orders_schema());

        let mut customers = Record::new();
        customers.insert("id".to_string(), Value::from(1i64));

        assert!(!registry.contains("customers"));
        assert!(
            registry
                .validate(&RecordMessage {
                    stream: "customers".to_string(),
                    record: customers,
                    time_extracted: None,
                })
                .is_err()
        );
    }
}
