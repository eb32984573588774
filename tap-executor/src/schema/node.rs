use std::collections::BTreeMap;
use std::fmt;

use crate::types::{Record, Value};

/// JSON types a schema node may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "null" => Some(JsonType::Null),
            "boolean" => Some(JsonType::Boolean),
            "integer" => Some(JsonType::Integer),
            "number" => Some(JsonType::Number),
            "string" => Some(JsonType::String),
            "array" => Some(JsonType::Array),
            "object" => Some(JsonType::Object),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Array => "array",
            JsonType::Object => "object",
        }
    }

    /// Returns whether `value` is of this type. Integral numbers are also `integer`.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (JsonType::Null, Value::Null) => true,
            (JsonType::Boolean, Value::Bool(_)) => true,
            (JsonType::Integer, Value::Number(number)) => number.is_integral(),
            (JsonType::Number, Value::Number(_)) => true,
            (JsonType::String, Value::String(_)) => true,
            (JsonType::Array, Value::Array(_)) => true,
            (JsonType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A violation found inside a value, located by a dotted path such as `billing.city` or
/// `line_items[2].sku`. The root is reported as `$`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeViolation {
    TypeMismatch {
        path: String,
        expected: String,
        found: &'static str,
    },
    MissingRequiredField {
        path: String,
    },
    UnexpectedField {
        path: String,
    },
}

/// Compiled form of a JSON-schema-like type descriptor.
///
/// Only the keywords needed to check the shape of records are understood: `type`,
/// `properties`, `required`, `additionalProperties`, `items` and `anyOf`. Anything else, such
/// as `format` or `maxLength`, is ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaNode {
    /// Accepted types. `None` accepts every value.
    types: Option<Vec<JsonType>>,
    properties: BTreeMap<String, SchemaNode>,
    required: Vec<String>,
    additional_properties: bool,
    items: Option<Box<SchemaNode>>,
    any_of: Vec<SchemaNode>,
}

impl SchemaNode {
    /// A node accepting every value.
    pub fn any() -> Self {
        Self {
            additional_properties: true,
            ..Default::default()
        }
    }

    /// Compiles a descriptor. Descriptors that are not objects accept every value.
    pub fn compile(descriptor: &Value) -> Self {
        let Some(map) = descriptor.as_object() else {
            return Self::any();
        };

        let types = match map.get("type") {
            Some(Value::String(name)) => JsonType::parse(name).map(|json_type| vec![json_type]),
            Some(Value::Array(names)) => {
                let types = names
                    .iter()
                    .filter_map(|name| name.as_str().and_then(JsonType::parse))
                    .collect::<Vec<_>>();

                // A list made only of unknown names constrains nothing.
                (!types.is_empty()).then_some(types)
            }
            _ => None,
        };

        let properties = match map.get("properties") {
            Some(Value::Object(properties)) => properties
                .iter()
                .map(|(name, descriptor)| (name.clone(), SchemaNode::compile(descriptor)))
                .collect(),
            _ => BTreeMap::new(),
        };

        let required = match map.get("required") {
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(|name| name.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        // Only a literal `false` closes an object.
        let additional_properties = !matches!(
            map.get("additionalProperties"),
            Some(Value::Bool(false))
        );

        let items = match map.get("items") {
            Some(descriptor @ Value::Object(_)) => Some(Box::new(SchemaNode::compile(descriptor))),
            _ => None,
        };

        let any_of = match map.get("anyOf") {
            Some(Value::Array(alternatives)) => {
                alternatives.iter().map(SchemaNode::compile).collect()
            }
            _ => Vec::new(),
        };

        Self {
            types,
            properties,
            required,
            additional_properties,
            items,
            any_of,
        }
    }

    /// Returns the compiled child node of property `name`, if declared.
    pub fn property(&self, name: &str) -> Option<&SchemaNode> {
        self.properties.get(name)
    }

    /// Validates a value against this node.
    ///
    /// `path` is the location of `value` inside the record, empty for the root. The first
    /// violation found is returned; properties are visited in name order.
    pub fn validate(&self, path: &str, value: &Value) -> Result<(), NodeViolation> {
        if let Some(types) = &self.types
            && !types.iter().any(|json_type| json_type.accepts(value))
        {
            return Err(NodeViolation::TypeMismatch {
                path: display_path(path),
                expected: join_types(types),
                found: value.type_name(),
            });
        }

        if !self.any_of.is_empty() {
            self.validate_any_of(path, value)?;
        }

        match value {
            Value::Object(map) => self.validate_object(path, map),
            Value::Array(values) => match &self.items {
                Some(items) => values
                    .iter()
                    .enumerate()
                    .try_for_each(|(index, value)| {
                        items.validate(&format!("{path}[{index}]"), value)
                    }),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Validates a record, the root object of a RECORD message.
    pub fn validate_record(&self, record: &Record) -> Result<(), NodeViolation> {
        if !self.any_of.is_empty() {
            return self.validate("", &Value::Object(record.clone()));
        }

        if let Some(types) = &self.types
            && !types.contains(&JsonType::Object)
        {
            return Err(NodeViolation::TypeMismatch {
                path: display_path(""),
                expected: join_types(types),
                found: "object",
            });
        }

        self.validate_object("", record)
    }

    fn validate_object(
        &self,
        path: &str,
        map: &BTreeMap<String, Value>,
    ) -> Result<(), NodeViolation> {
        for name in &self.required {
            if !map.contains_key(name) {
                return Err(NodeViolation::MissingRequiredField {
                    path: child_path(path, name),
                });
            }
        }

        for (name, value) in map {
            match self.properties.get(name) {
                Some(node) => node.validate(&child_path(path, name), value)?,
                None if !self.additional_properties => {
                    return Err(NodeViolation::UnexpectedField {
                        path: child_path(path, name),
                    });
                }
                None => {}
            }
        }

        Ok(())
    }

    fn validate_any_of(&self, path: &str, value: &Value) -> Result<(), NodeViolation> {
        let mut first_violation = None;
        for alternative in &self.any_of {
            match alternative.validate(path, value) {
                Ok(()) => return Ok(()),
                Err(violation) => {
                    first_violation.get_or_insert(violation);
                }
            }
        }

        if self.any_of.len() == 1
            && let Some(violation) = first_violation
        {
            return Err(violation);
        }

        let mut expected = self
            .any_of
            .iter()
            .filter_map(|alternative| alternative.types.as_deref())
            .flatten()
            .copied()
            .collect::<Vec<_>>();
        expected.sort();
        expected.dedup();

        Err(NodeViolation::TypeMismatch {
            path: display_path(path),
            expected: format!("anyOf[{}]", join_types(&expected)),
            found: value.type_name(),
        })
    }
}

fn child_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "$".to_string()
    } else {
        path.to_string()
    }
}

fn join_types(types: &[JsonType]) -> String {
    types
        .iter()
        .map(JsonType::as_str)
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn node(descriptor: serde_json::Value) -> SchemaNode {
        SchemaNode::compile(&Value::from(descriptor))
    }

    fn check(node: &SchemaNode, value: serde_json::Value) -> Result<(), NodeViolation> {
        node.validate("", &Value::from(value))
    }

    #[test]
    fn integral_numbers_satisfy_integer() {
        let node = node(json!({"type": "integer"}));

        assert!(check(&node, json!(3)).is_ok());
        assert!(check(&node, json!(3.0)).is_ok());
        assert_eq!(
            check(&node, json!(3.5)),
            Err(NodeViolation::TypeMismatch {
                path: "$".to_string(),
                expected: "integer".to_string(),
                found: "number",
            })
        );
    }

    #[test]
    fn nullable_types_are_expressed_as_lists() {
        let node = node(json!({"type": ["null", "string"]}));

        assert!(check(&node, json!(null)).is_ok());
        assert!(check(&node, json!("a")).is_ok());
        assert!(check(&node, json!(true)).is_err());
    }

    #[test]
    fn missing_or_unknown_type_accepts_anything() {
        for descriptor in [json!({}), json!({"type": "decimal"}), json!({"type": ["money"]})] {
            let node = node(descriptor);
            assert!(check(&node, json!({"nested": [1, "two"]})).is_ok());
            assert!(check(&node, json!(null)).is_ok());
        }
    }

    #[test]
    fn nested_violations_use_dotted_paths() {
        let node = node(json!({
            "type": "object",
            "properties": {
                "billing": {
                    "type": "object",
                    "properties": {"city": {"type": "string"}}
                },
                "line_items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {"sku": {"type": "string"}}
                    }
                }
            }
        }));

        assert_eq!(
            check(&node, json!({"billing": {"city": 75001}})),
            Err(NodeViolation::TypeMismatch {
                path: "billing.city".to_string(),
                expected: "string".to_string(),
                found: "integer",
            })
        );
        assert_eq!(
            check(
                &node,
                json!({"line_items": [{"sku": "a"}, {"sku": "b"}, {"sku": false}]})
            ),
            Err(NodeViolation::TypeMismatch {
                path: "line_items[2].sku".to_string(),
                expected: "string".to_string(),
                found: "boolean",
            })
        );
    }

    #[test]
    fn required_and_closed_objects() {
        let node = node(json!({
            "type": "object",
            "required": ["id"],
            "additionalProperties": false,
            "properties": {"id": {"type": "integer"}}
        }));

        assert_eq!(
            check(&node, json!({})),
            Err(NodeViolation::MissingRequiredField {
                path: "id".to_string()
            })
        );
        assert_eq!(
            check(&node, json!({"id": 1, "extra": true})),
            Err(NodeViolation::UnexpectedField {
                path: "extra".to_string()
            })
        );
        assert!(check(&node, json!({"id": 1})).is_ok());
    }

    #[test]
    fn open_objects_accept_undeclared_fields() {
        let node = node(json!({"type": "object", "properties": {"id": {"type": "integer"}}}));
        assert!(check(&node, json!({"id": 1, "extra": "kept"})).is_ok());
    }

    #[test]
    fn any_of_accepts_any_alternative() {
        let node = node(json!({
            "anyOf": [
                {"type": "string", "format": "date-time"},
                {"type": ["null", "integer"]}
            ]
        }));

        assert!(check(&node, json!("2024-01-01T00:00:00Z")).is_ok());
        assert!(check(&node, json!(null)).is_ok());
        assert_eq!(
            check(&node, json!(1.5)),
            Err(NodeViolation::TypeMismatch {
                path: "$".to_string(),
                expected: "anyOf[null|integer|string]".to_string(),
                found: "number",
            })
        );
    }
}
