use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::{Number, Value};

impl From<serde_json::Number> for Number {
    fn from(number: serde_json::Number) -> Self {
        if let Some(value) = number.as_i64() {
            Number::Int(value)
        } else if let Some(value) = number.as_u64() {
            Number::UInt(value)
        } else {
            // Without arbitrary precision every JSON number fits in an f64.
            Number::Float(number.as_f64().unwrap_or(f64::NAN))
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Bool(value),
            serde_json::Value::Number(number) => Value::Number(number.into()),
            serde_json::Value::String(value) => Value::String(value),
            serde_json::Value::Array(values) => {
                Value::Array(values.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

/// Non-finite floats have no JSON representation and become `null`.
impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(value) => serde_json::Value::Bool(*value),
            Value::Number(Number::Int(value)) => serde_json::Value::from(*value),
            Value::Number(Number::UInt(value)) => serde_json::Value::from(*value),
            Value::Number(Number::Float(value)) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(value) => serde_json::Value::String(value.clone()),
            Value::Array(values) => {
                serde_json::Value::Array(values.iter().map(serde_json::Value::from).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), serde_json::Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        serde_json::Value::from(&value)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(value) => serializer.serialize_bool(*value),
            Value::Number(Number::Int(value)) => serializer.serialize_i64(*value),
            Value::Number(Number::UInt(value)) => serializer.serialize_u64(*value),
            Value::Number(Number::Float(value)) => serializer.serialize_f64(*value),
            Value::String(value) => serializer.serialize_str(value),
            Value::Array(values) => serializer.collect_seq(values),
            Value::Object(map) => {
                let mut state = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    state.serialize_entry(key, value)?;
                }
                state.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn numbers_keep_their_representation() {
        assert_eq!(Value::from(json!(-3)), Value::Number(Number::Int(-3)));
        assert_eq!(
            Value::from(json!(u64::MAX)),
            Value::Number(Number::UInt(u64::MAX))
        );
        assert_eq!(Value::from(json!(2.5)), Value::Number(Number::Float(2.5)));
    }

    #[test]
    fn nested_documents_convert_both_ways() {
        let document = json!({
            "id": 7,
            "billing": {"city": "Lyon", "zip": null},
            "line_items": [{"sku": "A-1", "qty": 2}, {"sku": "B-2", "qty": 1.5}],
            "paid": true
        });

        let value = Value::from(document.clone());
        assert_eq!(
            value.get("billing").and_then(|billing| billing.get("city")),
            Some(&Value::from("Lyon"))
        );
        assert_eq!(serde_json::Value::from(&value), document);
        assert_eq!(serde_json::to_value(&value).unwrap(), document);
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(
            serde_json::Value::from(&Value::from(f64::INFINITY)),
            serde_json::Value::Null
        );
    }
}
