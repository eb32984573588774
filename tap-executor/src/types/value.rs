use std::collections::BTreeMap;
use std::fmt;

/// Field name to value mapping carried by a RECORD message.
pub type Record = BTreeMap<String, Value>;

/// A JSON number, keeping track of how it was written.
///
/// Integers are kept exact so that `integer` schema checks never go through a float.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Number {
    /// Returns `true` when the number has no fractional part.
    ///
    /// `1.0` is integral, `1.5` and non-finite floats are not.
    pub fn is_integral(&self) -> bool {
        match self {
            Number::Int(_) | Number::UInt(_) => true,
            Number::Float(value) => value.is_finite() && value.fract() == 0.0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::Int(value) => value as f64,
            Number::UInt(value) => value as f64,
            Number::Float(value) => value,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(value) => write!(f, "{value}"),
            Number::UInt(value) => write!(f, "{value}"),
            Number::Float(value) => write!(f, "{value}"),
        }
    }
}

/// A value produced by a tap.
///
/// This is the closed set of JSON shapes. Schema validation operates on this type only;
/// conversion from and to `serde_json` happens at the protocol boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Name of the JSON type of this value, as used in schema `type` keywords.
    ///
    /// Integral numbers report `integer`, other numbers `number`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(number) if number.is_integral() => "integer",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    /// Looks up `key` when this value is an object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(Number::Int(value))
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Number(Number::UInt(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(Number::Float(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::Array(values)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_floats_report_integer() {
        assert_eq!(Value::from(3.0).type_name(), "integer");
        assert_eq!(Value::from(3.5).type_name(), "number");
        assert_eq!(Value::from(f64::NAN).type_name(), "number");
        assert_eq!(Value::from(-7i64).type_name(), "integer");
        assert_eq!(Value::from(u64::MAX).type_name(), "integer");
    }

    #[test]
    fn get_only_looks_into_objects() {
        let mut map = BTreeMap::new();
        map.insert("id".to_string(), Value::from(1i64));
        let object = Value::Object(map);

        assert_eq!(object.get("id"), Some(&Value::from(1i64)));
        assert_eq!(object.get("missing"), None);
        assert_eq!(Value::from("id").get("id"), None);
    }
}
