use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::{ErrorKind, TapError};
use crate::types::{
    Record, RecordMessage, SchemaMessage, StateMessage, TapMessage, Value,
};

/// Longest prefix of an offending line kept in error messages.
const MAX_RAW_LINE_IN_MESSAGE: usize = 200;

/// Why a line could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeReason {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("the message is not a JSON object")]
    NotAnObject,

    #[error("the message has no `type` field")]
    MissingType,

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("the message has no `{0}` field")]
    MissingField(&'static str),

    #[error("the `{field}` field must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("`time_extracted` is not an RFC 3339 timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("the line is {length} bytes long, the limit is {limit} bytes")]
    LineTooLong { length: usize, limit: usize },

    #[error("the line is not valid UTF-8")]
    InvalidUtf8,
}

/// A line of tap output that is not a valid protocol message.
///
/// Decode errors are not fatal by themselves: the coordinator counts them and fails the run
/// once a threshold is exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub reason: DecodeReason,
    pub raw_line: String,
}

impl DecodeError {
    pub fn new(reason: DecodeReason, raw_line: impl Into<String>) -> Self {
        Self {
            reason,
            raw_line: raw_line.into(),
        }
    }

    /// Returns the beginning of the offending line, suitable for logs.
    pub fn raw_line_prefix(&self) -> &str {
        if self.raw_line.len() <= MAX_RAW_LINE_IN_MESSAGE {
            return &self.raw_line;
        }

        let mut end = MAX_RAW_LINE_IN_MESSAGE;
        while !self.raw_line.is_char_boundary(end) {
            end -= 1;
        }

        &self.raw_line[..end]
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line: {:?})", self.reason, self.raw_line_prefix())
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for TapError {
    fn from(err: DecodeError) -> Self {
        TapError::from((
            ErrorKind::DecodeError,
            "Tap output line could not be decoded",
            err.to_string(),
        ))
    }
}

type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Decodes one line of tap output.
///
/// Returns `Ok(None)` for blank lines and for message types that carry nothing the executor
/// needs. The decoder keeps no state between lines.
pub fn decode_line(line: &str) -> Result<Option<TapMessage>, DecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    decode_object(trimmed).map_err(|reason| DecodeError::new(reason, trimmed))
}

fn decode_object(line: &str) -> Result<Option<TapMessage>, DecodeReason> {
    let json = serde_json::from_str::<serde_json::Value>(line)
        .map_err(|err| DecodeReason::InvalidJson(err.to_string()))?;

    let serde_json::Value::Object(mut map) = json else {
        return Err(DecodeReason::NotAnObject);
    };

    let message_type = match map.remove("type") {
        Some(serde_json::Value::String(message_type)) => message_type,
        Some(_) => {
            return Err(DecodeReason::InvalidField {
                field: "type",
                expected: "a string",
            });
        }
        None => return Err(DecodeReason::MissingType),
    };

    match message_type.as_str() {
        "SCHEMA" => decode_schema(map).map(|message| Some(TapMessage::Schema(message))),
        "RECORD" => decode_record(map).map(|message| Some(TapMessage::Record(message))),
        "STATE" => decode_state(map).map(|message| Some(TapMessage::State(message))),
        "ACTIVATE_VERSION" => Ok(None),
        _ => Err(DecodeReason::UnknownType(message_type)),
    }
}

fn decode_schema(mut map: JsonMap) -> Result<SchemaMessage, DecodeReason> {
    let stream = take_string(&mut map, "stream")?;

    let schema = match map.remove("schema") {
        Some(schema @ serde_json::Value::Object(_)) => Value::from(schema),
        Some(_) => {
            return Err(DecodeReason::InvalidField {
                field: "schema",
                expected: "an object",
            });
        }
        None => return Err(DecodeReason::MissingField("schema")),
    };

    let key_properties = take_string_list(&mut map, "key_properties")?;
    let bookmark_properties = take_string_list(&mut map, "bookmark_properties")?;

    Ok(SchemaMessage {
        stream,
        schema,
        key_properties,
        bookmark_properties,
    })
}

fn decode_record(mut map: JsonMap) -> Result<RecordMessage, DecodeReason> {
    let stream = take_string(&mut map, "stream")?;

    let record: Record = match map.remove("record") {
        Some(serde_json::Value::Object(record)) => record
            .into_iter()
            .map(|(key, value)| (key, Value::from(value)))
            .collect(),
        Some(_) => {
            return Err(DecodeReason::InvalidField {
                field: "record",
                expected: "an object",
            });
        }
        None => return Err(DecodeReason::MissingField("record")),
    };

    let time_extracted = match map.remove("time_extracted") {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(timestamp)) => Some(
            DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|_| DecodeReason::InvalidTimestamp(timestamp.clone()))?
                .with_timezone(&Utc),
        ),
        Some(_) => {
            return Err(DecodeReason::InvalidField {
                field: "time_extracted",
                expected: "a string",
            });
        }
    };

    Ok(RecordMessage {
        stream,
        record,
        time_extracted,
    })
}

fn decode_state(mut map: JsonMap) -> Result<StateMessage, DecodeReason> {
    match map.remove("value") {
        Some(value) => Ok(StateMessage {
            value: Value::from(value),
        }),
        None => Err(DecodeReason::MissingField("value")),
    }
}

fn take_string(map: &mut JsonMap, field: &'static str) -> Result<String, DecodeReason> {
    match map.remove(field) {
        Some(serde_json::Value::String(value)) => Ok(value),
        Some(_) => Err(DecodeReason::InvalidField {
            field,
            expected: "a string",
        }),
        None => Err(DecodeReason::MissingField(field)),
    }
}

/// Reads an optional list of field names. Absent or `null` means empty.
fn take_string_list(map: &mut JsonMap, field: &'static str) -> Result<Vec<String>, DecodeReason> {
    let invalid = DecodeReason::InvalidField {
        field,
        expected: "an array of strings",
    };

    match map.remove(field) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(values)) => values
            .into_iter()
            .map(|value| match value {
                serde_json::Value::String(value) => Ok(value),
                _ => Err(invalid.clone()),
            })
            .collect(),
        Some(_) => Err(invalid),
    }
}
