use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::value::{Record, Value};

/// Declares the shape of the records of one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaMessage {
    pub stream: String,
    /// JSON-schema-like type descriptor, always an object.
    pub schema: Value,
    /// Ordered field names forming the logical key of the stream's records.
    pub key_properties: Vec<String>,
    /// Ordered field names the tap uses to track its progress. Carried through unchanged.
    pub bookmark_properties: Vec<String>,
}

/// One extracted record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMessage {
    pub stream: String,
    pub record: Record,
    pub time_extracted: Option<DateTime<Utc>>,
}

/// Extraction progress reported by the tap. Not attached to any stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StateMessage {
    pub value: Value,
}

/// A decoded line of tap output.
#[derive(Debug, Clone, PartialEq)]
pub enum TapMessage {
    Schema(SchemaMessage),
    Record(RecordMessage),
    State(StateMessage),
}

impl TapMessage {
    /// Returns the stream the message belongs to, `None` for STATE messages.
    pub fn stream(&self) -> Option<&str> {
        match self {
            TapMessage::Schema(message) => Some(&message.stream),
            TapMessage::Record(message) => Some(&message.stream),
            TapMessage::State(_) => None,
        }
    }

    /// Returns the protocol `type` tag of the message.
    pub fn type_tag(&self) -> &'static str {
        match self {
            TapMessage::Schema(_) => "SCHEMA",
            TapMessage::Record(_) => "RECORD",
            TapMessage::State(_) => "STATE",
        }
    }
}

/// The value of the last STATE message committed for a run.
///
/// Opaque to the executor: it is handed back to the tap on the next run through `--state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bookmark(Value);

impl Bookmark {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

impl From<StateMessage> for Bookmark {
    fn from(message: StateMessage) -> Self {
        Self(message.value)
    }
}
