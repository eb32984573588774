use thiserror::Error;

use crate::error::{ErrorKind, TapError};
use crate::schema::node::NodeViolation;

/// Reason a record was rejected by the schema registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("no schema was received for stream `{stream}` before its first record")]
    MissingSchema { stream: String },

    #[error("key property `{field}` of stream `{stream}` is missing or null")]
    MissingKeyProperty { stream: String, field: String },

    #[error("field `{field}` of stream `{stream}` should be {expected} but is {found}")]
    TypeMismatch {
        stream: String,
        field: String,
        expected: String,
        found: &'static str,
    },

    #[error("required field `{field}` of stream `{stream}` is missing")]
    MissingRequiredField { stream: String, field: String },

    #[error("field `{field}` is not allowed by the schema of stream `{stream}`")]
    UnexpectedField { stream: String, field: String },
}

impl SchemaViolation {
    pub(crate) fn from_node(stream: &str, violation: NodeViolation) -> Self {
        let stream = stream.to_string();
        match violation {
            NodeViolation::TypeMismatch {
                path,
                expected,
                found,
            } => SchemaViolation::TypeMismatch {
                stream,
                field: path,
                expected,
                found,
            },
            NodeViolation::MissingRequiredField { path } => {
                SchemaViolation::MissingRequiredField {
                    stream,
                    field: path,
                }
            }
            NodeViolation::UnexpectedField { path } => SchemaViolation::UnexpectedField {
                stream,
                field: path,
            },
        }
    }

    /// Returns the stream of the rejected record.
    pub fn stream(&self) -> &str {
        match self {
            SchemaViolation::MissingSchema { stream }
            | SchemaViolation::MissingKeyProperty { stream, .. }
            | SchemaViolation::TypeMismatch { stream, .. }
            | SchemaViolation::MissingRequiredField { stream, .. }
            | SchemaViolation::UnexpectedField { stream, .. } => stream,
        }
    }

    /// A record arriving before its schema breaks message ordering rather than the schema,
    /// so it fails the run whatever the violation policy is.
    pub fn is_ordering_violation(&self) -> bool {
        matches!(self, SchemaViolation::MissingSchema { .. })
    }
}

impl From<SchemaViolation> for TapError {
    fn from(violation: SchemaViolation) -> Self {
        if violation.is_ordering_violation() {
            TapError::from((
                ErrorKind::FatalProtocolError,
                "Record received before the schema of its stream",
                violation.to_string(),
            ))
        } else {
            TapError::from((
                ErrorKind::SchemaViolation,
                "Record does not match the schema of its stream",
                violation.to_string(),
            ))
        }
    }
}
