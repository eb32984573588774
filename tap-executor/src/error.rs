use std::error;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Result type of fallible executor operations.
pub type TapResult<T> = Result<T, TapError>;

/// Main error type of the executor.
///
/// A [`TapError`] is either a single error, made of an [`ErrorKind`], a static description and
/// an optional dynamic detail, or an aggregate of several errors. The kind drives the
/// coordinator's decisions (retry, skip, fail) while description and detail are kept verbatim
/// for operators.
#[derive(Debug, Clone)]
pub struct TapError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<TapError>),
}

/// Categories of errors raised while executing taps.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorKind {
    // Protocol
    /// A single line of tap output could not be decoded. Counted, not fatal on its own.
    DecodeError,
    /// Too many decode errors, or a record arrived before its stream's schema.
    FatalProtocolError,
    /// A record did not match the schema of its stream.
    SchemaViolation,

    // Persistence and delivery
    /// The state store failed. Retried with backoff.
    StoreError,
    /// The state store refused a write because the run is already terminal or unknown.
    StoreConflict,
    /// The sink failed to accept a batch. Retried with backoff.
    SinkError,

    // Process lifecycle
    /// The tap could not be spawned or exited unsuccessfully.
    ProcessError,
    /// The run was stopped on request.
    Cancelled,
    /// The tap produced no output within the liveness timeout.
    LivenessTimeout,
    /// The run exceeded its wall-clock limit.
    WallClockTimeout,

    // General
    ConfigError,
    IoError,
    SerializationError,
    DeserializationError,
    InvalidState,
    Unknown,
}

impl ErrorKind {
    /// Returns whether an operation that failed with this kind may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::StoreError | ErrorKind::SinkError | ErrorKind::IoError
        )
    }
}

impl TapError {
    /// Creates a [`TapError`] aggregating multiple errors.
    pub fn many(errors: Vec<TapError>) -> TapError {
        TapError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregates, the kind of the first error, or [`ErrorKind::Unknown`] when empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattened.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the dynamic detail, or the first one found in an aggregate.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }

    /// Returns whether repeating the failed operation may succeed.
    ///
    /// Aggregates are retryable only if all their errors are.
    pub fn is_retryable(&self) -> bool {
        match self.repr {
            ErrorRepr::Many(ref errors) => {
                !errors.is_empty() && errors.iter().all(|err| err.is_retryable())
            }
            _ => self.kind().is_retryable(),
        }
    }
}

impl PartialEq for TapError {
    fn eq(&self, other: &TapError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for TapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")?;
                } else if errors.len() == 1 {
                    errors[0].fmt(f)?;
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl error::Error for TapError {}

impl From<(ErrorKind, &'static str)> for TapError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> TapError {
        TapError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for TapError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> TapError {
        TapError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for TapError
where
    E: Into<TapError>,
{
    fn from(errors: Vec<E>) -> TapError {
        TapError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<std::io::Error> for TapError {
    fn from(err: std::io::Error) -> TapError {
        TapError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::IoError,
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

/// Maps [`serde_json::Error`] by category: syntax, data and EOF errors are deserialization
/// failures, I/O errors stay I/O errors.
impl From<serde_json::Error> for TapError {
    fn from(err: serde_json::Error) -> TapError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        TapError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

/// Database errors surface from the Postgres state store and are retryable store failures.
///
/// The Postgres sink maps its errors to [`ErrorKind::SinkError`] explicitly.
impl From<sqlx::Error> for TapError {
    fn from(err: sqlx::Error) -> TapError {
        let description = match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                "Database connection pool unavailable"
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => "Database connection failed",
            sqlx::Error::Database(_) => "Database query failed",
            _ => "Database operation failed",
        };

        TapError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::StoreError,
                description,
                err.to_string(),
            ),
        }
    }
}

impl From<uuid::Error> for TapError {
    fn from(err: uuid::Error) -> TapError {
        TapError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::DeserializationError,
                "UUID parsing failed",
                err.to_string(),
            ),
        }
    }
}

impl From<tap_config::shared::ValidationError> for TapError {
    fn from(err: tap_config::shared::ValidationError) -> TapError {
        TapError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConfigError,
                "Invalid configuration",
                err.to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, tap_error};

    #[test]
    fn test_simple_error_creation() {
        let err = TapError::from((ErrorKind::Cancelled, "Run cancelled"));
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.detail(), None);
        assert_eq!(err.kinds(), vec![ErrorKind::Cancelled]);
    }

    #[test]
    fn test_error_with_detail() {
        let err = TapError::from((
            ErrorKind::ProcessError,
            "Tap exited unsuccessfully",
            "exit code 1: connection refused".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::ProcessError);
        assert_eq!(err.detail(), Some("exit code 1: connection refused"));
        assert_eq!(
            err.to_string(),
            "ProcessError: Tap exited unsuccessfully -> exit code 1: connection refused"
        );
    }

    #[test]
    fn test_multiple_errors() {
        let multi_err = TapError::many(vec![
            TapError::from((ErrorKind::SinkError, "Sink unavailable")),
            TapError::from((ErrorKind::StoreError, "Store unavailable", "timeout".to_string())),
        ]);

        assert_eq!(multi_err.kind(), ErrorKind::SinkError);
        assert_eq!(
            multi_err.kinds(),
            vec![ErrorKind::SinkError, ErrorKind::StoreError]
        );
        assert_eq!(multi_err.detail(), Some("timeout"));
        assert!(multi_err.to_string().contains("Multiple errors occurred (2 total)"));
    }

    #[test]
    fn test_empty_multiple_errors() {
        let multi_err = TapError::many(vec![]);
        assert_eq!(multi_err.kind(), ErrorKind::Unknown);
        assert_eq!(multi_err.kinds(), vec![]);
        assert!(!multi_err.is_retryable());
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(TapError::from((ErrorKind::StoreError, "down")).is_retryable());
        assert!(TapError::from((ErrorKind::SinkError, "down")).is_retryable());
        assert!(!TapError::from((ErrorKind::StoreConflict, "terminal")).is_retryable());
        assert!(!TapError::from((ErrorKind::FatalProtocolError, "bad")).is_retryable());

        let mixed = TapError::many(vec![
            TapError::from((ErrorKind::SinkError, "down")),
            TapError::from((ErrorKind::Cancelled, "stop")),
        ]);
        assert!(!mixed.is_retryable());
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: TapError = json_err.into();
        assert_eq!(err.kind(), ErrorKind::DeserializationError);
        assert!(err.detail().is_some());
    }

    #[test]
    fn test_macros() {
        let err = tap_error!(ErrorKind::StoreConflict, "Run is terminal");
        assert_eq!(err.kind(), ErrorKind::StoreConflict);

        let err = tap_error!(ErrorKind::SinkError, "Delivery failed", "503");
        assert_eq!(err.detail(), Some("503"));

        fn fails() -> TapResult<()> {
            bail!(ErrorKind::InvalidState, "Unexpected state", "running");
        }
        assert_eq!(fails().unwrap_err().kind(), ErrorKind::InvalidState);
    }
}
