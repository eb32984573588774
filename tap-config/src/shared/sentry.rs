use serde::{Deserialize, Serialize};

use crate::SerializableSecretString;

/// Sentry error reporting configuration for the runner binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentryConfig {
    /// Sentry DSN errors are reported to.
    pub dsn: SerializableSecretString,
}
