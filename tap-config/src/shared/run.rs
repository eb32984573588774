use serde::{Deserialize, Serialize};

use crate::shared::{BatchConfig, RetryConfig, ValidationError};

/// What the coordinator does with a record that does not match its stream's schema.
///
/// Records for streams that never received a SCHEMA message are not covered by this policy:
/// they always fail the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaViolationPolicy {
    /// Drop the record, count it, and keep going.
    Skip,
    /// Fail the run.
    #[default]
    Abort,
}

/// Operational limits of a single run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RunConfig {
    /// Record batching before delivery to the sink.
    pub batch: BatchConfig,
    /// Number of undecodable lines tolerated. The run fails on the next one.
    pub max_decode_errors: u32,
    /// Handling of records violating their schema.
    pub schema_violation_policy: SchemaViolationPolicy,
    /// The run fails when the tap produces no output for this many milliseconds.
    pub liveness_timeout_ms: u64,
    /// Optional upper bound, in milliseconds, for the whole run.
    pub wall_clock_timeout_ms: Option<u64>,
    /// Retry policy for bookmark commits.
    pub store_retry: RetryConfig,
    /// Retry policy for sink deliveries.
    pub sink_retry: RetryConfig,
    /// Longest accepted line of tap output, in bytes.
    pub max_line_bytes: usize,
    /// Amount of trailing stderr output, in bytes, kept for failure reports.
    pub stderr_tail_bytes: usize,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.batch.validate()?;
        self.store_retry.validate("run.store_retry")?;
        self.sink_retry.validate("run.sink_retry")?;

        if self.liveness_timeout_ms == 0 {
            return Err(ValidationError::LivenessTimeoutZero);
        }

        if self.max_line_bytes == 0 {
            return Err(ValidationError::MaxLineBytesZero);
        }

        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            max_decode_errors: 10,
            schema_violation_policy: SchemaViolationPolicy::default(),
            liveness_timeout_ms: 300_000,
            wall_clock_timeout_ms: None,
            store_retry: RetryConfig::default(),
            sink_retry: RetryConfig::default(),
            max_line_bytes: 16 * 1024 * 1024,
            stderr_tail_bytes: 64 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RunConfig::default();

        assert_eq!(config.max_decode_errors, 10);
        assert_eq!(config.batch.max_size, 500);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn rejects_zero_sized_batches_and_attempts() {
        let mut config = RunConfig::default();
        config.batch.max_size = 0;
        assert_eq!(config.validate(), Err(ValidationError::BatchMaxSizeZero));

        let mut config = RunConfig::default();
        config.sink_retry.max_attempts = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::RetryMaxAttemptsZero("run.sink_retry"))
        );

        let mut config = RunConfig::default();
        config.store_retry.backoff_factor = 0.5;
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidBackoffFactor("run.store_retry"))
        );
    }

    #[test]
    fn partial_documents_fall_back_to_defaults() {
        let config: RunConfig = serde_json::from_str(
            r#"{"max_decode_errors": 3, "schema_violation_policy": "skip"}"#,
        )
        .unwrap();

        assert_eq!(config.max_decode_errors, 3);
        assert_eq!(config.schema_violation_policy, SchemaViolationPolicy::Skip);
        assert_eq!(config.batch, BatchConfig::default());
    }
}
