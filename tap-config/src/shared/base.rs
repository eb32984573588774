use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A batch must be able to hold at least one record.
    #[error("`batch.max_size` cannot be zero")]
    BatchMaxSizeZero,
    /// A retry policy must allow at least one attempt.
    #[error("`{0}.max_attempts` cannot be zero")]
    RetryMaxAttemptsZero(&'static str),
    /// Backoff factors below one would shrink the delay between attempts.
    #[error("`{0}.backoff_factor` must be a finite number greater than or equal to 1")]
    InvalidBackoffFactor(&'static str),
    /// The liveness timeout must be positive, otherwise every run times out immediately.
    #[error("`run.liveness_timeout_ms` cannot be zero")]
    LivenessTimeoutZero,
    /// Lines of tap output must be allowed to contain at least one byte.
    #[error("`run.max_line_bytes` cannot be zero")]
    MaxLineBytesZero,
    /// The tap needs a stable identifier to group runs for resumption.
    #[error("`tap.id` cannot be empty")]
    EmptyTapId,
    /// The tap needs an executable to launch.
    #[error("`tap.program` cannot be empty")]
    EmptyTapProgram,
    /// Tap configuration must be given exactly once.
    #[error("exactly one of `tap.config` and `tap.config_path` must be set")]
    AmbiguousTapConfig,
    /// Inline tap configuration must be a JSON object.
    #[error("`tap.config` must be a JSON object")]
    TapConfigNotAnObject,
    /// The file state store needs a directory to write into.
    #[error("`state_store.file.directory` cannot be empty")]
    EmptyStateDirectory,
    /// Postgres inserts must be chunked into at least one row.
    #[error("`sink.postgres.insert_chunk_size` cannot be zero")]
    InsertChunkSizeZero,
    /// Each row binds several parameters and Postgres accepts at most 65535 per statement.
    #[error("`sink.postgres.insert_chunk_size` is {size}, it cannot exceed {max}")]
    InsertChunkSizeTooLarge { size: usize, max: usize },
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
}
