use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Bounded exponential backoff policy.
///
/// Used for bookmark commits and sink deliveries. No retry loop in the executor runs more than
/// `max_attempts` times.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay, in milliseconds, before the second attempt.
    pub initial_delay_ms: u64,
    /// Upper bound for the delay between two attempts.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f32,
}

impl RetryConfig {
    /// Validates the policy. `name` is the configuration key used in error messages.
    pub fn validate(&self, name: &'static str) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::RetryMaxAttemptsZero(name));
        }

        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ValidationError::InvalidBackoffFactor(name));
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
        }
    }
}
