use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Batching of validated records before they are handed to the sink.
///
/// A batch is flushed when it holds `max_size` records, when `max_fill_ms` elapsed since the
/// first record entered it, or when a STATE message forces a flush.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of records held in memory before a flush.
    pub max_size: usize,
    /// Maximum time, in milliseconds, a record waits in a batch before a flush.
    pub max_fill_ms: u64,
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::BatchMaxSizeZero);
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 500,
            max_fill_ms: 1000,
        }
    }
}
