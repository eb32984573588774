use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::shared::{PgConnectionConfig, ValidationError};

/// Backing store for run records and bookmarks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// Process-local store. Bookmarks are lost when the process exits.
    #[default]
    Memory,
    /// One JSON document per run inside `directory`, replaced atomically on each commit.
    File { directory: PathBuf },
    /// Rows in the `tap_executor.runs` table.
    Postgres { connection: PgConnectionConfig },
}

impl StateStoreConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            StateStoreConfig::Memory => Ok(()),
            StateStoreConfig::File { directory } => {
                if directory.as_os_str().is_empty() {
                    return Err(ValidationError::EmptyStateDirectory);
                }

                Ok(())
            }
            StateStoreConfig::Postgres { connection } => connection.validate(),
        }
    }
}
