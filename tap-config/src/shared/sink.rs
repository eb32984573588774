use serde::{Deserialize, Serialize};

use crate::shared::{PgConnectionConfig, ValidationError};

/// Default number of rows per insert statement for the Postgres sink.
const DEFAULT_INSERT_CHUNK_SIZE: usize = 500;

/// Bind parameters each row takes in a Postgres sink insert.
pub const POSTGRES_SINK_PARAMS_PER_ROW: usize = 4;

/// Largest chunk whose bind parameters fit in one Postgres statement.
pub const MAX_INSERT_CHUNK_SIZE: usize = u16::MAX as usize / POSTGRES_SINK_PARAMS_PER_ROW;

fn default_insert_chunk_size() -> usize {
    DEFAULT_INSERT_CHUNK_SIZE
}

/// Destination of validated records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkConfig {
    /// Keeps records in memory. Useful for dry runs.
    #[default]
    Memory,
    /// Writes each record as one JSON line to standard output.
    Stdout,
    /// Inserts records into the `tap_executor.raw_records` table.
    Postgres {
        connection: PgConnectionConfig,
        #[serde(default = "default_insert_chunk_size")]
        insert_chunk_size: usize,
    },
}

impl SinkConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            SinkConfig::Memory | SinkConfig::Stdout => Ok(()),
            SinkConfig::Postgres {
                connection,
                insert_chunk_size,
            } => {
                if *insert_chunk_size == 0 {
                    return Err(ValidationError::InsertChunkSizeZero);
                }

                if *insert_chunk_size > MAX_INSERT_CHUNK_SIZE {
                    return Err(ValidationError::InsertChunkSizeTooLarge {
                        size: *insert_chunk_size,
                        max: MAX_INSERT_CHUNK_SIZE,
                    });
                }

                connection.validate()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::TlsConfig;

    fn postgres_sink(insert_chunk_size: usize) -> SinkConfig {
        SinkConfig::Postgres {
            connection: PgConnectionConfig {
                host: "localhost".to_string(),
                port: 5432,
                name: "warehouse".to_string(),
                username: "postgres".to_string(),
                password: None,
                tls: TlsConfig {
                    trusted_root_certs: String::new(),
                    enabled: false,
                },
            },
            insert_chunk_size,
        }
    }

    #[test]
    fn insert_chunks_must_fit_the_bind_parameter_limit() {
        assert_eq!(MAX_INSERT_CHUNK_SIZE, 16_383);
        assert_eq!(postgres_sink(MAX_INSERT_CHUNK_SIZE).validate(), Ok(()));
        assert_eq!(
            postgres_sink(0).validate(),
            Err(ValidationError::InsertChunkSizeZero)
        );
        assert_eq!(
            postgres_sink(MAX_INSERT_CHUNK_SIZE + 1).validate(),
            Err(ValidationError::InsertChunkSizeTooLarge {
                size: 16_384,
                max: 16_383,
            })
        );
    }
}
