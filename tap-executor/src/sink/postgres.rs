use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tap_config::shared::{MAX_INSERT_CHUNK_SIZE, PgConnectionConfig};
use tracing::debug;

use crate::error::{ErrorKind, TapError, TapResult};
use crate::sink::base::{BatchOrigin, Sink};
use crate::store::postgres::connect;
use crate::tap_error;
use crate::types::Record;

/// [`Sink`] inserting records into `tap_executor.raw_records`.
///
/// Records are stored as `jsonb` together with the run, tap and stream they belong to. A batch
/// is inserted in chunks of `insert_chunk_size` rows inside one transaction, so a failed
/// delivery leaves nothing behind.
#[derive(Debug, Clone)]
pub struct PostgresSink {
    pool: PgPool,
    insert_chunk_size: usize,
}

impl PostgresSink {
    /// The chunk size is clamped so that every insert stays within the bind parameter limit.
    pub fn new(pool: PgPool, insert_chunk_size: usize) -> Self {
        Self {
            pool,
            insert_chunk_size: insert_chunk_size.clamp(1, MAX_INSERT_CHUNK_SIZE),
        }
    }

    /// Connects to the configured database. The `raw_records` table is created by
    /// [`crate::store::postgres::migrate`].
    pub async fn connect(
        connection_config: &PgConnectionConfig,
        insert_chunk_size: usize,
    ) -> TapResult<Self> {
        let pool = connect(connection_config).await.map_err(sink_error)?;

        Ok(Self::new(pool, insert_chunk_size))
    }
}

fn sink_error(err: sqlx::Error) -> TapError {
    tap_error!(ErrorKind::SinkError, "Failed to insert records", err)
}

impl Sink for PostgresSink {
    async fn deliver(
        &self,
        origin: &BatchOrigin,
        stream: &str,
        records: Vec<Record>,
    ) -> TapResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut transaction = self.pool.begin().await.map_err(sink_error)?;

        for chunk in records.chunks(self.insert_chunk_size) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "insert into tap_executor.raw_records (run_id, tap_id, stream, record) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(origin.run_id.as_uuid())
                    .push_bind(origin.tap_id.as_str())
                    .push_bind(stream)
                    .push_bind(Json(record));
            });

            builder
                .build()
                .execute(&mut *transaction)
                .await
                .map_err(sink_error)?;

            debug!(
                run_id = %origin.run_id,
                stream,
                rows = chunk.len(),
                "inserted chunk of records"
            );
        }

        transaction.commit().await.map_err(sink_error)
    }
}
