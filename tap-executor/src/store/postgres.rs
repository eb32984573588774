use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Executor, PgPool};
use tap_config::shared::{IntoConnectOptions, PgConnectionConfig};
use tracing::info;
use uuid::Uuid;

use crate::error::{ErrorKind, TapError, TapResult};
use crate::store::base::{StateStore, StoredRun};
use crate::types::{Bookmark, RunId, RunStatus, TapId};
use crate::{bail, tap_error};

const NUM_POOL_CONNECTIONS: u32 = 4;

/// Migrations creating the `tap_executor` tables.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Connects to the configured database and applies pending migrations.
///
/// The `tap_executor` schema is created first and used as search path, so that the migration
/// metadata table of `sqlx` lives next to the executor tables instead of in `public`.
pub async fn migrate(connection_config: &PgConnectionConfig) -> Result<(), sqlx::Error> {
    migrate_with_options(connection_config.with_db()).await
}

/// Like [`migrate`], for already built connect options.
pub async fn migrate_with_options(options: PgConnectOptions) -> Result<(), sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("create schema if not exists tap_executor;")
                    .await?;
                conn.execute("set search_path = 'tap_executor';").await?;

                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    info!("applying tap executor migrations");

    MIGRATOR.run(&pool).await?;

    info!("tap executor migrations applied");

    Ok(())
}

/// Opens a connection pool to the configured database.
pub async fn connect(connection_config: &PgConnectionConfig) -> Result<PgPool, sqlx::Error> {
    connect_with_options(connection_config.with_db()).await
}

pub async fn connect_with_options(options: PgConnectOptions) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(NUM_POOL_CONNECTIONS)
        .connect_with(options)
        .await
}

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    run_id: Uuid,
    tap_id: String,
    status: String,
    bookmark: Option<Json<Bookmark>>,
    commit_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    committed_at: Option<DateTime<Utc>>,
}

impl TryFrom<RunRow> for StoredRun {
    type Error = TapError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(StoredRun {
            run_id: RunId::from_uuid(row.run_id),
            tap_id: TapId::new(row.tap_id),
            status: row.status.parse()?,
            bookmark: row.bookmark.map(|Json(bookmark)| bookmark),
            commit_count: u64::try_from(row.commit_count).map_err(|_| {
                tap_error!(
                    ErrorKind::InvalidState,
                    "Negative commit count",
                    row.commit_count
                )
            })?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            committed_at: row.committed_at,
        })
    }
}

/// [`StateStore`] backed by the `tap_executor.runs` table.
///
/// Each commit is a single conditional `update`, so Postgres provides both the atomicity of
/// the bookmark replacement and the rejection of commits on terminal runs.
#[derive(Debug, Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the configured database. Migrations must have been applied with
    /// [`migrate`].
    pub async fn connect(connection_config: &PgConnectionConfig) -> TapResult<Self> {
        Ok(Self::new(connect(connection_config).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn rejected(run_id: RunId, description: &'static str) -> TapError {
    tap_error!(
        ErrorKind::StoreConflict,
        description,
        format!("run {run_id} is unknown or already terminal")
    )
}

impl StateStore for PostgresStateStore {
    async fn create_run(&self, run_id: RunId, tap_id: TapId) -> TapResult<StoredRun> {
        let result = sqlx::query_as::<_, RunRow>(
            r#"
            insert into tap_executor.runs (run_id, tap_id, status)
            values ($1, $2, 'pending')
            returning run_id, tap_id, status, bookmark, commit_count, created_at, updated_at, committed_at
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(tap_id.as_str())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => row.try_into(),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                bail!(
                    ErrorKind::StoreConflict,
                    "Run already exists",
                    format!("run {run_id} was already created")
                )
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn load(&self, run_id: RunId) -> TapResult<Option<Bookmark>> {
        let bookmark: Option<Option<Json<Bookmark>>> =
            sqlx::query_scalar("select bookmark from tap_executor.runs where run_id = $1")
                .bind(run_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        Ok(bookmark.flatten().map(|Json(bookmark)| bookmark))
    }

    async fn commit(&self, run_id: RunId, bookmark: Bookmark) -> TapResult<()> {
        let result = sqlx::query(
            r#"
            update tap_executor.runs
            set bookmark = $2,
                commit_count = commit_count + 1,
                updated_at = now(),
                committed_at = now()
            where run_id = $1 and status in ('pending', 'running')
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(Json(&bookmark))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(rejected(run_id, "Bookmark commit rejected"));
        }

        Ok(())
    }

    async fn update_status(&self, run_id: RunId, status: RunStatus) -> TapResult<()> {
        let allowed_previous = [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Succeeded,
            RunStatus::Failed,
        ]
        .into_iter()
        .filter(|previous| previous.can_transition_to(status))
        .map(|previous| previous.as_str().to_string())
        .collect::<Vec<_>>();

        let result = sqlx::query(
            r#"
            update tap_executor.runs
            set status = $2, updated_at = now()
            where run_id = $1 and status = any($3)
            "#,
        )
        .bind(run_id.as_uuid())
        .bind(status.as_str())
        .bind(allowed_previous)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(rejected(run_id, "Run status transition rejected"));
        }

        Ok(())
    }

    async fn latest_bookmark(&self, tap_id: &TapId) -> TapResult<Option<Bookmark>> {
        let bookmark: Option<Json<Bookmark>> = sqlx::query_scalar(
            r#"
            select bookmark
            from tap_executor.runs
            where tap_id = $1 and bookmark is not null
            order by committed_at desc
            limit 1
            "#,
        )
        .bind(tap_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(bookmark.map(|Json(bookmark)| bookmark))
    }

    async fn get_run(&self, run_id: RunId) -> TapResult<Option<StoredRun>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            select run_id, tap_id, status, bookmark, commit_count, created_at, updated_at, committed_at
            from tap_executor.runs
            where run_id = $1
            "#,
        )
        .bind(run_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredRun::try_from).transpose()
    }
}
