use std::time::Duration;

use anyhow::anyhow;
use tap_config::shared::{
    BatchConfig, PgConnectionConfig, RetryConfig, RunConfig, RunnerConfig, SinkConfig,
    StateStoreConfig, TapConfig,
};
use tap_executor::discovery::ensure_catalog;
use tap_executor::process::{CommandLauncher, TapInvocation};
use tap_executor::run::{ResumePolicy, RunManager, RunRequest};
use tap_executor::sink::Sink;
use tap_executor::sink::memory::MemorySink;
use tap_executor::sink::postgres::PostgresSink;
use tap_executor::sink::stdout::StdoutSink;
use tap_executor::store::StateStore;
use tap_executor::store::file::FileStateStore;
use tap_executor::store::memory::MemoryStateStore;
use tap_executor::store::postgres::{PostgresStateStore, migrate};
use tap_executor::types::{RunState, RunStatus, TapId};
use tap_telemetry::metrics::init_metrics;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

/// Executes one run of the configured tap and waits for it to finish.
///
/// The state store and sink are built from configuration. Postgres backends get their
/// migrations applied first. The run fails the process unless it ends in `succeeded`.
pub async fn start_runner_with_config(runner_config: RunnerConfig) -> anyhow::Result<()> {
    info!("starting tap runner");

    log_config(&runner_config);

    if let Some(port) = runner_config.metrics_port {
        init_metrics(port, runner_config.project_ref.clone())?;
        info!(port, "serving prometheus metrics");
    }

    // Store and sink are statically dispatched, so every combination gets its own manager type.
    let state = match &runner_config.state_store {
        StateStoreConfig::Memory => with_sink(&runner_config, MemoryStateStore::new()).await?,
        StateStoreConfig::File { directory } => {
            let store = FileStateStore::open(directory.clone()).await?;
            with_sink(&runner_config, store).await?
        }
        StateStoreConfig::Postgres { connection } => {
            migrate_database(connection).await?;
            let store = PostgresStateStore::connect(connection).await?;
            with_sink(&runner_config, store).await?
        }
    };

    log_outcome(&state);

    match state.status {
        RunStatus::Succeeded => {
            info!("tap runner completed");
            Ok(())
        }
        status => {
            let reason = state
                .failure
                .map(|failure| failure.message)
                .unwrap_or_else(|| format!("run ended with status {status}"));
            Err(anyhow!("run {} failed: {reason}", state.run_id))
        }
    }
}

async fn with_sink<S>(runner_config: &RunnerConfig, store: S) -> anyhow::Result<RunState>
where
    S: StateStore + Clone + Send + Sync + 'static,
{
    match &runner_config.sink {
        SinkConfig::Memory => execute_run(runner_config, store, MemorySink::new()).await,
        SinkConfig::Stdout => execute_run(runner_config, store, StdoutSink::new()).await,
        SinkConfig::Postgres {
            connection,
            insert_chunk_size,
        } => {
            migrate_database(connection).await?;
            let sink = PostgresSink::connect(connection, *insert_chunk_size).await?;
            execute_run(runner_config, store, sink).await
        }
    }
}

async fn migrate_database(connection: &PgConnectionConfig) -> anyhow::Result<()> {
    info!(host = connection.host, dbname = connection.name, "applying migrations");
    migrate(connection).await?;
    info!("migrations successfully applied");

    Ok(())
}

/// Starts the run and cancels it on SIGINT or SIGTERM.
///
/// A configured catalog file that does not exist yet is first produced by running the tap in
/// discovery mode, bounded by the run's wall clock timeout or, without one, its liveness
/// timeout.
///
/// A cancelled run still commits its last received bookmark on a best-effort basis, so the
/// process waits for the run to conclude instead of exiting right away.
#[tracing::instrument(skip_all, fields(tap_id = %runner_config.tap.id))]
async fn execute_run<S, K>(
    runner_config: &RunnerConfig,
    store: S,
    sink: K,
) -> anyhow::Result<RunState>
where
    S: StateStore + Clone + Send + Sync + 'static,
    K: Sink + Clone + Send + Sync + 'static,
{
    let invocation = TapInvocation::from_config(&runner_config.tap, &runner_config.run)?;
    let launcher = CommandLauncher::new();

    let discovery_timeout = Duration::from_millis(
        runner_config
            .run
            .wall_clock_timeout_ms
            .unwrap_or(runner_config.run.liveness_timeout_ms),
    );
    if let Some(catalog) = ensure_catalog(&launcher, &invocation, discovery_timeout).await? {
        info!(streams = catalog.streams.len(), "catalog discovered");
    }

    let request = RunRequest::new(
        TapId::new(runner_config.tap.id.clone()),
        invocation,
        runner_config.run.clone(),
    )
    .with_resume(ResumePolicy::from(runner_config.resume));

    let manager = RunManager::new(launcher, store, sink);
    let handle = manager.start_run(request).await?;
    let run_id = handle.run_id();

    info!(%run_id, "run started");

    let signal_manager = manager.clone();
    let shutdown_handle = tokio::spawn(async move {
        // Sent by orchestrators before SIGKILL. The run gets the grace period to commit.
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!("failed to register SIGTERM handler: {err}");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT (Ctrl+C) received, cancelling run");
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, cancelling run");
            }
        }

        if !signal_manager.cancel(run_id).await {
            warn!(%run_id, "run already finished when the signal arrived");
        }
    });

    let result = handle.wait().await;

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    Ok(result?)
}

fn log_outcome(state: &RunState) {
    match &state.failure {
        None => info!(
            run_id = %state.run_id,
            status = %state.status,
            records_emitted = state.records_emitted_count,
            records_skipped = state.records_skipped_count,
            decode_errors = state.decode_error_count,
            "run finished"
        ),
        Some(failure) => error!(
            run_id = %state.run_id,
            status = %state.status,
            failure_kind = ?failure.kind,
            records_emitted = state.records_emitted_count,
            "run failed: {}",
            failure.message
        ),
    }

    for (stream, count) in &state.stream_record_counts {
        debug!(stream, count, "records delivered for stream");
    }
}

fn log_config(config: &RunnerConfig) {
    log_tap_config(&config.tap);
    log_run_config(&config.run);
    log_state_store_config(&config.state_store);
    log_sink_config(&config.sink);
    debug!(resume = ?config.resume, "resume config");
}

fn log_tap_config(config: &TapConfig) {
    // Inline tap configuration holds credentials and is never logged.
    debug!(
        tap_id = config.id,
        program = config.program,
        args = ?config.args,
        inline_config = config.config.is_some(),
        config_path = ?config.config_path,
        catalog_path = ?config.catalog_path,
        "tap config"
    );
}

fn log_run_config(config: &RunConfig) {
    debug!(
        max_decode_errors = config.max_decode_errors,
        schema_violation_policy = ?config.schema_violation_policy,
        liveness_timeout_ms = config.liveness_timeout_ms,
        wall_clock_timeout_ms = ?config.wall_clock_timeout_ms,
        max_line_bytes = config.max_line_bytes,
        stderr_tail_bytes = config.stderr_tail_bytes,
        "run config"
    );
    log_batch_config(&config.batch);
    log_retry_config("store", &config.store_retry);
    log_retry_config("sink", &config.sink_retry);
}

fn log_batch_config(config: &BatchConfig) {
    debug!(
        max_size = config.max_size,
        max_fill_ms = config.max_fill_ms,
        "batch config"
    );
}

fn log_retry_config(component: &str, config: &RetryConfig) {
    debug!(
        component,
        max_attempts = config.max_attempts,
        initial_delay_ms = config.initial_delay_ms,
        max_delay_ms = config.max_delay_ms,
        backoff_factor = config.backoff_factor,
        "retry config"
    );
}

fn log_state_store_config(config: &StateStoreConfig) {
    match config {
        StateStoreConfig::Memory => debug!("using memory state store"),
        StateStoreConfig::File { directory } => {
            debug!(directory = %directory.display(), "using file state store")
        }
        StateStoreConfig::Postgres { connection } => {
            log_pg_connection_config("state store", connection)
        }
    }
}

fn log_sink_config(config: &SinkConfig) {
    match config {
        SinkConfig::Memory => debug!("using memory sink"),
        SinkConfig::Stdout => debug!("using stdout sink"),
        SinkConfig::Postgres {
            connection,
            insert_chunk_size,
        } => {
            debug!(insert_chunk_size, "using postgres sink");
            log_pg_connection_config("sink", connection);
        }
    }
}

fn log_pg_connection_config(component: &str, config: &PgConnectionConfig) {
    debug!(
        component,
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        "postgres connection config",
    );
}
