use std::sync::Arc;

use secrecy::ExposeSecret;
use tap_config::Environment;
use tap_config::shared::RunnerConfig;
use tap_telemetry::tracing::init_tracing_with_top_level_fields;
use tracing::{error, info};

use crate::config::load_runner_config;
use crate::core::start_runner_with_config;

mod config;
mod core;

fn main() -> anyhow::Result<()> {
    let runner_config = load_runner_config()?;

    let _log_flusher = init_tracing_with_top_level_fields(
        env!("CARGO_BIN_NAME"),
        runner_config.project_ref.clone(),
        None,
    )?;

    // Initialize Sentry before the async runtime starts.
    let _sentry_guard = init_sentry(&runner_config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(runner_config))?;

    Ok(())
}

async fn async_main(runner_config: RunnerConfig) -> anyhow::Result<()> {
    if let Err(err) = start_runner_with_config(runner_config).await {
        sentry::integrations::anyhow::capture_anyhow(&err);
        error!("an error occurred in the tap runner: {err:#}");

        return Err(err);
    }

    Ok(())
}

/// Initializes Sentry when a DSN is configured.
///
/// Events are tagged with the `tap-runner` service and panics are captured automatically.
fn init_sentry(config: &RunnerConfig) -> anyhow::Result<Option<sentry::ClientInitGuard>> {
    let Some(sentry_config) = &config.sentry else {
        info!("sentry not configured for tap runner, skipping initialization");
        return Ok(None);
    };

    info!("initializing sentry with supplied dsn");

    let environment = Environment::load()?;
    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(sentry_config.dsn.expose_secret().parse()?),
        environment: Some(environment.to_string().into()),
        integrations: vec![Arc::new(
            sentry::integrations::panic::PanicIntegration::new(),
        )],
        ..Default::default()
    });

    sentry::configure_scope(|scope| {
        scope.set_tag("service", "tap-runner");
        scope.set_tag("tap_id", &config.tap.id);
    });

    Ok(Some(guard))
}
