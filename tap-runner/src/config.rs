use tap_config::load_config;
use tap_config::shared::RunnerConfig;

/// Loads the [`RunnerConfig`] and validates it.
pub fn load_runner_config() -> anyhow::Result<RunnerConfig> {
    let config = load_config::<RunnerConfig>()?;
    config.validate()?;

    Ok(config)
}
