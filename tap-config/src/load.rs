use std::path::Path;

use serde::de::DeserializeOwned;

use crate::environment::Environment;

/// Directory, relative to the working directory, holding the configuration files.
const CONFIGURATION_DIR: &str = "configuration";

/// Configuration file loaded in every environment.
const BASE_CONFIG_FILE: &str = "base.yaml";

/// Prefix of environment variables overriding configuration keys.
const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested keys: `APP_RUN__BATCH__MAX_SIZE` sets `run.batch.max_size`.
const ENV_SEPARATOR: &str = "__";

/// Separator for list values: `APP_TAP__ARGS=--verbose,--strict`.
const LIST_SEPARATOR: &str = ",";

/// Implemented by top-level configuration types loadable with [`load_config`].
pub trait Config {
    /// Keys whose environment variable values are split on `,` into lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Loads configuration from `./configuration`.
///
/// Sources are layered in this order, later ones overriding earlier ones:
/// 1. `configuration/base.yaml`
/// 2. `configuration/{environment}.yaml`, if present
/// 3. `APP_`-prefixed environment variables
pub fn load_config<T>() -> Result<T, config::ConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(|err| {
        config::ConfigError::Message(format!("failed to determine the current directory: {err}"))
    })?;

    load_config_from(base_path.join(CONFIGURATION_DIR))
}

/// Loads configuration from an explicit configuration directory.
///
/// Same layering as [`load_config`].
pub fn load_config_from<T>(
    configuration_directory: impl AsRef<Path>,
) -> Result<T, config::ConfigError>
where
    T: Config + DeserializeOwned,
{
    let configuration_directory = configuration_directory.as_ref();

    let environment = Environment::load().map_err(|err| {
        config::ConfigError::Message(format!("failed to parse APP_ENVIRONMENT: {err}"))
    })?;
    let environment_filename = format!("{environment}.yaml");

    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !<T as Config>::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source
            .try_parsing(true)
            .list_separator(LIST_SEPARATOR);

        for key in <T as Config>::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join(BASE_CONFIG_FILE),
        ))
        .add_source(
            config::File::from(configuration_directory.join(environment_filename)).required(false),
        )
        .add_source(environment_source)
        .build()?;

    settings.try_deserialize::<T>()
}
