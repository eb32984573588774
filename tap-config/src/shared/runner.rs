use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{
    RunConfig, SentryConfig, SinkConfig, StateStoreConfig, TapConfig, ValidationError,
};

/// Where a new run takes its initial bookmark from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeConfig {
    /// Start without a bookmark and extract everything.
    Fresh,
    /// Start from the most recently committed bookmark of any previous run of the same tap.
    #[default]
    LatestForTap,
}

/// Complete configuration of the `tap-runner` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunnerConfig {
    pub tap: TapConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub state_store: StateStoreConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub resume: ResumeConfig,
    /// Optional project reference added to every JSON log line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_ref: Option<String>,
    /// Port of the Prometheus metrics endpoint. Metrics are not exported when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentry: Option<SentryConfig>,
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.tap.validate()?;
        self.run.validate()?;
        self.state_store.validate()?;
        self.sink.validate()
    }
}

impl Config for RunnerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["tap.args"];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_document_uses_defaults() {
        let config: RunnerConfig = serde_json::from_str(
            r#"{
                "tap": {
                    "id": "tap-woocommerce",
                    "program": "tap-woocommerce",
                    "config_path": "/etc/taps/woocommerce.json"
                },
                "state_store": {"file": {"directory": "/var/lib/tap-executor"}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.resume, ResumeConfig::LatestForTap);
        assert!(matches!(config.sink, SinkConfig::Memory));
        assert!(matches!(config.state_store, StateStoreConfig::File { .. }));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn postgres_sink_defaults_chunk_size() {
        let sink: SinkConfig = serde_json::from_str(
            r#"{"postgres": {"connection": {
                "host": "localhost", "port": 5432, "name": "warehouse",
                "username": "postgres", "password": null,
                "tls": {"trusted_root_certs": "", "enabled": false}
            }}}"#,
        )
        .unwrap();

        match sink {
            SinkConfig::Postgres {
                insert_chunk_size, ..
            } => assert_eq!(insert_chunk_size, 500),
            other => panic!("unexpected sink config {other:?}"),
        }
    }
}
