use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// How to launch a tap executable.
///
/// The tap is invoked as `<program> [args...] --config <file> [--catalog <file>] [--state <file>]`.
/// Inline `config` is written to a private temporary file before launch, so exactly one of
/// `config` and `config_path` must be set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TapConfig {
    /// Stable identifier of the tap, used to find bookmarks of previous runs.
    pub id: String,
    /// Executable to launch, resolved through `PATH` when not absolute.
    pub program: String,
    /// Extra arguments placed before the protocol arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Inline tap configuration. May contain credentials and is never logged.
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    /// Path to an existing tap configuration file.
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    /// Optional catalog selecting the streams to extract.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    /// Extra environment variables for the tap process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl TapConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyTapId);
        }

        if self.program.trim().is_empty() {
            return Err(ValidationError::EmptyTapProgram);
        }

        match (&self.config, &self.config_path) {
            (Some(config), None) if !config.is_object() => {
                Err(ValidationError::TapConfigNotAnObject)
            }
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(ValidationError::AmbiguousTapConfig),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tap_config() -> TapConfig {
        TapConfig {
            id: "tap-woocommerce".to_string(),
            program: "tap-woocommerce".to_string(),
            args: vec![],
            config: Some(json!({"site_url": "https://shop.example.com"})),
            config_path: None,
            catalog_path: None,
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn requires_exactly_one_config_source() {
        assert_eq!(tap_config().validate(), Ok(()));

        let mut both = tap_config();
        both.config_path = Some(PathBuf::from("config.json"));
        assert_eq!(both.validate(), Err(ValidationError::AmbiguousTapConfig));

        let mut neither = tap_config();
        neither.config = None;
        assert_eq!(neither.validate(), Err(ValidationError::AmbiguousTapConfig));
    }

    #[test]
    fn inline_config_must_be_an_object() {
        let mut config = tap_config();
        config.config = Some(json!(["not", "an", "object"]));

        assert_eq!(config.validate(), Err(ValidationError::TapConfigNotAnObject));
    }

    #[test]
    fn rejects_blank_identifiers() {
        let mut config = tap_config();
        config.id = "  ".to_string();
        assert_eq!(config.validate(), Err(ValidationError::EmptyTapId));

        let mut config = tap_config();
        config.program = String::new();
        assert_eq!(config.validate(), Err(ValidationError::EmptyTapProgram));
    }
}
