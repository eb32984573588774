use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;

use tap_config::shared::{RunConfig, TapConfig};

use crate::error::{ErrorKind, TapResult};
use crate::protocol::DecodeError;
use crate::tap_error;
use crate::types::Bookmark;

/// One line of tap output, or the reason it cannot be handed to the decoder.
pub type TapLine = Result<String, DecodeError>;

/// What the tap is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapMode {
    /// Extract data: `--config <file> [--catalog <file>] [--state <file>]`.
    Sync,
    /// Describe the available streams: `--config <file> --discover`.
    Discover,
}

/// Where the tap configuration comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TapConfigSource {
    /// Written to a private temporary file before launch.
    Inline(serde_json::Value),
    /// An existing file passed as is.
    Path(PathBuf),
}

/// Everything needed to start a tap process.
#[derive(Debug, Clone, PartialEq)]
pub struct TapInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub config: TapConfigSource,
    pub catalog_path: Option<PathBuf>,
    /// Bookmark handed to the tap through `--state`.
    pub state: Option<Bookmark>,
    pub env: BTreeMap<String, String>,
    pub mode: TapMode,
    pub max_line_bytes: usize,
    pub stderr_tail_bytes: usize,
}

impl TapInvocation {
    /// Builds a sync invocation from configuration.
    pub fn from_config(tap: &TapConfig, run: &RunConfig) -> TapResult<Self> {
        let config = match (&tap.config, &tap.config_path) {
            (Some(config), None) => TapConfigSource::Inline(config.clone()),
            (None, Some(path)) => TapConfigSource::Path(path.clone()),
            _ => {
                return Err(tap_error!(
                    ErrorKind::ConfigError,
                    "Exactly one of `config` and `config_path` must be set",
                    tap.id
                ));
            }
        };

        Ok(Self {
            program: tap.program.clone(),
            args: tap.args.clone(),
            config,
            catalog_path: tap.catalog_path.clone(),
            state: None,
            env: tap.env.clone(),
            mode: TapMode::Sync,
            max_line_bytes: run.max_line_bytes,
            stderr_tail_bytes: run.stderr_tail_bytes,
        })
    }

    pub fn with_state(mut self, state: Option<Bookmark>) -> Self {
        self.state = state;
        self
    }

    pub fn with_mode(mut self, mode: TapMode) -> Self {
        self.mode = mode;
        self
    }
}

/// How a tap process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapExit {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// The last bytes the process wrote to stderr.
    pub stderr: String,
}

impl TapExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Describes the exit for failure reports, including stderr verbatim.
    pub fn describe(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exit code {code}"),
            None => "killed by a signal".to_string(),
        };

        if self.stderr.trim().is_empty() {
            status
        } else {
            format!("{status}, stderr:\n{}", self.stderr)
        }
    }
}

/// Starts tap processes.
pub trait TapLauncher {
    type Process: TapProcess;

    fn spawn(
        &self,
        invocation: &TapInvocation,
    ) -> impl Future<Output = TapResult<Self::Process>> + Send;
}

/// A running tap.
pub trait TapProcess: Send {
    /// Returns the next line of standard output, `None` at end of output.
    ///
    /// Must be cancel safe: dropping the returned future before completion loses no output.
    fn next_line(&mut self) -> impl Future<Output = TapResult<Option<TapLine>>> + Send;

    /// Stops the process. Its exit is still collected with [`TapProcess::wait`].
    fn terminate(&mut self) -> impl Future<Output = TapResult<()>> + Send;

    /// Waits for the process to exit. Output not read yet is discarded.
    ///
    /// Must be cancel safe, so that a wait can be abandoned in favor of [`TapProcess::terminate`].
    fn wait(&mut self) -> impl Future<Output = TapResult<TapExit>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_description_includes_stderr() {
        let exit = TapExit {
            code: Some(1),
            stderr: "CRITICAL auth failed\n".to_string(),
        };

        assert!(!exit.success());
        assert_eq!(exit.describe(), "exit code 1, stderr:\nCRITICAL auth failed\n");

        let killed = TapExit {
            code: None,
            stderr: String::new(),
        };
        assert_eq!(killed.describe(), "killed by a signal");
    }

    #[test]
    fn invocation_requires_a_single_config_source() {
        let tap = TapConfig {
            id: "tap-orders".to_string(),
            program: "tap-orders".to_string(),
            args: vec![],
            config: None,
            config_path: None,
            catalog_path: None,
            env: BTreeMap::new(),
        };

        let err = TapInvocation::from_config(&tap, &RunConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
