use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, TapError, TapResult};
use crate::process::base::{
    TapConfigSource, TapExit, TapInvocation, TapLauncher, TapLine, TapMode, TapProcess,
};
use crate::process::lines::LineReader;
use crate::process::stderr::StderrTail;
use crate::tap_error;

const CONFIG_FILE_NAME: &str = "config.json";
const STATE_FILE_NAME: &str = "state.json";

/// How long stderr may stay open after the tap exited, e.g. held by a process it left behind.
const STDERR_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Launches taps as child processes with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct CommandLauncher;

impl CommandLauncher {
    pub fn new() -> Self {
        Self
    }
}

/// A tap running as a child process.
///
/// Inline configuration and state are written to a private temporary directory which lives as
/// long as the process handle.
#[derive(Debug)]
pub struct CommandProcess {
    child: Child,
    stdout: Option<LineReader<BufReader<ChildStdout>>>,
    stderr_tail: Arc<Mutex<StderrTail>>,
    stderr_task: Option<JoinHandle<()>>,
    _workdir: TempDir,
}

fn process_error(description: &'static str, detail: impl ToString) -> TapError {
    tap_error!(ErrorKind::ProcessError, description, detail)
}

async fn write_json_file(path: &Path, value: &serde_json::Value) -> TapResult<()> {
    let contents = serde_json::to_vec(value).map_err(|err| {
        tap_error!(
            ErrorKind::SerializationError,
            "Failed to serialize tap input file",
            err
        )
    })?;

    tokio::fs::write(path, contents).await.map_err(|err| {
        process_error(
            "Failed to write tap input file",
            format!("{}: {err}", path.display()),
        )
    })
}

/// Writes the input files of `invocation` into `workdir` and returns the tap arguments.
async fn prepare_arguments(invocation: &TapInvocation, workdir: &Path) -> TapResult<Vec<String>> {
    let config_path: PathBuf = match &invocation.config {
        TapConfigSource::Inline(config) => {
            let path = workdir.join(CONFIG_FILE_NAME);
            write_json_file(&path, config).await?;
            path
        }
        TapConfigSource::Path(path) => path.clone(),
    };

    let mut args = invocation.args.clone();
    args.push("--config".to_string());
    args.push(config_path.display().to_string());

    match invocation.mode {
        TapMode::Discover => {
            args.push("--discover".to_string());
        }
        TapMode::Sync => {
            if let Some(catalog_path) = &invocation.catalog_path {
                args.push("--catalog".to_string());
                args.push(catalog_path.display().to_string());
            }

            if let Some(state) = &invocation.state {
                let path = workdir.join(STATE_FILE_NAME);
                write_json_file(&path, &serde_json::Value::from(state.value())).await?;
                args.push("--state".to_string());
                args.push(path.display().to_string());
            }
        }
    }

    Ok(args)
}

impl TapLauncher for CommandLauncher {
    type Process = CommandProcess;

    async fn spawn(&self, invocation: &TapInvocation) -> TapResult<CommandProcess> {
        let workdir = tempfile::Builder::new()
            .prefix("tap-run-")
            .tempdir()
            .map_err(|err| process_error("Failed to create the tap working directory", err))?;

        let args = prepare_arguments(invocation, workdir.path()).await?;

        info!(
            program = %invocation.program,
            mode = ?invocation.mode,
            with_state = invocation.state.is_some(),
            "spawning tap"
        );

        let mut child = Command::new(&invocation.program)
            .args(&args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                process_error(
                    "Failed to spawn tap",
                    format!("{}: {err}", invocation.program),
                )
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| process_error("Tap stdout is not captured", &invocation.program))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| process_error("Tap stderr is not captured", &invocation.program))?;

        // Stderr is drained concurrently so the tap never blocks on it.
        let stderr_tail = Arc::new(Mutex::new(StderrTail::new(invocation.stderr_tail_bytes)));
        let stderr_task = tokio::spawn(StderrTail::drain(stderr_tail.clone(), stderr));

        Ok(CommandProcess {
            child,
            stdout: Some(LineReader::new(
                BufReader::new(stdout),
                invocation.max_line_bytes,
            )),
            stderr_tail,
            stderr_task: Some(stderr_task),
            _workdir: workdir,
        })
    }
}

impl TapProcess for CommandProcess {
    async fn next_line(&mut self) -> TapResult<Option<TapLine>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        stdout
            .next_line()
            .await
            .map_err(|err| process_error("Failed to read tap output", err))
    }

    async fn terminate(&mut self) -> TapResult<()> {
        // Closing stdout makes a tap blocked on a full pipe fail fast.
        self.stdout = None;

        match self.child.start_kill() {
            Ok(()) => {
                debug!(pid = ?self.child.id(), "tap process killed");
                Ok(())
            }
            // The process already exited.
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(process_error("Failed to terminate tap", err)),
        }
    }

    async fn wait(&mut self) -> TapResult<TapExit> {
        self.stdout = None;

        let status = self
            .child
            .wait()
            .await
            .map_err(|err| process_error("Failed to wait for tap exit", err))?;

        if let Some(task) = self.stderr_task.as_mut() {
            match tokio::time::timeout(STDERR_CLOSE_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "stderr capture task failed"),
                Err(_) => warn!("tap stderr is still open after exit, keeping the partial tail"),
            }
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        let stderr = self.stderr_tail.lock().await.render();

        let exit = TapExit {
            code: status.code(),
            stderr,
        };

        debug!(code = ?exit.code, stderr = %exit.stderr, "tap exited");

        Ok(exit)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::types::{Bookmark, Value};

    fn shell(script: &str) -> TapInvocation {
        TapInvocation {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "tap".to_string()],
            config: TapConfigSource::Inline(json!({"api_key": "secret"})),
            catalog_path: None,
            state: None,
            env: BTreeMap::new(),
            mode: TapMode::Sync,
            max_line_bytes: 1024,
            stderr_tail_bytes: 1024,
        }
    }

    async fn read_all(process: &mut CommandProcess) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = process.next_line().await.unwrap() {
            lines.push(line.unwrap());
        }
        lines
    }

    #[tokio::test]
    async fn reads_stdout_and_captures_stderr() {
        let invocation = shell("echo first; echo oops >&2; echo second; exit 3");
        let mut process = CommandLauncher::new().spawn(&invocation).await.unwrap();

        assert_eq!(read_all(&mut process).await, vec!["first", "second"]);

        let exit = process.wait().await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert_eq!(exit.stderr, "oops\n");
    }

    #[tokio::test]
    async fn passes_config_and_state_files() {
        // Positional parameters after `tap` are the protocol arguments.
        let invocation = shell(r#"echo "$@"; cat "$2"; echo; cat "$4""#)
            .with_state(Some(Bookmark::new(Value::from(json!({"cursor": 5})))));
        let mut process = CommandLauncher::new().spawn(&invocation).await.unwrap();

        let lines = read_all(&mut process).await;
        assert!(lines[0].starts_with("--config "));
        assert!(lines[0].contains(" --state "));
        assert_eq!(lines[1], r#"{"api_key":"secret"}"#);
        assert_eq!(lines[2], r#"{"cursor":5}"#);

        assert!(process.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn discover_mode_adds_the_flag() {
        let invocation = shell(r#"echo "$3""#).with_mode(TapMode::Discover);
        let mut process = CommandLauncher::new().spawn(&invocation).await.unwrap();

        assert_eq!(read_all(&mut process).await, vec!["--discover"]);
        process.wait().await.unwrap();
    }

    #[tokio::test]
    async fn terminate_stops_a_hanging_tap() {
        let invocation = shell("echo ready; sleep 30");
        let mut process = CommandLauncher::new().spawn(&invocation).await.unwrap();

        assert_eq!(
            process.next_line().await.unwrap().unwrap().unwrap(),
            "ready"
        );

        process.terminate().await.unwrap();
        let exit = tokio::time::timeout(std::time::Duration::from_secs(5), process.wait())
            .await
            .expect("terminated tap should exit")
            .unwrap();

        assert!(!exit.success());
    }

    #[tokio::test]
    async fn stderr_held_by_a_leftover_process_does_not_block_wait() {
        let invocation = shell("sleep 20 >/dev/null & echo bye >&2; exit 4");
        let mut process = CommandLauncher::new().spawn(&invocation).await.unwrap();

        assert!(read_all(&mut process).await.is_empty());

        let exit = tokio::time::timeout(std::time::Duration::from_secs(5), process.wait())
            .await
            .expect("wait should not depend on the leftover process")
            .unwrap();

        assert_eq!(exit.code, Some(4));
        assert_eq!(exit.stderr, "bye\n");
    }

    #[tokio::test]
    async fn missing_program_is_a_process_error() {
        let mut invocation = shell("");
        invocation.program = "/nonexistent/tap-binary".to_string();

        let err = CommandLauncher::new().spawn(&invocation).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessError);
    }
}
