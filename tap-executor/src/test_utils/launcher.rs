use std::collections::VecDeque;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{ErrorKind, TapResult};
use crate::process::{TapExit, TapInvocation, TapLauncher, TapLine, TapProcess};
use crate::protocol::encode_message;
use crate::tap_error;
use crate::types::TapMessage;

/// One step of a scripted tap.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Writes a line to standard output.
    Line(String),
    /// Stays silent for a while.
    Sleep(Duration),
    /// Stays silent until terminated.
    Hang,
    /// Closes standard output and exits.
    Exit { code: i32, stderr: String },
    /// Closes standard output but keeps running until terminated.
    Detach,
}

/// Output and exit behavior of a scripted tap. A script without an exit step exits with 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TapScript {
    steps: Vec<ScriptStep>,
}

impl TapScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Line(line.into()));
        self
    }

    pub fn message(self, message: &TapMessage) -> Self {
        self.line(encode_message(message))
    }

    pub fn messages<'a>(self, messages: impl IntoIterator<Item = &'a TapMessage>) -> Self {
        messages
            .into_iter()
            .fold(self, |script, message| script.message(message))
    }

    pub fn sleep(mut self, duration: Duration) -> Self {
        self.steps.push(ScriptStep::Sleep(duration));
        self
    }

    pub fn hang(mut self) -> Self {
        self.steps.push(ScriptStep::Hang);
        self
    }

    pub fn detach(mut self) -> Self {
        self.steps.push(ScriptStep::Detach);
        self
    }

    pub fn exit(mut self, code: i32, stderr: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Exit {
            code,
            stderr: stderr.into(),
        });
        self
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Scripts handed out in order, the last one is reused.
    scripts: VecDeque<TapScript>,
    invocations: Vec<TapInvocation>,
    spawn_failures: u32,
}

/// [`TapLauncher`] replaying scripts instead of starting processes.
#[derive(Debug, Clone, Default)]
pub struct ScriptedLauncher {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedLauncher {
    /// Creates a launcher replaying `script` on every spawn.
    pub fn new(script: TapScript) -> Self {
        Self::with_scripts([script])
    }

    /// Creates a launcher replaying `scripts` on successive spawns, repeating the last one.
    pub fn with_scripts(scripts: impl IntoIterator<Item = TapScript>) -> Self {
        let inner = Inner {
            scripts: scripts.into_iter().collect(),
            ..Inner::default()
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Makes the next `count` spawns fail.
    pub async fn fail_next_spawns(&self, count: u32) {
        let mut inner = self.inner.lock().await;
        inner.spawn_failures = count;
    }

    /// Returns the invocations received so far.
    pub async fn invocations(&self) -> Vec<TapInvocation> {
        let inner = self.inner.lock().await;
        inner.invocations.clone()
    }
}

impl TapLauncher for ScriptedLauncher {
    type Process = ScriptedProcess;

    async fn spawn(&self, invocation: &TapInvocation) -> TapResult<ScriptedProcess> {
        let mut inner = self.inner.lock().await;
        inner.invocations.push(invocation.clone());

        if inner.spawn_failures > 0 {
            inner.spawn_failures -= 1;
            return Err(tap_error!(
                ErrorKind::ProcessError,
                "Failed to spawn tap",
                format!("{}: No such file or directory", invocation.program)
            ));
        }

        let script = if inner.scripts.len() > 1 {
            inner.scripts.pop_front()
        } else {
            inner.scripts.front().cloned()
        }
        .unwrap_or_default();

        Ok(ScriptedProcess {
            steps: script.steps.into(),
            sleep_deadline: None,
            exit: None,
            detached: false,
            terminated: false,
        })
    }
}

/// A running [`TapScript`].
#[derive(Debug)]
pub struct ScriptedProcess {
    steps: VecDeque<ScriptStep>,
    /// End of the sleep in progress, kept so that a dropped read resumes the same sleep.
    sleep_deadline: Option<Instant>,
    exit: Option<TapExit>,
    detached: bool,
    terminated: bool,
}

impl TapProcess for ScriptedProcess {
    async fn next_line(&mut self) -> TapResult<Option<TapLine>> {
        loop {
            if self.terminated {
                return Ok(None);
            }

            match self.steps.front() {
                None => return Ok(None),
                Some(ScriptStep::Line(_)) => {
                    if let Some(ScriptStep::Line(line)) = self.steps.pop_front() {
                        return Ok(Some(Ok(line)));
                    }
                }
                Some(ScriptStep::Sleep(duration)) => {
                    let deadline = *self
                        .sleep_deadline
                        .get_or_insert_with(|| Instant::now() + *duration);
                    tokio::time::sleep_until(deadline).await;

                    self.sleep_deadline = None;
                    self.steps.pop_front();
                }
                Some(ScriptStep::Hang) => pending::<()>().await,
                Some(ScriptStep::Exit { code, stderr }) => {
                    self.exit = Some(TapExit {
                        code: Some(*code),
                        stderr: stderr.clone(),
                    });
                    self.steps.clear();

                    return Ok(None);
                }
                Some(ScriptStep::Detach) => {
                    self.detached = true;
                    self.steps.clear();

                    return Ok(None);
                }
            }
        }
    }

    async fn terminate(&mut self) -> TapResult<()> {
        self.terminated = true;
        Ok(())
    }

    async fn wait(&mut self) -> TapResult<TapExit> {
        if self.detached && !self.terminated {
            pending::<()>().await;
        }

        if self.terminated {
            return Ok(TapExit {
                code: None,
                stderr: String::new(),
            });
        }

        Ok(self.exit.clone().unwrap_or(TapExit {
            code: Some(0),
            stderr: String::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> TapInvocation {
        TapInvocation {
            program: "tap-test".to_string(),
            args: vec![],
            config: crate::process::TapConfigSource::Inline(serde_json::json!({})),
            catalog_path: None,
            state: None,
            env: Default::default(),
            mode: crate::process::TapMode::Sync,
            max_line_bytes: 1024,
            stderr_tail_bytes: 1024,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replays_lines_sleeps_and_exit() {
        let launcher = ScriptedLauncher::new(
            TapScript::new()
                .line("one")
                .sleep(Duration::from_secs(5))
                .line("two")
                .exit(2, "boom"),
        );

        let mut process = launcher.spawn(&invocation()).await.unwrap();
        let start = Instant::now();

        assert_eq!(process.next_line().await.unwrap(), Some(Ok("one".to_string())));
        assert_eq!(process.next_line().await.unwrap(), Some(Ok("two".to_string())));
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(process.next_line().await.unwrap(), None);

        let exit = process.wait().await.unwrap();
        assert_eq!(exit.code, Some(2));
        assert_eq!(exit.stderr, "boom");
        assert_eq!(launcher.invocations().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_sleep_resumes_where_it_stopped() {
        let launcher =
            ScriptedLauncher::new(TapScript::new().sleep(Duration::from_secs(10)).line("late"));
        let mut process = launcher.spawn(&invocation()).await.unwrap();
        let start = Instant::now();

        let read = tokio::time::timeout(Duration::from_secs(4), process.next_line()).await;
        assert!(read.is_err());

        assert_eq!(process.next_line().await.unwrap(), Some(Ok("late".to_string())));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn terminated_process_reports_a_signal_exit() {
        let launcher = ScriptedLauncher::new(TapScript::new().hang());
        let mut process = launcher.spawn(&invocation()).await.unwrap();

        process.terminate().await.unwrap();

        assert_eq!(process.next_line().await.unwrap(), None);
        assert_eq!(process.wait().await.unwrap().code, None);
    }

    #[tokio::test(start_paused = true)]
    async fn detached_process_exits_only_once_terminated() {
        let launcher = ScriptedLauncher::new(TapScript::new().line("one").detach());
        let mut process = launcher.spawn(&invocation()).await.unwrap();

        assert_eq!(process.next_line().await.unwrap(), Some(Ok("one".to_string())));
        assert_eq!(process.next_line().await.unwrap(), None);

        let wait = tokio::time::timeout(Duration::from_secs(60), process.wait()).await;
        assert!(wait.is_err());

        process.terminate().await.unwrap();
        assert_eq!(process.wait().await.unwrap().code, None);
    }

    #[tokio::test]
    async fn spawn_failures_are_consumed() {
        let launcher = ScriptedLauncher::new(TapScript::new());
        launcher.fail_next_spawns(1).await;

        let err = launcher.spawn(&invocation()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessError);
        assert!(launcher.spawn(&invocation()).await.is_ok());
    }
}
