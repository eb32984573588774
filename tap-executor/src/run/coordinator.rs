use std::future::pending;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tap_config::shared::{RunConfig, SchemaViolationPolicy};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::concurrency::retry::retry_with_backoff;
use crate::concurrency::shutdown::{ShutdownRx, wait_for_shutdown};
use crate::error::{ErrorKind, TapError, TapResult};
use crate::metrics::{
    FAILURE_KIND, STATUS, STREAM, TAP_BATCH_SEND_DURATION_SECONDS, TAP_BATCH_SIZE,
    TAP_BOOKMARK_COMMITS_TOTAL, TAP_DECODE_ERRORS_TOTAL, TAP_ID, TAP_RECORDS_DELIVERED_TOTAL,
    TAP_RECORDS_SKIPPED_TOTAL, TAP_RUNS_FINISHED_TOTAL, register_metrics,
};
use crate::process::{TapExit, TapInvocation, TapLauncher, TapLine, TapProcess};
use crate::protocol::{DecodeError, decode_line};
use crate::run::batch::RecordBatcher;
use crate::run::request::{ResumePolicy, RunRequest};
use crate::schema::SchemaRegistry;
use crate::sink::{BatchOrigin, Sink};
use crate::store::StateStore;
use crate::tap_error;
use crate::types::{
    Bookmark, RecordMessage, RunFailure, RunId, RunState, RunStatus, TapMessage,
};

/// Why the coordinator stopped reading tap output.
#[derive(Debug)]
enum LoopExit {
    /// The tap closed its standard output.
    EndOfOutput,
    Stopped(StopReason),
    Failed(TapError),
}

/// A condition that ends the run while the tap is still alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    LivenessTimeout,
    WallClockTimeout,
}

/// Drives one run from process spawn to a terminal status.
///
/// The coordinator pulls tap output one line at a time. While it delivers a batch or commits
/// a bookmark it reads nothing, so a slow sink or store fills the pipe and blocks the tap.
#[derive(Debug)]
pub struct RunCoordinator<L, S, K> {
    launcher: L,
    invocation: TapInvocation,
    resume: ResumePolicy,
    shutdown_rx: ShutdownRx,
    active: ActiveRun<S, K>,
}

impl<L, S, K> RunCoordinator<L, S, K>
where
    L: TapLauncher,
    S: StateStore,
    K: Sink,
{
    pub fn new(
        run_id: RunId,
        request: RunRequest,
        launcher: L,
        store: S,
        sink: K,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        let RunRequest {
            tap_id,
            invocation,
            config,
            resume,
        } = request;

        let state = RunState::new(run_id, tap_id.clone());
        let (state_tx, _) = watch::channel(state.clone());

        Self {
            launcher,
            invocation,
            resume,
            shutdown_rx,
            active: ActiveRun {
                config,
                store,
                sink,
                origin: BatchOrigin { run_id, tap_id },
                state,
                state_tx,
                wall_clock_deadline: None,
                registry: SchemaRegistry::new(),
                batcher: RecordBatcher::new(),
            },
        }
    }

    pub fn run_id(&self) -> RunId {
        self.active.origin.run_id
    }

    /// Subscribes to the state published by this run.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.active.state_tx.subscribe()
    }

    /// Executes the run and returns its terminal state.
    ///
    /// Failures are not returned as errors: they end the run as [`RunStatus::Failed`] with the
    /// reason recorded in [`RunState::failure`].
    #[tracing::instrument(
        name = "run",
        skip(self),
        fields(run_id = %self.active.origin.run_id, tap_id = %self.active.origin.tap_id)
    )]
    pub async fn run(self) -> RunState {
        let started = Instant::now();
        register_metrics();

        let Self {
            launcher,
            invocation,
            resume,
            mut shutdown_rx,
            mut active,
        } = self;

        info!("starting run");

        // Store retries and the seed lookup count against the wall clock too.
        active.wall_clock_deadline = active
            .config
            .wall_clock_timeout_ms
            .map(|ms| started + Duration::from_millis(ms));

        let run_id = active.origin.run_id;
        let tap_id = active.origin.tap_id.clone();
        let created = retry_with_backoff(&active.config.store_retry, "create_run", || {
            active.store.create_run(run_id, tap_id.clone())
        })
        .await;

        if let Err(err) = created {
            error!(error = %err, "failed to persist the run");
            return active.conclude(Err(err), false).await;
        }

        active.publish();

        let result = active
            .execute(&launcher, invocation, resume, &mut shutdown_rx)
            .await;

        active.conclude(result, true).await
    }
}

/// Mutable state of a run between spawn and conclusion.
#[derive(Debug)]
struct ActiveRun<S, K> {
    config: RunConfig,
    store: S,
    sink: K,
    origin: BatchOrigin,
    state: RunState,
    state_tx: watch::Sender<RunState>,
    wall_clock_deadline: Option<Instant>,
    registry: SchemaRegistry,
    batcher: RecordBatcher,
}

impl<S, K> ActiveRun<S, K>
where
    S: StateStore,
    K: Sink,
{
    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    async fn execute<L>(
        &mut self,
        launcher: &L,
        invocation: TapInvocation,
        resume: ResumePolicy,
        shutdown_rx: &mut ShutdownRx,
    ) -> TapResult<()>
    where
        L: TapLauncher,
    {
        let seed = self.resolve_seed(resume).await?;
        if seed.is_some() {
            info!("resuming from a previously committed bookmark");
        }

        if self
            .wall_clock_deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            warn!("wall clock timeout reached before the tap was spawned");
            return Err(self.stop_error(StopReason::WallClockTimeout));
        }

        let invocation = invocation.with_state(seed);
        let mut process = launcher.spawn(&invocation).await?;

        let run_id = self.origin.run_id;
        let running = retry_with_backoff(&self.config.store_retry, "update_status", || {
            self.store.update_status(run_id, RunStatus::Running)
        })
        .await;

        if let Err(err) = running {
            stop_process(&mut process).await;
            return Err(err);
        }

        self.state.status = RunStatus::Running;
        self.state.started_at = Some(Utc::now());
        self.publish();

        info!(program = %invocation.program, "tap started, consuming output");

        let reason = match self.consume(&mut process, shutdown_rx).await {
            LoopExit::EndOfOutput => match self.wait_for_exit(&mut process, shutdown_rx).await {
                Ok(exit) => {
                    let exit = exit?;
                    if !exit.success() {
                        self.discard_pending();
                        return Err(tap_error!(
                            ErrorKind::ProcessError,
                            "Tap exited with a failure",
                            exit.describe()
                        ));
                    }

                    return self.flush().await;
                }
                Err(reason) => reason,
            },
            LoopExit::Stopped(reason) => reason,
            LoopExit::Failed(err) => {
                stop_process(&mut process).await;
                self.discard_pending();

                return Err(err);
            }
        };

        stop_process(&mut process).await;
        self.discard_pending();

        Err(self.stop_error(reason))
    }

    fn stop_error(&self, reason: StopReason) -> TapError {
        match reason {
            StopReason::Cancelled => tap_error!(ErrorKind::Cancelled, "Run cancelled"),
            StopReason::LivenessTimeout => tap_error!(
                ErrorKind::LivenessTimeout,
                "Tap produced no output in time",
                format!("no output for {} ms", self.config.liveness_timeout_ms)
            ),
            StopReason::WallClockTimeout => tap_error!(
                ErrorKind::WallClockTimeout,
                "Run exceeded its wall clock timeout",
                format!(
                    "timeout of {} ms",
                    self.config.wall_clock_timeout_ms.unwrap_or_default()
                )
            ),
        }
    }

    async fn resolve_seed(&self, resume: ResumePolicy) -> TapResult<Option<Bookmark>> {
        match resume {
            ResumePolicy::None => Ok(None),
            ResumePolicy::Bookmark(bookmark) => Ok(Some(bookmark)),
            ResumePolicy::LatestForTap => {
                retry_with_backoff(&self.config.store_retry, "latest_bookmark", || {
                    self.store.latest_bookmark(&self.origin.tap_id)
                })
                .await
            }
        }
    }

    /// Reads tap output until it ends, the run is stopped, or a fatal error occurs.
    async fn consume<P>(&mut self, process: &mut P, shutdown_rx: &mut ShutdownRx) -> LoopExit
    where
        P: TapProcess,
    {
        let max_fill = Duration::from_millis(self.config.batch.max_fill_ms);
        let liveness_timeout = Duration::from_millis(self.config.liveness_timeout_ms);
        let mut liveness_deadline = Instant::now() + liveness_timeout;

        loop {
            let flush_deadline = self.batcher.deadline(max_fill);

            tokio::select! {
                biased;

                _ = wait_for_shutdown(shutdown_rx) => {
                    info!("cancellation requested");
                    return LoopExit::Stopped(StopReason::Cancelled);
                }

                _ = sleep_until(self.wall_clock_deadline) => {
                    warn!("wall clock timeout reached");
                    return LoopExit::Stopped(StopReason::WallClockTimeout);
                }

                _ = tokio::time::sleep_until(liveness_deadline) => {
                    warn!("tap produced no output within the liveness timeout");
                    return LoopExit::Stopped(StopReason::LivenessTimeout);
                }

                _ = sleep_until(flush_deadline) => {
                    if let Err(err) = self.flush().await {
                        return LoopExit::Failed(err);
                    }
                }

                line = process.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if let Err(err) = self.handle_line(line).await {
                                return LoopExit::Failed(err);
                            }
                        }
                        Ok(None) => return LoopExit::EndOfOutput,
                        Err(err) => return LoopExit::Failed(err),
                    }
                }
            }

            // Time spent delivering or committing is not tap silence: the tap cannot write
            // while nobody reads.
            liveness_deadline = Instant::now() + liveness_timeout;
        }
    }

    /// Waits for a tap that closed its output to exit.
    ///
    /// A tap may close standard output and keep running, so the wait stays bounded by
    /// cancellation and both timeouts.
    async fn wait_for_exit<P>(
        &self,
        process: &mut P,
        shutdown_rx: &mut ShutdownRx,
    ) -> Result<TapResult<TapExit>, StopReason>
    where
        P: TapProcess,
    {
        let liveness_deadline =
            Instant::now() + Duration::from_millis(self.config.liveness_timeout_ms);

        tokio::select! {
            biased;

            _ = wait_for_shutdown(shutdown_rx) => {
                info!("cancellation requested while waiting for the tap to exit");
                Err(StopReason::Cancelled)
            }

            _ = sleep_until(self.wall_clock_deadline) => {
                warn!("wall clock timeout reached while waiting for the tap to exit");
                Err(StopReason::WallClockTimeout)
            }

            _ = tokio::time::sleep_until(liveness_deadline) => {
                warn!("tap closed its output but did not exit within the liveness timeout");
                Err(StopReason::LivenessTimeout)
            }

            exit = process.wait() => Ok(exit),
        }
    }

    async fn handle_line(&mut self, line: TapLine) -> TapResult<()> {
        let decoded = line.and_then(|line| decode_line(&line));

        match decoded {
            Ok(Some(message)) => self.handle_message(message).await,
            Ok(None) => Ok(()),
            Err(err) => self.handle_decode_error(err),
        }
    }

    fn handle_decode_error(&mut self, err: DecodeError) -> TapResult<()> {
        self.state.decode_error_count += 1;
        counter!(TAP_DECODE_ERRORS_TOTAL, TAP_ID => self.origin.tap_id.to_string()).increment(1);

        let count = self.state.decode_error_count;
        let threshold = u64::from(self.config.max_decode_errors);
        warn!(error = %err, count, threshold, "failed to decode tap output line");
        self.publish();

        if count > threshold {
            return Err(tap_error!(
                ErrorKind::FatalProtocolError,
                "Too many undecodable lines in tap output",
                format!("{count} decode errors, last one: {err}")
            ));
        }

        Ok(())
    }

    async fn handle_message(&mut self, message: TapMessage) -> TapResult<()> {
        match message {
            TapMessage::Schema(schema) => {
                self.registry.update(&schema);
                Ok(())
            }
            TapMessage::Record(record) => self.handle_record(record).await,
            TapMessage::State(state) => {
                // Records emitted before this STATE must be delivered before it is committed.
                self.flush().await?;

                self.commit(Bookmark::from(state)).await
            }
        }
    }

    async fn handle_record(&mut self, record: RecordMessage) -> TapResult<()> {
        if let Err(violation) = self.registry.validate(&record) {
            if violation.is_ordering_violation()
                || self.config.schema_violation_policy == SchemaViolationPolicy::Abort
            {
                error!(error = %violation, "record rejected by its schema");
                return Err(violation.into());
            }

            self.state.records_skipped_count += 1;
            counter!(
                TAP_RECORDS_SKIPPED_TOTAL,
                TAP_ID => self.origin.tap_id.to_string(),
                STREAM => record.stream.clone()
            )
            .increment(1);
            warn!(error = %violation, "skipping record that violates its schema");
            self.publish();

            return Ok(());
        }

        self.batcher.push(record.stream, record.record);
        if self.batcher.is_full(self.config.batch.max_size) {
            self.flush().await?;
        }

        Ok(())
    }

    /// Delivers every pending record, stream by stream.
    async fn flush(&mut self) -> TapResult<()> {
        if self.batcher.is_empty() {
            return Ok(());
        }

        let total = self.batcher.len();
        let started = Instant::now();

        for (stream, records) in self.batcher.drain() {
            let count = records.len() as u64;

            retry_with_backoff(&self.config.sink_retry, "deliver", || {
                self.sink.deliver(&self.origin, &stream, records.clone())
            })
            .await?;

            counter!(
                TAP_RECORDS_DELIVERED_TOTAL,
                TAP_ID => self.origin.tap_id.to_string(),
                STREAM => stream.clone()
            )
            .increment(count);

            self.state.records_emitted_count += count;
            *self.state.stream_record_counts.entry(stream).or_default() += count;
        }

        let elapsed = started.elapsed();
        gauge!(TAP_BATCH_SIZE).set(total as f64);
        histogram!(TAP_BATCH_SEND_DURATION_SECONDS).record(elapsed.as_secs_f64());
        debug!(records = total, elapsed_ms = elapsed.as_millis() as u64, "batch delivered");

        self.publish();

        Ok(())
    }

    async fn commit(&mut self, bookmark: Bookmark) -> TapResult<()> {
        let run_id = self.origin.run_id;
        retry_with_backoff(&self.config.store_retry, "commit", || {
            self.store.commit(run_id, bookmark.clone())
        })
        .await?;

        counter!(TAP_BOOKMARK_COMMITS_TOTAL, TAP_ID => self.origin.tap_id.to_string())
            .increment(1);
        debug!("bookmark committed");

        self.state.last_committed_bookmark = Some(bookmark);
        self.publish();

        Ok(())
    }

    fn discard_pending(&mut self) {
        let dropped = self.batcher.discard();
        if dropped > 0 {
            warn!(records = dropped, "discarding records that were not delivered");
        }
    }

    /// Moves the run to its terminal status and publishes the final state.
    async fn conclude(mut self, result: TapResult<()>, persisted: bool) -> RunState {
        let run_id = self.origin.run_id;

        let result = match result {
            Ok(()) if persisted => {
                retry_with_backoff(&self.config.store_retry, "update_status", || {
                    self.store.update_status(run_id, RunStatus::Succeeded)
                })
                .await
            }
            other => other,
        };

        match result {
            Ok(()) => {
                self.state.status = RunStatus::Succeeded;
                info!(
                    records = self.state.records_emitted_count,
                    skipped = self.state.records_skipped_count,
                    "run succeeded"
                );
            }
            Err(err) => {
                if persisted
                    && let Err(status_err) =
                        retry_with_backoff(&self.config.store_retry, "update_status", || {
                            self.store.update_status(run_id, RunStatus::Failed)
                        })
                        .await
                {
                    warn!(error = %status_err, "failed to persist the failed status");
                }

                error!(error = %err, "run failed");
                self.state.status = RunStatus::Failed;
                self.state.failure = Some(RunFailure::from(&err));
            }
        }

        self.state.ended_at = Some(Utc::now());

        let failure_kind = self
            .state
            .failure
            .as_ref()
            .map(|failure| format!("{:?}", failure.kind))
            .unwrap_or_default();
        counter!(
            TAP_RUNS_FINISHED_TOTAL,
            STATUS => self.state.status.as_str(),
            FAILURE_KIND => failure_kind
        )
        .increment(1);

        self.publish();

        self.state
    }
}

/// Sleeps until `deadline`, forever when there is none.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

/// Kills a tap and collects its exit, logging what it wrote to stderr.
async fn stop_process<P: TapProcess>(process: &mut P) -> Option<TapExit> {
    if let Err(err) = process.terminate().await {
        warn!(error = %err, "failed to terminate tap");
    }

    match process.wait().await {
        Ok(exit) => {
            debug!(exit = %exit.describe(), "tap stopped");
            Some(exit)
        }
        Err(err) => {
            warn!(error = %err, "failed to collect tap exit");
            None
        }
    }
}
