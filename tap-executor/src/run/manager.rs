use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, TapResult};
use crate::process::TapLauncher;
use crate::run::coordinator::RunCoordinator;
use crate::run::request::RunRequest;
use crate::sink::Sink;
use crate::store::StateStore;
use crate::tap_error;
use crate::types::{RunId, RunState};

/// Handle to a run executing in the background.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    state_rx: watch::Receiver<RunState>,
    shutdown_tx: ShutdownTx,
    handle: Option<JoinHandle<RunState>>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Returns a receiver observing every state the run publishes.
    pub fn state(&self) -> watch::Receiver<RunState> {
        self.state_rx.clone()
    }

    /// Returns the most recently published state.
    pub fn current_state(&self) -> RunState {
        self.state_rx.borrow().clone()
    }

    /// Requests cancellation. Has no effect once the run is terminal.
    pub fn cancel(&self) {
        if self.shutdown_tx.shutdown().is_err() {
            debug!(run_id = %self.run_id, "cancellation requested for a finished run");
        }
    }

    /// Waits for the run to reach a terminal status.
    ///
    /// A run that fails still resolves to `Ok`: the failure is part of the returned state.
    /// Errors are reserved for a run task that panicked or was aborted.
    pub async fn wait(mut self) -> TapResult<RunState> {
        let Some(handle) = self.handle.take() else {
            return Ok(self.state_rx.borrow().clone());
        };

        handle.await.map_err(|err| {
            tap_error!(
                ErrorKind::InvalidState,
                "Run task did not complete",
                format!("run {}: {err}", self.run_id)
            )
        })
    }
}

/// Starts runs as independent tasks sharing one launcher, state store and sink.
#[derive(Debug, Clone)]
pub struct RunManager<L, S, K> {
    launcher: L,
    store: S,
    sink: K,
    active: Arc<Mutex<HashMap<RunId, ShutdownTx>>>,
}

impl<L, S, K> RunManager<L, S, K>
where
    L: TapLauncher + Clone + Send + Sync + 'static,
    L::Process: 'static,
    S: StateStore + Clone + Send + Sync + 'static,
    K: Sink + Clone + Send + Sync + 'static,
{
    pub fn new(launcher: L, store: S, sink: K) -> Self {
        Self {
            launcher,
            store,
            sink,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Starts a new run with a fresh run id.
    ///
    /// The run is created in the state store as pending before its tap is spawned.
    pub async fn start_run(&self, request: RunRequest) -> TapResult<RunHandle> {
        request.config.validate()?;

        let run_id = RunId::new();
        let tap_id = request.tap_id.clone();
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        let coordinator = RunCoordinator::new(
            run_id,
            request,
            self.launcher.clone(),
            self.store.clone(),
            self.sink.clone(),
            shutdown_rx,
        );
        let state_rx = coordinator.subscribe();

        let mut active = self.active.lock().await;
        active.insert(run_id, shutdown_tx.clone());
        drop(active);

        let active = self.active.clone();
        let handle = tokio::spawn(async move {
            let state = coordinator.run().await;
            active.lock().await.remove(&run_id);
            state
        });

        info!(%run_id, %tap_id, "run started");

        Ok(RunHandle {
            run_id,
            state_rx,
            shutdown_tx,
            handle: Some(handle),
        })
    }

    /// Returns the ids of runs that have not finished yet.
    pub async fn active_runs(&self) -> Vec<RunId> {
        let active = self.active.lock().await;
        let mut run_ids: Vec<_> = active.keys().copied().collect();
        run_ids.sort();
        run_ids
    }

    /// Cancels an active run. Returns `false` if no such run is active.
    pub async fn cancel(&self, run_id: RunId) -> bool {
        let active = self.active.lock().await;
        match active.get(&run_id) {
            Some(shutdown_tx) => {
                let _ = shutdown_tx.shutdown();
                true
            }
            None => false,
        }
    }

    /// Cancels every active run.
    pub async fn shutdown_all(&self) {
        let active = self.active.lock().await;
        info!(runs = active.len(), "cancelling all active runs");

        for shutdown_tx in active.values() {
            let _ = shutdown_tx.shutdown();
        }
    }
}
