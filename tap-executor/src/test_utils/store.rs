use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::error::{ErrorKind, TapResult};
use crate::store::{StateStore, StoredRun};
use crate::tap_error;
use crate::types::{Bookmark, RunId, RunStatus, TapId};

#[derive(Debug, Default)]
struct Faults {
    commit_failures: u32,
    commit_failure_kind: Option<ErrorKind>,
    status_failures: u32,
    latest_bookmark_delay: Option<Duration>,
    commits: u64,
    commit_notifiers: Vec<(u64, Arc<Notify>)>,
}

/// [`StateStore`] wrapper failing chosen calls before forwarding them.
#[derive(Debug, Clone)]
pub struct FaultyStore<S> {
    inner: S,
    faults: Arc<Mutex<Faults>>,
}

impl<S> FaultyStore<S> {
    pub fn wrap(inner: S) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(Faults::default())),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Makes the next `count` commits fail with `kind` without reaching the wrapped store.
    pub async fn fail_next_commits(&self, count: u32, kind: ErrorKind) {
        let mut faults = self.faults.lock().await;
        faults.commit_failures = count;
        faults.commit_failure_kind = Some(kind);
    }

    /// Makes the next `count` status updates fail with a retryable error.
    pub async fn fail_next_status_updates(&self, count: u32) {
        let mut faults = self.faults.lock().await;
        faults.status_failures = count;
    }

    /// Delays every lookup of the latest bookmark by `delay`.
    pub async fn delay_latest_bookmark(&self, delay: Duration) {
        self.faults.lock().await.latest_bookmark_delay = Some(delay);
    }

    /// Number of commits that reached the wrapped store successfully.
    pub async fn commit_count(&self) -> u64 {
        self.faults.lock().await.commits
    }

    /// Returns a notification fired once `count` commits have succeeded.
    pub async fn notify_on_commits(&self, count: u64) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        let mut faults = self.faults.lock().await;

        if faults.commits >= count {
            notify.notify_one();
        } else {
            faults.commit_notifiers.push((count, notify.clone()));
        }

        notify
    }
}

impl<S> StateStore for FaultyStore<S>
where
    S: StateStore + Send + Sync,
{
    async fn create_run(&self, run_id: RunId, tap_id: TapId) -> TapResult<StoredRun> {
        self.inner.create_run(run_id, tap_id).await
    }

    async fn load(&self, run_id: RunId) -> TapResult<Option<Bookmark>> {
        self.inner.load(run_id).await
    }

    async fn commit(&self, run_id: RunId, bookmark: Bookmark) -> TapResult<()> {
        {
            let mut faults = self.faults.lock().await;
            if faults.commit_failures > 0 {
                faults.commit_failures -= 1;
                let kind = faults.commit_failure_kind.unwrap_or(ErrorKind::StoreError);
                return Err(tap_error!(kind, "Injected commit failure"));
            }
        }

        self.inner.commit(run_id, bookmark).await?;

        let mut faults = self.faults.lock().await;
        faults.commits += 1;
        let commits = faults.commits;
        faults.commit_notifiers.retain(|(count, notify)| {
            let reached = commits >= *count;
            if reached {
                notify.notify_one();
            }
            !reached
        });

        Ok(())
    }

    async fn update_status(&self, run_id: RunId, status: RunStatus) -> TapResult<()> {
        {
            let mut faults = self.faults.lock().await;
            if faults.status_failures > 0 {
                faults.status_failures -= 1;
                return Err(tap_error!(
                    ErrorKind::StoreError,
                    "Injected status update failure"
                ));
            }
        }

        self.inner.update_status(run_id, status).await
    }

    async fn latest_bookmark(&self, tap_id: &TapId) -> TapResult<Option<Bookmark>> {
        let delay = self.faults.lock().await.latest_bookmark_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.inner.latest_bookmark(tap_id).await
    }

    async fn get_run(&self, run_id: RunId) -> TapResult<Option<StoredRun>> {
        self.inner.get_run(run_id).await
    }
}
