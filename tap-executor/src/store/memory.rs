use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{ErrorKind, TapResult};
use crate::store::base::{StateStore, StoredRun};
use crate::types::{Bookmark, RunId, RunStatus, TapId};
use crate::{bail, tap_error};

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<RunId, StoredRun>,
    /// Global commit sequence number of the last commit of each run. Orders commits whose
    /// timestamps are equal.
    commit_sequences: HashMap<RunId, u64>,
    next_commit_sequence: u64,
}

/// Process-local [`StateStore`]. Everything is lost when the process exits.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored run.
    pub async fn runs(&self) -> Vec<StoredRun> {
        let inner = self.inner.lock().await;
        inner.runs.values().cloned().collect()
    }
}

fn unknown_run(run_id: RunId) -> crate::error::TapError {
    tap_error!(
        ErrorKind::StoreConflict,
        "Unknown run",
        format!("run {run_id} does not exist in the state store")
    )
}

impl StateStore for MemoryStateStore {
    async fn create_run(&self, run_id: RunId, tap_id: TapId) -> TapResult<StoredRun> {
        let mut inner = self.inner.lock().await;

        if inner.runs.contains_key(&run_id) {
            bail!(
                ErrorKind::StoreConflict,
                "Run already exists",
                format!("run {run_id} was already created")
            );
        }

        let run = StoredRun::new(run_id, tap_id);
        inner.runs.insert(run_id, run.clone());

        Ok(run)
    }

    async fn load(&self, run_id: RunId) -> TapResult<Option<Bookmark>> {
        let inner = self.inner.lock().await;

        Ok(inner.runs.get(&run_id).and_then(|run| run.bookmark.clone()))
    }

    async fn commit(&self, run_id: RunId, bookmark: Bookmark) -> TapResult<()> {
        let mut inner = self.inner.lock().await;

        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| unknown_run(run_id))?;
        run.apply_commit(bookmark)?;

        inner.next_commit_sequence += 1;
        let sequence = inner.next_commit_sequence;
        inner.commit_sequences.insert(run_id, sequence);

        Ok(())
    }

    async fn update_status(&self, run_id: RunId, status: RunStatus) -> TapResult<()> {
        let mut inner = self.inner.lock().await;

        inner
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| unknown_run(run_id))?
            .apply_status(status)
    }

    async fn latest_bookmark(&self, tap_id: &TapId) -> TapResult<Option<Bookmark>> {
        let inner = self.inner.lock().await;

        let latest = inner
            .runs
            .values()
            .filter(|run| &run.tap_id == tap_id && run.bookmark.is_some())
            .max_by_key(|run| inner.commit_sequences.get(&run.run_id).copied())
            .and_then(|run| run.bookmark.clone());

        Ok(latest)
    }

    async fn get_run(&self, run_id: RunId) -> TapResult<Option<StoredRun>> {
        let inner = self.inner.lock().await;

        Ok(inner.runs.get(&run_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn bookmark(cursor: i64) -> Bookmark {
        Bookmark::new(Value::from(cursor))
    }

    #[tokio::test]
    async fn commit_replaces_bookmark_and_counts() {
        let store = MemoryStateStore::new();
        let run_id = RunId::new();
        store
            .create_run(run_id, TapId::new("tap-orders"))
            .await
            .unwrap();

        assert_eq!(store.load(run_id).await.unwrap(), None);

        store.commit(run_id, bookmark(1)).await.unwrap();
        store.commit(run_id, bookmark(2)).await.unwrap();

        let run = store.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(run.bookmark, Some(bookmark(2)));
        assert_eq!(run.commit_count, 2);
        assert!(run.committed_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_and_unknown_runs_conflict() {
        let store = MemoryStateStore::new();
        let run_id = RunId::new();
        store
            .create_run(run_id, TapId::new("tap-orders"))
            .await
            .unwrap();

        let err = store
            .create_run(run_id, TapId::new("tap-orders"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreConflict);

        let err = store.commit(RunId::new(), bookmark(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreConflict);
    }

    #[tokio::test]
    async fn latest_bookmark_follows_commit_order_per_tap() {
        let store = MemoryStateStore::new();
        let tap_id = TapId::new("tap-orders");
        let first = RunId::new();
        let second = RunId::new();
        let other_tap = RunId::new();

        store.create_run(first, tap_id.clone()).await.unwrap();
        store.create_run(second, tap_id.clone()).await.unwrap();
        store
            .create_run(other_tap, TapId::new("tap-customers"))
            .await
            .unwrap();

        assert_eq!(store.latest_bookmark(&tap_id).await.unwrap(), None);

        store.commit(second, bookmark(5)).await.unwrap();
        store.commit(first, bookmark(7)).await.unwrap();
        store.commit(other_tap, bookmark(100)).await.unwrap();

        assert_eq!(
            store.latest_bookmark(&tap_id).await.unwrap(),
            Some(bookmark(7))
        );
    }

    #[tokio::test]
    async fn terminal_runs_are_frozen() {
        let store = MemoryStateStore::new();
        let run_id = RunId::new();
        store
            .create_run(run_id, TapId::new("tap-orders"))
            .await
            .unwrap();
        store.commit(run_id, bookmark(1)).await.unwrap();
        store
            .update_status(run_id, RunStatus::Failed)
            .await
            .unwrap();

        let err = store.commit(run_id, bookmark(2)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreConflict);

        let err = store
            .update_status(run_id, RunStatus::Running)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreConflict);

        assert_eq!(store.load(run_id).await.unwrap(), Some(bookmark(1)));
    }
}
