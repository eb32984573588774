use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, TapResult};
use crate::types::{Bookmark, RunId, RunStatus, TapId};

/// Persisted record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    pub run_id: RunId,
    pub tap_id: TapId,
    pub status: RunStatus,
    pub bookmark: Option<Bookmark>,
    /// Number of bookmarks committed so far.
    pub commit_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Time of the last bookmark commit, used to find the latest bookmark of a tap.
    pub committed_at: Option<DateTime<Utc>>,
}

impl StoredRun {
    pub fn new(run_id: RunId, tap_id: TapId) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            tap_id,
            status: RunStatus::Pending,
            bookmark: None,
            commit_count: 0,
            created_at: now,
            updated_at: now,
            committed_at: None,
        }
    }

    /// Replaces the bookmark if the run is still active.
    ///
    /// Fails with [`ErrorKind::StoreConflict`] on terminal runs, leaving the record untouched.
    pub fn apply_commit(&mut self, bookmark: Bookmark) -> TapResult<()> {
        if self.status.is_terminal() {
            bail!(
                ErrorKind::StoreConflict,
                "Bookmark commit rejected",
                format!("run {} is already {}", self.run_id, self.status)
            );
        }

        let now = Utc::now();
        self.bookmark = Some(bookmark);
        self.commit_count += 1;
        self.updated_at = now;
        self.committed_at = Some(now);

        Ok(())
    }

    /// Moves the run to `status` if the transition is legal.
    pub fn apply_status(&mut self, status: RunStatus) -> TapResult<()> {
        if !self.status.can_transition_to(status) {
            bail!(
                ErrorKind::StoreConflict,
                "Run status transition rejected",
                format!("run {} cannot go from {} to {}", self.run_id, self.status, status)
            );
        }

        self.status = status;
        self.updated_at = Utc::now();

        Ok(())
    }
}

/// Durable store of runs and their last committed bookmark.
///
/// Implementations must make each commit atomic: a reader sees either the previous bookmark or
/// the new one, never a mix. Commits of one run are serialized; commits of different runs may
/// proceed in parallel. Once a run reaches a terminal status its record is frozen and further
/// commits fail with [`ErrorKind::StoreConflict`].
///
/// Handles are cheap to clone and shared between concurrent runs.
pub trait StateStore {
    /// Persists a new pending run.
    ///
    /// Fails with [`ErrorKind::StoreConflict`] if the run id already exists.
    fn create_run(
        &self,
        run_id: RunId,
        tap_id: TapId,
    ) -> impl Future<Output = TapResult<StoredRun>> + Send;

    /// Returns the last committed bookmark of a run, `None` if nothing was committed yet or the
    /// run is unknown.
    fn load(&self, run_id: RunId) -> impl Future<Output = TapResult<Option<Bookmark>>> + Send;

    /// Atomically replaces the bookmark of an active run and increments its commit count.
    fn commit(
        &self,
        run_id: RunId,
        bookmark: Bookmark,
    ) -> impl Future<Output = TapResult<()>> + Send;

    /// Moves a run to a new status. Illegal transitions fail with [`ErrorKind::StoreConflict`].
    fn update_status(
        &self,
        run_id: RunId,
        status: RunStatus,
    ) -> impl Future<Output = TapResult<()>> + Send;

    /// Returns the most recently committed bookmark among all runs of a tap.
    fn latest_bookmark(
        &self,
        tap_id: &TapId,
    ) -> impl Future<Output = TapResult<Option<Bookmark>>> + Send;

    fn get_run(&self, run_id: RunId) -> impl Future<Output = TapResult<Option<StoredRun>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn commits_are_rejected_once_terminal() {
        let mut run = StoredRun::new(RunId::new(), TapId::new("tap-test"));
        run.apply_commit(Bookmark::new(Value::from(1i64))).unwrap();
        run.apply_status(RunStatus::Running).unwrap();
        run.apply_status(RunStatus::Failed).unwrap();

        let err = run
            .apply_commit(Bookmark::new(Value::from(2i64)))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StoreConflict);
        assert_eq!(run.bookmark, Some(Bookmark::new(Value::from(1i64))));
        assert_eq!(run.commit_count, 1);
    }

    #[test]
    fn illegal_transitions_leave_the_run_untouched() {
        let mut run = StoredRun::new(RunId::new(), TapId::new("tap-test"));

        let err = run.apply_status(RunStatus::Succeeded).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StoreConflict);
        assert_eq!(run.status, RunStatus::Pending);
    }
}
