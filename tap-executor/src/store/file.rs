use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, TapError, TapResult};
use crate::store::base::{StateStore, StoredRun};
use crate::types::{Bookmark, RunId, RunStatus, TapId};
use crate::{bail, tap_error};

/// Extension of run documents.
const RUN_FILE_EXTENSION: &str = "json";

/// [`StateStore`] keeping one JSON document per run in a directory.
///
/// Every write goes to a temporary file in the same directory which is flushed to disk and
/// then renamed over the previous document, so readers only ever see complete documents.
/// Writes of one run are serialized by a per-run lock, which lives only while a write holds it.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    directory: PathBuf,
    run_locks: Arc<Mutex<HashMap<RunId, Weak<Mutex<()>>>>>,
}

impl FileStateStore {
    /// Opens the store, creating `directory` if needed.
    pub async fn open(directory: impl Into<PathBuf>) -> TapResult<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await.map_err(|err| {
            tap_error!(
                ErrorKind::StoreError,
                "Failed to create the state directory",
                format!("{}: {err}", directory.display())
            )
        })?;

        Ok(Self {
            directory,
            run_locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn run_path(&self, run_id: RunId) -> PathBuf {
        self.directory
            .join(format!("{run_id}.{RUN_FILE_EXTENSION}"))
    }

    async fn run_lock(&self, run_id: RunId) -> Arc<Mutex<()>> {
        let mut locks = self.run_locks.lock().await;
        locks.retain(|_, lock| lock.strong_count() > 0);

        if let Some(lock) = locks.get(&run_id).and_then(Weak::upgrade) {
            return lock;
        }

        let lock = Arc::new(Mutex::new(()));
        locks.insert(run_id, Arc::downgrade(&lock));

        lock
    }

    async fn read_run(&self, run_id: RunId) -> TapResult<Option<StoredRun>> {
        read_run_file(&self.run_path(run_id)).await
    }

    async fn read_existing_run(&self, run_id: RunId) -> TapResult<StoredRun> {
        self.read_run(run_id).await?.ok_or_else(|| {
            tap_error!(
                ErrorKind::StoreConflict,
                "Unknown run",
                format!("run {run_id} does not exist in the state store")
            )
        })
    }

    async fn write_run(&self, run: &StoredRun) -> TapResult<()> {
        let path = self.run_path(run.run_id);
        let tmp_path = self
            .directory
            .join(format!(".{}.{}.tmp", run.run_id, Uuid::new_v4()));

        let contents = serde_json::to_vec_pretty(run).map_err(|err| {
            tap_error!(
                ErrorKind::SerializationError,
                "Failed to serialize the run document",
                err
            )
        })?;

        if let Err(err) = write_synced(&tmp_path, &contents).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(store_io_error("Failed to write the run document", &tmp_path, err));
        }

        if let Err(err) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(store_io_error("Failed to replace the run document", &path, err));
        }

        sync_directory(&self.directory).await;

        debug!(run_id = %run.run_id, path = %path.display(), "run document written");

        Ok(())
    }

    /// Reads a run, applies `update` and writes it back while holding the run's lock.
    async fn update_run<F>(&self, run_id: RunId, update: F) -> TapResult<()>
    where
        F: FnOnce(&mut StoredRun) -> TapResult<()> + Send,
    {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;

        let mut run = self.read_existing_run(run_id).await?;
        update(&mut run)?;
        self.write_run(&run).await
    }

    async fn all_runs(&self) -> TapResult<Vec<StoredRun>> {
        let list_error =
            |err| store_io_error("Failed to list the state directory", &self.directory, err);

        let mut entries = fs::read_dir(&self.directory).await.map_err(list_error)?;

        let mut runs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(list_error)? {
            let path = entry.path();
            let is_run_file = path.extension().is_some_and(|ext| ext == RUN_FILE_EXTENSION)
                && !path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with('.'));

            if !is_run_file {
                continue;
            }

            match read_run_file(&path).await {
                Ok(Some(run)) => runs.push(run),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "skipping unreadable run document"
                    );
                }
            }
        }

        Ok(runs)
    }
}

async fn read_run_file(path: &Path) -> TapResult<Option<StoredRun>> {
    let contents = match fs::read(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(store_io_error("Failed to read the run document", path, err)),
    };

    let run = serde_json::from_slice(&contents).map_err(|err| {
        tap_error!(
            ErrorKind::DeserializationError,
            "Corrupted run document",
            format!("{}: {err}", path.display())
        )
    })?;

    Ok(Some(run))
}

async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}

/// Flushes the directory entry of a rename. Best effort: not every platform allows opening
/// directories.
async fn sync_directory(directory: &Path) {
    #[cfg(unix)]
    if let Ok(dir) = fs::File::open(directory).await
        && let Err(err) = dir.sync_all().await
    {
        debug!(directory = %directory.display(), error = %err, "failed to sync state directory");
    }

    #[cfg(not(unix))]
    let _ = directory;
}

fn store_io_error(description: &'static str, path: &Path, err: std::io::Error) -> TapError {
    tap_error!(
        ErrorKind::StoreError,
        description,
        format!("{}: {err}", path.display())
    )
}

impl StateStore for FileStateStore {
    async fn create_run(&self, run_id: RunId, tap_id: TapId) -> TapResult<StoredRun> {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;

        if self.read_run(run_id).await?.is_some() {
            bail!(
                ErrorKind::StoreConflict,
                "Run already exists",
                format!("run {run_id} was already created")
            );
        }

        let run = StoredRun::new(run_id, tap_id);
        self.write_run(&run).await?;

        Ok(run)
    }

    async fn load(&self, run_id: RunId) -> TapResult<Option<Bookmark>> {
        Ok(self.read_run(run_id).await?.and_then(|run| run.bookmark))
    }

    async fn commit(&self, run_id: RunId, bookmark: Bookmark) -> TapResult<()> {
        self.update_run(run_id, move |run| run.apply_commit(bookmark))
            .await
    }

    async fn update_status(&self, run_id: RunId, status: RunStatus) -> TapResult<()> {
        self.update_run(run_id, move |run| run.apply_status(status))
            .await
    }

    async fn latest_bookmark(&self, tap_id: &TapId) -> TapResult<Option<Bookmark>> {
        let latest = self
            .all_runs()
            .await?
            .into_iter()
            .filter(|run| &run.tap_id == tap_id && run.bookmark.is_some())
            .max_by_key(|run| (run.committed_at, run.commit_count))
            .and_then(|run| run.bookmark);

        Ok(latest)
    }

    async fn get_run(&self, run_id: RunId) -> TapResult<Option<StoredRun>> {
        self.read_run(run_id).await
    }
}
