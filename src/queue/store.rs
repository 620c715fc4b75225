use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use fs2::FileExt;
use tempfile::NamedTempFile;

use super::models::*;
use crate::errors::QueueError;

type QueueResult<T> = std::result::Result<T, QueueError>;

/// Durable four-partition task queue backed by a single JSON document.
///
/// Every operation runs inside a critical section guarded by an advisory
/// lock on a sibling `.lock` file: mutations hold it exclusively across the
/// whole read-modify-write cycle, reads hold it shared. The document itself
/// is replaced atomically (tempfile + rename), so readers never observe a
/// half-written file and a task is never visible in two partitions or none.
pub struct QueueStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl QueueStore {
    /// Open (or create) the queue document at `path`.
    pub fn open(path: &Path) -> QueueResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| QueueError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");
        let store = Self {
            path: path.to_path_buf(),
            lock_path: PathBuf::from(lock_name),
        };
        store.transact(|_| Ok(((), false)))?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self, exclusive: bool) -> QueueResult<File> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|source| QueueError::Lock {
                path: self.lock_path.clone(),
                source,
            })?;
        let locked = if exclusive {
            FileExt::lock_exclusive(&file)
        } else {
            FileExt::lock_shared(&file)
        };
        locked.map_err(|source| QueueError::Lock {
            path: self.lock_path.clone(),
            source,
        })?;
        // Dropping the handle closes the descriptor and releases the lock.
        Ok(file)
    }

    /// Read the document; a missing file is an empty queue.
    fn load(&self) -> QueueResult<(QueueSnapshot, bool)> {
        match std::fs::read(&self.path) {
            Ok(bytes) => {
                let snapshot = serde_json::from_slice(&bytes).map_err(|source| QueueError::Corrupt {
                    path: self.path.clone(),
                    source,
                })?;
                Ok((snapshot, true))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((QueueSnapshot::default(), false)),
            Err(source) => Err(QueueError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn persist(&self, snapshot: &QueueSnapshot) -> QueueResult<()> {
        let io_err = |source| QueueError::Io {
            path: self.path.clone(),
            source,
        };
        let data = serde_json::to_vec_pretty(snapshot).map_err(|source| QueueError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&data).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    /// Run `f` inside the exclusive critical section. `f` returns its value and
    /// whether it changed the snapshot; changed snapshots are written back.
    fn transact<R>(
        &self,
        f: impl FnOnce(&mut QueueSnapshot) -> QueueResult<(R, bool)>,
    ) -> QueueResult<R> {
        let _guard = self.lock(true)?;
        let (mut snapshot, exists) = self.load()?;
        let (value, changed) = f(&mut snapshot)?;
        if changed || !exists {
            self.persist(&snapshot)?;
        }
        Ok(value)
    }

    fn read<R>(&self, f: impl FnOnce(&QueueSnapshot) -> R) -> QueueResult<R> {
        let _guard = self.lock(false)?;
        let (snapshot, _) = self.load()?;
        Ok(f(&snapshot))
    }

    /// Append a new pending task built from `description` and `options`.
    pub fn add_task(&self, description: &str, options: TaskOptions) -> QueueResult<Task> {
        let task = Task::new(description, options);
        self.transact(|snapshot| {
            snapshot.pending.push(task.clone());
            Ok((task, true))
        })
    }

    /// Move the head of `pending` to `processing`. `None` when nothing is pending.
    pub fn get_next_task(&self) -> QueueResult<Option<Task>> {
        self.transact(|snapshot| {
            if snapshot.pending.is_empty() {
                return Ok((None, false));
            }
            let mut task = snapshot.pending.remove(0);
            task.status = TaskStatus::Processing;
            task.started_at = Some(Utc::now());
            snapshot.processing.push(task.clone());
            Ok((Some(task), true))
        })
    }

    pub fn complete_task(&self, id: &str, result: TaskResult) -> QueueResult<Task> {
        self.transact(|snapshot| {
            let mut task = snapshot
                .take(TaskStatus::Processing, id)
                .ok_or_else(|| QueueError::not_found(id))?;
            task.status = TaskStatus::Completed;
            task.completed_at = Some(Utc::now());
            task.result = Some(result);
            snapshot.completed.push(task.clone());
            Ok((task, true))
        })
    }

    /// Fail a task that is processing, or one that never left pending.
    pub fn fail_task(&self, id: &str, error: &str) -> QueueResult<Task> {
        self.transact(|snapshot| {
            let mut task = snapshot
                .take(TaskStatus::Processing, id)
                .or_else(|| snapshot.take(TaskStatus::Pending, id))
                .ok_or_else(|| QueueError::not_found(id))?;
            task.status = TaskStatus::Failed;
            task.failed_at = Some(Utc::now());
            task.error = Some(error.to_string());
            snapshot.failed.push(task.clone());
            Ok((task, true))
        })
    }

    /// Return a failed task to `pending` with all run state cleared.
    pub fn retry_task(&self, id: &str) -> QueueResult<Task> {
        self.transact(|snapshot| {
            let mut task = snapshot
                .take(TaskStatus::Failed, id)
                .ok_or_else(|| QueueError::not_found(id))?;
            task.status = TaskStatus::Pending;
            task.error = None;
            task.failed_at = None;
            task.started_at = None;
            task.completed_at = None;
            task.result = None;
            task.created_at = Utc::now();
            snapshot.pending.push(task.clone());
            Ok((task, true))
        })
    }

    pub fn get_task(&self, id: &str) -> QueueResult<Option<Task>> {
        self.read(|snapshot| snapshot.find(id).cloned())
    }

    pub fn list_tasks(&self, status: TaskStatus) -> QueueResult<Vec<Task>> {
        self.read(|snapshot| snapshot.partition(status).clone())
    }

    pub fn snapshot(&self) -> QueueResult<QueueSnapshot> {
        self.read(|snapshot| snapshot.clone())
    }

    pub fn stats(&self) -> QueueResult<QueueStats> {
        self.read(QueueSnapshot::stats)
    }
}

/// Async-safe handle to the queue store.
///
/// Runs every store operation on tokio's blocking pool via `spawn_blocking`,
/// since lock acquisition and file I/O are synchronous.
#[derive(Clone)]
pub struct QueueHandle {
    inner: Arc<QueueStore>,
}

impl QueueHandle {
    pub fn new(store: QueueStore) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Run a closure with access to the store on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> QueueResult<R>
    where
        F: FnOnce(&QueueStore) -> QueueResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| QueueError::Join(e.to_string()))?
    }

    pub fn store(&self) -> &QueueStore {
        &self.inner
    }

    pub async fn add_task(&self, description: String, options: TaskOptions) -> QueueResult<Task> {
        self.call(move |store| store.add_task(&description, options)).await
    }

    pub async fn get_next_task(&self) -> QueueResult<Option<Task>> {
        self.call(|store| store.get_next_task()).await
    }

    pub async fn complete_task(&self, id: String, result: TaskResult) -> QueueResult<Task> {
        self.call(move |store| store.complete_task(&id, result)).await
    }

    pub async fn fail_task(&self, id: String, error: String) -> QueueResult<Task> {
        self.call(move |store| store.fail_task(&id, &error)).await
    }

    pub async fn retry_task(&self, id: String) -> QueueResult<Task> {
        self.call(move |store| store.retry_task(&id)).await
    }

    pub async fn get_task(&self, id: String) -> QueueResult<Option<Task>> {
        self.call(move |store| store.get_task(&id)).await
    }

    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> QueueResult<Vec<Task>> {
        self.call(move |store| match status {
            Some(status) => store.list_tasks(status),
            None => store.snapshot().map(|s| {
                TaskStatus::ALL
                    .iter()
                    .flat_map(|status| s.partition(*status).clone())
                    .collect()
            }),
        })
        .await
    }

    pub async fn snapshot(&self) -> QueueResult<QueueSnapshot> {
        self.call(|store| store.snapshot()).await
    }

    pub async fn stats(&self) -> QueueResult<QueueStats> {
        self.call(|store| store.stats()).await
    }
}
