//! Batch registry storage.
//!
//! The orchestrator talks to a [`BatchStore`]; every read-modify-write goes
//! through [`BatchStore::update`], which runs the closure under the store's
//! single lock so no reader ever sees a half-applied change.

use super::model::{BatchJob, BatchStatus};
use crate::error::Doc2MdError;
use crate::history::write_bytes_atomic;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{info, warn};

/// Keyed storage for [`BatchJob`]s.
pub trait BatchStore: Send + Sync {
    /// Snapshot of one batch.
    fn get(&self, batch_id: &str) -> Option<BatchJob>;

    /// Insert or replace.
    fn put(&self, job: BatchJob);

    fn delete(&self, batch_id: &str) -> Option<BatchJob>;

    /// Snapshots of every batch, newest first.
    fn list(&self) -> Vec<BatchJob>;

    /// Apply `f` to the stored batch atomically.
    ///
    /// Returns `false` when no batch has this id.
    fn update(&self, batch_id: &str, f: &mut dyn FnMut(&mut BatchJob)) -> bool;
}

fn lock_map(map: &Mutex<HashMap<String, BatchJob>>) -> MutexGuard<'_, HashMap<String, BatchJob>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn newest_first(map: &HashMap<String, BatchJob>) -> Vec<BatchJob> {
    let mut jobs: Vec<BatchJob> = map.values().cloned().collect();
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    jobs
}

// ── In-memory ────────────────────────────────────────────────────────────

/// Registry that lives and dies with the process.
#[derive(Debug, Default)]
pub struct MemoryBatchStore {
    jobs: Mutex<HashMap<String, BatchJob>>,
}

impl MemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchStore for MemoryBatchStore {
    fn get(&self, batch_id: &str) -> Option<BatchJob> {
        lock_map(&self.jobs).get(batch_id).cloned()
    }

    fn put(&self, job: BatchJob) {
        lock_map(&self.jobs).insert(job.batch_id.clone(), job);
    }

    fn delete(&self, batch_id: &str) -> Option<BatchJob> {
        lock_map(&self.jobs).remove(batch_id)
    }

    fn list(&self) -> Vec<BatchJob> {
        newest_first(&lock_map(&self.jobs))
    }

    fn update(&self, batch_id: &str, f: &mut dyn FnMut(&mut BatchJob)) -> bool {
        match lock_map(&self.jobs).get_mut(batch_id) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }
}

// ── JSON file ────────────────────────────────────────────────────────────

/// Registry mirrored to a JSON object keyed by batch id.
///
/// Every mutation serialises a snapshot under the registry lock, then
/// rewrites the file (temp file + rename) after releasing it. Snapshots
/// carry a generation so an older one never replaces a newer file. Write
/// failures are logged; the in-memory registry stays authoritative.
#[derive(Debug)]
pub struct JsonFileBatchStore {
    path: PathBuf,
    jobs: Mutex<HashMap<String, BatchJob>>,
    generation: AtomicU64,
    /// Generation of the snapshot currently on disk.
    written: Mutex<u64>,
}

/// Serialised registry state, numbered in mutation order.
struct Snapshot {
    generation: u64,
    bytes: Vec<u8>,
}

/// Run blocking file I/O without stalling a multi-threaded runtime's worker.
fn off_runtime<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

impl JsonFileBatchStore {
    /// Load `path` if it exists, or start empty.
    ///
    /// Batches that a previous process left `extracting` or `converting`
    /// can never finish, so they are moved to `extract_failed` /
    /// `conversion_failed` with an "interrupted" error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Doc2MdError> {
        let path = path.into();
        let mut jobs: HashMap<String, BatchJob> = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Doc2MdError::Store(format!("cannot parse {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(Doc2MdError::io(&path, e)),
        };

        let mut interrupted = 0;
        for job in jobs.values_mut() {
            let failed = match job.status {
                BatchStatus::Extracting => BatchStatus::ExtractFailed,
                BatchStatus::Converting => BatchStatus::ConversionFailed,
                _ => continue,
            };
            warn!("batch {} was '{}' at shutdown; marking '{}'", job.batch_id, job.status, failed);
            job.status = failed;
            job.error = Some("interrupted: the service stopped before this step finished".into());
            interrupted += 1;
        }

        info!("loaded {} batch(es) from {}", jobs.len(), path.display());
        let store = Self {
            path,
            jobs: Mutex::new(jobs),
            generation: AtomicU64::new(0),
            written: Mutex::new(0),
        };
        if interrupted > 0 {
            let snapshot = store.snapshot(&lock_map(&store.jobs));
            store.persist(snapshot);
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Call with the registry lock held so generations follow mutation order.
    fn snapshot(&self, jobs: &HashMap<String, BatchJob>) -> Option<Snapshot> {
        let ordered: BTreeMap<&String, &BatchJob> = jobs.iter().collect();
        match serde_json::to_vec_pretty(&ordered) {
            Ok(bytes) => Some(Snapshot {
                generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
                bytes,
            }),
            Err(e) => {
                warn!("failed to serialise batch state: {}", e);
                None
            }
        }
    }

    /// Call without the registry lock.
    fn persist(&self, snapshot: Option<Snapshot>) {
        let Some(snapshot) = snapshot else { return };
        off_runtime(|| {
            let mut written = self.written.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if *written >= snapshot.generation {
                return;
            }
            match write_bytes_atomic(&self.path, &snapshot.bytes) {
                Ok(()) => *written = snapshot.generation,
                Err(e) => warn!("failed to save batch state to {}: {}", self.path.display(), e),
            }
        });
    }
}

impl BatchStore for JsonFileBatchStore {
    fn get(&self, batch_id: &str) -> Option<BatchJob> {
        lock_map(&self.jobs).get(batch_id).cloned()
    }

    fn put(&self, job: BatchJob) {
        let snapshot = {
            let mut jobs = lock_map(&self.jobs);
            jobs.insert(job.batch_id.clone(), job);
            self.snapshot(&jobs)
        };
        self.persist(snapshot);
    }

    fn delete(&self, batch_id: &str) -> Option<BatchJob> {
        let (removed, snapshot) = {
            let mut jobs = lock_map(&self.jobs);
            let removed = jobs.remove(batch_id);
            let snapshot = removed.as_ref().and_then(|_| self.snapshot(&jobs));
            (removed, snapshot)
        };
        self.persist(snapshot);
        removed
    }

    fn list(&self) -> Vec<BatchJob> {
        newest_first(&lock_map(&self.jobs))
    }

    fn update(&self, batch_id: &str, f: &mut dyn FnMut(&mut BatchJob)) -> bool {
        let snapshot = {
            let mut jobs = lock_map(&self.jobs);
            let Some(job) = jobs.get_mut(batch_id) else {
                return false;
            };
            f(job);
            self.snapshot(&jobs)
        };
        self.persist(snapshot);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn job(id: &str, status: BatchStatus) -> BatchJob {
        let mut job = BatchJob::new(
            id.to_string(),
            "a.zip".into(),
            PathBuf::from("/up/a.zip"),
            1,
            Some("pw".into()),
        );
        job.status = status;
        job
    }

    #[test]
    fn memory_update_and_list_order() {
        let store = MemoryBatchStore::new();
        let mut old = job("old", BatchStatus::Uploaded);
        old.created_at = Utc::now() - Duration::minutes(5);
        store.put(old);
        store.put(job("new", BatchStatus::Uploaded));

        assert!(store.update("old", &mut |j| j.status = BatchStatus::Extracting));
        assert!(!store.update("missing", &mut |_| {}));
        assert_eq!(store.get("old").unwrap().status, BatchStatus::Extracting);

        let ids: Vec<_> = store.list().into_iter().map(|j| j.batch_id).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert!(store.delete("old").is_some());
        assert!(store.get("old").is_none());
    }

    #[test]
    fn json_store_round_trips_without_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch_status.json");

        let store = JsonFileBatchStore::open(&path).unwrap();
        store.put(job("b1", BatchStatus::Extracted));
        drop(store);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"b1\""));
        assert!(!raw.contains("pw"));

        let reopened = JsonFileBatchStore::open(&path).unwrap();
        let b1 = reopened.get("b1").unwrap();
        assert_eq!(b1.status, BatchStatus::Extracted);
        assert_eq!(b1.password, None);
    }

    #[test]
    fn interrupted_batches_fail_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch_status.json");
        let store = JsonFileBatchStore::open(&path).unwrap();
        store.put(job("x", BatchStatus::Extracting));
        store.put(job("c", BatchStatus::Converting));
        store.put(job("done", BatchStatus::Completed));
        drop(store);

        let reopened = JsonFileBatchStore::open(&path).unwrap();
        assert_eq!(reopened.get("x").unwrap().status, BatchStatus::ExtractFailed);
        assert_eq!(reopened.get("c").unwrap().status, BatchStatus::ConversionFailed);
        assert_eq!(reopened.get("done").unwrap().status, BatchStatus::Completed);
        assert!(reopened.get("c").unwrap().error.unwrap().contains("interrupted"));
    }

    #[test]
    fn corrupt_state_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch_status.json");
        std::fs::write(&path, b"[1,2").unwrap();
        assert!(matches!(
            JsonFileBatchStore::open(&path),
            Err(Doc2MdError::Store(_))
        ));
    }

    #[test]
    fn older_snapshot_never_replaces_newer_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch_status.json");
        let store = JsonFileBatchStore::open(&path).unwrap();

        let (older, newer) = {
            let mut jobs = lock_map(&store.jobs);
            jobs.insert("a".into(), job("a", BatchStatus::Uploaded));
            let older = store.snapshot(&jobs);
            jobs.get_mut("a").unwrap().status = BatchStatus::Extracted;
            (older, store.snapshot(&jobs))
        };
        // Writers finishing out of order.
        store.persist(newer);
        store.persist(older);

        let reopened = JsonFileBatchStore::open(&path).unwrap();
        assert_eq!(reopened.get("a").unwrap().status, BatchStatus::Extracted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_persist_final_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch_status.json");
        let store = std::sync::Arc::new(JsonFileBatchStore::open(&path).unwrap());
        store.put(job("b", BatchStatus::Converting));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    store.update("b", &mut |j| j.conversion_progress.mark_completed());
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let in_memory = store.get("b").unwrap().conversion_progress;
        drop(store);
        let reopened = JsonFileBatchStore::open(&path).unwrap();
        // Reopening turns `converting` into `conversion_failed`; counters stay.
        assert_eq!(reopened.get("b").unwrap().conversion_progress, in_memory);
        assert_eq!(in_memory.completed, 32);
    }
}
