//! Capped, most-recent-first log of completed conversions.
//!
//! The log lives in memory behind one mutex and is optionally mirrored to a
//! JSON file (a pretty-printed array) after every mutation. Persistence is
//! best effort: a failed write is logged and the in-memory log stays
//! authoritative.

use crate::format::FormatTag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// One completed conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// 32-char hex id.
    pub id: String,
    pub original_name: String,
    pub format: FormatTag,
    /// Size of the generated Markdown in bytes.
    pub file_size: u64,
    #[serde(rename = "md_file_path")]
    pub markdown_path: PathBuf,
    pub download_url: String,
    pub converted_at: DateTime<Utc>,
    pub status: String,
}

/// Thread-safe history log with a fixed capacity.
#[derive(Debug)]
pub struct HistoryRecorder {
    cap: usize,
    path: Option<PathBuf>,
    records: Mutex<VecDeque<HistoryRecord>>,
}

impl HistoryRecorder {
    /// An in-memory log holding at most `cap` records (minimum 1).
    pub fn in_memory(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            path: None,
            records: Mutex::new(VecDeque::new()),
        }
    }

    /// A log mirrored to `path`, seeded from it when the file exists.
    ///
    /// An unreadable or malformed file yields an empty log and a warning.
    pub fn open(path: impl Into<PathBuf>, cap: usize) -> Self {
        let path = path.into();
        let cap = cap.max(1);
        let mut records: VecDeque<HistoryRecord> = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<HistoryRecord>>(&bytes) {
                Ok(list) => list.into(),
                Err(e) => {
                    warn!("ignoring unreadable history file {}: {}", path.display(), e);
                    VecDeque::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => {
                warn!("cannot read history file {}: {}", path.display(), e);
                VecDeque::new()
            }
        };
        records.truncate(cap);
        debug!("history: {} record(s) loaded from {}", records.len(), path.display());
        Self {
            cap,
            path: Some(path),
            records: Mutex::new(records),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Prepend a `completed` record, evicting the oldest beyond the cap.
    pub fn record(
        &self,
        original_name: &str,
        format: FormatTag,
        file_size: u64,
        markdown_path: &Path,
        download_url: &str,
    ) -> HistoryRecord {
        let record = HistoryRecord {
            id: uuid::Uuid::new_v4().simple().to_string(),
            original_name: original_name.to_string(),
            format,
            file_size,
            markdown_path: markdown_path.to_path_buf(),
            download_url: download_url.to_string(),
            converted_at: Utc::now(),
            status: "completed".to_string(),
        };

        let mut records = self.lock();
        records.push_front(record.clone());
        records.truncate(self.cap);
        self.persist(&records);
        record
    }

    /// Snapshot, most recent first.
    pub fn list(&self) -> Vec<HistoryRecord> {
        self.lock().iter().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<HistoryRecord> {
        self.lock().iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        let mut records = self.lock();
        records.clear();
        self.persist(&records);
    }

    /// Remove one record. Returns `false` when `id` is unknown.
    pub fn delete(&self, id: &str) -> bool {
        let mut records = self.lock();
        let Some(pos) = records.iter().position(|r| r.id == id) else {
            return false;
        };
        records.remove(pos);
        self.persist(&records);
        true
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<HistoryRecord>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Called with the lock held so concurrent writers serialise.
    fn persist(&self, records: &VecDeque<HistoryRecord>) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_json_atomic(path, records) {
            warn!("failed to save history to {}: {}", path.display(), e);
        }
    }
}

/// Serialise `value` as pretty JSON next to `path`, then rename over it.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &json)
}

/// Replace `path` with `bytes` via a sibling `.json.tmp` and a rename.
pub(crate) fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
