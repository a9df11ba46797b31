//! Batch lifecycle: upload → extract → convert (background) → report.

use super::model::{
    BatchJob, BatchMember, BatchStatus, ConversionHandle, ConversionProgress, ExtractSummary,
    MemberStatus, UploadReceipt,
};
use super::store::BatchStore;
use crate::archive;
use crate::config::ServiceConfig;
use crate::dispatch::{panic_message, ConversionOutcome, Dispatcher};
use crate::error::Doc2MdError;
use crate::history::HistoryRecorder;
use crate::output;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use chrono::Utc;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// `conversion_error` of members skipped by [`BatchOrchestrator::cancel`].
pub const CANCELLED: &str = "cancelled";

/// Owns every [`BatchJob`] and drives it through its lifecycle.
///
/// Cheap to clone; clones share the registry, the worker pool and the
/// history log. Conversion runs on a background task per batch, at most
/// `max_concurrent_batches` at a time; members inside one batch are
/// converted one after another.
#[derive(Clone)]
pub struct BatchOrchestrator {
    config: Arc<ServiceConfig>,
    dispatcher: Dispatcher,
    history: Arc<HistoryRecorder>,
    store: Arc<dyn BatchStore>,
    pool: Arc<Semaphore>,
    cancel_flags: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
    progress: ProgressCallback,
}

impl BatchOrchestrator {
    pub fn new(
        config: Arc<ServiceConfig>,
        dispatcher: Dispatcher,
        history: Arc<HistoryRecorder>,
        store: Arc<dyn BatchStore>,
    ) -> Self {
        let permits = config.max_concurrent_batches.max(1);
        Self {
            config,
            dispatcher,
            history,
            store,
            pool: Arc::new(Semaphore::new(permits)),
            cancel_flags: Arc::new(Mutex::new(HashMap::new())),
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Receive per-member events from the background worker.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = callback;
        self
    }

    pub fn history(&self) -> &Arc<HistoryRecorder> {
        &self.history
    }

    // ── Operations ───────────────────────────────────────────────────────

    /// Store an uploaded archive as `batch_{id}_{name}` and register the batch.
    ///
    /// # Errors
    /// Empty name, a non-`.zip` extension or an upload over
    /// `max_upload_bytes`. Nothing is written in those cases.
    pub async fn upload(
        &self,
        archive_name: &str,
        bytes: &[u8],
        password: Option<String>,
    ) -> Result<UploadReceipt, Doc2MdError> {
        let name = archive_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim();
        if name.is_empty() {
            return Err(Doc2MdError::InvalidInput {
                input: archive_name.to_string(),
            });
        }
        if !name.to_ascii_lowercase().ends_with(".zip") {
            return Err(Doc2MdError::UnsupportedArchive {
                name: name.to_string(),
            });
        }
        let size = bytes.len() as u64;
        if size > self.config.max_upload_bytes {
            return Err(Doc2MdError::UploadTooLarge {
                name: name.to_string(),
                size,
                limit: self.config.max_upload_bytes,
            });
        }

        let upload_dir = &self.config.upload_dir;
        tokio::fs::create_dir_all(upload_dir)
            .await
            .map_err(|e| Doc2MdError::io(upload_dir, e))?;
        let batch_id = uuid::Uuid::new_v4().simple().to_string();
        let archive_path = upload_dir.join(format!("batch_{batch_id}_{name}"));
        tokio::fs::write(&archive_path, bytes)
            .await
            .map_err(|e| Doc2MdError::io(&archive_path, e))?;

        let password = password.filter(|p| !p.is_empty());
        self.store.put(BatchJob::new(
            batch_id.clone(),
            name.to_string(),
            archive_path,
            size,
            password,
        ));
        info!("batch {}: uploaded '{}' ({} bytes)", batch_id, name, size);

        Ok(UploadReceipt {
            batch_id,
            archive_name: name.to_string(),
            file_size: size,
        })
    }

    /// Unpack the batch archive. Only valid from `uploaded`.
    ///
    /// Per-entry failures are recorded on the members and leave the batch
    /// `extracted`. An archive that cannot be opened moves the batch to
    /// `extract_failed` and is returned as the error.
    pub async fn extract(&self, batch_id: &str) -> Result<ExtractSummary, Doc2MdError> {
        let (archive_path, password) = self.modify(batch_id, |job| {
            require(job, BatchStatus::Uploaded)?;
            job.status = BatchStatus::Extracting;
            Ok((job.archive_path.clone(), job.password.clone()))
        })?;
        info!("batch {}: extracting {}", batch_id, archive_path.display());

        let work_root = self.config.work_root.clone();
        let result = tokio::task::spawn_blocking(move || {
            archive::extract(&archive_path, password.as_deref(), &work_root)
        })
        .await
        .map_err(|e| Doc2MdError::Internal(format!("extraction task: {e}")))
        .and_then(|r| r);

        match result {
            Ok(extracted) => {
                self.modify(batch_id, |job| {
                    job.status = BatchStatus::Extracted;
                    job.total_files = extracted.total_files;
                    job.extracted_count = extracted.extracted_files;
                    job.failed_count = extracted.failed_files;
                    job.members = extracted
                        .members
                        .iter()
                        .cloned()
                        .map(BatchMember::from)
                        .collect();
                    job.work_dir = Some(extracted.work_dir.clone());
                    job.extracted_at = Some(Utc::now());
                    job.error = None;
                    Ok(())
                })?;
                info!(
                    "batch {}: {} file(s), {} extracted, {} failed",
                    batch_id, extracted.total_files, extracted.extracted_files, extracted.failed_files
                );
                Ok(ExtractSummary {
                    batch_id: batch_id.to_string(),
                    total_files: extracted.total_files,
                    extracted_files: extracted.extracted_files,
                    failed_files: extracted.failed_files,
                    files: extracted.members,
                })
            }
            Err(e) => {
                error!("batch {}: extraction failed: {}", batch_id, e);
                let reason = e.to_string();
                let _ = self.modify(batch_id, |job| {
                    job.status = BatchStatus::ExtractFailed;
                    job.error = Some(reason);
                    Ok(())
                });
                Err(e)
            }
        }
    }

    /// Start converting `selection` (default: every extracted member) in the
    /// background and return at once. Only valid from `extracted`.
    ///
    /// # Errors
    /// [`Doc2MdError::UnknownMembers`] when a selected name is not a member;
    /// the batch is left untouched.
    pub async fn start_conversion(
        &self,
        batch_id: &str,
        selection: Option<Vec<String>>,
    ) -> Result<ConversionHandle, Doc2MdError> {
        // Registered before the `converting` transition is visible, so a
        // `cancel` that sees `converting` always finds the flag.
        let cancel = Arc::new(AtomicBool::new(false));
        let registered = match self.flags().entry(batch_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&cancel));
                true
            }
            Entry::Occupied(_) => false,
        };

        let selected = self.modify(batch_id, |job| {
            require(job, BatchStatus::Extracted)?;
            let names = select_members(job, selection.as_deref())?;

            job.status = BatchStatus::Converting;
            job.converted_at = Some(Utc::now());
            job.finished_at = None;
            job.error = None;
            job.conversion_progress = ConversionProgress::start(names.len());
            for name in &names {
                if let Some(member) = job.member_mut(name) {
                    member.conversion_status = Some(MemberStatus::Pending);
                    member.conversion_progress = 0;
                    member.conversion_error = None;
                }
            }
            Ok(names)
        });
        let selected = match selected {
            Ok(names) => names,
            Err(e) => {
                if registered {
                    self.flags().remove(batch_id);
                }
                return Err(e);
            }
        };
        if !registered {
            self.flags().insert(batch_id.to_string(), Arc::clone(&cancel));
        }

        let total_files = selected.len();
        info!("batch {}: conversion queued ({} file(s))", batch_id, total_files);
        let task = tokio::spawn(self.clone().supervise(batch_id.to_string(), selected, cancel));
        Ok(ConversionHandle {
            batch_id: batch_id.to_string(),
            total_files,
            task,
        })
    }

    /// Stop a running conversion after the member in flight.
    ///
    /// Members not yet started end `failed` with [`CANCELLED`] and the batch
    /// ends `cancelled`.
    pub fn cancel(&self, batch_id: &str) -> Result<(), Doc2MdError> {
        let job = self.status(batch_id)?;
        if job.status != BatchStatus::Converting {
            return Err(Doc2MdError::InvalidState {
                batch_id: batch_id.to_string(),
                status: job.status,
                expected: BatchStatus::Converting,
            });
        }
        if let Some(flag) = self.flags().get(batch_id) {
            flag.store(true, Ordering::SeqCst);
        }
        info!("batch {}: cancellation requested", batch_id);
        Ok(())
    }

    /// Delete the scratch directory and the uploaded archive.
    ///
    /// The batch record stays. Refused while extraction or conversion is
    /// running.
    pub async fn cleanup(&self, batch_id: &str) -> Result<(), Doc2MdError> {
        let (work_dir, archive_path) = self.modify(batch_id, |job| {
            if matches!(job.status, BatchStatus::Extracting | BatchStatus::Converting) {
                return Err(Doc2MdError::InvalidState {
                    batch_id: job.batch_id.clone(),
                    status: job.status,
                    expected: BatchStatus::Completed,
                });
            }
            Ok((job.work_dir.take(), job.archive_path.clone()))
        })?;

        if let Some(dir) = work_dir {
            tokio::task::spawn_blocking(move || archive::remove_work_dir(&dir))
                .await
                .map_err(|e| Doc2MdError::Internal(format!("cleanup task: {e}")))??;
        }
        match tokio::fs::remove_file(&archive_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Doc2MdError::io(&archive_path, e)),
        }
        info!("batch {}: scratch files removed", batch_id);
        Ok(())
    }

    /// Point-in-time snapshot.
    pub fn status(&self, batch_id: &str) -> Result<BatchJob, Doc2MdError> {
        self.store.get(batch_id).ok_or_else(|| Doc2MdError::BatchNotFound {
            batch_id: batch_id.to_string(),
        })
    }

    /// Every batch, newest first.
    pub fn list(&self) -> Vec<BatchJob> {
        self.store.list()
    }

    // ── Background worker ────────────────────────────────────────────────

    /// Runs the worker in its own task so a panic lands here instead of
    /// leaving the batch `converting` forever.
    async fn supervise(self, batch_id: String, selected: Vec<String>, cancel: Arc<AtomicBool>) {
        // The semaphore is never closed.
        let _permit = Arc::clone(&self.pool).acquire_owned().await.ok();

        let worker = tokio::spawn(self.clone().run_worker(batch_id.clone(), selected, cancel));
        if let Err(e) = worker.await {
            let reason = if e.is_panic() {
                format!("worker crashed: {}", panic_message(e.into_panic()))
            } else {
                format!("worker aborted: {e}")
            };
            error!("batch {}: {}", batch_id, reason);
            let _ = self.modify(&batch_id, |job| {
                job.status = BatchStatus::ConversionFailed;
                job.error = Some(reason);
                job.finished_at = Some(Utc::now());
                Ok(())
            });
        }
        self.flags().remove(&batch_id);
    }

    async fn run_worker(self, batch_id: String, selected: Vec<String>, cancel: Arc<AtomicBool>) {
        let total = selected.len();
        self.progress.on_conversion_start(&batch_id, total);

        let mut cancelled = false;
        for (index, filename) in selected.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            self.convert_member(&batch_id, filename, index, total).await;
        }

        let finished = self.modify(&batch_id, |job| {
            if cancelled {
                let mut skipped = 0;
                for name in &selected {
                    if let Some(member) = job.member_mut(name) {
                        if member.conversion_status == Some(MemberStatus::Pending) {
                            member.conversion_status = Some(MemberStatus::Failed);
                            member.conversion_error = Some(CANCELLED.to_string());
                            skipped += 1;
                        }
                    }
                }
                for _ in 0..skipped {
                    job.conversion_progress.mark_failed();
                }
                job.status = BatchStatus::Cancelled;
            } else {
                job.status = BatchStatus::Completed;
            }
            job.finished_at = Some(Utc::now());
            Ok(job.conversion_progress)
        });

        match finished {
            Ok(p) => {
                info!(
                    "batch {}: {} ({} completed, {} failed of {})",
                    batch_id,
                    if cancelled { "cancelled" } else { "done" },
                    p.completed,
                    p.failed,
                    p.total
                );
                self.progress
                    .on_conversion_complete(&batch_id, p.completed, p.failed);
            }
            Err(e) => warn!("batch {}: could not record completion: {}", batch_id, e),
        }
    }

    async fn convert_member(&self, batch_id: &str, filename: &str, index: usize, total: usize) {
        let started = self.modify(batch_id, |job| {
            let member = job.member_mut(filename).ok_or_else(|| Doc2MdError::UnknownMembers {
                batch_id: batch_id.to_string(),
                names: vec![filename.to_string()],
            })?;
            member.conversion_status = Some(MemberStatus::Processing);
            Ok((member.member.extracted_path.clone(), member.member.format))
        });
        let (path, format) = match started {
            Ok((Some(path), format)) => (path, format),
            Ok((None, ..)) => {
                self.fail_member(batch_id, filename, index, "file was not extracted".to_string());
                return;
            }
            Err(e) => {
                warn!("batch {}: skipping {}: {}", batch_id, filename, e);
                return;
            }
        };
        self.progress.on_member_start(batch_id, filename, index, total);
        debug!("batch {}: [{}/{}] {} as {}", batch_id, index + 1, total, filename, format);

        let (markdown, note) = match self.dispatcher.dispatch(&path, format).await {
            ConversionOutcome::Ok { markdown } => (markdown, None),
            ConversionOutcome::Degraded { markdown, note } => (markdown, Some(note)),
            ConversionOutcome::Fatal { reason } => {
                self.fail_member(batch_id, filename, index, reason);
                return;
            }
        };

        let written = match output::write(
            &self.config.download_dir,
            filename,
            &markdown,
            &self.config.download_prefix,
        )
        .await
        {
            Ok(out) => out,
            Err(e) => {
                self.fail_member(batch_id, filename, index, e.to_string());
                return;
            }
        };

        let recorded = self.modify(batch_id, |job| {
            if let Some(member) = job.member_mut(filename) {
                member.conversion_status = Some(MemberStatus::Completed);
                member.conversion_progress = 100;
                member.markdown_path = Some(written.path.clone());
                member.download_url = Some(written.download_url.clone());
                member.converted_at = Some(Utc::now());
                member.conversion_error = note.clone();
            }
            job.conversion_progress.mark_completed();
            Ok(())
        });
        if recorded.is_ok() {
            self.history
                .record(filename, format, written.size_bytes, &written.path, &written.download_url);
            self.progress
                .on_member_complete(batch_id, filename, index, total);
        }
    }

    fn fail_member(&self, batch_id: &str, filename: &str, index: usize, reason: String) {
        warn!("batch {}: {} failed: {}", batch_id, filename, reason);
        let _ = self.modify(batch_id, |job| {
            if let Some(member) = job.member_mut(filename) {
                member.conversion_status = Some(MemberStatus::Failed);
                member.conversion_progress = 0;
                member.conversion_error = Some(reason.clone());
            }
            job.conversion_progress.mark_failed();
            Ok(())
        });
        self.progress.on_member_error(batch_id, filename, index, &reason);
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    /// Run `f` against the stored batch under the registry lock.
    fn modify<T>(
        &self,
        batch_id: &str,
        f: impl FnOnce(&mut BatchJob) -> Result<T, Doc2MdError>,
    ) -> Result<T, Doc2MdError> {
        let mut f = Some(f);
        let mut result = None;
        self.store.update(batch_id, &mut |job| {
            if let Some(f) = f.take() {
                result = Some(f(job));
            }
        });
        result.unwrap_or_else(|| {
            Err(Doc2MdError::BatchNotFound {
                batch_id: batch_id.to_string(),
            })
        })
    }

    fn flags(&self) -> MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        self.cancel_flags
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn require(job: &BatchJob, expected: BatchStatus) -> Result<(), Doc2MdError> {
    if job.status == expected {
        Ok(())
    } else {
        Err(Doc2MdError::InvalidState {
            batch_id: job.batch_id.clone(),
            status: job.status,
            expected,
        })
    }
}

/// Resolve a selection against the batch members.
///
/// `None` or an empty list selects every extracted member. Names are
/// de-duplicated; members that failed extraction are dropped.
fn select_members(
    job: &BatchJob,
    selection: Option<&[String]>,
) -> Result<Vec<String>, Doc2MdError> {
    let requested = match selection {
        Some(names) if !names.is_empty() => names,
        _ => {
            return Ok(job
                .members
                .iter()
                .filter(|m| m.member.is_extracted())
                .map(|m| m.filename().to_string())
                .collect())
        }
    };

    let unknown: Vec<String> = requested
        .iter()
        .filter(|name| job.member(name).is_none())
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(Doc2MdError::UnknownMembers {
            batch_id: job.batch_id.clone(),
            names: unknown,
        });
    }

    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for name in requested {
        if !seen.insert(name.as_str()) {
            continue;
        }
        match job.member(name) {
            Some(m) if m.member.is_extracted() => selected.push(name.clone()),
            _ => debug!("batch {}: {} failed extraction, not converted", job.batch_id, name),
        }
    }
    Ok(selected)
}
