//! Batch records and the values returned by orchestrator operations.

use crate::archive::ArchiveMember;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio::task::JoinHandle;

/// Lifecycle state of a [`BatchJob`].
///
/// ```text
/// uploaded -> extracting -> extracted -> converting -> completed
///                  |                         |      \
///                  v                         v       -> cancelled
///           extract_failed           conversion_failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Uploaded,
    Extracting,
    Extracted,
    ExtractFailed,
    Converting,
    Completed,
    ConversionFailed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Uploaded => "uploaded",
            BatchStatus::Extracting => "extracting",
            BatchStatus::Extracted => "extracted",
            BatchStatus::ExtractFailed => "extract_failed",
            BatchStatus::Converting => "converting",
            BatchStatus::Completed => "completed",
            BatchStatus::ConversionFailed => "conversion_failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    /// No further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::ExtractFailed
                | BatchStatus::Completed
                | BatchStatus::ConversionFailed
                | BatchStatus::Cancelled
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-member conversion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    /// Selected, not started yet.
    Pending,
    Processing,
    Completed,
    Failed,
}

impl MemberStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MemberStatus::Completed | MemberStatus::Failed)
    }
}

/// Aggregate counters for the current conversion run.
///
/// `processing` counts every selected member that has not reached a terminal
/// state, queued ones included, so `completed + failed + processing == total`
/// holds at every read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub processing: usize,
}

impl ConversionProgress {
    pub fn start(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            failed: 0,
            processing: total,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.completed + self.failed + self.processing == self.total
    }

    pub(crate) fn mark_completed(&mut self) {
        self.processing = self.processing.saturating_sub(1);
        self.completed += 1;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.processing = self.processing.saturating_sub(1);
        self.failed += 1;
    }
}

/// An archive member plus its conversion fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMember {
    #[serde(flatten)]
    pub member: ArchiveMember,
    /// `None` until the member is selected for conversion.
    #[serde(default)]
    pub conversion_status: Option<MemberStatus>,
    /// 0 or 100.
    #[serde(default)]
    pub conversion_progress: u8,
    #[serde(default, rename = "md_file_path")]
    pub markdown_path: Option<PathBuf>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub converted_at: Option<DateTime<Utc>>,
    /// Fatal reason for `failed`, or the absorbed error for a degraded document.
    #[serde(default)]
    pub conversion_error: Option<String>,
}

impl From<ArchiveMember> for BatchMember {
    fn from(member: ArchiveMember) -> Self {
        Self {
            member,
            conversion_status: None,
            conversion_progress: 0,
            markdown_path: None,
            download_url: None,
            converted_at: None,
            conversion_error: None,
        }
    }
}

impl BatchMember {
    pub fn filename(&self) -> &str {
        &self.member.filename
    }
}

/// One uploaded archive and everything that happened to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub batch_id: String,
    pub archive_name: String,
    pub archive_path: PathBuf,
    /// Size of the uploaded archive.
    pub file_size: u64,
    /// Kept in memory only; never written to snapshots or the state file.
    #[serde(skip)]
    pub password: Option<String>,
    pub status: BatchStatus,
    pub total_files: usize,
    pub extracted_count: usize,
    pub failed_count: usize,
    /// Members in archive order.
    #[serde(rename = "files")]
    pub members: Vec<BatchMember>,
    #[serde(rename = "temp_dir")]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub conversion_progress: ConversionProgress,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub converted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub(crate) fn new(
        batch_id: String,
        archive_name: String,
        archive_path: PathBuf,
        file_size: u64,
        password: Option<String>,
    ) -> Self {
        Self {
            batch_id,
            archive_name,
            archive_path,
            file_size,
            password,
            status: BatchStatus::Uploaded,
            total_files: 0,
            extracted_count: 0,
            failed_count: 0,
            members: Vec::new(),
            work_dir: None,
            conversion_progress: ConversionProgress::default(),
            error: None,
            created_at: Utc::now(),
            extracted_at: None,
            converted_at: None,
            finished_at: None,
        }
    }

    pub fn member(&self, filename: &str) -> Option<&BatchMember> {
        self.members.iter().find(|m| m.filename() == filename)
    }

    pub(crate) fn member_mut(&mut self, filename: &str) -> Option<&mut BatchMember> {
        self.members.iter_mut().find(|m| m.filename() == filename)
    }
}

/// Returned by [`super::BatchOrchestrator::upload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub batch_id: String,
    pub archive_name: String,
    pub file_size: u64,
}

/// Returned by [`super::BatchOrchestrator::extract`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractSummary {
    pub batch_id: String,
    pub total_files: usize,
    pub extracted_files: usize,
    pub failed_files: usize,
    pub files: Vec<ArchiveMember>,
}

/// A conversion run that has been handed to the background pool.
///
/// Dropping the handle does not stop the run; use
/// [`super::BatchOrchestrator::cancel`] for that.
#[derive(Debug)]
pub struct ConversionHandle {
    pub batch_id: String,
    pub total_files: usize,
    pub(crate) task: JoinHandle<()>,
}

impl ConversionHandle {
    /// Wait until the run has reached a terminal batch state.
    pub async fn join(self) {
        // The supervisor task records worker crashes itself; its own
        // JoinError can only come from runtime shutdown.
        let _ = self.task.await;
    }
}
