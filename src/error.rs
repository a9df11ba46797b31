//! Error types for the edgequake-doc2md library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Doc2MdError`]: **Fatal** for the operation that returned it (unknown
//!   batch, wrong lifecycle state, unreadable archive, disk failure). Returned
//!   as `Err(Doc2MdError)` from orchestrator, history and service calls.
//!
//! * [`ConvertError`]: **Non-fatal** for the batch: a single converter
//!   failed on a single file. Either absorbed into an error document by the
//!   dispatcher or stored on the batch member that produced it, so one bad
//!   file never takes the rest of the batch down with it.

use crate::batch::BatchStatus;
use crate::format::FormatTag;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-doc2md library.
///
/// Per-file converter failures use [`ConvertError`] and are recorded on the
/// batch member rather than propagated here.
#[derive(Debug, Error)]
pub enum Doc2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// Uploaded file is not a ZIP archive.
    #[error("Unsupported archive '{name}': only .zip archives are accepted")]
    UnsupportedArchive { name: String },

    /// Upload exceeded the configured size cap.
    #[error("Upload '{name}' is {size} bytes; the limit is {limit} bytes")]
    UploadTooLarge { name: String, size: u64, limit: u64 },

    /// Filename extension does not belong to the declared format.
    #[error("File '{name}' does not match format '{format}' (expected one of: {expected})")]
    FormatMismatch {
        name: String,
        format: FormatTag,
        expected: String,
    },

    /// Format name in a request is not one of the known tags.
    #[error("Unknown format '{0}'")]
    UnknownFormat(String),

    /// A previously uploaded single file could not be found.
    #[error("Upload '{file_id}' not found")]
    UploadNotFound { file_id: String },

    // ── Batch errors ──────────────────────────────────────────────────────
    /// No batch with this id exists in the registry.
    #[error("Batch '{batch_id}' not found")]
    BatchNotFound { batch_id: String },

    /// The batch is not in a state that allows the requested operation.
    #[error("Batch '{batch_id}' is '{status}'; this operation requires '{expected}'")]
    InvalidState {
        batch_id: String,
        status: BatchStatus,
        expected: BatchStatus,
    },

    /// A conversion selection named files that are not members of the batch.
    #[error("Batch '{batch_id}' has no member(s) named: {}", names.join(", "))]
    UnknownMembers {
        batch_id: String,
        names: Vec<String>,
    },

    // ── Archive errors ────────────────────────────────────────────────────
    /// The ZIP container itself is corrupt or unreadable.
    #[error("Archive '{path}' is corrupt: {detail}")]
    CorruptArchive { path: PathBuf, detail: String },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// A single-file conversion failed and the failure escaped dispatch.
    #[error("Conversion of '{name}' failed: {reason}")]
    ConversionFailed { name: String, reason: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other filesystem failure.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted registry or history could not be read or written.
    #[error("State store error: {0}")]
    Store(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Doc2MdError {
    /// Shorthand for wrapping an `io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Doc2MdError::Io {
            path: path.into(),
            source,
        }
    }

    /// `true` for errors caused by the caller's request rather than the system.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Doc2MdError::FileNotFound { .. }
                | Doc2MdError::InvalidInput { .. }
                | Doc2MdError::UnsupportedArchive { .. }
                | Doc2MdError::UploadTooLarge { .. }
                | Doc2MdError::FormatMismatch { .. }
                | Doc2MdError::UnknownFormat(_)
                | Doc2MdError::InvalidState { .. }
                | Doc2MdError::UnknownMembers { .. }
                | Doc2MdError::CorruptArchive { .. }
                | Doc2MdError::InvalidConfig(_)
        )
    }

    /// `true` when the referenced batch, upload or record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Doc2MdError::BatchNotFound { .. } | Doc2MdError::UploadNotFound { .. }
        )
    }
}

/// A non-fatal error for a single file.
///
/// Produced by a [`crate::dispatch::Converter`]. The dispatcher either turns
/// it into an error document or reports it as the reason a member failed.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ConvertError {
    /// Source file could not be opened or read.
    #[error("cannot read '{path}': {detail}")]
    Unreadable { path: PathBuf, detail: String },

    /// The file was read but its content is not what the format promises.
    #[error("invalid {format} content: {detail}")]
    InvalidContent { format: FormatTag, detail: String },

    /// A required engine (pdfium, vision LLM) is not available.
    #[error("{engine} unavailable: {detail}")]
    EngineUnavailable { engine: String, detail: String },

    /// Rasterisation or text extraction failed for one page.
    #[error("page {page}: {detail}")]
    PageFailed { page: usize, detail: String },

    /// Vision LLM call failed after retries.
    #[error("LLM call failed after {retries} retries: {detail}")]
    LlmFailed { retries: u32, detail: String },

    /// Every page of a multi-page document failed.
    #[error("all {total} pages failed; first error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// The converter did not finish in time.
    #[error("conversion timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The converter panicked or its task was aborted.
    #[error("converter crashed: {0}")]
    Crashed(String),
}

impl ConvertError {
    /// Build an [`ConvertError::Unreadable`] from an I/O error.
    pub fn unreadable(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        ConvertError::Unreadable {
            path: path.into(),
            detail: err.to_string(),
        }
    }

    /// Build an [`ConvertError::InvalidContent`] for `format`.
    pub fn invalid(format: FormatTag, detail: impl Into<String>) -> Self {
        ConvertError::InvalidContent {
            format,
            detail: detail.into(),
        }
    }
}
