//! # edgequake-doc2md
//!
//! Convert documents to Markdown, one file at a time or a whole ZIP archive
//! at once.
//!
//! ## Pipeline Overview
//!
//! ```text
//! archive.zip
//!  │
//!  ├─ 1. Upload   store the archive, register a batch      (uploaded)
//!  ├─ 2. Extract  unpack members, reserve unique names      (extracted)
//!  ├─ 3. Convert  classify → route → converter, bounded     (converting)
//!  │              per-member status + aggregate counters
//!  ├─ 4. Output   one .md per member in the download dir
//!  └─ 5. History  capped list of recent single-file results (completed)
//! ```
//!
//! Every member is classified by extension into a [`FormatTag`]; the
//! [`Dispatcher`] looks up its [`Route`] and turns converter failures into a
//! Markdown error document wherever the route absorbs them, so one bad file
//! never stops a batch.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2md::{Doc2MdService, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder().data_dir("data").build()?;
//!     let service = Doc2MdService::new(config)?;
//!
//!     let bytes = std::fs::read("docs.zip")?;
//!     let batches = service.batches();
//!     let receipt = batches.upload("docs.zip", &bytes, None).await?;
//!     batches.extract(&receipt.batch_id).await?;
//!     batches.start_conversion(&receipt.batch_id, None).await?.join().await;
//!
//!     let job = batches.status(&receipt.batch_id)?;
//!     println!("{}: {:?}", job.status, job.conversion_progress);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | The `doc2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | The HTTP API in [`server`] (axum + tower-http) |
//!
//! Disable both when using only the library:
//! ```toml
//! edgequake-doc2md = { version = "0.1", default-features = false }
//! ```
//!
//! PDF and image conversion use a vision model through `edgequake-llm` when
//! a provider is configured; PDFs fall back to their text layer otherwise.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod batch;
pub mod config;
pub mod converters;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod history;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod service;

#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use archive::{ArchiveMember, ExtractResult};
pub use batch::{
    BatchJob, BatchMember, BatchOrchestrator, BatchStatus, BatchStore, ConversionHandle,
    ConversionProgress, ExtractSummary, JsonFileBatchStore, MemberStatus, MemoryBatchStore,
    UploadReceipt,
};
pub use config::{ServiceConfig, ServiceConfigBuilder, VisionConfig};
pub use dispatch::{ConversionOutcome, Converter, ConverterRegistry, Dispatcher, Route};
pub use error::{ConvertError, Doc2MdError};
pub use format::{classify, FormatTag};
pub use history::{HistoryRecord, HistoryRecorder};
pub use output::OutputFile;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use service::{convert_document, ConvertedDocument, Doc2MdService, SingleConversion, SingleUpload};
