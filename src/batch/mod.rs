//! Batch conversion of archive contents.
//!
//! A batch is one uploaded ZIP archive. [`BatchOrchestrator`] moves it
//! through `uploaded → extracting → extracted → converting → completed`,
//! converting the selected members on a background task while callers poll
//! [`BatchOrchestrator::status`] for per-member and aggregate progress.
//! Batch records live in a [`BatchStore`]: in memory, or mirrored to
//! `batch_status.json`.

mod model;
mod orchestrator;
mod store;

pub use model::{
    BatchJob, BatchMember, BatchStatus, ConversionHandle, ConversionProgress, ExtractSummary,
    MemberStatus, UploadReceipt,
};
pub use orchestrator::{BatchOrchestrator, CANCELLED};
pub use store::{BatchStore, JsonFileBatchStore, MemoryBatchStore};
