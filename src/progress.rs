//! Progress-callback trait for per-member batch conversion events.
//!
//! Pass an [`Arc<dyn BatchProgressCallback>`] to
//! [`crate::batch::BatchOrchestrator::with_progress`] to receive events as the
//! background worker walks the selected members of a batch.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doc2md::BatchProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_member_complete(&self, batch_id: &str, filename: &str, index: usize, total: usize) {
//!         let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("[{batch_id}] {filename} ({}/{total}) done, {done} so far", index + 1);
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by the batch worker as it converts each member.
///
/// Members of one batch are converted sequentially, but several batches can
/// run at once, so implementations shared between orchestrator calls must be
/// `Send + Sync` and protect their own state. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first member is dispatched.
    fn on_conversion_start(&self, batch_id: &str, total: usize) {
        let _ = (batch_id, total);
    }

    /// Called when a member moves to `processing`.
    ///
    /// `index` is 0-based within the selection.
    fn on_member_start(&self, batch_id: &str, filename: &str, index: usize, total: usize) {
        let _ = (batch_id, filename, index, total);
    }

    /// Called when a member's Markdown has been written.
    fn on_member_complete(&self, batch_id: &str, filename: &str, index: usize, total: usize) {
        let _ = (batch_id, filename, index, total);
    }

    /// Called when a member ends `failed`.
    fn on_member_error(&self, batch_id: &str, filename: &str, index: usize, error: &str) {
        let _ = (batch_id, filename, index, error);
    }

    /// Called once after the last member, whether or not the batch was cancelled.
    fn on_conversion_complete(&self, batch_id: &str, completed: usize, failed: usize) {
        let _ = (batch_id, completed, failed);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Shared callback handle as stored by the orchestrator.
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
