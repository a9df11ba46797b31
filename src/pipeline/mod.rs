//! Shared stages behind the PDF and image converters.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──▶ postprocess
//! (URL/path)  (pdfium)  (base64)  (VLM)   (cleanup)
//! ```
//!
//! 1. [`input`]: canonicalise a user-supplied path or URL to a local file
//! 2. [`render`]: bind pdfium, rasterise pages or read their text layer;
//!    always inside `spawn_blocking`
//! 3. [`encode`]: PNG-encode and base64-wrap images for the multimodal request
//! 4. [`llm`]: provider resolution and the VLM call with retry/backoff
//! 5. [`postprocess`]: deterministic cleanup of model output

pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod render;
