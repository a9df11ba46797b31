//! Built-in [`Converter`](crate::dispatch::Converter) implementations.
//!
//! One best-effort converter per format tag. None of them aims for layout
//! fidelity: the goal is readable Markdown that keeps the document's text
//! and obvious structure (headings, tables, slides, sheets).

mod image;
mod media;
mod office;
mod pdf;
mod text;

pub use self::image::ImageConverter;
pub use media::{AudioConverter, VideoConverter};
pub use office::{ExcelConverter, PptConverter, WordConverter};
pub use pdf::{PdfTextConverter, VisionPdfConverter};
pub use text::{markdown_table, CsvConverter, FencedTextConverter};

use crate::error::ConvertError;
use std::path::Path;

/// Read a whole source file, mapping failures to [`ConvertError::Unreadable`].
pub(crate) async fn read_source(path: &Path) -> Result<Vec<u8>, ConvertError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| ConvertError::unreadable(path, e))
}

/// File name for headings and error documents.
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Human-readable byte count (`812 B`, `4.2 KB`, `1.3 MB`).
pub(crate) fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
