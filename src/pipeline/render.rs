//! pdfium access: library binding, page rasterisation and text-layer reads.
//!
//! pdfium keeps thread-local state and blocks for the whole render, so every
//! entry point here is a blocking function wrapped by an async one that moves
//! it onto `tokio::task::spawn_blocking`.

use crate::error::ConvertError;
use crate::format::FormatTag;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bind to pdfium.
///
/// Lookup order: `lib_path` (a directory or the library file itself), the
/// `PDFIUM_LIB_PATH` environment variable, the working directory, and
/// finally the system library search path.
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, ConvertError> {
    let explicit = lib_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

    let bindings = match explicit {
        Some(path) => {
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            debug!("Binding pdfium from {}", lib.display());
            Pdfium::bind_to_library(lib)
        }
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| ConvertError::EngineUnavailable {
        engine: "pdfium".to_string(),
        detail: format!("{e:?}. Set PDFIUM_LIB_PATH to the directory holding libpdfium."),
    })?;

    Ok(Pdfium::new(bindings))
}

fn open_document<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, ConvertError> {
    pdfium.load_pdf_from_file(path, None).map_err(|e| {
        let detail = format!("{e:?}");
        if detail.to_ascii_lowercase().contains("password") {
            ConvertError::invalid(FormatTag::Pdf, "document is password protected")
        } else {
            ConvertError::invalid(FormatTag::Pdf, detail)
        }
    })
}

fn page_limit(total: usize, max_pages: Option<usize>) -> usize {
    max_pages.map_or(total, |n| n.min(total))
}

/// Rasterise up to `max_pages` pages, longest edge capped at `max_pixels`.
///
/// Returns `(page_index_0based, image)` pairs in page order.
pub async fn render_pages(
    pdf_path: &Path,
    lib_path: Option<PathBuf>,
    max_pixels: u32,
    max_pages: Option<usize>,
) -> Result<Vec<(usize, DynamicImage)>, ConvertError> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        render_pages_blocking(&path, lib_path.as_deref(), max_pixels, max_pages)
    })
    .await
    .map_err(|e| ConvertError::Crashed(format!("render task: {e}")))?
}

fn render_pages_blocking(
    pdf_path: &Path,
    lib_path: Option<&Path>,
    max_pixels: u32,
    max_pages: Option<usize>,
) -> Result<Vec<(usize, DynamicImage)>, ConvertError> {
    let pdfium = bind_pdfium(lib_path)?;
    let document = open_document(&pdfium, pdf_path)?;
    let pages = document.pages();
    let total = pages.len() as usize;
    let count = page_limit(total, max_pages);
    info!("PDF loaded: {} pages, rendering {}", total, count);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut rendered = Vec::with_capacity(count);
    for idx in 0..count {
        let page = pages.get(idx as u16).map_err(|e| ConvertError::PageFailed {
            page: idx + 1,
            detail: format!("{e:?}"),
        })?;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| ConvertError::PageFailed {
                page: idx + 1,
                detail: format!("{e:?}"),
            })?;
        let image = bitmap.as_image();
        debug!("Rendered page {} → {}x{} px", idx + 1, image.width(), image.height());
        rendered.push((idx, image));
    }
    Ok(rendered)
}

/// Read the embedded text layer of up to `max_pages` pages.
///
/// Returns `(page_index_0based, text)` pairs; pages without text yield an
/// empty string rather than an error.
pub async fn extract_text(
    pdf_path: &Path,
    lib_path: Option<PathBuf>,
    max_pages: Option<usize>,
) -> Result<Vec<(usize, String)>, ConvertError> {
    let path = pdf_path.to_path_buf();
    tokio::task::spawn_blocking(move || extract_text_blocking(&path, lib_path.as_deref(), max_pages))
        .await
        .map_err(|e| ConvertError::Crashed(format!("text task: {e}")))?
}

fn extract_text_blocking(
    pdf_path: &Path,
    lib_path: Option<&Path>,
    max_pages: Option<usize>,
) -> Result<Vec<(usize, String)>, ConvertError> {
    let pdfium = bind_pdfium(lib_path)?;
    let document = open_document(&pdfium, pdf_path)?;
    let pages = document.pages();
    let count = page_limit(pages.len() as usize, max_pages);

    let mut texts = Vec::with_capacity(count);
    for idx in 0..count {
        let page = pages.get(idx as u16).map_err(|e| ConvertError::PageFailed {
            page: idx + 1,
            detail: format!("{e:?}"),
        })?;
        let text = page.text().map(|t| t.all()).unwrap_or_default();
        texts.push((idx, text));
    }
    debug!("Read text layer of {} pages", texts.len());
    Ok(texts)
}
