//! PDF converters: vision OCR over rendered pages, and the text layer.

use super::display_name;
use crate::config::VisionConfig;
use crate::dispatch::Converter;
use crate::error::ConvertError;
use crate::format::FormatTag;
use crate::pipeline::{encode, llm, postprocess, render};
use crate::prompts::pdf_prompt;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

async fn check_magic(path: &Path) -> Result<(), ConvertError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ConvertError::unreadable(path, e))?;
    let mut magic = [0u8; 5];
    match file.read_exact(&mut magic).await {
        Ok(_) if &magic == b"%PDF-" => Ok(()),
        Ok(_) => Err(ConvertError::invalid(
            FormatTag::Pdf,
            format!("missing %PDF header (first bytes {magic:?})"),
        )),
        Err(_) => Err(ConvertError::invalid(FormatTag::Pdf, "file is too short")),
    }
}

/// Rasterises each page with pdfium and transcribes it with a vision LLM.
///
/// Pages are sent to the model concurrently (`page_concurrency`). A page
/// that fails after all retries is replaced by a short note; the document
/// only fails when every page does.
pub struct VisionPdfConverter {
    config: VisionConfig,
}

impl VisionPdfConverter {
    pub fn new(config: VisionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Converter for VisionPdfConverter {
    fn name(&self) -> &str {
        "vision-ocr"
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        check_magic(path).await?;
        let provider = llm::resolve_provider(&self.config)?;
        let name = display_name(path);

        let rendered = render::render_pages(
            path,
            self.config.pdfium_lib_path.clone(),
            self.config.max_rendered_pixels,
            self.config.max_pages,
        )
        .await?;
        if rendered.is_empty() {
            return Err(ConvertError::invalid(FormatTag::Pdf, "document has no pages"));
        }
        let total = rendered.len();

        let prompt = pdf_prompt(self.config.system_prompt.as_deref()).to_string();
        let mut pages: Vec<(usize, Result<String, ConvertError>)> =
            stream::iter(rendered.into_iter().map(|(idx, img)| {
                let provider = provider.clone();
                let config = self.config.clone();
                let prompt = prompt.clone();
                async move {
                    let page_num = idx + 1;
                    let image = match encode::encode_page(&img) {
                        Ok(data) => data,
                        Err(e) => {
                            return (
                                page_num,
                                Err(ConvertError::PageFailed {
                                    page: page_num,
                                    detail: format!("image encoding failed: {e}"),
                                }),
                            )
                        }
                    };
                    let label = format!("page {page_num}");
                    let result = llm::transcribe(&provider, &label, image, &prompt, &config)
                        .await
                        .map(|t| postprocess::clean_markdown(&t.markdown));
                    (page_num, result)
                }
            }))
            .buffer_unordered(self.config.page_concurrency.max(1))
            .collect()
            .await;
        pages.sort_by_key(|(page_num, _)| *page_num);

        let failed = pages.iter().filter(|(_, r)| r.is_err()).count();
        if failed == total {
            let first_error = pages
                .iter()
                .find_map(|(_, r)| r.as_ref().err())
                .map(|e| e.to_string())
                .unwrap_or_default();
            return Err(ConvertError::AllPagesFailed { total, first_error });
        }

        info!("{}: {}/{} pages transcribed", name, total - failed, total);
        let body = pages
            .into_iter()
            .map(|(page_num, result)| match result {
                Ok(md) => md.trim_end().to_string(),
                Err(e) => {
                    warn!("{}: page {} skipped: {}", name, page_num, e);
                    format!("> Page {page_num} could not be converted: {e}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(postprocess::clean_markdown(&body))
    }
}

/// Reads the embedded text layer; no OCR, no network.
pub struct PdfTextConverter {
    lib_path: Option<PathBuf>,
    max_pages: Option<usize>,
}

impl PdfTextConverter {
    pub fn new(lib_path: Option<PathBuf>, max_pages: Option<usize>) -> Self {
        Self {
            lib_path,
            max_pages,
        }
    }
}

#[async_trait]
impl Converter for PdfTextConverter {
    fn name(&self) -> &str {
        "pdf-text"
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        check_magic(path).await?;
        let pages = render::extract_text(path, self.lib_path.clone(), self.max_pages).await?;
        if pages.iter().all(|(_, text)| text.trim().is_empty()) {
            return Err(ConvertError::invalid(
                FormatTag::Pdf,
                "no text layer (scanned document?)",
            ));
        }

        let mut doc = format!("# {}\n", display_name(path));
        for (idx, text) in pages {
            doc.push_str(&format!("\n## Page {}\n\n{}\n", idx + 1, text.trim()));
        }
        Ok(postprocess::clean_markdown(&doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_pdf_before_touching_pdfium() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"PK\x03\x04 not a pdf").unwrap();

        let err = PdfTextConverter::new(None, None).convert(&path).await.unwrap_err();
        assert!(matches!(err, ConvertError::InvalidContent { .. }), "got {err:?}");

        let err = VisionPdfConverter::new(VisionConfig::default())
            .convert(&path)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidContent { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn empty_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pdf");
        std::fs::write(&path, b"").unwrap();
        let err = PdfTextConverter::new(None, None).convert(&path).await.unwrap_err();
        assert!(err.to_string().contains("too short"));
    }
}
