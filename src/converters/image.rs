//! Image converter: metadata table plus optional vision-LLM transcription.

use super::{display_name, human_size, markdown_table, read_source};
use crate::config::VisionConfig;
use crate::dispatch::Converter;
use crate::error::ConvertError;
use crate::format::FormatTag;
use crate::pipeline::{encode, llm, postprocess};
use crate::prompts::IMAGE_SYSTEM_PROMPT;
use async_trait::async_trait;
use image::{ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

/// Describes an image and, when a vision provider is available, transcribes it.
///
/// An image that cannot be decoded is an error. A missing provider or a
/// failed LLM call only drops the transcription section.
pub struct ImageConverter {
    config: VisionConfig,
}

impl ImageConverter {
    pub fn new(config: VisionConfig) -> Self {
        Self { config }
    }

    async fn transcription(&self, bytes: &[u8], mime: &str, name: &str) -> Option<String> {
        if !self.config.image_ocr {
            return None;
        }
        let provider = match llm::resolve_provider(&self.config) {
            Ok(p) => p,
            Err(e) => {
                debug!("{}: no vision provider, metadata only ({})", name, e);
                return None;
            }
        };
        let image = encode::encode_bytes(bytes, mime);
        match llm::transcribe(&provider, name, image, IMAGE_SYSTEM_PROMPT, &self.config).await {
            Ok(t) => Some(postprocess::clean_markdown(&t.markdown)),
            Err(e) => {
                warn!("{}: transcription failed: {}", name, e);
                Some(format!("> Text recognition failed: {e}\n"))
            }
        }
    }
}

#[async_trait]
impl Converter for ImageConverter {
    fn name(&self) -> &str {
        "image"
    }

    async fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        let bytes = read_source(path).await?;
        let name = display_name(path);

        let reader = ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|e| ConvertError::unreadable(path, e))?;
        let format = reader
            .format()
            .ok_or_else(|| ConvertError::invalid(FormatTag::Image, "unrecognised image data"))?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| ConvertError::invalid(FormatTag::Image, e.to_string()))?;

        let mut doc = format!("# {name}\n\n");
        doc.push_str(&markdown_table(&[
            vec!["Property".to_string(), "Value".to_string()],
            vec!["Format".to_string(), format_label(format)],
            vec!["Dimensions".to_string(), format!("{width} × {height} px")],
            vec!["Size".to_string(), human_size(bytes.len() as u64)],
        ]));

        if let Some(text) = self.transcription(&bytes, format.to_mime_type(), &name).await {
            doc.push_str("\n## Content\n\n");
            doc.push_str(&text);
        }
        Ok(postprocess::clean_markdown(&doc))
    }
}

fn format_label(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .map(|ext| ext.to_ascii_uppercase())
        .unwrap_or_else(|| format!("{format:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> std::path::PathBuf {
        let path = dir.join(name);
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([10, 20, 30])))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn metadata_only_when_ocr_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "shot.png", 40, 30);
        let conv = ImageConverter::new(VisionConfig::default().with_image_ocr(false));

        let md = conv.convert(&path).await.unwrap();
        assert!(md.starts_with("# shot.png\n"));
        assert!(md.contains("| Format | PNG |"));
        assert!(md.contains("40 × 30 px"));
        assert!(!md.contains("## Content"));
    }

    #[tokio::test]
    async fn garbage_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not an image").unwrap();
        let conv = ImageConverter::new(VisionConfig::default().with_image_ocr(false));
        let err = conv.convert(&path).await.unwrap_err();
        assert!(matches!(err, ConvertError::InvalidContent { .. }), "got {err:?}");
    }
}
