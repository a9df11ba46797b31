//! Image encoding for multimodal requests.
//!
//! Rendered pages are PNG-encoded (lossless keeps small text legible);
//! image files already on disk are sent as-is with their own MIME type.
//! Both are base64-wrapped in an [`ImageData`] with `detail: "high"`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as a base64 PNG.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(wrap(&buf, "image/png"))
}

/// Wrap raw image file bytes without re-encoding.
pub fn encode_bytes(bytes: &[u8], mime_type: &str) -> ImageData {
    wrap(bytes, mime_type)
}

fn wrap(bytes: &[u8], mime_type: &str) -> ImageData {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded {} image → {} bytes base64", mime_type, b64.len());
    ImageData::new(b64, mime_type).with_detail("high")
}
