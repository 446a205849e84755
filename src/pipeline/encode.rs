//! Image encoding: page bytes → base64 `ImageData` for the VLM request.
//!
//! Rendered PDF pages are encoded as PNG because it is lossless; digits in a
//! small table cell are exactly what JPEG artefacts destroy. JPEG sources
//! that already fit the pixel budget are forwarded untouched so the model
//! sees the scanner's original bytes.

use crate::pipeline::render::PagePayload;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a decoded image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Wrap a page payload as a base64 image attachment.
///
/// `detail: "high"` keeps fine print legible on providers that tile images.
pub fn to_image_data(payload: &PagePayload) -> ImageData {
    let b64 = STANDARD.encode(&payload.bytes);
    debug!(
        "Encoded {} page → {} bytes base64",
        payload.mime_type,
        b64.len()
    );
    ImageData::new(b64, payload.mime_type.clone()).with_detail("high")
}
