//! Image encoding: `DynamicImage` → PNG/JPEG bytes → `data:` URI.
//!
//! Chat-completions APIs accept images as base64 data URIs embedded in the
//! JSON request body. PNG is the default because it is lossless; JPEG
//! artefacts around rendered glyphs degrade OCR accuracy at low DPI.

use crate::config::ImageFormat;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page into transport bytes.
pub fn encode_image(img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    match format {
        ImageFormat::Png => img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?,
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8())
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)?,
    }
    debug!("Encoded {}x{} image → {} bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Convert binary data to a `data:` URL.
pub fn data_url(mime_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(data))
}
