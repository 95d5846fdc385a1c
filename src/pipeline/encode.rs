//! Image encoding: `DynamicImage` → PNG bytes.
//!
//! Used for OCR input files, derived `_corrected` files and rasters embedded
//! into merged PDFs. PNG is lossless, so a rotated scan keeps its text edges.

use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Encode a raster page as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// Encode `img` as PNG and write it to `path`.
pub fn write_png(img: &DynamicImage, path: &Path) -> Result<(), image::ImageError> {
    let bytes = encode_png(img)?;
    std::fs::write(path, bytes)?;
    Ok(())
}
