//! PNG encoding for rendered cards.

use anyhow::{Context, Result};
use image::RgbaImage;

/// Encodes an RGBA image as PNG bytes.
pub fn encode(img: &RgbaImage) -> Result<Vec<u8>> {
    use image::ImageEncoder as _;
    use image::codecs::png::{CompressionType, FilterType, PngEncoder};

    let mut buf = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut buf, CompressionType::Fast, FilterType::Adaptive);
    let (w, h) = img.dimensions();
    encoder
        .write_image(img.as_raw(), w, h, image::ExtendedColorType::Rgba8)
        .context("encoding PNG")?;
    Ok(buf)
}
