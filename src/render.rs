//! Mask rendering and the scratch file it goes through before upload.

use std::path::Path;

use image::{GrayImage, ImageFormat, ImageResult, Luma};
use ndarray::ArrayView2;
use tempfile::NamedTempFile;

/// Lossless formats a single-channel 8-bit mask can be written as.
const MASK_FORMATS: [ImageFormat; 3] = [ImageFormat::Png, ImageFormat::Bmp, ImageFormat::Tiff];

/// Fixed mapping: 0 is black, anything else white. No per-image stretching,
/// so a constant mask renders as that constant.
pub fn render_mask(mask: ArrayView2<u8>) -> GrayImage {
    let (height, width) = mask.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        if mask[[y as usize, x as usize]] == 0 {
            Luma([0])
        } else {
            Luma([u8::MAX])
        }
    })
}

/// Format implied by the key's extension, falling back to PNG.
///
/// Lossy extensions such as `.jpg` also get PNG; the key keeps its name.
pub fn output_format(key: &str) -> ImageFormat {
    ImageFormat::from_path(key)
        .ok()
        .filter(|f| MASK_FORMATS.contains(f) && f.writing_enabled())
        .unwrap_or(ImageFormat::Png)
}

pub const fn content_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        _ => "image/png",
    }
}

/// Writes `image` to a uniquely named file in `dir`.
///
/// The file is removed when the returned handle drops. Its name never
/// includes the object key, so key length does not matter here.
pub fn write_scratch(
    dir: &Path,
    image: &GrayImage,
    format: ImageFormat,
) -> ImageResult<NamedTempFile> {
    let extension = format.extensions_str().first().copied().unwrap_or("png");
    let file = tempfile::Builder::new()
        .prefix("mask-")
        .suffix(&format!(".{extension}"))
        .tempfile_in(dir)?;
    image.save_with_format(file.path(), format)?;
    Ok(file)
}
