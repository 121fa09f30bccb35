//! PNG preview encoding.
//!
//! Graymaps are awkward to look at, so a rotated raster can also be written
//! as an 8-bit grayscale PNG using the `image` crate's encoder. Samples are
//! stretched from `0..=maxval` to `0..=255`.

use image::codecs::png::PngEncoder;
use image::ExtendedColorType;
use image::ImageEncoder;
use std::io::Cursor;
use std::path::Path;

use super::atomic::write_atomically;
use super::types::{RasterError, RasterImage, MAX_SAMPLE_CEILING};

/// Encode a raster to PNG bytes.
///
/// # Example
///
/// ```
/// use bandrot_core::raster::{encode_png, RasterImage};
///
/// let img = RasterImage::filled(8, 8, 255, 128).unwrap();
/// let png = encode_png(&img).unwrap();
/// assert_eq!(&png[1..4], b"PNG");
/// ```
pub fn encode_png(image: &RasterImage) -> Result<Vec<u8>, RasterError> {
    let samples = stretch_to_full_range(image);
    let mut buffer = Cursor::new(Vec::new());

    PngEncoder::new(&mut buffer)
        .write_image(&samples, image.width, image.height, ExtendedColorType::L8)
        .map_err(|e| RasterError::EncodingFailed(e.to_string()))?;

    Ok(buffer.into_inner())
}

/// Write the PNG preview of a raster to `path`.
///
/// Goes through a temporary sibling like graymap output does.
pub fn write_png_file(path: &Path, image: &RasterImage) -> Result<(), RasterError> {
    let bytes = encode_png(image)?;
    write_atomically(path, &bytes)?;
    Ok(())
}

fn stretch_to_full_range(image: &RasterImage) -> Vec<u8> {
    if image.maxval == MAX_SAMPLE_CEILING {
        return image.pixels.clone();
    }
    let maxval = image.maxval;
    image
        .pixels
        .iter()
        .map(|&v| ((u32::from(v) * MAX_SAMPLE_CEILING + maxval / 2) / maxval) as u8)
        .collect()
}
