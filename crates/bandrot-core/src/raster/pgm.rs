//! Plain-text graymap (`P2`) reading and writing.
//!
//! # Format
//!
//! ```text
//! P2
//! # optional comment lines
//! <width> <height>
//! <maxval>
//! <width * height samples, whitespace separated, row-major>
//! ```
//!
//! A `#` starts a comment that runs to the end of its line. Tokens may be
//! split across lines arbitrarily.

use std::fs;
use std::path::{Path, PathBuf};

use super::atomic::write_atomically;
use super::types::{RasterError, RasterHeader, RasterImage};

const MAGIC: &str = "P2";

/// Prefix prepended to the input file name to name the rotated output.
pub const OUTPUT_PREFIX: &str = "rotated_";

/// Parse a plain-text graymap held in memory.
pub fn parse_pgm(text: &str) -> Result<RasterImage, RasterError> {
    let mut tokens = text
        .lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .flat_map(str::split_whitespace);

    let magic = tokens
        .next()
        .ok_or_else(|| RasterError::MalformedHeader("empty file".to_string()))?;
    if magic != MAGIC {
        return Err(RasterError::InvalidMagic(magic.to_string()));
    }

    let width = header_field(tokens.next(), "width")?;
    let height = header_field(tokens.next(), "height")?;
    let maxval = header_field(tokens.next(), "maxval")?;
    let header = RasterHeader::new(width, height, maxval)?;

    let expected = header.sample_count();
    // Every sample takes at least two bytes of text, so a short file cannot
    // claim a huge allocation through its header
    let mut pixels = Vec::with_capacity(expected.min(text.len() / 2 + 1));
    for index in 0..expected {
        let token = tokens.next().ok_or(RasterError::PixelCount {
            expected,
            actual: index,
        })?;
        let value: u32 = token.parse().map_err(|_| RasterError::MalformedSample {
            index,
            token: token.to_string(),
        })?;
        if value > header.maxval {
            return Err(RasterError::SampleOutOfRange {
                index,
                value,
                maxval: header.maxval,
            });
        }
        // maxval <= 255 so the sample fits
        pixels.push(value as u8);
    }

    if tokens.next().is_some() {
        return Err(RasterError::TrailingData { expected });
    }

    RasterImage::new(header, pixels)
}

fn header_field(token: Option<&str>, name: &str) -> Result<u32, RasterError> {
    let token =
        token.ok_or_else(|| RasterError::MalformedHeader(format!("missing {}", name)))?;
    token.parse().map_err(|_| {
        RasterError::MalformedHeader(format!("{} is not an integer: `{}`", name, token))
    })
}

/// Render a raster as plain-text graymap, one text line per image row.
pub fn to_pgm_string(image: &RasterImage) -> String {
    // Up to 4 bytes per sample ("255 ") plus the header
    let mut out = String::with_capacity(image.pixel_count() * 4 + 32);
    out.push_str(MAGIC);
    out.push('\n');
    out.push_str(&format!("{} {}\n{}\n", image.width, image.height, image.maxval));

    for y in 0..image.height {
        let row: Vec<String> = image.row(y).iter().map(u8::to_string).collect();
        out.push_str(&row.join(" "));
        out.push('\n');
    }

    out
}

/// Read and parse a plain-text graymap file.
pub fn read_pgm_file(path: &Path) -> Result<RasterImage, RasterError> {
    let text = fs::read_to_string(path)?;
    parse_pgm(&text)
}

/// Write a raster to `path`.
///
/// The data goes to a temporary sibling first and is renamed into place, so
/// a failed write never leaves a truncated file at `path`.
pub fn write_pgm_file(path: &Path, image: &RasterImage) -> Result<(), RasterError> {
    write_atomically(path, to_pgm_string(image).as_bytes())?;
    Ok(())
}

/// Output path derived from the input: `rotated_<name>` in the same directory.
pub fn derived_output_path(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{}{}", OUTPUT_PREFIX, name))
}
