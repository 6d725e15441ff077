//! Shared test utilities for the squish test suite.
//!
//! Every image is synthesized in code; the suite carries no binary fixtures.
//! The integration tests under `tests/` include this same file by path, so
//! unit and integration tests build their fixtures from one place.
//!
//! # Usage
//!
//! ```ignore
//! use crate::test_helpers::*;
//!
//! let jpeg = with_exif_orientation(jpeg_bytes(64, 32, 90), 6);
//! let source = ImageSource::from_bytes("rotated.jpg", jpeg);
//! ```

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage, Rgba, RgbaImage};
use std::path::{Path, PathBuf};

// =========================================================================
// Synthetic images
// =========================================================================

/// Deterministic pseudo-random RGB noise. Noise compresses poorly, which
/// makes encoded sizes react strongly to quality.
pub fn noise_rgb(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    RgbImage::from_fn(width, height, |_, _| {
        let mut channel = || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 56) as u8
        };
        image::Rgb([channel(), channel(), channel()])
    })
}

/// A smooth gradient encoded as baseline JPEG.
pub fn jpeg_bytes(width: u32, height: u32, quality: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    });
    encode_jpeg(&img, quality)
}

/// Encode an existing RGB image as JPEG.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

/// Smooth gradient with a little deterministic texture, like a photo.
pub fn photo_like(width: u32, height: u32, seed: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let texture = (x.wrapping_mul(31) ^ y.wrapping_mul(17) ^ seed).wrapping_mul(2654435761) >> 28;
        image::Rgb([
            (x * 200 / width.max(1)) as u8 + texture as u8,
            (y * 200 / height.max(1)) as u8 + texture as u8,
            (((x + y) * 100) / (width + height).max(1)) as u8,
        ])
    })
}

/// Encode an existing RGB image as lossless PNG.
pub fn encode_png(img: &RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

/// RGBA PNG whose left half is fully transparent.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([200, 40, 40, 255])
        }
    });
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgba8)
        .unwrap();
    buf
}

// =========================================================================
// EXIF
// =========================================================================

/// Insert a minimal big-endian EXIF APP1 segment carrying only the
/// orientation tag right after the JPEG SOI marker.
pub fn with_exif_orientation(jpeg: Vec<u8>, orientation: u16) -> Vec<u8> {
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "not a JPEG");

    let mut segment = Vec::with_capacity(36);
    segment.extend_from_slice(&[0xFF, 0xE1]);
    // length covers itself: 2 + "Exif\0\0" 6 + TIFF header 8 + IFD 18
    segment.extend_from_slice(&34u16.to_be_bytes());
    segment.extend_from_slice(b"Exif\0\0");
    segment.extend_from_slice(b"MM\0\x2A\0\0\0\x08");
    segment.extend_from_slice(&1u16.to_be_bytes());
    segment.extend_from_slice(&0x0112u16.to_be_bytes());
    segment.extend_from_slice(&3u16.to_be_bytes());
    segment.extend_from_slice(&1u32.to_be_bytes());
    segment.extend_from_slice(&orientation.to_be_bytes());
    segment.extend_from_slice(&[0, 0]);
    segment.extend_from_slice(&0u32.to_be_bytes());

    let mut out = Vec::with_capacity(jpeg.len() + segment.len());
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&segment);
    out.extend_from_slice(&jpeg[2..]);
    out
}

// =========================================================================
// Files
// =========================================================================

/// Write `bytes` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_deterministic() {
        assert_eq!(noise_rgb(8, 8, 3), noise_rgb(8, 8, 3));
        assert_ne!(noise_rgb(8, 8, 3), noise_rgb(8, 8, 4));
    }

    #[test]
    fn exif_segment_is_well_formed() {
        let tagged = with_exif_orientation(jpeg_bytes(4, 4, 90), 8);
        assert_eq!(&tagged[2..4], &[0xFF, 0xE1]);
        let len = u16::from_be_bytes([tagged[4], tagged[5]]) as usize;
        // marker + declared length lands on the next marker
        assert_eq!(tagged[2 + 2 + len], 0xFF);
        assert!(image::load_from_memory(&tagged).is_ok());
    }
}
