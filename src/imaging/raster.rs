//! In-memory decoded pixel grids.
//!
//! A [`RasterBuffer`] is owned by exactly one pipeline stage at a time. Stages
//! take it by value and hand back either a new buffer (the old one is dropped
//! on the spot) or the same buffer unchanged, so there is never a second
//! handle to release and no identity comparison to make.
//!
//! Every pixel allocation made by the pipeline goes through
//! [`try_alloc_pixels`], which reports allocator failure as an [`AllocError`]
//! instead of aborting the process. Stages turn that into their own graceful
//! fallback.

use super::calculations::raw_byte_size;
use image::DynamicImage;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Allocation of a pixel buffer failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot allocate {requested} bytes of pixel data")]
pub struct AllocError {
    pub requested: u64,
}

/// Allocate a zeroed pixel buffer of `len` bytes without aborting on failure.
pub fn try_alloc_pixels(len: u64) -> Result<Vec<u8>, AllocError> {
    let err = AllocError { requested: len };
    let len = usize::try_from(len).map_err(|_| err)?;
    let mut pixels = Vec::new();
    pixels.try_reserve_exact(len).map_err(|_| err)?;
    pixels.resize(len, 0);
    Ok(pixels)
}

/// In-memory pixel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit RGB, 3 bytes per pixel. Used for opaque sources.
    Rgb8,
    /// 8-bit RGBA, 4 bytes per pixel. Used for sources that can carry alpha.
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::Rgba8)
    }

    /// Pick the decode format from a source's declared MIME type.
    ///
    /// Formats that support transparency keep an alpha channel; everything
    /// else decodes to the smaller opaque layout.
    pub fn for_mime(mime: Option<&str>) -> Self {
        match mime {
            Some("image/png") | Some("image/webp") => PixelFormat::Rgba8,
            _ => PixelFormat::Rgb8,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Rgb8 => f.write_str("rgb8"),
            PixelFormat::Rgba8 => f.write_str("rgba8"),
        }
    }
}

/// A `width x height` grid of 8-bit pixels in a fixed [`PixelFormat`].
///
/// Deliberately not `Clone`: copying a raster is a real allocation and has to
/// go through [`try_alloc_pixels`].
pub struct RasterBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: Vec<u8>,
}

impl fmt::Debug for RasterBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl RasterBuffer {
    /// Wrap raw pixels. Returns `None` if the length does not match the
    /// dimensions and format.
    pub fn from_pixels(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> Option<Self> {
        let expected = raw_byte_size(width, height, format.bytes_per_pixel());
        if width == 0 || height == 0 || pixels.len() as u64 != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            format,
            pixels,
        })
    }

    /// Convert a decoded image into the requested layout.
    ///
    /// No copy is made when the image is already in that layout.
    pub fn from_dynamic(image: DynamicImage, format: PixelFormat) -> Self {
        let (width, height) = (image.width(), image.height());
        let pixels = match format {
            PixelFormat::Rgb8 => image.into_rgb8().into_raw(),
            PixelFormat::Rgba8 => image.into_rgba8().into_raw(),
        };
        Self {
            width,
            height,
            format,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// `width * height * bytes_per_pixel`.
    pub fn byte_size(&self) -> u64 {
        raw_byte_size(self.width, self.height, self.format.bytes_per_pixel())
    }

    /// Composite RGBA over a solid background into a new opaque raster.
    ///
    /// Opaque rasters are returned as-is.
    pub fn flatten_alpha(self, background: [u8; 3]) -> Result<RasterBuffer, (RasterBuffer, AllocError)> {
        if !self.format.has_alpha() {
            return Ok(self);
        }
        let len = raw_byte_size(self.width, self.height, 3);
        let mut out = match try_alloc_pixels(len) {
            Ok(buf) => buf,
            Err(e) => return Err((self, e)),
        };
        for (dst, src) in out.chunks_exact_mut(3).zip(self.pixels.chunks_exact(4)) {
            let alpha = src[3] as u32;
            for c in 0..3 {
                let blended = src[c] as u32 * alpha + background[c] as u32 * (255 - alpha);
                dst[c] = ((blended + 127) / 255) as u8;
            }
        }
        Ok(RasterBuffer {
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgb8,
            pixels: out,
        })
    }
}
