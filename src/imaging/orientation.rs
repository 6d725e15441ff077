//! EXIF orientation normalization.
//!
//! Cameras store pixels in sensor order and record how to display them in
//! the EXIF `Orientation` tag (values 1–8). This stage rewrites the pixels
//! so the raster is upright and the tag no longer matters.
//!
//! The stage is best-effort. A missing or unreadable tag, an unknown value,
//! or a failed allocation all leave the raster exactly as decoded.

use super::backend::ImageBackend;
use super::raster::{AllocError, RasterBuffer, try_alloc_pixels};
use crate::source::ImageSource;
use serde::Serialize;

/// The eight EXIF orientations.
///
/// Names describe the transform needed to display the stored pixels upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    /// 1: already upright.
    #[default]
    Normal,
    /// 2: mirror left-right.
    FlipHorizontal,
    /// 3: rotate 180°.
    Rotate180,
    /// 4: mirror top-bottom.
    FlipVertical,
    /// 5: mirror across the top-left/bottom-right diagonal.
    Transpose,
    /// 6: rotate 90° clockwise.
    Rotate90,
    /// 7: mirror across the top-right/bottom-left diagonal.
    Transverse,
    /// 8: rotate 270° clockwise.
    Rotate270,
}

impl Orientation {
    /// Map an EXIF tag value. Anything outside 1–8 is treated as upright.
    pub fn from_exif(value: u32) -> Self {
        match value {
            2 => Orientation::FlipHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::FlipVertical,
            5 => Orientation::Transpose,
            6 => Orientation::Rotate90,
            7 => Orientation::Transverse,
            8 => Orientation::Rotate270,
            _ => Orientation::Normal,
        }
    }

    pub fn exif_value(self) -> u32 {
        match self {
            Orientation::Normal => 1,
            Orientation::FlipHorizontal => 2,
            Orientation::Rotate180 => 3,
            Orientation::FlipVertical => 4,
            Orientation::Transpose => 5,
            Orientation::Rotate90 => 6,
            Orientation::Transverse => 7,
            Orientation::Rotate270 => 8,
        }
    }

    /// Whether applying this orientation exchanges width and height.
    pub fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            Orientation::Transpose
                | Orientation::Rotate90
                | Orientation::Transverse
                | Orientation::Rotate270
        )
    }

    /// Source pixel that lands at output `(x, y)` for a `w x h` source.
    fn source_coords(self, x: u32, y: u32, w: u32, h: u32) -> (u32, u32) {
        match self {
            Orientation::Normal => (x, y),
            Orientation::FlipHorizontal => (w - 1 - x, y),
            Orientation::Rotate180 => (w - 1 - x, h - 1 - y),
            Orientation::FlipVertical => (x, h - 1 - y),
            Orientation::Transpose => (y, x),
            Orientation::Rotate90 => (y, h - 1 - x),
            Orientation::Transverse => (w - 1 - y, h - 1 - x),
            Orientation::Rotate270 => (w - 1 - y, x),
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Orientation::Normal => "normal",
            Orientation::FlipHorizontal => "flip-horizontal",
            Orientation::Rotate180 => "rotate-180",
            Orientation::FlipVertical => "flip-vertical",
            Orientation::Transpose => "transpose",
            Orientation::Rotate90 => "rotate-90",
            Orientation::Transverse => "transverse",
            Orientation::Rotate270 => "rotate-270",
        };
        f.write_str(name)
    }
}

/// Build the upright copy of `raster`.
///
/// The output buffer is allocated fallibly; on failure the input is left
/// untouched and still owned by the caller.
pub fn remap(raster: &RasterBuffer, orientation: Orientation) -> Result<RasterBuffer, AllocError> {
    let (w, h) = raster.dimensions();
    let (out_w, out_h) = if orientation.swaps_dimensions() {
        (h, w)
    } else {
        (w, h)
    };
    let bpp = raster.format().bytes_per_pixel() as usize;
    let mut out = try_alloc_pixels(raster.byte_size())?;
    let src = raster.pixels();

    for y in 0..out_h {
        let row = y as usize * out_w as usize;
        for x in 0..out_w {
            let (sx, sy) = orientation.source_coords(x, y, w, h);
            let s = (sy as usize * w as usize + sx as usize) * bpp;
            let d = (row + x as usize) * bpp;
            out[d..d + bpp].copy_from_slice(&src[s..s + bpp]);
        }
    }

    RasterBuffer::from_pixels(out_w, out_h, raster.format(), out).ok_or(AllocError {
        requested: raster.byte_size(),
    })
}

/// Return `raster` rotated/mirrored upright according to the source's EXIF.
///
/// Never fails: every problem degrades to returning the input unchanged.
pub fn normalize(
    backend: &impl ImageBackend,
    source: &ImageSource,
    raster: RasterBuffer,
) -> RasterBuffer {
    let orientation = match backend.read_orientation(source) {
        Ok(o) => o,
        Err(e) => {
            log::warn!("{}: ignoring unreadable orientation: {}", source.label(), e);
            return raster;
        }
    };
    if orientation == Orientation::Normal {
        return raster;
    }

    log::debug!(
        "{}: applying EXIF orientation {} ({:?})",
        source.label(),
        orientation.exif_value(),
        orientation
    );
    match backend.reorient(raster, orientation) {
        Ok(upright) => upright,
        Err(untouched) => {
            log::warn!(
                "{}: orientation left as decoded: {}",
                source.label(),
                untouched.reason
            );
            untouched.raster
        }
    }
}
