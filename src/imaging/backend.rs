//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines every operation that touches codec or
//! pixel-heavy work: probe, decode_sampled, read_orientation, reorient,
//! resize and encode_jpeg. The stage modules decide *what* to do and call
//! through this seam, so their retry and fallback logic can be driven by the
//! scripted [`MockBackend`](tests::MockBackend) in unit tests.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend).
//!
//! ## Failure shapes
//!
//! | Operation | Error | Meaning |
//! |---|---|---|
//! | probe, read_orientation | [`BackendError`] | not readable or not an image |
//! | decode_sampled, encode_jpeg | [`AttemptError`] | this attempt failed; `OutOfMemory` is retryable |
//! | reorient, resize | [`Untouched`] | no new raster; the input is handed back |

use super::orientation::Orientation;
use super::params::{Quality, ResizeFilter, SampleFactor};
use super::raster::{PixelFormat, RasterBuffer};
use crate::source::ImageSource;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported image: {0}")]
    Unsupported(String),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Failure of a single memory-hungry attempt.
#[derive(Error, Debug)]
pub enum AttemptError {
    /// The allocator (or the decoder's allocation limit) refused the buffer.
    #[error("out of memory")]
    OutOfMemory,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A transform that could not run. Carries the untouched input back.
#[derive(Debug)]
pub struct Untouched {
    pub raster: RasterBuffer,
    pub reason: AttemptError,
}

/// What a probe learns without decoding pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHeader {
    pub width: u32,
    pub height: u32,
    /// Declared MIME type if the source carries one, otherwise sniffed.
    pub mime: Option<String>,
}

/// Trait for image processing backends.
pub trait ImageBackend: Sync {
    /// Read dimensions and MIME type without decoding pixel data.
    fn probe(&self, source: &ImageSource) -> Result<SourceHeader, BackendError>;

    /// Decode at `1/factor` resolution into `format`.
    fn decode_sampled(
        &self,
        source: &ImageSource,
        header: &SourceHeader,
        factor: SampleFactor,
        format: PixelFormat,
    ) -> Result<RasterBuffer, AttemptError>;

    /// Read the EXIF orientation tag. Sources without one are `Normal`.
    fn read_orientation(&self, source: &ImageSource) -> Result<Orientation, BackendError>;

    /// Apply `orientation` so the raster displays upright.
    fn reorient(
        &self,
        raster: RasterBuffer,
        orientation: Orientation,
    ) -> Result<RasterBuffer, Untouched>;

    /// Resample to exactly `width x height`.
    fn resize(
        &self,
        raster: RasterBuffer,
        width: u32,
        height: u32,
        filter: ResizeFilter,
    ) -> Result<RasterBuffer, Untouched>;

    /// Encode an opaque raster as baseline JPEG at `quality`.
    fn encode_jpeg(&self, raster: &RasterBuffer, quality: Quality) -> Result<Vec<u8>, AttemptError>;
}
