//! Image processing stages, statically linked.
//!
//! | Stage | Module | Crate / function |
//! |---|---|---|
//! | **Decode** | [`decode`] | `turbojpeg` DCT scaling for JPEG, `image` decoders otherwise, retried on OOM |
//! | **Orient** | [`orientation`] | `kamadak-exif` tag lookup + pixel remap |
//! | **Scale** | [`scale`] | `fast_image_resize` (Lanczos3 by default) |
//! | **Encode** | [`encode`] | `image::codecs::jpeg` inside a quality binary search |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for sample factors and fit sizes (unit testable)
//! - **Parameters**: Value types describing what a stage should do
//! - **Raster**: The owned pixel buffer handed from stage to stage
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Stages**: Decide what to do, call the backend, degrade gracefully

pub mod backend;
mod calculations;
pub mod decode;
pub mod encode;
pub mod orientation;
mod params;
pub mod raster;
pub mod rust_backend;
pub mod scale;

pub use backend::{AttemptError, BackendError, ImageBackend, SourceHeader, Untouched};
pub use calculations::{
    calculate_fit_dimensions, calculate_sample_factor, estimate_peak_bytes, raw_byte_size,
};
pub use decode::{DecodeError, DecodeOptions, DecodedImage};
pub use encode::{EncodeError, EncodeOptions, EncodedArtifact, SearchOutcome};
pub use orientation::Orientation;
pub use params::{DecodeBounds, Quality, QualityRange, ResizeFilter, SampleFactor};
pub use raster::{PixelFormat, RasterBuffer};
pub use rust_backend::RustBackend;
