//! Bounded-memory decode with sample-factor retry.
//!
//! 1. Probe the header for dimensions and MIME type (no pixel allocation).
//! 2. Pick the pixel layout from the MIME type: alpha-capable formats keep
//!    RGBA, everything else decodes to RGB.
//! 3. Compute the initial power-of-two sample factor from the requested
//!    bounds and the hard ceiling.
//! 4. Decode. On out-of-memory double the factor and try again, up to
//!    `max_attempts` tries and never past `max_sample_factor`.

use super::backend::{AttemptError, BackendError, ImageBackend, SourceHeader};
use super::calculations::calculate_sample_factor;
use super::params::{DecodeBounds, SampleFactor};
use super::raster::{PixelFormat, RasterBuffer};
use crate::source::ImageSource;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("cannot read source: {0}")]
    SourceUnreadable(#[source] std::io::Error),
    #[error("cannot decode image: {0}")]
    Failed(String),
    #[error("out of memory after {attempts} decode attempts (last sample factor {sample_factor})")]
    OutOfMemory {
        attempts: u32,
        sample_factor: SampleFactor,
    },
}

impl From<BackendError> for DecodeError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Io(io) => DecodeError::SourceUnreadable(io),
            other => DecodeError::Failed(other.to_string()),
        }
    }
}

/// Knobs for the decode stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub bounds: DecodeBounds,
    /// No decoded axis may exceed this many pixels, whatever the bounds.
    pub hard_ceiling: u32,
    pub max_attempts: u32,
    pub max_sample_factor: SampleFactor,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            bounds: DecodeBounds::default(),
            hard_ceiling: 4096,
            max_attempts: 6,
            max_sample_factor: SampleFactor::new(64),
        }
    }
}

/// A decoded raster plus how it was obtained.
#[derive(Debug)]
pub struct DecodedImage {
    pub raster: RasterBuffer,
    pub header: SourceHeader,
    pub sample_factor: SampleFactor,
    pub attempts: u32,
}

/// Read the source header without decoding pixels.
pub fn probe(backend: &impl ImageBackend, source: &ImageSource) -> Result<SourceHeader, DecodeError> {
    let header = backend.probe(source)?;
    if header.width == 0 || header.height == 0 {
        return Err(DecodeError::Failed(format!(
            "image reports zero size ({}x{})",
            header.width, header.height
        )));
    }
    Ok(header)
}

/// Decode `source` at the smallest resolution that still covers the bounds.
pub fn decode(
    backend: &impl ImageBackend,
    source: &ImageSource,
    options: &DecodeOptions,
) -> Result<DecodedImage, DecodeError> {
    let header = probe(backend, source)?;
    let format = PixelFormat::for_mime(header.mime.as_deref());
    let mut factor = calculate_sample_factor(
        (header.width, header.height),
        options.bounds,
        options.hard_ceiling,
    );
    let max_attempts = options.max_attempts.max(1);

    log::debug!(
        "{}: {}x{} {} -> sample {} as {}",
        source.label(),
        header.width,
        header.height,
        header.mime.as_deref().unwrap_or("unknown"),
        factor,
        format
    );

    let mut attempt = 1;
    loop {
        match backend.decode_sampled(source, &header, factor, format) {
            Ok(raster) => {
                return Ok(DecodedImage {
                    raster,
                    header,
                    sample_factor: factor,
                    attempts: attempt,
                });
            }
            Err(AttemptError::OutOfMemory) => {
                let next = factor.doubled();
                if attempt >= max_attempts || next > options.max_sample_factor || next == factor {
                    return Err(DecodeError::OutOfMemory {
                        attempts: attempt,
                        sample_factor: factor,
                    });
                }
                log::warn!(
                    "{}: out of memory decoding at {}, retrying at {}",
                    source.label(),
                    factor,
                    next
                );
                factor = next;
                attempt += 1;
            }
            Err(AttemptError::Backend(e)) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, ProbeFailure};
    use crate::imaging::rust_backend::RustBackend;
    use crate::test_helpers::{encode_png, jpeg_bytes, noise_rgb};

    fn src() -> ImageSource {
        ImageSource::from_bytes("photo.jpg", Vec::new())
    }

    #[test]
    fn small_image_decodes_at_full_size() {
        let backend = MockBackend::new(1200, 800);
        let decoded = decode(&backend, &src(), &DecodeOptions::default()).unwrap();
        assert_eq!(decoded.raster.dimensions(), (1200, 800));
        assert_eq!(decoded.sample_factor.get(), 1);
        assert_eq!(decoded.attempts, 1);
        assert_eq!(decoded.raster.format(), PixelFormat::Rgb8);
    }

    #[test]
    fn large_image_is_sampled_on_first_attempt() {
        let backend = MockBackend::new(7680, 4320);
        let decoded = decode(&backend, &src(), &DecodeOptions::default()).unwrap();
        assert_eq!(decoded.sample_factor.get(), 4);
        assert_eq!(decoded.raster.dimensions(), (1920, 1080));
        assert_eq!(backend.decode_factors(), vec![4]);
    }

    #[test]
    fn oom_retries_with_doubled_factor() {
        let backend = MockBackend::new(3840, 2160).with_decode_oom(2);
        let decoded = decode(&backend, &src(), &DecodeOptions::default()).unwrap();
        assert_eq!(backend.decode_factors(), vec![2, 4, 8]);
        assert_eq!(decoded.attempts, 3);
        assert_eq!(decoded.raster.dimensions(), (480, 270));
    }

    #[test]
    fn oom_gives_up_after_max_attempts() {
        let backend = MockBackend::new(100, 100).with_decode_oom(100);
        let err = decode(&backend, &src(), &DecodeOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::OutOfMemory { attempts: 6, sample_factor } if sample_factor.get() == 32
        ));
        assert_eq!(backend.decode_factors(), vec![1, 2, 4, 8, 16, 32]);
    }

    #[test]
    fn oom_stops_at_max_sample_factor() {
        // Starts at 16 because of the ceiling; 16, 32, 64 then 128 would exceed.
        let backend = MockBackend::new(40000, 800).with_decode_oom(100);
        let err = decode(&backend, &src(), &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, DecodeError::OutOfMemory { attempts: 3, .. }));
        assert_eq!(backend.decode_factors(), vec![16, 32, 64]);
    }

    #[test]
    fn alpha_capable_mime_decodes_rgba() {
        let backend = MockBackend::new(10, 10).with_mime("image/png");
        let decoded = decode(&backend, &src(), &DecodeOptions::default()).unwrap();
        assert_eq!(decoded.raster.format(), PixelFormat::Rgba8);
    }

    #[test]
    fn unreadable_source_maps_to_source_unreadable() {
        let backend = MockBackend::new(10, 10).with_probe_failure(ProbeFailure::Unreadable);
        let err = decode(&backend, &src(), &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, DecodeError::SourceUnreadable(_)));
    }

    #[test]
    fn non_image_maps_to_decode_failure() {
        let backend = MockBackend::new(10, 10).with_probe_failure(ProbeFailure::NotAnImage);
        let err = decode(&backend, &src(), &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, DecodeError::Failed(_)));
        assert!(backend.decode_factors().is_empty());
    }

    #[test]
    fn zero_sized_header_is_rejected() {
        let backend = MockBackend::new(0, 10);
        let err = decode(&backend, &src(), &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, DecodeError::Failed(_)));
    }

    // =========================================================================
    // With the production backend
    // =========================================================================

    #[test]
    fn retry_at_larger_factor_fits_under_alloc_cap() {
        // Bounds equal to the source give factor 1; 3 MiB of pixels exceeds
        // the 1 MiB cap, the 768 KiB half-scale decode does not.
        let backend = RustBackend::with_alloc_limit(1024 * 1024);
        let source = ImageSource::from_bytes("big.jpg", jpeg_bytes(1024, 1024, 90));
        let options = DecodeOptions {
            bounds: DecodeBounds::new(1024, 1024),
            ..DecodeOptions::default()
        };

        let decoded = decode(&backend, &source, &options).unwrap();
        assert_eq!(decoded.attempts, 2);
        assert_eq!(decoded.sample_factor.get(), 2);
        assert_eq!(decoded.raster.dimensions(), (512, 512));
    }

    #[test]
    fn first_factor_fits_under_alloc_cap() {
        let backend = RustBackend::with_alloc_limit(1024 * 1024);
        let source = ImageSource::from_bytes("big.jpg", jpeg_bytes(1024, 1024, 90));
        let options = DecodeOptions {
            bounds: DecodeBounds::new(512, 512),
            ..DecodeOptions::default()
        };

        let decoded = decode(&backend, &source, &options).unwrap();
        assert_eq!(decoded.attempts, 1);
        assert_eq!(decoded.raster.dimensions(), (512, 512));
    }

    #[test]
    fn truncated_png_is_decode_failure_not_unreadable() {
        let mut bytes = encode_png(&noise_rgb(64, 64, 2));
        bytes.truncate(bytes.len() / 2);
        let source = ImageSource::from_bytes("cut.png", bytes);
        let err = decode(&RustBackend::new(), &source, &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, DecodeError::Failed(_)), "got {err:?}");
    }
}
