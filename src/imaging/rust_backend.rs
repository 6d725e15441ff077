//! Pure Rust image processing backend, plus libjpeg-turbo for JPEG decoding.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Probe | `image::ImageReader::into_dimensions` (header only) |
//! | Decode JPEG | `turbojpeg` DCT scaling (1/2, 1/4, 1/8) into a fallibly allocated buffer |
//! | Decode PNG, TIFF, WebP, GIF, BMP | `image` crate decoders under an allocation [`Limits`] |
//! | Sampling beyond the decoder's own scale | box average into a fallibly allocated buffer |
//! | EXIF orientation | `kamadak-exif` (`exif::Reader::read_from_container`) |
//! | Reorient | [`orientation::remap`](super::orientation::remap) |
//! | Resize | `fast_image_resize` (SIMD convolution) |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//!
//! ## Memory during decode
//!
//! JPEG is the only format decoded at reduced size. libjpeg-turbo skips
//! DCT coefficients to decode straight at 1/2, 1/4 or 1/8 scale into a
//! caller-owned buffer, so the full-resolution raster never exists. The
//! buffer is checked against the allocation limit and reserved with
//! `try_reserve`, and a larger sample factor really does shrink it. Factors
//! above 8 decode at 1/8 and box-average the rest.
//!
//! Every other format is decoded at full resolution by the `image` crate
//! under a `max_alloc` limit, then box-averaged. A limit hit is reported as
//! [`AttemptError::OutOfMemory`], but a larger factor cannot help these
//! formats, so their retries fail just as quickly.
//!
//! Streams libjpeg-turbo refuses (CMYK, lossless, arithmetic coding) also
//! take the `image` crate path.

use super::backend::{AttemptError, BackendError, ImageBackend, SourceHeader, Untouched};
use super::calculations::raw_byte_size;
use super::orientation::{Orientation, remap};
use super::params::{Quality, ResizeFilter, SampleFactor};
use super::raster::{AllocError, PixelFormat, RasterBuffer, try_alloc_pixels};
use crate::source::ImageSource;
use fast_image_resize as fr;
use image::codecs::jpeg::JpegEncoder;
use image::error::LimitErrorKind;
use image::{ExtendedColorType, ImageEncoder, ImageError, ImageFormat, ImageReader, Limits};
use turbojpeg::ScalingFactor;

/// Default cap on a single decoder allocation.
pub const DEFAULT_ALLOC_LIMIT: u64 = 512 * 1024 * 1024;

/// Containers kamadak-exif can pull an EXIF block out of.
const EXIF_CONTAINERS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Tiff,
    ImageFormat::Png,
    ImageFormat::WebP,
];

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
#[derive(Debug, Clone, Copy)]
pub struct RustBackend {
    alloc_limit: u64,
}

impl RustBackend {
    pub fn new() -> Self {
        Self {
            alloc_limit: DEFAULT_ALLOC_LIMIT,
        }
    }

    /// Cap any single decoder allocation at `bytes`.
    pub fn with_alloc_limit(bytes: u64) -> Self {
        Self { alloc_limit: bytes }
    }

    pub fn alloc_limit(&self) -> u64 {
        self.alloc_limit
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a codec error. Only failing to open the source is an I/O error;
/// an I/O error from inside a decoder means the stream is truncated or corrupt.
fn backend_error(e: ImageError) -> BackendError {
    match e {
        ImageError::IoError(io) => BackendError::ProcessingFailed(format!("corrupt or truncated data: {io}")),
        ImageError::Unsupported(u) => BackendError::Unsupported(u.to_string()),
        other => BackendError::ProcessingFailed(other.to_string()),
    }
}

fn attempt_error(e: ImageError) -> AttemptError {
    match e {
        ImageError::Limits(ref limit)
            if matches!(
                limit.kind(),
                LimitErrorKind::InsufficientMemory | LimitErrorKind::DimensionError
            ) =>
        {
            AttemptError::OutOfMemory
        }
        other => AttemptError::Backend(backend_error(other)),
    }
}

fn oom(_: AllocError) -> AttemptError {
    AttemptError::OutOfMemory
}

/// Average each `factor x factor` block into one pixel.
///
/// Edge blocks that run past the source are averaged over the pixels they
/// actually cover.
fn box_subsample(src: &RasterBuffer, factor: SampleFactor) -> Result<RasterBuffer, AllocError> {
    let s = factor.get();
    let (w, h) = src.dimensions();
    let (out_w, out_h) = factor.apply(w, h);
    let format = src.format();
    let bpp = format.bytes_per_pixel() as usize;
    let requested = raw_byte_size(out_w, out_h, format.bytes_per_pixel());
    let mut out = try_alloc_pixels(requested)?;
    let pixels = src.pixels();

    for oy in 0..out_h {
        let y0 = oy.saturating_mul(s);
        let y1 = (oy + 1).saturating_mul(s).min(h);
        for ox in 0..out_w {
            let x0 = ox.saturating_mul(s);
            let x1 = (ox + 1).saturating_mul(s).min(w);
            let mut acc = [0u64; 4];
            for y in y0..y1 {
                let row = y as usize * w as usize;
                for x in x0..x1 {
                    let i = (row + x as usize) * bpp;
                    for (c, sum) in acc.iter_mut().enumerate().take(bpp) {
                        *sum += pixels[i + c] as u64;
                    }
                }
            }
            let count = ((y1 - y0) as u64 * (x1 - x0) as u64).max(1);
            let d = (oy as usize * out_w as usize + ox as usize) * bpp;
            for c in 0..bpp {
                out[d + c] = ((acc[c] + count / 2) / count) as u8;
            }
        }
    }

    RasterBuffer::from_pixels(out_w, out_h, format, out).ok_or(AllocError { requested })
}

fn resize_alg(filter: ResizeFilter) -> fr::ResizeAlg {
    match filter {
        ResizeFilter::Nearest => fr::ResizeAlg::Nearest,
        ResizeFilter::Bilinear => fr::ResizeAlg::Convolution(fr::FilterType::Bilinear),
        ResizeFilter::CatmullRom => fr::ResizeAlg::Convolution(fr::FilterType::CatmullRom),
        ResizeFilter::Lanczos3 => fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3),
    }
}

fn pixel_type(format: PixelFormat) -> fr::PixelType {
    match format {
        PixelFormat::Rgb8 => fr::PixelType::U8x3,
        PixelFormat::Rgba8 => fr::PixelType::U8x4,
    }
}

fn resample(
    raster: &RasterBuffer,
    width: u32,
    height: u32,
    filter: ResizeFilter,
) -> Result<RasterBuffer, AttemptError> {
    let format = raster.format();
    let kind = pixel_type(format);
    let src = fr::images::ImageRef::new(raster.width(), raster.height(), raster.pixels(), kind)
        .map_err(|e| BackendError::ProcessingFailed(format!("source buffer: {e}")))?;
    let buffer = try_alloc_pixels(raw_byte_size(width, height, format.bytes_per_pixel())).map_err(oom)?;
    let mut dst = fr::images::Image::from_vec_u8(width, height, buffer, kind)
        .map_err(|e| BackendError::ProcessingFailed(format!("destination buffer: {e}")))?;

    let options = fr::ResizeOptions::new().resize_alg(resize_alg(filter));
    fr::Resizer::new()
        .resize(&src, &mut dst, Some(&options))
        .map_err(|e| BackendError::ProcessingFailed(format!("resize failed: {e}")))?;

    RasterBuffer::from_pixels(width, height, format, dst.into_vec()).ok_or_else(|| {
        AttemptError::Backend(BackendError::ProcessingFailed(
            "resize produced a buffer of the wrong size".to_string(),
        ))
    })
}

/// Outcome of the libjpeg-turbo path.
enum JpegDecode {
    Decoded(RasterBuffer),
    /// The stream is one libjpeg-turbo cannot handle; the generic decoder gets a turn.
    Refused(String),
}

/// Split a sample factor into the DCT scale libjpeg-turbo applies and the
/// box factor left over after it.
fn dct_split(factor: SampleFactor) -> (ScalingFactor, SampleFactor) {
    match factor.get() {
        1 => (ScalingFactor::ONE, SampleFactor::ONE),
        2 => (ScalingFactor::ONE_HALF, SampleFactor::ONE),
        4 => (ScalingFactor::ONE_QUARTER, SampleFactor::ONE),
        n => (ScalingFactor::ONE_EIGHTH, SampleFactor::new(n / 8)),
    }
}

fn turbo_format(format: PixelFormat) -> turbojpeg::PixelFormat {
    match format {
        PixelFormat::Rgb8 => turbojpeg::PixelFormat::RGB,
        PixelFormat::Rgba8 => turbojpeg::PixelFormat::RGBA,
    }
}

impl RustBackend {
    /// Decode a JPEG at reduced scale without materializing the full raster.
    fn decode_jpeg_scaled(
        &self,
        data: &[u8],
        factor: SampleFactor,
        format: PixelFormat,
    ) -> Result<JpegDecode, AttemptError> {
        let refused = |e: turbojpeg::Error| -> Result<JpegDecode, AttemptError> {
            Ok(JpegDecode::Refused(e.to_string()))
        };
        let mut decompressor = match turbojpeg::Decompressor::new() {
            Ok(d) => d,
            Err(e) => return refused(e),
        };
        let header = match decompressor.read_header(data) {
            Ok(h) => h,
            Err(e) => return refused(e),
        };
        let (dct, rest) = dct_split(factor);
        if dct != ScalingFactor::ONE {
            if let Err(e) = decompressor.set_scaling_factor(dct) {
                return refused(e);
            }
        }

        let scaled = header.scaled(dct);
        let (Ok(width), Ok(height)) = (u32::try_from(scaled.width), u32::try_from(scaled.height)) else {
            return Ok(JpegDecode::Refused("dimensions out of range".to_string()));
        };
        let requested = raw_byte_size(width, height, format.bytes_per_pixel());
        if requested > self.alloc_limit {
            return Err(AttemptError::OutOfMemory);
        }
        let mut pixels = try_alloc_pixels(requested).map_err(oom)?;
        let image = turbojpeg::Image {
            pixels: pixels.as_mut_slice(),
            width: scaled.width,
            pitch: scaled.width * format.bytes_per_pixel() as usize,
            height: scaled.height,
            format: turbo_format(format),
        };
        if let Err(e) = decompressor.decompress(data, image) {
            return refused(e);
        }

        let raster = RasterBuffer::from_pixels(width, height, format, pixels).ok_or_else(|| {
            AttemptError::Backend(BackendError::ProcessingFailed(
                "JPEG decode produced a buffer of the wrong size".to_string(),
            ))
        })?;
        if rest == SampleFactor::ONE {
            return Ok(JpegDecode::Decoded(raster));
        }
        box_subsample(&raster, rest).map(JpegDecode::Decoded).map_err(oom)
    }
}

impl ImageBackend for RustBackend {
    fn probe(&self, source: &ImageSource) -> Result<SourceHeader, BackendError> {
        let reader = ImageReader::new(source.open()?).with_guessed_format()?;
        if reader.format().is_none() {
            return Err(BackendError::Unsupported(format!(
                "{}: unrecognized image format",
                source.label()
            )));
        }
        let (width, height) = reader.into_dimensions().map_err(backend_error)?;
        let mime = source.mime_type()?;
        Ok(SourceHeader {
            width,
            height,
            mime,
        })
    }

    fn decode_sampled(
        &self,
        source: &ImageSource,
        _header: &SourceHeader,
        factor: SampleFactor,
        format: PixelFormat,
    ) -> Result<RasterBuffer, AttemptError> {
        if source.sniff_format().map_err(BackendError::Io)? == Some(ImageFormat::Jpeg) {
            let data = source.read_all().map_err(BackendError::Io)?;
            match self.decode_jpeg_scaled(&data, factor, format)? {
                JpegDecode::Decoded(raster) => return Ok(raster),
                JpegDecode::Refused(reason) => {
                    log::debug!("{}: libjpeg-turbo refused ({}), using generic decoder", source.label(), reason);
                }
            }
        }

        let opened = source.open().map_err(BackendError::Io)?;
        let mut reader = ImageReader::new(opened)
            .with_guessed_format()
            .map_err(BackendError::Io)?;
        let mut limits = Limits::default();
        limits.max_alloc = Some(self.alloc_limit);
        reader.limits(limits);

        let decoded = reader.decode().map_err(attempt_error)?;
        let full = RasterBuffer::from_dynamic(decoded, format);
        if factor == SampleFactor::ONE {
            return Ok(full);
        }
        box_subsample(&full, factor).map_err(oom)
    }

    fn read_orientation(&self, source: &ImageSource) -> Result<Orientation, BackendError> {
        match source.sniff_format()? {
            Some(format) if EXIF_CONTAINERS.contains(&format) => {}
            _ => return Ok(Orientation::Normal),
        }
        let mut reader = source.open()?;
        match exif::Reader::new().read_from_container(&mut reader) {
            Ok(exif) => Ok(exif
                .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
                .map(Orientation::from_exif)
                .unwrap_or_default()),
            Err(exif::Error::NotFound(_)) => Ok(Orientation::Normal),
            Err(exif::Error::Io(e)) => Err(BackendError::Io(e)),
            Err(e) => Err(BackendError::ProcessingFailed(format!("EXIF: {e}"))),
        }
    }

    fn reorient(
        &self,
        raster: RasterBuffer,
        orientation: Orientation,
    ) -> Result<RasterBuffer, Untouched> {
        match remap(&raster, orientation) {
            Ok(upright) => Ok(upright),
            Err(_) => Err(Untouched {
                raster,
                reason: AttemptError::OutOfMemory,
            }),
        }
    }

    fn resize(
        &self,
        raster: RasterBuffer,
        width: u32,
        height: u32,
        filter: ResizeFilter,
    ) -> Result<RasterBuffer, Untouched> {
        match resample(&raster, width, height, filter) {
            Ok(scaled) => Ok(scaled),
            Err(reason) => Err(Untouched { raster, reason }),
        }
    }

    fn encode_jpeg(&self, raster: &RasterBuffer, quality: Quality) -> Result<Vec<u8>, AttemptError> {
        if raster.format().has_alpha() {
            return Err(BackendError::Unsupported("JPEG cannot carry an alpha channel".to_string()).into());
        }
        let mut buf = Vec::new();
        buf.try_reserve(raster.pixels().len() / 4)
            .map_err(|_| AttemptError::OutOfMemory)?;
        let quality = quality.value().min(100) as u8;
        JpegEncoder::new_with_quality(&mut buf, quality)
            .write_image(
                raster.pixels(),
                raster.width(),
                raster.height(),
                ExtendedColorType::Rgb8,
            )
            .map_err(attempt_error)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        encode_png, jpeg_bytes, noise_rgb, png_bytes, with_exif_orientation,
    };
    use std::path::Path;

    fn memory(bytes: Vec<u8>) -> ImageSource {
        ImageSource::from_bytes("test", bytes)
    }

    #[test]
    fn probe_synthetic_jpeg() {
        let backend = RustBackend::new();
        let header = backend.probe(&memory(jpeg_bytes(200, 150, 90))).unwrap();
        assert_eq!((header.width, header.height), (200, 150));
        assert_eq!(header.mime.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn probe_prefers_declared_mime() {
        let backend = RustBackend::new();
        let source = memory(png_bytes(8, 8)).with_mime("image/x-custom");
        let header = backend.probe(&source).unwrap();
        assert_eq!(header.mime.as_deref(), Some("image/x-custom"));
    }

    #[test]
    fn probe_nonexistent_file_is_io_error() {
        let backend = RustBackend::new();
        let result = backend.probe(&ImageSource::from_path(Path::new("/nonexistent/image.jpg")));
        assert!(matches!(result, Err(BackendError::Io(_))));
    }

    #[test]
    fn probe_garbage_is_unsupported() {
        let backend = RustBackend::new();
        let result = backend.probe(&memory(b"plain text, not pixels".to_vec()));
        assert!(matches!(result, Err(BackendError::Unsupported(_))));
    }

    #[test]
    fn decode_full_resolution() {
        let backend = RustBackend::new();
        let source = memory(jpeg_bytes(64, 48, 90));
        let header = backend.probe(&source).unwrap();
        let raster = backend
            .decode_sampled(&source, &header, SampleFactor::ONE, PixelFormat::Rgb8)
            .unwrap();
        assert_eq!(raster.dimensions(), (64, 48));
        assert_eq!(raster.format(), PixelFormat::Rgb8);
    }

    #[test]
    fn decode_with_sample_factor() {
        let backend = RustBackend::new();
        let source = memory(jpeg_bytes(64, 48, 90));
        let header = backend.probe(&source).unwrap();
        let raster = backend
            .decode_sampled(&source, &header, SampleFactor::new(4), PixelFormat::Rgb8)
            .unwrap();
        assert_eq!(raster.dimensions(), (16, 12));
    }

    #[test]
    fn decode_png_keeps_alpha() {
        let backend = RustBackend::new();
        let source = memory(png_bytes(10, 10));
        let header = backend.probe(&source).unwrap();
        let raster = backend
            .decode_sampled(&source, &header, SampleFactor::ONE, PixelFormat::Rgba8)
            .unwrap();
        assert_eq!(raster.format(), PixelFormat::Rgba8);
        assert_eq!(raster.byte_size(), 400);
    }

    #[test]
    fn decode_over_alloc_limit_is_oom() {
        let backend = RustBackend::with_alloc_limit(1024);
        let source = memory(jpeg_bytes(256, 256, 90));
        let header = backend.probe(&source).unwrap();
        let result = backend.decode_sampled(&source, &header, SampleFactor::ONE, PixelFormat::Rgb8);
        assert!(matches!(result, Err(AttemptError::OutOfMemory)));
    }

    #[test]
    fn jpeg_decodes_at_reduced_scale_under_a_cap() {
        // 1024x1024 RGB is 3 MiB at full size and 768 KiB at half size.
        let backend = RustBackend::with_alloc_limit(1024 * 1024);
        let source = memory(jpeg_bytes(1024, 1024, 90));
        let header = backend.probe(&source).unwrap();

        let full = backend.decode_sampled(&source, &header, SampleFactor::ONE, PixelFormat::Rgb8);
        assert!(matches!(full, Err(AttemptError::OutOfMemory)));

        let half = backend
            .decode_sampled(&source, &header, SampleFactor::new(2), PixelFormat::Rgb8)
            .unwrap();
        assert_eq!(half.dimensions(), (512, 512));
    }

    #[test]
    fn jpeg_factor_beyond_dct_range_is_box_sampled() {
        let backend = RustBackend::new();
        let source = memory(jpeg_bytes(256, 128, 90));
        let header = backend.probe(&source).unwrap();
        let raster = backend
            .decode_sampled(&source, &header, SampleFactor::new(16), PixelFormat::Rgb8)
            .unwrap();
        assert_eq!(raster.dimensions(), (16, 8));
    }

    #[test]
    fn jpeg_decodes_into_rgba_layout() {
        let backend = RustBackend::new();
        let source = memory(jpeg_bytes(64, 32, 90));
        let header = backend.probe(&source).unwrap();
        let raster = backend
            .decode_sampled(&source, &header, SampleFactor::new(2), PixelFormat::Rgba8)
            .unwrap();
        assert_eq!(raster.dimensions(), (32, 16));
        assert!(raster.pixels().chunks_exact(4).all(|p| p[3] == 255));
    }

    #[test]
    fn dct_split_caps_at_one_eighth() {
        let split = |n| dct_split(SampleFactor::new(n));
        let cases = [
            (1, ScalingFactor::ONE, 1),
            (2, ScalingFactor::ONE_HALF, 1),
            (4, ScalingFactor::ONE_QUARTER, 1),
            (8, ScalingFactor::ONE_EIGHTH, 1),
            (64, ScalingFactor::ONE_EIGHTH, 8),
        ];
        for (factor, dct, rest) in cases {
            let (got_dct, got_rest) = split(factor);
            assert!(got_dct == dct, "factor {factor}");
            assert_eq!(got_rest.get(), rest, "factor {factor}");
        }
    }

    #[test]
    fn truncated_png_is_processing_failure() {
        let backend = RustBackend::new();
        let mut bytes = encode_png(&noise_rgb(64, 64, 9));
        bytes.truncate(bytes.len() / 2);
        let source = memory(bytes);
        let header = backend.probe(&source).unwrap();
        let result = backend.decode_sampled(&source, &header, SampleFactor::ONE, PixelFormat::Rgba8);
        assert!(matches!(
            result,
            Err(AttemptError::Backend(BackendError::ProcessingFailed(_)))
        ));
    }

    #[test]
    fn box_subsample_averages_blocks() {
        // 4x2 RGB: left 2x2 block all 10, right 2x2 block all 30, with one 50 in it
        #[rustfmt::skip]
        let pixels = vec![
            10,10,10, 10,10,10, 30,30,30, 50,50,50,
            10,10,10, 10,10,10, 30,30,30, 30,30,30,
        ];
        let src = RasterBuffer::from_pixels(4, 2, PixelFormat::Rgb8, pixels).unwrap();
        let out = box_subsample(&src, SampleFactor::new(2)).unwrap();
        assert_eq!(out.dimensions(), (2, 1));
        assert_eq!(out.pixels(), &[10, 10, 10, 35, 35, 35]);
    }

    #[test]
    fn box_subsample_factor_larger_than_image() {
        let src = RasterBuffer::from_pixels(3, 1, PixelFormat::Rgb8, vec![0, 0, 0, 30, 30, 30, 60, 60, 60])
            .unwrap();
        let out = box_subsample(&src, SampleFactor::new(8)).unwrap();
        assert_eq!(out.dimensions(), (1, 1));
        assert_eq!(out.pixels(), &[30, 30, 30]);
    }

    #[test]
    fn orientation_from_exif_segment() {
        let backend = RustBackend::new();
        let tagged = with_exif_orientation(jpeg_bytes(20, 10, 90), 6);
        assert_eq!(backend.read_orientation(&memory(tagged)).unwrap(), Orientation::Rotate90);
    }

    #[test]
    fn orientation_missing_is_normal() {
        let backend = RustBackend::new();
        assert_eq!(
            backend.read_orientation(&memory(jpeg_bytes(20, 10, 90))).unwrap(),
            Orientation::Normal
        );
        assert_eq!(
            backend.read_orientation(&memory(png_bytes(4, 4))).unwrap(),
            Orientation::Normal
        );
    }

    #[test]
    fn resize_exact_dimensions() {
        let backend = RustBackend::new();
        let img = noise_rgb(120, 80, 7);
        let raster = RasterBuffer::from_pixels(120, 80, PixelFormat::Rgb8, img.into_raw()).unwrap();
        for filter in [
            ResizeFilter::Nearest,
            ResizeFilter::Bilinear,
            ResizeFilter::CatmullRom,
            ResizeFilter::Lanczos3,
        ] {
            let src = RasterBuffer::from_pixels(120, 80, PixelFormat::Rgb8, raster.pixels().to_vec())
                .unwrap();
            let out = backend.resize(src, 60, 40, filter).unwrap();
            assert_eq!(out.dimensions(), (60, 40));
            assert_eq!(out.byte_size(), 60 * 40 * 3);
        }
    }

    #[test]
    fn encode_produces_decodable_jpeg() {
        let backend = RustBackend::new();
        let raster =
            RasterBuffer::from_pixels(32, 16, PixelFormat::Rgb8, noise_rgb(32, 16, 1).into_raw())
                .unwrap();
        let bytes = backend.encode_jpeg(&raster, Quality::new(80)).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
    }

    #[test]
    fn encode_rejects_alpha() {
        let backend = RustBackend::new();
        let raster = RasterBuffer::from_pixels(1, 1, PixelFormat::Rgba8, vec![0; 4]).unwrap();
        let result = backend.encode_jpeg(&raster, Quality::new(80));
        assert!(matches!(result, Err(AttemptError::Backend(_))));
    }
}
