//! Iterative target-size JPEG encoding.
//!
//! Search order:
//!
//! 1. Encode once at the ceiling quality. If that already fits the target,
//!    it is the result.
//! 2. Otherwise binary-search `[min, ceiling - 1]`, keeping the highest
//!    quality that fits, for at most `max_iterations` encodes.
//! 3. If nothing fits, encode at the minimum quality and accept it whatever
//!    its size.
//!
//! Running out of memory at any search quality counts as "too large" and the
//! search moves down. Only a failure at the final fallback is fatal.
//!
//! At most two encoded buffers are alive at once: the best fit so far and
//! the one being evaluated.

use super::backend::{AttemptError, ImageBackend};
use super::params::{Quality, QualityRange};
use super::raster::RasterBuffer;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Background that transparent pixels are composited over before encoding.
pub const FLATTEN_BACKGROUND: [u8; 3] = [255, 255, 255];

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("out of memory encoding at {quality}")]
    OutOfMemory { quality: Quality },
    #[error("cannot encode image: {0}")]
    Failed(String),
    #[error("cannot write {}: {source}", dir.display())]
    Write {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Knobs for the target-size search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub target_size: u64,
    pub range: QualityRange,
    pub max_iterations: u32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            target_size: 2 * 1024 * 1024,
            range: QualityRange::default(),
            max_iterations: 10,
        }
    }
}

/// How the final quality was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SearchOutcome {
    /// The ceiling quality already fit.
    Ceiling,
    /// The binary search found a fitting quality.
    Searched { iterations: u32 },
    /// Nothing fit; the minimum quality was used regardless of size.
    Fallback { iterations: u32 },
}

impl SearchOutcome {
    /// Whether the artifact is known to be within the target size.
    pub fn within_target(self) -> bool {
        !matches!(self, SearchOutcome::Fallback { .. })
    }
}

/// The chosen JPEG stream.
#[derive(Debug)]
pub struct EncodedArtifact {
    pub bytes: Vec<u8>,
    pub quality: Quality,
    pub outcome: SearchOutcome,
    /// Total encoder invocations including the ceiling and fallback.
    pub encode_calls: u32,
}

/// Per-quality verdict during the search.
enum Probe {
    Fits(Vec<u8>),
    TooLarge,
}

fn try_quality(
    backend: &impl ImageBackend,
    raster: &RasterBuffer,
    quality: Quality,
    target: u64,
) -> Result<Probe, EncodeError> {
    match backend.encode_jpeg(raster, quality) {
        Ok(bytes) => {
            let fits = bytes.len() as u64 <= target;
            log::debug!(
                "{}: {} bytes ({})",
                quality,
                bytes.len(),
                if fits { "fits" } else { "too large" }
            );
            Ok(if fits { Probe::Fits(bytes) } else { Probe::TooLarge })
        }
        Err(AttemptError::OutOfMemory) => {
            log::warn!("{}: out of memory, treating as too large", quality);
            Ok(Probe::TooLarge)
        }
        Err(AttemptError::Backend(e)) => Err(EncodeError::Failed(e.to_string())),
    }
}

/// Encode `raster` as JPEG at the highest quality that fits the target.
///
/// Transparent rasters are flattened over [`FLATTEN_BACKGROUND`] first.
pub fn encode_to_target(
    backend: &impl ImageBackend,
    raster: RasterBuffer,
    options: &EncodeOptions,
) -> Result<EncodedArtifact, EncodeError> {
    let ceiling = options.range.max;
    let floor = options.range.min;
    let raster = raster
        .flatten_alpha(FLATTEN_BACKGROUND)
        .map_err(|_| EncodeError::OutOfMemory { quality: ceiling })?;

    let mut calls = 1;
    if let Probe::Fits(bytes) = try_quality(backend, &raster, ceiling, options.target_size)? {
        return Ok(EncodedArtifact {
            bytes,
            quality: ceiling,
            outcome: SearchOutcome::Ceiling,
            encode_calls: calls,
        });
    }

    let mut low = floor.value();
    let mut high = ceiling.value().saturating_sub(1);
    let mut iterations = 0;
    let mut best: Option<(Quality, Vec<u8>)> = None;

    while low <= high && iterations < options.max_iterations {
        let mid = low + (high - low) / 2;
        iterations += 1;
        calls += 1;
        match try_quality(backend, &raster, Quality::new(mid), options.target_size)? {
            Probe::Fits(bytes) => {
                best = Some((Quality::new(mid), bytes));
                low = mid + 1;
            }
            // mid >= 1 because Quality clamps the floor
            Probe::TooLarge => high = mid - 1,
        }
    }

    if let Some((quality, bytes)) = best {
        return Ok(EncodedArtifact {
            bytes,
            quality,
            outcome: SearchOutcome::Searched { iterations },
            encode_calls: calls,
        });
    }

    calls += 1;
    log::warn!(
        "no quality in [{}, {}] fits {} bytes, falling back to {}",
        floor,
        ceiling,
        options.target_size,
        floor
    );
    let bytes = match backend.encode_jpeg(&raster, floor) {
        Ok(bytes) => bytes,
        Err(AttemptError::OutOfMemory) => return Err(EncodeError::OutOfMemory { quality: floor }),
        Err(AttemptError::Backend(e)) => return Err(EncodeError::Failed(e.to_string())),
    };
    Ok(EncodedArtifact {
        bytes,
        quality: floor,
        outcome: SearchOutcome::Fallback { iterations },
        encode_calls: calls,
    })
}

/// Write `bytes` to a new uniquely named `.jpg` file in `dir`.
///
/// The file is created under a temporary name and only kept once every byte
/// is written; on any error nothing is left behind.
pub fn write_artifact(bytes: &[u8], dir: &Path, prefix: &str) -> Result<PathBuf, EncodeError> {
    let write_err = |source: std::io::Error| EncodeError::Write {
        dir: dir.to_path_buf(),
        source,
    };
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".jpg")
        .tempfile_in(dir)
        .map_err(write_err)?;
    file.write_all(bytes).map_err(write_err)?;
    file.flush().map_err(write_err)?;
    let (_, path) = file.keep().map_err(|e| write_err(e.error))?;
    Ok(path)
}
