//! Aspect-preserving downscale to the requested bounds.
//!
//! Decode-time sampling only gets within a factor of two of the bounds; this
//! stage does the exact final sizing. Rasters that already fit pass through
//! without any allocation. If the resampled buffer cannot be allocated the
//! input is returned as-is and the pipeline continues at the larger size.

use super::backend::ImageBackend;
use super::calculations::calculate_fit_dimensions;
use super::params::{DecodeBounds, ResizeFilter};
use super::raster::RasterBuffer;

/// Shrink `raster` so its longer axis matches `bounds`.
pub fn fit_within(
    backend: &impl ImageBackend,
    raster: RasterBuffer,
    bounds: DecodeBounds,
    filter: ResizeFilter,
) -> RasterBuffer {
    let Some((width, height)) = calculate_fit_dimensions(raster.dimensions(), bounds) else {
        return raster;
    };

    log::debug!(
        "scaling {}x{} -> {}x{} ({:?})",
        raster.width(),
        raster.height(),
        width,
        height,
        filter
    );
    match backend.resize(raster, width, height, filter) {
        Ok(scaled) => scaled,
        Err(untouched) => {
            log::warn!(
                "scaling skipped, keeping {}x{}: {}",
                untouched.raster.width(),
                untouched.raster.height(),
                untouched.reason
            );
            untouched.raster
        }
    }
}
