//! Pure calculation functions for image dimensions and memory sizing.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::{DecodeBounds, SampleFactor};

/// Calculate the decode sample factor for a source of `source` dimensions.
///
/// Two passes:
///
/// 1. Keep doubling while halving the source *again* would still leave both
///    axes at or above the requested bounds. This picks the largest power of
///    two that keeps the decoded image at or slightly above `bounds`; the
///    scaler does the exact final sizing.
/// 2. Keep doubling while either effective axis is still above
///    `hard_ceiling`, regardless of `bounds`. This protects against
///    panoramas and sensor-sized inputs that pass the first check with a
///    still-huge buffer.
///
/// # Examples
/// ```
/// # use squish::imaging::{DecodeBounds, calculate_sample_factor};
/// let plan = calculate_sample_factor((7680, 4320), DecodeBounds::new(1920, 1080), 4096);
/// assert_eq!(plan.get(), 4);
///
/// // The first pass stops at 2, the 4096px ceiling bumps it to 4.
/// let plan = calculate_sample_factor((10000, 10000), DecodeBounds::new(4000, 4000), 4096);
/// assert_eq!(plan.get(), 4);
/// ```
pub fn calculate_sample_factor(
    source: (u32, u32),
    bounds: DecodeBounds,
    hard_ceiling: u32,
) -> SampleFactor {
    let (width, height) = source;
    let mut factor = SampleFactor::ONE;

    if width > bounds.width || height > bounds.height {
        let half_width = width / 2;
        let half_height = height / 2;
        while half_width / factor.get() >= bounds.width
            && half_height / factor.get() >= bounds.height
        {
            let next = factor.doubled();
            if next == factor {
                break;
            }
            factor = next;
        }
    }

    let ceiling = hard_ceiling.max(1);
    while width / factor.get() > ceiling || height / factor.get() > ceiling {
        let next = factor.doubled();
        if next == factor {
            break;
        }
        factor = next;
    }

    factor
}

/// Calculate the aspect-preserving target size for a raster that exceeds
/// `bounds`.
///
/// Returns `None` when the raster already fits (the scaler is then a no-op).
/// Otherwise the longer axis is pinned to its bound and the other axis is
/// derived from the aspect ratio. Landscape and square sources pin the
/// width; portrait sources pin the height. Only the pinned axis is
/// guaranteed to be within its bound.
pub fn calculate_fit_dimensions(source: (u32, u32), bounds: DecodeBounds) -> Option<(u32, u32)> {
    let (width, height) = source;
    if bounds.contains(width, height) {
        return None;
    }

    let aspect = width as f64 / height.max(1) as f64;
    let (target_w, target_h) = if width >= height {
        let h = (bounds.width as f64 / aspect).round() as u32;
        (bounds.width, h)
    } else {
        let w = (bounds.height as f64 * aspect).round() as u32;
        (w, bounds.height)
    };

    Some((target_w.max(1), target_h.max(1)))
}

/// Raw in-memory size of a `width x height` raster.
pub fn raw_byte_size(width: u32, height: u32, bytes_per_pixel: u32) -> u64 {
    (width as u64)
        .saturating_mul(height as u64)
        .saturating_mul(bytes_per_pixel as u64)
}

/// Estimated transient peak for encoding a raster of `raw_bytes`.
///
/// The encode stage holds the source raster, an opaque working copy when
/// alpha has to be flattened, and up to two in-flight encoded streams.
pub fn estimate_peak_bytes(raw_bytes: u64, multiplier: u32) -> u64 {
    raw_bytes.saturating_mul(multiplier as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CEILING: u32 = 4096;

    fn hd() -> DecodeBounds {
        DecodeBounds::new(1920, 1080)
    }

    // =========================================================================
    // calculate_sample_factor tests
    // =========================================================================

    #[test]
    fn sample_smaller_than_bounds() {
        assert_eq!(calculate_sample_factor((1000, 500), hd(), CEILING).get(), 1);
    }

    #[test]
    fn sample_exact_bounds() {
        assert_eq!(calculate_sample_factor((1920, 1080), hd(), CEILING).get(), 1);
    }

    #[test]
    fn sample_double_bounds_keeps_image_at_bound() {
        // half = 1920x1080 >= bounds → 2; 960 < 1920 stops
        let factor = calculate_sample_factor((3840, 2160), hd(), CEILING);
        assert_eq!(factor.get(), 2);
        assert_eq!(factor.apply(3840, 2160), (1920, 1080));
    }

    #[test]
    fn sample_quadruple_bounds() {
        let factor = calculate_sample_factor((7680, 4320), hd(), CEILING);
        assert_eq!(factor.get(), 4);
        assert_eq!(factor.apply(7680, 4320), (1920, 1080));
    }

    #[test]
    fn sample_ceiling_bumps_factor() {
        // First pass: 5000/1 >= 4000 → 2; 5000/2 < 4000 stops. 10000/2 > 4096 → 4.
        let factor = calculate_sample_factor((10000, 10000), DecodeBounds::new(4000, 4000), CEILING);
        assert_eq!(factor.get(), 4);
        assert_eq!(factor.apply(10000, 10000), (2500, 2500));
    }

    #[test]
    fn sample_panorama_needs_several_ceiling_doublings() {
        // Height is tiny so the first pass never runs; width alone drives it.
        let factor = calculate_sample_factor((40000, 800), hd(), CEILING);
        assert_eq!(factor.get(), 16);
        assert!(40000 / factor.get() <= CEILING);
    }

    #[test]
    fn sample_one_axis_over_bound_only() {
        // Width exceeds, but halving leaves height below bound → no sampling.
        assert_eq!(calculate_sample_factor((4000, 1000), hd(), CEILING).get(), 1);
    }

    proptest! {
        #[test]
        fn sample_factor_invariants(
            w in 1u32..200_000,
            h in 1u32..200_000,
            bw in 1u32..8_000,
            bh in 1u32..8_000,
        ) {
            let factor = calculate_sample_factor((w, h), DecodeBounds::new(bw, bh), CEILING);
            let s = factor.get();
            prop_assert!(s.is_power_of_two());
            prop_assert!(w / s <= CEILING);
            prop_assert!(h / s <= CEILING);
            // Minimality: the last doubling was required by one of the passes.
            if s > 1 {
                let prev = s / 2;
                let bound_pass = (w / 2) / prev >= bw && (h / 2) / prev >= bh;
                let ceiling_pass = w / prev > CEILING || h / prev > CEILING;
                prop_assert!(bound_pass || ceiling_pass);
            }
        }
    }

    // =========================================================================
    // calculate_fit_dimensions tests
    // =========================================================================

    #[test]
    fn fit_within_bounds_is_noop() {
        assert_eq!(calculate_fit_dimensions((1200, 800), hd()), None);
        assert_eq!(calculate_fit_dimensions((1920, 1080), hd()), None);
    }

    #[test]
    fn fit_landscape_pins_width() {
        // 3000x2000 (3:2) → 1920 x 1280
        assert_eq!(calculate_fit_dimensions((3000, 2000), hd()), Some((1920, 1280)));
    }

    #[test]
    fn fit_portrait_pins_height() {
        // 2000x4000 (1:2) → 540 x 1080
        assert_eq!(calculate_fit_dimensions((2000, 4000), hd()), Some((540, 1080)));
    }

    #[test]
    fn fit_square_pins_width() {
        assert_eq!(calculate_fit_dimensions((2500, 2500), hd()), Some((1920, 1920)));
    }

    #[test]
    fn fit_rounds_instead_of_truncating() {
        // 1999/1000 aspect; 1920 / 1.999 = 960.48 → 960
        assert_eq!(calculate_fit_dimensions((1999, 1000), hd()), Some((1920, 960)));
        // 1000x3001 → 1080 * 0.33322 = 359.88 → 360
        assert_eq!(calculate_fit_dimensions((1000, 3001), hd()), Some((360, 1080)));
    }

    #[test]
    fn fit_extreme_strip_never_zero() {
        assert_eq!(calculate_fit_dimensions((100_000, 1), hd()), Some((1920, 1)));
    }

    proptest! {
        #[test]
        fn fit_preserves_aspect(w in 1u32..20_000, h in 1u32..20_000) {
            let bounds = hd();
            match calculate_fit_dimensions((w, h), bounds) {
                None => prop_assert!(bounds.contains(w, h)),
                Some((tw, th)) => {
                    if w >= h {
                        prop_assert_eq!(tw, bounds.width);
                    } else {
                        prop_assert_eq!(th, bounds.height);
                    }
                    // Rounding error on the derived axis is at most half a pixel
                    // (plus the 1px floor).
                    let derived_w = th as f64 * w as f64 / h as f64;
                    let derived_h = tw as f64 * h as f64 / w as f64;
                    if w >= h {
                        prop_assert!((th as f64 - derived_h).abs() <= 1.0);
                    } else {
                        prop_assert!((tw as f64 - derived_w).abs() <= 1.0);
                    }
                }
            }
        }
    }

    // =========================================================================
    // memory sizing tests
    // =========================================================================

    #[test]
    fn raw_size_multiplies_channels() {
        assert_eq!(raw_byte_size(1200, 800, 3), 2_880_000);
        assert_eq!(raw_byte_size(10, 10, 4), 400);
    }

    #[test]
    fn peak_estimate_saturates() {
        assert_eq!(estimate_peak_bytes(100, 3), 300);
        assert_eq!(estimate_peak_bytes(u64::MAX, 3), u64::MAX);
    }
}
