//! Value types passed between pipeline stages.
//!
//! These describe *what* a stage should do, not *how*. The stage modules
//! ([`decode`](super::decode), [`scale`](super::scale),
//! [`encode`](super::encode)) take them as inputs; the
//! [`backend`](super::backend) only ever sees already-decided values.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100). Clamped on construction.
//! - [`QualityRange`]: `[min, max]` window the target-size search runs in.
//! - [`DecodeBounds`]: Requested maximum width/height for decode and scale.
//! - [`SampleFactor`]: Power-of-two subsampling ratio applied during decode.
//! - [`ResizeFilter`]: Resampling kernel for the scaler.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(95)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Inclusive quality window for the target-size search.
///
/// `max` is the "ceiling" quality tried first; the binary search then runs
/// over `[min, max - 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityRange {
    pub min: Quality,
    pub max: Quality,
}

impl QualityRange {
    /// Build a range, swapping the ends if given backwards.
    pub fn new(min: u32, max: u32) -> Self {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min: Quality::new(lo),
            max: Quality::new(hi),
        }
    }
}

impl Default for QualityRange {
    fn default() -> Self {
        Self::new(50, 95)
    }
}

/// Requested maximum output width/height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeBounds {
    pub width: u32,
    pub height: u32,
}

impl DecodeBounds {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether `(width, height)` already fits inside these bounds.
    pub fn contains(&self, width: u32, height: u32) -> bool {
        width <= self.width && height <= self.height
    }
}

impl Default for DecodeBounds {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

/// Positive power-of-two decode subsampling ratio.
///
/// A factor of `n` turns a `w x h` source into roughly `w/n x h/n` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleFactor(u32);

impl SampleFactor {
    pub const ONE: SampleFactor = SampleFactor(1);

    /// Round `value` up to the next power of two (minimum 1).
    pub fn new(value: u32) -> Self {
        Self(value.max(1).checked_next_power_of_two().unwrap_or(1 << 31))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// The next factor up. Saturates at `2^31`.
    pub fn doubled(self) -> Self {
        Self(self.0.checked_mul(2).unwrap_or(self.0))
    }

    /// Dimensions after applying this factor (integer division, min 1px).
    pub fn apply(self, width: u32, height: u32) -> (u32, u32) {
        ((width / self.0).max(1), (height / self.0).max(1))
    }
}

impl Default for SampleFactor {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for SampleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "1/{}", self.0)
    }
}

/// Resampling kernel used by the scaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeFilter {
    Nearest,
    Bilinear,
    CatmullRom,
    #[default]
    Lanczos3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_range_swaps_reversed_ends() {
        let range = QualityRange::new(95, 50);
        assert_eq!(range.min.value(), 50);
        assert_eq!(range.max.value(), 95);
    }

    #[test]
    fn sample_factor_rounds_to_power_of_two() {
        assert_eq!(SampleFactor::new(0).get(), 1);
        assert_eq!(SampleFactor::new(3).get(), 4);
        assert_eq!(SampleFactor::new(8).get(), 8);
        assert_eq!(SampleFactor::new(9).get(), 16);
    }

    #[test]
    fn sample_factor_apply_never_hits_zero() {
        assert_eq!(SampleFactor::new(4).apply(3840, 2160), (960, 540));
        assert_eq!(SampleFactor::new(64).apply(10, 10), (1, 1));
    }

    #[test]
    fn sample_factor_doubling_saturates() {
        let top = SampleFactor::new(1 << 31);
        assert_eq!(top.doubled(), top);
    }

    #[test]
    fn bounds_contains_is_inclusive() {
        let b = DecodeBounds::default();
        assert!(b.contains(1920, 1080));
        assert!(!b.contains(1921, 1080));
        assert!(!b.contains(1920, 1081));
    }

    #[test]
    fn resize_filter_parses_kebab_case() {
        #[derive(Deserialize)]
        struct Wrap {
            f: ResizeFilter,
        }
        let w: Wrap = toml::from_str(r#"f = "catmull-rom""#).unwrap();
        assert_eq!(w.f, ResizeFilter::CatmullRom);
    }
}
