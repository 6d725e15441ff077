//! Compression configuration.
//!
//! Handles loading, validating, and merging `squish.toml`. Stock defaults are
//! the base layer; a user file only needs the keys it wants to change.
//!
//! ## Config File Location
//!
//! `squish.toml` in the current directory, or any file passed with
//! `--config`. Without either, the stock defaults apply.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [bounds]
//! max_width = 1920          # Output envelope
//! max_height = 1080
//! hard_ceiling = 4096       # No decoded axis may exceed this
//! resize_filter = "lanczos3"
//!
//! [decode]
//! max_attempts = 6          # Out-of-memory retries
//! max_sample_factor = 64
//! alloc_limit_bytes = 536870912
//!
//! [encode]
//! target_size_bytes = 2097152
//! min_quality = 50
//! max_quality = 95
//! quality_step = 5          # Reserved; the binary search ignores it
//! max_iterations = 10
//!
//! [memory]
//! peak_multiplier = 3
//! headroom_factor = 0.5
//!
//! [output]
//! dir = "/tmp/squish"       # Omit for the system temp dir
//! file_prefix = "compressed_image_"
//!
//! [processing]
//! max_processes = 4         # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::ResizeFilter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "squish.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Invalid byte size {0:?}: expected e.g. 2097152, 500KiB, 2MiB or 1.5M")]
    ByteSize(String),
}

/// Compression configuration loaded from `squish.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressConfig {
    /// Output envelope and resampling.
    pub bounds: BoundsConfig,
    /// Decode retry policy.
    pub decode: DecodeConfig,
    /// Target-size search.
    pub encode: EncodeConfig,
    /// Safety gate thresholds.
    pub memory: MemoryConfig,
    /// Where artifacts are written.
    pub output: OutputConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl CompressConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Validation(msg.into()));
        let b = &self.bounds;
        if b.max_width == 0 || b.max_height == 0 || b.hard_ceiling == 0 {
            return invalid("bounds.max_width, max_height and hard_ceiling must be non-zero");
        }
        let d = &self.decode;
        if d.max_attempts == 0 {
            return invalid("decode.max_attempts must be at least 1");
        }
        if !d.max_sample_factor.is_power_of_two() {
            return invalid("decode.max_sample_factor must be a power of two");
        }
        if d.alloc_limit_bytes == 0 {
            return invalid("decode.alloc_limit_bytes must be non-zero");
        }
        let e = &self.encode;
        if e.target_size_bytes == 0 {
            return invalid("encode.target_size_bytes must be non-zero");
        }
        if e.min_quality == 0 || e.min_quality > e.max_quality || e.max_quality > 100 {
            return invalid("encode qualities must satisfy 1 <= min_quality <= max_quality <= 100");
        }
        if e.quality_step == 0 {
            return invalid("encode.quality_step must be at least 1");
        }
        if e.max_iterations == 0 {
            return invalid("encode.max_iterations must be at least 1");
        }
        let m = &self.memory;
        if m.peak_multiplier == 0 {
            return invalid("memory.peak_multiplier must be at least 1");
        }
        if !(m.headroom_factor > 0.0 && m.headroom_factor <= 1.0) {
            return invalid("memory.headroom_factor must be in (0, 1]");
        }
        if self.output.file_prefix.contains(['/', '\\']) {
            return invalid("output.file_prefix must not contain path separators");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoundsConfig {
    pub max_width: u32,
    pub max_height: u32,
    /// Absolute per-axis ceiling after decode sampling.
    pub hard_ceiling: u32,
    pub resize_filter: ResizeFilter,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1080,
            hard_ceiling: 4096,
            resize_filter: ResizeFilter::Lanczos3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecodeConfig {
    pub max_attempts: u32,
    pub max_sample_factor: u32,
    /// Largest single allocation a decoder may make.
    pub alloc_limit_bytes: u64,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            max_sample_factor: 64,
            alloc_limit_bytes: 512 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodeConfig {
    pub target_size_bytes: u64,
    pub min_quality: u32,
    pub max_quality: u32,
    /// Step for a linear quality search. Accepted but unused by the binary search.
    pub quality_step: u32,
    pub max_iterations: u32,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            target_size_bytes: 2 * 1024 * 1024,
            min_quality: 50,
            max_quality: 95,
            quality_step: 5,
            max_iterations: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    pub peak_multiplier: u32,
    pub headroom_factor: f64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            peak_multiplier: 3,
            headroom_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Directory for compressed files. `None` means the system temp dir.
    pub dir: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: None,
            file_prefix: "compressed_image_".to_string(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel compression workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

// =============================================================================
// Byte sizes
// =============================================================================

/// Parse a human byte size. Suffixes are binary (`K` = `KiB` = 1024).
///
/// ```
/// # use squish::config::parse_byte_size;
/// assert_eq!(parse_byte_size("2MiB").unwrap(), 2 * 1024 * 1024);
/// assert_eq!(parse_byte_size("500K").unwrap(), 500 * 1024);
/// assert_eq!(parse_byte_size("2097152").unwrap(), 2_097_152);
/// ```
pub fn parse_byte_size(input: &str) -> Result<u64, ConfigError> {
    let err = || ConfigError::ByteSize(input.to_string());
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        _ => return Err(err()),
    };
    let value: f64 = number.parse().map_err(|_| err())?;
    let bytes = (value * multiplier as f64).round();
    if !bytes.is_finite() || bytes < 1.0 || bytes > u64::MAX as f64 {
        return Err(err());
    }
    Ok(bytes as u64)
}

/// Render a byte count with the largest binary unit that keeps it >= 1.
pub fn format_byte_size(bytes: u64) -> String {
    const UNITS: [(&str, u64); 3] = [
        ("GiB", 1024 * 1024 * 1024),
        ("MiB", 1024 * 1024),
        ("KiB", 1024),
    ];
    for (unit, size) in UNITS {
        if bytes >= size {
            let value = bytes as f64 / size as f64;
            return if bytes % size == 0 {
                format!("{} {}", bytes / size, unit)
            } else {
                format!("{value:.1} {unit}")
            };
        }
    }
    format!("{bytes} B")
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(CompressConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<CompressConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: CompressConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `squish.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result. A missing file yields the defaults.
pub fn load_config(dir: &Path) -> Result<CompressConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(&dir.join(CONFIG_FILE_NAME))?;
    resolve_config(base, overlay)
}

/// Load config from an explicit file. Unlike [`load_config`], the file must exist.
pub fn load_config_file(path: &Path) -> Result<CompressConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let overlay: toml::Value = toml::from_str(&content)?;
    resolve_config(stock_defaults_value()?, Some(overlay))
}

/// Returns a fully-commented stock `squish.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# squish configuration
# ====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# squish reads ./squish.toml, or the file given with --config.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Output envelope
# ---------------------------------------------------------------------------
[bounds]
# Images larger than this are scaled down, aspect ratio preserved.
# The longer side is pinned to its bound.
max_width = 1920
max_height = 1080

# No axis of a decoded image may exceed this many pixels, whatever the
# bounds above. Protects against panoramas and sensor-sized inputs.
hard_ceiling = 4096

# Resampling kernel for the final fit: nearest | bilinear | catmull-rom | lanczos3
resize_filter = "lanczos3"

# ---------------------------------------------------------------------------
# Decoding
# ---------------------------------------------------------------------------
[decode]
# When a decode runs out of memory it is retried at double the sample
# factor, at most this many times in total...
max_attempts = 6

# ...and never beyond this sample factor (power of two).
max_sample_factor = 64

# Largest single buffer a decoder may allocate, in bytes.
alloc_limit_bytes = 536870912

# ---------------------------------------------------------------------------
# Encoding
# ---------------------------------------------------------------------------
[encode]
# Output files aim to be at most this many bytes (2 MiB).
target_size_bytes = 2097152

# JPEG quality window. max_quality is tried first; if too large, the
# quality is binary-searched down to min_quality.
min_quality = 50
max_quality = 95

# Reserved for a linear search mode; ignored by the binary search.
quality_step = 5

# Upper bound on binary-search encodes.
max_iterations = 10

# ---------------------------------------------------------------------------
# Memory safety
# ---------------------------------------------------------------------------
[memory]
# Estimated encode peak = raw image bytes x peak_multiplier.
peak_multiplier = 3

# The estimate must stay below available memory x headroom_factor.
headroom_factor = 0.5

# ---------------------------------------------------------------------------
# Output
# ---------------------------------------------------------------------------
[output]
# Directory for compressed files. Omit to use the system temp dir.
# dir = "/tmp/squish"

# File name prefix; a unique suffix and .jpg are appended.
file_prefix = "compressed_image_"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel compression workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
