//! # Squish
//!
//! Turns an arbitrary user-supplied image (unknown format, unknown and
//! possibly enormous dimensions) into a JPEG file that fits a byte budget,
//! without exhausting memory on the way.
//!
//! # Architecture: One Image, Five Stages
//!
//! ```text
//! 1. Decode    source  →  raster     (power-of-two subsampling, OOM retry)
//! 2. Orient    raster  →  raster     (EXIF orientation applied to pixels)
//! 3. Scale     raster  →  raster     (longer side fitted to the bounds)
//! 4. Check     raster  →  raster     (estimated encode peak vs. available memory)
//! 5. Encode    raster  →  file       (highest quality that fits the target)
//! ```
//!
//! Each stage takes the previous stage's buffer by value and drops it once
//! its own output exists, so no raster outlives the stage that replaced it.
//! Orient and Scale are best effort: if they cannot allocate they hand the
//! input back and the run continues.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`source`] | `ImageSource` handles (path or in-memory), MIME sniffing, input discovery |
//! | [`imaging`] | The stages themselves plus the `ImageBackend` trait and its `image`-crate implementation |
//! | [`memory`] | Memory telemetry (`MemoryInfoProvider`) and the pre-encode safety gate |
//! | [`pipeline`] | `Compressor`: stage ordering, cancellation, progress events, batches |
//! | [`config`] | `squish.toml` loading, validation, merging, stock config text |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Decode Small, Then Scale Exactly
//!
//! The decoder never aims for the final size. It picks the largest power of
//! two that keeps both axes at or above the bounds, plus whatever the 4096px
//! hard ceiling demands, and leaves exact sizing to the scaler. Power-of-two
//! factors map onto JPEG's DCT scaling, so a JPEG is decoded straight at 1/2,
//! 1/4 or 1/8 size and the full-resolution raster never exists. Other
//! formats are decoded whole under an allocation limit and then averaged
//! down.
//!
//! ## Out-Of-Memory Is A Value
//!
//! Every large buffer is reserved fallibly (`Vec::try_reserve*`), the scaled
//! JPEG buffer is checked against the allocation limit before it is reserved,
//! and the `image` crate decoders run under that same limit. Running out of memory turns
//! into `AttemptError::OutOfMemory`, which each stage handles in its own way:
//! the decoder retries at a coarser factor, orient and scale pass through,
//! the encoder treats the quality as too large.
//!
//! ## Statically Linked Imaging
//!
//! JPEG decoding uses libjpeg-turbo through `turbojpeg`, built from source
//! and linked statically. Other decoding and JPEG encoding use the `image`
//! crate, resampling uses `fast_image_resize`, EXIF parsing uses
//! `kamadak-exif`. No system libraries are needed at run time.
//!
//! ## Testable Seams
//!
//! Codecs sit behind [`imaging::ImageBackend`] and memory telemetry behind
//! [`memory::MemoryInfoProvider`]. The retry loop, the quality search and the
//! stage machine are all tested against a recording mock backend and a fixed
//! memory snapshot.

pub mod config;
pub mod imaging;
pub mod memory;
pub mod output;
pub mod pipeline;
pub mod source;

#[cfg(test)]
pub(crate) mod test_helpers;
