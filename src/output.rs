//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Every image leads with its positional index and the name the user gave
//! it. The written file, sizes and quality follow as indented context lines.
//! Stage-by-stage progress goes to the log (`RUST_LOG=debug`), not stdout.
//!
//! # Output Format
//!
//! ## Compress
//!
//! ```text
//! 001 holiday/IMG_0042.jpg
//!     Output: /tmp/compressed_image_Xa81Qz.jpg
//!     4032x3024 → 1440x1080 (decoded at 1/2)
//!     q87, 1.9 MiB (searched, 4 steps)
//! 002 notes.txt
//!     Failed: could not process image (decode-failure)
//!
//! Compressed 1 of 2 images, 1 failed
//! ```
//!
//! ## Probe
//!
//! ```text
//! holiday/IMG_0042.jpg
//!     Source: 4032x3024 image/jpeg, orientation 6 (rotate-90)
//!     Decode: 1/2 → 2016x1512 rgb8
//!     Output: 810x1080
//!     Memory: peak 2.5 MiB, allowed 3.9 GiB (ok)
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::config::format_byte_size;
use crate::imaging::SearchOutcome;
use crate::pipeline::{CompressError, CompressEvent, CompressedImage, ProbeReport};
use serde_json::json;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn outcome_label(outcome: SearchOutcome) -> String {
    match outcome {
        SearchOutcome::Ceiling => "ceiling".to_string(),
        SearchOutcome::Searched { iterations } => format!("searched, {iterations} steps"),
        SearchOutcome::Fallback { iterations } => {
            format!("over target after {iterations} steps")
        }
    }
}

/// Context lines describing a finished image, at depth 1.
fn image_lines(image: &CompressedImage) -> Vec<String> {
    let mut scale = format!(
        "{}x{} → {}x{}",
        image.source_width, image.source_height, image.width, image.height
    );
    if image.sample_factor.get() > 1 {
        scale.push_str(&format!(" (decoded at {})", image.sample_factor));
    }
    vec![
        format!("{}Output: {}", indent(1), image.path.display()),
        format!("{}{}", indent(1), scale),
        format!(
            "{}{}, {} ({})",
            indent(1),
            image.quality,
            format_byte_size(image.byte_len),
            outcome_label(image.outcome)
        ),
    ]
}

// ============================================================================
// Compress output
// ============================================================================

/// Format a single progress event as display lines.
///
/// Stage transitions produce no lines; only terminal events are shown.
pub fn format_compress_event(event: &CompressEvent) -> Vec<String> {
    match event {
        CompressEvent::StageEntered { .. } => Vec::new(),
        CompressEvent::Finished { index, image } => {
            let mut lines = vec![format!("{} {}", format_index(*index), image.source)];
            lines.extend(image_lines(image));
            lines
        }
        CompressEvent::Failed {
            index,
            source,
            kind,
            message,
            ..
        } => vec![
            format!("{} {}", format_index(*index), source),
            format!("{}Failed: {} ({})", indent(1), message, kind),
        ],
    }
}

/// Closing line after a batch.
pub fn format_summary(results: &[Result<CompressedImage, CompressError>]) -> String {
    let total = results.len();
    let failed = results.iter().filter(|r| r.is_err()).count();
    let noun = if total == 1 { "image" } else { "images" };
    if failed == 0 {
        format!("Compressed {} {}", total, noun)
    } else {
        format!(
            "Compressed {} of {} {}, {} failed",
            total - failed,
            total,
            noun,
            failed
        )
    }
}

/// JSON report: one object per input, in input order.
pub fn format_json_report(
    labels: &[String],
    results: &[Result<CompressedImage, CompressError>],
) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = labels
        .iter()
        .zip(results)
        .map(|(label, result)| match result {
            Ok(image) => json!({ "source": label, "ok": true, "result": image }),
            Err(e) => json!({
                "source": label,
                "ok": false,
                "error": { "kind": e.kind(), "message": e.to_string() },
            }),
        })
        .collect();
    serde_json::Value::Array(entries)
}

pub fn print_summary(results: &[Result<CompressedImage, CompressError>]) {
    println!();
    println!("{}", format_summary(results));
}

// ============================================================================
// Probe output
// ============================================================================

pub fn format_probe(report: &ProbeReport) -> Vec<String> {
    vec![
        report.source.clone(),
        format!(
            "{}Source: {}x{} {}, orientation {} ({})",
            indent(1),
            report.width,
            report.height,
            report.mime.as_deref().unwrap_or("unknown"),
            report.orientation.exif_value(),
            report.orientation
        ),
        format!(
            "{}Decode: {} → {}x{} {}",
            indent(1),
            report.sample_factor,
            report.decoded.0,
            report.decoded.1,
            report.format
        ),
        format!("{}Output: {}x{}", indent(1), report.fitted.0, report.fitted.1),
        format!(
            "{}Memory: peak {}, allowed {} ({})",
            indent(1),
            format_byte_size(report.estimated_peak),
            format_byte_size(report.allowed),
            if report.gate_passes { "ok" } else { "would be rejected" }
        ),
    ]
}

pub fn print_probe(report: &ProbeReport) {
    for line in format_probe(report) {
        println!("{}", line);
    }
}
