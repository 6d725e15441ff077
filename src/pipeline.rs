//! Compression orchestrator.
//!
//! Drives one image through the stages in a fixed order:
//!
//! ```text
//! Idle → Decoding → Orienting → Scaling → SafetyChecking → Encoding → Done
//!            ↘          ↘           ↘            ↘              ↘
//!                              Failed
//! ```
//!
//! Orienting and Scaling never fail; they degrade to passing the raster
//! through. Every other stage maps its error into [`CompressError`]. A
//! [`CancelToken`] is checked before Decoding, Scaling and Encoding; once a
//! check observes cancellation no further stage runs and every buffer held
//! so far is dropped.
//!
//! Invocations share no mutable state, so [`Compressor::compress_batch`]
//! simply fans them out over rayon. Progress is reported as
//! [`CompressEvent`]s over an optional `mpsc::Sender`.

use crate::config::CompressConfig;
use crate::imaging::{
    DecodeBounds, DecodeError, DecodeOptions, DecodedImage, EncodeError, EncodeOptions,
    ImageBackend, Orientation, PixelFormat, Quality, QualityRange, ResizeFilter, RustBackend,
    SampleFactor, SearchOutcome, calculate_fit_dimensions, calculate_sample_factor, decode,
    encode, orientation, raw_byte_size, scale,
};
use crate::memory::{GateReport, MemoryGate, MemoryInfoProvider, MemorySafetyError, SystemMemory};
use crate::source::ImageSource;
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use thiserror::Error;

/// Where an invocation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Idle,
    Decoding,
    Orienting,
    Scaling,
    SafetyChecking,
    Encoding,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Decoding => "decoding",
            Stage::Orienting => "orienting",
            Stage::Scaling => "scaling",
            Stage::SafetyChecking => "safety-checking",
            Stage::Encoding => "encoding",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("source unreadable: {0}")]
    SourceUnreadable(#[source] std::io::Error),
    #[error("decode failed: {0}")]
    DecodeFailure(String),
    #[error("out of memory while {stage}: {detail}")]
    OutOfMemory { stage: Stage, detail: String },
    #[error("rejected by memory safety gate: {0}")]
    MemorySafetyRejected(#[from] MemorySafetyError),
    #[error("encode failed: {0}")]
    EncodeFailure(String),
    #[error("cannot write output to {}: {source}", dir.display())]
    WriteFailure {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cancelled before {stage}")]
    Cancelled { stage: Stage },
}

impl CompressError {
    /// Text safe to show an end user. Diagnostics live in `Display`.
    pub fn user_message(&self) -> &'static str {
        match self {
            CompressError::Cancelled { .. } => "cancelled",
            _ => "could not process image",
        }
    }

    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            CompressError::SourceUnreadable(_) => "source-unreadable",
            CompressError::DecodeFailure(_) => "decode-failure",
            CompressError::OutOfMemory { .. } => "out-of-memory",
            CompressError::MemorySafetyRejected(_) => "memory-safety-rejected",
            CompressError::EncodeFailure(_) => "encode-failure",
            CompressError::WriteFailure { .. } => "write-failure",
            CompressError::Cancelled { .. } => "cancelled",
        }
    }
}

impl From<DecodeError> for CompressError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::SourceUnreadable(io) => CompressError::SourceUnreadable(io),
            DecodeError::Failed(msg) => CompressError::DecodeFailure(msg),
            oom @ DecodeError::OutOfMemory { .. } => CompressError::OutOfMemory {
                stage: Stage::Decoding,
                detail: oom.to_string(),
            },
        }
    }
}

impl From<EncodeError> for CompressError {
    fn from(e: EncodeError) -> Self {
        match e {
            oom @ EncodeError::OutOfMemory { .. } => CompressError::OutOfMemory {
                stage: Stage::Encoding,
                detail: oom.to_string(),
            },
            EncodeError::Failed(msg) => CompressError::EncodeFailure(msg),
            EncodeError::Write { dir, source } => CompressError::WriteFailure { dir, source },
        }
    }
}

/// A finished artifact. The file at `path` belongs to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressedImage {
    pub source: String,
    pub path: PathBuf,
    pub byte_len: u64,
    pub width: u32,
    pub height: u32,
    pub source_width: u32,
    pub source_height: u32,
    pub mime: Option<String>,
    pub quality: Quality,
    pub outcome: SearchOutcome,
    pub sample_factor: SampleFactor,
    pub decode_attempts: u32,
    pub memory: GateReport,
}

/// What a compression run would do, computed from the header alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub mime: Option<String>,
    pub orientation: Orientation,
    pub format: PixelFormat,
    pub sample_factor: SampleFactor,
    /// Raster size straight out of the decoder.
    pub decoded: (u32, u32),
    /// Raster size after orientation and scaling.
    pub fitted: (u32, u32),
    pub estimated_peak: u64,
    pub allowed: u64,
    pub gate_passes: bool,
}

/// Progress notifications. `index` is the 1-based position in the batch.
#[derive(Debug, Clone)]
pub enum CompressEvent {
    StageEntered {
        index: usize,
        source: String,
        stage: Stage,
    },
    Finished {
        index: usize,
        image: CompressedImage,
    },
    Failed {
        index: usize,
        source: String,
        kind: &'static str,
        /// [`CompressError::user_message`], safe to display.
        message: &'static str,
        /// Full diagnostic, for logs only.
        error: String,
    },
}

/// Resolved knobs for every stage.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressSettings {
    pub decode: DecodeOptions,
    pub resize_filter: ResizeFilter,
    pub gate: MemoryGate,
    pub encode: EncodeOptions,
    /// `None` writes to the system temp dir.
    pub output_dir: Option<PathBuf>,
    pub file_prefix: String,
    /// Largest single allocation the production backend may make.
    pub alloc_limit: u64,
}

impl Default for CompressSettings {
    fn default() -> Self {
        Self::from(&CompressConfig::default())
    }
}

impl From<&CompressConfig> for CompressSettings {
    fn from(config: &CompressConfig) -> Self {
        Self {
            decode: DecodeOptions {
                bounds: DecodeBounds::new(config.bounds.max_width, config.bounds.max_height),
                hard_ceiling: config.bounds.hard_ceiling,
                max_attempts: config.decode.max_attempts,
                max_sample_factor: SampleFactor::new(config.decode.max_sample_factor),
            },
            resize_filter: config.bounds.resize_filter,
            gate: MemoryGate {
                peak_multiplier: config.memory.peak_multiplier,
                headroom_factor: config.memory.headroom_factor,
            },
            encode: EncodeOptions {
                target_size: config.encode.target_size_bytes,
                range: QualityRange::new(config.encode.min_quality, config.encode.max_quality),
                max_iterations: config.encode.max_iterations,
            },
            output_dir: config.output.dir.clone(),
            file_prefix: config.output.file_prefix.clone(),
            alloc_limit: config.decode.alloc_limit_bytes,
        }
    }
}

impl CompressSettings {
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Runs the stage sequence with a backend and a memory provider.
pub struct Compressor<B = RustBackend, M = SystemMemory> {
    backend: B,
    memory: M,
    settings: CompressSettings,
}

impl Compressor {
    /// Production compressor: `image`-crate backend and live host memory.
    pub fn new(settings: CompressSettings) -> Self {
        Self {
            backend: RustBackend::with_alloc_limit(settings.alloc_limit),
            memory: SystemMemory,
            settings,
        }
    }
}

impl<B: ImageBackend, M: MemoryInfoProvider> Compressor<B, M> {
    pub fn with_parts(backend: B, memory: M, settings: CompressSettings) -> Self {
        Self {
            backend,
            memory,
            settings,
        }
    }

    pub fn settings(&self) -> &CompressSettings {
        &self.settings
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Compress to the configured default target size.
    pub fn compress(
        &self,
        source: &ImageSource,
        cancel: &CancelToken,
    ) -> Result<CompressedImage, CompressError> {
        self.compress_to_size(source, self.settings.encode.target_size, cancel)
    }

    /// Compress to at most `max_bytes` (unless the quality floor still overshoots).
    pub fn compress_to_size(
        &self,
        source: &ImageSource,
        max_bytes: u64,
        cancel: &CancelToken,
    ) -> Result<CompressedImage, CompressError> {
        self.run(1, source, max_bytes, cancel, None)
    }

    /// Plan a run without decoding any pixels.
    pub fn probe(&self, source: &ImageSource) -> Result<ProbeReport, CompressError> {
        let header = decode::probe(&self.backend, source)?;
        let orientation = self.backend.read_orientation(source).unwrap_or_else(|e| {
            log::warn!("{}: ignoring unreadable orientation: {}", source.label(), e);
            Orientation::Normal
        });
        let options = &self.settings.decode;
        let sample_factor = calculate_sample_factor(
            (header.width, header.height),
            options.bounds,
            options.hard_ceiling,
        );
        let decoded = sample_factor.apply(header.width, header.height);
        let upright = if orientation.swaps_dimensions() {
            (decoded.1, decoded.0)
        } else {
            decoded
        };
        let fitted = calculate_fit_dimensions(upright, options.bounds).unwrap_or(upright);
        let format = PixelFormat::for_mime(header.mime.as_deref());
        let raw = raw_byte_size(fitted.0, fitted.1, format.bytes_per_pixel());
        let (estimated_peak, allowed, gate_passes) =
            match self.settings.gate.check_bytes(raw, &self.memory) {
                Ok(report) => (report.estimated, report.allowed, true),
                Err(e) => (e.estimated, e.allowed, false),
            };
        Ok(ProbeReport {
            source: source.label(),
            width: header.width,
            height: header.height,
            mime: header.mime,
            orientation,
            format,
            sample_factor,
            decoded,
            fitted,
            estimated_peak,
            allowed,
            gate_passes,
        })
    }

    /// Compress every source in parallel. Results keep input order.
    pub fn compress_batch(
        &self,
        sources: &[ImageSource],
        cancel: &CancelToken,
        events: Option<Sender<CompressEvent>>,
    ) -> Vec<Result<CompressedImage, CompressError>> {
        let target = self.settings.encode.target_size;
        sources
            .par_iter()
            .enumerate()
            .map(|(i, source)| self.run(i + 1, source, target, cancel, events.as_ref()))
            .collect()
    }

    fn run(
        &self,
        index: usize,
        source: &ImageSource,
        target: u64,
        cancel: &CancelToken,
        events: Option<&Sender<CompressEvent>>,
    ) -> Result<CompressedImage, CompressError> {
        let mut progress = Progress {
            index,
            label: source.label(),
            stage: Stage::Idle,
            events,
        };
        let result = self.run_stages(&mut progress, source, target, cancel);
        match &result {
            Ok(image) => {
                progress.stage = Stage::Done;
                log::info!(
                    "{}: {}x{} -> {}x{} at {}, {} bytes ({:?})",
                    progress.label,
                    image.source_width,
                    image.source_height,
                    image.width,
                    image.height,
                    image.quality,
                    image.byte_len,
                    image.outcome
                );
                progress.emit(CompressEvent::Finished {
                    index,
                    image: image.clone(),
                });
            }
            Err(e) => {
                log::warn!("{}: failed while {}: {}", progress.label, progress.stage, e);
                progress.stage = Stage::Failed;
                progress.emit(CompressEvent::Failed {
                    index,
                    source: progress.label.clone(),
                    kind: e.kind(),
                    message: e.user_message(),
                    error: e.to_string(),
                });
            }
        }
        result
    }

    fn run_stages(
        &self,
        progress: &mut Progress<'_>,
        source: &ImageSource,
        target: u64,
        cancel: &CancelToken,
    ) -> Result<CompressedImage, CompressError> {
        checkpoint(cancel, Stage::Decoding)?;
        progress.enter(Stage::Decoding);
        let DecodedImage {
            raster,
            header,
            sample_factor,
            attempts,
        } = decode::decode(&self.backend, source, &self.settings.decode)?;

        progress.enter(Stage::Orienting);
        let raster = orientation::normalize(&self.backend, source, raster);

        checkpoint(cancel, Stage::Scaling)?;
        progress.enter(Stage::Scaling);
        let raster = scale::fit_within(
            &self.backend,
            raster,
            self.settings.decode.bounds,
            self.settings.resize_filter,
        );

        progress.enter(Stage::SafetyChecking);
        let memory = self.settings.gate.check(&raster, &self.memory)?;
        log::debug!(
            "{}: gate passed, peak {} < {} bytes",
            progress.label,
            memory.estimated,
            memory.allowed
        );

        checkpoint(cancel, Stage::Encoding)?;
        progress.enter(Stage::Encoding);
        let (width, height) = raster.dimensions();
        let options = EncodeOptions {
            target_size: target,
            ..self.settings.encode
        };
        let artifact = encode::encode_to_target(&self.backend, raster, &options)?;
        let path = encode::write_artifact(
            &artifact.bytes,
            &self.settings.resolved_output_dir(),
            &self.settings.file_prefix,
        )?;

        Ok(CompressedImage {
            source: progress.label.clone(),
            path,
            byte_len: artifact.bytes.len() as u64,
            width,
            height,
            source_width: header.width,
            source_height: header.height,
            mime: header.mime,
            quality: artifact.quality,
            outcome: artifact.outcome,
            sample_factor,
            decode_attempts: attempts,
            memory,
        })
    }
}

fn checkpoint(cancel: &CancelToken, next: Stage) -> Result<(), CompressError> {
    if cancel.is_cancelled() {
        return Err(CompressError::Cancelled { stage: next });
    }
    Ok(())
}

/// Per-invocation stage bookkeeping.
struct Progress<'a> {
    index: usize,
    label: String,
    stage: Stage,
    events: Option<&'a Sender<CompressEvent>>,
}

impl Progress<'_> {
    fn enter(&mut self, stage: Stage) {
        log::debug!("{}: {} -> {}", self.label, self.stage, stage);
        self.stage = stage;
        self.emit(CompressEvent::StageEntered {
            index: self.index,
            source: self.label.clone(),
            stage,
        });
    }

    fn emit(&self, event: CompressEvent) {
        if let Some(tx) = self.events {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(event);
        }
    }
}

/// Remove a finished artifact. Convenience for callers that only needed it briefly.
pub fn discard(image: &CompressedImage) -> std::io::Result<()> {
    remove_if_exists(&image.path)
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
