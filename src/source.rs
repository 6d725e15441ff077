//! Image sources: where encoded bytes come from.
//!
//! An [`ImageSource`] is an immutable, externally owned handle. The pipeline
//! only ever opens fresh readers over it; nothing in the crate mutates or
//! consumes the underlying file or buffer.
//!
//! Two kinds are supported:
//!
//! | Kind | Constructor | Typical origin |
//! |---|---|---|
//! | Path | [`ImageSource::from_path`] | a file on disk |
//! | Memory | [`ImageSource::from_bytes`] / [`ImageSource::from_reader`] | stdin, a content provider, a network body |
//!
//! The module also holds input discovery for the CLI: classifying paths by
//! [`MediaKind`] and expanding directories into their photo files.

use image::{ImageFormat, ImageReader};
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Anything the decoders can read from.
pub trait ReadSeek: BufRead + Seek {}

impl<T: BufRead + Seek> ReadSeek for T {}

/// Opaque handle to readable image bytes plus a queryable MIME type.
#[derive(Clone)]
pub enum ImageSource {
    /// A file on disk. Opened fresh for each read.
    Path(PathBuf),
    /// Bytes already held in memory, shared cheaply between readers.
    Memory {
        label: String,
        bytes: Arc<[u8]>,
        /// Declared MIME type, if the provider supplied one. Wins over sniffing.
        mime: Option<String>,
    },
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ImageSource::Memory { label, bytes, mime } => f
                .debug_struct("Memory")
                .field("label", label)
                .field("len", &bytes.len())
                .field("mime", mime)
                .finish(),
        }
    }
}

impl ImageSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        ImageSource::Path(path.into())
    }

    pub fn from_bytes(label: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        ImageSource::Memory {
            label: label.into(),
            bytes: bytes.into(),
            mime: None,
        }
    }

    /// Drain `reader` into an in-memory source.
    pub fn from_reader(label: impl Into<String>, mut reader: impl Read) -> io::Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Self::from_bytes(label, bytes))
    }

    /// Attach a declared MIME type to an in-memory source. No-op for paths.
    pub fn with_mime(self, declared: impl Into<String>) -> Self {
        match self {
            ImageSource::Memory { label, bytes, .. } => ImageSource::Memory {
                label,
                bytes,
                mime: Some(declared.into()),
            },
            other => other,
        }
    }

    /// Human-readable identity for logs and reports.
    pub fn label(&self) -> String {
        match self {
            ImageSource::Path(path) => path.display().to_string(),
            ImageSource::Memory { label, .. } => label.clone(),
        }
    }

    /// Open a new buffered, seekable reader positioned at the start.
    pub fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
        match self {
            ImageSource::Path(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
            ImageSource::Memory { bytes, .. } => Ok(Box::new(Cursor::new(Arc::clone(bytes)))),
        }
    }

    /// The whole encoded stream. Memory sources are borrowed, not copied.
    pub fn read_all(&self) -> io::Result<Cow<'_, [u8]>> {
        match self {
            ImageSource::Path(path) => Ok(Cow::Owned(std::fs::read(path)?)),
            ImageSource::Memory { bytes, .. } => Ok(Cow::Borrowed(&bytes[..])),
        }
    }

    /// Guess the container format from the leading bytes.
    pub fn sniff_format(&self) -> io::Result<Option<ImageFormat>> {
        let reader = ImageReader::new(self.open()?).with_guessed_format()?;
        Ok(reader.format())
    }

    /// MIME type supplied alongside the bytes, if any.
    pub fn declared_mime(&self) -> Option<&str> {
        match self {
            ImageSource::Memory { mime, .. } => mime.as_deref(),
            ImageSource::Path(_) => None,
        }
    }

    /// The declared MIME type, falling back to one sniffed from content.
    pub fn mime_type(&self) -> io::Result<Option<String>> {
        if let Some(declared) = self.declared_mime() {
            return Ok(Some(declared.to_string()));
        }
        Ok(self.sniff_format()?.map(|f| f.to_mime_type().to_string()))
    }
}

/// Coarse classification of a file by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Other,
}

const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "heic", "avif"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "3gp"];

/// Classify `path` by its (case-insensitive) extension.
pub fn media_kind(path: &Path) -> MediaKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if PHOTO_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Photo
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Video
    } else {
        MediaKind::Other
    }
}

/// Expand CLI inputs into sources.
///
/// Files are taken as given (whatever their extension). Directories
/// contribute their direct children classified as [`MediaKind::Photo`],
/// sorted by name. `-` is not handled here; the caller reads stdin itself.
pub fn collect_inputs(inputs: &[PathBuf]) -> io::Result<Vec<ImageSource>> {
    let mut sources = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut photos: Vec<PathBuf> = std::fs::read_dir(input)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && media_kind(p) == MediaKind::Photo)
                .collect();
            photos.sort();
            sources.extend(photos.into_iter().map(ImageSource::Path));
        } else if input.is_file() {
            sources.push(ImageSource::Path(input.clone()));
        } else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("input not found: {}", input.display()),
            ));
        }
    }
    Ok(sources)
}
