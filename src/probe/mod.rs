//! Tag probes: turn a media file into metadata containers
//!
//! A probe returns plain JSON tag bags (an EXIF-like map, container format
//! tags, per-stream tags) plus basic media facts. The scanner only cares
//! about those shapes, so the native readers and ffprobe are interchangeable
//! behind [`TagProbe`].

pub mod exif;
pub mod ffprobe;
pub mod jpeg;
pub mod png;
pub mod tools;
pub mod webp;

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use ffprobe::FfprobeProbe;
pub use tools::ToolAvailability;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{tool} failed: {message}")]
    Tool { tool: &'static str, message: String },

    #[error("malformed {format} data: {message}")]
    Malformed { format: &'static str, message: String },
}

impl ProbeError {
    pub fn malformed(format: &'static str, message: impl Into<String>) -> Self {
        ProbeError::Malformed {
            format,
            message: message.into(),
        }
    }

    /// Stable code stored with indexing errors
    pub fn reason_code(&self) -> &'static str {
        match self {
            ProbeError::Io(_) => "io_error",
            ProbeError::Tool { .. } => "probe_failed",
            ProbeError::Malformed { .. } => "malformed_file",
        }
    }
}

/// Broad media class, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
    Audio,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "bmp", "avif", "tif", "tiff"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "avi", "m4v"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a", "opus", "aac"];

impl AssetKind {
    pub fn from_extension(ext: &str) -> Option<AssetKind> {
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(AssetKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(AssetKind::Video)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(AssetKind::Audio)
        } else {
            None
        }
    }

    pub fn from_path(path: &Path) -> Option<AssetKind> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(AssetKind::from_extension)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Video => "video",
            AssetKind::Audio => "audio",
        }
    }

    pub fn parse(s: &str) -> Option<AssetKind> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Some(AssetKind::Image),
            "video" => Some(AssetKind::Video),
            "audio" => Some(AssetKind::Audio),
            _ => None,
        }
    }
}

/// Everything a probe learned about one file.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutput {
    /// EXIF tags, or PNG text chunks for PNG files
    pub exif: Value,
    /// Container-level tags (ffprobe `format.tags`)
    pub format_tags: Value,
    /// One tag bag per stream
    pub stream_tags: Vec<Value>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: Option<i64>,
}

impl Default for ProbeOutput {
    fn default() -> Self {
        Self {
            exif: Value::Object(Map::new()),
            format_tags: Value::Object(Map::new()),
            stream_tags: Vec::new(),
            width: None,
            height: None,
            duration_ms: None,
        }
    }
}

impl ProbeOutput {
    /// Containers in scanner precedence order: EXIF, format tags, stream tags.
    pub fn containers(&self) -> Vec<&Value> {
        let mut out = vec![&self.exif, &self.format_tags];
        out.extend(self.stream_tags.iter());
        out
    }
}

/// A tag-probe backend.
pub trait TagProbe: Send + Sync {
    fn probe(&self, path: &Path, kind: AssetKind) -> Result<ProbeOutput, ProbeError>;
}

/// Pure-Rust readers for PNG, WEBP and JPEG.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeProbe;

impl TagProbe for NativeProbe {
    fn probe(&self, path: &Path, _kind: AssetKind) -> Result<ProbeOutput, ProbeError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "png" => png::read_png(path).map(png::PngInfo::into_probe_output),
            "webp" => webp::read_webp(path).map(webp::WebpInfo::into_probe_output),
            "jpg" | "jpeg" => jpeg::read_jpeg(path).map(jpeg::JpegInfo::into_probe_output),
            _ => Ok(ProbeOutput::default()),
        }
    }
}

/// Native readers for images, ffprobe for video and audio when available.
pub struct DefaultProbe {
    native: NativeProbe,
    ffprobe: Option<FfprobeProbe>,
}

impl DefaultProbe {
    pub fn new(use_ffprobe: bool) -> Self {
        Self {
            native: NativeProbe,
            ffprobe: use_ffprobe.then(FfprobeProbe::default),
        }
    }
}

impl TagProbe for DefaultProbe {
    fn probe(&self, path: &Path, kind: AssetKind) -> Result<ProbeOutput, ProbeError> {
        match (kind, &self.ffprobe) {
            (AssetKind::Image, _) => self.native.probe(path, kind),
            (_, Some(ffprobe)) if ffprobe.is_available() => ffprobe.probe(path, kind),
            _ => {
                tracing::debug!(path = %path.display(), "no probe for media file, using sidecar only");
                Ok(ProbeOutput::default())
            }
        }
    }
}
