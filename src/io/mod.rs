//! Media reader boundary.
//!
//! A [`ReadPlugin`] opens one [`MediaReader`] per media source. Readers are
//! asynchronous: every call returns a [`Future`] immediately and resolves it
//! from the reader's own threads. The Timeline never blocks on them outside
//! construction (`info()` with a timeout).
//!
//! Implementations:
//! - [`pattern`]: synthetic test-pattern frames and tones on a worker pool

pub mod pattern;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::promise::Future;
use crate::entities::{AudioBuffer, AudioInfo, Image, ImageInfo, MediaReference};
use crate::utils::time::{RationalTime, TimeRange};

pub use pattern::{AudioPattern, PatternPlugin, PatternSpec};

/// Stream layout reported by a reader (or a whole timeline)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IoInfo {
    /// One entry per selectable video layer
    pub video: Vec<ImageInfo>,
    pub video_time: TimeRange,
    pub audio: AudioInfo,
    pub audio_time: TimeRange,
}

impl IoInfo {
    pub fn has_video(&self) -> bool {
        !self.video.is_empty()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_valid()
    }

    /// Info of `layer`, falling back to the first layer.
    pub fn video_layer(&self, layer: u16) -> ImageInfo {
        self.video
            .get(layer as usize)
            .or_else(|| self.video.first())
            .copied()
            .unwrap_or_default()
    }
}

/// Decoded frame at a media time
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub time: RationalTime,
    pub image: Image,
}

/// Decoded audio covering a media range
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub range: TimeRange,
    pub audio: AudioBuffer,
}

/// Free-form reader options (`"pattern/delay_ms" -> "5"`).
///
/// Ordered so two option sets compare and hash deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IoOptions(BTreeMap<String, String>);

impl IoOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Parsed value of `key`, `None` when absent or unparsable.
    pub fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// `self` overridden by `other`
    pub fn merged(&self, other: &IoOptions) -> IoOptions {
        let mut out = self.clone();
        for (k, v) in &other.0 {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-read video options
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadOptions {
    pub video_layer: u16,
    pub io: IoOptions,
}

/// Per-read failure. Caught per layer by the Timeline, never propagated.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadError {
    Decode(String),
    OutOfRange { time: RationalTime, range: TimeRange },
    Cancelled,
    Unsupported(String),
    Io(String),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Decode(msg) => write!(f, "Decode failed: {}", msg),
            ReadError::OutOfRange { time, range } => {
                write!(f, "Time {} outside media range {}", time, range)
            }
            ReadError::Cancelled => write!(f, "Read cancelled"),
            ReadError::Unsupported(what) => write!(f, "Unsupported: {}", what),
            ReadError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ReadError {}

pub type ReadResult<T> = Result<T, ReadError>;

/// One open media source.
pub trait MediaReader: Send + Sync {
    fn info(&self) -> Future<ReadResult<IoInfo>>;

    fn read_video(&self, time: RationalTime, options: &ReadOptions) -> Future<ReadResult<VideoFrame>>;

    fn read_audio(&self, range: TimeRange, options: &IoOptions) -> Future<ReadResult<AudioFrame>>;

    /// Drop queued reads. Their futures resolve as abandoned or `Cancelled`.
    fn cancel_requests(&self);
}

/// Opens readers for media references.
pub trait ReadPlugin: Send + Sync {
    fn open(&self, media: &MediaReference, options: &IoOptions) -> anyhow::Result<Arc<dyn MediaReader>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::PixelFormat;

    #[test]
    fn test_options_merge_overrides() {
        let base = IoOptions::new().with("a", "1").with("b", "2");
        let over = IoOptions::new().with("b", "3");
        let merged = base.merged(&over);
        assert_eq!(merged.get("a"), Some("1"));
        assert_eq!(merged.parse::<u32>("b"), Some(3));
        assert_eq!(merged.parse::<u32>("c"), None);
    }

    #[test]
    fn test_video_layer_falls_back_to_first() {
        let info = IoInfo {
            video: vec![ImageInfo::new(4, 2, PixelFormat::Rgba8)],
            ..Default::default()
        };
        assert_eq!(info.video_layer(3).width, 4);
        assert_eq!(IoInfo::default().video_layer(0), ImageInfo::default());
    }
}
