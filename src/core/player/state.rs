//! Player configuration and the state shared with the cache thread.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::playback::{CacheDirection, Playback};
use crate::core::memory;
use crate::core::timeline::Timeline;
use crate::entities::{AudioData, VideoData};
use crate::io::IoOptions;
use crate::utils::time::{RationalTime, TimeRange};

/// Cache byte budget and window shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Video cache budget (GiB)
    pub video_gb: f64,
    /// Audio cache budget (GiB)
    pub audio_gb: f64,
    /// Seconds kept behind current time
    pub read_behind: f64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            video_gb: 4.0,
            audio_gb: 0.25,
            read_behind: 0.5,
        }
    }
}

impl CacheOptions {
    /// Budget derived from available RAM, split 15:1 between video and audio.
    pub fn from_system_memory(fraction: f64, reserve_gb: f64) -> Self {
        let total = memory::system_budget_gb(fraction, reserve_gb);
        Self {
            video_gb: total * 15.0 / 16.0,
            audio_gb: total / 16.0,
            ..Default::default()
        }
    }
}

/// Player tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerOptions {
    /// Frames per audio device callback
    pub audio_buffer_frame_count: usize,
    /// Audio stays muted this long after a playback change
    pub mute_timeout: Duration,
    /// Target period of the cache thread loop
    pub sleep_timeout: Duration,
    /// Max in-flight video keys
    pub video_request_max: usize,
    /// Max in-flight audio seconds
    pub audio_request_max: usize,
    /// Initial current time (range start when `None`)
    pub starting_time: Option<RationalTime>,
    /// Output device name handed to the audio bridge
    pub audio_device: String,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            audio_buffer_frame_count: 1024,
            mute_timeout: Duration::from_millis(500),
            sleep_timeout: Duration::from_millis(5),
            video_request_max: 16,
            audio_request_max: 16,
            starting_time: None,
            audio_device: String::new(),
        }
    }
}

/// How compared timelines map the primary's current time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CompareTime {
    /// Same timeline time
    #[default]
    Absolute,
    /// Same offset from each timeline's start
    Relative,
}

impl CompareTime {
    /// Primary `time` mapped into `compare`, floored at its rate.
    pub fn map(self, time: RationalTime, primary: &TimeRange, compare: &TimeRange) -> RationalTime {
        let rate = compare.duration().rate();
        let mapped = match self {
            CompareTime::Absolute => time,
            CompareTime::Relative => compare.start_time() + (time - primary.start_time()),
        };
        mapped.rescaled_to(rate).floor()
    }
}

/// Timelines compared against the primary. Equal when the identities match.
#[derive(Clone, Default)]
pub struct CompareSet(pub Vec<Arc<Timeline>>);

impl CompareSet {
    pub fn timelines(&self) -> &[Arc<Timeline>] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for CompareSet {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a.uuid() == b.uuid())
    }
}

impl fmt::Debug for CompareSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter().map(|t| t.name())).finish()
    }
}

/// Cache occupancy published for observers
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheInfo {
    /// Cached share of the video window (0-100)
    pub video_percentage: f32,
    /// Cached share of the audio window (0-100)
    pub audio_percentage: f32,
    /// Contiguous cached frames at the timeline rate
    pub video_frames: Vec<TimeRange>,
    /// Contiguous cached seconds (rate 1)
    pub audio_seconds: Vec<TimeRange>,
}

/// Everything the cache thread needs from the owner, compared structurally.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlaybackState {
    pub playback: Playback,
    pub current_time: RationalTime,
    pub in_out_range: TimeRange,
    pub compare: CompareSet,
    pub compare_time: CompareTime,
    pub io_options: IoOptions,
    pub video_layer: u16,
    pub compare_video_layers: Vec<u16>,
    pub audio_offset: f64,
    pub cache_options: CacheOptions,
}

impl PlaybackState {
    /// Selected layer of compared timeline `index`
    pub fn compare_layer(&self, index: usize) -> u16 {
        self.compare_video_layers.get(index).copied().unwrap_or(0)
    }
}

/// State mutex payload: owner writes state and flags, the cache thread
/// consumes flags and publishes current data.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    pub state: PlaybackState,
    pub clear_requests: bool,
    pub clear_cache: bool,
    pub cache_direction: CacheDirection,
    pub current_video: Vec<VideoData>,
    pub current_audio: Vec<AudioData>,
    pub cache_info: CacheInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_time_mapping() {
        let primary = TimeRange::from_frames(0, 100, 24.0);
        let compare = TimeRange::from_frames(1000, 50, 25.0);
        let t = RationalTime::new(48.0, 24.0);
        assert_eq!(CompareTime::Absolute.map(t, &primary, &compare), RationalTime::new(50.0, 25.0));
        assert_eq!(CompareTime::Relative.map(t, &primary, &compare), RationalTime::new(1050.0, 25.0));
        let t = RationalTime::new(1.0, 24.0);
        // 1/24 s at 25 fps is 1.04 frames
        assert_eq!(CompareTime::Absolute.map(t, &primary, &compare), RationalTime::new(1.0, 25.0));
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: CacheOptions = serde_json::from_str(r#"{ "video_gb": 1.5 }"#).unwrap();
        assert_eq!(options.video_gb, 1.5);
        assert_eq!(options.read_behind, CacheOptions::default().read_behind);
        let player: PlayerOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(player, PlayerOptions::default());
    }
}
