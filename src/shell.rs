//! Shared shell for the driver binary.
//!
//! Logger setup, JSON driver configuration and the synthetic demo
//! composition.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::core::player::{CacheOptions, PlayerOptions};
use crate::core::timeline::TimelineOptions;
use crate::entities::{AudioInfo, Clip, Composition, Item, MediaReference, Track, Transition};
use crate::io::{AudioPattern, PatternSpec};
use crate::utils::time::{RationalTime, TimeRange};

/// Media frames between clip starts, so every clip decodes distinct values
const CLIP_MEDIA_STRIDE: i64 = 1000;

/// Everything the driver can load from `--config`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub player: PlayerOptions,
    pub cache: CacheOptions,
    pub timeline: TimelineOptions,
}

impl DriverConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: DriverConfig =
            serde_json::from_str(&text).with_context(|| format!("Failed to parse config {}", path.display()))?;
        info!("Config loaded from {}", path.display());
        Ok(config)
    }
}

/// Log level for a `-v` count: 0 = warn, 1 = info, 2 = debug, 3+ = trace.
pub fn log_level(verbosity: u8) -> log::LevelFilter {
    match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

/// Initialize logging: console (respects RUST_LOG) or a file when
/// `log_file` is given (`Some(None)` = default `tlplay.log`).
pub fn init_logger(verbosity: u8, log_file: Option<&Option<PathBuf>>) -> Result<()> {
    let level = log_level(verbosity);
    if let Some(path) = log_file {
        let path = path.clone().unwrap_or_else(|| PathBuf::from("tlplay.log"));
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        env_logger::Builder::new()
            .filter_level(level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
        info!("Logging to file: {} (level: {:?})", path.display(), level);
    } else {
        let default_level = level.as_str().to_ascii_lowercase();
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

/// Video track of `args.clips` pattern clips joined by dissolves, plus one
/// audio clip spanning the whole track when audio is enabled.
pub fn demo_composition(args: &Args) -> Composition {
    let rate = args.rate;
    let (width, height) = args.size;
    let handle = args.transition.max(0);
    let half = RationalTime::from_frames(handle / 2, rate);
    let rest = RationalTime::from_frames(handle - handle / 2, rate);

    let mut video = Track::video("V1");
    for index in 0..args.clips.max(1) {
        if index > 0 && handle > 0 {
            video.push(Item::Transition(Transition::dissolve(half, rest)));
        }
        let first = index as i64 * CLIP_MEDIA_STRIDE;
        let spec = PatternSpec::video(args.clip_frames + 2 * handle, rate)
            .with_start(first)
            .with_size(width, height);
        video.push(Item::Clip(Clip::new(
            format!("clip{}", index + 1),
            MediaReference::external(spec.to_url()),
            TimeRange::from_frames(first + handle, args.clip_frames, rate),
        )));
    }

    let mut tracks = vec![video];
    if args.with_audio() {
        let total = args.clip_frames * args.clips.max(1) as i64;
        let spec = PatternSpec::video(total, rate).with_audio(AudioPattern::Sine(440.0), AudioInfo::new(2, 48000));
        let audio = Track::audio("A1").with_item(Item::Clip(Clip::new(
            "tone",
            MediaReference::external(spec.to_url()),
            TimeRange::from_frames(0, total, rate),
        )));
        tracks.push(audio);
    }
    Composition::new("demo", RationalTime::new(0.0, rate), tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_driver_config_partial_json() {
        let config: DriverConfig =
            serde_json::from_str(r#"{ "cache": { "video_gb": 0.5 }, "timeline": { "compat": false } }"#).unwrap();
        assert_eq!(config.cache.video_gb, 0.5);
        assert!(!config.timeline.compat);
        assert_eq!(config.player, PlayerOptions::default());
    }

    #[test]
    fn test_demo_composition_layout() {
        let args = Args::parse_from(["tlplay", "--clips", "2", "--clip-frames", "24", "--transition", "6"]);
        let comp = demo_composition(&args);
        assert_eq!(comp.time_range(), TimeRange::from_frames(0, 48, 24.0));
        assert_eq!(comp.tracks().len(), 2);
        assert_eq!(comp.tracks()[0].items().len(), 3);
        assert!(comp.has_audio());

        let args = Args::parse_from(["tlplay", "--no-audio", "--transition", "0"]);
        let comp = demo_composition(&args);
        assert_eq!(comp.tracks().len(), 1);
        assert_eq!(comp.tracks()[0].items().len(), 3);
    }
}
