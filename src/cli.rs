use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::core::player::Loop;

/// Loop mode as typed on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LoopMode {
    Loop,
    Once,
    #[value(name = "pingpong")]
    PingPong,
}

impl From<LoopMode> for Loop {
    fn from(mode: LoopMode) -> Self {
        match mode {
            LoopMode::Loop => Loop::Loop,
            LoopMode::Once => Loop::Once,
            LoopMode::PingPong => Loop::PingPong,
        }
    }
}

/// Headless timeline player over a synthetic composition
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of clips on the video track
    #[arg(long = "clips", value_name = "N", default_value_t = 3)]
    pub clips: usize,

    /// Frames per clip
    #[arg(long = "clip-frames", value_name = "N", default_value_t = 48)]
    pub clip_frames: i64,

    /// Dissolve length between clips in frames (0 = hard cuts)
    #[arg(long = "transition", value_name = "N", default_value_t = 12)]
    pub transition: i64,

    /// Timeline rate
    #[arg(long = "rate", value_name = "FPS", default_value_t = 24.0)]
    pub rate: f64,

    /// Frame size
    #[arg(long = "size", value_name = "WxH", default_value = "320x180", value_parser = parse_size)]
    pub size: (usize, usize),

    /// Add an audio track (default: on)
    #[arg(long = "audio", overrides_with = "no_audio")]
    pub audio: bool,

    /// Video only
    #[arg(long = "no-audio", overrides_with = "audio")]
    pub no_audio: bool,

    /// How long to play, in seconds
    #[arg(long = "seconds", value_name = "S", default_value_t = 5.0)]
    pub seconds: f64,

    /// Play in reverse
    #[arg(short = 'r', long = "reverse")]
    pub reverse: bool,

    /// Boundary behaviour
    #[arg(long = "loop-mode", value_enum, default_value_t = LoopMode::Loop)]
    pub loop_mode: LoopMode,

    /// Playback speed in frames per second (default: timeline rate)
    #[arg(long = "speed", value_name = "FPS")]
    pub speed: Option<f64>,

    /// Driver configuration (JSON: player, cache, timeline)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Derive the cache budget from this fraction of available memory
    #[arg(long = "mem", value_name = "FRACTION")]
    pub mem: Option<f64>,

    /// Enable logging to file (default: tlplay.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

impl Args {
    pub fn with_audio(&self) -> bool {
        !self.no_audio
    }
}

fn parse_size(value: &str) -> Result<(usize, usize), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{value}'"))?;
    let w = w.trim().parse::<usize>().map_err(|e| format!("width: {e}"))?;
    let h = h.trim().parse::<usize>().map_err(|e| format!("height: {e}"))?;
    if w == 0 || h == 0 {
        return Err(format!("empty size '{value}'"));
    }
    Ok((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let args = Args::parse_from(["tlplay"]);
        assert_eq!(args.clips, 3);
        assert_eq!(args.size, (320, 180));
        assert!(args.with_audio());
        assert_eq!(Loop::from(args.loop_mode), Loop::Loop);
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from([
            "tlplay",
            "--no-audio",
            "--size",
            "64x36",
            "--loop-mode",
            "pingpong",
            "-vv",
            "--reverse",
        ]);
        assert!(!args.with_audio());
        assert_eq!(args.size, (64, 36));
        assert_eq!(args.loop_mode, LoopMode::PingPong);
        assert_eq!(args.verbosity, 2);
        assert!(args.reverse);
        assert!(parse_size("64").is_err());
    }
}
