//! Synthetic test-pattern reader.
//!
//! **Why**: Exercises the whole engine (fan-out, caches, audio path) without a
//! codec. Output is deterministic so tests can tell which media frame landed
//! where: every channel of a decoded frame holds `media_frame % 256`.
//!
//! Media is described by the URL itself:
//!
//! ```text
//! pattern:frames=48,start=0,rate=24,size=64x36,format=rgba8,layers=1,audio=sine:440,channels=2,sample_rate=48000
//! ```
//!
//! Keys may be omitted (defaults from [`PatternSpec::default`]). Open-time
//! and per-read overrides come from [`IoOptions`]: `pattern/delay_ms`
//! (simulated decode time) and `pattern/fail_video` (every video read fails).

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, trace};

use super::{
    AudioFrame, IoInfo, IoOptions, MediaReader, ReadError, ReadOptions, ReadPlugin, ReadResult, VideoFrame,
};
use crate::core::promise::{self, Future};
use crate::core::workers::{Epoch, Workers};
use crate::entities::{AudioBuffer, AudioInfo, Image, ImageInfo, MediaReference, PixelFormat};
use crate::utils::time::{RationalTime, TimeRange};

pub const SCHEME: &str = "pattern:";

/// Generated audio signal
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioPattern {
    Silence,
    /// Every sample holds the value
    Constant(f32),
    /// Sine at the given frequency (Hz), amplitude 0.5
    Sine(f32),
}

impl AudioPattern {
    fn sample(&self, index: i64, sample_rate: u32) -> f32 {
        match *self {
            AudioPattern::Silence => 0.0,
            AudioPattern::Constant(v) => v,
            AudioPattern::Sine(freq) => {
                let t = index as f64 / sample_rate.max(1) as f64;
                0.5 * (TAU * freq * t as f32).sin()
            }
        }
    }

    fn parse(s: &str) -> Result<Self> {
        let (kind, arg) = s.split_once(':').unwrap_or((s, ""));
        match kind {
            "none" | "silence" => Ok(AudioPattern::Silence),
            "const" => Ok(AudioPattern::Constant(arg.parse().context("audio=const:<value>")?)),
            "sine" => Ok(AudioPattern::Sine(if arg.is_empty() {
                440.0
            } else {
                arg.parse().context("audio=sine:<hz>")?
            })),
            other => bail!("Unknown audio pattern '{}'", other),
        }
    }

    fn to_token(self) -> String {
        match self {
            AudioPattern::Silence => "silence".into(),
            AudioPattern::Constant(v) => format!("const:{}", v),
            AudioPattern::Sine(f) => format!("sine:{}", f),
        }
    }
}

/// Description of one synthetic media source
#[derive(Debug, Clone, PartialEq)]
pub struct PatternSpec {
    /// First media frame
    pub start: i64,
    pub frames: i64,
    pub rate: f64,
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    /// Video layers; layer `n` halves the resolution `n` times
    pub layers: u16,
    /// `None` = no audio stream
    pub audio: Option<AudioPattern>,
    pub audio_info: AudioInfo,
    pub delay: Duration,
    pub fail_video: bool,
}

impl Default for PatternSpec {
    fn default() -> Self {
        Self {
            start: 0,
            frames: 24,
            rate: 24.0,
            width: 64,
            height: 36,
            format: PixelFormat::Rgba8,
            layers: 1,
            audio: None,
            audio_info: AudioInfo::new(2, 48000),
            delay: Duration::ZERO,
            fail_video: false,
        }
    }
}

impl PatternSpec {
    pub fn video(frames: i64, rate: f64) -> Self {
        Self {
            frames,
            rate,
            ..Default::default()
        }
    }

    pub fn with_start(mut self, start: i64) -> Self {
        self.start = start;
        self
    }

    pub fn with_size(mut self, width: usize, height: usize) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_audio(mut self, pattern: AudioPattern, info: AudioInfo) -> Self {
        self.audio = Some(pattern);
        self.audio_info = info;
        self
    }

    /// Available media range at the pattern rate
    pub fn range(&self) -> TimeRange {
        TimeRange::from_frames(self.start, self.frames, self.rate)
    }

    pub fn image_info(&self, layer: u16) -> ImageInfo {
        let shift = layer.min(self.layers.saturating_sub(1)) as u32;
        ImageInfo::new((self.width >> shift).max(1), (self.height >> shift).max(1), self.format)
    }

    pub fn to_url(&self) -> String {
        let format = match self.format {
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::RgbaF16 => "rgbaf16",
            PixelFormat::RgbaF32 => "rgbaf32",
        };
        let mut url = format!(
            "{}frames={},start={},rate={},size={}x{},format={},layers={}",
            SCHEME, self.frames, self.start, self.rate, self.width, self.height, format, self.layers
        );
        if self.fail_video {
            url.push_str(",fail_video=true");
        }
        if let Some(audio) = self.audio {
            url.push_str(&format!(
                ",audio={},channels={},sample_rate={}",
                audio.to_token(),
                self.audio_info.channel_count,
                self.audio_info.sample_rate
            ));
        }
        url
    }

    pub fn parse(url: &str) -> Result<Self> {
        let body = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| anyhow!("Not a pattern URL: {}", url))?;
        let mut spec = PatternSpec::default();
        for pair in body.split(',').filter(|s| !s.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("Malformed pattern key '{}'", pair))?;
            match key {
                "frames" => spec.frames = value.parse().context("frames")?,
                "start" => spec.start = value.parse().context("start")?,
                "rate" => spec.rate = value.parse().context("rate")?,
                "size" => {
                    let (w, h) = value
                        .split_once('x')
                        .ok_or_else(|| anyhow!("size must be WxH, got '{}'", value))?;
                    spec.width = w.parse().context("size width")?;
                    spec.height = h.parse().context("size height")?;
                }
                "format" => {
                    spec.format = match value {
                        "rgba8" => PixelFormat::Rgba8,
                        "rgbaf16" => PixelFormat::RgbaF16,
                        "rgbaf32" => PixelFormat::RgbaF32,
                        other => bail!("Unknown pixel format '{}'", other),
                    }
                }
                "layers" => spec.layers = value.parse().context("layers")?,
                "audio" => spec.audio = Some(AudioPattern::parse(value)?),
                "channels" => spec.audio_info.channel_count = value.parse().context("channels")?,
                "sample_rate" => spec.audio_info.sample_rate = value.parse().context("sample_rate")?,
                "fail_video" => spec.fail_video = value.parse().context("fail_video")?,
                other => bail!("Unknown pattern key '{}'", other),
            }
        }
        if spec.frames <= 0 || spec.rate <= 0.0 {
            bail!("Pattern needs positive frames and rate: {}", url);
        }
        if spec.layers == 0 {
            spec.layers = 1;
        }
        Ok(spec)
    }

    /// Copy with `pattern/*` overrides from `options` applied
    fn overridden(&self, options: &IoOptions) -> PatternSpec {
        let mut spec = self.clone();
        if let Some(ms) = options.parse::<u64>("pattern/delay_ms") {
            spec.delay = Duration::from_millis(ms);
        }
        if let Some(fail) = options.parse::<bool>("pattern/fail_video") {
            spec.fail_video = fail;
        }
        spec
    }

    fn info(&self) -> IoInfo {
        let (audio, audio_time) = match self.audio {
            Some(_) => {
                let sr = self.audio_info.sample_rate as f64;
                (self.audio_info, self.range().rescaled_to(sr))
            }
            None => (AudioInfo::default(), TimeRange::invalid()),
        };
        IoInfo {
            video: (0..self.layers).map(|l| self.image_info(l)).collect(),
            video_time: self.range(),
            audio,
            audio_time,
        }
    }

    fn decode_video(&self, time: RationalTime, layer: u16) -> ReadResult<VideoFrame> {
        if self.fail_video {
            return Err(ReadError::Decode(format!("pattern forced failure at {}", time)));
        }
        let range = self.range();
        let time_at_rate = time.rescaled_to(self.rate);
        if !range.contains(time_at_rate) {
            return Err(ReadError::OutOfRange { time, range });
        }
        let frame = time_at_rate.to_frames();
        let image = Image::filled(self.image_info(layer), frame.rem_euclid(256) as u8);
        Ok(VideoFrame { time, image })
    }

    fn decode_audio(&self, range: TimeRange) -> ReadResult<AudioFrame> {
        let Some(pattern) = self.audio else {
            return Err(ReadError::Unsupported("pattern has no audio".into()));
        };
        let info = self.audio_info;
        let sr = info.sample_rate as f64;
        let available = self.range().rescaled_to(sr);
        let range = range.rescaled_to(sr);
        if !available.intersects(&range) {
            return Err(ReadError::OutOfRange {
                time: range.start_time(),
                range: available,
            });
        }
        let first = range.start_time().to_frames();
        let count = range.duration().round().value().max(0.0) as i64;
        let lo = available.start_time().to_frames();
        let hi = available.end_time_exclusive().to_frames();
        let mut samples = Vec::with_capacity(count as usize * info.channel_count);
        for index in first..first + count {
            let value = if index >= lo && index < hi {
                pattern.sample(index, info.sample_rate)
            } else {
                0.0
            };
            samples.extend(std::iter::repeat_n(value, info.channel_count));
        }
        Ok(AudioFrame {
            range,
            audio: AudioBuffer::new(info, samples),
        })
    }
}

/// Opens [`PatternReader`]s that share one worker pool.
#[derive(Debug, Clone)]
pub struct PatternPlugin {
    workers: Arc<Workers>,
    opened: Arc<AtomicUsize>,
}

impl PatternPlugin {
    pub fn new() -> Result<Self> {
        let workers = Workers::with_default_threads().context("Failed to start pattern workers")?;
        Ok(Self::with_workers(Arc::new(workers)))
    }

    pub fn with_workers(workers: Arc<Workers>) -> Self {
        Self {
            workers,
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Readers opened so far
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

impl ReadPlugin for PatternPlugin {
    fn open(&self, media: &MediaReference, options: &IoOptions) -> Result<Arc<dyn MediaReader>> {
        let url = media.url().ok_or_else(|| anyhow!("Media reference is missing"))?;
        let spec = PatternSpec::parse(url)?.overridden(options);
        self.opened.fetch_add(1, Ordering::Relaxed);
        debug!("Pattern reader opened: {}", url);
        Ok(Arc::new(PatternReader {
            spec: Arc::new(spec),
            workers: Arc::clone(&self.workers),
            epoch: Epoch::new(),
        }))
    }
}

/// Reader generating frames on the shared worker pool
#[derive(Debug)]
pub struct PatternReader {
    spec: Arc<PatternSpec>,
    workers: Arc<Workers>,
    epoch: Epoch,
}

impl PatternReader {
    pub fn spec(&self) -> &PatternSpec {
        &self.spec
    }

    fn submit<T, F>(&self, options: &IoOptions, job: F) -> Future<ReadResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&PatternSpec) -> ReadResult<T> + Send + 'static,
    {
        let (tx, rx) = promise::channel();
        let spec = if options.is_empty() {
            Arc::clone(&self.spec)
        } else {
            Arc::new(self.spec.overridden(options))
        };
        self.workers.execute_with_epoch(&self.epoch, move || {
            if !spec.delay.is_zero() {
                thread::sleep(spec.delay);
            }
            tx.set(job(spec.as_ref()));
        });
        rx
    }
}

impl MediaReader for PatternReader {
    fn info(&self) -> Future<ReadResult<IoInfo>> {
        Future::ready(Ok(self.spec.info()))
    }

    fn read_video(&self, time: RationalTime, options: &ReadOptions) -> Future<ReadResult<VideoFrame>> {
        trace!("pattern read_video {}", time);
        let layer = options.video_layer;
        self.submit(&options.io, move |spec| spec.decode_video(time, layer))
    }

    fn read_audio(&self, range: TimeRange, options: &IoOptions) -> Future<ReadResult<AudioFrame>> {
        trace!("pattern read_audio {}", range);
        self.submit(options, move |spec| spec.decode_audio(range))
    }

    fn cancel_requests(&self) {
        let epoch = self.epoch.bump();
        trace!("pattern reader cancelled (epoch {})", epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin() -> PatternPlugin {
        PatternPlugin::with_workers(Arc::new(Workers::new(2).unwrap()))
    }

    #[test]
    fn test_url_round_trip_keeps_fields() {
        let spec = PatternSpec::video(100, 25.0)
            .with_start(1000)
            .with_size(8, 4)
            .with_audio(AudioPattern::Constant(0.25), AudioInfo::new(1, 100));
        let parsed = PatternSpec::parse(&spec.to_url()).unwrap();
        assert_eq!(parsed, spec);
        assert!(PatternSpec::parse("pattern:frames=0").is_err());
        assert!(PatternSpec::parse("file:/tmp/x.exr").is_err());
    }

    #[test]
    fn test_video_frame_value_is_media_frame() {
        let spec = PatternSpec::video(500, 24.0).with_start(100);
        let reader = plugin()
            .open(&MediaReference::external(spec.to_url()), &IoOptions::new())
            .unwrap();
        let frame = reader
            .read_video(RationalTime::new(300.0, 24.0), &ReadOptions::default())
            .wait()
            .unwrap()
            .unwrap();
        assert_eq!(frame.image.first_value(), Some((300 % 256) as u8));

        let err = reader
            .read_video(RationalTime::new(50.0, 24.0), &ReadOptions::default())
            .wait()
            .unwrap();
        assert!(matches!(err, Err(ReadError::OutOfRange { .. })));
    }

    #[test]
    fn test_audio_read_pads_outside_media() {
        let info = AudioInfo::new(2, 10);
        let spec = PatternSpec::video(10, 10.0).with_audio(AudioPattern::Constant(1.0), info);
        let reader = plugin()
            .open(&MediaReference::external(spec.to_url()), &IoOptions::new())
            .unwrap();
        let range = TimeRange::from_frames(5, 10, 10.0);
        let frame = reader.read_audio(range, &IoOptions::new()).wait().unwrap().unwrap();
        assert_eq!(frame.audio.frames(), 10);
        assert_eq!(frame.audio.sample(4, 1), 1.0);
        assert_eq!(frame.audio.sample(5, 0), 0.0);
    }

    #[test]
    fn test_options_force_failure() {
        let spec = PatternSpec::video(10, 24.0);
        let options = IoOptions::new().with("pattern/fail_video", "true");
        let reader = plugin()
            .open(&MediaReference::external(spec.to_url()), &options)
            .unwrap();
        let result = reader
            .read_video(RationalTime::new(1.0, 24.0), &ReadOptions::default())
            .wait()
            .unwrap();
        assert!(matches!(result, Err(ReadError::Decode(_))));
        assert!(plugin().open(&MediaReference::Missing, &IoOptions::new()).is_err());
    }

    #[test]
    fn test_layers_halve_resolution() {
        let spec = PatternSpec {
            layers: 2,
            ..PatternSpec::video(10, 24.0).with_size(64, 32)
        };
        let info = spec.info();
        assert_eq!(info.video.len(), 2);
        assert_eq!((info.video[1].width, info.video[1].height), (32, 16));
        assert!(!info.has_audio());
    }
}
