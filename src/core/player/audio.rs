//! Audio state and the realtime half of the output bridge.
//!
//! **Why**: The audio callback runs on a device thread that must never wait
//! on the engine. Everything it touches (audio cache, volume, direction,
//! sample clock) lives under one short-held mutex, separate from the
//! playback state mutex.
//!
//! **Used by**: Player (setters, tick clock), cache thread (audio cache
//! fill/evict), output device callback via [`AudioBridge::render`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use log::debug;

use super::playback::Playback;
use crate::entities::{AudioData, AudioInfo};
use crate::utils::time::RationalTime;

/// Audio mutex payload
#[derive(Debug)]
pub(crate) struct AudioState {
    pub info: AudioInfo,
    pub cache: BTreeMap<i64, AudioData>,
    pub playback: Playback,
    pub speed: f64,
    pub default_speed: f64,
    pub volume: f32,
    pub mute: bool,
    pub channel_mute: Vec<bool>,
    /// Seconds added to the source position
    pub audio_offset: f64,
    pub mute_until: Option<Instant>,
    /// Timeline time at sample position zero
    pub start_time: RationalTime,
    /// Frames rendered since the last reset
    pub position: usize,
    pub reset: bool,
    pub connected: bool,
    pub buffer_frame_count: usize,
    pub device: String,
}

impl AudioState {
    pub fn new(info: AudioInfo, default_speed: f64, buffer_frame_count: usize, device: String) -> Self {
        Self {
            info,
            cache: BTreeMap::new(),
            playback: Playback::Stop,
            speed: default_speed,
            default_speed,
            volume: 1.0,
            mute: false,
            channel_mute: Vec::new(),
            audio_offset: 0.0,
            mute_until: None,
            start_time: RationalTime::new(0.0, default_speed),
            position: 0,
            reset: false,
            connected: false,
            buffer_frame_count,
            device,
        }
    }

    /// Restart the sample clock at `time`.
    pub fn restart(&mut self, time: RationalTime) {
        self.start_time = time;
        self.position = 0;
        self.reset = true;
    }

    /// Audio drives the clock only at normal speed with a device attached.
    pub fn drives_clock(&self) -> bool {
        self.connected && self.info.is_valid() && (self.speed - self.default_speed).abs() < 1e-9
    }

    /// Timeline time reached by the sample clock
    pub fn clock_time(&self) -> RationalTime {
        let rate = self.start_time.rate();
        let elapsed = self.position as f64 / self.info.sample_rate.max(1) as f64;
        let delta = RationalTime::from_seconds(elapsed, rate);
        match self.playback {
            Playback::Reverse => self.start_time - delta,
            _ => self.start_time + delta,
        }
    }
}

pub(crate) type SharedAudio = Arc<Mutex<AudioState>>;

pub(crate) fn lock(audio: &SharedAudio) -> MutexGuard<'_, AudioState> {
    audio.lock().unwrap_or_else(|e| e.into_inner())
}

/// Cheap-clone handle for an audio output device.
///
/// # Example
/// ```ignore
/// let bridge = player.audio_bridge();
/// bridge.connect();
/// // on the device thread:
/// bridge.render(&mut interleaved);
/// ```
#[derive(Clone)]
pub struct AudioBridge {
    audio: SharedAudio,
}

impl std::fmt::Debug for AudioBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.audio);
        f.debug_struct("AudioBridge")
            .field("info", &state.info)
            .field("connected", &state.connected)
            .finish()
    }
}

impl AudioBridge {
    pub(crate) fn new(audio: SharedAudio) -> Self {
        Self { audio }
    }

    /// Mark an output stream present. Audio takes over the player clock
    /// from the next tick.
    pub fn connect(&self) {
        let mut state = lock(&self.audio);
        state.connected = true;
        debug!("Audio output connected: '{}'", state.device);
    }

    pub fn disconnect(&self) {
        let mut state = lock(&self.audio);
        state.connected = false;
        debug!("Audio output disconnected");
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.audio).connected
    }

    /// Timeline audio format; render output is interleaved in it.
    pub fn info(&self) -> AudioInfo {
        lock(&self.audio).info
    }

    pub fn buffer_frame_count(&self) -> usize {
        lock(&self.audio).buffer_frame_count
    }

    pub fn device(&self) -> String {
        lock(&self.audio).device.clone()
    }

    /// Frames rendered since the last clock reset
    pub fn samples(&self) -> usize {
        lock(&self.audio).position
    }

    /// Fill `out` (interleaved, timeline format) from the audio cache.
    ///
    /// Missing seconds render as silence. Stopped playback or off-speed
    /// playback renders silence without advancing the clock.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let mut state = lock(&self.audio);
        if state.reset {
            state.position = 0;
            state.reset = false;
        }
        let channels = state.info.channel_count;
        let sample_rate = state.info.sample_rate as i64;
        if channels == 0 || sample_rate == 0 {
            return;
        }
        if state.playback == Playback::Stop || (state.speed - state.default_speed).abs() > 1e-9 {
            return;
        }
        let frames = out.len() / channels;
        let muted = state.mute || state.mute_until.is_some_and(|until| Instant::now() < until);
        let start = ((state.start_time.to_seconds() + state.audio_offset) * sample_rate as f64).round() as i64;
        let sign = state.playback.sign();

        if !muted {
            let mut cached: Option<(i64, &AudioData)> = None;
            for frame in 0..frames {
                let sample = start + sign * (state.position + frame) as i64;
                let second = sample.div_euclid(sample_rate);
                let index = sample.rem_euclid(sample_rate) as usize;
                if cached.map(|(s, _)| s) != Some(second) {
                    cached = state.cache.get(&second).map(|data| (second, data));
                }
                let Some((_, data)) = cached else {
                    continue;
                };
                for channel in 0..channels {
                    if state.channel_mute.get(channel).copied().unwrap_or(false) {
                        continue;
                    }
                    out[frame * channels + channel] = data.mixed_sample(index, channel) * state.volume;
                }
            }
        }
        state.position += frames;
    }
}
