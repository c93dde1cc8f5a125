//! Timeline player: playback state machine over a background cache.
//!
//! **Architecture**: The owner thread calls setters and [`Player::tick`]; it
//! never waits on media. The `tlplay-player` thread owns the video cache and
//! in-flight requests and publishes "current" data by cache lookup. The audio
//! output device renders through an [`AudioBridge`].
//!
//! Three locks, never nested across owners:
//! - state mutex: [`PlaybackState`] snapshot, dirty flags, published data;
//! - audio mutex: audio cache and sample clock;
//! - anchor mutex: wall-clock reference for `tick`.
//!
//! # Timing
//!
//! With an output stream connected and speed at the timeline rate, current
//! time follows the audio sample clock. Otherwise it follows wall-clock time
//! from the last anchor, scaled by speed. Anchors reset on every playback
//! change, seek, loop wrap and ping-pong flip.

mod audio;
mod cache;
mod playback;
mod state;
mod thread;

pub use audio::AudioBridge;
pub use cache::{audio_capacity, evict, video_capacity, KeyWindow};
pub use playback::{correct_playback_edge, loop_playback, CacheDirection, Loop, LoopOutcome, Playback, TimeAction};
pub use state::{CacheInfo, CacheOptions, CompareSet, CompareTime, PlaybackState, PlayerOptions};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{Context, Result};
use log::{debug, info, trace};

use crate::core::observer::Observable;
use crate::core::timeline::Timeline;
use crate::entities::{AudioData, VideoData};
use crate::io::IoOptions;
use crate::utils::time::{loop_time, RationalTime, TimeRange};

use audio::{AudioState, SharedAudio};
use state::SharedState;
use thread::{lock_state, CacheThread};

/// Wall-clock reference for non-audio timing
#[derive(Debug, Clone, Copy)]
struct Anchor {
    time: RationalTime,
    instant: Instant,
    /// Whether the audio clock drove the last tick
    audio_clock: bool,
}

/// Plays one timeline (plus an optional compare set).
pub struct Player {
    timeline: Arc<Timeline>,
    options: PlayerOptions,

    playback: Observable<Playback>,
    loop_mode: Observable<Loop>,
    speed: Observable<f64>,
    current_time: Observable<RationalTime>,
    in_out_range: Observable<TimeRange>,
    compare: Observable<CompareSet>,
    compare_time: Observable<CompareTime>,
    io_options: Observable<IoOptions>,
    video_layer: Observable<u16>,
    compare_video_layers: Observable<Vec<u16>>,
    volume: Observable<f32>,
    mute: Observable<bool>,
    channel_mute: Observable<Vec<bool>>,
    audio_offset: Observable<f64>,
    cache_options: Observable<CacheOptions>,
    current_video: Observable<Vec<VideoData>>,
    current_audio: Observable<Vec<AudioData>>,
    cache_info: Observable<CacheInfo>,

    shared: Arc<Mutex<SharedState>>,
    audio: SharedAudio,
    anchor: Mutex<Anchor>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("timeline", &self.timeline.name())
            .field("playback", &self.playback.get())
            .field("current_time", &self.current_time.get())
            .finish()
    }
}

impl Player {
    /// Start playing `timeline`: current time at `options.starting_time`
    /// (looped into range) or the range start, in/out = full range.
    pub fn new(timeline: Arc<Timeline>, options: PlayerOptions) -> Result<Self> {
        let range = timeline.time_range();
        let rate = timeline.rate();
        let start = match options.starting_time {
            Some(time) => loop_time(time.rescaled_to(rate).floor(), &range).0,
            None => range.start_time().rescaled_to(rate),
        };
        let io_info = timeline.io_info().clone();

        let state = PlaybackState {
            current_time: start,
            in_out_range: range,
            ..Default::default()
        };
        let cache_options = state.cache_options.clone();
        let shared = Arc::new(Mutex::new(SharedState {
            state,
            ..Default::default()
        }));

        let mut audio_state = AudioState::new(
            io_info.audio,
            rate,
            options.audio_buffer_frame_count,
            options.audio_device.clone(),
        );
        audio_state.start_time = start;
        let audio = Arc::new(Mutex::new(audio_state));

        let running = Arc::new(AtomicBool::new(true));
        let worker = CacheThread::new(
            Arc::clone(&timeline),
            options.clone(),
            Arc::clone(&shared),
            Arc::clone(&audio),
            Arc::clone(&running),
        );
        let thread = std::thread::Builder::new()
            .name("tlplay-player".into())
            .spawn(move || worker.run())
            .context("Failed to spawn player thread")?;

        info!("Player '{}' started at {}", timeline.name(), start);

        Ok(Self {
            playback: Observable::new(Playback::Stop),
            loop_mode: Observable::new(Loop::Loop),
            speed: Observable::new(rate),
            current_time: Observable::new(start),
            in_out_range: Observable::new(range),
            compare: Observable::default(),
            compare_time: Observable::default(),
            io_options: Observable::default(),
            video_layer: Observable::new(0),
            compare_video_layers: Observable::default(),
            volume: Observable::new(1.0),
            mute: Observable::new(false),
            channel_mute: Observable::default(),
            audio_offset: Observable::new(0.0),
            cache_options: Observable::new(cache_options),
            current_video: Observable::default(),
            current_audio: Observable::default(),
            cache_info: Observable::default(),
            anchor: Mutex::new(Anchor {
                time: start,
                instant: Instant::now(),
                audio_clock: false,
            }),
            timeline,
            options,
            shared,
            audio,
            running,
            thread: Some(thread),
        })
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    pub fn options(&self) -> &PlayerOptions {
        &self.options
    }

    pub fn time_range(&self) -> TimeRange {
        self.timeline.time_range()
    }

    /// Handle for an audio output device
    pub fn audio_bridge(&self) -> AudioBridge {
        AudioBridge::new(Arc::clone(&self.audio))
    }

    fn shared(&self) -> MutexGuard<'_, SharedState> {
        lock_state(&self.shared)
    }

    fn anchor(&self) -> MutexGuard<'_, Anchor> {
        self.anchor.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reset_anchor(&self, time: RationalTime, now: Instant) {
        let mut anchor = self.anchor();
        anchor.time = time;
        anchor.instant = now;
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    pub fn playback(&self) -> Playback {
        self.playback.get()
    }

    pub fn set_playback(&self, value: Playback) {
        let (value, seek) = match value {
            Playback::Stop => (Playback::Stop, None),
            _ => correct_playback_edge(value, self.current_time.get(), &self.in_out_range.get(), self.loop_mode.get()),
        };
        if let Some(time) = seek {
            self.seek(time);
        }
        if !self.playback.set(value) {
            return;
        }
        let time = self.current_time.get();
        let now = Instant::now();
        self.reset_anchor(time, now);
        {
            let mut shared = self.shared();
            shared.state.playback = value;
            shared.clear_requests = true;
            if let Some(direction) = CacheDirection::from_playback(value) {
                shared.cache_direction = direction;
            }
        }
        {
            let mut audio = audio::lock(&self.audio);
            audio.playback = value;
            audio.restart(time);
            audio.mute_until = Some(now + self.options.mute_timeout);
        }
        debug!("Playback: {:?} at {}", value, time);
    }

    /// Stop, or resume forward when stopped.
    pub fn toggle_playback(&self) {
        if self.is_stopped() {
            self.set_playback(Playback::Forward);
        } else {
            self.set_playback(Playback::Stop);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.playback.get() == Playback::Stop
    }

    pub fn loop_mode(&self) -> Loop {
        self.loop_mode.get()
    }

    pub fn set_loop(&self, value: Loop) {
        if self.loop_mode.set(value) {
            debug!("Loop mode: {:?}", value);
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed.get()
    }

    /// Timeline rate
    pub fn default_speed(&self) -> f64 {
        self.timeline.rate()
    }

    pub fn set_speed(&self, value: f64) {
        if !self.speed.set(value) {
            return;
        }
        let time = self.current_time.get();
        self.reset_anchor(time, Instant::now());
        let mut audio = audio::lock(&self.audio);
        audio.speed = value;
        audio.restart(time);
    }

    // ------------------------------------------------------------------
    // Time
    // ------------------------------------------------------------------

    pub fn current_time(&self) -> RationalTime {
        self.current_time.get()
    }

    /// Move to `time`, floored to the timeline rate and looped into the full
    /// range. No-op when the time does not change.
    pub fn seek(&self, time: RationalTime) {
        let rate = self.timeline.rate();
        let (time, _) = loop_time(time.rescaled_to(rate).floor(), &self.timeline.time_range());
        if !self.current_time.set(time) {
            return;
        }
        trace!("Seek: {}", time);
        self.reset_anchor(time, Instant::now());
        {
            let mut shared = self.shared();
            shared.state.current_time = time;
            shared.clear_requests = true;
        }
        audio::lock(&self.audio).restart(time);
    }

    pub fn time_action(&self, action: TimeAction) {
        let rate = self.timeline.rate();
        let range = self.in_out_range.get();
        match action {
            TimeAction::Start => self.seek(range.start_time()),
            TimeAction::End => self.seek(range.end_time_inclusive()),
            _ => {
                if let Some(step) = action.frame_step() {
                    self.set_playback(Playback::Stop);
                    self.seek(self.current_time.get() + RationalTime::from_frames(step, rate));
                } else if let Some(seconds) = action.jump_seconds() {
                    self.seek(self.current_time.get() + RationalTime::from_seconds(seconds, rate));
                }
            }
        }
    }

    pub fn go_to_start(&self) {
        self.time_action(TimeAction::Start);
    }

    pub fn go_to_end(&self) {
        self.time_action(TimeAction::End);
    }

    pub fn frame_prev(&self) {
        self.time_action(TimeAction::FramePrev);
    }

    pub fn frame_next(&self) {
        self.time_action(TimeAction::FrameNext);
    }

    // ------------------------------------------------------------------
    // In/out range
    // ------------------------------------------------------------------

    pub fn in_out_range(&self) -> TimeRange {
        self.in_out_range.get()
    }

    /// Set the in/out range, clamped to the full range.
    pub fn set_in_out_range(&self, range: TimeRange) {
        let full = self.timeline.time_range();
        let start = full.clamped(range.start_time());
        let end = full.clamped(range.end_time_inclusive());
        let end = if end < start { start } else { end };
        let range = TimeRange::from_start_end_inclusive(start, end);
        if !self.in_out_range.set(range) {
            return;
        }
        debug!("In/out: {}", range);
        let mut shared = self.shared();
        shared.state.in_out_range = range;
        shared.clear_requests = true;
    }

    pub fn set_in_point(&self) {
        let range = self.in_out_range.get();
        self.set_in_out_range(TimeRange::from_start_end_inclusive(
            self.current_time.get(),
            range.end_time_inclusive(),
        ));
    }

    pub fn reset_in_point(&self) {
        let range = self.in_out_range.get();
        self.set_in_out_range(TimeRange::from_start_end_inclusive(
            self.timeline.time_range().start_time(),
            range.end_time_inclusive(),
        ));
    }

    pub fn set_out_point(&self) {
        let range = self.in_out_range.get();
        self.set_in_out_range(TimeRange::from_start_end_inclusive(range.start_time(), self.current_time.get()));
    }

    pub fn reset_out_point(&self) {
        let range = self.in_out_range.get();
        self.set_in_out_range(TimeRange::from_start_end_inclusive(
            range.start_time(),
            self.timeline.time_range().end_time_inclusive(),
        ));
    }

    // ------------------------------------------------------------------
    // Cache-invalidating settings
    // ------------------------------------------------------------------

    fn invalidate(&self, update: impl FnOnce(&mut PlaybackState)) {
        let mut shared = self.shared();
        update(&mut shared.state);
        shared.clear_requests = true;
        shared.clear_cache = true;
    }

    pub fn set_compare(&self, value: Vec<Arc<Timeline>>) {
        let value = CompareSet(value);
        if self.compare.set(value.clone()) {
            debug!("Compare: {:?}", value);
            self.invalidate(|state| state.compare = value);
        }
    }

    pub fn set_compare_time(&self, value: CompareTime) {
        if self.compare_time.set(value) {
            self.invalidate(|state| state.compare_time = value);
        }
    }

    pub fn set_io_options(&self, value: IoOptions) {
        if self.io_options.set(value.clone()) {
            self.invalidate(|state| state.io_options = value);
        }
    }

    pub fn set_video_layer(&self, value: u16) {
        if self.video_layer.set(value) {
            self.invalidate(|state| state.video_layer = value);
        }
    }

    pub fn set_compare_video_layers(&self, value: Vec<u16>) {
        if self.compare_video_layers.set(value.clone()) {
            self.invalidate(|state| state.compare_video_layers = value);
        }
    }

    /// New cache budget. Outstanding requests and cached data stay valid.
    pub fn set_cache_options(&self, value: CacheOptions) {
        if self.cache_options.set(value.clone()) {
            debug!("Cache options: {:?}", value);
            self.shared().state.cache_options = value;
        }
    }

    // ------------------------------------------------------------------
    // Audio
    // ------------------------------------------------------------------

    pub fn set_volume(&self, value: f32) {
        let value = value.clamp(0.0, 1.0);
        if self.volume.set(value) {
            audio::lock(&self.audio).volume = value;
        }
    }

    pub fn set_mute(&self, value: bool) {
        if self.mute.set(value) {
            audio::lock(&self.audio).mute = value;
        }
    }

    pub fn set_channel_mute(&self, value: Vec<bool>) {
        if self.channel_mute.set(value.clone()) {
            audio::lock(&self.audio).channel_mute = value;
        }
    }

    /// Seconds added to the audio source position
    pub fn set_audio_offset(&self, value: f64) {
        if !self.audio_offset.set(value) {
            return;
        }
        {
            let mut shared = self.shared();
            shared.state.audio_offset = value;
            shared.clear_requests = true;
        }
        audio::lock(&self.audio).audio_offset = value;
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advance current time and publish cached data. Call once per frame.
    pub fn tick(&self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&self, now: Instant) {
        let playback = self.playback.get();
        if playback != Playback::Stop {
            self.advance(now, playback);
        }

        let (video, audio, info) = {
            let shared = self.shared();
            (
                shared.current_video.clone(),
                shared.current_audio.clone(),
                shared.cache_info.clone(),
            )
        };
        self.current_video.set(video);
        self.current_audio.set(audio);
        self.cache_info.set(info);
    }

    fn clock_time(&self, now: Instant, playback: Playback) -> RationalTime {
        let rate = self.timeline.rate();
        let audio_clock = {
            let audio = audio::lock(&self.audio);
            audio.drives_clock().then(|| audio.clock_time())
        };
        let mut anchor = self.anchor();
        if anchor.audio_clock != audio_clock.is_some() {
            // Clock source changed: continue from where we are.
            let current = self.current_time.get();
            *anchor = Anchor {
                time: current,
                instant: now,
                audio_clock: audio_clock.is_some(),
            };
            drop(anchor);
            audio::lock(&self.audio).restart(current);
            debug!(
                "Clock source: {}",
                if audio_clock.is_some() { "audio" } else { "wall clock" }
            );
            return current;
        }
        match audio_clock {
            Some(time) => time.rescaled_to(rate).floor(),
            None => {
                let elapsed = now.saturating_duration_since(anchor.instant).as_secs_f64();
                let frames = elapsed * self.speed.get() * playback.sign() as f64;
                (anchor.time.rescaled_to(rate) + RationalTime::new(frames, rate)).floor()
            }
        }
    }

    fn advance(&self, now: Instant, playback: Playback) {
        let time = self.clock_time(now, playback);
        let outcome = loop_playback(time, &self.in_out_range.get(), self.loop_mode.get(), playback);

        if outcome.looped {
            trace!("Looped to {}", outcome.time);
            self.reset_anchor(outcome.time, now);
            audio::lock(&self.audio).restart(outcome.time);
        }
        if outcome.clamped {
            self.playback.set(outcome.playback);
            self.reset_anchor(outcome.time, now);
            {
                let mut shared = self.shared();
                shared.state.playback = outcome.playback;
                shared.clear_requests = true;
                if let Some(direction) = CacheDirection::from_playback(outcome.playback) {
                    shared.cache_direction = direction;
                }
            }
            let mut audio = audio::lock(&self.audio);
            audio.playback = outcome.playback;
            audio.restart(outcome.time);
            debug!("Boundary at {}: playback {:?}", outcome.time, outcome.playback);
        }

        if self.current_time.set(outcome.time) {
            self.shared().state.current_time = outcome.time;
        }
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn observe_playback(&self) -> Observable<Playback> {
        self.playback.clone()
    }

    pub fn observe_loop(&self) -> Observable<Loop> {
        self.loop_mode.clone()
    }

    pub fn observe_speed(&self) -> Observable<f64> {
        self.speed.clone()
    }

    pub fn observe_current_time(&self) -> Observable<RationalTime> {
        self.current_time.clone()
    }

    pub fn observe_in_out_range(&self) -> Observable<TimeRange> {
        self.in_out_range.clone()
    }

    pub fn observe_compare(&self) -> Observable<CompareSet> {
        self.compare.clone()
    }

    pub fn observe_compare_time(&self) -> Observable<CompareTime> {
        self.compare_time.clone()
    }

    pub fn observe_io_options(&self) -> Observable<IoOptions> {
        self.io_options.clone()
    }

    pub fn observe_video_layer(&self) -> Observable<u16> {
        self.video_layer.clone()
    }

    pub fn observe_compare_video_layers(&self) -> Observable<Vec<u16>> {
        self.compare_video_layers.clone()
    }

    pub fn observe_volume(&self) -> Observable<f32> {
        self.volume.clone()
    }

    pub fn observe_mute(&self) -> Observable<bool> {
        self.mute.clone()
    }

    pub fn observe_channel_mute(&self) -> Observable<Vec<bool>> {
        self.channel_mute.clone()
    }

    pub fn observe_audio_offset(&self) -> Observable<f64> {
        self.audio_offset.clone()
    }

    pub fn observe_cache_options(&self) -> Observable<CacheOptions> {
        self.cache_options.clone()
    }

    /// One `VideoData` per timeline: primary first, then the compare set.
    pub fn observe_current_video(&self) -> Observable<Vec<VideoData>> {
        self.current_video.clone()
    }

    pub fn observe_current_audio(&self) -> Observable<Vec<AudioData>> {
        self.current_audio.clone()
    }

    pub fn observe_cache_info(&self) -> Observable<CacheInfo> {
        self.cache_info.clone()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("Player '{}' stopped", self.timeline.name());
    }
}
