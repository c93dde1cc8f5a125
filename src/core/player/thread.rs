//! Player cache thread: window, eviction, fill and publish.
//!
//! Owns the video cache and both request maps outright. Talks to the owner
//! only through the state mutex (snapshot + dirty flags in, current data and
//! cache info out) and to the audio callback through the audio mutex.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};

use super::audio::{self, SharedAudio};
use super::cache::{audio_capacity, evict, video_capacity, KeyWindow};
use super::playback::CacheDirection;
use super::state::{CacheInfo, PlayerOptions, PlaybackState, SharedState};
use crate::core::promise::Poll;
use crate::core::timeline::{AudioRequest, Timeline, VideoRequest};
use crate::entities::{AudioData, VideoData};
use crate::io::ReadOptions;
use crate::utils::ranges::keys_to_ranges;
use crate::utils::time::RationalTime;

const CACHE_INFO_PERIOD: Duration = Duration::from_millis(500);

/// Lock the state mutex, recovering from poison.
pub(crate) fn lock_state(state: &Mutex<SharedState>) -> std::sync::MutexGuard<'_, SharedState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// One frame key fanned out to the primary and every compared timeline.
struct VideoFetch {
    requests: Vec<Option<VideoRequest>>,
    results: Vec<Option<VideoData>>,
}

impl VideoFetch {
    /// Poll every pending request. Returns the composite once all resolved.
    fn poll(&mut self) -> Option<Vec<VideoData>> {
        for (slot, result) in self.requests.iter_mut().zip(self.results.iter_mut()) {
            let Some(request) = slot else { continue };
            match request.poll() {
                Poll::Pending => {}
                Poll::Ready(data) => {
                    *result = Some(data);
                    *slot = None;
                }
                Poll::Abandoned => {
                    *result = Some(VideoData::empty(request.time(), Default::default()));
                    *slot = None;
                }
            }
        }
        if self.requests.iter().any(Option::is_some) {
            return None;
        }
        Some(self.results.iter_mut().map(|r| r.take().unwrap_or_default()).collect())
    }
}

pub(crate) struct CacheThread {
    timeline: Arc<Timeline>,
    options: PlayerOptions,
    state: Arc<Mutex<SharedState>>,
    audio: SharedAudio,
    running: Arc<AtomicBool>,

    snapshot: PlaybackState,
    direction: CacheDirection,
    video_cache: BTreeMap<i64, Vec<VideoData>>,
    video_requests: BTreeMap<i64, VideoFetch>,
    audio_requests: BTreeMap<i64, AudioRequest>,
    video_window: Option<KeyWindow>,
    audio_window: Option<KeyWindow>,
    /// Keys requested since the last state change (video, audio)
    filled: (usize, usize),
    last_info: Option<Instant>,
}

impl CacheThread {
    pub fn new(
        timeline: Arc<Timeline>,
        options: PlayerOptions,
        state: Arc<Mutex<SharedState>>,
        audio: SharedAudio,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            timeline,
            options,
            state,
            audio,
            running,
            snapshot: PlaybackState::default(),
            direction: CacheDirection::Forward,
            video_cache: BTreeMap::new(),
            video_requests: BTreeMap::new(),
            audio_requests: BTreeMap::new(),
            video_window: None,
            audio_window: None,
            filled: (0, 0),
            last_info: None,
        }
    }

    pub fn run(mut self) {
        debug!("Player thread started: {}", self.timeline.name());
        while self.running.load(Ordering::Acquire) {
            let started = Instant::now();
            self.iterate();
            let elapsed = started.elapsed();
            if elapsed < self.options.sleep_timeout {
                thread::sleep(self.options.sleep_timeout - elapsed);
            }
        }
        self.cancel_requests();
        debug!(
            "Player thread stopped: {} ({} video frames cached)",
            self.timeline.name(),
            self.video_cache.len()
        );
    }

    fn iterate(&mut self) {
        let (state, direction, clear_requests, clear_cache) = {
            let mut shared = lock_state(&self.state);
            (
                shared.state.clone(),
                shared.cache_direction,
                std::mem::take(&mut shared.clear_requests),
                std::mem::take(&mut shared.clear_cache),
            )
        };
        // Cancel against the snapshot the requests were issued under.
        if clear_requests {
            self.cancel_requests();
        }
        if state != self.snapshot || direction != self.direction {
            self.filled = (0, 0);
            self.snapshot = state;
            self.direction = direction;
        }
        if clear_cache {
            self.clear_cache();
        }

        self.update_windows();
        self.fill_video();
        self.fill_audio();
        self.poll_requests();
        self.publish_current();

        let now = Instant::now();
        if self.last_info.is_none_or(|t| now.duration_since(t) >= CACHE_INFO_PERIOD) {
            self.last_info = Some(now);
            self.publish_cache_info();
        }
    }

    /// Cancel every in-flight request on the primary and compared timelines.
    fn cancel_requests(&mut self) {
        let compare = self.snapshot.compare.clone();
        let mut primary_ids = Vec::new();
        let mut compare_ids: Vec<Vec<u64>> = vec![Vec::new(); compare.len()];
        for fetch in std::mem::take(&mut self.video_requests).into_values() {
            for (index, request) in fetch.requests.into_iter().enumerate() {
                let Some(request) = request else { continue };
                match index {
                    0 => primary_ids.push(request.id()),
                    i => {
                        if let Some(ids) = compare_ids.get_mut(i - 1) {
                            ids.push(request.id());
                        }
                    }
                }
            }
        }
        primary_ids.extend(std::mem::take(&mut self.audio_requests).into_values().map(|r| r.id()));
        if !primary_ids.is_empty() {
            trace!("Cancelling {} primary request(s)", primary_ids.len());
        }
        self.timeline.cancel_requests(&primary_ids);
        for (timeline, ids) in compare.timelines().iter().zip(compare_ids) {
            timeline.cancel_requests(&ids);
        }
    }

    fn clear_cache(&mut self) {
        debug!("Cache cleared ({} video frames)", self.video_cache.len());
        self.video_cache.clear();
        audio::lock(&self.audio).cache.clear();
        let mut shared = lock_state(&self.state);
        shared.cache_info = CacheInfo::default();
        shared.current_video.clear();
        shared.current_audio.clear();
    }

    fn rate(&self) -> f64 {
        self.timeline.rate()
    }

    /// Bytes per cached key: primary selected layer plus each compared
    /// timeline's own selected layer.
    fn per_frame_bytes(&self) -> usize {
        let primary = self.timeline.image_info(self.snapshot.video_layer).byte_count();
        let compare: usize = self
            .snapshot
            .compare
            .timelines()
            .iter()
            .enumerate()
            .map(|(i, t)| t.image_info(self.snapshot.compare_layer(i)).byte_count())
            .sum();
        primary + compare
    }

    fn update_windows(&mut self) {
        let state = &self.snapshot;
        let in_out = state.in_out_range;
        if in_out.is_invalid() || state.current_time.is_invalid() {
            self.video_window = None;
            self.audio_window = None;
            return;
        }
        let rate = self.rate();
        let options = &state.cache_options;

        let in_key = in_out.start_time().to_frames_at(rate);
        let out_key = in_out.end_time_inclusive().to_frames_at(rate);
        let current = state.current_time.to_frames_at(rate);
        let capacity = video_capacity(options.video_gb, self.per_frame_bytes()) as i64;
        let behind = (options.read_behind * rate).ceil() as i64;
        let window = KeyWindow::new(current, capacity, behind, in_key, out_key, self.direction);
        let removed = evict(&mut self.video_cache, &window);
        if removed > 0 {
            trace!("Evicted {} video frame(s) outside [{}, {}]", removed, window.start, window.end);
        }
        self.video_window = Some(window);

        let info = self.timeline.io_info().audio;
        if !info.is_valid() {
            self.audio_window = None;
            return;
        }
        let offset = state.audio_offset;
        let in_sec = (in_out.start_time().to_seconds() + offset).floor() as i64;
        let out_sec = (in_out.end_time_inclusive().to_seconds() + offset).floor() as i64;
        let current_sec = (state.current_time.to_seconds() + offset).floor() as i64;
        let capacity = audio_capacity(options.audio_gb, info) as i64;
        let behind = options.read_behind.ceil() as i64;
        let window = KeyWindow::new(current_sec, capacity, behind, in_sec, out_sec, self.direction);
        evict(&mut audio::lock(&self.audio).cache, &window);
        self.audio_window = Some(window);
    }

    fn fill_video(&mut self) {
        let Some(window) = self.video_window else { return };
        let rate = self.rate();
        let primary_range = self.timeline.time_range();
        let read_options = ReadOptions {
            video_layer: self.snapshot.video_layer,
            io: self.snapshot.io_options.clone(),
        };
        for key in window.fetch_order() {
            if self.video_requests.len() >= self.options.video_request_max {
                break;
            }
            if self.video_cache.contains_key(&key) || self.video_requests.contains_key(&key) {
                continue;
            }
            let time = RationalTime::from_frames(key, rate);
            let mut requests = vec![Some(self.timeline.get_video(time, &read_options))];
            for (i, compare) in self.snapshot.compare.timelines().iter().enumerate() {
                let compare_time = self.snapshot.compare_time.map(time, &primary_range, &compare.time_range());
                let options = ReadOptions {
                    video_layer: self.snapshot.compare_layer(i),
                    io: self.snapshot.io_options.clone(),
                };
                requests.push(Some(compare.get_video(compare_time, &options)));
            }
            let results = (0..requests.len()).map(|_| None).collect();
            self.video_requests.insert(key, VideoFetch { requests, results });
            self.filled.0 += 1;
        }
    }

    fn fill_audio(&mut self) {
        let Some(window) = self.audio_window else { return };
        let cached: Vec<i64> = audio::lock(&self.audio).cache.keys().copied().collect();
        for second in window.fetch_order() {
            if self.audio_requests.len() >= self.options.audio_request_max {
                break;
            }
            if cached.binary_search(&second).is_ok() || self.audio_requests.contains_key(&second) {
                continue;
            }
            let request = self.timeline.get_audio(second, &self.snapshot.io_options);
            self.audio_requests.insert(second, request);
            self.filled.1 += 1;
        }
    }

    fn poll_requests(&mut self) {
        let mut done = Vec::new();
        for (key, fetch) in self.video_requests.iter_mut() {
            if let Some(data) = fetch.poll() {
                done.push((*key, data));
            }
        }
        for (key, data) in done {
            self.video_requests.remove(&key);
            if self.video_window.is_some_and(|w| w.retains(key)) {
                self.video_cache.insert(key, data);
            }
        }

        let mut done = Vec::new();
        for (second, request) in self.audio_requests.iter_mut() {
            match request.poll() {
                Poll::Pending => {}
                Poll::Ready(data) => done.push((*second, Some(data))),
                Poll::Abandoned => done.push((*second, None)),
            }
        }
        if done.is_empty() {
            return;
        }
        let mut audio = audio::lock(&self.audio);
        for (second, data) in done {
            self.audio_requests.remove(&second);
            if let Some(data) = data {
                if self.audio_window.is_some_and(|w| w.retains(second)) {
                    audio.cache.insert(second, data);
                }
            }
        }
    }

    /// Current video/audio by cache lookup. A miss publishes nothing.
    fn publish_current(&mut self) {
        let rate = self.rate();
        let current = self.snapshot.current_time;
        if current.is_invalid() {
            return;
        }
        let video = self.video_cache.get(&current.to_frames_at(rate)).cloned();
        let second = (current.to_seconds() + self.snapshot.audio_offset).floor() as i64;
        let audio: Option<AudioData> = audio::lock(&self.audio).cache.get(&second).cloned();

        let mut shared = lock_state(&self.state);
        if let Some(video) = video {
            shared.current_video = video;
        }
        if let Some(audio) = audio {
            shared.current_audio = vec![audio];
        }
    }

    fn publish_cache_info(&mut self) {
        let rate = self.rate();
        let mut info = CacheInfo::default();
        if let Some(window) = self.video_window {
            let count = self.video_cache.len();
            info.video_percentage = percentage(count, window.key_count());
            info.video_frames = keys_to_ranges(self.video_cache.keys().copied(), rate);
        }
        if let Some(window) = self.audio_window {
            let audio = audio::lock(&self.audio);
            info.audio_percentage = percentage(audio.cache.len(), window.key_count());
            info.audio_seconds = keys_to_ranges(audio.cache.keys().copied(), 1.0);
        }
        trace!(
            "Cache: video {:.0}% ({} frames) audio {:.0}%, requested {}/{} since last change",
            info.video_percentage,
            self.video_cache.len(),
            info.audio_percentage,
            self.filled.0,
            self.filled.1
        );
        lock_state(&self.state).cache_info = info;
    }
}

fn percentage(count: usize, total: usize) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (count as f32 / total as f32 * 100.0).min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::player::audio::AudioState;
    use crate::core::player::state::{CacheOptions, CompareSet};
    use crate::core::timeline::TimelineOptions;
    use crate::core::workers::Workers;
    use crate::entities::{AudioInfo, Clip, Composition, Item, MediaReference, Track};
    use crate::io::{PatternPlugin, PatternSpec};
    use crate::utils::time::TimeRange;

    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    fn timeline(spec: PatternSpec) -> Arc<Timeline> {
        let clip = Clip::new(
            "a",
            MediaReference::external(spec.to_url()),
            TimeRange::from_frames(0, 48, 24.0),
        );
        let comp = Composition::new(
            "comp",
            RationalTime::new(0.0, 24.0),
            vec![Track::video("V1").with_item(Item::Clip(clip))],
        );
        let plugin = Arc::new(PatternPlugin::with_workers(Arc::new(Workers::new(1).unwrap())));
        Arc::new(Timeline::new(comp, plugin, TimelineOptions::default()).unwrap())
    }

    fn cache_thread(timeline: Arc<Timeline>) -> CacheThread {
        let audio = AudioState::new(AudioInfo::default(), 24.0, 1024, String::new());
        CacheThread::new(
            timeline,
            PlayerOptions::default(),
            Arc::new(Mutex::new(SharedState::default())),
            Arc::new(Mutex::new(audio)),
            Arc::new(AtomicBool::new(true)),
        )
    }

    #[test]
    fn test_budget_counts_each_compared_layer() {
        // 64x36 RGBA8
        let primary = timeline(PatternSpec::video(48, 24.0));
        // 32x18, layer 1 is 16x9
        let other = timeline(PatternSpec {
            layers: 2,
            ..PatternSpec::video(48, 24.0).with_size(32, 18)
        });
        let mut thread = cache_thread(Arc::clone(&primary));
        thread.snapshot = PlaybackState {
            current_time: RationalTime::new(0.0, 24.0),
            in_out_range: primary.time_range(),
            ..Default::default()
        };
        assert_eq!(thread.per_frame_bytes(), 64 * 36 * 4);

        thread.snapshot.compare = CompareSet(vec![other]);
        assert_eq!(thread.per_frame_bytes(), 64 * 36 * 4 + 32 * 18 * 4);
        thread.snapshot.compare_video_layers = vec![1];
        let per_frame = 64 * 36 * 4 + 16 * 9 * 4;
        assert_eq!(thread.per_frame_bytes(), per_frame);

        // Room for ten and a half composite frames: ten ahead.
        thread.snapshot.cache_options = CacheOptions {
            video_gb: 10.5 * per_frame as f64 / GIB,
            ..Default::default()
        };
        thread.update_windows();
        let window = thread.video_window.unwrap();
        assert_eq!(window.end - window.current, 10);
    }
}
