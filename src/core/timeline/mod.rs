//! Timeline: composition traversal and request fan-out.
//!
//! **Why**: Turns "video at time t" / "audio for second s" into reader calls
//! for every contributing clip and composites the per-layer results into one
//! [`VideoData`] / [`AudioData`].
//!
//! **Used by**: Player (primary and compared timelines)
//!
//! # Threads
//!
//! `get_video`/`get_audio` only enqueue and return a request holding a
//! future. The `tlplay-timeline` thread drains the queue up to the in-flight
//! caps, dispatches reads, polls sub-futures without blocking and resolves
//! composites. Every request is resolved: cancelled and shutdown requests are
//! force-resolved with whatever layers finished.

mod traverse;
mod worker;

pub use traverse::{plan_audio, plan_video, second_range, AudioRead, ClipRead, LayerPlan};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::promise::{self, Future, Poll, Promise};
use crate::entities::{AudioData, Composition, ImageInfo, VideoData};
use crate::io::{IoInfo, IoOptions, ReadOptions, ReadPlugin};
use crate::utils::time::{RationalTime, TimeRange};

use worker::{ReaderCache, TimelineWorker};

/// Timeline tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineOptions {
    /// Max composite video requests dispatched at once
    pub video_request_max: usize,
    /// Max composite audio requests dispatched at once
    pub audio_request_max: usize,
    /// Condition-variable wait bound for the request thread
    pub request_timeout: Duration,
    /// How long construction waits for a reader's info
    pub info_timeout: Duration,
    /// Shift media times by the reader's reported start vs. the clip's
    /// declared available range
    pub compat: bool,
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self {
            video_request_max: 16,
            audio_request_max: 16,
            request_timeout: Duration::from_millis(5),
            info_timeout: Duration::from_secs(2),
            compat: true,
        }
    }
}

/// Pending composite video
#[derive(Debug)]
pub struct VideoRequest {
    id: u64,
    time: RationalTime,
    future: Future<VideoData>,
}

impl VideoRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn time(&self) -> RationalTime {
        self.time
    }

    pub fn poll(&mut self) -> Poll<VideoData> {
        self.future.poll()
    }

    pub fn wait(self) -> Option<VideoData> {
        self.future.wait()
    }
}

/// Pending composite audio second
#[derive(Debug)]
pub struct AudioRequest {
    id: u64,
    seconds: i64,
    future: Future<AudioData>,
}

impl AudioRequest {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn poll(&mut self) -> Poll<AudioData> {
        self.future.poll()
    }

    pub fn wait(self) -> Option<AudioData> {
        self.future.wait()
    }
}

pub(crate) struct QueuedVideo {
    pub id: u64,
    pub time: RationalTime,
    pub options: ReadOptions,
    pub promise: Promise<VideoData>,
}

pub(crate) struct QueuedAudio {
    pub id: u64,
    pub seconds: i64,
    pub options: IoOptions,
    pub promise: Promise<AudioData>,
}

#[derive(Default)]
pub(crate) struct Queue {
    pub video: VecDeque<QueuedVideo>,
    pub audio: VecDeque<QueuedAudio>,
    /// Ids of in-flight requests to force-resolve
    pub cancel: Vec<u64>,
}

impl Queue {
    /// Nothing to cancel and nothing that fits in the free request slots
    fn is_blocked(&self, video_free: usize, audio_free: usize) -> bool {
        self.cancel.is_empty()
            && (video_free == 0 || self.video.is_empty())
            && (audio_free == 0 || self.audio.is_empty())
    }
}

pub(crate) struct Shared {
    pub queue: Mutex<Queue>,
    pub wake: Condvar,
    pub running: AtomicBool,
}

impl Shared {
    /// Block until work arrives, shutdown, or `timeout`. Returns the drained
    /// batch (`None` on shutdown).
    pub fn wait_for_work(
        &self,
        timeout: Duration,
        video_free: usize,
        audio_free: usize,
    ) -> Option<(Vec<QueuedVideo>, Vec<QueuedAudio>, Vec<u64>)> {
        let guard = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let (mut queue, _) = self
            .wake
            .wait_timeout_while(guard, timeout, |q| {
                self.running.load(Ordering::Acquire) && q.is_blocked(video_free, audio_free)
            })
            .unwrap_or_else(|e| e.into_inner());
        if !self.running.load(Ordering::Acquire) {
            return None;
        }
        let video_n = video_free.min(queue.video.len());
        let audio_n = audio_free.min(queue.audio.len());
        let video = queue.video.drain(..video_n).collect();
        let audio = queue.audio.drain(..audio_n).collect();
        let cancel = std::mem::take(&mut queue.cancel);
        Some((video, audio, cancel))
    }

    pub fn take_all(&self) -> (Vec<QueuedVideo>, Vec<QueuedAudio>) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.cancel.clear();
        (queue.video.drain(..).collect(), queue.audio.drain(..).collect())
    }
}

/// One composition bound to a reader plugin and a request thread.
pub struct Timeline {
    uuid: Uuid,
    composition: Arc<Composition>,
    time_range: TimeRange,
    io_info: IoInfo,
    options: TimelineOptions,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("uuid", &self.uuid)
            .field("name", &self.composition.name())
            .field("time_range", &self.time_range)
            .finish()
    }
}

impl Timeline {
    /// Open the first video and audio readers for the timeline format and
    /// start the request thread.
    pub fn new(composition: Composition, plugin: Arc<dyn ReadPlugin>, options: TimelineOptions) -> Result<Self> {
        let time_range = composition.time_range();
        if time_range.is_invalid() || time_range.duration().value() <= 0.0 {
            bail!("Composition '{}' has no duration", composition.name());
        }
        let composition = Arc::new(composition);

        let mut readers = ReaderCache::new(plugin, options.info_timeout, options.compat);
        let io_info = readers.timeline_info(&composition);
        info!(
            "Timeline '{}': range {}, {} video layer(s), audio {:?}",
            composition.name(),
            time_range,
            io_info.video.len(),
            io_info.audio
        );

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            wake: Condvar::new(),
            running: AtomicBool::new(true),
        });

        let worker = TimelineWorker::new(
            Arc::clone(&composition),
            io_info.clone(),
            readers,
            options.clone(),
            Arc::clone(&shared),
        );
        let thread = thread::Builder::new()
            .name("tlplay-timeline".into())
            .spawn(move || worker.run())
            .context("Failed to spawn timeline thread")?;

        Ok(Self {
            uuid: Uuid::new_v4(),
            composition,
            time_range,
            io_info,
            options,
            shared,
            next_id: AtomicU64::new(1),
            thread: Some(thread),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        self.composition.name()
    }

    pub fn composition(&self) -> &Arc<Composition> {
        &self.composition
    }

    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    pub fn rate(&self) -> f64 {
        self.time_range.duration().rate()
    }

    pub fn io_info(&self) -> &IoInfo {
        &self.io_info
    }

    pub fn options(&self) -> &TimelineOptions {
        &self.options
    }

    /// Size of `layer` in the timeline format
    pub fn image_info(&self, layer: u16) -> ImageInfo {
        self.io_info.video_layer(layer)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get_video(&self, time: RationalTime, options: &ReadOptions) -> VideoRequest {
        let id = self.next_id();
        let (tx, rx) = promise::channel();
        if self.shared.running.load(Ordering::Acquire) {
            let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.video.push_back(QueuedVideo {
                id,
                time,
                options: options.clone(),
                promise: tx,
            });
            drop(queue);
            self.shared.wake.notify_one();
        } else {
            tx.set(VideoData::empty(time, self.image_info(options.video_layer)));
        }
        VideoRequest { id, time, future: rx }
    }

    pub fn get_audio(&self, seconds: i64, options: &IoOptions) -> AudioRequest {
        let id = self.next_id();
        let (tx, rx) = promise::channel();
        if self.shared.running.load(Ordering::Acquire) {
            let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.audio.push_back(QueuedAudio {
                id,
                seconds,
                options: options.clone(),
                promise: tx,
            });
            drop(queue);
            self.shared.wake.notify_one();
        } else {
            tx.set(AudioData::silent(seconds, self.io_info.audio));
        }
        AudioRequest { id, seconds, future: rx }
    }

    /// Cancel requests by id. Queued ones resolve empty right away;
    /// in-flight ones resolve with partial data on the next thread iteration.
    pub fn cancel_requests(&self, ids: &[u64]) {
        if ids.is_empty() {
            return;
        }
        let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
        let mut remaining: Vec<u64> = Vec::new();
        for &id in ids {
            if let Some(pos) = queue.video.iter().position(|r| r.id == id) {
                if let Some(req) = queue.video.remove(pos) {
                    let size = self.image_info(req.options.video_layer);
                    req.promise.set(VideoData::empty(req.time, size));
                }
            } else if let Some(pos) = queue.audio.iter().position(|r| r.id == id) {
                if let Some(req) = queue.audio.remove(pos) {
                    req.promise.set(AudioData::silent(req.seconds, self.io_info.audio));
                }
            } else {
                remaining.push(id);
            }
        }
        debug!(
            "Timeline '{}': cancel {} request(s), {} in flight",
            self.name(),
            ids.len(),
            remaining.len()
        );
        queue.cancel.extend(remaining);
        drop(queue);
        self.shared.wake.notify_one();
    }
}

impl Drop for Timeline {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.wake.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("Timeline '{}' stopped", self.composition.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workers::Workers;
    use crate::entities::{AudioInfo, Clip, Item, MediaReference, Track, Transition};
    use crate::io::{AudioPattern, PatternPlugin, PatternSpec};

    fn rt(v: f64) -> RationalTime {
        RationalTime::new(v, 24.0)
    }

    fn plugin() -> Arc<PatternPlugin> {
        Arc::new(PatternPlugin::with_workers(Arc::new(Workers::new(2).unwrap())))
    }

    fn pattern_clip(name: &str, spec: &PatternSpec, first: i64, frames: i64) -> Item {
        Item::Clip(Clip::new(
            name,
            MediaReference::external(spec.to_url()),
            TimeRange::from_frames(first, frames, spec.rate),
        ))
    }

    #[test]
    fn test_video_and_transition_composite() {
        let spec = PatternSpec::video(300, 24.0);
        let track = Track::video("V1")
            .with_item(pattern_clip("a", &spec, 0, 100))
            .with_item(Item::Transition(Transition::dissolve(rt(0.0), rt(10.0))))
            .with_item(pattern_clip("b", &spec, 200, 100));
        let comp = Composition::new("comp", rt(0.0), vec![track]);
        let timeline = Timeline::new(comp, plugin(), TimelineOptions::default()).unwrap();
        assert_eq!(timeline.io_info().video.len(), 1);

        let data = timeline.get_video(rt(50.0), &ReadOptions::default()).wait().unwrap();
        assert_eq!(data.layers.len(), 1);
        assert_eq!(data.layers[0].image.as_ref().unwrap().first_value(), Some(50));

        let data = timeline.get_video(rt(105.0), &ReadOptions::default()).wait().unwrap();
        let layer = &data.layers[0];
        assert_eq!(layer.transition, crate::entities::TransitionKind::Dissolve);
        assert!((layer.blend - 0.5).abs() < 1e-6);
        assert_eq!(layer.image.as_ref().unwrap().first_value(), Some(105));
        assert_eq!(layer.image_b.as_ref().unwrap().first_value(), Some(205));
    }

    #[test]
    fn test_failed_layer_is_omitted() {
        let good = PatternSpec::video(100, 24.0);
        let bad = PatternSpec {
            fail_video: true,
            ..PatternSpec::video(100, 24.0)
        };
        let bottom = Track::video("V1").with_item(pattern_clip("good", &good, 0, 100));
        let top = Track::video("V2").with_item(pattern_clip("bad", &bad, 0, 100));
        let comp = Composition::new("comp", rt(0.0), vec![bottom, top]);
        let timeline = Timeline::new(comp, plugin(), TimelineOptions::default()).unwrap();

        // One failing layer never takes the sibling layer down.
        let data = timeline.get_video(rt(3.0), &ReadOptions::default()).wait().unwrap();
        assert_eq!(data.layers.len(), 1);
        assert_eq!(data.layers[0].image.as_ref().unwrap().first_value(), Some(3));

        let options = ReadOptions {
            video_layer: 0,
            io: IoOptions::new().with("pattern/fail_video", "true"),
        };
        let data = timeline.get_video(rt(3.0), &options).wait().unwrap();
        assert!(data.layers.is_empty());
    }

    #[test]
    fn test_audio_second_is_padded() {
        let info = AudioInfo::new(2, 1000);
        let spec = PatternSpec::video(240, 24.0).with_audio(AudioPattern::Constant(0.5), info);
        let video = Track::video("V1").with_item(pattern_clip("v", &spec, 0, 48));
        // Audio covers the first half of second 1 only.
        let audio = Track::audio("A1").with_item(pattern_clip("a", &spec, 0, 36));
        let comp = Composition::new("comp", rt(0.0), vec![video, audio]);
        let timeline = Timeline::new(comp, plugin(), TimelineOptions::default()).unwrap();
        assert_eq!(timeline.io_info().audio, info);

        let data = timeline.get_audio(1, &IoOptions::new()).wait().unwrap();
        assert_eq!(data.layers.len(), 1);
        let buffer = &data.layers[0].audio;
        assert_eq!(buffer.frames(), 1000);
        assert_eq!(buffer.sample(0, 0), 0.5);
        assert_eq!(buffer.sample(499, 1), 0.5);
        assert_eq!(buffer.sample(500, 0), 0.0);
        assert_eq!(buffer.sample(999, 1), 0.0);

        // Past the end nothing intersects: one silent layer.
        let data = timeline.get_audio(1_000, &IoOptions::new()).wait().unwrap();
        assert_eq!(data.layers.len(), 1);
        assert!(data.layers[0].audio.samples().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_cancel_and_shutdown_resolve_everything() {
        let spec = PatternSpec::video(1000, 24.0);
        let track = Track::video("V1").with_item(pattern_clip("a", &spec, 0, 1000));
        let comp = Composition::new("comp", rt(0.0), vec![track]);
        let options = TimelineOptions {
            video_request_max: 2,
            ..Default::default()
        };
        let timeline = Timeline::new(comp, plugin(), options).unwrap();
        let slow = ReadOptions {
            video_layer: 0,
            io: IoOptions::new().with("pattern/delay_ms", "2"),
        };
        let requests: Vec<VideoRequest> = (0..20).map(|f| timeline.get_video(rt(f as f64), &slow)).collect();
        let ids: Vec<u64> = requests.iter().map(|r| r.id()).collect();
        timeline.cancel_requests(&ids[10..]);
        let late = timeline.get_video(rt(500.0), &slow);
        drop(timeline);

        for request in requests {
            assert!(request.wait().is_some());
        }
        assert!(late.wait().is_some());
    }

    #[test]
    fn test_saturated_queue_waits_for_timeout() {
        let shared = Shared {
            queue: Mutex::new(Queue::default()),
            wake: Condvar::new(),
            running: AtomicBool::new(true),
        };
        let mut futures = Vec::new();
        {
            let mut queue = shared.queue.lock().unwrap();
            for id in 0..10 {
                let (tx, rx) = promise::channel();
                queue.video.push_back(QueuedVideo {
                    id,
                    time: rt(id as f64),
                    options: ReadOptions::default(),
                    promise: tx,
                });
                futures.push(rx);
            }
        }

        // No free slots: queued reads are not drainable, so the wait runs out.
        let timeout = Duration::from_millis(50);
        let started = std::time::Instant::now();
        let (video, audio, cancel) = shared.wait_for_work(timeout, 0, 4).unwrap();
        assert!(started.elapsed() >= timeout);
        assert!(video.is_empty() && audio.is_empty() && cancel.is_empty());

        // A free slot or a cancel wakes it straight away.
        let started = std::time::Instant::now();
        let (video, _, _) = shared.wait_for_work(Duration::from_secs(5), 2, 0).unwrap();
        assert_eq!(video.len(), 2);
        shared.queue.lock().unwrap().cancel.push(3);
        let (video, _, cancel) = shared.wait_for_work(Duration::from_secs(5), 0, 0).unwrap();
        assert!(video.is_empty());
        assert_eq!(cancel, vec![3]);
        assert!(started.elapsed() < Duration::from_secs(5));

        shared.running.store(false, Ordering::Release);
        assert!(shared.wait_for_work(timeout, 1, 1).is_none());
    }

    #[test]
    fn test_compat_offset_maps_to_reader_range() {
        // Reader media starts at frame 100, the clip declares it at 0.
        let spec = PatternSpec::video(100, 24.0).with_start(100);
        let clip = Clip::new(
            "shifted",
            MediaReference::external(spec.to_url()),
            TimeRange::from_frames(0, 50, 24.0),
        )
        .with_available_range(TimeRange::from_frames(0, 100, 24.0));
        let comp = |clip: &Clip| {
            let track = Track::video("V1").with_item(Item::Clip(clip.clone()));
            Composition::new("comp", rt(0.0), vec![track])
        };

        let timeline = Timeline::new(comp(&clip), plugin(), TimelineOptions::default()).unwrap();
        let data = timeline.get_video(rt(3.0), &ReadOptions::default()).wait().unwrap();
        assert_eq!(data.layers.len(), 1);
        assert_eq!(data.layers[0].image.as_ref().unwrap().first_value(), Some(103));

        // Without the offset frame 3 is outside the reader range.
        let options = TimelineOptions {
            compat: false,
            ..Default::default()
        };
        let timeline = Timeline::new(comp(&clip), plugin(), options).unwrap();
        let data = timeline.get_video(rt(3.0), &ReadOptions::default()).wait().unwrap();
        assert!(data.layers.is_empty());
    }

    #[test]
    fn test_empty_composition_is_rejected() {
        let comp = Composition::new("empty", rt(0.0), vec![Track::video("V1")]);
        assert!(Timeline::new(comp, plugin(), TimelineOptions::default()).is_err());
    }
}
