//! Timeline request thread: reader cache, dispatch, fan-in.

use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};

use super::traverse::{plan_audio, plan_video, ClipRead};
use super::{QueuedAudio, QueuedVideo, Shared, TimelineOptions};
use crate::core::promise::{Future, Poll, Promise};
use crate::entities::{
    AudioData, AudioInfo, AudioLayer, Clip, Composition, ImageInfo, TrackKind, TransitionKind, VideoData, VideoLayer,
};
use crate::io::{AudioFrame, IoInfo, IoOptions, MediaReader, ReadOptions, ReadPlugin, ReadResult, VideoFrame};
use crate::utils::time::{RationalTime, TimeRange};

pub(crate) struct OpenReader {
    reader: Arc<dyn MediaReader>,
    info: IoInfo,
}

/// Readers opened lazily per media URL and kept for the timeline lifetime.
/// A failed open is remembered so it is logged once.
pub(crate) struct ReaderCache {
    plugin: Arc<dyn ReadPlugin>,
    info_timeout: Duration,
    compat: bool,
    /// Open order, keyed by URL. `None` = open failed (logged once).
    readers: IndexMap<String, Option<OpenReader>>,
}

impl ReaderCache {
    pub fn new(plugin: Arc<dyn ReadPlugin>, info_timeout: Duration, compat: bool) -> Self {
        Self {
            plugin,
            info_timeout,
            compat,
            readers: IndexMap::new(),
        }
    }

    fn open(&self, clip: &Clip, url: &str) -> Option<OpenReader> {
        let reader = match self.plugin.open(&clip.media, &IoOptions::new()) {
            Ok(reader) => reader,
            Err(e) => {
                warn!("Cannot open media '{}' for clip '{}': {:#}", url, clip.name, e);
                return None;
            }
        };
        let info = match reader.info().wait_timeout(self.info_timeout) {
            Ok(Some(Ok(info))) => info,
            Ok(Some(Err(e))) => {
                warn!("No info for '{}': {}", url, e);
                IoInfo::default()
            }
            Ok(None) | Err(_) => {
                warn!("No info for '{}' within {:?}", url, self.info_timeout);
                IoInfo::default()
            }
        };
        Some(OpenReader { reader, info })
    }

    pub fn get(&mut self, clip: &Clip) -> Option<&OpenReader> {
        let url = clip.media.url()?;
        if !self.readers.contains_key(url) {
            let opened = self.open(clip, url);
            self.readers.insert(url.to_string(), opened);
        }
        self.readers.get(url).and_then(Option::as_ref)
    }

    /// Timeline format: video layers of the first video clip, audio format of
    /// the first audio clip.
    pub fn timeline_info(&mut self, composition: &Composition) -> IoInfo {
        let mut info = IoInfo::default();
        if let Some(open) = composition.first_clip(TrackKind::Video).and_then(|c| self.get(c)) {
            info.video = open.info.video.clone();
            info.video_time = open.info.video_time;
        }
        if let Some(open) = composition.first_clip(TrackKind::Audio).and_then(|c| self.get(c)) {
            info.audio = open.info.audio;
            info.audio_time = open.info.audio_time;
        }
        info
    }

    /// `reader_start - available_start` at `rate`, zero when unknown.
    fn compat_offset(&self, clip: &Clip, reader_range: TimeRange, rate: f64) -> RationalTime {
        let zero = RationalTime::new(0.0, rate);
        if !self.compat || reader_range.is_invalid() {
            return zero;
        }
        match clip.available_range {
            Some(available) if !available.is_invalid() => {
                (reader_range.start_time() - available.start_time()).rescaled_to(rate).round()
            }
            _ => zero,
        }
    }

    pub fn cancel_all(&self) {
        for open in self.readers.values().flatten() {
            open.reader.cancel_requests();
        }
    }
}

/// One sub-request: waiting on a reader or settled.
enum Side<T> {
    Waiting(Future<ReadResult<T>>),
    Done(Option<T>),
}

impl<T> Side<T> {
    /// Poll without blocking. Returns true once settled.
    fn poll(&mut self, what: &str) -> bool {
        let Side::Waiting(future) = self else {
            return true;
        };
        let settled = match future.poll() {
            Poll::Pending => return false,
            Poll::Ready(Ok(value)) => Some(value),
            Poll::Ready(Err(e)) => {
                debug!("{} read failed: {}", what, e);
                None
            }
            Poll::Abandoned => None,
        };
        *self = Side::Done(settled);
        true
    }

    /// Settled value; unsettled reads are abandoned.
    fn take(self) -> Option<T> {
        match self {
            Side::Done(value) => value,
            Side::Waiting(_) => None,
        }
    }
}

struct PendingLayer {
    a: Side<VideoFrame>,
    b: Side<VideoFrame>,
    transition: TransitionKind,
    blend: f32,
}

impl PendingLayer {
    fn into_layer(self) -> Option<VideoLayer> {
        let a = self.a.take().map(|f| f.image);
        let b = self.b.take().map(|f| f.image);
        match (a, b) {
            (Some(image), Some(image_b)) => Some(VideoLayer {
                image: Some(image),
                image_b: Some(image_b),
                transition: self.transition,
                blend: self.blend,
            }),
            // Survivor of a failed transition side plays without blending.
            (Some(image), None) | (None, Some(image)) => Some(VideoLayer {
                image: Some(image),
                ..Default::default()
            }),
            (None, None) => None,
        }
    }
}

struct InFlightVideo {
    id: u64,
    time: RationalTime,
    size: ImageInfo,
    promise: Promise<VideoData>,
    layers: Vec<PendingLayer>,
}

impl InFlightVideo {
    fn poll(&mut self) -> bool {
        let mut ready = true;
        for layer in &mut self.layers {
            ready &= layer.a.poll("video");
            ready &= layer.b.poll("video");
        }
        ready
    }

    fn resolve(self) {
        let layers = self.layers.into_iter().filter_map(PendingLayer::into_layer).collect();
        trace!("video {} resolved (request {})", self.time, self.id);
        self.promise.set(VideoData {
            time: self.time,
            size: self.size,
            layers,
        });
    }
}

struct AudioPart {
    offset_frames: usize,
    side: Side<AudioFrame>,
}

struct InFlightAudio {
    id: u64,
    seconds: i64,
    info: AudioInfo,
    promise: Promise<AudioData>,
    parts: Vec<AudioPart>,
}

impl InFlightAudio {
    fn poll(&mut self) -> bool {
        let mut ready = true;
        for part in &mut self.parts {
            ready &= part.side.poll("audio");
        }
        ready
    }

    fn resolve(self) {
        let info = self.info;
        let frames = info.sample_rate as usize;
        let layers: Vec<AudioLayer> = self
            .parts
            .into_iter()
            .filter_map(|part| {
                let offset = part.offset_frames;
                part.side.take().map(|frame| AudioLayer {
                    audio: frame.audio.placed_into(info, frames, offset),
                })
            })
            .collect();
        trace!("audio second {} resolved (request {})", self.seconds, self.id);
        if layers.is_empty() {
            self.promise.set(AudioData::silent(self.seconds, info));
        } else {
            self.promise.set(AudioData {
                seconds: self.seconds,
                info,
                layers,
            });
        }
    }
}

pub(crate) struct TimelineWorker {
    composition: Arc<Composition>,
    io_info: IoInfo,
    readers: ReaderCache,
    options: TimelineOptions,
    shared: Arc<Shared>,
    video: Vec<InFlightVideo>,
    audio: Vec<InFlightAudio>,
}

impl TimelineWorker {
    pub fn new(
        composition: Arc<Composition>,
        io_info: IoInfo,
        readers: ReaderCache,
        options: TimelineOptions,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            composition,
            io_info,
            readers,
            options,
            shared,
            video: Vec::new(),
            audio: Vec::new(),
        }
    }

    pub fn run(mut self) {
        debug!("Timeline thread started: {}", self.composition.name());
        loop {
            let video_free = self.options.video_request_max.saturating_sub(self.video.len());
            let audio_free = self.options.audio_request_max.saturating_sub(self.audio.len());
            let Some((video, audio, cancel)) =
                self.shared
                    .wait_for_work(self.options.request_timeout, video_free, audio_free)
            else {
                break;
            };

            if !cancel.is_empty() {
                self.cancel(&cancel);
            }
            for request in video {
                self.start_video(request);
            }
            for request in audio {
                self.start_audio(request);
            }
            self.poll_in_flight();
        }
        self.shutdown();
    }

    fn dispatch_video(&mut self, read: Option<ClipRead<'_>>, options: &ReadOptions) -> Side<VideoFrame> {
        let Some(read) = read else {
            return Side::Done(None);
        };
        let rate = read.media_time.rate();
        let compat = self.readers.compat;
        let Some(open) = self.readers.get(read.clip) else {
            return Side::Done(None);
        };
        let reader_range = if compat { open.info.video_time } else { TimeRange::invalid() };
        let reader = Arc::clone(&open.reader);
        let time = read.media_time + self.readers.compat_offset(read.clip, reader_range, rate);
        Side::Waiting(reader.read_video(time, options))
    }

    fn start_video(&mut self, request: QueuedVideo) {
        let composition = Arc::clone(&self.composition);
        let plans = plan_video(&composition, request.time);
        let mut layers = Vec::with_capacity(plans.len());
        for plan in plans {
            let a = self.dispatch_video(plan.a, &request.options);
            let b = self.dispatch_video(plan.b, &request.options);
            layers.push(PendingLayer {
                a,
                b,
                transition: plan.transition,
                blend: plan.blend,
            });
        }
        trace!(
            "video {} dispatched: {} layer(s) (request {})",
            request.time,
            layers.len(),
            request.id
        );
        self.video.push(InFlightVideo {
            id: request.id,
            time: request.time,
            size: self.io_info.video_layer(request.options.video_layer),
            promise: request.promise,
            layers,
        });
    }

    fn start_audio(&mut self, request: QueuedAudio) {
        let info = self.io_info.audio;
        let mut parts = Vec::new();
        if info.is_valid() {
            let composition = Arc::clone(&self.composition);
            let sr = info.sample_rate as f64;
            for read in plan_audio(&composition, request.seconds, info.sample_rate) {
                let compat = self.readers.compat;
                let Some(open) = self.readers.get(read.clip) else {
                    continue;
                };
                let reader_range = if compat { open.info.audio_time } else { TimeRange::invalid() };
                let reader = Arc::clone(&open.reader);
                let offset = self.readers.compat_offset(read.clip, reader_range, sr);
                let range = TimeRange::new(read.media_range.start_time() + offset, read.media_range.duration());
                parts.push(AudioPart {
                    offset_frames: read.offset_frames,
                    side: Side::Waiting(reader.read_audio(range, &request.options)),
                });
            }
        }
        trace!(
            "audio second {} dispatched: {} part(s) (request {})",
            request.seconds,
            parts.len(),
            request.id
        );
        self.audio.push(InFlightAudio {
            id: request.id,
            seconds: request.seconds,
            info,
            promise: request.promise,
            parts,
        });
    }

    fn poll_in_flight(&mut self) {
        for mut request in std::mem::take(&mut self.video) {
            if request.poll() {
                request.resolve();
            } else {
                self.video.push(request);
            }
        }
        for mut request in std::mem::take(&mut self.audio) {
            if request.poll() {
                request.resolve();
            } else {
                self.audio.push(request);
            }
        }
    }

    /// Force-resolve in-flight requests by id with whatever has settled.
    fn cancel(&mut self, ids: &[u64]) {
        for mut request in std::mem::take(&mut self.video) {
            if ids.contains(&request.id) {
                request.poll();
                request.resolve();
            } else {
                self.video.push(request);
            }
        }
        for mut request in std::mem::take(&mut self.audio) {
            if ids.contains(&request.id) {
                request.poll();
                request.resolve();
            } else {
                self.audio.push(request);
            }
        }
        if self.video.is_empty() && self.audio.is_empty() {
            self.readers.cancel_all();
        }
    }

    fn shutdown(mut self) {
        let (video, audio) = self.shared.take_all();
        let queued = video.len() + audio.len();
        for request in video {
            let size = self.io_info.video_layer(request.options.video_layer);
            request.promise.set(VideoData::empty(request.time, size));
        }
        for request in audio {
            request.promise.set(AudioData::silent(request.seconds, self.io_info.audio));
        }
        let in_flight = self.video.len() + self.audio.len();
        for mut request in self.video.drain(..) {
            request.poll();
            request.resolve();
        }
        for mut request in self.audio.drain(..) {
            request.poll();
            request.resolve();
        }
        self.readers.cancel_all();
        debug!(
            "Timeline thread stopped: {} ({} queued, {} in flight resolved)",
            self.composition.name(),
            queued,
            in_flight
        );
    }
}
