//! Composition model: tracks of clips, gaps and transitions.
//!
//! **Why**: The engine traverses one immutable tree per Timeline. Layout
//! (each item's trimmed range in parent) is computed once in
//! [`Composition::new`], so the background thread reads it without locks.
//!
//! **Used by**: Timeline traversal (video and audio paths)
//!
//! # Layout
//!
//! Items are laid out back to back from the composition's global start time.
//! Transitions occupy no time: they sit between two items and overlap the
//! cut by `in_offset` before and `out_offset` after it.

use crate::utils::time::{RationalTime, TimeRange};

/// Where a clip's media comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaReference {
    /// Reader-plugin specific location (path, URL, pattern spec)
    External { url: String },
    /// Offline media; the clip contributes nothing
    Missing,
}

impl MediaReference {
    pub fn external(url: impl Into<String>) -> Self {
        MediaReference::External { url: url.into() }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            MediaReference::External { url } => Some(url),
            MediaReference::Missing => None,
        }
    }
}

/// Reference to a range of one media source
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub name: String,
    pub media: MediaReference,
    /// Range used from the media (trim)
    pub source_range: Option<TimeRange>,
    /// Full extent of the media as declared by the composition
    pub available_range: Option<TimeRange>,
}

impl Clip {
    pub fn new(name: impl Into<String>, media: MediaReference, source_range: TimeRange) -> Self {
        Self {
            name: name.into(),
            media,
            source_range: Some(source_range),
            available_range: None,
        }
    }

    pub fn with_available_range(mut self, range: TimeRange) -> Self {
        self.available_range = Some(range);
        self
    }

    /// Range in media actually played; `None` when neither range is usable.
    pub fn trimmed_range(&self) -> Option<TimeRange> {
        self.source_range
            .or(self.available_range)
            .filter(|r| !r.is_invalid())
    }

    pub fn duration(&self) -> RationalTime {
        self.trimmed_range()
            .map(|r| r.duration())
            .unwrap_or_else(|| RationalTime::new(0.0, 1.0))
    }
}

/// Empty time
#[derive(Debug, Clone, PartialEq)]
pub struct Gap {
    pub duration: RationalTime,
}

impl Gap {
    pub fn new(duration: RationalTime) -> Self {
        Self { duration }
    }
}

/// Transition flavour as declared in the composition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionType {
    Dissolve,
    /// Not understood by the engine; the cut plays as a hard cut
    Unknown(String),
}

/// Blend between the item before and the item after it
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub name: String,
    pub kind: TransitionType,
    pub in_offset: RationalTime,
    pub out_offset: RationalTime,
}

impl Transition {
    pub fn dissolve(in_offset: RationalTime, out_offset: RationalTime) -> Self {
        Self {
            name: "Dissolve".into(),
            kind: TransitionType::Dissolve,
            in_offset,
            out_offset,
        }
    }

    pub fn length(&self) -> RationalTime {
        self.in_offset + self.out_offset
    }
}

/// Closed set of composition items
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Clip(Clip),
    Gap(Gap),
    Transition(Transition),
}

impl Item {
    /// Time consumed in the parent track (zero for transitions)
    pub fn duration(&self) -> RationalTime {
        match self {
            Item::Clip(clip) => clip.duration(),
            Item::Gap(gap) => gap.duration,
            Item::Transition(t) => RationalTime::new(0.0, t.in_offset.rate()),
        }
    }

    pub fn as_clip(&self) -> Option<&Clip> {
        match self {
            Item::Clip(clip) => Some(clip),
            _ => None,
        }
    }

    pub fn as_transition(&self) -> Option<&Transition> {
        match self {
            Item::Transition(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Ordered sequence of items of one kind
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub name: String,
    pub kind: TrackKind,
    items: Vec<Item>,
    /// Trimmed range in parent per item, filled by `Composition::new`
    ranges: Vec<TimeRange>,
}

impl Track {
    pub fn new(name: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            name: name.into(),
            kind,
            items: Vec::new(),
            ranges: Vec::new(),
        }
    }

    pub fn video(name: impl Into<String>) -> Self {
        Self::new(name, TrackKind::Video)
    }

    pub fn audio(name: impl Into<String>) -> Self {
        Self::new(name, TrackKind::Audio)
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Trimmed range of item `index` in timeline time.
    ///
    /// For transitions this is the overlap window around the cut.
    pub fn range_in_parent(&self, index: usize) -> Option<TimeRange> {
        self.ranges.get(index).copied()
    }

    /// Items immediately before and after `index`
    pub fn neighbors_of(&self, index: usize) -> (Option<&Item>, Option<&Item>) {
        let prev = index.checked_sub(1).and_then(|i| self.items.get(i));
        (prev, self.items.get(index + 1))
    }

    pub fn duration(&self, rate: f64) -> RationalTime {
        self.items
            .iter()
            .fold(RationalTime::new(0.0, rate), |acc, item| acc + item.duration())
    }

    /// Non-transition item whose range contains `time`
    pub fn item_at(&self, time: RationalTime) -> Option<(usize, &Item, TimeRange)> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| !matches!(item, Item::Transition(_)))
            .find_map(|(index, item)| {
                let range = self.ranges.get(index)?;
                range.contains(time).then_some((index, item, *range))
            })
    }

    /// Clips whose trimmed range intersects `range`
    pub fn clips_intersecting(&self, range: TimeRange) -> impl Iterator<Item = (usize, &Clip, TimeRange)> {
        self.items.iter().enumerate().filter_map(move |(index, item)| {
            let clip = item.as_clip()?;
            let in_parent = self.ranges.get(index)?;
            (in_parent.duration().value() > 0.0 && in_parent.intersects(&range))
                .then_some((index, clip, *in_parent))
        })
    }

    fn layout(&mut self, start: RationalTime) {
        let mut ranges = Vec::with_capacity(self.items.len());
        let mut cursor = start;
        for item in &self.items {
            match item {
                Item::Transition(t) => {
                    let window_start = (cursor - t.in_offset).rescaled_to(start.rate());
                    ranges.push(TimeRange::new(window_start, t.length().rescaled_to(start.rate())));
                }
                other => {
                    let duration = other.duration().rescaled_to(start.rate());
                    ranges.push(TimeRange::new(cursor, duration));
                    cursor += duration;
                }
            }
        }
        self.ranges = ranges;
    }
}

/// Immutable composition: the root of one Timeline
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    name: String,
    rate: f64,
    global_start: RationalTime,
    tracks: Vec<Track>,
}

impl Composition {
    /// Lay out `tracks` from `global_start` (its rate is the timeline rate).
    pub fn new(name: impl Into<String>, global_start: RationalTime, tracks: Vec<Track>) -> Self {
        let mut tracks = tracks;
        for track in &mut tracks {
            track.layout(global_start);
        }
        Self {
            name: name.into(),
            rate: global_start.rate(),
            global_start,
            tracks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn global_start(&self) -> RationalTime {
        self.global_start
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    pub fn duration(&self) -> RationalTime {
        self.tracks
            .iter()
            .map(|t| t.duration(self.rate).rescaled_to(self.rate))
            .fold(RationalTime::new(0.0, self.rate), |a, b| if b > a { b } else { a })
    }

    /// `[global_start, global_start + duration)` at the timeline rate
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.global_start, self.duration())
    }

    /// First clip with usable media on a track of `kind`
    pub fn first_clip(&self, kind: TrackKind) -> Option<&Clip> {
        self.tracks_of(kind)
            .flat_map(|t| t.items.iter())
            .filter_map(Item::as_clip)
            .find(|c| c.media.url().is_some() && c.trimmed_range().is_some())
    }

    pub fn has_audio(&self) -> bool {
        self.first_clip(TrackKind::Audio).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rt(v: f64) -> RationalTime {
        RationalTime::new(v, 24.0)
    }

    fn clip(name: &str, start: i64, frames: i64) -> Item {
        Item::Clip(Clip::new(
            name,
            MediaReference::external(name),
            TimeRange::from_frames(start, frames, 24.0),
        ))
    }

    #[test]
    fn test_layout_is_sequential() {
        let track = Track::video("V1")
            .with_item(clip("a", 1000, 100))
            .with_item(Item::Gap(Gap::new(rt(20.0))))
            .with_item(clip("b", 0, 50));
        let comp = Composition::new("comp", rt(0.0), vec![track]);
        let track = &comp.tracks()[0];
        assert_eq!(track.range_in_parent(0), Some(TimeRange::from_frames(0, 100, 24.0)));
        assert_eq!(track.range_in_parent(1), Some(TimeRange::from_frames(100, 20, 24.0)));
        assert_eq!(track.range_in_parent(2), Some(TimeRange::from_frames(120, 50, 24.0)));
        assert_eq!(comp.time_range(), TimeRange::from_frames(0, 170, 24.0));
    }

    #[test]
    fn test_transition_takes_no_time() {
        let track = Track::video("V1")
            .with_item(clip("a", 0, 100))
            .with_item(Item::Transition(Transition::dissolve(rt(0.0), rt(10.0))))
            .with_item(clip("b", 0, 100));
        let comp = Composition::new("comp", rt(0.0), vec![track]);
        let track = &comp.tracks()[0];
        assert_eq!(track.range_in_parent(1), Some(TimeRange::from_frames(100, 10, 24.0)));
        assert_eq!(track.range_in_parent(2), Some(TimeRange::from_frames(100, 100, 24.0)));
        assert_eq!(comp.duration(), rt(200.0));

        let (index, item, _) = track.item_at(rt(105.0)).unwrap();
        assert_eq!(index, 2);
        assert_eq!(item.as_clip().unwrap().name, "b");
        let (prev, next) = track.neighbors_of(2);
        assert!(prev.unwrap().as_transition().is_some());
        assert!(next.is_none());
    }

    #[test]
    fn test_global_start_offsets_ranges() {
        let track = Track::audio("A1").with_item(clip("a", 0, 48));
        let comp = Composition::new("comp", rt(86400.0), vec![track]);
        assert_eq!(comp.tracks()[0].range_in_parent(0).unwrap().start_time(), rt(86400.0));
        assert!(comp.has_audio());
    }

    #[test]
    fn test_missing_range_contributes_nothing() {
        let clip = Clip {
            name: "offline".into(),
            media: MediaReference::Missing,
            source_range: None,
            available_range: None,
        };
        let track = Track::video("V1").with_item(Item::Clip(clip)).with_item(clip_item());
        let comp = Composition::new("comp", rt(0.0), vec![track]);
        let range = TimeRange::from_frames(0, 10, 24.0);
        let hits: Vec<_> = comp.tracks()[0].clips_intersecting(range).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1.name, "x");
    }

    fn clip_item() -> Item {
        clip("x", 0, 10)
    }
}
