//! Rate-aware time values and ranges.
//!
//! **Why**: Every position in the engine (timeline time, media time, cache
//! keys) is a value scoped to a rate. Mixing 24, 25 and 48000 Hz quantities
//! needs one arithmetic with deterministic rounding.
//!
//! **Used by**: Composition traversal, Timeline media-time mapping, Player
//! tick/seek, cache windows.
//!
//! # Rounding
//!
//! Rescaling multiplies by `new_rate / rate`, which produces values such as
//! `4.999999999`. `floor`/`ceil`/`to_frames` snap values within [`EPSILON`] of
//! an integer before rounding, so a rescale never loses a frame.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// Tolerance used when snapping rescaled values to whole units.
pub const EPSILON: f64 = 1e-9;

fn snap(value: f64) -> f64 {
    let rounded = value.round();
    if (value - rounded).abs() < EPSILON {
        rounded
    } else {
        value
    }
}

/// A time value scoped to a rate (`value / rate` seconds).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct RationalTime {
    value: f64,
    rate: f64,
}

impl RationalTime {
    pub const fn new(value: f64, rate: f64) -> Self {
        Self { value, rate }
    }

    /// Time with a zero rate. Compares unequal to every valid time.
    pub const fn invalid() -> Self {
        Self { value: 0.0, rate: 0.0 }
    }

    pub fn from_seconds(seconds: f64, rate: f64) -> Self {
        Self::new(seconds * rate, rate)
    }

    pub fn from_frames(frames: i64, rate: f64) -> Self {
        Self::new(frames as f64, rate)
    }

    pub fn is_invalid(&self) -> bool {
        self.rate <= 0.0 || !self.rate.is_finite() || !self.value.is_finite()
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn to_seconds(&self) -> f64 {
        if self.rate > 0.0 { self.value / self.rate } else { 0.0 }
    }

    /// Value expressed at another rate (no rounding).
    pub fn value_rescaled_to(&self, rate: f64) -> f64 {
        if rate == self.rate || self.rate <= 0.0 {
            self.value
        } else {
            self.value * rate / self.rate
        }
    }

    pub fn rescaled_to(&self, rate: f64) -> Self {
        Self::new(self.value_rescaled_to(rate), rate)
    }

    pub fn floor(&self) -> Self {
        Self::new(snap(self.value).floor(), self.rate)
    }

    pub fn ceil(&self) -> Self {
        Self::new(snap(self.value).ceil(), self.rate)
    }

    /// Nearest whole unit, halves away from zero.
    pub fn round(&self) -> Self {
        Self::new(self.value.round(), self.rate)
    }

    /// Whole units at this rate, floored.
    pub fn to_frames(&self) -> i64 {
        snap(self.value).floor() as i64
    }

    /// Whole units at `rate`, floored.
    pub fn to_frames_at(&self, rate: f64) -> i64 {
        self.rescaled_to(rate).to_frames()
    }

    /// Exact comparison of value and rate (no rescale).
    pub fn strictly_equal(&self, other: &Self) -> bool {
        self.value == other.value && self.rate == other.rate
    }

    fn common_rate(&self, other: &Self) -> f64 {
        self.rate.max(other.rate)
    }
}

impl PartialEq for RationalTime {
    fn eq(&self, other: &Self) -> bool {
        if self.is_invalid() || other.is_invalid() {
            return self.is_invalid() && other.is_invalid();
        }
        let rate = self.common_rate(other);
        (self.value_rescaled_to(rate) - other.value_rescaled_to(rate)).abs() < EPSILON
    }
}

impl PartialOrd for RationalTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        let rate = self.common_rate(other);
        self.value_rescaled_to(rate)
            .partial_cmp(&other.value_rescaled_to(rate))
    }
}

impl Add for RationalTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        if self.rate == rhs.rate {
            return Self::new(self.value + rhs.value, self.rate);
        }
        let rate = self.common_rate(&rhs);
        Self::new(self.value_rescaled_to(rate) + rhs.value_rescaled_to(rate), rate)
    }
}

impl Sub for RationalTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        if self.rate == rhs.rate {
            return Self::new(self.value - rhs.value, self.rate);
        }
        let rate = self.common_rate(&rhs);
        Self::new(self.value_rescaled_to(rate) - rhs.value_rescaled_to(rate), rate)
    }
}

impl AddAssign for RationalTime {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for RationalTime {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for RationalTime {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.value, self.rate)
    }
}

impl fmt::Display for RationalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.value, self.rate)
    }
}

/// Start + duration pair. The range covers `[start, start + duration)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    start: RationalTime,
    duration: RationalTime,
}

impl TimeRange {
    pub const fn new(start: RationalTime, duration: RationalTime) -> Self {
        Self { start, duration }
    }

    pub const fn invalid() -> Self {
        Self::new(RationalTime::invalid(), RationalTime::invalid())
    }

    /// `[start, end)` expressed at the start's rate.
    pub fn from_start_end_exclusive(start: RationalTime, end: RationalTime) -> Self {
        Self::new(start, (end - start).rescaled_to(start.rate()))
    }

    /// `[start, end]` where `end` is the last whole unit included.
    pub fn from_start_end_inclusive(start: RationalTime, end: RationalTime) -> Self {
        let rate = start.rate();
        let value = end.value_rescaled_to(rate) - start.value() + 1.0;
        Self::new(start, RationalTime::new(value, rate))
    }

    /// Whole frames `[first, first + count)` at `rate`.
    pub fn from_frames(first: i64, count: i64, rate: f64) -> Self {
        Self::new(RationalTime::from_frames(first, rate), RationalTime::from_frames(count, rate))
    }

    pub fn is_invalid(&self) -> bool {
        self.start.is_invalid() || self.duration.is_invalid() || self.duration.value() < 0.0
    }

    pub fn start_time(&self) -> RationalTime {
        self.start
    }

    pub fn duration(&self) -> RationalTime {
        self.duration
    }

    pub fn end_time_exclusive(&self) -> RationalTime {
        self.start + self.duration
    }

    /// Last whole unit inside the range, at the duration's rate.
    pub fn end_time_inclusive(&self) -> RationalTime {
        let end = self.end_time_exclusive();
        let span = (end - self.start.rescaled_to(self.duration.rate())).value();
        if span > 1.0 {
            let rate = self.duration.rate();
            let end = end.rescaled_to(rate);
            if snap(self.duration.value()).fract() != 0.0 {
                end.floor()
            } else {
                end - RationalTime::new(1.0, rate)
            }
        } else {
            self.start
        }
    }

    pub fn contains(&self, time: RationalTime) -> bool {
        self.start <= time && time < self.end_time_exclusive()
    }

    pub fn contains_range(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end_time_exclusive() <= self.end_time_exclusive()
    }

    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.start < other.end_time_exclusive() && other.start < self.end_time_exclusive()
    }

    /// Overlap of two ranges, `None` when they do not intersect.
    pub fn intersection(&self, other: &TimeRange) -> Option<TimeRange> {
        if !self.intersects(other) {
            return None;
        }
        let start = if self.start > other.start { self.start } else { other.start };
        let a = self.end_time_exclusive();
        let b = other.end_time_exclusive();
        let end = if a < b { a } else { b };
        Some(TimeRange::from_start_end_exclusive(start, end))
    }

    /// Clamp `time` into `[start, end_time_inclusive]`.
    pub fn clamped(&self, time: RationalTime) -> RationalTime {
        let end = self.end_time_inclusive();
        if time < self.start {
            self.start.rescaled_to(time.rate())
        } else if time > end {
            end.rescaled_to(time.rate())
        } else {
            time
        }
    }

    pub fn rescaled_to(&self, rate: f64) -> TimeRange {
        TimeRange::new(self.start.rescaled_to(rate), self.duration.rescaled_to(rate))
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} +{}]", self.start, self.duration)
    }
}

/// Wrap `time` into `[range.start, range.end_exclusive)`.
///
/// Returns the wrapped time (at `time`'s rate) and whether a wrap happened.
/// Empty or invalid ranges leave the time untouched.
pub fn loop_time(time: RationalTime, range: &TimeRange) -> (RationalTime, bool) {
    if range.is_invalid() || range.duration().value() <= 0.0 || time.is_invalid() {
        return (time, false);
    }
    if range.contains(time) {
        return (time, false);
    }
    let rate = time.rate();
    let start = range.start_time().value_rescaled_to(rate);
    let duration = range.duration().value_rescaled_to(rate);
    let mut value = start + (time.value() - start).rem_euclid(duration);
    if value >= start + duration - EPSILON && value > start {
        value = start;
    }
    (RationalTime::new(snap(value), rate), true)
}

/// Map a timeline time into a clip's media time.
///
/// `media = time - range_in_parent.start + range_in_media.start`, rescaled to
/// the media rate and rounded to the nearest whole unit.
pub fn to_media_time(
    time: RationalTime,
    range_in_parent: &TimeRange,
    range_in_media: &TimeRange,
) -> RationalTime {
    let media_rate = range_in_media.start_time().rate();
    let offset = time - range_in_parent.start_time();
    (offset.rescaled_to(media_rate) + range_in_media.start_time())
        .rescaled_to(media_rate)
        .round()
}

/// Map a timeline range into media time (start rounded, duration rescaled).
pub fn to_media_range(
    range: &TimeRange,
    range_in_parent: &TimeRange,
    range_in_media: &TimeRange,
) -> TimeRange {
    let media_rate = range_in_media.start_time().rate();
    let start = to_media_time(range.start_time(), range_in_parent, range_in_media);
    TimeRange::new(start, range.duration().rescaled_to(media_rate).round())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rt(value: f64) -> RationalTime {
        RationalTime::new(value, 24.0)
    }

    #[test]
    fn test_rescale_rounds_deterministically() {
        let t = RationalTime::new(1001.0, 24000.0);
        assert_eq!(t.rescaled_to(24000.0 / 1001.0).to_frames(), 1);
        // 5 frames at 25 fps expressed at 48k then back
        let t = RationalTime::new(5.0, 25.0).rescaled_to(48000.0).rescaled_to(25.0);
        assert_eq!(t.to_frames(), 5);
        assert_eq!(RationalTime::new(2.5, 24.0).round().value(), 3.0);
        assert_eq!(RationalTime::new(-2.5, 24.0).round().value(), -3.0);
    }

    #[test]
    fn test_mixed_rate_arithmetic() {
        let a = RationalTime::new(1.0, 24.0);
        let b = RationalTime::new(1.0, 48.0);
        let sum = a + b;
        assert_eq!(sum.rate(), 48.0);
        assert_eq!(sum.value(), 3.0);
        assert!(a > b);
        assert_eq!(RationalTime::new(2.0, 48.0), a);
    }

    #[test]
    fn test_range_end_times() {
        let range = TimeRange::from_frames(0, 100, 24.0);
        assert_eq!(range.end_time_exclusive(), rt(100.0));
        assert_eq!(range.end_time_inclusive(), rt(99.0));
        assert!(range.contains(rt(99.0)));
        assert!(!range.contains(rt(100.0)));

        let inclusive = TimeRange::from_start_end_inclusive(rt(10.0), rt(19.0));
        assert_eq!(inclusive.duration(), rt(10.0));
    }

    #[test]
    fn test_intersection() {
        let a = TimeRange::from_frames(0, 48, 24.0);
        let b = TimeRange::from_frames(24, 48, 24.0);
        let i = a.intersection(&b).unwrap();
        assert_eq!(i.start_time(), rt(24.0));
        assert_eq!(i.duration(), rt(24.0));
        let c = TimeRange::from_frames(48, 10, 24.0);
        assert!(a.intersection(&c).is_none());
    }

    #[test]
    fn test_loop_time_wraps_outside_values() {
        let range = TimeRange::from_frames(0, 100, 24.0);
        for value in [-250.0, -101.0, -100.0, -1.0, 100.0, 101.0, 199.0, 200.0, 1234.0] {
            let (out, looped) = loop_time(rt(value), &range);
            assert!(looped, "value {} should loop", value);
            assert!(range.contains(out), "value {} looped to {} outside range", value, out);
        }
        assert_eq!(loop_time(rt(100.0), &range).0, rt(0.0));
        assert_eq!(loop_time(rt(-1.0), &range).0, rt(99.0));
        assert_eq!(loop_time(rt(50.0), &range), (rt(50.0), false));
    }

    #[test]
    fn test_loop_time_offset_range() {
        let range = TimeRange::from_frames(86400, 48, 24.0);
        let (out, looped) = loop_time(rt(86400.0 + 50.0), &range);
        assert!(looped);
        assert_eq!(out, rt(86402.0));
    }

    #[test]
    fn test_media_time_mapping() {
        // Clip placed at timeline frame 100, reading its media from frame 1000 @ 25fps.
        let in_parent = TimeRange::from_frames(100, 50, 24.0);
        let in_media = TimeRange::from_frames(1000, 50, 24.0);
        assert_eq!(to_media_time(rt(110.0), &in_parent, &in_media), rt(1010.0));

        let in_media_48 = TimeRange::new(RationalTime::new(2000.0, 48.0), RationalTime::new(100.0, 48.0));
        let media = to_media_time(rt(110.0), &in_parent, &in_media_48);
        assert_eq!(media.rate(), 48.0);
        assert_eq!(media.value(), 2020.0);
    }
}
