//! Playback state machine primitives.
//!
//! `Playback` (direction) and `Loop` (boundary behaviour) are orthogonal.
//! [`loop_playback`] is the pure per-tick boundary transform; the Player
//! applies its outcome (anchor resets, cache flags).
//!
//! # Boundaries
//!
//! The out-point is `end_time_inclusive()` of the in/out range for both
//! `Once` and `PingPong`: playback clamps to the last whole frame, never to
//! the exclusive end.

use serde::{Deserialize, Serialize};

use crate::utils::time::{loop_time, RationalTime, TimeRange};

/// Playback direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Playback {
    #[default]
    Stop,
    Forward,
    Reverse,
}

impl Playback {
    /// +1 forward, -1 reverse, 0 stopped
    pub fn sign(self) -> i64 {
        match self {
            Playback::Stop => 0,
            Playback::Forward => 1,
            Playback::Reverse => -1,
        }
    }

    pub fn flipped(self) -> Playback {
        match self {
            Playback::Stop => Playback::Stop,
            Playback::Forward => Playback::Reverse,
            Playback::Reverse => Playback::Forward,
        }
    }
}

/// Boundary behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Loop {
    #[default]
    Loop,
    Once,
    PingPong,
}

/// Which side of current time the cache window favours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CacheDirection {
    #[default]
    Forward,
    Reverse,
}

impl CacheDirection {
    /// Direction implied by `playback`; `None` when stopped.
    pub fn from_playback(playback: Playback) -> Option<CacheDirection> {
        match playback {
            Playback::Stop => None,
            Playback::Forward => Some(CacheDirection::Forward),
            Playback::Reverse => Some(CacheDirection::Reverse),
        }
    }
}

/// Navigation shortcuts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeAction {
    Start,
    End,
    FramePrev,
    FramePrevX10,
    FramePrevX100,
    FrameNext,
    FrameNextX10,
    FrameNextX100,
    JumpBack1s,
    JumpBack10s,
    JumpForward1s,
    JumpForward10s,
}

impl TimeAction {
    /// Frame step for frame actions (stops playback), `None` otherwise.
    pub fn frame_step(self) -> Option<i64> {
        match self {
            TimeAction::FramePrev => Some(-1),
            TimeAction::FramePrevX10 => Some(-10),
            TimeAction::FramePrevX100 => Some(-100),
            TimeAction::FrameNext => Some(1),
            TimeAction::FrameNextX10 => Some(10),
            TimeAction::FrameNextX100 => Some(100),
            _ => None,
        }
    }

    /// Jump in seconds for jump actions (playback continues), `None` otherwise.
    pub fn jump_seconds(self) -> Option<f64> {
        match self {
            TimeAction::JumpBack1s => Some(-1.0),
            TimeAction::JumpBack10s => Some(-10.0),
            TimeAction::JumpForward1s => Some(1.0),
            TimeAction::JumpForward10s => Some(10.0),
            _ => None,
        }
    }
}

/// Result of [`loop_playback`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopOutcome {
    pub time: RationalTime,
    pub playback: Playback,
    /// `Loop` mode wrapped around
    pub looped: bool,
    /// `Once` stopped or `PingPong` flipped at a boundary
    pub clamped: bool,
}

/// Apply the loop mode to a freshly advanced `time`.
pub fn loop_playback(time: RationalTime, range: &TimeRange, mode: Loop, playback: Playback) -> LoopOutcome {
    let unchanged = LoopOutcome {
        time,
        playback,
        looped: false,
        clamped: false,
    };
    if range.is_invalid() || playback == Playback::Stop {
        return unchanged;
    }
    let rate = time.rate();
    let start = range.start_time().rescaled_to(rate);
    let end = range.end_time_inclusive().rescaled_to(rate);
    let past_end = playback == Playback::Forward && time > end;
    let past_start = playback == Playback::Reverse && time < start;

    match mode {
        Loop::Loop => {
            let (time, looped) = loop_time(time, range);
            LoopOutcome {
                time,
                playback,
                looped,
                clamped: false,
            }
        }
        Loop::Once if past_end || past_start => LoopOutcome {
            time: if past_end { end } else { start },
            playback: Playback::Stop,
            looped: false,
            clamped: true,
        },
        Loop::PingPong if past_end || past_start => LoopOutcome {
            time: if past_end { end } else { start },
            playback: playback.flipped(),
            looped: false,
            clamped: true,
        },
        Loop::Once | Loop::PingPong => unchanged,
    }
}

/// Edge correction applied before a playback change is committed.
///
/// Returns the playback to commit and, for `Once`, the time to seek to first.
pub fn correct_playback_edge(
    requested: Playback,
    current: RationalTime,
    range: &TimeRange,
    mode: Loop,
) -> (Playback, Option<RationalTime>) {
    let rate = current.rate();
    let start = range.start_time().rescaled_to(rate);
    let end = range.end_time_inclusive().rescaled_to(rate);
    let at_end = requested == Playback::Forward && current >= end;
    let at_start = requested == Playback::Reverse && current <= start;
    match mode {
        Loop::Once if at_end => (requested, Some(start)),
        Loop::Once if at_start => (requested, Some(end)),
        Loop::PingPong if at_end || at_start => (requested.flipped(), None),
        _ => (requested, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rt(v: f64) -> RationalTime {
        RationalTime::new(v, 24.0)
    }

    fn range() -> TimeRange {
        TimeRange::from_frames(0, 100, 24.0)
    }

    #[test]
    fn test_loop_wraps_and_reports() {
        let out = loop_playback(rt(100.0), &range(), Loop::Loop, Playback::Forward);
        assert_eq!(out.time, rt(0.0));
        assert!(out.looped);
        assert_eq!(out.playback, Playback::Forward);

        let out = loop_playback(rt(-1.0), &range(), Loop::Loop, Playback::Reverse);
        assert_eq!(out.time, rt(99.0));
        assert!(out.looped);

        let out = loop_playback(rt(50.0), &range(), Loop::Loop, Playback::Forward);
        assert!(!out.looped);
    }

    #[test]
    fn test_once_clamps_to_inclusive_end_and_stops() {
        let out = loop_playback(rt(103.0), &range(), Loop::Once, Playback::Forward);
        assert_eq!(out.time, rt(99.0));
        assert_eq!(out.playback, Playback::Stop);
        assert!(out.clamped);

        let out = loop_playback(rt(-2.0), &range(), Loop::Once, Playback::Reverse);
        assert_eq!(out.time, rt(0.0));
        assert_eq!(out.playback, Playback::Stop);

        // Only the boundary in the direction of travel counts.
        let out = loop_playback(rt(-2.0), &range(), Loop::Once, Playback::Forward);
        assert_eq!(out.playback, Playback::Forward);
        assert!(!out.clamped);
    }

    #[test]
    fn test_pingpong_flips_direction() {
        let out = loop_playback(rt(100.0), &range(), Loop::PingPong, Playback::Forward);
        assert_eq!(out.time, rt(99.0));
        assert_eq!(out.playback, Playback::Reverse);

        let out = loop_playback(rt(-1.0), &range(), Loop::PingPong, Playback::Reverse);
        assert_eq!(out.time, rt(0.0));
        assert_eq!(out.playback, Playback::Forward);
    }

    #[test]
    fn test_edge_correction() {
        let (playback, seek) = correct_playback_edge(Playback::Forward, rt(99.0), &range(), Loop::Once);
        assert_eq!((playback, seek), (Playback::Forward, Some(rt(0.0))));

        let (playback, seek) = correct_playback_edge(Playback::Reverse, rt(0.0), &range(), Loop::Once);
        assert_eq!((playback, seek), (Playback::Reverse, Some(rt(99.0))));

        let (playback, seek) = correct_playback_edge(Playback::Forward, rt(99.0), &range(), Loop::PingPong);
        assert_eq!((playback, seek), (Playback::Reverse, None));

        let (playback, seek) = correct_playback_edge(Playback::Forward, rt(99.0), &range(), Loop::Loop);
        assert_eq!((playback, seek), (Playback::Forward, None));
    }
}
