//! Pure composition traversal: which clips contribute to a request.
//!
//! Planning is separated from dispatch so traversal (transition windows,
//! media-time mapping, audio placement) can be tested without readers or
//! threads.

use crate::entities::{Clip, Composition, Item, Track, TrackKind, TransitionKind, TransitionType};
use crate::utils::time::{to_media_range, to_media_time, RationalTime, TimeRange};

/// One clip read for a video layer
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRead<'a> {
    pub clip: &'a Clip,
    /// Media time before any reader compatibility offset
    pub media_time: RationalTime,
}

/// One video layer (one track)
#[derive(Debug, Clone, PartialEq)]
pub struct LayerPlan<'a> {
    /// Outgoing clip, or the only clip outside transitions
    pub a: Option<ClipRead<'a>>,
    /// Incoming clip inside a transition window
    pub b: Option<ClipRead<'a>>,
    pub transition: TransitionKind,
    pub blend: f32,
}

/// One clip's contribution to a second of audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioRead<'a> {
    pub clip: &'a Clip,
    /// Media range at the timeline sample rate
    pub media_range: TimeRange,
    /// Position of the first read sample inside the second
    pub offset_frames: usize,
}

fn clip_read<'a>(track: &'a Track, index: usize, time: RationalTime) -> Option<ClipRead<'a>> {
    let clip = track.items().get(index)?.as_clip()?;
    clip.media.url()?;
    let in_parent = track.range_in_parent(index)?;
    let in_media = clip.trimmed_range()?;
    Some(ClipRead {
        clip,
        media_time: to_media_time(time, &in_parent, &in_media),
    })
}

/// Transition window at `index` containing `time`, with its blend factor.
fn transition_blend(track: &Track, index: usize, time: RationalTime) -> Option<f32> {
    let transition = track.items().get(index)?.as_transition()?;
    if transition.kind != TransitionType::Dissolve {
        return None;
    }
    let window = track.range_in_parent(index)?;
    if window.duration().value() <= 0.0 || !window.contains(time) {
        return None;
    }
    let offset = (time - window.start_time()).to_seconds();
    let blend = offset / window.duration().to_seconds();
    Some(blend.clamp(0.0, 1.0) as f32)
}

fn plan_track<'a>(track: &'a Track, time: RationalTime) -> Option<LayerPlan<'a>> {
    let (index, item, _) = track.item_at(time)?;
    debug_assert!(!matches!(item, Item::Transition(_)));

    // Outgoing side: a transition follows the active item.
    if let Some(blend) = transition_blend(track, index + 1, time) {
        return Some(LayerPlan {
            a: clip_read(track, index, time),
            b: clip_read(track, index + 2, time),
            transition: TransitionKind::Dissolve,
            blend,
        });
    }
    // Incoming side: a transition precedes the active item.
    if let Some(prev) = index.checked_sub(1) {
        if let Some(blend) = transition_blend(track, prev, time) {
            return Some(LayerPlan {
                a: prev.checked_sub(1).and_then(|i| clip_read(track, i, time)),
                b: clip_read(track, index, time),
                transition: TransitionKind::Dissolve,
                blend,
            });
        }
    }
    clip_read(track, index, time).map(|read| LayerPlan {
        a: Some(read),
        b: None,
        transition: TransitionKind::None,
        blend: 0.0,
    })
}

/// Layers active at `time`, bottom track first. Tracks with nothing to
/// read contribute no layer.
pub fn plan_video(composition: &Composition, time: RationalTime) -> Vec<LayerPlan<'_>> {
    composition
        .tracks_of(TrackKind::Video)
        .filter_map(|track| plan_track(track, time))
        .filter(|plan| plan.a.is_some() || plan.b.is_some())
        .collect()
}

/// `[seconds, seconds + 1)` at `sample_rate`
pub fn second_range(seconds: i64, sample_rate: u32) -> TimeRange {
    let sr = sample_rate as f64;
    TimeRange::new(RationalTime::new(seconds as f64 * sr, sr), RationalTime::new(sr, sr))
}

/// Audio clips overlapping second `seconds`.
pub fn plan_audio(composition: &Composition, seconds: i64, sample_rate: u32) -> Vec<AudioRead<'_>> {
    let sr = sample_rate as f64;
    let second = second_range(seconds, sample_rate);
    let mut reads = Vec::new();
    for track in composition.tracks_of(TrackKind::Audio) {
        for (_, clip, in_parent) in track.clips_intersecting(second) {
            if clip.media.url().is_none() {
                continue;
            }
            let (Some(in_media), Some(overlap)) = (clip.trimmed_range(), second.intersection(&in_parent)) else {
                continue;
            };
            let overlap = overlap.rescaled_to(sr);
            let offset = (overlap.start_time() - second.start_time()).rescaled_to(sr).round().value();
            let media_range = to_media_range(&overlap, &in_parent, &in_media.rescaled_to(sr));
            if media_range.duration().value() <= 0.0 {
                continue;
            }
            reads.push(AudioRead {
                clip,
                media_range,
                offset_frames: offset.max(0.0) as usize,
            });
        }
    }
    reads
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Gap, MediaReference, Transition};

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

    fn transition_comp(in_offset: f64, out_offset: f64) -> Composition {
        let track = Track::video("V1")
            .with_item(clip("a", 1000, 100))
            .with_item(Item::Transition(Transition::dissolve(rt(in_offset), rt(out_offset))))
            .with_item(clip("b", 0, 100));
        Composition::new("comp", rt(0.0), vec![track])
    }

    #[test]
    fn test_blend_at_transition_midpoint() {
        let comp = transition_comp(0.0, 10.0);
        let layers = plan_video(&comp, rt(105.0));
        assert_eq!(layers.len(), 1);
        let layer = &layers[0];
        assert_eq!(layer.transition, TransitionKind::Dissolve);
        assert!((layer.blend - 0.5).abs() < 1e-6);
        assert_eq!(layer.a.as_ref().unwrap().clip.name, "a");
        assert_eq!(layer.b.as_ref().unwrap().clip.name, "b");
        // a extends past its trim into handle frames
        assert_eq!(layer.a.as_ref().unwrap().media_time, rt(1105.0));
        assert_eq!(layer.b.as_ref().unwrap().media_time, rt(5.0));
    }

    #[test]
    fn test_outgoing_side_keeps_roles() {
        let comp = transition_comp(4.0, 4.0);
        let layer = &plan_video(&comp, rt(97.0))[0];
        assert_eq!(layer.a.as_ref().unwrap().clip.name, "a");
        assert_eq!(layer.b.as_ref().unwrap().clip.name, "b");
        assert!((layer.blend - 1.0 / 8.0).abs() < 1e-6);

        let outside = &plan_video(&comp, rt(50.0))[0];
        assert_eq!(outside.transition, TransitionKind::None);
        assert!(outside.b.is_none());
        assert_eq!(outside.a.as_ref().unwrap().media_time, rt(1050.0));
    }

    #[test]
    fn test_unknown_transition_is_hard_cut() {
        let mut transition = Transition::dissolve(rt(0.0), rt(10.0));
        transition.kind = TransitionType::Unknown("SMPTE_Wipe".into());
        let track = Track::video("V1")
            .with_item(clip("a", 0, 100))
            .with_item(Item::Transition(transition))
            .with_item(clip("b", 0, 100));
        let comp = Composition::new("comp", rt(0.0), vec![track]);
        let layer = &plan_video(&comp, rt(105.0))[0];
        assert_eq!(layer.transition, TransitionKind::None);
        assert_eq!(layer.a.as_ref().unwrap().clip.name, "b");
    }

    #[test]
    fn test_gap_contributes_no_layer() {
        let track = Track::video("V1")
            .with_item(Item::Gap(Gap::new(rt(10.0))))
            .with_item(clip("a", 0, 10));
        let top = Track::video("V2").with_item(clip("t", 0, 20));
        let comp = Composition::new("comp", rt(0.0), vec![track, top]);
        let layers = plan_video(&comp, rt(5.0));
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].a.as_ref().unwrap().clip.name, "t");
        assert_eq!(plan_video(&comp, rt(12.0)).len(), 2);
    }

    #[test]
    fn test_audio_partial_overlap_offset() {
        // Clip covers timeline 0..36 frames = 1.5 s; second 1 overlaps 0.5 s.
        let track = Track::audio("A1").with_item(clip("a", 24, 36));
        let comp = Composition::new("comp", rt(0.0), vec![track]);
        let reads = plan_audio(&comp, 1, 48000);
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].offset_frames, 0);
        assert_eq!(reads[0].media_range.duration().value(), 24000.0);
        // media starts one second in (frame 24) plus one more second
        assert_eq!(reads[0].media_range.start_time().value(), 96000.0);

        let gap_first = Track::audio("A1")
            .with_item(Item::Gap(Gap::new(rt(12.0))))
            .with_item(clip("a", 0, 24));
        let comp = Composition::new("comp", rt(0.0), vec![gap_first]);
        let reads = plan_audio(&comp, 0, 48000);
        assert_eq!(reads[0].offset_frames, 24000);
        assert_eq!(reads[0].media_range.start_time().value(), 0.0);
        assert!(plan_audio(&comp, 5, 48000).is_empty());
    }
}
