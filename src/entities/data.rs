//! Composite results handed to the renderer and the audio output.
//!
//! `VideoData` is one timeline time, composited per layer (bottom to top).
//! `AudioData` is one integer second, one padded buffer per contributing clip.

use crate::entities::audio::{AudioBuffer, AudioInfo};
use crate::entities::image::{Image, ImageInfo};
use crate::utils::time::RationalTime;

/// How a layer's two images are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionKind {
    #[default]
    None,
    Dissolve,
}

/// One video layer. `image_b` is only set inside a transition window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoLayer {
    /// Outgoing clip (or the only clip outside transitions)
    pub image: Option<Image>,
    /// Incoming clip during a transition
    pub image_b: Option<Image>,
    pub transition: TransitionKind,
    /// Progress through the transition, 0 = all `image`, 1 = all `image_b`
    pub blend: f32,
}

impl VideoLayer {
    pub fn mem(&self) -> usize {
        self.image.as_ref().map_or(0, Image::mem) + self.image_b.as_ref().map_or(0, Image::mem)
    }
}

/// Video for one timeline time
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoData {
    pub time: RationalTime,
    /// Resolution of the selected layer in the timeline's IO info
    pub size: ImageInfo,
    pub layers: Vec<VideoLayer>,
}

impl VideoData {
    pub fn empty(time: RationalTime, size: ImageInfo) -> Self {
        Self {
            time,
            size,
            layers: Vec::new(),
        }
    }

    pub fn mem(&self) -> usize {
        self.layers.iter().map(VideoLayer::mem).sum()
    }
}

/// One clip's contribution to a second of audio, padded to the full second
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioLayer {
    pub audio: AudioBuffer,
}

/// Audio for one integer second `[seconds, seconds + 1)`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioData {
    pub seconds: i64,
    pub info: AudioInfo,
    pub layers: Vec<AudioLayer>,
}

impl AudioData {
    /// One silent layer spanning the second
    pub fn silent(seconds: i64, info: AudioInfo) -> Self {
        Self {
            seconds,
            info,
            layers: vec![AudioLayer {
                audio: AudioBuffer::silence(info, info.sample_rate as usize),
            }],
        }
    }

    pub fn mem(&self) -> usize {
        self.layers.iter().map(|l| l.audio.mem()).sum()
    }

    /// Sum of all layers at (`frame`, `channel`)
    pub fn mixed_sample(&self, frame: usize, channel: usize) -> f32 {
        self.layers.iter().map(|l| l.audio.sample(frame, channel)).sum()
    }
}
