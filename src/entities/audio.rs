//! Audio format and interleaved sample buffers.
//!
//! All decoded audio is interleaved `f32`. Readers may deliver another
//! channel count than the timeline format; [`AudioBuffer::placed_into`]
//! maps channels while padding to a one-second layer.

use serde::{Deserialize, Serialize};

/// Channel count and sample rate of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AudioInfo {
    pub channel_count: usize,
    pub sample_rate: u32,
}

impl AudioInfo {
    /// Bytes per sample value (interleaved f32)
    pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<f32>();

    pub fn new(channel_count: usize, sample_rate: u32) -> Self {
        Self {
            channel_count,
            sample_rate,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.channel_count > 0 && self.sample_rate > 0
    }

    /// Bytes used by one second of audio in this format
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * Self::BYTES_PER_SAMPLE * self.channel_count
    }
}

/// Interleaved sample buffer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioBuffer {
    info: AudioInfo,
    samples: Vec<f32>,
}

impl AudioBuffer {
    /// Wrap interleaved samples; trailing partial frames are dropped.
    pub fn new(info: AudioInfo, mut samples: Vec<f32>) -> Self {
        if info.channel_count > 0 {
            let whole = samples.len() / info.channel_count * info.channel_count;
            samples.truncate(whole);
        } else {
            samples.clear();
        }
        Self { info, samples }
    }

    pub fn silence(info: AudioInfo, frames: usize) -> Self {
        Self {
            info,
            samples: vec![0.0; frames * info.channel_count],
        }
    }

    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample frames (one value per channel each)
    pub fn frames(&self) -> usize {
        if self.info.channel_count == 0 {
            0
        } else {
            self.samples.len() / self.info.channel_count
        }
    }

    /// Value of `channel` at `frame`, silence when out of bounds.
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        if channel >= self.info.channel_count {
            return 0.0;
        }
        self.samples
            .get(frame * self.info.channel_count + channel)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn mem(&self) -> usize {
        self.samples.len() * AudioInfo::BYTES_PER_SAMPLE
    }

    /// Copy this buffer into a silent buffer of `total_frames` at `info`,
    /// starting at `offset_frames`. Frames that do not fit are dropped;
    /// missing channels repeat the last source channel.
    pub fn placed_into(&self, info: AudioInfo, total_frames: usize, offset_frames: usize) -> AudioBuffer {
        let mut out = AudioBuffer::silence(info, total_frames);
        let src_channels = self.info.channel_count;
        if src_channels == 0 || info.channel_count == 0 || offset_frames >= total_frames {
            return out;
        }
        let count = self.frames().min(total_frames - offset_frames);
        for frame in 0..count {
            let dst = (offset_frames + frame) * info.channel_count;
            for channel in 0..info.channel_count {
                out.samples[dst + channel] = self.sample(frame, channel.min(src_channels - 1));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placed_into_pads_head_and_tail() {
        let info = AudioInfo::new(2, 10);
        let src = AudioBuffer::new(info, vec![1.0; 8]); // 4 frames
        let out = src.placed_into(info, 10, 3);
        assert_eq!(out.frames(), 10);
        let frames: Vec<f32> = (0..10).map(|f| out.sample(f, 0)).collect();
        assert_eq!(frames, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_placed_into_maps_mono_to_stereo() {
        let mono = AudioBuffer::new(AudioInfo::new(1, 10), vec![0.5, 0.25]);
        let out = mono.placed_into(AudioInfo::new(2, 10), 4, 0);
        assert_eq!(&out.samples()[..4], &[0.5, 0.5, 0.25, 0.25]);
    }

    #[test]
    fn test_bytes_per_second() {
        assert_eq!(AudioInfo::new(2, 48000).bytes_per_second(), 48000 * 4 * 2);
    }
}
