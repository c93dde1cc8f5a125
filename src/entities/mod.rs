//! Entities module - plain data the engine reads and produces
//!
//! - composition: immutable tracks/items tree (input)
//! - image, audio: decoded media buffers
//! - data: composite VideoData / AudioData (output)

pub mod audio;
pub mod composition;
pub mod data;
pub mod image;

pub use audio::{AudioBuffer, AudioInfo};
pub use composition::{Clip, Composition, Gap, Item, MediaReference, Track, TrackKind, Transition, TransitionType};
pub use data::{AudioData, AudioLayer, TransitionKind, VideoData, VideoLayer};
pub use image::{Image, ImageInfo, PixelBuffer, PixelFormat};
