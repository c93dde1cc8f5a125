//! tlplay - timeline playback and cache engine library
//!
//! Re-exports all modules for use by the driver binary.

// Core engine (promises, workers, timeline, player)
pub mod core;

// Data and media IO
pub mod entities;
pub mod io;
pub mod utils;

// Driver support
pub mod cli;
pub mod shell;

// Re-export commonly used types from core
pub use core::player::{AudioBridge, CacheOptions, Loop, Playback, Player, PlayerOptions, TimeAction};
pub use core::timeline::{Timeline, TimelineOptions};

// Re-export entities
pub use entities::{AudioData, Composition, VideoData};
pub use utils::time::{RationalTime, TimeRange};
