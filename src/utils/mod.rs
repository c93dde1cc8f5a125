//! Utility functions shared by the engine
//!
//! **Why**: Centralized time arithmetic and range folding used by the
//! timeline, the player and the cache thread.
//!
//! **Used by**: entities, core::timeline, core::player

pub mod ranges;
pub mod time;

pub use ranges::keys_to_ranges;
pub use time::{loop_time, to_media_range, to_media_time, RationalTime, TimeRange};
