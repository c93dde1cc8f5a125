//! Core engine modules - promises, workers, observables, timeline, player
//!
//! These modules form the playback engine, independent of any UI.

pub mod memory;
pub mod observer;
pub mod player;
pub mod promise;
pub mod timeline;
pub mod workers;

// Re-exports for convenience
pub use observer::Observable;
pub use player::{AudioBridge, Player, PlayerOptions};
pub use promise::{Future, Poll, Promise};
pub use timeline::{Timeline, TimelineOptions};
pub use workers::{Epoch, Workers};
