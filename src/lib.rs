//! tlplay - timeline playback cache and concurrency engine
//!
//! Plays a multi-track timeline of media files: IO plugins decode frames and
//! audio on a worker pool, a resolver turns timeline times into decode
//! requests, and a player keeps a directional, byte-budgeted cache filled
//! around the playhead while feeding an audio ring buffer.
//!
//! Re-exports all modules for use by the binary target.

// Engine primitives (time, observables, memory accounting, workers)
pub mod core;

// Domain
pub mod io;
pub mod player;
pub mod timeline;

// App modules
pub mod cli;
pub mod config;

pub use core::cache_man::CacheManager;
pub use core::time::{TimeRange, TimeValue};
pub use io::IoRegistry;
pub use player::{Loop, Playback, Player, PlayerOptions};
pub use timeline::{Timeline, TimelineOptions};
