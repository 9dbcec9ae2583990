//! Core engine modules - time, memory accounting, observables, workers
//!
//! Domain-independent building blocks shared by io, timeline and player.

pub mod cache_man;
pub mod observable;
pub mod time;
pub mod workers;

// Re-exports for convenience
pub use cache_man::{CacheManager, MediaKind, MemoryPool};
pub use observable::{Observable, ObservableList, Subscription};
pub use time::{TimeRange, TimeValue};
pub use workers::Workers;
