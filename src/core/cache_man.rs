//! Cache memory accounting with per-media budgets and epoch-based staleness
//!
//! **Why**: The video and audio caches must each stay under a configured
//! byte budget, and other threads (status output, tests) need lock-free
//! access to the current occupancy. The epoch counter is bumped by every
//! mutation that moves the active time window, so in-flight work can tell
//! it has gone stale.
//!
//! **Used by**: Player (construction, option changes), cache thread
//! (insert/evict accounting, staleness checks).

use log::{debug, info};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use sysinfo::System;

/// Which cache a byte count belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Byte usage and limit for one cache, updated atomically.
#[derive(Debug, Default)]
pub struct MemoryPool {
    usage: AtomicUsize,
    limit: AtomicUsize,
}

impl MemoryPool {
    pub fn new(limit: usize) -> Self {
        Self {
            usage: AtomicUsize::new(0),
            limit: AtomicUsize::new(limit),
        }
    }

    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Relaxed);
    }

    /// True if adding `bytes` would go over the limit.
    pub fn would_exceed(&self, bytes: usize) -> bool {
        self.usage().saturating_add(bytes) > self.limit()
    }

    /// Check if memory limit exceeded
    pub fn check_memory_limit(&self) -> bool {
        self.usage() > self.limit()
    }

    pub fn add_memory(&self, bytes: usize) {
        self.usage.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Free memory usage (saturating subtraction to prevent underflow)
    pub fn free_memory(&self, bytes: usize) {
        // Use compare-exchange loop for saturating subtraction
        loop {
            let current = self.usage.load(Ordering::Relaxed);
            let new_val = current.saturating_sub(bytes);
            if self
                .usage
                .compare_exchange_weak(current, new_val, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Usage as a fraction of the limit (0.0-1.0+)
    pub fn usage_fraction(&self) -> f64 {
        let limit = self.limit();
        if limit == 0 { 0.0 } else { self.usage() as f64 / limit as f64 }
    }
}

/// Shared cache memory manager
///
/// Holds one `MemoryPool` per media kind plus the epoch counter that marks
/// outstanding requests stale after a seek or option change.
#[derive(Debug)]
pub struct CacheManager {
    video: Arc<MemoryPool>,
    audio: Arc<MemoryPool>,
    current_epoch: Arc<AtomicU64>,
}

impl CacheManager {
    /// Create with explicit byte budgets.
    pub fn new(video_bytes: usize, audio_bytes: usize) -> Self {
        debug!(
            "CacheManager: video budget {} MB, audio budget {} MB",
            video_bytes / 1024 / 1024,
            audio_bytes / 1024 / 1024
        );
        Self {
            video: Arc::new(MemoryPool::new(video_bytes)),
            audio: Arc::new(MemoryPool::new(audio_bytes)),
            current_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Budget derived from available system memory.
    ///
    /// # Arguments
    ///
    /// * `mem_fraction` - Fraction of available memory (0.0-1.0, e.g. 0.5 = 50%)
    /// * `reserve_gb` - Reserve memory for system (GB, e.g. 2.0 = 2GB)
    /// * `audio_fraction` - Share of the budget given to audio (e.g. 0.1)
    ///
    /// Returns `(video_bytes, audio_bytes)`.
    pub fn system_budget(mem_fraction: f64, reserve_gb: f64, audio_fraction: f64) -> (usize, usize) {
        let mut sys = System::new();
        sys.refresh_memory();

        let available = sys.available_memory() as usize;
        let reserve = (reserve_gb * 1024.0 * 1024.0 * 1024.0) as usize;
        let usable = available.saturating_sub(reserve);
        let total = (usable as f64 * mem_fraction.clamp(0.0, 1.0)) as usize;
        let audio = (total as f64 * audio_fraction.clamp(0.0, 1.0)) as usize;

        info!(
            "System cache budget: available={} MB, reserve={} MB, video={} MB, audio={} MB",
            available / 1024 / 1024,
            reserve / 1024 / 1024,
            (total - audio) / 1024 / 1024,
            audio / 1024 / 1024
        );

        (total - audio, audio)
    }

    pub fn pool(&self, kind: MediaKind) -> Arc<MemoryPool> {
        match kind {
            MediaKind::Video => Arc::clone(&self.video),
            MediaKind::Audio => Arc::clone(&self.audio),
        }
    }

    /// Memory statistics (usage, limit)
    pub fn mem(&self, kind: MediaKind) -> (usize, usize) {
        let pool = match kind {
            MediaKind::Video => &self.video,
            MediaKind::Audio => &self.audio,
        };
        (pool.usage(), pool.limit())
    }

    /// Update both budgets (e.g. from `set_cache_options`).
    pub fn set_limits(&self, video_bytes: usize, audio_bytes: usize) {
        self.video.set_limit(video_bytes);
        self.audio.set_limit(audio_bytes);
        info!(
            "Cache budgets updated: video {} MB, audio {} MB",
            video_bytes / 1024 / 1024,
            audio_bytes / 1024 / 1024
        );
    }

    /// Increment epoch and return new value
    ///
    /// Call this whenever the active window moves so pending work is stale.
    pub fn increment_epoch(&self) -> u64 {
        let new_epoch = self.current_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("Epoch incremented: {}", new_epoch);
        new_epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Acquire)
    }

    /// Shared epoch counter
    pub fn epoch_ref(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.current_epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_manager_creation() {
        let manager = CacheManager::new(1024, 512);
        assert_eq!(manager.current_epoch(), 0);
        assert_eq!(manager.mem(MediaKind::Video), (0, 1024));
        assert_eq!(manager.mem(MediaKind::Audio), (0, 512));
    }

    #[test]
    fn test_epoch_increment() {
        let manager = CacheManager::new(0, 0);
        assert_eq!(manager.increment_epoch(), 1);
        assert_eq!(manager.increment_epoch(), 2);
        assert_eq!(manager.epoch_ref().load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_memory_tracking() {
        let manager = CacheManager::new(1024 * 1024, 0);
        let video = manager.pool(MediaKind::Video);

        video.add_memory(768 * 1024);
        assert!(!video.check_memory_limit());
        assert!(video.would_exceed(512 * 1024));

        video.free_memory(512 * 1024);
        assert_eq!(video.usage(), 256 * 1024);

        // Saturates instead of wrapping
        video.free_memory(10 * 1024 * 1024);
        assert_eq!(video.usage(), 0);
    }

    #[test]
    fn test_set_limits() {
        let manager = CacheManager::new(10, 10);
        manager.set_limits(100, 50);
        assert_eq!(manager.mem(MediaKind::Video).1, 100);
        assert_eq!(manager.mem(MediaKind::Audio).1, 50);
    }

    #[test]
    fn test_system_budget_split() {
        let (video, audio) = CacheManager::system_budget(0.5, 0.0, 0.25);
        // Audio gets a quarter of the total (allow rounding)
        let total = video + audio;
        assert!(audio <= total / 4 + 1);
    }
}
