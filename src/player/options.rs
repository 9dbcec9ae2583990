//! Player and cache options
//!
//! All structs are `serde` with `#[serde(default)]` so partial settings files
//! load cleanly. A zero byte budget means "derive from system memory".

use serde::{Deserialize, Serialize};

use crate::core::cache_man::CacheManager;
use crate::core::time::TimeValue;
use crate::io::{AudioInfo, SampleType};

/// Share of available memory used when no explicit budget is set
const AUTO_MEM_FRACTION: f64 = 0.5;
/// Memory always left to the rest of the system (GB)
const AUTO_RESERVE_GB: f64 = 2.0;
/// Audio share of an automatic budget
const AUTO_AUDIO_FRACTION: f64 = 0.1;

const MB: usize = 1024 * 1024;

/// Cache budgets and window size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerCacheOptions {
    /// Video byte budget in MB (0 = auto)
    pub video_mb: usize,
    /// Audio byte budget in MB (0 = auto)
    pub audio_mb: usize,
    /// Seconds cached ahead of the playhead
    pub read_ahead: f64,
    /// Seconds kept behind the playhead
    pub read_behind: f64,
}

impl Default for PlayerCacheOptions {
    fn default() -> Self {
        Self { video_mb: 1024, audio_mb: 128, read_ahead: 2.0, read_behind: 0.5 }
    }
}

impl PlayerCacheOptions {
    /// (video, audio) budgets in bytes.
    pub fn budgets(&self) -> (usize, usize) {
        if self.video_mb == 0 || self.audio_mb == 0 {
            let (video, audio) = CacheManager::system_budget(AUTO_MEM_FRACTION, AUTO_RESERVE_GB, AUTO_AUDIO_FRACTION);
            let video = if self.video_mb == 0 { video } else { self.video_mb * MB };
            let audio = if self.audio_mb == 0 { audio } else { self.audio_mb * MB };
            return (video, audio);
        }
        (self.video_mb * MB, self.audio_mb * MB)
    }

    pub fn read_ahead_time(&self, rate: i64) -> TimeValue {
        TimeValue::from_seconds(self.read_ahead.max(0.0), rate)
    }

    pub fn read_behind_time(&self, rate: i64) -> TimeValue {
        TimeValue::from_seconds(self.read_behind.max(0.0), rate)
    }
}

/// Runtime knobs for the player and its cache thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerOptions {
    pub cache: PlayerCacheOptions,
    /// Max outstanding video requests
    pub video_request_count: usize,
    /// Max outstanding audio requests
    pub audio_request_count: usize,
    /// Per-request timeout (0 = none)
    pub request_timeout_ms: u64,
    /// Cache thread wake interval when idle
    pub cache_tick_ms: u64,
    /// Fixed format delivered to the audio device
    pub audio_device: AudioInfo,
    /// Ring buffer length between the cache thread and the device
    pub audio_buffer_seconds: f64,
    /// Resync the audio ring when it drifts this far from the video clock
    pub audio_drift_ms: u64,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            cache: PlayerCacheOptions::default(),
            video_request_count: 16,
            audio_request_count: 16,
            request_timeout_ms: 5000,
            cache_tick_ms: 5,
            audio_device: AudioInfo::new(2, SampleType::F32, 48000),
            audio_buffer_seconds: 0.5,
            audio_drift_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_durations_follow_rate() {
        let options = PlayerCacheOptions::default();
        assert_eq!(options.read_ahead_time(24), TimeValue::new(48, 24));
        assert_eq!(options.read_behind_time(24), TimeValue::new(12, 24));
        assert_eq!(options.read_behind_time(30), TimeValue::new(15, 30));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let options: PlayerOptions = serde_json::from_str(r#"{"cache": {"read_ahead": 4.0}}"#).unwrap();
        assert_eq!(options.cache.read_ahead, 4.0);
        assert_eq!(options.cache.video_mb, 1024);
        assert_eq!(options.video_request_count, 16);
        assert_eq!(options.cache.budgets(), (1024 * MB, 128 * MB));
    }
}
