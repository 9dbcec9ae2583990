//! Audio synchronization between the cache thread and the sound device
//!
//! The cache thread resamples cached audio buckets to the device format and
//! appends them to a ring buffer. The device callback (`fill`) drains the
//! ring and applies volume/mute. Positions are device frames counted from
//! the timeline start, so the ring always knows which frame it holds.
//!
//! `fill` never blocks or logs: it uses `try_lock` and writes silence
//! (counting an underrun) if the lock is busy or the ring has no data for the
//! position. The cache thread reports underruns.
//! The position advances on every callback whether or not data was there,
//! so a late refill never plays stale audio.

use log::{debug, trace};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::time::TimeValue;
use crate::io::AudioInfo;

/// A free span at the end of the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingWant {
    /// Reset counter; pushes from an older generation are ignored
    pub generation: u64,
    /// First device frame to push
    pub start_frame: i64,
    pub frames: usize,
}

#[derive(Debug)]
struct AudioState {
    ring: VecDeque<f32>,
    /// Device frame of the first ring sample
    ring_start: i64,
    /// Next device frame the callback plays
    position: i64,
    capacity: usize,
    generation: u64,
    volume: f32,
    mute: bool,
    playing: bool,
}

impl AudioState {
    fn ring_frames(&self, channels: usize) -> usize {
        self.ring.len() / channels
    }

    /// Drop ring frames the device has already passed.
    fn discard_played(&mut self, channels: usize) {
        if self.ring_start >= self.position {
            return;
        }
        let stale = ((self.position - self.ring_start) as usize).min(self.ring_frames(channels));
        self.ring.drain(..stale * channels);
        self.ring_start = if self.ring.is_empty() { self.position } else { self.ring_start + stale as i64 };
    }
}

#[derive(Debug)]
pub struct AudioSync {
    device: AudioInfo,
    state: Mutex<AudioState>,
    underruns: AtomicU64,
}

impl AudioSync {
    pub fn new(device: AudioInfo, buffer_seconds: f64) -> Self {
        let capacity = ((device.sample_rate as f64 * buffer_seconds.max(0.01)) as usize).max(1);
        let channels = device.channel_count.max(1) as usize;
        Self {
            device,
            state: Mutex::new(AudioState {
                ring: VecDeque::with_capacity(capacity * channels),
                ring_start: 0,
                position: 0,
                capacity,
                generation: 0,
                volume: 1.0,
                mute: false,
                playing: false,
            }),
            underruns: AtomicU64::new(0),
        }
    }

    pub fn device(&self) -> AudioInfo {
        self.device
    }

    fn channels(&self) -> usize {
        self.device.channel_count.max(1) as usize
    }

    /// Device frame for a time relative to the timeline start.
    pub fn frame_at(&self, time: TimeValue) -> i64 {
        time.rescaled_to(self.device.sample_rate as i64).value()
    }

    /// Device callback body. Interleaved `out` at the device format.
    pub fn fill(&self, out: &mut [f32]) {
        let channels = self.channels();
        let Ok(mut st) = self.state.try_lock() else {
            out.fill(0.0);
            self.underruns.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if !st.playing {
            out.fill(0.0);
            return;
        }
        let frames = out.len() / channels;
        let gain = if st.mute { 0.0 } else { st.volume };
        st.discard_played(channels);

        let lead = (st.ring_start - st.position).clamp(0, frames as i64) as usize;
        let take = st.ring_frames(channels).min(frames - lead);
        let (head, rest) = out.split_at_mut(lead * channels);
        head.fill(0.0);
        let (body, tail) = rest.split_at_mut(take * channels);
        for (dst, sample) in body.iter_mut().zip(st.ring.drain(..take * channels)) {
            *dst = sample * gain;
        }
        tail.fill(0.0);

        if take > 0 {
            st.ring_start += take as i64;
        }
        st.position += frames as i64;
        if lead + take < frames {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Free space the cache thread should fill next.
    pub fn want(&self) -> Option<RingWant> {
        let channels = self.channels();
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        // Afterwards ring_start >= position
        st.discard_played(channels);
        let have = st.ring_frames(channels);
        let frames = st.capacity.saturating_sub(have);
        (frames > 0).then(|| RingWant {
            generation: st.generation,
            start_frame: st.ring_start + have as i64,
            frames,
        })
    }

    /// Append interleaved device samples for `want`. Returns frames taken.
    pub fn push(&self, want: &RingWant, samples: &[f32]) -> usize {
        let channels = self.channels();
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if want.generation != st.generation {
            return 0;
        }
        st.discard_played(channels);
        let end = st.ring_start + st.ring_frames(channels) as i64;
        if want.start_frame != end {
            debug!("Audio ring push at {} does not continue {}, dropped", want.start_frame, end);
            return 0;
        }
        let room = st.capacity.saturating_sub(st.ring_frames(channels));
        let frames = (samples.len() / channels).min(room);
        st.ring.extend(&samples[..frames * channels]);
        frames
    }

    /// Jump to a new position, dropping buffered audio.
    pub fn reset(&self, position_frame: i64) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.ring.clear();
        st.position = position_frame;
        st.ring_start = position_frame;
        st.generation += 1;
        trace!("Audio ring reset to frame {}", position_frame);
    }

    pub fn set_playing(&self, playing: bool) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).playing = playing;
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).playing
    }

    pub fn set_volume(&self, volume: f32) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_mute(&self, mute: bool) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).mute = mute;
    }

    /// Next device frame to be played.
    pub fn position_frame(&self) -> i64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).position
    }

    pub fn buffered_frames(&self) -> usize {
        let st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.ring_frames(self.channels())
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}
