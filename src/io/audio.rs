//! Decoded audio buffers and conversion to the device format
//!
//! Samples are interleaved. Readers produce whatever the file holds
//! (S16, S32, F32 at the file's rate and channel count); the cache thread
//! converts to the device's F32 layout with `resample_to_device()` so the
//! real-time callback only copies.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SampleType {
    S16,
    S32,
    #[default]
    F32,
}

impl SampleType {
    pub fn byte_count(self) -> usize {
        match self {
            SampleType::S16 => 2,
            SampleType::S32 | SampleType::F32 => 4,
        }
    }
}

/// Channel layout, sample type and rate of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioInfo {
    pub channel_count: u16,
    pub sample_type: SampleType,
    pub sample_rate: u32,
}

impl Default for AudioInfo {
    fn default() -> Self {
        Self { channel_count: 2, sample_type: SampleType::F32, sample_rate: 48000 }
    }
}

impl AudioInfo {
    pub fn new(channel_count: u16, sample_type: SampleType, sample_rate: u32) -> Self {
        Self { channel_count, sample_type, sample_rate }
    }

    pub fn is_valid(&self) -> bool {
        self.channel_count > 0 && self.sample_rate > 0
    }

    /// Bytes for one frame (one sample per channel).
    pub fn frame_bytes(&self) -> usize {
        self.channel_count as usize * self.sample_type.byte_count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {
    S16(Vec<i16>),
    S32(Vec<i32>),
    F32(Vec<f32>),
}

impl SampleBuffer {
    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::S16(v) => v.len(),
            SampleBuffer::S32(v) => v.len(),
            SampleBuffer::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            SampleBuffer::S16(_) => SampleType::S16,
            SampleBuffer::S32(_) => SampleType::S32,
            SampleBuffer::F32(_) => SampleType::F32,
        }
    }

    /// Sample at `index` as f32 in [-1, 1].
    #[inline]
    fn get_f32(&self, index: usize) -> f32 {
        match self {
            SampleBuffer::S16(v) => v[index] as f32 / 32768.0,
            SampleBuffer::S32(v) => (v[index] as f64 / 2147483648.0) as f32,
            SampleBuffer::F32(v) => v[index],
        }
    }
}

/// Interleaved audio block.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    info: AudioInfo,
    samples: SampleBuffer,
}

impl AudioBuffer {
    /// Wrap interleaved samples. Trailing samples that do not make a whole
    /// frame are dropped.
    pub fn new(channel_count: u16, sample_rate: u32, mut samples: SampleBuffer) -> Self {
        let channels = channel_count.max(1) as usize;
        let whole = samples.len() / channels * channels;
        match &mut samples {
            SampleBuffer::S16(v) => v.truncate(whole),
            SampleBuffer::S32(v) => v.truncate(whole),
            SampleBuffer::F32(v) => v.truncate(whole),
        }
        let info = AudioInfo::new(channel_count.max(1), samples.sample_type(), sample_rate);
        Self { info, samples }
    }

    /// Zero-filled block.
    pub fn silence(info: AudioInfo, frames: usize) -> Self {
        let len = frames * info.channel_count.max(1) as usize;
        let samples = match info.sample_type {
            SampleType::S16 => SampleBuffer::S16(vec![0; len]),
            SampleType::S32 => SampleBuffer::S32(vec![0; len]),
            SampleType::F32 => SampleBuffer::F32(vec![0.0; len]),
        };
        Self::new(info.channel_count, info.sample_rate, samples)
    }

    pub fn info(&self) -> AudioInfo {
        self.info
    }

    pub fn samples(&self) -> &SampleBuffer {
        &self.samples
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.info.channel_count as usize
    }

    pub fn byte_count(&self) -> usize {
        self.samples.len() * self.info.sample_type.byte_count()
    }

    /// Duration in seconds.
    pub fn seconds(&self) -> f64 {
        if self.info.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.info.sample_rate as f64
    }

    /// Sample for `frame`/`channel`, mapped to a device channel.
    ///
    /// Mono sources feed every output channel; extra source channels are
    /// ignored; a mono output averages all source channels.
    #[inline]
    fn mapped_sample(&self, frame: usize, out_channel: usize, out_channels: usize) -> f32 {
        let channels = self.info.channel_count as usize;
        let base = frame * channels;
        if out_channels == 1 && channels > 1 {
            let sum: f32 = (0..channels).map(|c| self.samples.get_f32(base + c)).sum();
            return sum / channels as f32;
        }
        self.samples.get_f32(base + out_channel.min(channels - 1))
    }
}

/// Convert to interleaved F32 at the device rate and channel count.
///
/// Output length is exactly `round(seconds * device_rate)` frames. Linear
/// interpolation between source frames; the final output frames hold the
/// last source frame instead of reading past the block, so consecutive
/// blocks join without a click.
pub fn resample_to_device(input: &AudioBuffer, device: &AudioInfo) -> Vec<f32> {
    let out_channels = device.channel_count.max(1) as usize;
    let in_frames = input.frame_count();
    let in_rate = input.info.sample_rate;
    if in_frames == 0 || in_rate == 0 || device.sample_rate == 0 {
        return Vec::new();
    }

    let out_frames = if in_rate == device.sample_rate {
        in_frames
    } else {
        (in_frames as f64 * device.sample_rate as f64 / in_rate as f64).round() as usize
    };
    let mut out = Vec::with_capacity(out_frames * out_channels);

    if in_rate == device.sample_rate {
        for frame in 0..in_frames {
            for ch in 0..out_channels {
                out.push(input.mapped_sample(frame, ch, out_channels));
            }
        }
        return out;
    }

    let step = in_rate as f64 / device.sample_rate as f64;
    let last = in_frames - 1;
    for k in 0..out_frames {
        let pos = k as f64 * step;
        let i0 = (pos.floor() as usize).min(last);
        let i1 = (i0 + 1).min(last);
        let frac = (pos - i0 as f64).clamp(0.0, 1.0) as f32;
        for ch in 0..out_channels {
            let a = input.mapped_sample(i0, ch, out_channels);
            let b = input.mapped_sample(i1, ch, out_channels);
            out.push(a + (b - a) * frac);
        }
    }
    out
}
