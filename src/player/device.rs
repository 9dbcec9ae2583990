//! Audio outputs driving `AudioSync::fill`
//!
//! `NullAudioOutput` paces itself like a device but discards the samples;
//! the headless binary and tests use it. `CpalAudioOutput` (feature
//! `audio-device`) opens the default output device.

use log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::audio::AudioSync;

/// Device buffer period
const PERIOD: Duration = Duration::from_millis(10);

pub trait AudioOutput {
    fn name(&self) -> &str;
}

pub struct NullAudioOutput {
    running: Arc<AtomicBool>,
    callbacks: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl NullAudioOutput {
    pub fn start(sync: Arc<AudioSync>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let callbacks = Arc::new(AtomicU64::new(0));
        let device = sync.device();
        let frames = (device.sample_rate as u128 * PERIOD.as_millis() / 1000) as usize;
        let samples = frames * device.channel_count.max(1) as usize;

        let (run, count) = (Arc::clone(&running), Arc::clone(&callbacks));
        let thread = thread::Builder::new()
            .name("tlplay-audio".into())
            .spawn(move || {
                let mut buffer = vec![0.0f32; samples];
                let mut deadline = Instant::now();
                while run.load(Ordering::Acquire) {
                    sync.fill(&mut buffer);
                    count.fetch_add(1, Ordering::Relaxed);
                    deadline += PERIOD;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else {
                        deadline = now;
                    }
                }
            })
            .expect("Failed to spawn audio thread");

        debug!("Null audio output: {} frames per {:?}", frames, PERIOD);
        Self { running, callbacks, thread: Some(thread) }
    }

    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }
}

impl AudioOutput for NullAudioOutput {
    fn name(&self) -> &str {
        "null"
    }
}

impl Drop for NullAudioOutput {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(feature = "audio-device")]
pub use self::cpal_output::CpalAudioOutput;

#[cfg(feature = "audio-device")]
mod cpal_output {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use log::error;

    /// Default output device via cpal.
    pub struct CpalAudioOutput {
        name: String,
        _stream: cpal::Stream,
    }

    impl CpalAudioOutput {
        pub fn start(sync: Arc<AudioSync>) -> anyhow::Result<Self> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| anyhow::anyhow!("No audio output device"))?;
            let name = device.name().unwrap_or_else(|_| "unknown".into());
            let format = sync.device();
            let config = cpal::StreamConfig {
                channels: format.channel_count,
                sample_rate: cpal::SampleRate(format.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| sync.fill(data),
                |e| error!("Audio stream error: {}", e),
                None,
            )?;
            stream.play()?;
            info!("Audio device: {} ({} Hz, {} ch)", name, format.sample_rate, format.channel_count);
            Ok(Self { name, _stream: stream })
        }
    }

    impl AudioOutput for CpalAudioOutput {
        fn name(&self) -> &str {
            &self.name
        }
    }
}

/// Best available output: the device when compiled in, else the null sink.
pub fn open_output(sync: Arc<AudioSync>, use_device: bool) -> Box<dyn AudioOutput> {
    #[cfg(feature = "audio-device")]
    if use_device {
        match CpalAudioOutput::start(Arc::clone(&sync)) {
            Ok(output) => return Box::new(output),
            Err(e) => log::warn!("Audio device unavailable ({}), using null output", e),
        }
    }
    #[cfg(not(feature = "audio-device"))]
    if use_device {
        info!("Built without the audio-device feature, using null output");
    }
    Box::new(NullAudioOutput::start(sync))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{AudioInfo, SampleType};

    #[test]
    fn test_null_output_paces_callbacks() {
        let sync = Arc::new(AudioSync::new(AudioInfo::new(2, SampleType::F32, 1000), 0.1));
        sync.set_playing(true);
        let output = NullAudioOutput::start(Arc::clone(&sync));
        thread::sleep(Duration::from_millis(100));
        let calls = output.callbacks();
        drop(output);
        assert!(calls >= 3, "only {} callbacks", calls);
        // 10 frames per callback, nothing buffered
        assert!(sync.position_frame() >= 30);
        assert!(sync.underruns() >= 3);
    }
}
