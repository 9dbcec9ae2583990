//! In-memory IO plugin for tests
//!
//! Handles any `*.test` path without touching the disk. Video frame N is a
//! small RGBA image whose first pixel encodes N; audio sample at frame i is
//! `(i % 1000) / 1000`. A shared `TestControl` counts reads, can hold
//! requests until released, and can fail chosen frames.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::future::{IoPromise, promise};
use super::{
    AudioBuffer, AudioChunk, AudioInfo, Image, IoError, IoFuture, IoInfo, IoOptions, IoPlugin, IoRead,
    IoResult, IoWrite, PixelBuffer, SampleBuffer, SampleType, VideoFrame,
};
use crate::core::time::{TimeRange, TimeValue};

#[derive(Debug, Clone)]
pub struct TestMedia {
    pub rate: i64,
    pub frames: i64,
    pub width: u32,
    pub height: u32,
    pub audio: Option<AudioInfo>,
}

impl Default for TestMedia {
    fn default() -> Self {
        Self {
            rate: 24,
            frames: 240,
            width: 4,
            height: 4,
            audio: Some(AudioInfo::new(1, SampleType::F32, 1000)),
        }
    }
}

impl TestMedia {
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Frame number encoded in a test image.
pub fn frame_of(image: &Image) -> i64 {
    match image.buffer() {
        PixelBuffer::U8(v) => v[0] as i64 + v[1] as i64 * 256,
        _ => -1,
    }
}

pub fn sample_value(frame: i64) -> f32 {
    frame.rem_euclid(1000) as f32 / 1000.0
}

type HeldVideo = (PathBuf, IoPromise<IoResult<VideoFrame>>, IoResult<VideoFrame>);
type HeldAudio = (PathBuf, IoPromise<IoResult<AudioChunk>>, IoResult<AudioChunk>);

#[derive(Default)]
pub struct TestControl {
    pub video_reads: AtomicUsize,
    pub audio_reads: AtomicUsize,
    pub cancels: AtomicUsize,
    pub opens: AtomicUsize,
    gated: AtomicBool,
    failing: Mutex<HashSet<i64>>,
    held_video: Mutex<Vec<HeldVideo>>,
    held_audio: Mutex<Vec<HeldAudio>>,
}

impl TestControl {
    pub fn video_reads(&self) -> usize {
        self.video_reads.load(Ordering::SeqCst)
    }

    pub fn audio_reads(&self) -> usize {
        self.audio_reads.load(Ordering::SeqCst)
    }

    /// Hold new requests until `release_all()`.
    pub fn set_gated(&self, gated: bool) {
        self.gated.store(gated, Ordering::SeqCst);
    }

    pub fn fail_frame(&self, frame: i64) {
        self.failing.lock().unwrap().insert(frame);
    }

    pub fn held_count(&self) -> usize {
        self.held_video.lock().unwrap().len() + self.held_audio.lock().unwrap().len()
    }

    /// Resolve every held request.
    pub fn release_all(&self) {
        for (_, promise, value) in self.held_video.lock().unwrap().drain(..) {
            promise.set(value);
        }
        for (_, promise, value) in self.held_audio.lock().unwrap().drain(..) {
            promise.set(value);
        }
    }

    fn hold_video(&self, path: &Path, value: IoResult<VideoFrame>) -> IoFuture<IoResult<VideoFrame>> {
        if !self.gated.load(Ordering::SeqCst) {
            return IoFuture::ready(value);
        }
        let (p, f) = promise();
        self.held_video.lock().unwrap().push((path.to_path_buf(), p, value));
        f
    }

    fn hold_audio(&self, path: &Path, value: IoResult<AudioChunk>) -> IoFuture<IoResult<AudioChunk>> {
        if !self.gated.load(Ordering::SeqCst) {
            return IoFuture::ready(value);
        }
        let (p, f) = promise();
        self.held_audio.lock().unwrap().push((path.to_path_buf(), p, value));
        f
    }
}

pub struct TestPlugin {
    name: String,
    media: TestMedia,
    control: Arc<TestControl>,
}

impl TestPlugin {
    pub fn new(name: &str, media: TestMedia) -> Self {
        Self { name: name.to_string(), media, control: Arc::new(TestControl::default()) }
    }

    pub fn control(&self) -> Arc<TestControl> {
        Arc::clone(&self.control)
    }
}

impl IoPlugin for TestPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn extensions(&self) -> &[&'static str] {
        &["test"]
    }

    fn read(&self, path: &Path, _options: &IoOptions) -> IoResult<Arc<dyn IoRead>> {
        self.control.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(TestReader {
            path: path.to_path_buf(),
            media: self.media.clone(),
            control: Arc::clone(&self.control),
        }))
    }

    fn write(&self, path: &Path, _info: &IoInfo, _options: &IoOptions) -> IoResult<Box<dyn IoWrite>> {
        Err(IoError::Unsupported(format!("{}: test plugin is read-only", path.display())))
    }
}

struct TestReader {
    path: PathBuf,
    media: TestMedia,
    control: Arc<TestControl>,
}

impl IoRead for TestReader {
    fn path(&self) -> &Path {
        &self.path
    }

    fn get_info(&self) -> IoFuture<IoResult<IoInfo>> {
        let m = &self.media;
        let mut info = IoInfo {
            video: vec![Image::solid(m.width, m.height, [0; 4]).info()],
            video_time: TimeRange::new(TimeValue::zero(m.rate), TimeValue::new(m.frames, m.rate)),
            ..Default::default()
        };
        if let Some(audio) = m.audio {
            let rate = audio.sample_rate as i64;
            info.audio = Some(audio);
            info.audio_time = TimeRange::new(
                TimeValue::zero(rate),
                TimeValue::new(m.frames, m.rate).rescaled_to(rate),
            );
        }
        IoFuture::ready(Ok(info))
    }

    fn read_video(&self, time: TimeValue, _options: &IoOptions) -> IoFuture<IoResult<VideoFrame>> {
        self.control.video_reads.fetch_add(1, Ordering::SeqCst);
        let frame = time.rescaled_to(self.media.rate).value();
        let value = if self.control.failing.lock().unwrap().contains(&frame) {
            Err(IoError::Decode(format!("injected failure at frame {}", frame)))
        } else {
            let code = [(frame.rem_euclid(256)) as u8, (frame.rem_euclid(65536) / 256) as u8, 0, 255];
            let image = Image::solid(self.media.width, self.media.height, code);
            Ok(VideoFrame { time, image: Arc::new(image) })
        };
        self.control.hold_video(&self.path, value)
    }

    fn read_audio(&self, range: TimeRange, _options: &IoOptions) -> IoFuture<IoResult<AudioChunk>> {
        self.control.audio_reads.fetch_add(1, Ordering::SeqCst);
        let Some(info) = self.media.audio else {
            return IoFuture::ready(Err(IoError::NoData("no audio".into())));
        };
        let rate = info.sample_rate as i64;
        let start = range.start.rescaled_to(rate).value();
        let end = range.end_exclusive().rescaled_to(rate).value();
        let channels = info.channel_count as usize;
        let samples: Vec<f32> = (start..end)
            .flat_map(|i| std::iter::repeat_n(sample_value(i), channels))
            .collect();
        let audio = AudioBuffer::new(info.channel_count, info.sample_rate, SampleBuffer::F32(samples));
        self.control.hold_audio(&self.path, Ok(AudioChunk { range, audio: Arc::new(audio) }))
    }

    fn cancel_requests(&self) {
        self.control.cancels.fetch_add(1, Ordering::SeqCst);
        // Dropping the promises resolves the futures as canceled
        self.control.held_video.lock().unwrap().retain(|(p, _, _)| p != &self.path);
        self.control.held_audio.lock().unwrap().retain(|(p, _, _)| p != &self.path);
    }
}
