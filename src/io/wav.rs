//! WAV audio via `hound`
//!
//! Reads any sub-range of a file into interleaved S16/S32/F32 samples.
//! Ranges reaching outside the file are padded with silence so the result
//! always covers exactly the requested duration.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, trace, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::audio::{AudioBuffer, AudioInfo, SampleBuffer, SampleType};
use super::future::Dispatcher;
use super::{
    AudioChunk, IoError, IoFuture, IoInfo, IoOptions, IoPlugin, IoRead, IoResult, IoWrite, VideoFrame,
};
use crate::core::time::{TimeRange, TimeValue};
use crate::core::workers::Workers;

const EXTENSIONS: &[&str] = &["wav"];

pub struct WavPlugin {
    workers: Arc<Workers>,
}

impl WavPlugin {
    pub fn new(workers: Arc<Workers>) -> Self {
        Self { workers }
    }
}

impl IoPlugin for WavPlugin {
    fn name(&self) -> &str {
        "wav"
    }

    fn extensions(&self) -> &[&'static str] {
        EXTENSIONS
    }

    fn read(&self, path: &Path, _options: &IoOptions) -> IoResult<Arc<dyn IoRead>> {
        Ok(Arc::new(WavFileReader::open(path, Dispatcher::new(Arc::clone(&self.workers)))?))
    }

    fn write(&self, path: &Path, info: &IoInfo, _options: &IoOptions) -> IoResult<Box<dyn IoWrite>> {
        let audio = info
            .audio
            .ok_or_else(|| IoError::Unsupported(format!("{}: WAV output needs audio info", path.display())))?;
        Ok(Box::new(WavFileWriter::create(path, audio)?))
    }
}

fn sample_type_of(spec: &WavSpec) -> SampleType {
    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => SampleType::F32,
        (SampleFormat::Int, bits) if bits <= 16 => SampleType::S16,
        (SampleFormat::Int, _) => SampleType::S32,
    }
}

pub struct WavFileReader {
    path: PathBuf,
    spec: WavSpec,
    frames: u32,
    dispatcher: Dispatcher,
}

impl WavFileReader {
    pub fn open(path: &Path, dispatcher: Dispatcher) -> IoResult<Self> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        let frames = reader.duration();
        debug!(
            "Opened WAV {}: {} ch, {} Hz, {} bit {:?}, {} frames",
            path.display(),
            spec.channels,
            spec.sample_rate,
            spec.bits_per_sample,
            spec.sample_format,
            frames
        );
        Ok(Self { path: path.to_path_buf(), spec, frames, dispatcher })
    }

    pub fn audio_info(&self) -> AudioInfo {
        AudioInfo::new(self.spec.channels, sample_type_of(&self.spec), self.spec.sample_rate)
    }

    pub fn time_range(&self) -> TimeRange {
        let rate = self.spec.sample_rate as i64;
        TimeRange::new(TimeValue::zero(rate), TimeValue::new(self.frames as i64, rate))
    }
}

/// Read `count` frames starting at `start` (which may be negative or past
/// the end); missing frames are silence.
fn read_range(path: &Path, spec: WavSpec, total: u32, start: i64, count: usize) -> IoResult<AudioBuffer> {
    let channels = spec.channels.max(1) as usize;
    let lead = (-start).clamp(0, count as i64) as usize;
    let file_start = start.max(0);
    let available = (total as i64 - file_start).clamp(0, (count - lead) as i64) as usize;
    let sample_count = count * channels;
    let offset = lead * channels;
    let take = available * channels;

    let mut reader = WavReader::open(path)?;
    if available > 0 {
        reader.seek(file_start as u32)?;
    }

    let samples = match sample_type_of(&spec) {
        SampleType::S16 => {
            let mut out = vec![0i16; sample_count];
            for (dst, s) in out[offset..offset + take].iter_mut().zip(reader.samples::<i16>()) {
                *dst = s?;
            }
            SampleBuffer::S16(out)
        }
        SampleType::S32 => {
            // Scale 24-bit (and friends) up to full i32 range
            let shift = 32u32.saturating_sub(spec.bits_per_sample as u32);
            let mut out = vec![0i32; sample_count];
            for (dst, s) in out[offset..offset + take].iter_mut().zip(reader.samples::<i32>()) {
                *dst = s?.wrapping_shl(shift);
            }
            SampleBuffer::S32(out)
        }
        SampleType::F32 => {
            let mut out = vec![0f32; sample_count];
            for (dst, s) in out[offset..offset + take].iter_mut().zip(reader.samples::<f32>()) {
                *dst = s?;
            }
            SampleBuffer::F32(out)
        }
    };
    Ok(AudioBuffer::new(spec.channels, spec.sample_rate, samples))
}

impl IoRead for WavFileReader {
    fn path(&self) -> &Path {
        &self.path
    }

    fn get_info(&self) -> IoFuture<IoResult<IoInfo>> {
        let mut info = IoInfo {
            audio: Some(self.audio_info()),
            audio_time: self.time_range(),
            ..Default::default()
        };
        info.tags.insert("Bits Per Sample".into(), self.spec.bits_per_sample.to_string());
        IoFuture::ready(Ok(info))
    }

    fn read_video(&self, _time: TimeValue, _options: &IoOptions) -> IoFuture<IoResult<VideoFrame>> {
        IoFuture::ready(Err(IoError::NoData(format!("{}: no video", self.path.display()))))
    }

    fn read_audio(&self, range: TimeRange, _options: &IoOptions) -> IoFuture<IoResult<AudioChunk>> {
        let rate = self.spec.sample_rate as i64;
        if !range.is_valid() || rate <= 0 {
            return IoFuture::ready(Err(IoError::NoData(format!("invalid range {}", range))));
        }
        let start = range.start.rescaled_to(rate).value();
        let end = range.end_exclusive().rescaled_to(rate).value();
        let count = (end - start).max(0) as usize;

        let (path, spec, total) = (self.path.clone(), self.spec, self.frames);
        self.dispatcher.spawn(move || {
            trace!("WAV read {} frames at {} from {}", count, start, path.display());
            let audio = read_range(&path, spec, total, start, count)?;
            Ok(AudioChunk { range, audio: Arc::new(audio) })
        })
    }

    fn cancel_requests(&self) {
        self.dispatcher.cancel_all();
    }
}

pub struct WavFileWriter {
    path: PathBuf,
    info: AudioInfo,
    writer: Option<WavWriter<BufWriter<File>>>,
}

impl WavFileWriter {
    pub fn create(path: &Path, info: AudioInfo) -> IoResult<Self> {
        let spec = WavSpec {
            channels: info.channel_count,
            sample_rate: info.sample_rate,
            bits_per_sample: match info.sample_type {
                SampleType::S16 => 16,
                SampleType::S32 | SampleType::F32 => 32,
            },
            sample_format: match info.sample_type {
                SampleType::F32 => SampleFormat::Float,
                _ => SampleFormat::Int,
            },
        };
        let writer = WavWriter::create(path, spec)?;
        Ok(Self { path: path.to_path_buf(), info, writer: Some(writer) })
    }
}

impl IoWrite for WavFileWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_audio(&mut self, audio: &AudioBuffer) -> IoResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| IoError::NoData(format!("{}: writer already finished", self.path.display())))?;
        if audio.info().channel_count != self.info.channel_count
            || audio.info().sample_type != self.info.sample_type
        {
            return Err(IoError::Unsupported(format!(
                "{}: expected {:?}, got {:?}",
                self.path.display(),
                self.info,
                audio.info()
            )));
        }
        match audio.samples() {
            SampleBuffer::S16(v) => v.iter().try_for_each(|s| writer.write_sample(*s))?,
            SampleBuffer::S32(v) => v.iter().try_for_each(|s| writer.write_sample(*s))?,
            SampleBuffer::F32(v) => v.iter().try_for_each(|s| writer.write_sample(*s))?,
        }
        Ok(())
    }

    fn finish(&mut self) -> IoResult<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

impl Drop for WavFileWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("Failed to finalize {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_ramp(path: &Path, rate: u32, frames: usize) {
        let info = AudioInfo::new(2, SampleType::S16, rate);
        let mut writer = WavFileWriter::create(path, info).unwrap();
        let samples: Vec<i16> = (0..frames).flat_map(|i| [i as i16, -(i as i16)]).collect();
        writer.write_audio(&AudioBuffer::new(2, rate, SampleBuffer::S16(samples))).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_info_and_sub_range() {
        let dir = std::env::temp_dir().join("tlplay_test_wav");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ramp.wav");
        write_ramp(&path, 1000, 2000);

        let reader = WavFileReader::open(&path, Dispatcher::detached()).unwrap();
        let info = reader.get_info().wait_result().unwrap();
        assert_eq!(info.audio, Some(AudioInfo::new(2, SampleType::S16, 1000)));
        assert_eq!(info.audio_time.end_exclusive(), TimeValue::new(2, 1));

        // Half a second starting at 1.0s
        let range = TimeRange::new(TimeValue::new(1, 1), TimeValue::new(500, 1000));
        let chunk = reader.read_audio(range, &IoOptions::new()).wait_result().unwrap();
        assert_eq!(chunk.audio.frame_count(), 500);
        match chunk.audio.samples() {
            SampleBuffer::S16(v) => assert_eq!(&v[..4], &[1000, -1000, 1001, -1001]),
            other => panic!("unexpected samples {:?}", other),
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_range_past_end_is_padded_with_silence() {
        let dir = std::env::temp_dir().join("tlplay_test_wav_pad");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("short.wav");
        write_ramp(&path, 100, 50);

        let reader = WavFileReader::open(&path, Dispatcher::detached()).unwrap();
        let range = TimeRange::new(TimeValue::new(-10, 100), TimeValue::new(100, 100));
        let chunk = reader.read_audio(range, &IoOptions::new()).wait_result().unwrap();
        assert_eq!(chunk.audio.frame_count(), 100);
        match chunk.audio.samples() {
            SampleBuffer::S16(v) => {
                assert!(v[..20].iter().all(|s| *s == 0));
                assert_eq!(v[20], 0); // file frame 0
                assert_eq!(v[22], 1);
                assert!(v[120..].iter().all(|s| *s == 0));
            }
            other => panic!("unexpected samples {:?}", other),
        }
        let _ = std::fs::remove_file(&path);
    }
}
