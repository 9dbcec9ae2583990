//! Media IO: plugin registry and the asynchronous reader/writer contract
//!
//! A plugin maps file extensions to readers and writers. Readers never
//! block the caller: every read returns an `IoFuture` that is resolved on
//! the shared worker pool. `IoRead::cancel_requests()` guarantees that all
//! pending futures resolve (as canceled) instead of hanging.

pub mod audio;
pub mod future;
pub mod image;
pub mod image_seq;
pub mod registry;
pub mod sequence;
pub mod wav;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::core::time::{TimeRange, TimeValue};

pub use audio::{AudioBuffer, AudioInfo, SampleBuffer, SampleType, resample_to_device};
pub use future::{CancelHandle, FutureStatus, IoFuture, IoPromise};
pub use self::image::{Image, ImageInfo, PixelBuffer, PixelFormat};
pub use registry::IoRegistry;

/// Plugin options, forwarded opaquely (e.g. "ImageSequence/DefaultSpeed").
pub type IoOptions = BTreeMap<String, String>;

/// Merge `overrides` on top of `base`.
pub fn merge_options(base: &IoOptions, overrides: &IoOptions) -> IoOptions {
    let mut out = base.clone();
    out.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}

/// IO errors
#[derive(Debug)]
pub enum IoError {
    Io(std::io::Error),
    Decode(String),
    Unsupported(String),
    Canceled,
    NoData(String),
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Io(e) => write!(f, "IO error: {}", e),
            IoError::Decode(e) => write!(f, "Decode error: {}", e),
            IoError::Unsupported(e) => write!(f, "Unsupported media: {}", e),
            IoError::Canceled => write!(f, "Request canceled"),
            IoError::NoData(e) => write!(f, "No data: {}", e),
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        IoError::Io(e)
    }
}

impl From<::image::ImageError> for IoError {
    fn from(e: ::image::ImageError) -> Self {
        match e {
            ::image::ImageError::IoError(e) => IoError::Io(e),
            ::image::ImageError::Unsupported(e) => IoError::Unsupported(e.to_string()),
            other => IoError::Decode(other.to_string()),
        }
    }
}

impl From<hound::Error> for IoError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(e) => IoError::Io(e),
            hound::Error::Unsupported => IoError::Unsupported("WAV sample format".into()),
            other => IoError::Decode(other.to_string()),
        }
    }
}

pub type IoResult<T> = Result<T, IoError>;

/// What a reader knows about its media.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IoInfo {
    /// One entry per video layer (empty when there is no video)
    pub video: Vec<ImageInfo>,
    pub video_time: TimeRange,
    pub audio: Option<AudioInfo>,
    pub audio_time: TimeRange,
    pub tags: BTreeMap<String, String>,
}

impl IoInfo {
    pub fn has_video(&self) -> bool {
        !self.video.is_empty()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

/// Result of `IoRead::read_video`
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub time: TimeValue,
    pub image: Arc<Image>,
}

/// Result of `IoRead::read_audio`
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub range: TimeRange,
    pub audio: Arc<AudioBuffer>,
}

/// Per-clip asynchronous decode session.
pub trait IoRead: Send + Sync {
    fn path(&self) -> &Path;

    fn get_info(&self) -> IoFuture<IoResult<IoInfo>>;

    /// Decode the video frame at media-local `time`.
    fn read_video(&self, time: TimeValue, options: &IoOptions) -> IoFuture<IoResult<VideoFrame>>;

    /// Decode audio covering media-local `range`.
    fn read_audio(&self, range: TimeRange, options: &IoOptions) -> IoFuture<IoResult<AudioChunk>>;

    /// Resolve every pending request as canceled.
    fn cancel_requests(&self);
}

/// Synchronous writer session.
pub trait IoWrite: Send {
    fn path(&self) -> &Path;

    fn write_video(&mut self, _time: TimeValue, _image: &Image) -> IoResult<()> {
        Err(IoError::Unsupported(format!("{}: video output", self.path().display())))
    }

    fn write_audio(&mut self, _audio: &AudioBuffer) -> IoResult<()> {
        Err(IoError::Unsupported(format!("{}: audio output", self.path().display())))
    }

    /// Flush and close. Also runs on drop where the format needs it.
    fn finish(&mut self) -> IoResult<()> {
        Ok(())
    }
}

/// Codec plugin.
pub trait IoPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Lowercase extensions without the dot.
    fn extensions(&self) -> &[&'static str];

    fn read(&self, path: &Path, options: &IoOptions) -> IoResult<Arc<dyn IoRead>>;

    fn write(&self, path: &Path, info: &IoInfo, options: &IoOptions) -> IoResult<Box<dyn IoWrite>>;
}

/// Lowercase extension of `path`, without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension().and_then(|s| s.to_str()).map(|s| s.to_lowercase())
}
