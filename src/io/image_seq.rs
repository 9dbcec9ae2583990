//! Still images and numbered image sequences via the `image` crate
//!
//! A path with a trailing frame number (`shot.0001.png`) opens the whole
//! sequence; media-local time maps to a frame number at the sequence rate
//! (IO option `ImageSequence/DefaultSpeed`, default 24). Any other path is
//! a still: one frame long, and every time reads the same file.

use log::{debug, trace};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::future::Dispatcher;
use super::image::Image;
use super::sequence::{FileSequence, split_sequence_path};
use super::{
    AudioChunk, IoError, IoFuture, IoInfo, IoOptions, IoPlugin, IoRead, IoResult, IoWrite, VideoFrame,
};
use crate::core::time::{TimeRange, TimeValue};
use crate::core::workers::Workers;

pub const DEFAULT_SPEED_OPTION: &str = "ImageSequence/DefaultSpeed";
pub const DEFAULT_SPEED: i64 = 24;

const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "tga", "exr", "hdr", "bmp"];

/// Sequence rate from options, falling back to 24.
pub fn sequence_rate(options: &IoOptions) -> i64 {
    options
        .get(DEFAULT_SPEED_OPTION)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .map(|r| r.round() as i64)
        .filter(|r| *r > 0)
        .unwrap_or(DEFAULT_SPEED)
}

pub struct ImagePlugin {
    workers: Arc<Workers>,
}

impl ImagePlugin {
    pub fn new(workers: Arc<Workers>) -> Self {
        Self { workers }
    }
}

impl IoPlugin for ImagePlugin {
    fn name(&self) -> &str {
        "image"
    }

    fn extensions(&self) -> &[&'static str] {
        EXTENSIONS
    }

    fn read(&self, path: &Path, options: &IoOptions) -> IoResult<Arc<dyn IoRead>> {
        let reader = ImageSeqReader::open(path, options, Dispatcher::new(Arc::clone(&self.workers)))?;
        Ok(Arc::new(reader))
    }

    fn write(&self, path: &Path, _info: &IoInfo, options: &IoOptions) -> IoResult<Box<dyn IoWrite>> {
        Ok(Box::new(ImageSeqWriter::new(path, options)))
    }
}

#[derive(Debug, Clone)]
enum Source {
    Still(PathBuf),
    Sequence(FileSequence),
}

pub struct ImageSeqReader {
    path: PathBuf,
    source: Source,
    rate: i64,
    dispatcher: Dispatcher,
}

impl ImageSeqReader {
    pub fn open(path: &Path, options: &IoOptions, dispatcher: Dispatcher) -> IoResult<Self> {
        let rate = sequence_rate(options);
        let source = if split_sequence_path(path).is_some() {
            Source::Sequence(FileSequence::scan(path)?)
        } else {
            if !path.exists() {
                return Err(IoError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} not found", path.display()),
                )));
            }
            Source::Still(path.to_path_buf())
        };
        debug!("Opened image reader {} at {} fps: {:?}", path.display(), rate, source);
        Ok(Self { path: path.to_path_buf(), source, rate, dispatcher })
    }

    fn time_range(&self) -> TimeRange {
        match &self.source {
            Source::Still(_) => TimeRange::new(TimeValue::zero(self.rate), TimeValue::new(1, self.rate)),
            Source::Sequence(seq) => TimeRange::new(
                TimeValue::new(seq.first, self.rate),
                TimeValue::new(seq.frame_count(), self.rate),
            ),
        }
    }

    fn frame_file(&self, time: TimeValue) -> PathBuf {
        match &self.source {
            Source::Still(path) => path.clone(),
            Source::Sequence(seq) => seq.frame_path(time.rescaled_to(self.rate).value()),
        }
    }

    fn first_file(&self) -> PathBuf {
        match &self.source {
            Source::Still(path) => path.clone(),
            Source::Sequence(seq) => seq.frame_path(seq.first),
        }
    }
}

impl IoRead for ImageSeqReader {
    fn path(&self) -> &Path {
        &self.path
    }

    fn get_info(&self) -> IoFuture<IoResult<IoInfo>> {
        let first = self.first_file();
        let video_time = self.time_range();
        let rate = self.rate;
        let frames = video_time.frame_count();
        self.dispatcher.spawn(move || {
            let image_info = Image::read_info(&first)?;
            let mut info = IoInfo { video: vec![image_info], video_time, ..Default::default() };
            info.tags.insert("Frame Rate".into(), rate.to_string());
            info.tags.insert("Frames".into(), frames.to_string());
            Ok(info)
        })
    }

    fn read_video(&self, time: TimeValue, _options: &IoOptions) -> IoFuture<IoResult<VideoFrame>> {
        let file = self.frame_file(time);
        self.dispatcher.spawn(move || {
            trace!("Decode {} for {}", file.display(), time);
            let image = Image::load(&file)?;
            Ok(VideoFrame { time, image: Arc::new(image) })
        })
    }

    fn read_audio(&self, _range: TimeRange, _options: &IoOptions) -> IoFuture<IoResult<AudioChunk>> {
        IoFuture::ready(Err(IoError::NoData(format!("{}: no audio", self.path.display()))))
    }

    fn cancel_requests(&self) {
        self.dispatcher.cancel_all();
    }
}

/// Writes stills, or numbered frames when the path carries a frame number.
pub struct ImageSeqWriter {
    path: PathBuf,
    sequence: Option<FileSequence>,
    rate: i64,
}

impl ImageSeqWriter {
    pub fn new(path: &Path, options: &IoOptions) -> Self {
        let sequence = split_sequence_path(path).map(|split| FileSequence {
            prefix: split.prefix,
            ext: split.ext,
            padding: split.padding,
            first: split.number,
            last: split.number,
        });
        Self { path: path.to_path_buf(), sequence, rate: sequence_rate(options) }
    }
}

impl IoWrite for ImageSeqWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write_video(&mut self, time: TimeValue, image: &Image) -> IoResult<()> {
        let target = match &self.sequence {
            Some(seq) => seq.frame_path(time.rescaled_to(self.rate).value()),
            None => self.path.clone(),
        };
        trace!("Write {} for {}", target.display(), time);
        image.save(&target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::PixelBuffer;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_sequence_rate_option() {
        let mut options = IoOptions::new();
        assert_eq!(sequence_rate(&options), 24);
        options.insert(DEFAULT_SPEED_OPTION.into(), "30".into());
        assert_eq!(sequence_rate(&options), 30);
        options.insert(DEFAULT_SPEED_OPTION.into(), "-1".into());
        assert_eq!(sequence_rate(&options), 24);
    }

    #[test]
    fn test_write_then_read_sequence() {
        let dir = temp_dir("tlplay_test_image_seq");
        let workers = Arc::new(Workers::new(2));
        let plugin = ImagePlugin::new(Arc::clone(&workers));
        let options = IoOptions::new();

        let mut writer = plugin.write(&dir.join("frame.0001.png"), &IoInfo::default(), &options).unwrap();
        for n in 1..=3u8 {
            writer
                .write_video(TimeValue::new(n as i64, 24), &Image::solid(2, 2, [n * 10, 0, 0, 255]))
                .unwrap();
        }
        writer.finish().unwrap();

        let reader = plugin.read(&dir.join("frame.0002.png"), &options).unwrap();
        let info = reader.get_info().wait_result().unwrap();
        assert_eq!(info.video[0].width, 2);
        assert_eq!(info.video_time.start, TimeValue::new(1, 24));
        assert_eq!(info.video_time.frame_count(), 3);

        let frame = reader.read_video(TimeValue::new(3, 24), &options).wait_result().unwrap();
        match frame.image.buffer() {
            PixelBuffer::U8(v) => assert_eq!(v[0], 30),
            other => panic!("unexpected buffer {:?}", other),
        }

        // Missing frame is an error, not a hang
        assert!(reader.read_video(TimeValue::new(9, 24), &options).wait_result().is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_still_reads_same_image_for_any_time() {
        let dir = temp_dir("tlplay_test_image_still");
        let path = dir.join("still.png");
        Image::solid(1, 1, [1, 2, 3, 255]).save(&path).unwrap();

        let reader = ImageSeqReader::open(&path, &IoOptions::new(), Dispatcher::detached()).unwrap();
        assert_eq!(reader.time_range().frame_count(), 1);
        let a = reader.read_video(TimeValue::new(0, 24), &IoOptions::new()).wait_result().unwrap();
        let b = reader.read_video(TimeValue::new(500, 24), &IoOptions::new()).wait_result().unwrap();
        assert_eq!(a.image.buffer(), b.image.buffer());
        assert!(reader.read_audio(TimeRange::invalid(), &IoOptions::new()).wait_result().is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
