//! Timeline resolver: maps playback times to clips and reader requests
//!
//! - `get_video(time)` resolves every enabled video track at `time` and
//!   issues one read per visible clip (two inside a transition)
//! - `get_audio(seconds)` reads the one-second bucket starting `seconds`
//!   after the timeline start from every enabled audio track
//! - Reader handles are kept in a small LRU keyed by clip id, so seeking
//!   back and forth does not reopen files
//!
//! Every request carries a monotonically increasing id; `cancel_requests`
//! cancels specific outstanding requests after a seek.

use log::{debug, trace};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use uuid::Uuid;

use super::{ActiveItem, Timeline, TimelineOptions, TrackKind, TrackLayout, TransitionKind};
use crate::core::time::{TimeRange, TimeValue};
use crate::io::{
    AudioBuffer, AudioChunk, CancelHandle, FutureStatus, Image, IoError, IoFuture, IoOptions, IoRead,
    IoRegistry, IoResult, VideoFrame, merge_options,
};

/// IO option carrying the selected video layer
pub const LAYER_OPTION: &str = "Layer";

/// One video track's contribution to a frame
#[derive(Debug, Clone)]
pub struct VideoLayer {
    pub track: usize,
    pub image: Option<Arc<Image>>,
    /// Incoming clip while a transition is active
    pub image_b: Option<Arc<Image>>,
    pub transition: Option<TransitionKind>,
    pub transition_value: f32,
}

/// Decoded video for one timeline time. Immutable once produced.
#[derive(Debug, Clone)]
pub struct VideoData {
    pub time: TimeValue,
    pub layers: Vec<VideoLayer>,
}

impl VideoData {
    pub fn byte_count(&self) -> usize {
        self.layers
            .iter()
            .flat_map(|l| l.image.iter().chain(l.image_b.iter()))
            .map(|img| img.mem())
            .sum()
    }
}

/// Audio from one clip inside a bucket
#[derive(Debug, Clone)]
pub struct AudioPart {
    pub track: usize,
    /// Offset from the bucket start
    pub offset: TimeValue,
    pub audio: Arc<AudioBuffer>,
}

/// Decoded audio for one whole-second bucket
#[derive(Debug, Clone)]
pub struct AudioData {
    /// Seconds from the timeline start
    pub seconds: i64,
    pub parts: Vec<AudioPart>,
}

impl AudioData {
    pub fn byte_count(&self) -> usize {
        self.parts.iter().map(|p| p.audio.byte_count()).sum()
    }
}

#[derive(Debug)]
pub enum RequestStatus<T> {
    Pending,
    Ready(T),
    /// Decode error: no data for this time
    Failed(IoError),
    Canceled,
}

enum Slot<T> {
    Waiting(IoFuture<IoResult<T>>),
    Done(T),
    Gone,
}

enum SlotPoll {
    Ready,
    Pending,
    Failed(IoError),
    Canceled,
}

impl<T> Slot<T> {
    fn poll(&mut self) -> SlotPoll {
        let status = match self {
            Slot::Waiting(future) => future.try_get(),
            Slot::Done(_) => return SlotPoll::Ready,
            Slot::Gone => return SlotPoll::Canceled,
        };
        match status {
            FutureStatus::Pending => SlotPoll::Pending,
            FutureStatus::Canceled => {
                *self = Slot::Gone;
                SlotPoll::Canceled
            }
            FutureStatus::Ready(Ok(value)) => {
                *self = Slot::Done(value);
                SlotPoll::Ready
            }
            FutureStatus::Ready(Err(e)) => {
                *self = Slot::Gone;
                SlotPoll::Failed(e)
            }
        }
    }

    fn value(&self) -> Option<&T> {
        match self {
            Slot::Done(v) => Some(v),
            _ => None,
        }
    }

    fn cancel(&self) {
        if let Slot::Waiting(future) = self {
            future.cancel();
        }
    }

    fn cancel_handle(&self) -> Option<CancelHandle> {
        match self {
            Slot::Waiting(future) => Some(future.cancel_handle()),
            _ => None,
        }
    }
}

/// Poll every slot; first failure or cancellation wins.
fn poll_all<'a, T: 'a>(slots: impl Iterator<Item = &'a mut Slot<T>>) -> Option<SlotPoll> {
    let mut pending = false;
    for slot in slots {
        match slot.poll() {
            SlotPoll::Ready => {}
            SlotPoll::Pending => pending = true,
            other => return Some(other),
        }
    }
    pending.then_some(SlotPoll::Pending)
}

struct LayerSlots {
    track: usize,
    a: Slot<VideoFrame>,
    b: Option<Slot<VideoFrame>>,
    transition: Option<TransitionKind>,
    value: f32,
}

/// Outstanding video request
pub struct VideoRequest {
    pub id: u64,
    pub time: TimeValue,
    layers: Vec<LayerSlots>,
}

impl VideoRequest {
    /// Non-blocking poll.
    pub fn poll(&mut self) -> RequestStatus<VideoData> {
        match poll_all(self.layers.iter_mut().map(|l| &mut l.a)) {
            Some(SlotPoll::Pending) => return RequestStatus::Pending,
            Some(SlotPoll::Failed(e)) => {
                self.cancel();
                return RequestStatus::Failed(e);
            }
            Some(SlotPoll::Canceled) => {
                self.cancel();
                return RequestStatus::Canceled;
            }
            Some(SlotPoll::Ready) | None => {}
        }
        // An unreadable incoming clip leaves the outgoing image alone
        let mut pending = false;
        for layer in &mut self.layers {
            let Some(b) = layer.b.as_mut() else { continue };
            match b.poll() {
                SlotPoll::Pending => pending = true,
                SlotPoll::Failed(e) => debug!("Video request {}: transition target unavailable: {}", self.id, e),
                SlotPoll::Ready | SlotPoll::Canceled => {}
            }
        }
        if pending {
            return RequestStatus::Pending;
        }
        let layers = self
            .layers
            .iter()
            .map(|l| VideoLayer {
                track: l.track,
                image: l.a.value().map(|f| Arc::clone(&f.image)),
                image_b: l.b.as_ref().and_then(|b| b.value()).map(|f| Arc::clone(&f.image)),
                transition: l.transition,
                transition_value: l.value,
            })
            .collect();
        RequestStatus::Ready(VideoData { time: self.time, layers })
    }

    pub fn cancel(&self) {
        for layer in &self.layers {
            layer.a.cancel();
            if let Some(b) = &layer.b {
                b.cancel();
            }
        }
    }

    /// True when nothing was read (time outside all clips).
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Outstanding audio request
pub struct AudioRequest {
    pub id: u64,
    pub seconds: i64,
    parts: Vec<(usize, TimeValue, Slot<AudioChunk>)>,
}

impl AudioRequest {
    pub fn poll(&mut self) -> RequestStatus<AudioData> {
        match poll_all(self.parts.iter_mut().map(|(_, _, slot)| slot)) {
            Some(SlotPoll::Pending) => return RequestStatus::Pending,
            Some(SlotPoll::Failed(e)) => {
                self.cancel();
                return RequestStatus::Failed(e);
            }
            Some(SlotPoll::Canceled) => {
                self.cancel();
                return RequestStatus::Canceled;
            }
            Some(SlotPoll::Ready) | None => {}
        }
        let parts = self
            .parts
            .iter()
            .filter_map(|(track, offset, slot)| {
                slot.value().map(|chunk| AudioPart {
                    track: *track,
                    offset: *offset,
                    audio: Arc::clone(&chunk.audio),
                })
            })
            .collect();
        RequestStatus::Ready(AudioData { seconds: self.seconds, parts })
    }

    pub fn cancel(&self) {
        for (_, _, slot) in &self.parts {
            slot.cancel();
        }
    }
}

pub struct Resolver {
    timeline: Arc<Timeline>,
    registry: Arc<IoRegistry>,
    layouts: Vec<TrackLayout>,
    start: TimeValue,
    io_options: IoOptions,
    video_options: IoOptions,
    video_layer: u16,
    /// `None` marks media no plugin could open, so it is not retried
    readers: LruCache<Uuid, Option<Arc<dyn IoRead>>>,
    next_id: u64,
    pending: HashMap<u64, Vec<CancelHandle>>,
}

impl Resolver {
    pub fn new(timeline: Arc<Timeline>, registry: Arc<IoRegistry>, options: &TimelineOptions) -> Self {
        let layouts = timeline.tracks.iter().map(|t| t.layout(timeline.rate)).collect();
        let capacity = NonZeroUsize::new(options.reader_cache_count.max(1)).unwrap_or(NonZeroUsize::MIN);
        let start = timeline.start_time();
        let mut resolver = Self {
            timeline,
            registry,
            layouts,
            start,
            io_options: options.io_options.clone(),
            video_options: IoOptions::new(),
            video_layer: 0,
            readers: LruCache::new(capacity),
            next_id: 0,
            pending: HashMap::new(),
        };
        resolver.update_video_options();
        resolver
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    fn update_video_options(&mut self) {
        let mut layer = IoOptions::new();
        layer.insert(LAYER_OPTION.into(), self.video_layer.to_string());
        self.video_options = merge_options(&self.io_options, &layer);
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Cached reader for a clip, opening it on first use.
    fn reader(&mut self, track: usize, item: usize) -> Option<Arc<dyn IoRead>> {
        let clip = self.timeline.tracks.get(track)?.clip(item)?;
        let id = clip.id;
        if let Some(reader) = self.readers.get(&id) {
            return reader.clone();
        }
        let media = clip.media.clone();
        let reader = self.registry.read(&media, &self.io_options);
        debug!("Reader for {}: {}", media.display(), if reader.is_some() { "opened" } else { "unsupported" });
        if let Some((evicted, _)) = self.readers.push(id, reader.clone())
            && evicted != id
        {
            debug!("Reader LRU full, closed reader for clip {}", evicted);
        }
        reader
    }

    /// Request the video frame at timeline `time`.
    pub fn get_video(&mut self, time: TimeValue) -> VideoRequest {
        let id = self.next_id();
        let local = time - self.start;
        let timeline = Arc::clone(&self.timeline);
        let mut layers = Vec::new();

        for (ti, track) in timeline.tracks.iter().enumerate() {
            if !track.enabled || track.kind != TrackKind::Video {
                continue;
            }
            let Some(active) = self.layouts[ti].active_at(track, local) else { continue };
            match active {
                ActiveItem::Clip { clip, media_time } => {
                    let Some(reader) = self.reader(ti, clip) else { continue };
                    layers.push(LayerSlots {
                        track: ti,
                        a: Slot::Waiting(reader.read_video(media_time, &self.video_options)),
                        b: None,
                        transition: None,
                        value: 0.0,
                    });
                }
                ActiveItem::Transition { from, from_time, to, to_time, kind, value } => {
                    let a = self.reader(ti, from).map(|r| r.read_video(from_time, &self.video_options));
                    let b = self.reader(ti, to).map(|r| r.read_video(to_time, &self.video_options));
                    let (a, b) = match (a, b) {
                        (Some(a), b) => (a, b),
                        (None, Some(b)) => (b, None),
                        (None, None) => continue,
                    };
                    layers.push(LayerSlots {
                        track: ti,
                        a: Slot::Waiting(a),
                        b: b.map(Slot::Waiting),
                        transition: Some(kind),
                        value,
                    });
                }
            }
        }

        let handles: Vec<CancelHandle> = layers
            .iter()
            .flat_map(|l| std::iter::once(&l.a).chain(l.b.as_ref()))
            .filter_map(|s| s.cancel_handle())
            .collect();
        if !handles.is_empty() {
            self.pending.insert(id, handles);
        }
        trace!("Video request {} for {} ({} layers)", id, time, layers.len());
        VideoRequest { id, time, layers }
    }

    /// Request the audio bucket `seconds` after the timeline start.
    pub fn get_audio(&mut self, seconds: i64) -> AudioRequest {
        let id = self.next_id();
        let bucket = TimeRange::new(TimeValue::new(seconds, 1), TimeValue::new(1, 1));
        let timeline = Arc::clone(&self.timeline);
        let mut parts = Vec::new();

        for (ti, track) in timeline.tracks.iter().enumerate() {
            if !track.enabled || track.kind != TrackKind::Audio {
                continue;
            }
            for (item, overlap, media) in self.layouts[ti].overlapping(track, &bucket) {
                let Some(reader) = self.reader(ti, item) else { continue };
                let future = reader.read_audio(media, &self.io_options);
                parts.push((ti, overlap.start - bucket.start, Slot::Waiting(future)));
            }
        }

        let handles: Vec<CancelHandle> = parts.iter().filter_map(|(_, _, s)| s.cancel_handle()).collect();
        if !handles.is_empty() {
            self.pending.insert(id, handles);
        }
        trace!("Audio request {} for second {} ({} parts)", id, seconds, parts.len());
        AudioRequest { id, seconds, parts }
    }

    /// Cancel specific outstanding requests.
    pub fn cancel_requests(&mut self, ids: &[u64]) {
        for id in ids {
            if let Some(handles) = self.pending.remove(id) {
                handles.iter().for_each(CancelHandle::cancel);
            }
        }
    }

    /// Forget a completed request.
    pub fn request_done(&mut self, id: u64) {
        self.pending.remove(&id);
    }

    /// Cancel everything on every open reader.
    pub fn cancel_all(&mut self) {
        for (_, reader) in self.readers.iter() {
            if let Some(reader) = reader {
                reader.cancel_requests();
            }
        }
        for handles in self.pending.drain().map(|(_, h)| h) {
            handles.iter().for_each(CancelHandle::cancel);
        }
    }

    /// Replace IO options; readers are reopened with the new options.
    pub fn set_io_options(&mut self, options: IoOptions) {
        self.cancel_all();
        self.readers.clear();
        self.io_options = options;
        self.update_video_options();
    }

    pub fn set_video_layer(&mut self, layer: u16) {
        if layer != self.video_layer {
            self.video_layer = layer;
            self.update_video_options();
        }
    }

    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
