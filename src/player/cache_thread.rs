//! Background cache filling
//!
//! One thread owns the resolver and both caches. It wakes on every player
//! command and on a short tick, and each wake re-evaluates from scratch:
//!
//! 1. Snapshot the shared player state (brief lock, no IO under it). The
//!    player bumps the epoch under the same lock as the state change.
//! 2. Window = `[t - behind, t + ahead]` ∩ in/out (ahead/behind swap in
//!    reverse); audio buckets cover the same span shifted by the offset
//! 3. Cancel in-flight requests that left the window
//! 4. Poll in-flight requests: insert results still inside the window,
//!    re-reading the state first if the epoch moved since the snapshot;
//!    log failures and timeouts (treated as "no data here")
//! 5. Issue requests for uncached times, nearest-ahead first, up to the
//!    request caps. A seek bumps the epoch, which stops issuing early.
//! 6. Top up the audio ring, publish the current frame/audio and CacheInfo
//!
//! Video is keyed by exact frame time, audio by whole-second bucket. Audio
//! buckets are resampled to the device format when they arrive, so the
//! device callback only copies.
//!
//! Nothing in the loop panics: every failure becomes a log line and a gap.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info, trace, warn};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::audio::AudioSync;
use super::cache::{CacheCost, DirectionalCache};
use super::options::{PlayerCacheOptions, PlayerOptions};
use super::playback::{CacheDirection, Playback};
use crate::core::cache_man::{CacheManager, MediaKind};
use crate::core::observable::{Observable, ObservableList};
use crate::core::time::{TimeRange, TimeValue};
use crate::io::{AudioInfo, IoOptions, resample_to_device};
use crate::timeline::resolver::{AudioRequest, VideoRequest};
use crate::timeline::{AudioData, RequestStatus, Resolver, VideoData};

/// Player state as seen by the cache thread
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    pub playback: Playback,
    pub direction: CacheDirection,
    pub current_time: TimeValue,
    pub in_out_range: TimeRange,
    pub video_layer: u16,
    pub cache_options: PlayerCacheOptions,
    /// Seconds; positive plays audio later
    pub audio_offset: f64,
    /// Cache epoch this state was written under
    pub epoch: u64,
}

pub type SharedSnapshot = Arc<Mutex<CacheSnapshot>>;

#[derive(Debug, Clone)]
pub enum CacheCommand {
    /// Player state changed
    Wake,
    ClearCache,
    SetIoOptions(IoOptions),
    Shutdown,
}

/// Cache occupancy, published by the cache thread
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheInfo {
    pub video_bytes: usize,
    pub video_limit: usize,
    pub audio_bytes: usize,
    pub audio_limit: usize,
    pub video_frames: usize,
    pub audio_buckets: usize,
    pub video_ranges: Vec<TimeRange>,
    pub audio_ranges: Vec<TimeRange>,
    /// Cached share of the current video window, 0..=100
    pub video_percentage: f32,
    pub video_requests: usize,
    pub audio_requests: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub underruns: u64,
}

/// Observables the cache thread writes
#[derive(Clone)]
pub struct CacheOutputs {
    pub current_video: Observable<Option<Arc<VideoData>>>,
    pub current_audio: ObservableList<Arc<AudioData>>,
    pub cache_info: Observable<CacheInfo>,
}

impl CacheOutputs {
    pub fn new() -> Self {
        Self {
            current_video: Observable::new("current_video", None),
            current_audio: Observable::new("current_audio", Vec::new()),
            cache_info: Observable::new("cache_info", CacheInfo::default()),
        }
    }
}

impl Default for CacheOutputs {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheCost for VideoData {
    fn cost(&self) -> usize {
        self.byte_count()
    }
}

/// A cached audio bucket: decoded parts plus one second of device samples
#[derive(Debug)]
pub struct AudioEntry {
    pub data: Arc<AudioData>,
    pub pcm: Vec<f32>,
}

impl CacheCost for AudioEntry {
    fn cost(&self) -> usize {
        self.data.byte_count() + self.pcm.len() * std::mem::size_of::<f32>()
    }
}

/// Mix a bucket's parts into exactly one second at the device format.
pub fn render_bucket(data: &AudioData, device: &AudioInfo) -> Vec<f32> {
    let rate = device.sample_rate as usize;
    let channels = device.channel_count.max(1) as usize;
    let mut out = vec![0.0f32; rate * channels];
    for part in &data.parts {
        let offset = part.offset.rescaled_to(rate as i64).value().clamp(0, rate as i64) as usize;
        let pcm = resample_to_device(&part.audio, device);
        for (dst, src) in out[offset * channels..].iter_mut().zip(pcm) {
            *dst = (*dst + src).clamp(-1.0, 1.0);
        }
    }
    out
}

/// Contiguous runs of sorted frame keys.
fn runs(keys: impl Iterator<Item = TimeValue>, rate: i64) -> Vec<TimeRange> {
    let mut out: Vec<TimeRange> = Vec::new();
    let one = TimeValue::new(1, rate);
    for key in keys {
        if let Some(run) = out.last_mut()
            && run.end_exclusive() == key
        {
            run.duration = run.duration + one;
            continue;
        }
        out.push(TimeRange::new(key, one));
    }
    out
}

/// Window times in fill order: ahead of the playhead first, nearest first.
fn fill_order(window: &TimeRange, time: TimeValue, direction: CacheDirection) -> Vec<TimeValue> {
    let time = window.clamp(time.rescaled_to(window.rate()));
    let frames = window.frames();
    match direction {
        CacheDirection::Forward => {
            let (ahead, behind): (Vec<_>, Vec<_>) = frames.partition(|t| *t >= time);
            ahead.into_iter().chain(behind.into_iter().rev()).collect()
        }
        CacheDirection::Reverse => {
            let (behind, ahead): (Vec<_>, Vec<_>) = frames.partition(|t| *t > time);
            ahead.into_iter().rev().chain(behind).collect()
        }
    }
}

/// Same ordering for whole-second buckets.
fn bucket_order(first: i64, last: i64, current: i64, direction: CacheDirection) -> Vec<i64> {
    let current = current.clamp(first, last);
    match direction {
        CacheDirection::Forward => (current..=last).chain((first..current).rev()).collect(),
        CacheDirection::Reverse => (first..=current).rev().chain(current + 1..=last).collect(),
    }
}

trait Request {
    type Output;
    fn id(&self) -> u64;
    fn poll(&mut self) -> RequestStatus<Self::Output>;
    fn cancel(&self);
}

impl Request for VideoRequest {
    type Output = VideoData;
    fn id(&self) -> u64 {
        self.id
    }
    fn poll(&mut self) -> RequestStatus<VideoData> {
        VideoRequest::poll(self)
    }
    fn cancel(&self) {
        VideoRequest::cancel(self)
    }
}

impl Request for AudioRequest {
    type Output = AudioData;
    fn id(&self) -> u64 {
        self.id
    }
    fn poll(&mut self) -> RequestStatus<AudioData> {
        AudioRequest::poll(self)
    }
    fn cancel(&self) {
        AudioRequest::cancel(self)
    }
}

/// Windows derived from one snapshot
struct View {
    snap: CacheSnapshot,
    anchor: TimeValue,
    offset: TimeValue,
    video: Option<TimeRange>,
    audio: Option<(i64, i64)>,
}

struct InFlight<R> {
    request: R,
    issued: Instant,
}

enum Outcome<T> {
    Ready(T),
    Failed(String),
    TimedOut,
    Canceled,
}

/// Poll every in-flight request; finished ones are removed and returned.
fn poll_flights<K: Ord + Copy, R: Request>(
    flights: &mut BTreeMap<K, InFlight<R>>,
    resolver: &mut Resolver,
    timeout: Option<Duration>,
) -> Vec<(K, Outcome<R::Output>)> {
    let mut done = Vec::new();
    let keys: Vec<K> = flights.keys().copied().collect();
    for key in keys {
        let Some(flight) = flights.get_mut(&key) else { continue };
        let outcome = match flight.request.poll() {
            RequestStatus::Pending => {
                if !timeout.is_some_and(|t| flight.issued.elapsed() > t) {
                    continue;
                }
                flight.request.cancel();
                resolver.cancel_requests(&[flight.request.id()]);
                Outcome::TimedOut
            }
            RequestStatus::Ready(v) => Outcome::Ready(v),
            RequestStatus::Failed(e) => Outcome::Failed(e.to_string()),
            RequestStatus::Canceled => Outcome::Canceled,
        };
        if let Some(flight) = flights.remove(&key) {
            resolver.request_done(flight.request.id());
        }
        done.push((key, outcome));
    }
    done
}

/// Cancel in-flight requests whose key fails `keep`.
fn cancel_outside<K: Ord + Copy + std::fmt::Display, R: Request>(
    flights: &mut BTreeMap<K, InFlight<R>>,
    resolver: &mut Resolver,
    keep: impl Fn(&K) -> bool,
) -> usize {
    let stale: Vec<K> = flights.keys().copied().filter(|k| !keep(k)).collect();
    let ids: Vec<u64> = stale
        .iter()
        .filter_map(|k| flights.remove(k))
        .map(|f| {
            f.request.cancel();
            f.request.id()
        })
        .collect();
    if !ids.is_empty() {
        resolver.cancel_requests(&ids);
        debug!("Canceled {} stale requests", ids.len());
    }
    ids.len()
}

pub struct CacheThread {
    resolver: Resolver,
    shared: SharedSnapshot,
    commands: Receiver<CacheCommand>,
    options: PlayerOptions,
    manager: Arc<CacheManager>,
    audio_sync: Arc<AudioSync>,
    outputs: CacheOutputs,

    video: DirectionalCache<TimeValue, Arc<VideoData>>,
    audio: DirectionalCache<i64, Arc<AudioEntry>>,
    video_requests: BTreeMap<TimeValue, InFlight<VideoRequest>>,
    audio_requests: BTreeMap<i64, InFlight<AudioRequest>>,
    failed_video: HashSet<TimeValue>,
    failed_audio: HashSet<i64>,

    rate: i64,
    start: TimeValue,
    /// Last audio bucket with data, -1 without audio
    last_bucket: i64,
    applied_options: PlayerCacheOptions,
    video_layer: u16,
    video_window: Option<TimeRange>,
    published_audio: Vec<i64>,
    /// Playhead time whose lookup was last counted as a hit or miss
    counted_time: Option<TimeValue>,
    reported_underruns: u64,
}

impl CacheThread {
    pub fn new(
        resolver: Resolver,
        shared: SharedSnapshot,
        commands: Receiver<CacheCommand>,
        options: PlayerOptions,
        manager: Arc<CacheManager>,
        audio_sync: Arc<AudioSync>,
        outputs: CacheOutputs,
    ) -> Self {
        let timeline = Arc::clone(resolver.timeline());
        let end = timeline.duration();
        let last_bucket = if timeline.has_audio() && end.value() > 0 {
            (end.value() - 1).div_euclid(end.rate())
        } else {
            -1
        };
        let applied_options = shared.lock().unwrap_or_else(|e| e.into_inner()).cache_options.clone();
        Self {
            video: DirectionalCache::new("video", manager.pool(MediaKind::Video)),
            audio: DirectionalCache::new("audio", manager.pool(MediaKind::Audio)),
            resolver,
            shared,
            commands,
            options,
            manager,
            audio_sync,
            outputs,
            video_requests: BTreeMap::new(),
            audio_requests: BTreeMap::new(),
            failed_video: HashSet::new(),
            failed_audio: HashSet::new(),
            rate: timeline.rate,
            start: timeline.start_time(),
            last_bucket,
            applied_options,
            video_layer: 0,
            video_window: None,
            published_audio: Vec::new(),
            counted_time: None,
            reported_underruns: 0,
        }
    }

    pub fn spawn(mut self) -> JoinHandle<()> {
        thread::Builder::new()
            .name("tlplay-cache".into())
            .spawn(move || {
                info!("Cache thread started");
                self.run();
                self.shutdown();
                info!("Cache thread stopped");
            })
            .expect("Failed to spawn cache thread")
    }

    fn run(&mut self) {
        let tick = Duration::from_millis(self.options.cache_tick_ms.max(1));
        loop {
            match self.commands.recv_timeout(tick) {
                Ok(command) => {
                    if !self.handle(command) {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
            if !self.step() {
                return;
            }
        }
    }

    /// Handle queued commands, then run one fill pass. False on shutdown.
    pub fn step(&mut self) -> bool {
        while let Ok(command) = self.commands.try_recv() {
            if !self.handle(command) {
                return false;
            }
        }
        self.iterate();
        true
    }

    fn handle(&mut self, command: CacheCommand) -> bool {
        match command {
            CacheCommand::Wake => {}
            CacheCommand::ClearCache => self.clear(),
            CacheCommand::SetIoOptions(options) => {
                self.clear();
                self.resolver.set_io_options(options);
            }
            CacheCommand::Shutdown => return false,
        }
        true
    }

    fn clear(&mut self) {
        cancel_outside(&mut self.video_requests, &mut self.resolver, |_| false);
        cancel_outside(&mut self.audio_requests, &mut self.resolver, |_| false);
        self.resolver.cancel_all();
        self.video.clear();
        self.audio.clear();
        self.failed_video.clear();
        self.failed_audio.clear();
        self.published_audio.clear();
        debug!("Cache cleared");
    }

    fn shutdown(&mut self) {
        self.clear();
        self.outputs.current_video.set_always(None);
    }

    fn timeout(&self) -> Option<Duration> {
        (self.options.request_timeout_ms > 0).then(|| Duration::from_millis(self.options.request_timeout_ms))
    }

    /// `[t - behind, t + ahead]` ∩ in/out, at the timeline rate.
    pub fn video_window(snap: &CacheSnapshot, rate: i64) -> Option<TimeRange> {
        if !snap.current_time.is_valid() {
            return None;
        }
        let t = snap.current_time.rescaled_to(rate);
        let ahead = snap.cache_options.read_ahead_time(rate);
        let behind = snap.cache_options.read_behind_time(rate);
        let (before, after) = match snap.direction {
            CacheDirection::Forward => (behind, ahead),
            CacheDirection::Reverse => (ahead, behind),
        };
        TimeRange::from_start_end_inclusive(t - before, t + after).intersect(&snap.in_out_range)
    }

    fn offset(snap: &CacheSnapshot) -> TimeValue {
        TimeValue::from_seconds(snap.audio_offset, 1000)
    }

    /// Audio bucket playing at timeline time `t`.
    fn bucket_at(&self, t: TimeValue, offset: TimeValue) -> i64 {
        (t - self.start - offset).whole_seconds()
    }

    fn audio_window(&self, window: &TimeRange, offset: TimeValue) -> Option<(i64, i64)> {
        if self.last_bucket < 0 {
            return None;
        }
        let first = self.bucket_at(window.start, offset).max(0);
        let last = self.bucket_at(window.end_inclusive(), offset).min(self.last_bucket);
        (first <= last).then_some((first, last))
    }

    fn snapshot(&self) -> CacheSnapshot {
        self.shared.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn view(&self, snap: CacheSnapshot) -> View {
        let anchor = snap.current_time.rescaled_to(self.rate);
        let offset = Self::offset(&snap);
        let video = Self::video_window(&snap, self.rate);
        let audio = video.and_then(|w| self.audio_window(&w, offset));
        View { snap, anchor, offset, video, audio }
    }

    /// Re-read the player state if the epoch moved since `view` was taken.
    fn refresh(&self, view: &mut View) {
        if self.manager.current_epoch() != view.snap.epoch {
            *view = self.view(self.snapshot());
            trace!("State changed during the fill pass, now at {}", view.anchor);
        }
    }

    /// One fill pass.
    pub fn iterate(&mut self) {
        let snap = self.snapshot();

        if snap.cache_options != self.applied_options {
            let (video, audio) = snap.cache_options.budgets();
            let anchor = snap.current_time.rescaled_to(self.rate);
            let bucket = self.bucket_at(anchor, Self::offset(&snap));
            self.video.set_limit(video, &anchor, snap.direction);
            self.audio.set_limit(audio, &bucket, snap.direction);
            info!("Cache budgets: video {} MB, audio {} MB", video / 1024 / 1024, audio / 1024 / 1024);
            self.applied_options = snap.cache_options.clone();
        }
        if snap.video_layer != self.video_layer {
            self.video_layer = snap.video_layer;
            self.resolver.set_video_layer(snap.video_layer);
            cancel_outside(&mut self.video_requests, &mut self.resolver, |_| false);
            self.video.clear();
            self.failed_video.clear();
        }

        let mut view = self.view(snap);
        let (window, audio_window) = (view.video, view.audio);

        // Drop work for times that left the window
        let in_video = |t: &TimeValue| window.is_some_and(|w| w.contains(*t));
        let in_audio = |b: &i64| audio_window.is_some_and(|(first, last)| (first..=last).contains(b));
        cancel_outside(&mut self.video_requests, &mut self.resolver, in_video);
        cancel_outside(&mut self.audio_requests, &mut self.resolver, in_audio);
        self.failed_video.retain(in_video);
        self.failed_audio.retain(in_audio);

        self.poll(&mut view);
        self.video_window = view.video;

        let epoch = view.snap.epoch;
        if let Some(window) = view.video {
            self.issue_video(&window, view.anchor, view.snap.direction, epoch);
        }
        if let Some((first, last)) = view.audio {
            let current = self.bucket_at(view.anchor, view.offset);
            self.issue_audio(first, last, current, view.snap.direction, epoch);
        }

        self.fill_ring(view.offset);
        self.publish(view.anchor, view.offset);
    }

    fn poll(&mut self, view: &mut View) {
        let timeout = self.timeout();
        for (time, outcome) in poll_flights(&mut self.video_requests, &mut self.resolver, timeout) {
            match outcome {
                Outcome::Ready(data) => {
                    self.refresh(view);
                    if view.snap.video_layer == self.video_layer && view.video.is_some_and(|w| w.contains(time)) {
                        self.video.insert(time, Arc::new(data), &view.anchor, view.snap.direction);
                    } else {
                        debug!("Stale video result for {} dropped", time);
                    }
                }
                Outcome::Failed(e) => {
                    warn!("Video read failed at {}: {}", time, e);
                    self.failed_video.insert(time);
                }
                Outcome::TimedOut => {
                    warn!("Video read timed out at {}", time);
                    self.failed_video.insert(time);
                }
                Outcome::Canceled => trace!("Video request for {} canceled", time),
            }
        }

        let device = self.audio_sync.device();
        for (bucket, outcome) in poll_flights(&mut self.audio_requests, &mut self.resolver, timeout) {
            match outcome {
                Outcome::Ready(data) => {
                    self.refresh(view);
                    if view.audio.is_some_and(|(f, l)| (f..=l).contains(&bucket)) {
                        let pcm = render_bucket(&data, &device);
                        let entry = AudioEntry { data: Arc::new(data), pcm };
                        let current = self.bucket_at(view.anchor, view.offset);
                        self.audio.insert(bucket, Arc::new(entry), &current, view.snap.direction);
                    } else {
                        debug!("Stale audio result for second {} dropped", bucket);
                    }
                }
                Outcome::Failed(e) => {
                    warn!("Audio read failed at second {}: {}", bucket, e);
                    self.failed_audio.insert(bucket);
                }
                Outcome::TimedOut => {
                    warn!("Audio read timed out at second {}", bucket);
                    self.failed_audio.insert(bucket);
                }
                Outcome::Canceled => trace!("Audio request for second {} canceled", bucket),
            }
        }
    }

    fn issue_video(&mut self, window: &TimeRange, anchor: TimeValue, direction: CacheDirection, epoch: u64) {
        let cap = self.options.video_request_count.max(1);
        for time in fill_order(window, anchor, direction) {
            if self.video_requests.len() >= cap || self.manager.current_epoch() != epoch {
                break;
            }
            if self.video.contains(&time) || self.video_requests.contains_key(&time) || self.failed_video.contains(&time) {
                continue;
            }
            // Farther times would only be rejected too
            if !self.video.would_keep(&time, &anchor, direction) {
                break;
            }
            let request = self.resolver.get_video(time);
            self.video_requests.insert(time, InFlight { request, issued: Instant::now() });
        }
    }

    fn issue_audio(&mut self, first: i64, last: i64, current: i64, direction: CacheDirection, epoch: u64) {
        let cap = self.options.audio_request_count.max(1);
        for bucket in bucket_order(first, last, current, direction) {
            if self.audio_requests.len() >= cap || self.manager.current_epoch() != epoch {
                break;
            }
            if self.audio.contains(&bucket)
                || self.audio_requests.contains_key(&bucket)
                || self.failed_audio.contains(&bucket)
            {
                continue;
            }
            if !self.audio.would_keep(&bucket, &current, direction) {
                break;
            }
            let request = self.resolver.get_audio(bucket);
            self.audio_requests.insert(bucket, InFlight { request, issued: Instant::now() });
        }
    }

    /// Copy cached device samples into the ring until a bucket is missing.
    fn fill_ring(&mut self, offset: TimeValue) {
        let underruns = self.audio_sync.underruns();
        if underruns != self.reported_underruns {
            debug!("Audio underruns: {} (+{})", underruns, underruns - self.reported_underruns);
            self.reported_underruns = underruns;
        }
        let Some(want) = self.audio_sync.want() else { return };
        let device = self.audio_sync.device();
        let rate = device.sample_rate as i64;
        let channels = device.channel_count.max(1) as usize;
        if rate <= 0 {
            return;
        }
        let offset_frames = offset.rescaled_to(rate).value();
        let end = want.start_frame + want.frames as i64;
        let mut samples = Vec::with_capacity(want.frames * channels);
        let mut frame = want.start_frame;
        while frame < end {
            let source = frame - offset_frames;
            let bucket = source.div_euclid(rate);
            let index = source.rem_euclid(rate) as usize;
            let count = (rate as usize - index).min((end - frame) as usize);
            if bucket < 0 || bucket > self.last_bucket {
                samples.resize(samples.len() + count * channels, 0.0);
            } else if let Some(entry) = self.audio.peek(&bucket) {
                samples.extend_from_slice(&entry.pcm[index * channels..(index + count) * channels]);
            } else {
                break;
            }
            frame += count as i64;
        }
        if !samples.is_empty() {
            let pushed = self.audio_sync.push(&want, &samples);
            trace!("Audio ring +{} frames at {}", pushed, want.start_frame);
        }
    }

    fn publish(&mut self, anchor: TimeValue, offset: TimeValue) {
        let cached = self.video.peek(&anchor).cloned();
        if self.counted_time != Some(anchor) {
            self.counted_time = Some(anchor);
            match cached {
                Some(_) => self.video.stats().record_hit(),
                None => self.video.stats().record_miss(),
            }
        }
        // Subscribers woken by a new frame see matching cache info
        self.outputs.cache_info.set_if_changed(self.cache_info());

        // Hold the last frame when the current one is not cached yet
        if let Some(data) = cached {
            let changed = match self.outputs.current_video.get() {
                Some(current) => !Arc::ptr_eq(&current, &data),
                None => true,
            };
            if changed {
                self.outputs.current_video.set_always(Some(data));
            }
        }

        let current = self.bucket_at(anchor, offset);
        let buckets: Vec<i64> = (current - 1..=current + 1).filter(|b| self.audio.contains(b)).collect();
        if buckets != self.published_audio {
            let list = buckets.iter().filter_map(|b| self.audio.peek(b)).map(|e| Arc::clone(&e.data)).collect();
            self.outputs.current_audio.set_always(list);
            self.published_audio = buckets;
        }
    }

    pub fn cache_info(&self) -> CacheInfo {
        let video_ranges = runs(self.video.keys().copied(), self.rate);
        let audio_ranges = runs(self.audio.keys().map(|b| TimeValue::new(*b, 1)), 1)
            .into_iter()
            .map(|r| TimeRange::new(self.start + r.start, r.duration))
            .collect();
        let video_percentage = match self.video_window {
            Some(w) if w.frame_count() > 0 => {
                let cached = w.frames().filter(|t| self.video.contains(t)).count();
                (cached as f64 * 100.0 / w.frame_count() as f64) as f32
            }
            _ => 0.0,
        };
        let stats = self.video.stats();
        CacheInfo {
            video_bytes: self.video.bytes(),
            video_limit: self.video.limit(),
            audio_bytes: self.audio.bytes(),
            audio_limit: self.audio.limit(),
            video_frames: self.video.len(),
            audio_buckets: self.audio.len(),
            video_ranges,
            audio_ranges,
            video_percentage,
            video_requests: self.video_requests.len(),
            audio_requests: self.audio_requests.len(),
            hits: stats.hits(),
            misses: stats.misses(),
            evictions: stats.evictions() + self.audio.stats().evictions(),
            underruns: self.audio_sync.underruns(),
        }
    }

    pub fn video_requests_in_flight(&self) -> Vec<TimeValue> {
        self.video_requests.keys().copied().collect()
    }

    pub fn cached_video(&self) -> Vec<TimeValue> {
        self.video.keys().copied().collect()
    }

    pub fn cached_audio(&self) -> Vec<i64> {
        self.audio.keys().copied().collect()
    }
}
