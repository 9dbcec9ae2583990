//! Player facade: playback state, commands and observables
//!
//! The player owns the playback state and is the only writer of it. Every
//! setter updates the matching observable, writes the shared snapshot the
//! cache thread reads, and wakes the cache thread with a command.
//!
//! # Threads
//!
//! - caller thread: setters and `tick()` (advances the playhead)
//! - cache thread: fills the caches, publishes `current_video`,
//!   `current_audio` and `cache_info` (see `cache_thread`)
//! - audio device thread: drains `AudioSync` (see `device`)
//!
//! # Invariant
//!
//! `current_time` is always inside `in_out_range` once a timeline is set.
//! Seeks are clamped, in/out changes clamp the playhead, and `tick()` applies
//! the loop rules before publishing.

pub mod audio;
pub mod cache;
pub mod cache_thread;
pub mod device;
pub mod options;
pub mod playback;

use crossbeam_channel::{Sender, unbounded};
use log::{debug, info, trace};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

pub use self::audio::AudioSync;
pub use self::cache_thread::{CacheCommand, CacheInfo, CacheSnapshot};
pub use self::options::{PlayerCacheOptions, PlayerOptions};
pub use self::playback::{CacheDirection, Loop, Playback, SPEED_PRESETS, TimeAction};

use self::cache_thread::{CacheOutputs, CacheThread, SharedSnapshot};
use self::playback::{PlayClock, action_time, resolve_boundary};
use crate::core::cache_man::CacheManager;
use crate::core::observable::{Observable, ObservableList};
use crate::core::time::{TimeRange, TimeValue};
use crate::io::{IoOptions, IoRegistry};
use crate::timeline::{AudioData, Resolver, Timeline, TimelineError, TimelineOptions, VideoData};

pub struct Player {
    timeline: Arc<Timeline>,
    options: PlayerOptions,
    time_range: TimeRange,
    rate: i64,

    shared: SharedSnapshot,
    commands: Sender<CacheCommand>,
    manager: Arc<CacheManager>,
    audio_sync: Arc<AudioSync>,
    outputs: CacheOutputs,
    thread: Option<JoinHandle<()>>,
    clock: Option<PlayClock>,
    direction: CacheDirection,

    playback: Observable<Playback>,
    loop_mode: Observable<Loop>,
    speed: Observable<f64>,
    current_time: Observable<TimeValue>,
    in_out_range: Observable<TimeRange>,
    video_layer: Observable<u16>,
    volume: Observable<f32>,
    mute: Observable<bool>,
    audio_offset: Observable<f64>,
}

impl Player {
    /// Start a player (and its cache thread) for a timeline.
    pub fn new(
        timeline: Arc<Timeline>,
        registry: Arc<IoRegistry>,
        options: PlayerOptions,
        timeline_options: &TimelineOptions,
    ) -> Result<Self, TimelineError> {
        timeline.validate()?;
        let time_range = timeline.time_range();
        let rate = timeline.rate;
        let start = time_range.start;

        let snapshot = CacheSnapshot {
            playback: Playback::Stop,
            direction: CacheDirection::Forward,
            current_time: start,
            in_out_range: time_range,
            video_layer: 0,
            cache_options: options.cache.clone(),
            audio_offset: 0.0,
            epoch: 0,
        };
        let shared: SharedSnapshot = Arc::new(Mutex::new(snapshot));
        let (video_bytes, audio_bytes) = options.cache.budgets();
        let manager = Arc::new(CacheManager::new(video_bytes, audio_bytes));
        let audio_sync = Arc::new(AudioSync::new(options.audio_device, options.audio_buffer_seconds));
        let outputs = CacheOutputs::new();
        let (commands, receiver) = unbounded();

        let resolver = Resolver::new(Arc::clone(&timeline), registry, timeline_options);
        let thread = CacheThread::new(
            resolver,
            Arc::clone(&shared),
            receiver,
            options.clone(),
            Arc::clone(&manager),
            Arc::clone(&audio_sync),
            outputs.clone(),
        )
        .spawn();

        info!("Player: '{}' {} at {} fps", timeline.name, time_range, rate);
        Ok(Self {
            timeline,
            options,
            time_range,
            rate,
            shared,
            commands,
            manager,
            audio_sync,
            outputs,
            thread: Some(thread),
            clock: None,
            direction: CacheDirection::Forward,
            playback: Observable::new("playback", Playback::Stop),
            loop_mode: Observable::new("loop", Loop::Loop),
            speed: Observable::new("speed", 1.0),
            current_time: Observable::new("current_time", start),
            in_out_range: Observable::new("in_out_range", time_range),
            video_layer: Observable::new("video_layer", 0),
            volume: Observable::new("volume", 1.0),
            mute: Observable::new("mute", false),
            audio_offset: Observable::new("audio_offset", 0.0),
        })
    }

    // === Observables ===

    pub fn playback(&self) -> &Observable<Playback> {
        &self.playback
    }

    pub fn loop_mode(&self) -> &Observable<Loop> {
        &self.loop_mode
    }

    pub fn speed(&self) -> &Observable<f64> {
        &self.speed
    }

    pub fn current_time(&self) -> &Observable<TimeValue> {
        &self.current_time
    }

    pub fn in_out_range(&self) -> &Observable<TimeRange> {
        &self.in_out_range
    }

    pub fn video_layer(&self) -> &Observable<u16> {
        &self.video_layer
    }

    pub fn volume(&self) -> &Observable<f32> {
        &self.volume
    }

    pub fn mute(&self) -> &Observable<bool> {
        &self.mute
    }

    pub fn audio_offset(&self) -> &Observable<f64> {
        &self.audio_offset
    }

    pub fn current_video(&self) -> &Observable<Option<Arc<VideoData>>> {
        &self.outputs.current_video
    }

    pub fn current_audio(&self) -> &ObservableList<Arc<AudioData>> {
        &self.outputs.current_audio
    }

    pub fn cache_info(&self) -> &Observable<CacheInfo> {
        &self.outputs.cache_info
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    pub fn options(&self) -> &PlayerOptions {
        &self.options
    }

    /// Feed this to an audio output.
    pub fn audio_sync(&self) -> Arc<AudioSync> {
        Arc::clone(&self.audio_sync)
    }

    // === Internals ===

    fn update(&self, f: impl FnOnce(&mut CacheSnapshot)) {
        f(&mut self.shared.lock().unwrap_or_else(|e| e.into_inner()));
        self.wake();
    }

    /// `update` that also bumps the epoch, under the same lock as the state.
    fn update_stale(&self, f: impl FnOnce(&mut CacheSnapshot)) {
        {
            let mut snap = self.shared.lock().unwrap_or_else(|e| e.into_inner());
            snap.epoch = self.manager.increment_epoch();
            f(&mut snap);
        }
        self.wake();
    }

    fn wake(&self) {
        let _ = self.commands.send(CacheCommand::Wake);
    }

    /// Device frame for a timeline time.
    fn audio_frame(&self, time: TimeValue) -> i64 {
        self.audio_sync.frame_at(time - self.time_range.start)
    }

    fn resync_audio(&self, time: TimeValue) {
        self.audio_sync.reset(self.audio_frame(time));
    }

    fn update_audio_playing(&self) {
        let playing = self.playback.get() == Playback::Forward && self.speed.get() == 1.0;
        self.audio_sync.set_playing(playing);
    }

    /// Publish a new playhead. Returns true if it moved. A `stale` move is
    /// a jump: work queued for the old position is dropped.
    fn set_time(&self, time: TimeValue, stale: bool) -> bool {
        if !self.current_time.set_if_changed(time) {
            return false;
        }
        if stale {
            self.update_stale(|s| s.current_time = time);
        } else {
            self.update(|s| s.current_time = time);
        }
        true
    }

    // === Commands ===

    pub fn set_playback(&mut self, playback: Playback) {
        if playback == self.playback.get() {
            return;
        }
        let range = self.in_out_range.get();
        let mut time = self.current_time.get();
        // Restart a finished Once playthrough from the other end
        if self.loop_mode.get() == Loop::Once {
            if playback == Playback::Forward && time >= range.end_inclusive() {
                time = range.start;
            } else if playback == Playback::Reverse && time <= range.start {
                time = range.end_inclusive();
            }
            self.set_time(time, true);
        }

        self.playback.set_if_changed(playback);
        self.direction = CacheDirection::for_playback(playback, self.direction);
        self.clock = (playback != Playback::Stop).then(|| PlayClock::new(time, Instant::now()));
        let direction = self.direction;
        self.update_stale(|s| {
            s.playback = playback;
            s.direction = direction;
        });
        self.resync_audio(time);
        self.update_audio_playing();
        debug!("Playback: {:?} at {}", playback, time);
    }

    pub fn set_loop(&mut self, loop_mode: Loop) {
        self.loop_mode.set_if_changed(loop_mode);
    }

    /// Move the playhead; clamped into the in/out range.
    pub fn seek(&mut self, time: TimeValue) {
        let time = self.in_out_range.get().clamp(time.rescaled_to(self.rate));
        if let Some(clock) = &mut self.clock {
            *clock = PlayClock::new(time, Instant::now());
        }
        if self.set_time(time, true) {
            self.resync_audio(time);
            trace!("Seek {}", time);
        }
    }

    /// Set the playback range (clipped to the timeline); clamps the playhead.
    pub fn set_in_out_range(&mut self, range: TimeRange) {
        let range = range.intersect(&self.time_range).unwrap_or(self.time_range);
        if !self.in_out_range.set_if_changed(range) {
            return;
        }
        self.update_stale(|s| s.in_out_range = range);
        let time = self.current_time.get();
        if !range.contains(time) {
            self.seek(time);
        }
        debug!("In/out range: {}", range);
    }

    pub fn set_in_point(&mut self) {
        let range = self.in_out_range.get();
        let time = self.current_time.get();
        self.set_in_out_range(TimeRange::from_start_end_inclusive(time, range.end_inclusive()));
    }

    pub fn set_out_point(&mut self) {
        let range = self.in_out_range.get();
        let time = self.current_time.get();
        self.set_in_out_range(TimeRange::from_start_end_inclusive(range.start, time));
    }

    pub fn reset_in_out_points(&mut self) {
        self.set_in_out_range(self.time_range);
    }

    pub fn set_speed(&mut self, speed: f64) {
        let speed = if speed.is_finite() && speed > 0.0 { speed } else { 1.0 };
        if !self.speed.set_if_changed(speed) {
            return;
        }
        let now = Instant::now();
        if let Some(clock) = &mut self.clock {
            *clock = PlayClock::new(self.current_time.get(), now);
        }
        self.resync_audio(self.current_time.get());
        self.update_audio_playing();
    }

    pub fn set_video_layer(&mut self, layer: u16) {
        if self.video_layer.set_if_changed(layer) {
            self.update_stale(|s| s.video_layer = layer);
        }
    }

    pub fn set_cache_options(&mut self, options: PlayerCacheOptions) {
        self.options.cache = options.clone();
        self.update(|s| s.cache_options = options);
    }

    pub fn set_volume(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        self.volume.set_if_changed(volume);
        self.audio_sync.set_volume(volume);
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.mute.set_if_changed(mute);
        self.audio_sync.set_mute(mute);
    }

    /// Seconds; positive delays audio against video.
    pub fn set_audio_offset(&mut self, offset: f64) {
        if !self.audio_offset.set_if_changed(offset) {
            return;
        }
        self.update(|s| s.audio_offset = offset);
        self.resync_audio(self.current_time.get());
    }

    /// Options forwarded to IO plugins; the caches are refilled.
    pub fn set_io_options(&mut self, options: IoOptions) {
        let _ = self.commands.send(CacheCommand::SetIoOptions(options));
    }

    pub fn clear_cache(&mut self) {
        let _ = self.commands.send(CacheCommand::ClearCache);
    }

    pub fn time_action(&mut self, action: TimeAction) {
        if matches!(action, TimeAction::FramePrev | TimeAction::FrameNext) {
            self.set_playback(Playback::Stop);
        }
        let time = action_time(&self.in_out_range.get(), self.loop_mode.get(), self.current_time.get(), action);
        self.seek(time);
    }

    pub fn frame_next(&mut self) {
        self.time_action(TimeAction::FrameNext);
    }

    pub fn frame_prev(&mut self) {
        self.time_action(TimeAction::FramePrev);
    }

    /// Next speed preset above the current speed.
    pub fn faster(&mut self) {
        let speed = self.speed.get();
        if let Some(next) = SPEED_PRESETS.iter().find(|s| **s > speed) {
            self.set_speed(*next);
        }
    }

    pub fn slower(&mut self) {
        let speed = self.speed.get();
        if let Some(prev) = SPEED_PRESETS.iter().rev().find(|s| **s < speed) {
            self.set_speed(*prev);
        }
    }

    // === Playback ===

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Advance the playhead to wall-clock `now`.
    pub fn tick_at(&mut self, now: Instant) {
        let playback = self.playback.get();
        let Some(clock) = self.clock else { return };
        if playback == Playback::Stop {
            return;
        }
        let target = clock.target(now, self.rate, self.speed.get(), playback);
        let step = resolve_boundary(&self.in_out_range.get(), self.loop_mode.get(), playback, target);
        self.set_time(step.time, step.reanchor);

        if step.playback != playback {
            self.playback.set_if_changed(step.playback);
            self.direction = CacheDirection::for_playback(step.playback, self.direction);
            let direction = self.direction;
            self.update(|s| {
                s.playback = step.playback;
                s.direction = direction;
            });
            self.update_audio_playing();
            debug!("Playback: {:?} at boundary {}", step.playback, step.time);
        }
        if step.playback == Playback::Stop {
            self.clock = None;
        } else if step.reanchor {
            self.clock = Some(PlayClock::new(step.time, now));
            self.resync_audio(step.time);
        } else if self.audio_sync.is_playing() {
            self.check_audio_drift(step.time);
        }
    }

    /// Resync the ring when the device clock wanders off the video clock.
    fn check_audio_drift(&self, time: TimeValue) {
        let expected = self.audio_frame(time);
        let actual = self.audio_sync.position_frame();
        let limit = self.options.audio_drift_ms as i64 * self.audio_sync.device().sample_rate as i64 / 1000;
        if (expected - actual).abs() > limit {
            debug!("Audio drifted {} frames, resync", expected - actual);
            self.audio_sync.reset(expected);
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        let _ = self.commands.send(CacheCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("Player shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::testing::{TestMedia, TestPlugin, frame_of};
    use crate::timeline::{Clip, Track, TrackKind};
    use std::time::Duration;

    fn tv(v: i64) -> TimeValue {
        TimeValue::new(v, 24)
    }

    fn player() -> Player {
        let mut registry = IoRegistry::new();
        registry.register(Arc::new(TestPlugin::new("test", TestMedia::default())));
        let mut timeline = Timeline::new("t", 24);
        let mut track = Track::new("v", TrackKind::Video);
        track.push_clip(Clip::new("/m/a.test", TimeRange::new(tv(0), tv(240))));
        timeline.tracks.push(track);
        let mut audio = Track::new("a", TrackKind::Audio);
        audio.push_clip(Clip::new("/m/a.test", TimeRange::new(tv(0), tv(240))));
        timeline.tracks.push(audio);
        Player::new(Arc::new(timeline), Arc::new(registry), PlayerOptions::default(), &TimelineOptions::default())
            .unwrap()
    }

    #[test]
    fn test_initial_state() {
        let player = player();
        assert_eq!(player.playback().get(), Playback::Stop);
        assert_eq!(player.current_time().get(), tv(0));
        assert_eq!(player.in_out_range().get(), TimeRange::new(tv(0), tv(240)));
    }

    #[test]
    fn test_seek_and_in_out_clamp_playhead() {
        let mut player = player();
        player.seek(tv(500));
        assert_eq!(player.current_time().get(), tv(239));
        player.seek(TimeValue::new(-3, 1));
        assert_eq!(player.current_time().get(), tv(0));

        player.set_in_out_range(TimeRange::new(tv(48), tv(24)));
        assert_eq!(player.current_time().get(), tv(48));
        player.seek(tv(100));
        assert_eq!(player.current_time().get(), tv(71));

        player.reset_in_out_points();
        player.seek(tv(100));
        player.set_in_point();
        player.seek(tv(150));
        player.set_out_point();
        assert_eq!(player.in_out_range().get(), TimeRange::new(tv(100), tv(51)));
    }

    #[test]
    fn test_tick_loops_and_once_stops() {
        let mut player = player();
        player.set_in_out_range(TimeRange::new(tv(0), tv(24)));
        let t0 = Instant::now();
        player.set_playback(Playback::Forward);
        player.tick_at(t0 + Duration::from_millis(520));
        assert_eq!(player.current_time().get(), tv(12));
        // Past the out point: wraps to the in point
        player.tick_at(t0 + Duration::from_millis(1020));
        assert_eq!(player.current_time().get(), tv(0));
        assert_eq!(player.playback().get(), Playback::Forward);

        player.set_loop(Loop::Once);
        player.tick_at(t0 + Duration::from_millis(3020));
        assert_eq!(player.current_time().get(), tv(23));
        assert_eq!(player.playback().get(), Playback::Stop);

        // Play again from the end restarts
        player.set_playback(Playback::Forward);
        assert_eq!(player.current_time().get(), tv(0));
    }

    #[test]
    fn test_ping_pong_reverses_at_boundary() {
        let mut player = player();
        player.set_loop(Loop::PingPong);
        player.set_in_out_range(TimeRange::new(tv(0), tv(24)));
        let t0 = Instant::now();
        player.set_playback(Playback::Forward);
        player.tick_at(t0 + Duration::from_millis(2020));
        assert_eq!(player.current_time().get(), tv(23));
        assert_eq!(player.playback().get(), Playback::Reverse);
    }

    #[test]
    fn test_frame_steps_stop_playback() {
        let mut player = player();
        player.set_playback(Playback::Forward);
        player.frame_prev();
        assert_eq!(player.playback().get(), Playback::Stop);
        // Wraps with Loop
        assert_eq!(player.current_time().get(), tv(239));
        player.frame_next();
        assert_eq!(player.current_time().get(), tv(0));
        player.time_action(TimeAction::JumpForward1s);
        assert_eq!(player.current_time().get(), tv(24));
    }

    #[test]
    fn test_audio_plays_only_forward_at_normal_speed() {
        let mut player = player();
        let sync = player.audio_sync();
        player.set_playback(Playback::Forward);
        assert!(sync.is_playing());
        player.set_speed(2.0);
        assert!(!sync.is_playing());
        player.slower();
        assert_eq!(player.speed().get(), 1.0);
        assert!(sync.is_playing());
        player.set_playback(Playback::Reverse);
        assert!(!sync.is_playing());
    }

    #[test]
    fn test_cache_thread_publishes_current_frame() {
        let mut player = player();
        let frames = player.current_video().subscribe();
        player.seek(tv(30));
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = None;
        while Instant::now() < deadline {
            if let Some(Some(data)) = frames.recv_timeout(Duration::from_millis(50)) {
                seen = Some(frame_of(data.layers[0].image.as_ref().unwrap()));
                if seen == Some(30) {
                    break;
                }
            }
        }
        assert_eq!(seen, Some(30));
        let info = player.cache_info().get();
        assert!(info.video_frames > 0);
        assert!(info.video_bytes <= info.video_limit);
    }
}
