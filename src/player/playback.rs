//! Playback modes and playhead arithmetic
//!
//! # Timing Model
//!
//! The playhead is anchored: when playback starts (or wraps, or changes
//! speed) we store `(start_time, Instant)`. Each tick computes the frame
//! from elapsed wall-clock time times speed, floored to whole frames, so
//! timer jitter never accumulates.
//!
//! # Boundaries
//!
//! - `Loop`: forward wraps to the in point, reverse to the out point
//! - `Once`: clamp to the boundary and stop
//! - `PingPong`: clamp to the boundary and flip direction
//!
//! The result is always clamped into the in/out range.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::core::time::{TimeRange, TimeValue};

/// Speed presets for stepping with faster/slower
pub const SPEED_PRESETS: &[f64] = &[0.25, 0.5, 1.0, 2.0, 4.0, 8.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Playback {
    #[default]
    Stop,
    Forward,
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Loop {
    #[default]
    Loop,
    Once,
    PingPong,
}

/// Which side of the playhead the cache fills first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheDirection {
    #[default]
    Forward,
    Reverse,
}

impl CacheDirection {
    /// Direction for a playback mode; `Stop` keeps the previous one.
    pub fn for_playback(playback: Playback, previous: CacheDirection) -> Self {
        match playback {
            Playback::Forward => CacheDirection::Forward,
            Playback::Reverse => CacheDirection::Reverse,
            Playback::Stop => previous,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeAction {
    Start,
    End,
    FramePrev,
    FrameNext,
    JumpBack1s,
    JumpForward1s,
}

/// Wall-clock anchor for a moving playhead
#[derive(Debug, Clone, Copy)]
pub struct PlayClock {
    pub start_time: TimeValue,
    pub start: Instant,
}

impl PlayClock {
    pub fn new(start_time: TimeValue, start: Instant) -> Self {
        Self { start_time, start }
    }

    /// Whole frames elapsed at `rate` and `speed` since the anchor.
    pub fn frames_elapsed(&self, now: Instant, rate: i64, speed: f64) -> i64 {
        let secs = now.saturating_duration_since(self.start).as_secs_f64();
        (secs * speed.max(0.0) * rate as f64 + 1e-9).floor() as i64
    }

    /// Unclamped playhead for `now`.
    pub fn target(&self, now: Instant, rate: i64, speed: f64, playback: Playback) -> TimeValue {
        let frames = self.frames_elapsed(now, rate, speed);
        let start = self.start_time.rescaled_to(rate);
        match playback {
            Playback::Forward => start + TimeValue::new(frames, rate),
            Playback::Reverse => start - TimeValue::new(frames, rate),
            Playback::Stop => start,
        }
    }
}

/// Outcome of moving the playhead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub time: TimeValue,
    pub playback: Playback,
    /// The clock must be re-anchored at `time`
    pub reanchor: bool,
}

/// Apply the loop rules to a playhead that moved to `target`.
pub fn resolve_boundary(range: &TimeRange, loop_mode: Loop, playback: Playback, target: TimeValue) -> Step {
    let keep = |time| Step { time, playback, reanchor: false };
    if !range.is_valid() || range.duration.value() <= 0 {
        return keep(target);
    }
    let (first, last) = (range.start, range.end_inclusive());
    match playback {
        Playback::Forward if target > last => match loop_mode {
            Loop::Loop => Step { time: first, playback, reanchor: true },
            Loop::Once => Step { time: last, playback: Playback::Stop, reanchor: false },
            Loop::PingPong => Step { time: last, playback: Playback::Reverse, reanchor: true },
        },
        Playback::Reverse if target < first => match loop_mode {
            Loop::Loop => Step { time: last, playback, reanchor: true },
            Loop::Once => Step { time: first, playback: Playback::Stop, reanchor: false },
            Loop::PingPong => Step { time: first, playback: Playback::Forward, reanchor: true },
        },
        _ => keep(range.clamp(target)),
    }
}

/// One frame forward or back from `time`, wrapping only with `Loop`.
pub fn step_frame(range: &TimeRange, loop_mode: Loop, time: TimeValue, forward: bool) -> TimeValue {
    if !range.is_valid() {
        return time;
    }
    let one = TimeValue::new(1, range.rate());
    let time = time.rescaled_to(range.rate());
    let (first, last) = (range.start, range.end_inclusive());
    if forward {
        match time + one {
            t if t > last && loop_mode == Loop::Loop => first,
            t => range.clamp(t),
        }
    } else {
        match time - one {
            t if t < first && loop_mode == Loop::Loop => last,
            t => range.clamp(t),
        }
    }
}

/// Target of a `TimeAction`.
pub fn action_time(range: &TimeRange, loop_mode: Loop, time: TimeValue, action: TimeAction) -> TimeValue {
    let second = TimeValue::new(range.rate().max(1), range.rate().max(1));
    match action {
        TimeAction::Start => range.start,
        TimeAction::End => range.end_inclusive(),
        TimeAction::FramePrev => step_frame(range, loop_mode, time, false),
        TimeAction::FrameNext => step_frame(range, loop_mode, time, true),
        TimeAction::JumpBack1s => range.clamp(time - second),
        TimeAction::JumpForward1s => range.clamp(time + second),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tv(v: i64) -> TimeValue {
        TimeValue::new(v, 24)
    }

    fn range() -> TimeRange {
        TimeRange::new(tv(10), tv(20)) // frames 10..=29
    }

    #[test]
    fn test_loop_wraps_to_opposite_boundary() {
        let fwd = resolve_boundary(&range(), Loop::Loop, Playback::Forward, tv(30));
        assert_eq!(fwd, Step { time: tv(10), playback: Playback::Forward, reanchor: true });
        let rev = resolve_boundary(&range(), Loop::Loop, Playback::Reverse, tv(9));
        assert_eq!(rev, Step { time: tv(29), playback: Playback::Reverse, reanchor: true });
    }

    #[test]
    fn test_once_stops_at_boundary() {
        let step = resolve_boundary(&range(), Loop::Once, Playback::Forward, tv(45));
        assert_eq!(step.time, tv(29));
        assert_eq!(step.playback, Playback::Stop);
        let step = resolve_boundary(&range(), Loop::Once, Playback::Reverse, tv(-3));
        assert_eq!((step.time, step.playback), (tv(10), Playback::Stop));
    }

    #[test]
    fn test_ping_pong_reverses_once_per_hit() {
        let mut playback = Playback::Forward;
        let mut time = tv(27);
        let mut flips = 0;
        for _ in 0..6 {
            let target = match playback {
                Playback::Forward => time + tv(1),
                _ => time - tv(1),
            };
            let step = resolve_boundary(&range(), Loop::PingPong, playback, target);
            if step.playback != playback {
                flips += 1;
            }
            playback = step.playback;
            time = step.time;
        }
        // 27 -> 28 -> 29 -> hit (29, reverse) -> 28 -> 27 -> 26
        assert_eq!(flips, 1);
        assert_eq!(time, tv(26));
        assert_eq!(playback, Playback::Reverse);
    }

    #[test]
    fn test_time_stays_in_range_for_any_step() {
        for mode in [Loop::Loop, Loop::Once, Loop::PingPong] {
            let mut playback = Playback::Forward;
            let mut time = tv(10);
            for i in 0..200 {
                let jump = tv(1 + (i * 7) % 13);
                let target = if playback == Playback::Reverse { time - jump } else { time + jump };
                let step = resolve_boundary(&range(), mode, playback, target);
                assert!(range().contains(step.time), "{:?} escaped to {}", mode, step.time);
                time = step.time;
                playback = if step.playback == Playback::Stop { Playback::Forward } else { step.playback };
            }
        }
    }

    #[test]
    fn test_clock_floors_to_frames() {
        let now = Instant::now();
        let clock = PlayClock::new(tv(100), now);
        let later = now + Duration::from_millis(1010);
        assert_eq!(clock.frames_elapsed(later, 24, 1.0), 24);
        assert_eq!(clock.target(later, 24, 2.0, Playback::Forward), tv(148));
        assert_eq!(clock.target(later, 24, 1.0, Playback::Reverse), tv(76));
    }

    #[test]
    fn test_frame_steps_and_actions() {
        assert_eq!(step_frame(&range(), Loop::Loop, tv(29), true), tv(10));
        assert_eq!(step_frame(&range(), Loop::Once, tv(29), true), tv(29));
        assert_eq!(step_frame(&range(), Loop::Loop, tv(10), false), tv(29));
        assert_eq!(action_time(&range(), Loop::Loop, tv(15), TimeAction::End), tv(29));
        assert_eq!(action_time(&range(), Loop::Loop, tv(15), TimeAction::JumpForward1s), tv(29));
        assert_eq!(action_time(&range(), Loop::Loop, tv(29), TimeAction::JumpBack1s), tv(10));
    }
}
