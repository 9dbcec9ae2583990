//! Rational time values and ranges
//!
//! Every position, duration and range in the engine is a `TimeValue`:
//! an integer count at an integer rate (`value / rate` seconds).
//!
//! # Equality
//!
//! Comparison is numeric, not structural: `12/24 == 1/2 == 24000/48000`.
//! `Hash` uses the reduced fraction so the type is a valid map key even
//! when the same instant arrives at different rates.
//!
//! # Invalid sentinel
//!
//! `TimeValue::invalid()` (rate 0) marks "no timeline loaded". It sorts
//! before every valid time and only equals itself.

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Neg, Sub};

/// Rational point in time (or duration): `value / rate` seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeValue {
    value: i64,
    rate: i64,
}

impl TimeValue {
    /// Create a time of `value` ticks at `rate` ticks per second.
    /// A non-positive rate yields the invalid sentinel.
    pub const fn new(value: i64, rate: i64) -> Self {
        if rate <= 0 {
            return Self::invalid();
        }
        Self { value, rate }
    }

    /// The "no time" sentinel.
    pub const fn invalid() -> Self {
        Self { value: 0, rate: 0 }
    }

    /// Zero at the given rate.
    pub const fn zero(rate: i64) -> Self {
        Self::new(0, rate)
    }

    /// Create from seconds, flooring to the nearest tick at `rate`.
    pub fn from_seconds(seconds: f64, rate: i64) -> Self {
        if rate <= 0 || !seconds.is_finite() {
            return Self::invalid();
        }
        // Small epsilon so 0.5 * 24 does not floor to 11 due to fp noise
        let ticks = (seconds * rate as f64 + 1e-9).floor() as i64;
        Self::new(ticks, rate)
    }

    pub fn is_valid(&self) -> bool {
        self.rate > 0
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn rate(&self) -> i64 {
        self.rate
    }

    pub fn to_seconds(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        self.value as f64 / self.rate as f64
    }

    /// Exact rational value in seconds, `None` for the invalid sentinel.
    pub fn ratio(&self) -> Option<Rational64> {
        self.is_valid().then(|| Rational64::new(self.value, self.rate))
    }

    /// Re-express at another rate, flooring to a whole tick.
    pub fn rescaled_to(&self, rate: i64) -> Self {
        if !self.is_valid() || rate <= 0 {
            return Self::invalid();
        }
        if rate == self.rate {
            return *self;
        }
        let scaled = (self.value as i128 * rate as i128).div_euclid(self.rate as i128);
        Self::new(scaled as i64, rate)
    }

    /// True when the time lies exactly on a tick of `rate`.
    pub fn is_on_rate(&self, rate: i64) -> bool {
        self.is_valid() && rate > 0 && (self.value as i128 * rate as i128) % self.rate as i128 == 0
    }

    /// Whole seconds, floored (negative times floor towards -inf).
    pub fn whole_seconds(&self) -> i64 {
        if !self.is_valid() {
            return 0;
        }
        self.value.div_euclid(self.rate)
    }

    /// Build from a rational result, keeping `preferred` rates when exact.
    fn from_ratio(ratio: Rational64, preferred: [i64; 2]) -> Self {
        for rate in preferred {
            let scaled = ratio * rate;
            if scaled.is_integer() {
                return Self::new(*scaled.numer(), rate);
            }
        }
        Self::new(*ratio.numer(), *ratio.denom())
    }
}

impl Default for TimeValue {
    fn default() -> Self {
        Self::invalid()
    }
}

impl PartialEq for TimeValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimeValue {}

impl PartialOrd for TimeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => Ordering::Equal,
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (true, true) => {
                let lhs = self.value as i128 * other.rate as i128;
                let rhs = other.value as i128 * self.rate as i128;
                lhs.cmp(&rhs)
            }
        }
    }
}

impl Hash for TimeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.ratio() {
            Some(r) => {
                r.numer().hash(state);
                r.denom().hash(state);
            }
            None => (0i64, 0i64).hash(state),
        }
    }
}

impl Add for TimeValue {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        if self.rate == rhs.rate && self.is_valid() {
            return Self::new(self.value + rhs.value, self.rate);
        }
        match (self.ratio(), rhs.ratio()) {
            (Some(a), Some(b)) => Self::from_ratio(a + b, [self.rate, rhs.rate]),
            _ => Self::invalid(),
        }
    }
}

impl Sub for TimeValue {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        if self.rate == rhs.rate && self.is_valid() {
            return Self::new(self.value - rhs.value, self.rate);
        }
        match (self.ratio(), rhs.ratio()) {
            (Some(a), Some(b)) => Self::from_ratio(a - b, [self.rate, rhs.rate]),
            _ => Self::invalid(),
        }
    }
}

impl Neg for TimeValue {
    type Output = Self;
    fn neg(self) -> Self {
        if !self.is_valid() {
            return self;
        }
        Self::new(-self.value, self.rate)
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}/{} ({:.3}s)", self.value, self.rate, self.to_seconds())
        } else {
            write!(f, "invalid")
        }
    }
}

/// Half-open time range `[start, start + duration)`.
///
/// The frame granularity of a range is the rate of its start time, which
/// is what `end_inclusive()` and `frames()` step by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: TimeValue,
    pub duration: TimeValue,
}

impl TimeRange {
    pub fn new(start: TimeValue, duration: TimeValue) -> Self {
        Self { start, duration }
    }

    pub fn invalid() -> Self {
        Self { start: TimeValue::invalid(), duration: TimeValue::invalid() }
    }

    /// Range covering `start..=end_inclusive` at the start's rate.
    pub fn from_start_end_inclusive(start: TimeValue, end_inclusive: TimeValue) -> Self {
        let one = TimeValue::new(1, start.rate());
        Self::new(start, end_inclusive - start + one)
    }

    pub fn is_valid(&self) -> bool {
        self.start.is_valid() && self.duration.is_valid() && self.duration.value() >= 0
    }

    pub fn rate(&self) -> i64 {
        self.start.rate()
    }

    pub fn end_exclusive(&self) -> TimeValue {
        self.start + self.duration
    }

    /// Last whole frame inside the range.
    pub fn end_inclusive(&self) -> TimeValue {
        let rate = self.rate();
        let end = self.end_exclusive();
        let last = end.rescaled_to(rate);
        if last == end {
            last - TimeValue::new(1, rate)
        } else {
            last
        }
    }

    /// Start-inclusive, end-exclusive membership.
    pub fn contains(&self, time: TimeValue) -> bool {
        self.is_valid() && time >= self.start && time < self.end_exclusive()
    }

    pub fn clamp(&self, time: TimeValue) -> TimeValue {
        if !self.is_valid() {
            return time;
        }
        let last = self.end_inclusive();
        if time < self.start {
            self.start
        } else if time > last {
            last
        } else {
            time
        }
    }

    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        if !self.is_valid() || !other.is_valid() {
            return None;
        }
        // Ties keep this range's representation (and so its rate)
        let start = if other.start > self.start { other.start } else { self.start };
        let (self_end, other_end) = (self.end_exclusive(), other.end_exclusive());
        let end = if other_end < self_end { other_end } else { self_end };
        (start < end).then(|| TimeRange::new(start, end - start))
    }

    /// Number of whole frames at the range rate.
    pub fn frame_count(&self) -> i64 {
        if !self.is_valid() {
            return 0;
        }
        (self.end_inclusive().value() - self.start.rescaled_to(self.rate()).value() + 1).max(0)
    }

    /// Every frame of the range, at the range rate.
    pub fn frames(&self) -> impl DoubleEndedIterator<Item = TimeValue> + use<> {
        let rate = self.rate();
        let (first, last) = if self.is_valid() && self.duration.value() > 0 {
            (self.start.rescaled_to(rate).value(), self.end_inclusive().value())
        } else {
            (0, -1)
        };
        (first..=last).map(move |v| TimeValue::new(v, rate))
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "[{:.3}s, {:.3}s)", self.start.to_seconds(), self.end_exclusive().to_seconds())
        } else {
            write!(f, "[invalid]")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_numeric_equality_across_rates() {
        assert_eq!(TimeValue::new(12, 24), TimeValue::new(1, 2));
        assert_eq!(TimeValue::new(24000, 48000), TimeValue::new(15, 30));
        assert_ne!(TimeValue::new(13, 24), TimeValue::new(1, 2));
        assert!(TimeValue::new(1, 24) < TimeValue::new(1, 23));
    }

    #[test]
    fn test_hash_matches_equality() {
        let mut set = HashSet::new();
        set.insert(TimeValue::new(48, 24));
        assert!(set.contains(&TimeValue::new(2, 1)));
        assert!(set.contains(&TimeValue::new(60, 30)));
        assert!(!set.contains(&TimeValue::new(61, 30)));
    }

    #[test]
    fn test_invalid_sentinel() {
        let invalid = TimeValue::invalid();
        assert!(!invalid.is_valid());
        assert_eq!(invalid, TimeValue::new(5, 0));
        assert!(invalid < TimeValue::new(-100, 24));
        assert!(!(invalid + TimeValue::new(1, 24)).is_valid());
    }

    #[test]
    fn test_mixed_rate_arithmetic_keeps_rate_when_exact() {
        let t = TimeValue::new(24, 24) + TimeValue::new(1, 2);
        assert_eq!(t, TimeValue::new(36, 24));
        assert_eq!(t.rate(), 24);

        let odd = TimeValue::new(1, 24) + TimeValue::new(1, 25);
        assert_eq!(odd, TimeValue::new(49, 600));
    }

    #[test]
    fn test_from_seconds_and_rescale() {
        assert_eq!(TimeValue::from_seconds(4.5, 24).value(), 108);
        assert_eq!(TimeValue::new(25, 24).rescaled_to(1).value(), 1);
        assert_eq!(TimeValue::new(-1, 24).rescaled_to(1).value(), -1);
        assert_eq!(TimeValue::new(-1, 24).whole_seconds(), -1);
        assert!(TimeValue::new(48, 24).is_on_rate(1));
        assert!(!TimeValue::new(47, 24).is_on_rate(1));
    }

    #[test]
    fn test_range_end_and_contains() {
        let range = TimeRange::new(TimeValue::new(0, 24), TimeValue::new(240, 24));
        assert_eq!(range.end_exclusive(), TimeValue::new(10, 1));
        assert_eq!(range.end_inclusive(), TimeValue::new(239, 24));
        assert!(range.contains(TimeValue::new(0, 24)));
        assert!(range.contains(TimeValue::new(239, 24)));
        assert!(!range.contains(TimeValue::new(240, 24)));
        assert_eq!(range.frame_count(), 240);
    }

    #[test]
    fn test_range_clamp_and_intersect() {
        let range = TimeRange::new(TimeValue::new(10, 24), TimeValue::new(10, 24));
        assert_eq!(range.clamp(TimeValue::new(0, 24)), TimeValue::new(10, 24));
        assert_eq!(range.clamp(TimeValue::new(100, 24)), TimeValue::new(19, 24));

        let other = TimeRange::new(TimeValue::new(15, 24), TimeValue::new(100, 24));
        let both = range.intersect(&other).unwrap();
        assert_eq!(both.start, TimeValue::new(15, 24));
        assert_eq!(both.end_exclusive(), TimeValue::new(20, 24));

        let disjoint = TimeRange::new(TimeValue::new(20, 24), TimeValue::new(5, 24));
        assert!(range.intersect(&disjoint).is_none());
    }

    #[test]
    fn test_range_frames() {
        let range = TimeRange::from_start_end_inclusive(TimeValue::new(3, 24), TimeValue::new(6, 24));
        let frames: Vec<i64> = range.frames().map(|t| t.value()).collect();
        assert_eq!(frames, vec![3, 4, 5, 6]);
        assert_eq!(TimeRange::invalid().frames().count(), 0);
    }
}
