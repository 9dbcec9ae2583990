//! Timeline model: tracks of clips, gaps and transitions
//!
//! Items on a track play back to back. A transition sits between two clips
//! and takes no track time; it is active on `[cut - in_offset, cut +
//! out_offset)` where both clips are read (using source handles outside
//! their trimmed ranges).
//!
//! Timelines load from JSON or are built from a single media file with
//! `Timeline::from_media`.

pub mod resolver;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::core::time::{TimeRange, TimeValue};
use crate::io::sequence::{FileSequence, split_sequence_path};
use crate::io::{IoError, IoOptions, IoRegistry};

pub use resolver::{AudioData, AudioPart, RequestStatus, Resolver, VideoData, VideoLayer};

/// Timeline errors
#[derive(Debug)]
pub enum TimelineError {
    Io(IoError),
    Parse(serde_json::Error),
    Invalid(String),
    UnsupportedMedia(PathBuf),
}

impl fmt::Display for TimelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimelineError::Io(e) => write!(f, "{}", e),
            TimelineError::Parse(e) => write!(f, "Timeline parse error: {}", e),
            TimelineError::Invalid(e) => write!(f, "Invalid timeline: {}", e),
            TimelineError::UnsupportedMedia(p) => write!(f, "Unsupported media: {}", p.display()),
        }
    }
}

impl std::error::Error for TimelineError {}

impl From<IoError> for TimelineError {
    fn from(e: IoError) -> Self {
        TimelineError::Io(e)
    }
}

impl From<std::io::Error> for TimelineError {
    fn from(e: std::io::Error) -> Self {
        TimelineError::Io(IoError::Io(e))
    }
}

impl From<serde_json::Error> for TimelineError {
    fn from(e: serde_json::Error) -> Self {
        TimelineError::Parse(e)
    }
}

/// Where audio for an image sequence comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileSequenceAudio {
    /// No audio
    None,
    /// `<sequence base name>.<audio ext>` next to the sequence
    #[default]
    BaseName,
    /// Explicit file from `TimelineOptions::file_sequence_audio_file_name`
    FileName,
}

/// Options used when building timelines and opening readers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineOptions {
    pub file_sequence_audio: FileSequenceAudio,
    pub file_sequence_audio_file_name: String,
    /// Open reader handles kept by the resolver
    pub reader_cache_count: usize,
    pub io_options: IoOptions,
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self {
            file_sequence_audio: FileSequenceAudio::BaseName,
            file_sequence_audio_file_name: String::new(),
            reader_cache_count: 16,
            io_options: IoOptions::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransitionKind {
    #[default]
    Dissolve,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    /// Stable identity, used as the reader key
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub media: PathBuf,
    /// Trimmed range in media time
    pub source_range: TimeRange,
}

impl Clip {
    pub fn new(media: impl Into<PathBuf>, source_range: TimeRange) -> Self {
        let media = media.into();
        let name = media.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        Self { id: Uuid::new_v4(), name, media, source_range }
    }

    pub fn duration(&self) -> TimeValue {
        self.source_range.duration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(default)]
    pub kind: TransitionKind,
    pub in_offset: TimeValue,
    pub out_offset: TimeValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Item {
    Clip(Clip),
    Gap { duration: TimeValue },
    Transition(Transition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    #[serde(default)]
    pub name: String,
    pub kind: TrackKind,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub items: Vec<Item>,
}

fn enabled_default() -> bool {
    true
}

impl Track {
    pub fn new(name: impl Into<String>, kind: TrackKind) -> Self {
        Self { name: name.into(), kind, enabled: true, items: Vec::new() }
    }

    pub fn push_clip(&mut self, clip: Clip) -> &mut Self {
        self.items.push(Item::Clip(clip));
        self
    }

    pub fn push_gap(&mut self, duration: TimeValue) -> &mut Self {
        self.items.push(Item::Gap { duration });
        self
    }

    pub fn push_transition(&mut self, in_offset: TimeValue, out_offset: TimeValue) -> &mut Self {
        self.items.push(Item::Transition(Transition {
            kind: TransitionKind::Dissolve,
            in_offset,
            out_offset,
        }));
        self
    }

    /// Place every item at its track-relative position.
    pub fn layout(&self, rate: i64) -> TrackLayout {
        let mut pos = TimeValue::zero(rate);
        let mut clips = Vec::new();
        // (cut, item index of transition)
        let mut cuts = Vec::new();

        for (index, item) in self.items.iter().enumerate() {
            match item {
                Item::Clip(clip) => {
                    clips.push(PlacedClip { item: index, range: TimeRange::new(pos, clip.duration()) });
                    pos = pos + clip.duration();
                }
                Item::Gap { duration } => pos = pos + *duration,
                Item::Transition(_) => cuts.push((pos, index)),
            }
        }

        let mut transitions = Vec::new();
        for (cut, index) in cuts {
            let before = index.checked_sub(1).and_then(|i| clips.iter().position(|c| c.item == i));
            let after = clips.iter().position(|c| c.item == index + 1);
            let (Some(from), Some(to), Some(Item::Transition(t))) = (before, after, self.items.get(index)) else {
                warn!("Track '{}': transition at item {} is not between two clips, ignored", self.name, index);
                continue;
            };
            let start = cut - t.in_offset;
            let range = TimeRange::new(start, t.in_offset + t.out_offset);
            if range.duration.value() > 0 {
                transitions.push(PlacedTransition { range, from, to, kind: t.kind });
            }
        }

        TrackLayout { clips, transitions, duration: pos }
    }

    pub fn clip(&self, item: usize) -> Option<&Clip> {
        match self.items.get(item) {
            Some(Item::Clip(clip)) => Some(clip),
            _ => None,
        }
    }
}

/// A clip placed on its track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedClip {
    /// Index into `Track::items`
    pub item: usize,
    /// Track-relative range
    pub range: TimeRange,
}

impl PlacedClip {
    /// Media time for track-relative `time`.
    pub fn media_time(&self, clip: &Clip, time: TimeValue) -> TimeValue {
        clip.source_range.start + (time - self.range.start)
    }
}

/// An active transition window between two placed clips
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacedTransition {
    pub range: TimeRange,
    /// Indices into `TrackLayout::clips`
    pub from: usize,
    pub to: usize,
    pub kind: TransitionKind,
}

impl PlacedTransition {
    /// Linear progress in [0, 1).
    pub fn value_at(&self, time: TimeValue) -> f32 {
        let total = self.range.duration.to_seconds();
        if total <= 0.0 {
            return 0.0;
        }
        ((time - self.range.start).to_seconds() / total).clamp(0.0, 1.0) as f32
    }
}

/// What a track shows at one time
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActiveItem {
    Clip { clip: usize, media_time: TimeValue },
    Transition {
        from: usize,
        from_time: TimeValue,
        to: usize,
        to_time: TimeValue,
        kind: TransitionKind,
        value: f32,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackLayout {
    pub clips: Vec<PlacedClip>,
    pub transitions: Vec<PlacedTransition>,
    pub duration: TimeValue,
}

impl TrackLayout {
    /// Item active at track-relative `time`. A time on a cut belongs to
    /// the later clip.
    pub fn active_at(&self, track: &Track, time: TimeValue) -> Option<ActiveItem> {
        if let Some(t) = self.transitions.iter().find(|t| t.range.contains(time)) {
            let (from, to) = (self.clips[t.from], self.clips[t.to]);
            let from_clip = track.clip(from.item)?;
            let to_clip = track.clip(to.item)?;
            return Some(ActiveItem::Transition {
                from: from.item,
                from_time: from.media_time(from_clip, time),
                to: to.item,
                to_time: to.media_time(to_clip, time),
                kind: t.kind,
                value: t.value_at(time),
            });
        }
        let placed = self.clips.iter().find(|c| c.range.contains(time))?;
        let clip = track.clip(placed.item)?;
        Some(ActiveItem::Clip { clip: placed.item, media_time: placed.media_time(clip, time) })
    }

    /// Clips overlapping track-relative `range`, as
    /// (item index, overlapped track range, matching media range).
    pub fn overlapping(&self, track: &Track, range: &TimeRange) -> Vec<(usize, TimeRange, TimeRange)> {
        self.clips
            .iter()
            .filter_map(|placed| {
                let clip = track.clip(placed.item)?;
                let overlap = placed.range.intersect(range)?;
                let media = TimeRange::new(placed.media_time(clip, overlap.start), overlap.duration);
                Some((placed.item, overlap, media))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub name: String,
    /// Frame rate used for playback stepping and video cache keys
    pub rate: i64,
    #[serde(default)]
    pub global_start: Option<TimeValue>,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Timeline {
    pub fn new(name: impl Into<String>, rate: i64) -> Self {
        Self { name: name.into(), rate, global_start: None, tracks: Vec::new() }
    }

    pub fn start_time(&self) -> TimeValue {
        self.global_start.unwrap_or(TimeValue::zero(self.rate))
    }

    pub fn duration(&self) -> TimeValue {
        self.tracks
            .iter()
            .map(|t| t.layout(self.rate).duration)
            .max()
            .unwrap_or(TimeValue::zero(self.rate))
    }

    /// `[global_start, global_start + longest track)` at the timeline rate.
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start_time().rescaled_to(self.rate), self.duration())
    }

    pub fn has_audio(&self) -> bool {
        self.tracks.iter().any(|t| t.enabled && t.kind == TrackKind::Audio)
    }

    pub fn validate(&self) -> Result<(), TimelineError> {
        if self.rate <= 0 {
            return Err(TimelineError::Invalid(format!("rate must be positive, got {}", self.rate)));
        }
        for track in &self.tracks {
            for item in &track.items {
                match item {
                    Item::Clip(c) if !c.source_range.is_valid() => {
                        return Err(TimelineError::Invalid(format!("clip '{}' has no valid source range", c.name)));
                    }
                    Item::Gap { duration } if !duration.is_valid() || duration.value() < 0 => {
                        return Err(TimelineError::Invalid(format!("track '{}' has a negative gap", track.name)));
                    }
                    _ => {}
                }
            }
        }
        if self.duration().value() <= 0 {
            return Err(TimelineError::Invalid("timeline is empty".into()));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, TimelineError> {
        let timeline: Timeline = serde_json::from_str(json)?;
        timeline.validate()?;
        Ok(timeline)
    }

    /// Load JSON; relative media paths resolve against the file's folder.
    pub fn from_json_file(path: &Path) -> Result<Self, TimelineError> {
        let json = std::fs::read_to_string(path)?;
        let mut timeline = Self::from_json_str(&json)?;
        if let Some(dir) = path.parent() {
            for item in timeline.tracks.iter_mut().flat_map(|t| t.items.iter_mut()) {
                if let Item::Clip(clip) = item
                    && clip.media.is_relative()
                {
                    clip.media = dir.join(&clip.media);
                }
            }
        }
        info!("Loaded timeline '{}' from {}", timeline.name, path.display());
        Ok(timeline)
    }

    pub fn to_json(&self) -> Result<String, TimelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// One-clip timeline for a media file (plus sequence audio, if found).
    pub fn from_media(path: &Path, registry: &IoRegistry, options: &TimelineOptions) -> Result<Self, TimelineError> {
        let reader = registry
            .read(path, &options.io_options)
            .ok_or_else(|| TimelineError::UnsupportedMedia(path.to_path_buf()))?;
        let info = reader.get_info().wait_result()?;

        let name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let rate = if info.has_video() { info.video_time.rate() } else { 24 };
        let mut timeline = Timeline::new(name, rate);

        if info.has_video() {
            let mut track = Track::new("Video", TrackKind::Video);
            track.push_clip(Clip::new(path, info.video_time));
            timeline.tracks.push(track);
        }
        if info.has_audio() {
            let mut track = Track::new("Audio", TrackKind::Audio);
            track.push_clip(Clip::new(path, info.audio_time));
            timeline.tracks.push(track);
        } else if info.has_video()
            && split_sequence_path(path).is_some()
            && let Some(audio_path) = sequence_audio(path, registry, options)
        {
            match registry.read(&audio_path, &options.io_options).map(|r| r.get_info().wait_result()) {
                Some(Ok(audio_info)) if audio_info.has_audio() => {
                    info!("Sequence audio: {}", audio_path.display());
                    let mut track = Track::new("Audio", TrackKind::Audio);
                    track.push_clip(Clip::new(&audio_path, audio_info.audio_time));
                    timeline.tracks.push(track);
                }
                Some(Err(e)) => warn!("Sequence audio {}: {}", audio_path.display(), e),
                _ => warn!("Sequence audio {} has no audio stream", audio_path.display()),
            }
        }

        timeline.validate()?;
        debug!("Timeline from media {}: {}", path.display(), timeline.time_range());
        Ok(timeline)
    }
}

/// Audio file to pair with an image sequence.
fn sequence_audio(path: &Path, registry: &IoRegistry, options: &TimelineOptions) -> Option<PathBuf> {
    match options.file_sequence_audio {
        FileSequenceAudio::None => None,
        FileSequenceAudio::FileName => {
            let name = PathBuf::from(&options.file_sequence_audio_file_name);
            if name.as_os_str().is_empty() {
                return None;
            }
            let full = match (name.is_relative(), path.parent()) {
                (true, Some(dir)) => dir.join(name),
                _ => name,
            };
            full.exists().then_some(full)
        }
        FileSequenceAudio::BaseName => {
            let seq = FileSequence::scan(path).ok()?;
            let base = seq.base_name().to_string();
            registry
                .extensions()
                .into_iter()
                .map(|ext| PathBuf::from(format!("{}.{}", base, ext)))
                .find(|candidate| candidate.exists() && split_sequence_path(candidate).is_none())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tv(v: i64) -> TimeValue {
        TimeValue::new(v, 24)
    }

    fn clip(name: &str, start: i64, len: i64) -> Clip {
        Clip::new(format!("/media/{}.test", name), TimeRange::new(tv(start), tv(len)))
    }

    #[test]
    fn test_layout_and_cut_belongs_to_later_clip() {
        let mut track = Track::new("v", TrackKind::Video);
        track.push_clip(clip("a", 100, 10)).push_gap(tv(5)).push_clip(clip("b", 0, 10));
        let layout = track.layout(24);
        assert_eq!(layout.duration, tv(25));
        assert_eq!(layout.clips[1].range.start, tv(15));

        // Frame 9 is the last of "a"
        assert_eq!(
            layout.active_at(&track, tv(9)),
            Some(ActiveItem::Clip { clip: 0, media_time: tv(109) })
        );
        // Gap
        assert_eq!(layout.active_at(&track, tv(12)), None);
        // Exactly on the start of "b"
        assert_eq!(layout.active_at(&track, tv(15)), Some(ActiveItem::Clip { clip: 2, media_time: tv(0) }));
        assert_eq!(layout.active_at(&track, tv(25)), None);
    }

    #[test]
    fn test_transition_reads_both_clips() {
        let mut track = Track::new("v", TrackKind::Video);
        track.push_clip(clip("a", 0, 10)).push_transition(tv(2), tv(2)).push_clip(clip("b", 50, 10));
        let layout = track.layout(24);
        assert_eq!(layout.transitions.len(), 1);
        assert_eq!(layout.transitions[0].range, TimeRange::new(tv(8), tv(4)));

        match layout.active_at(&track, tv(9)) {
            Some(ActiveItem::Transition { from, from_time, to, to_time, value, .. }) => {
                assert_eq!((from, to), (0, 2));
                assert_eq!(from_time, tv(9));
                // One frame before the cut reads into b's head handle
                assert_eq!(to_time, tv(49));
                assert!((value - 0.25).abs() < 1e-6);
            }
            other => panic!("expected transition, got {:?}", other),
        }
        assert!(matches!(layout.active_at(&track, tv(12)), Some(ActiveItem::Clip { clip: 2, .. })));
    }

    #[test]
    fn test_overlapping_maps_media_ranges() {
        let mut track = Track::new("a", TrackKind::Audio);
        track.push_clip(clip("a", 0, 12)).push_clip(clip("b", 240, 36));
        let layout = track.layout(24);
        // First second of the track
        let second = TimeRange::new(TimeValue::new(0, 1), TimeValue::new(1, 1));
        let parts = layout.overlapping(&track, &second);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].1, TimeRange::new(tv(0), tv(12)));
        assert_eq!(parts[1].2.start, tv(240));
        assert_eq!(parts[1].2.duration, tv(12));
    }

    #[test]
    fn test_json_round_trip_and_validation() {
        let mut timeline = Timeline::new("edit", 24);
        let mut track = Track::new("v", TrackKind::Video);
        track.push_clip(clip("a", 0, 48));
        timeline.tracks.push(track);

        let json = timeline.to_json().unwrap();
        let loaded = Timeline::from_json_str(&json).unwrap();
        assert_eq!(loaded, timeline);
        assert_eq!(loaded.time_range(), TimeRange::new(tv(0), tv(48)));

        let empty = Timeline::new("empty", 24).to_json().unwrap();
        assert!(matches!(Timeline::from_json_str(&empty), Err(TimelineError::Invalid(_))));
        assert!(matches!(Timeline::from_json_str("{"), Err(TimelineError::Parse(_))));
    }

    #[test]
    fn test_json_file_resolves_relative_media() {
        let dir = std::env::temp_dir().join("tlplay_test_timeline_json");
        std::fs::create_dir_all(&dir).unwrap();
        let json = r#"{
            "name": "cut",
            "rate": 24,
            "tracks": [{
                "kind": "Video",
                "items": [
                    {"type": "Clip", "media": "shot.test",
                     "source_range": {"start": {"value": 0, "rate": 24}, "duration": {"value": 24, "rate": 24}}},
                    {"type": "Gap", "duration": {"value": 12, "rate": 24}}
                ]
            }]
        }"#;
        let path = dir.join("cut.json");
        std::fs::write(&path, json).unwrap();

        let timeline = Timeline::from_json_file(&path).unwrap();
        assert_eq!(timeline.duration(), tv(36));
        match &timeline.tracks[0].items[0] {
            Item::Clip(c) => assert_eq!(c.media, dir.join("shot.test")),
            other => panic!("unexpected item {:?}", other),
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_from_media_uses_reader_info() {
        use crate::io::testing::{TestMedia, TestPlugin};
        use std::sync::Arc;

        let mut registry = IoRegistry::new();
        registry.register(Arc::new(TestPlugin::new("test", TestMedia::default())));
        let timeline = Timeline::from_media(Path::new("/m/clip.test"), &registry, &TimelineOptions::default()).unwrap();
        assert_eq!(timeline.rate, 24);
        assert_eq!(timeline.tracks.len(), 2);
        assert_eq!(timeline.duration(), tv(240));
        assert!(timeline.has_audio());

        let missing = Timeline::from_media(Path::new("/m/clip.mov"), &registry, &TimelineOptions::default());
        assert!(matches!(missing, Err(TimelineError::UnsupportedMedia(_))));
    }

    #[test]
    fn test_sequence_audio_base_name() {
        use crate::core::workers::Workers;
        use crate::io::Image;
        use std::sync::Arc;

        let dir = std::env::temp_dir().join("tlplay_test_seq_audio");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        for n in 1..=2 {
            Image::solid(1, 1, [0, 0, 0, 255]).save(&dir.join(format!("shot.{:04}.png", n))).unwrap();
        }
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 1000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(dir.join("shot.wav"), spec).unwrap();
        for _ in 0..1000 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let registry = IoRegistry::with_defaults(Arc::new(Workers::new(1)));
        let seq = dir.join("shot.0001.png");

        let with_audio = Timeline::from_media(&seq, &registry, &TimelineOptions::default()).unwrap();
        assert!(with_audio.has_audio());

        let options = TimelineOptions { file_sequence_audio: FileSequenceAudio::None, ..Default::default() };
        let without = Timeline::from_media(&seq, &registry, &options).unwrap();
        assert!(!without.has_audio());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
