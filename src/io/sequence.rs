//! Numbered file sequence detection
//!
//! `/path/shot.0001.exr` is split into prefix `/path/shot.`, number 1,
//! extension `exr` and padding 4. `FileSequence::scan` globs the siblings
//! and records the frame range.

use log::debug;
use std::path::{Path, PathBuf};

use super::{IoError, IoResult};

/// One file name split into its sequence parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencePath {
    pub prefix: String,
    pub number: i64,
    pub ext: String,
    pub padding: usize,
}

/// Split a sequence filename into (prefix, number, ext, padding).
///
/// Returns `None` when the stem has no trailing digits.
pub fn split_sequence_path(path: &Path) -> Option<SequencePath> {
    let ext = path.extension().and_then(|s| s.to_str())?.to_string();
    let stem = path.file_stem().and_then(|s| s.to_str())?;

    let digit_start = stem
        .char_indices()
        .rev()
        .take_while(|(_, ch)| ch.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;

    let number_str = &stem[digit_start..];
    let number = number_str.parse::<i64>().ok()?;

    let mut prefix = String::new();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        prefix.push_str(&parent.to_string_lossy());
        if !prefix.ends_with(std::path::MAIN_SEPARATOR) {
            prefix.push(std::path::MAIN_SEPARATOR);
        }
    }
    prefix.push_str(&stem[..digit_start]);

    Some(SequencePath { prefix, number, ext, padding: number_str.len() })
}

/// A numbered sequence found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSequence {
    pub prefix: String,
    pub ext: String,
    pub padding: usize,
    pub first: i64,
    pub last: i64,
}

impl FileSequence {
    /// Find every sibling of `path` sharing its prefix and extension.
    pub fn scan(path: &Path) -> IoResult<Self> {
        let split = split_sequence_path(path)
            .ok_or_else(|| IoError::NoData(format!("{}: not a numbered file", path.display())))?;

        let pattern = format!("{}*.{}", glob::Pattern::escape(&split.prefix), split.ext);
        let entries = glob::glob(&pattern)
            .map_err(|e| IoError::Decode(format!("Glob error for pattern {}: {}", pattern, e)))?;

        let (mut first, mut last) = (split.number, split.number);
        let mut count = 0usize;
        for entry in entries.flatten() {
            let Some(other) = split_sequence_path(&entry) else { continue };
            if other.prefix != split.prefix || other.ext != split.ext {
                continue;
            }
            first = first.min(other.number);
            last = last.max(other.number);
            count += 1;
        }

        debug!(
            "Sequence {}#.{}: frames {}..={} ({} files)",
            split.prefix, split.ext, first, last, count
        );

        Ok(Self { prefix: split.prefix, ext: split.ext, padding: split.padding, first, last })
    }

    pub fn frame_count(&self) -> i64 {
        self.last - self.first + 1
    }

    /// Path of frame `number`, using the detected padding.
    pub fn frame_path(&self, number: i64) -> PathBuf {
        PathBuf::from(format!(
            "{}{:0width$}.{}",
            self.prefix,
            number,
            self.ext,
            width = self.padding
        ))
    }

    /// Prefix without trailing separator characters (`shot.` -> `shot`).
    pub fn base_name(&self) -> &str {
        self.prefix.trim_end_matches(['.', '_', '-', ' '])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sequence_path() {
        let split = split_sequence_path(Path::new("/tmp/seq.0012.exr")).unwrap();
        assert_eq!(split.prefix, format!("/tmp{}seq.", std::path::MAIN_SEPARATOR));
        assert_eq!(split.number, 12);
        assert_eq!(split.ext, "exr");
        assert_eq!(split.padding, 4);

        assert!(split_sequence_path(Path::new("/tmp/still.png")).is_none());
        assert!(split_sequence_path(Path::new("/tmp/noext")).is_none());
    }

    #[test]
    fn test_scan_and_frame_path() {
        let dir = std::env::temp_dir().join("tlplay_test_sequence");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        for n in [3, 4, 5, 7] {
            std::fs::write(dir.join(format!("shot_{:03}.png", n)), b"x").unwrap();
        }
        std::fs::write(dir.join("other_001.png"), b"x").unwrap();

        let seq = FileSequence::scan(&dir.join("shot_004.png")).unwrap();
        assert_eq!((seq.first, seq.last), (3, 7));
        assert_eq!(seq.frame_count(), 5);
        assert_eq!(seq.frame_path(5), dir.join("shot_005.png"));
        assert!(seq.base_name().ends_with("shot"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
