//! Settings file and application paths
//!
//! Directory priority:
//! 1. CLI `--config-dir`
//! 2. `TLPLAY_CONFIG_DIR` environment variable
//! 3. Current folder, if it already holds a tlplay file
//! 4. Platform directory from dirs-next
//!
//! Platform paths:
//! - Linux: ~/.config/tlplay/{name} (data: ~/.local/share/tlplay/{name})
//! - macOS: ~/Library/Application Support/tlplay/{name}
//! - Windows: %APPDATA%\tlplay\{name}

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::player::PlayerOptions;
use crate::timeline::TimelineOptions;

pub const APP_DIR: &str = "tlplay";
pub const SETTINGS_FILE: &str = "tlplay.json";
pub const LOG_FILE: &str = "tlplay.log";
const ENV_CONFIG_DIR: &str = "TLPLAY_CONFIG_DIR";

/// Overrides for the default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// CLI value first, then `TLPLAY_CONFIG_DIR`.
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(ENV_CONFIG_DIR).ok().map(PathBuf::from));
        Self { config_dir }
    }

    pub fn config_file(&self, name: &str) -> PathBuf {
        self.config_dir().join(name)
    }

    /// Logs and other generated files.
    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir().join(name)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let config_dir = self.config_dir();
        let data_dir = self.data_dir();
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
        if data_dir != config_dir {
            std::fs::create_dir_all(&data_dir)
                .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        }
        Ok(())
    }

    fn config_dir(&self) -> PathBuf {
        self.resolve(dirs_next::config_dir)
    }

    fn data_dir(&self) -> PathBuf {
        self.resolve(dirs_next::data_dir)
    }

    fn resolve(&self, platform: fn() -> Option<PathBuf>) -> PathBuf {
        if let Some(dir) = &self.config_dir {
            return dir.clone();
        }
        if let Ok(current) = std::env::current_dir()
            && has_local_files(&current)
        {
            return current;
        }
        platform().map(|d| d.join(APP_DIR)).unwrap_or_else(|| PathBuf::from("."))
    }
}

fn has_local_files(dir: &Path) -> bool {
    [SETTINGS_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}

/// Everything persisted in `tlplay.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub timeline: TimelineOptions,
    pub player: PlayerOptions,
    /// Decode threads (0 = three quarters of the cores)
    pub workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self { timeline: TimelineOptions::default(), player: PlayerOptions::default(), workers: 0 }
    }
}

impl Settings {
    /// Load from a file; a missing file gives defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write settings: {}", path.display()))?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Worker thread count with 0 resolved from the core count.
    pub fn worker_threads(&self) -> usize {
        if self.workers == 0 { (num_cpus::get() * 3 / 4).max(1) } else { self.workers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_custom_dir_wins() {
        let config = PathConfig { config_dir: Some(PathBuf::from("/custom")) };
        assert_eq!(config.config_file("a.json"), PathBuf::from("/custom/a.json"));
        assert_eq!(config.data_file(LOG_FILE), PathBuf::from("/custom/tlplay.log"));
    }

    #[test]
    fn test_platform_default_names_app_dir() {
        let config = PathConfig::default();
        let path = config.config_file(SETTINGS_FILE);
        assert!(path.ends_with(SETTINGS_FILE));
    }

    #[test]
    fn test_settings_round_trip_and_partial_file() {
        let dir = std::env::temp_dir().join("tlplay_test_settings");
        let _ = fs::create_dir_all(&dir);
        let path = dir.join(SETTINGS_FILE);

        let missing = Settings::load(&dir.join("missing.json")).unwrap();
        assert_eq!(missing, Settings::default());

        let mut settings = Settings::default();
        settings.player.cache.read_ahead = 4.0;
        settings.workers = 3;
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);

        // Unlisted fields fall back to defaults
        fs::write(&path, r#"{ "player": { "cache": { "video_mb": 64 } } }"#).unwrap();
        let partial = Settings::load(&path).unwrap();
        assert_eq!(partial.player.cache.video_mb, 64);
        assert_eq!(partial.player.cache.read_behind, 0.5);
        assert_eq!(partial.player.video_request_count, 16);
        assert!(partial.worker_threads() >= 1);

        fs::write(&path, "not json").unwrap();
        assert!(Settings::load(&path).is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
