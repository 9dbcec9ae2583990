//! Plugin registry: maps file extensions to readers and writers
//!
//! An explicit instance is passed to the timeline and the player; there is
//! no process-wide registry. Lookup is by case-insensitive extension, and
//! the first registered plugin claiming an extension wins.

use log::{debug, warn};
use std::path::Path;
use std::sync::Arc;

use super::image_seq::ImagePlugin;
use super::wav::WavPlugin;
use super::{IoInfo, IoOptions, IoPlugin, IoRead, IoWrite, extension_of};
use crate::core::workers::Workers;

#[derive(Default)]
pub struct IoRegistry {
    plugins: Vec<Arc<dyn IoPlugin>>,
}

impl IoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled image and WAV plugins.
    pub fn with_defaults(workers: Arc<Workers>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ImagePlugin::new(Arc::clone(&workers))));
        registry.register(Arc::new(WavPlugin::new(workers)));
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn IoPlugin>) {
        debug!("Registered IO plugin '{}': {:?}", plugin.name(), plugin.extensions());
        self.plugins.push(plugin);
    }

    pub fn plugins(&self) -> &[Arc<dyn IoPlugin>] {
        &self.plugins
    }

    /// Plugin for `path`, or `None` for an unknown extension.
    pub fn plugin(&self, path: &Path) -> Option<Arc<dyn IoPlugin>> {
        let ext = extension_of(path)?;
        self.plugins
            .iter()
            .find(|p| p.extensions().iter().any(|e| e.eq_ignore_ascii_case(&ext)))
            .cloned()
    }

    /// Every extension any plugin handles.
    pub fn extensions(&self) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = Vec::new();
        for ext in self.plugins.iter().flat_map(|p| p.extensions().iter().copied()) {
            if !out.contains(&ext) {
                out.push(ext);
            }
        }
        out
    }

    /// Open a reader. Unsupported or unreadable media yields `None`; the
    /// caller skips the clip.
    pub fn read(&self, path: &Path, options: &IoOptions) -> Option<Arc<dyn IoRead>> {
        let Some(plugin) = self.plugin(path) else {
            warn!("Unsupported media (no plugin): {}", path.display());
            return None;
        };
        match plugin.read(path, options) {
            Ok(reader) => Some(reader),
            Err(e) => {
                warn!("{} failed to open {}: {}", plugin.name(), path.display(), e);
                None
            }
        }
    }

    pub fn write(&self, path: &Path, info: &IoInfo, options: &IoOptions) -> Option<Box<dyn IoWrite>> {
        let Some(plugin) = self.plugin(path) else {
            warn!("Unsupported output (no plugin): {}", path.display());
            return None;
        };
        match plugin.write(path, info, options) {
            Ok(writer) => Some(writer),
            Err(e) => {
                warn!("{} failed to create {}: {}", plugin.name(), path.display(), e);
                None
            }
        }
    }
}

impl std::fmt::Debug for IoRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoRegistry")
            .field("plugins", &self.plugins.iter().map(|p| p.name().to_string()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::testing::{TestMedia, TestPlugin};
    use std::path::PathBuf;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut registry = IoRegistry::new();
        registry.register(Arc::new(TestPlugin::new("first", TestMedia::default())));
        assert!(registry.plugin(Path::new("/a/clip.TEST")).is_some());
        assert!(registry.plugin(Path::new("/a/clip.mov")).is_none());
        assert!(registry.plugin(Path::new("/a/clip")).is_none());
    }

    #[test]
    fn test_first_registration_wins() {
        let mut registry = IoRegistry::new();
        registry.register(Arc::new(TestPlugin::new("first", TestMedia::default())));
        registry.register(Arc::new(TestPlugin::new("second", TestMedia::default())));
        let plugin = registry.plugin(Path::new("x.test")).unwrap();
        assert_eq!(plugin.name(), "first");
        assert_eq!(registry.extensions(), vec!["test"]);
    }

    #[test]
    fn test_unknown_extension_reads_none() {
        let registry = IoRegistry::with_defaults(Arc::new(Workers::new(1)));
        assert!(registry.read(&PathBuf::from("/a/clip.xyz"), &IoOptions::new()).is_none());
        assert!(registry.plugin(Path::new("/a/b.EXR")).is_some());
        assert!(registry.plugin(Path::new("/a/b.wav")).is_some());
    }
}
