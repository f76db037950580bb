//! Configuration for the media index

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::IndexError;
use crate::models::MediaKind;

/// Marker file that excludes its directory from scanning
pub const DEFAULT_IGNORE_MARKER: &str = ".visionsignore";

/// Per-root directory holding the index database
pub const DEFAULT_STATE_DIR: &str = ".visions";

/// Database file name inside the state directory
pub const DEFAULT_DB_FILE: &str = "metadata.db";

/// Default per-probe timeout (10 seconds)
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 10_000;

/// Default interval between progress messages
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;

/// Configuration for a reconciliation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Image extensions (lowercase, without dot)
    pub image_extensions: HashSet<String>,

    /// Video extensions (lowercase, without dot)
    pub video_extensions: HashSet<String>,

    /// Name of the marker file that excludes a directory subtree
    pub ignore_marker: String,

    /// Name of the reserved per-root state directory
    /// Never scanned, regardless of markers
    pub state_dir: String,

    /// Database file name inside the state directory
    pub db_file: String,

    /// Whether to follow symbolic links while walking
    pub follow_links: bool,

    /// Number of probing threads
    /// 0 means auto-detect (CPU cores)
    pub num_threads: usize,

    /// Upper bound for a single dimension probe, in milliseconds
    pub probe_timeout_ms: u64,

    /// ffprobe executable used for video dimensions
    pub ffprobe_path: PathBuf,

    /// Whether to emit JSON progress lines on stderr
    pub show_progress: bool,

    /// Minimum interval between progress lines
    pub progress_interval_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            image_extensions: Self::default_image_extensions(),
            video_extensions: Self::default_video_extensions(),
            ignore_marker: DEFAULT_IGNORE_MARKER.to_string(),
            state_dir: DEFAULT_STATE_DIR.to_string(),
            db_file: DEFAULT_DB_FILE.to_string(),
            follow_links: false,
            num_threads: 0,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            ffprobe_path: PathBuf::from("ffprobe"),
            show_progress: false,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl IndexConfig {
    /// Create a config builder
    pub fn builder() -> IndexConfigBuilder {
        IndexConfigBuilder::new()
    }

    /// Get the default image extensions
    pub fn default_image_extensions() -> HashSet<String> {
        ["jpg", "jpeg", "png", "gif", "webp", "svg", "bmp"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Get the default video extensions
    pub fn default_video_extensions() -> HashSet<String> {
        ["mp4", "webm", "mov"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Classify an extension, or `None` when it is not on either allow-list
    pub fn media_kind(&self, ext: &str) -> Option<MediaKind> {
        let ext = ext.to_lowercase();
        if self.image_extensions.contains(&ext) {
            Some(MediaKind::Image)
        } else if self.video_extensions.contains(&ext) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    /// Get the effective number of probing threads
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.num_threads
        }
    }

    /// Per-probe timeout as a `Duration`
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(1))
    }

    /// Location of the index database for a root
    pub fn db_path(&self, root: &Path) -> PathBuf {
        root.join(&self.state_dir).join(&self.db_file)
    }
}

/// Builder for IndexConfig
#[derive(Debug, Default)]
pub struct IndexConfigBuilder {
    config: IndexConfig,
}

impl IndexConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the image extensions
    pub fn image_extensions(mut self, extensions: HashSet<String>) -> Self {
        self.config.image_extensions = extensions;
        self
    }

    /// Set the video extensions
    pub fn video_extensions(mut self, extensions: HashSet<String>) -> Self {
        self.config.video_extensions = extensions;
        self
    }

    /// Set the exclusion marker file name
    pub fn ignore_marker(mut self, marker: impl Into<String>) -> Self {
        self.config.ignore_marker = marker.into();
        self
    }

    /// Set the reserved state directory name
    pub fn state_dir(mut self, name: impl Into<String>) -> Self {
        self.config.state_dir = name.into();
        self
    }

    /// Enable or disable symlink following
    pub fn follow_links(mut self, enabled: bool) -> Self {
        self.config.follow_links = enabled;
        self
    }

    /// Set the number of probing threads
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.num_threads = threads;
        self
    }

    /// Set the per-probe timeout in milliseconds
    pub fn probe_timeout_ms(mut self, ms: u64) -> Self {
        self.config.probe_timeout_ms = ms;
        self
    }

    /// Set the ffprobe executable
    pub fn ffprobe_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ffprobe_path = path.into();
        self
    }

    /// Enable or disable progress output
    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.config.show_progress = enabled;
        self
    }

    /// Build the config
    pub fn build(self) -> IndexConfig {
        self.config
    }
}

/// Host application settings (`settings.json`)
///
/// Only the gallery root is read here; every other key is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Gallery root directory
    #[serde(rename = "imagePath", default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
}

impl Settings {
    /// Default settings file location: `$USER_DATA_PATH/settings.json`, else `./settings.json`
    pub fn default_path() -> PathBuf {
        std::env::var_os("USER_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("settings.json")
    }

    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IndexError::config_error(Some(path.to_path_buf()), format!("cannot read settings: {}", e))
        })?;
        serde_json::from_str(&content).map_err(|e| IndexError::from(e).with_path(path))
    }

    /// Resolve the configured root, failing when none is set
    pub fn root(&self) -> Result<PathBuf, IndexError> {
        self.image_path
            .clone()
            .ok_or_else(|| IndexError::config_error(None, "Image path is not configured"))
    }
}
