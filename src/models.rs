//! Core data models for the media index

use serde::{Deserialize, Serialize};

/// Media kind, used to pick a probing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still images (jpg, png, svg, etc.)
    Image,
    /// Video files (mp4, webm, mov)
    Video,
}

impl MediaKind {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A supported file observed on disk during one walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskEntry {
    /// Path relative to the root, `/`-separated
    pub path: String,
    /// Filesystem mtime in milliseconds since the Unix epoch
    pub modified_at: i64,
    /// Media kind inferred from the extension
    pub kind: MediaKind,
}

impl DiskEntry {
    /// Create a new disk entry
    pub fn new(path: impl Into<String>, modified_at: i64, kind: MediaKind) -> Self {
        Self {
            path: path.into(),
            modified_at,
            kind,
        }
    }
}

/// Pixel dimensions of a media file
///
/// Width and height are either both known or both unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Dimensions {
    width: Option<u32>,
    height: Option<u32>,
}

impl Dimensions {
    /// Known dimensions; zero in either axis counts as unknown
    pub fn new(width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            return Self::unknown();
        }
        Self {
            width: Some(width),
            height: Some(height),
        }
    }

    /// Unknown dimensions
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Build from a pair of optional values, dropping partial data
    pub fn from_parts(width: Option<u32>, height: Option<u32>) -> Self {
        match (width, height) {
            (Some(w), Some(h)) => Self::new(w, h),
            _ => Self::unknown(),
        }
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    /// Whether both axes are known
    pub fn is_known(&self) -> bool {
        self.width.is_some()
    }
}

/// What the store already knows about a path, as needed for diffing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredEntry {
    /// Stored mtime; `None` for rows created before the column existed
    pub modified_at: Option<i64>,
    /// Whether the stored width is set
    pub has_width: bool,
}

/// A full row of the media table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub path: String,
    pub modified_at: Option<i64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub hidden: bool,
    pub starred: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<i64>,
}

impl MediaRecord {
    /// Stored dimensions
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::from_parts(self.width, self.height)
    }
}

/// A disk entry paired with freshly probed dimensions, ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedEntry {
    pub path: String,
    pub modified_at: i64,
    pub dimensions: Dimensions,
}

/// All writes of one reconciliation, applied in a single transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub inserts: Vec<ProbedEntry>,
    pub updates: Vec<ProbedEntry>,
    pub deletes: Vec<String>,
}

impl ChangeSet {
    /// Check whether there is nothing to write
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Outcome of a reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Records created for newly observed files
    pub inserted: u64,
    /// Records whose mtime changed or whose dimensions were missing
    pub updated: u64,
    /// Records removed because their file is gone
    pub deleted: u64,
    /// Records left untouched
    pub unchanged: u64,
    /// Probed files whose dimensions could not be read
    pub probe_failures: u64,
    /// Directories or files skipped during the walk
    pub walk_errors: u64,
    /// Total duration in milliseconds
    pub duration_ms: u64,
}

impl ReconcileReport {
    /// Number of rows written
    pub fn total_changes(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }

    /// Check whether the run wrote nothing
    pub fn is_noop(&self) -> bool {
        self.total_changes() == 0
    }
}
