//! Filesystem-to-database reconciliation for media collections
//!
//! This library keeps a per-root SQLite index of image and video files
//! consistent with what is on disk: it walks the root with walkdir, diffs
//! the walk against the stored snapshot, probes dimensions for new or
//! incomplete entries on a rayon pool, and commits the result atomically.

pub mod config;
pub mod db;
pub mod error;
pub mod exclusion;
pub mod models;
pub mod probe;
pub mod progress;
pub mod reconciler;
pub mod walker;

pub use config::{IndexConfig, Settings};
pub use db::MetadataStore;
pub use error::{IndexError, IndexErrorKind};
pub use exclusion::ExclusionPolicy;
pub use models::{
    ChangeSet, Dimensions, DiskEntry, MediaKind, MediaRecord, ProbedEntry, ReconcileReport,
    StoredEntry,
};
pub use probe::{DimensionProbe, MediaProber};
pub use progress::{
    ProgressEvent, ProgressLine, ProgressReporter, ReconcilePhase, ReconcileProgress,
};
pub use reconciler::{plan, CancelFlag, ReconcilePlan, Reconciler, RootLock};
pub use walker::{walk, DiskSnapshot};
