//! Tree walker - enumerates supported media files under a root

use std::path::{Component, Path};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::exclusion::ExclusionPolicy;
use crate::models::DiskEntry;

/// Everything one walk observed
#[derive(Debug, Default)]
pub struct DiskSnapshot {
    /// Supported files found on disk, in no particular order
    pub entries: Vec<DiskEntry>,
    /// Directories and files that had to be skipped
    pub errors: Vec<IndexError>,
    /// Number of directories descended into
    pub dirs_visited: u64,
}

/// Walk `root` and collect every supported media file
pub fn walk(root: &Path, config: &IndexConfig) -> DiskSnapshot {
    walk_with_progress(root, config, |_| {})
}

/// Walk `root`, calling `on_dir` each time a directory is entered
///
/// Traversal uses walkdir's explicit stack, so deep trees cannot exhaust the
/// call stack. Excluded and reserved directories are pruned before their
/// children are read. A failure on one directory or file is logged and only
/// removes that part of the tree from the snapshot.
pub fn walk_with_progress<F>(root: &Path, config: &IndexConfig, mut on_dir: F) -> DiskSnapshot
where
    F: FnMut(&DiskSnapshot),
{
    let mut snapshot = DiskSnapshot::default();

    if !root.is_dir() {
        log::warn!("Walk root {:?} is not a directory", root);
        snapshot.errors.push(IndexError::not_found(root.to_path_buf()));
        return snapshot;
    }

    let policy = ExclusionPolicy::from_config(config);
    let walker = WalkDir::new(root)
        .follow_links(config.follow_links)
        .into_iter()
        .filter_entry(|entry| {
            if !entry.file_type().is_dir() {
                return true;
            }
            let name = if entry.depth() == 0 {
                None
            } else {
                entry.file_name().to_str()
            };
            policy.should_descend(entry.path(), name)
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping unreadable path: {}", e);
                snapshot.errors.push(IndexError::from(e));
                continue;
            }
        };

        if entry.file_type().is_dir() {
            snapshot.dirs_visited += 1;
            on_dir(&snapshot);
            continue;
        }

        // Symlinks only reach here when follow_links is off.
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(kind) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| config.media_kind(e))
        else {
            continue;
        };

        let relative = match relative_path(root, path) {
            Ok(relative) => relative,
            Err(e) => {
                log::warn!("Skipping {:?}: {}", path, e.message);
                snapshot.errors.push(e);
                continue;
            }
        };

        let modified = entry
            .metadata()
            .map_err(IndexError::from)
            .and_then(|m| m.modified().map_err(IndexError::from));
        match modified {
            Ok(mtime) => {
                snapshot
                    .entries
                    .push(DiskEntry::new(relative, system_time_to_millis(mtime), kind));
            }
            Err(e) => {
                log::warn!("Cannot read mtime of {:?}: {}", path, e.message);
                snapshot.errors.push(e.with_path(path));
            }
        }
    }

    log::debug!(
        "Walked {:?}: {} files in {} dirs, {} errors",
        root,
        snapshot.entries.len(),
        snapshot.dirs_visited,
        snapshot.errors.len()
    );
    snapshot
}

/// Root-relative, `/`-separated form of `path`
pub fn relative_path(root: &Path, path: &Path) -> Result<String, IndexError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| IndexError::invalid_path(path.to_path_buf(), "path is outside the root"))?;

    // Only real separators split the key; a backslash is a legal Unix name byte.
    let mut parts = Vec::new();
    for component in relative.components() {
        let Component::Normal(name) = component else {
            return Err(IndexError::invalid_path(
                path.to_path_buf(),
                "path has non-normal components",
            ));
        };
        let name = name
            .to_str()
            .ok_or_else(|| IndexError::invalid_path(path.to_path_buf(), "path is not valid UTF-8"))?;
        parts.push(name);
    }
    Ok(parts.join("/"))
}

/// Milliseconds since the Unix epoch; negative for times before it
pub fn system_time_to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}
