//! Reconciler - converges the metadata store to what is on disk
//!
//! A run walks the root, diffs the walk against a bulk snapshot of the store
//! using only mtimes and dimension presence, probes just the entries that
//! need it, and commits every insert, update and delete in one transaction.

use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use crate::config::IndexConfig;
use crate::db::MetadataStore;
use crate::error::{IndexError, IndexErrorKind};
use crate::models::{ChangeSet, Dimensions, DiskEntry, ProbedEntry, ReconcileReport, StoredEntry};
use crate::probe::{DimensionProbe, MediaProber};
use crate::progress::{ProgressReporter, ReconcilePhase, ReconcileProgress};
use crate::walker;

/// Shared flag that asks an in-flight run to stop before it commits
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn active_roots() -> &'static Mutex<HashSet<PathBuf>> {
    static ACTIVE: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    ACTIVE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Process-wide single-flight guard for one root
///
/// Held for the whole run; released on drop.
#[derive(Debug)]
pub struct RootLock {
    root: PathBuf,
}

impl RootLock {
    /// Claim `root`, failing if another run already holds it
    pub fn acquire(root: &Path) -> Result<Self, IndexError> {
        let mut active = active_roots().lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(root.to_path_buf()) {
            return Err(IndexError::already_running(root.to_path_buf()));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        let mut active = active_roots().lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.root);
    }
}

/// Classification of one walk against the stored snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Paths on disk the store has never seen
    pub inserts: Vec<DiskEntry>,
    /// Known paths whose mtime changed or whose dimensions are missing
    pub updates: Vec<DiskEntry>,
    /// Stored paths no longer on disk
    pub deletes: Vec<String>,
    pub unchanged: u64,
}

impl ReconcilePlan {
    /// Number of entries that must be probed
    pub fn to_probe(&self) -> usize {
        self.inserts.len() + self.updates.len()
    }

    /// Check whether the plan writes nothing
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Diff a disk walk against the stored snapshot without touching any file
pub fn plan(disk: &[DiskEntry], stored: &HashMap<String, StoredEntry>) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let mut seen: HashSet<&str> = HashSet::with_capacity(disk.len());

    for entry in disk {
        if !seen.insert(entry.path.as_str()) {
            log::warn!("Skipping duplicate disk path {:?}", entry.path);
            continue;
        }
        match stored.get(&entry.path) {
            None => plan.inserts.push(entry.clone()),
            Some(existing)
                if existing.modified_at != Some(entry.modified_at) || !existing.has_width =>
            {
                plan.updates.push(entry.clone())
            }
            Some(_) => plan.unchanged += 1,
        }
    }

    plan.deletes = stored
        .keys()
        .filter(|path| !seen.contains(path.as_str()))
        .cloned()
        .collect();
    plan.deletes.sort();
    plan
}

/// Reconciles one root at a time against its metadata store
pub struct Reconciler<P = MediaProber> {
    config: IndexConfig,
    prober: P,
    cancel: CancelFlag,
}

impl Reconciler<MediaProber> {
    /// Create a reconciler with the default prober
    pub fn new(config: IndexConfig) -> Self {
        let prober = MediaProber::from_config(&config);
        Self::with_prober(config, prober)
    }
}

impl<P: DimensionProbe> Reconciler<P> {
    /// Create a reconciler with a custom prober
    pub fn with_prober(config: IndexConfig, prober: P) -> Self {
        Self {
            config,
            prober,
            cancel: CancelFlag::new(),
        }
    }

    /// Use an externally owned cancellation flag
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that cancels runs of this reconciler
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn prober(&self) -> &P {
        &self.prober
    }

    /// Bring the store for `root` in line with the files under it
    ///
    /// Per-file problems are logged and counted in the report. Invalid roots,
    /// concurrent runs, cancellation and store failures abort the run with
    /// nothing committed.
    pub fn reconcile(&self, root: &Path) -> Result<ReconcileReport, IndexError> {
        let reporter = ProgressReporter::from_config(&self.config);
        let result = self.run(root, &reporter);
        match &result {
            Ok(report) => reporter.report_done(report),
            Err(e) => {
                log::error!("Reconciliation of {:?} failed: {}", root, e);
                reporter.report_error(e);
            }
        }
        result
    }

    fn run(&self, root: &Path, reporter: &ProgressReporter) -> Result<ReconcileReport, IndexError> {
        let start = Instant::now();
        let root = resolve_root(root)?;
        let _lock = RootLock::acquire(&root)?;

        log::info!("Syncing {:?}", root);
        reporter.report_start(&root, &self.config);

        let db_path = self.config.db_path(&root);
        let mut store = MetadataStore::open_for_root(&root, &self.config)?;

        let mut progress = ReconcileProgress::default();
        let snapshot = walker::walk_with_progress(&root, &self.config, |walked| {
            progress.files_found = walked.entries.len() as u64;
            progress.dirs_visited = walked.dirs_visited;
            progress.elapsed_ms = start.elapsed().as_millis() as u64;
            reporter.report_progress(&progress);
        });
        for error in &snapshot.errors {
            reporter.report_error(error);
        }
        self.check_cancelled(&root)?;

        let stored = store
            .load_snapshot()
            .map_err(|e| IndexError::from(e).with_path(&db_path))?;
        let plan = plan(&snapshot.entries, &stored);
        log::info!(
            "{} files on disk, {} in store: {} new, {} changed, {} stale",
            snapshot.entries.len(),
            stored.len(),
            plan.inserts.len(),
            plan.updates.len(),
            plan.deletes.len()
        );

        progress.phase = ReconcilePhase::Probe;
        progress.files_found = snapshot.entries.len() as u64;
        progress.dirs_visited = snapshot.dirs_visited;
        progress.to_probe = plan.to_probe() as u64;
        let changes = self.probe_plan(&root, &plan, reporter, &progress, start)?;
        self.check_cancelled(&root)?;

        let probe_failures = changes
            .inserts
            .iter()
            .chain(&changes.updates)
            .filter(|entry| !entry.dimensions.is_known())
            .count() as u64;

        progress.phase = ReconcilePhase::Commit;
        progress.probed = progress.to_probe;
        progress.elapsed_ms = start.elapsed().as_millis() as u64;
        reporter.report_progress(&progress);
        store
            .apply(&changes)
            .map_err(|e| IndexError::from(e).with_path(&db_path))?;
        if !changes.deletes.is_empty() {
            log::info!("Deleted {} stale entries from the database", changes.deletes.len());
        }

        let report = ReconcileReport {
            inserted: changes.inserts.len() as u64,
            updated: changes.updates.len() as u64,
            deleted: changes.deletes.len() as u64,
            unchanged: plan.unchanged,
            probe_failures,
            walk_errors: snapshot.errors.len() as u64,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        log::info!(
            "Sync complete: {} inserted, {} updated, {} deleted in {}ms",
            report.inserted,
            report.updated,
            report.deleted,
            report.duration_ms
        );
        Ok(report)
    }

    /// Probe every insert and update on a bounded pool
    fn probe_plan(
        &self,
        root: &Path,
        plan: &ReconcilePlan,
        reporter: &ProgressReporter,
        progress: &ReconcileProgress,
        start: Instant,
    ) -> Result<ChangeSet, IndexError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.effective_threads())
            .thread_name(|i| format!("probe-{}", i))
            .build()
            .map_err(|e| {
                IndexError::new(IndexErrorKind::Unknown, None, format!("cannot start probe pool: {}", e))
            })?;

        let probed = AtomicU64::new(0);
        let probe_one = |entry: &DiskEntry| {
            // Cancelled runs never commit, so skipped probes are never stored.
            let dimensions = if self.cancel.is_cancelled() {
                Dimensions::unknown()
            } else {
                self.prober.probe(&root.join(&entry.path), entry.kind)
            };

            let mut sample = progress.clone();
            sample.probed = probed.fetch_add(1, Ordering::Relaxed) + 1;
            sample.elapsed_ms = start.elapsed().as_millis() as u64;
            reporter.report_progress(&sample);

            ProbedEntry {
                path: entry.path.clone(),
                modified_at: entry.modified_at,
                dimensions,
            }
        };

        let (inserts, updates): (Vec<ProbedEntry>, Vec<ProbedEntry>) = pool.install(|| {
            (
                plan.inserts.par_iter().map(&probe_one).collect(),
                plan.updates.par_iter().map(&probe_one).collect(),
            )
        });

        Ok(ChangeSet {
            inserts,
            updates,
            deletes: plan.deletes.clone(),
        })
    }

    fn check_cancelled(&self, root: &Path) -> Result<(), IndexError> {
        if self.cancel.is_cancelled() {
            log::warn!("Reconciliation of {:?} cancelled, nothing committed", root);
            return Err(IndexError::cancelled(root.to_path_buf()));
        }
        Ok(())
    }
}

/// Canonical absolute form of a root that must be an existing directory
fn resolve_root(root: &Path) -> Result<PathBuf, IndexError> {
    let resolved = std::fs::canonicalize(root).map_err(|e| {
        IndexError::invalid_root(root.to_path_buf(), format!("cannot access root: {}", e))
    })?;
    if !resolved.is_dir() {
        return Err(IndexError::invalid_root(
            root.to_path_buf(),
            "root is not a directory",
        ));
    }
    Ok(resolved)
}
