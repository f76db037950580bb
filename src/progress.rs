//! JSON-lines progress for reconciliation runs
//!
//! When enabled, every event is written to stderr as a single JSON object
//! carrying a `_t` tag, a sequence number and a timestamp relative to the
//! start of the run:
//!
//! ```text
//! {"seq":0,"ts":0,"_t":"start","root":"/photos","follow_links":false,"threads":8,"probe_timeout_ms":10000}
//! {"seq":1,"ts":512,"_t":"p","phase":"walk","f":1200,"d":40,"pd":0,"pt":0,"ms":512}
//! {"seq":2,"ts":530,"_t":"err","error_type":"PermissionDenied","message":"...","path":"/photos/private"}
//! {"seq":3,"ts":2210,"_t":"done","ins":12,"upd":1,"del":0,"unc":1187,"pf":0,"ec":1,"ms":2210}
//! ```

use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::models::ReconcileReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilePhase {
    #[default]
    Walk,
    Probe,
    Commit,
    Done,
}

impl ReconcilePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcilePhase::Walk => "walk",
            ReconcilePhase::Probe => "probe",
            ReconcilePhase::Commit => "commit",
            ReconcilePhase::Done => "done",
        }
    }
}

/// Counters sampled while a run is in flight
#[derive(Debug, Clone, Default)]
pub struct ReconcileProgress {
    pub phase: ReconcilePhase,
    /// Supported files found so far
    pub files_found: u64,
    pub dirs_visited: u64,
    pub probed: u64,
    /// Entries this run has to probe
    pub to_probe: u64,
    pub elapsed_ms: u64,
}

/// Payload of one progress line, tagged by `_t`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "_t")]
pub enum ProgressEvent {
    #[serde(rename = "start")]
    Start {
        root: String,
        follow_links: bool,
        threads: usize,
        probe_timeout_ms: u64,
    },
    #[serde(rename = "p")]
    Progress {
        phase: ReconcilePhase,
        #[serde(rename = "f")]
        files: u64,
        #[serde(rename = "d")]
        dirs: u64,
        #[serde(rename = "pd")]
        probed: u64,
        #[serde(rename = "pt")]
        to_probe: u64,
        ms: u64,
    },
    #[serde(rename = "err")]
    Error {
        error_type: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    #[serde(rename = "done")]
    Done {
        #[serde(rename = "ins")]
        inserted: u64,
        #[serde(rename = "upd")]
        updated: u64,
        #[serde(rename = "del")]
        deleted: u64,
        #[serde(rename = "unc")]
        unchanged: u64,
        #[serde(rename = "pf")]
        probe_failures: u64,
        #[serde(rename = "ec")]
        error_count: u64,
        ms: u64,
    },
}

impl ProgressEvent {
    pub fn start(root: &Path, config: &IndexConfig) -> Self {
        ProgressEvent::Start {
            root: root.to_string_lossy().into_owned(),
            follow_links: config.follow_links,
            threads: config.effective_threads(),
            probe_timeout_ms: config.probe_timeout_ms,
        }
    }

    pub fn progress(progress: &ReconcileProgress) -> Self {
        ProgressEvent::Progress {
            phase: progress.phase,
            files: progress.files_found,
            dirs: progress.dirs_visited,
            probed: progress.probed,
            to_probe: progress.to_probe,
            ms: progress.elapsed_ms,
        }
    }

    pub fn error(error: &IndexError) -> Self {
        ProgressEvent::Error {
            error_type: format!("{:?}", error.kind),
            message: error.message.clone(),
            path: error.path.as_ref().map(|p| p.to_string_lossy().into_owned()),
        }
    }

    pub fn done(report: &ReconcileReport) -> Self {
        ProgressEvent::Done {
            inserted: report.inserted,
            updated: report.updated,
            deleted: report.deleted,
            unchanged: report.unchanged,
            probe_failures: report.probe_failures,
            error_count: report.walk_errors,
            ms: report.duration_ms,
        }
    }
}

/// One line on the wire: sequence, timestamp and the flattened event
#[derive(Debug, Clone, Serialize)]
pub struct ProgressLine {
    pub seq: u64,
    /// Milliseconds since the reporter was created
    pub ts: u64,
    #[serde(flatten)]
    pub event: ProgressEvent,
}

/// Writes progress lines to stderr; shared by the probing threads
pub struct ProgressReporter {
    enabled: bool,
    interval_ms: u64,
    last_report: Mutex<Instant>,
    seq: AtomicU64,
    started: Instant,
}

impl ProgressReporter {
    /// `interval_ms` throttles `p` lines only; other events always go out.
    pub fn new(enabled: bool, interval_ms: u64) -> Self {
        let now = Instant::now();
        Self {
            enabled,
            interval_ms,
            last_report: Mutex::new(now),
            seq: AtomicU64::new(0),
            started: now,
        }
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(config.show_progress, config.progress_interval_ms)
    }

    pub fn disabled() -> Self {
        Self::new(false, 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stamp an event with the next sequence number
    pub fn line(&self, event: ProgressEvent) -> ProgressLine {
        ProgressLine {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            ts: self.started.elapsed().as_millis() as u64,
            event,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        let line = self.line(event);
        match serde_json::to_string(&line) {
            Ok(json) => {
                let mut stderr = std::io::stderr().lock();
                let _ = writeln!(stderr, "{}", json);
                let _ = stderr.flush();
            }
            Err(e) => log::debug!("Dropping progress line: {}", e),
        }
    }

    pub fn report_start(&self, root: &Path, config: &IndexConfig) {
        if self.enabled {
            self.emit(ProgressEvent::start(root, config));
        }
    }

    /// Report counters, at most once per interval
    ///
    /// Returns true if a line was written.
    pub fn report_progress(&self, progress: &ReconcileProgress) -> bool {
        if !self.enabled {
            return false;
        }

        {
            let mut last = self.last_report.lock().unwrap_or_else(|e| e.into_inner());
            if (last.elapsed().as_millis() as u64) < self.interval_ms {
                return false;
            }
            *last = Instant::now();
        }

        self.emit(ProgressEvent::progress(progress));
        true
    }

    pub fn report_error(&self, error: &IndexError) {
        if self.enabled {
            self.emit(ProgressEvent::error(error));
        }
    }

    pub fn report_done(&self, report: &ReconcileReport) {
        if self.enabled {
            self.emit(ProgressEvent::done(report));
        }
    }
}
