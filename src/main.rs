//! Media Index CLI
//!
//! Brings a gallery root's metadata database in line with the files on disk.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::info;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use media_index::{IndexConfig, IndexError, MetadataStore, Reconciler, Settings};

const ABOUT: &str = r#"
Media Index - keeps a gallery's metadata database in sync with disk

Examples:
  media_index reconcile -r /path/to/gallery        sync one gallery root
  media_index reconcile                            use imagePath from settings.json
  media_index reconcile -r /gallery --progress     JSON progress lines on stderr
  media_index status -r /gallery --json            summary of the stored index

Place an empty .visionsignore file in a directory to exclude it.
"#;

/// Gallery metadata index
#[derive(Parser)]
#[command(name = "media_index")]
#[command(author, version, about = ABOUT, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the index with the files under the root
    Reconcile {
        /// Gallery root (defaults to imagePath from the settings file)
        #[arg(short = 'r', long)]
        root: Option<PathBuf>,

        /// Settings file to read the root from
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Probing threads (0 = auto-detect)
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,

        /// Upper bound for a single dimension probe
        #[arg(long, default_value_t = media_index::config::DEFAULT_PROBE_TIMEOUT_MS)]
        probe_timeout_ms: u64,

        /// ffprobe executable used for videos
        #[arg(long, default_value = "ffprobe")]
        ffprobe: PathBuf,

        /// Follow symbolic links while walking
        #[arg(long)]
        follow_links: bool,

        /// Emit JSON progress lines on stderr
        #[arg(long)]
        progress: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Summarize the stored index without touching it
    Status {
        /// Gallery root (defaults to imagePath from the settings file)
        #[arg(short = 'r', long)]
        root: Option<PathBuf>,

        /// Settings file to read the root from
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let result = match Cli::parse().command {
        Commands::Reconcile {
            root,
            settings,
            threads,
            probe_timeout_ms,
            ffprobe,
            follow_links,
            progress,
            json,
        } => resolve_root(root, settings).and_then(|root| {
            let config = IndexConfig::builder()
                .num_threads(threads)
                .probe_timeout_ms(probe_timeout_ms)
                .ffprobe_path(ffprobe)
                .follow_links(follow_links)
                .show_progress(progress)
                .build();
            run_reconcile(&root, config, json)
        }),
        Commands::Status {
            root,
            settings,
            json,
        } => resolve_root(root, settings).and_then(|root| run_status(&root, json)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Failed: {}", e.message);
            ExitCode::FAILURE
        }
    }
}

fn resolve_root(root: Option<PathBuf>, settings: Option<PathBuf>) -> Result<PathBuf, IndexError> {
    if let Some(root) = root {
        return Ok(root);
    }
    let settings_path = settings.unwrap_or_else(Settings::default_path);
    info!("Reading gallery root from {:?}", settings_path);
    Settings::load(&settings_path)?.root()
}

fn run_reconcile(root: &Path, config: IndexConfig, json: bool) -> Result<(), IndexError> {
    info!("Root: {:?}", root);
    info!("Threads: {}", config.effective_threads());
    info!("Probe timeout: {}ms", config.probe_timeout_ms);

    let report = Reconciler::new(config).reconcile(root)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_noop() {
        println!("Index already up to date ({} files)", report.unchanged);
    } else {
        println!("Sync completed: {} changes", report.total_changes());
        println!("  Inserted: {}", report.inserted);
        println!("  Updated: {}", report.updated);
        println!("  Deleted: {}", report.deleted);
        println!("  Unchanged: {}", report.unchanged);
        println!("  Without dimensions: {}", report.probe_failures);
        println!("  Skipped paths: {}", report.walk_errors);
        println!("  Duration: {}ms", report.duration_ms);
    }
    Ok(())
}

fn run_status(root: &Path, json: bool) -> Result<(), IndexError> {
    let db_path = IndexConfig::default().db_path(root);
    if !db_path.exists() {
        return Err(IndexError::not_found(db_path));
    }

    let store = MetadataStore::open_read_only(&db_path)
        .map_err(|e| IndexError::from(e).with_path(&db_path))?;
    let total = store.file_count()?;
    let missing = store.missing_dimensions_count()?;
    let latest = store
        .latest_modified_at()?
        .and_then(chrono::DateTime::from_timestamp_millis);

    if json {
        let summary = serde_json::json!({
            "root": root.to_string_lossy(),
            "files": total,
            "missing_dimensions": missing,
            "latest_modified": latest.map(|t| t.to_rfc3339()),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Index for {}:", root.display());
        println!("  Files: {}", total);
        println!("  Missing dimensions: {}", missing);
        match latest {
            Some(t) => println!("  Latest modification: {}", t.format("%Y-%m-%d %H:%M:%S UTC")),
            None => println!("  Latest modification: -"),
        }
    }
    Ok(())
}
