//! Experiment registry
//!
//! A lock-protected `index.tsv` under the log root records every run's
//! configuration. Registering a run checks the index for a run with the same
//! configuration, prepares `<log_root>/<experiment_name>/`, persists the
//! configuration and a copy of the training script, and appends the record.
//!
//! Every confirmation happens before anything is written, so declining leaves
//! both the index and the run directory untouched.

pub mod index;
pub mod lock;
pub mod maintenance;
pub mod query;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::config::{Configuration, Settings};
use crate::decision::Decision;
use crate::error::{Error, Result};
use crate::utils::{io::ensure_dir_exists, path_stamp_now, timestamp_now};

pub use index::{ExperimentIndex, Row, TIME_RAN_COLUMN};
pub use lock::IndexLock;
pub use maintenance::maintenance_args;
pub use query::{Predicate, Query, QueryError};

/// Index file name under the log root
pub const INDEX_FILE: &str = "index.tsv";
/// Persisted configuration sidecar inside a run directory
pub const CONFIG_FILE: &str = "experiment_config.json";
/// Base name of the copied training script
pub const SCRIPT_COPY_STEM: &str = "training_script";
/// Marker in training-curve event file names
pub const EVENT_FILE_MARKER: &str = "events.out.tfevents";

/// Directory name for an experiment: lowercase, spaces become underscores
pub fn normalise_experiment_name(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}

/// Configuration with the script's maintenance arguments removed
pub fn filter_maintenance(config: &Configuration, script_source: &str) -> Configuration {
    let maintenance = maintenance_args(script_source);
    if !maintenance.is_empty() {
        debug!("Excluding maintenance args: {:?}", maintenance);
    }
    config.without_keys(&maintenance)
}

/// A prepared run directory
#[derive(Debug, Clone, PartialEq)]
pub struct RunDirectory {
    /// Normalised experiment name
    pub experiment_name: String,
    /// `<log_root>/<experiment_name>`
    pub path: PathBuf,
    /// Configuration as recorded in the index
    pub config: Configuration,
}

/// File-backed index of past runs
#[derive(Debug, Clone)]
pub struct ExperimentRegistry {
    log_root: PathBuf,
    lock_timeout: Duration,
    archive_event_files: bool,
}

impl ExperimentRegistry {
    /// Registry rooted at `log_root`
    pub fn new(log_root: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            log_root: log_root.into(),
            lock_timeout,
            archive_event_files: true,
        }
    }

    /// Registry configured from run settings
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.log_root.clone(),
            Duration::from_secs(settings.lock_timeout_secs),
        )
        .with_event_archiving(settings.archive_event_files)
    }

    /// Whether to offer archiving event files when overwriting a run directory
    pub fn with_event_archiving(mut self, enabled: bool) -> Self {
        self.archive_event_files = enabled;
        self
    }

    /// Root holding the index and run directories
    pub fn log_root(&self) -> &Path {
        &self.log_root
    }

    /// Path of `index.tsv`
    pub fn index_path(&self) -> PathBuf {
        self.log_root.join(INDEX_FILE)
    }

    /// Path of the advisory lock file
    pub fn lock_path(&self) -> PathBuf {
        self.log_root.join(format!("{INDEX_FILE}.lock"))
    }

    /// Run directory for a normalised experiment name
    pub fn run_dir(&self, experiment_name: &str) -> PathBuf {
        self.log_root.join(experiment_name)
    }

    /// Snapshot of the index, read under the lock. A log root that does not
    /// exist yet has an empty index.
    pub fn read_index(&self) -> Result<ExperimentIndex> {
        if !self.log_root.is_dir() {
            debug!("No log root at {}", self.log_root.display());
            return Ok(ExperimentIndex::empty());
        }
        let _lock = IndexLock::acquire(self.lock_path(), self.lock_timeout)?;
        ExperimentIndex::load_or_empty(self.index_path())
    }

    /// Record a new run and prepare its directory.
    ///
    /// `script` is the training program's source file: it supplies the
    /// maintenance-argument region and is copied into the run directory.
    #[instrument(skip(self, config, decision), fields(log_root = %self.log_root.display()))]
    pub fn register(
        &self,
        config: &Configuration,
        script: &Path,
        decision: &mut dyn Decision,
    ) -> Result<RunDirectory> {
        config.validate()?;
        let source = fs::read_to_string(script)?;
        let recorded = filter_maintenance(config, &source);
        recorded.validate()?;

        let raw_name = recorded
            .experiment_name()
            .ok_or_else(|| Error::config("experiment_name cannot be a maintenance arg"))?
            .to_string();
        let experiment_name = normalise_experiment_name(&raw_name);

        ensure_dir_exists(&self.log_root)?;
        let _lock = IndexLock::acquire(self.lock_path(), self.lock_timeout)?;
        let mut index = ExperimentIndex::load_or_empty(self.index_path())?;

        self.check_duplicates(&index, &recorded, decision)?;
        let path = self.prepare_directory(&mut index, &experiment_name, &raw_name, decision)?;

        info!("Writing logs to {}", path.display());
        fs::write(path.join(CONFIG_FILE), serde_json::to_string_pretty(&recorded)?)?;
        fs::copy(script, path.join(script_copy_name(script)))?;

        index.append(&recorded, &timestamp_now());
        index.save(self.index_path())?;

        Ok(RunDirectory {
            experiment_name,
            path,
            config: recorded,
        })
    }

    fn check_duplicates(
        &self,
        index: &ExperimentIndex,
        recorded: &Configuration,
        decision: &mut dyn Decision,
    ) -> Result<()> {
        let query = Query::from_config(recorded)?;
        debug!("Duplicate query: {}", query);

        let prompt = match query.evaluate(index) {
            Ok(rows) if rows.is_empty() => return Ok(()),
            Ok(rows) => {
                let names = index.experiment_names(&rows).join(", ");
                warn!("Experiment(s) with the same configuration already exist: {}", names);
                format!("Runs with the same configuration already exist ({names}). Continue?")
            }
            Err(QueryError::UndefinedColumn(columns)) => {
                let known = query.restricted_to(index);
                let rows = if known.predicates().is_empty() {
                    Vec::new()
                } else {
                    known.evaluate(index)?
                };
                if rows.is_empty() {
                    debug!("New configuration keys {:?}; no earlier run to compare", columns);
                    return Ok(());
                }
                let names = index.experiment_names(&rows).join(", ");
                warn!(
                    "Runs {} match every recorded key but predate {}",
                    names,
                    columns.join(", ")
                );
                format!(
                    "Runs {names} match on every recorded key but lack {}. Continue?",
                    columns.join(", ")
                )
            }
            Err(e) => return Err(e.into()),
        };

        if decision.confirm(&prompt, false) {
            Ok(())
        } else {
            Err(Error::declined("duplicate configuration"))
        }
    }

    fn prepare_directory(
        &self,
        index: &mut ExperimentIndex,
        experiment_name: &str,
        raw_name: &str,
        decision: &mut dyn Decision,
    ) -> Result<PathBuf> {
        let path = self.run_dir(experiment_name);
        if !path.exists() {
            fs::create_dir_all(&path)?;
            return Ok(path);
        }

        let prompt = format!(
            "Logging directory for experiment \"{experiment_name}\" already exists. Overwrite?"
        );
        if !decision.confirm(&prompt, false) {
            return Err(Error::declined(format!("{} already exists", path.display())));
        }

        let event_files = event_files(&path)?;
        let archive = self.archive_event_files
            && !event_files.is_empty()
            && decision.confirm("Archive existing training-curve event files before clearing them?", true);

        if archive {
            let archive_dir = path.join(format!("archive-{}", path_stamp_now()));
            fs::create_dir_all(&archive_dir)?;
            for file in &event_files {
                if let Some(name) = file.file_name() {
                    fs::rename(file, archive_dir.join(name))?;
                }
            }
            info!("Archived {} event file(s) to {}", event_files.len(), archive_dir.display());
        } else {
            for file in &event_files {
                fs::remove_file(file)?;
            }
        }

        let removed = index.remove_experiment(raw_name);
        if removed > 0 {
            info!("Dropped {} superseded index row(s) for {}", removed, raw_name);
        }
        Ok(path)
    }
}

fn event_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file()
            && entry.file_name().to_string_lossy().contains(EVENT_FILE_MARKER)
        {
            files.push(entry.path());
        }
    }
    Ok(files)
}

fn script_copy_name(script: &Path) -> String {
    match script.extension() {
        Some(ext) => format!("{SCRIPT_COPY_STEM}.{}", ext.to_string_lossy()),
        None => SCRIPT_COPY_STEM.to_string(),
    }
}
