//! `trainctl runs`: inspect the experiment registry and checkpoints

use crate::cli::error::{CliError, CliResult};
use crate::cli::logging;
use clap::{Args, Subcommand};
use colored::*;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use trainctl::checkpoint::{CheckpointInfo, CheckpointStore};
use trainctl::config::{Configuration, Settings};
use trainctl::registry::{normalise_experiment_name, ExperimentIndex, ExperimentRegistry, CONFIG_FILE};

#[derive(Args, Debug)]
pub struct RunsCommand {
    #[command(subcommand)]
    pub action: RunsAction,
}

#[derive(Subcommand, Debug)]
pub enum RunsAction {
    /// List every recorded run
    List {
        /// Log root holding index.tsv (defaults to the configured log root)
        #[arg(long)]
        log_root: Option<PathBuf>,
    },

    /// Show a run's configuration and checkpoints
    Show {
        /// Experiment name as recorded or as typed at startup
        experiment: String,

        /// Log root holding the run directory
        #[arg(long)]
        log_root: Option<PathBuf>,
    },
}

/// A run's persisted configuration and checkpoints
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub experiment_name: String,
    pub path: PathBuf,
    pub config: Configuration,
    pub checkpoints: Vec<CheckpointSummary>,
}

#[derive(Debug, Serialize)]
pub struct CheckpointSummary {
    pub name: String,
    pub global_step: Option<u64>,
}

impl From<CheckpointInfo> for CheckpointSummary {
    fn from(info: CheckpointInfo) -> Self {
        Self {
            name: info.name,
            global_step: info.global_step,
        }
    }
}

pub fn execute(cmd: RunsCommand, settings: &Settings, json: bool) -> CliResult<()> {
    match cmd.action {
        RunsAction::List { log_root } => {
            let log_root = log_root.unwrap_or_else(|| settings.log_root.clone());
            let registry = ExperimentRegistry::new(
                &log_root,
                Duration::from_secs(settings.lock_timeout_secs),
            );
            let index = registry.read_index()?;
            if index.rows().is_empty() && !json {
                logging::warning(&format!("No runs recorded under {}", log_root.display()));
                return Ok(());
            }
            if json {
                println!("{}", serde_json::to_string_pretty(index.rows())?);
            } else {
                print!("{}", render_index(&index));
            }
        }
        RunsAction::Show {
            experiment,
            log_root,
        } => {
            let log_root = log_root.unwrap_or_else(|| settings.log_root.clone());
            let summary = summarise_run(&log_root, &experiment)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", render_summary(&summary));
            }
        }
    }
    Ok(())
}

/// Gather what is on disk for one run
pub fn summarise_run(log_root: &Path, experiment: &str) -> CliResult<RunSummary> {
    let experiment_name = normalise_experiment_name(experiment);
    let path = log_root.join(&experiment_name);
    if !path.is_dir() {
        return Err(CliError::RunNotFound(path));
    }

    let config_path = path.join(CONFIG_FILE);
    let config = if config_path.is_file() {
        Configuration::from_json_file(&config_path)?
    } else {
        Configuration::new()
    };

    let checkpoints = CheckpointStore::list(&path)?
        .into_iter()
        .map(CheckpointSummary::from)
        .collect();

    Ok(RunSummary {
        experiment_name,
        path,
        config,
        checkpoints,
    })
}

/// Aligned table of the index, one run per line
pub fn render_index(index: &ExperimentIndex) -> String {
    let columns = index.columns();
    let cells: Vec<Vec<&str>> = index
        .rows()
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(c).map_or("", String::as_str))
                .collect()
        })
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(c.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    let header: Vec<String> = columns
        .iter()
        .zip(widths.iter().copied())
        .map(|(c, w)| format!("{c:<w$}"))
        .collect();
    let _ = writeln!(out, "{}", header.join("  ").trim_end().bold());
    for row in &cells {
        let line: Vec<String> = row
            .iter()
            .zip(widths.iter().copied())
            .map(|(cell, w)| format!("{cell:<w$}"))
            .collect();
        let _ = writeln!(out, "{}", line.join("  ").trim_end());
    }
    out
}

pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", "Run:".bold(), summary.experiment_name);
    let _ = writeln!(out, "{} {}", "Path:".bold(), summary.path.display());

    let _ = writeln!(out, "{}", "Configuration:".bold());
    for (key, value) in summary.config.iter() {
        let _ = writeln!(out, "  {key} = {value}");
    }

    let _ = writeln!(out, "{}", "Checkpoints:".bold());
    if summary.checkpoints.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for checkpoint in &summary.checkpoints {
        match checkpoint.global_step {
            Some(step) => {
                let _ = writeln!(out, "  {} (step {})", checkpoint.name, step);
            }
            None => {
                let _ = writeln!(out, "  {} (step unknown)", checkpoint.name);
            }
        }
    }
    out
}
