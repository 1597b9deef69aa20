//! `trainctl runs` rendering over a real log root

use candle_core::Device;
use std::fs;
use std::time::Duration;
use trainctl::checkpoint::CheckpointStore;
use trainctl::{Configuration, ExperimentRegistry, Fixed, Settings};
use trainctl_cli::cli::commands::runs::{
    execute, render_index, render_summary, summarise_run, RunsAction, RunsCommand,
};
use trainctl_cli::cli::CliError;

fn populated_root() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("train.rs");
    fs::write(&script, "fn main() {}\n").unwrap();

    let registry = ExperimentRegistry::new(dir.path().join("runs"), Duration::from_secs(1));
    let config = Configuration::new()
        .with("experiment_name", "Linear Fit")
        .with("lr", 0.05);
    let run = registry.register(&config, &script, &mut Fixed(true)).unwrap();

    let store = CheckpointStore::new(&run.path, Device::Cpu);
    store.save("latest", 900).unwrap();
    store.save("best", 450).unwrap();
    dir
}

#[test]
fn test_show_reports_config_and_checkpoints() {
    let dir = populated_root();
    let summary = summarise_run(&dir.path().join("runs"), "Linear Fit").unwrap();

    assert_eq!(summary.experiment_name, "linear_fit");
    assert_eq!(summary.config.get_f64("lr"), Some(0.05));
    let steps: Vec<_> = summary
        .checkpoints
        .iter()
        .map(|c| (c.name.as_str(), c.global_step))
        .collect();
    assert_eq!(steps, vec![("best", Some(450)), ("latest", Some(900))]);

    let text = render_summary(&summary);
    assert!(text.contains("lr = 0.05"));
    assert!(text.contains("latest (step 900)"));
}

#[test]
fn test_show_unknown_run() {
    let dir = populated_root();
    let err = summarise_run(&dir.path().join("runs"), "missing").unwrap_err();
    assert!(matches!(err, CliError::RunNotFound(_)));
}

#[test]
fn test_list_renders_every_row() {
    let dir = populated_root();
    let registry = ExperimentRegistry::new(dir.path().join("runs"), Duration::from_secs(1));
    let text = render_index(&registry.read_index().unwrap());

    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("experiment_name"));
    assert!(lines[0].contains("time_ran"));
    assert!(lines[1].starts_with("Linear Fit"));
    assert!(lines[1].contains("0.05"));
}

#[test]
fn test_list_on_missing_log_root_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no_runs_yet");
    let cmd = RunsCommand {
        action: RunsAction::List {
            log_root: Some(missing.clone()),
        },
    };

    execute(cmd, &Settings::headless(&missing), false).unwrap();
    assert!(!missing.exists());
}
