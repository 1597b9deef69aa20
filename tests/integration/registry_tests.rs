//! Experiment registry behaviour across registrations

use std::fs;
use std::time::Duration;

use super::fixtures::*;
use super::init_test_logging;
use trainctl::registry::{IndexLock, CONFIG_FILE};
use trainctl::{Error, ExperimentRegistry, Fixed, Result, Scripted};

fn registry(ws: &Workspace) -> ExperimentRegistry {
    ExperimentRegistry::new(&ws.log_root, Duration::from_secs(2))
}

#[test]
fn test_declining_duplicate_leaves_index_untouched() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    let registry = registry(&ws);

    registry.register(&config("baseline", 0.1), &ws.script, &mut Fixed(true))?;
    let before = fs::read(ws.index())?;

    let mut decision = Scripted::new([false]);
    let err = registry
        .register(&config("baseline", 0.1), &ws.script, &mut decision)
        .unwrap_err();

    assert!(err.is_declined());
    assert_eq!(decision.prompts().len(), 1);
    assert!(decision.prompts()[0].contains("baseline"));
    assert_eq!(fs::read(ws.index())?, before);
    Ok(())
}

#[test]
fn test_padded_string_value_is_still_a_duplicate() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    let registry = registry(&ws);
    let padded = config("padded", 0.1).with("optimizer", " adam ");

    registry.register(&padded, &ws.script, &mut Fixed(true))?;

    let mut decision = Scripted::new([false]);
    let err = registry
        .register(&padded, &ws.script, &mut decision)
        .unwrap_err();
    assert!(err.is_declined());
    assert_eq!(decision.prompts().len(), 1);
    Ok(())
}

#[test]
fn test_maintenance_args_are_not_recorded_or_compared() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    let registry = registry(&ws);

    let run = registry.register(&config("resumable", 0.1), &ws.script, &mut Fixed(true))?;
    assert!(!run.config.contains_key("resume_path"));

    let header = fs::read_to_string(ws.index())?;
    let header = header.lines().next().unwrap_or_default();
    assert_eq!(header, "experiment_name\tlr\ttime_ran");

    let persisted = fs::read_to_string(run.path.join(CONFIG_FILE))?;
    assert!(!persisted.contains("resume_path"));

    // A different resume path is still the same experiment
    let mut decision = Scripted::new([false]);
    let other = config("resumable", 0.1).with("resume_path", "/elsewhere");
    assert!(registry.register(&other, &ws.script, &mut decision).is_err());
    assert_eq!(decision.prompts().len(), 1);
    Ok(())
}

#[test]
fn test_different_configuration_does_not_prompt() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    let registry = registry(&ws);

    registry.register(&config("a", 0.1), &ws.script, &mut Fixed(true))?;
    let mut decision = Scripted::default();
    registry.register(&config("b", 0.1), &ws.script, &mut decision)?;
    assert!(decision.prompts().is_empty());

    let index = registry.read_index()?;
    assert_eq!(index.rows().len(), 2);
    Ok(())
}

#[test]
fn test_declining_overwrite_keeps_run_directory() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    let registry = registry(&ws);

    let run = registry.register(&config("keep", 0.1), &ws.script, &mut Fixed(true))?;
    fs::write(run.path.join("notes.txt"), "mine")?;
    let before = fs::read(ws.index())?;

    // yes to the duplicate, no to the overwrite
    let mut decision = Scripted::new([true, false]);
    let err = registry
        .register(&config("keep", 0.1), &ws.script, &mut decision)
        .unwrap_err();

    assert!(err.is_declined());
    assert!(decision.prompts()[1].contains("already exists"));
    assert_eq!(fs::read_to_string(run.path.join("notes.txt"))?, "mine");
    assert_eq!(fs::read(ws.index())?, before);
    Ok(())
}

#[test]
fn test_confirmed_overwrite_replaces_superseded_row() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    let registry = registry(&ws);

    registry.register(&config("again", 0.1), &ws.script, &mut Fixed(true))?;
    registry.register(&config("again", 0.2), &ws.script, &mut Fixed(true))?;

    let index = registry.read_index()?;
    assert_eq!(index.rows().len(), 1);
    assert_eq!(index.rows()[0].get("lr").map(String::as_str), Some("0.2"));
    Ok(())
}

#[test]
fn test_held_lock_times_out() -> Result<()> {
    init_test_logging();
    let ws = Workspace::new();
    fs::create_dir_all(&ws.log_root)?;
    let registry = ExperimentRegistry::new(&ws.log_root, Duration::from_millis(200));

    let _held = IndexLock::acquire(registry.lock_path(), Duration::from_secs(1))?;
    let err = registry
        .register(&config("blocked", 0.1), &ws.script, &mut Fixed(true))
        .unwrap_err();

    assert!(matches!(err, Error::LockTimeout { .. }));
    assert!(!ws.index().exists());
    Ok(())
}
