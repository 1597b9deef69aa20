//! Named checkpoints of worker-owned state
//!
//! A checkpoint is a directory `<run_dir>/<name>/` with one
//! `<key>.safetensors` per owned object and a `meta.json` holding the global
//! step. State files are written first and `meta.json` last (atomically), so
//! a reader that sees `meta.json` sees a complete state set.

pub mod state;

use std::fs;
use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::decision::Decision;
use crate::error::{Error, Result};
use crate::utils::io::{ensure_dir_exists, write_file_atomic};

pub use state::{OwnedState, Stateful};

/// Name written on the save cadence and at shutdown
pub const LATEST: &str = "latest";
/// Step metadata file inside a checkpoint directory
pub const META_FILE: &str = "meta.json";
/// Extension of per-object state files
pub const STATE_EXTENSION: &str = "safetensors";

/// Contents of `meta.json`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Step counter at save time
    pub global_step: u64,
}

/// A checkpoint found in a run directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Directory name
    pub name: String,
    /// Recorded step, if `meta.json` is present and readable
    pub global_step: Option<u64>,
}

/// Per-run checkpoint store over a fixed set of owned objects
#[derive(Debug)]
pub struct CheckpointStore {
    run_dir: PathBuf,
    device: Device,
    objects: Vec<(String, OwnedState)>,
}

impl CheckpointStore {
    /// Store writing under `run_dir`, loading tensors onto `device`
    pub fn new(run_dir: impl Into<PathBuf>, device: Device) -> Self {
        Self {
            run_dir: run_dir.into(),
            device,
            objects: Vec::new(),
        }
    }

    /// Register an owned object under a file-safe key
    pub fn insert(&mut self, key: impl Into<String>, state: OwnedState) -> Result<()> {
        let key = key.into();
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(Error::config(format!("invalid state key {key:?}")));
        }
        if self.objects.iter().any(|(k, _)| *k == key) {
            return Err(Error::config(format!("state key {key:?} registered twice")));
        }
        self.objects.push((key, state));
        Ok(())
    }

    /// Registered keys in registration order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().map(|(k, _)| k.as_str())
    }

    /// Run directory this store writes into
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Write every object, then `meta.json`. Returns the checkpoint directory.
    #[instrument(skip(self), fields(run_dir = %self.run_dir.display()))]
    pub fn save(&self, name: &str, global_step: u64) -> Result<PathBuf> {
        let dir = self.run_dir.join(name);
        ensure_dir_exists(&dir)?;

        for (key, state) in &self.objects {
            state.save(key, &dir.join(state_file(key)))?;
            debug!("Saved {} to {}", key, dir.display());
        }

        let meta = serde_json::to_vec(&CheckpointMeta { global_step })?;
        write_file_atomic(dir.join(META_FILE), &meta)?;

        info!("Saved checkpoint {} at step {}", name, global_step);
        Ok(dir)
    }

    /// Restore every object from checkpoint `name`.
    ///
    /// Each object is looked up under the run directory first and then under
    /// `name` taken as a path of its own. A missing object is reported and
    /// the operator decides whether to go on without it. Returns the saved
    /// global step when `meta.json` was found.
    #[instrument(skip(self, decision), fields(run_dir = %self.run_dir.display()))]
    pub fn load(&mut self, name: &str, decision: &mut dyn Decision) -> Result<Option<u64>> {
        let local = self.run_dir.join(name);
        let external = PathBuf::from(name);

        for (key, state) in self.objects.iter_mut() {
            let file = state_file(key);
            let found = [local.join(&file), external.join(&file)]
                .into_iter()
                .find(|p| p.is_file());

            match found {
                Some(path) => {
                    state.load(key, &path, &self.device)?;
                    info!("Loaded {} state from {}", key, path.display());
                }
                None => {
                    warn!("Couldn't find state for {} in {}", key, local.display());
                    let prompt = format!("No saved state for {key} in checkpoint {name}. Continue?");
                    if !decision.confirm(&prompt, true) {
                        return Err(Error::declined(format!("missing state for {key}")));
                    }
                }
            }
        }

        let meta = [local.join(META_FILE), external.join(META_FILE)]
            .into_iter()
            .find(|p| p.is_file());
        match meta {
            Some(path) => {
                let meta: CheckpointMeta = serde_json::from_slice(&fs::read(&path)?)?;
                info!("Resuming at step {}", meta.global_step);
                Ok(Some(meta.global_step))
            }
            None => {
                warn!("No {} in checkpoint {}; keeping current step", META_FILE, name);
                Ok(None)
            }
        }
    }

    /// Checkpoints present in a run directory, sorted by name
    pub fn list(run_dir: impl AsRef<Path>) -> Result<Vec<CheckpointInfo>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(run_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let meta_path = entry.path().join(META_FILE);
            if !meta_path.is_file() {
                continue;
            }
            let global_step = fs::read(&meta_path)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<CheckpointMeta>(&bytes).ok())
                .map(|meta| meta.global_step);
            found.push(CheckpointInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                global_step,
            });
        }
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }
}

fn state_file(key: &str) -> String {
    format!("{key}.{STATE_EXTENSION}")
}
