//! Test fixtures shared by the integration tests

use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use tempfile::TempDir;
use trainctl::{Configuration, Settings};

/// Training script with a maintenance region declaring `--resume_path`
pub const SCRIPT: &str = r#"#[derive(clap::Parser, serde::Serialize)]
struct Args {
    #[arg(long)]
    experiment_name: String,
    #[arg(long, default_value_t = 0.01)]
    lr: f64,
    // region maintenance args
    #[arg(long)]
    resume_path: Option<String>,
    // endregion
}
"#;

/// Scratch log root plus a script file next to it
pub struct Workspace {
    pub dir: TempDir,
    pub log_root: PathBuf,
    pub script: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let log_root = dir.path().join("runs");
        let script = dir.path().join("train.rs");
        fs::write(&script, SCRIPT).expect("Failed to write script");
        Self { dir, log_root, script }
    }

    pub fn settings(&self) -> Settings {
        Settings::headless(&self.log_root)
    }

    pub fn index(&self) -> PathBuf {
        self.log_root.join("index.tsv")
    }

    pub fn run_dir(&self, name: &str) -> PathBuf {
        self.log_root.join(name)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Configuration as a training program would build it
pub fn config(name: &str, lr: f64) -> Configuration {
    Configuration::new()
        .with("experiment_name", name)
        .with("lr", lr)
        .with("resume_path", "/tmp/nowhere")
}

/// A small linear model's parameters
pub fn linear_model(device: &Device) -> VarMap {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    candle_nn::linear(4, 2, vb.pp("fc")).expect("Failed to build model");
    varmap
}
