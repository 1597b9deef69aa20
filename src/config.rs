//! Configuration structures for trainctl
//!
//! Two layers live here: [`Configuration`], the ordered experiment
//! hyper-parameters that identify a run, and [`Settings`], the operational
//! knobs (where logs go, how often to checkpoint, which child processes to
//! start) that never take part in duplicate detection.

use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Key every configuration must carry
pub const EXPERIMENT_NAME_KEY: &str = "experiment_name";

/// A single configuration value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    Str(String),
}

impl Scalar {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// String view of the value, if it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether a raw index cell holds this value.
    ///
    /// Strings compare exactly. Numbers compare numerically so `1` and `1.0`
    /// are the same run; integer cells compare as integers.
    pub fn matches_cell(&self, cell: &str) -> bool {
        match self {
            Scalar::Str(s) => cell == s,
            Scalar::Bool(b) => cell
                .trim()
                .eq_ignore_ascii_case(if *b { "true" } else { "false" }),
            Scalar::Int(v) => {
                let cell = cell.trim();
                match cell.parse::<i64>() {
                    Ok(c) => *v == c,
                    Err(_) => cell.parse::<f64>().map_or(false, |c| c == *v as f64),
                }
            }
            Scalar::Float(v) => cell.trim().parse::<f64>().map_or(false, |c| c == *v),
        }
    }

    fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Scalar::Bool(b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Scalar::Int)
                .or_else(|| n.as_f64().map(Scalar::Float)),
            serde_json::Value::String(s) => Some(Scalar::Str(s)),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Str(v) => f.write_str(v),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Str(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(v)
    }
}

/// Ordered experiment configuration.
///
/// Insertion order is kept so the persisted sidecar and the index header read
/// the same way the training program declared its arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    values: IndexMap<String, Scalar>,
}

impl Configuration {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.set(key, value);
        self
    }

    /// Build a configuration from any serializable struct, e.g. parsed CLI args.
    ///
    /// `None` fields are skipped; nested values are rejected.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self> {
        let json = serde_json::to_value(value)?;
        let serde_json::Value::Object(map) = json else {
            return Err(Error::config("configuration must serialize to a map"));
        };

        let mut config = Self::new();
        for (key, value) in map {
            if value.is_null() {
                continue;
            }
            let scalar = Scalar::from_json(value)
                .ok_or_else(|| Error::config(format!("value for '{key}' is not a scalar")))?;
            config.values.insert(key, scalar);
        }
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        match self.values.get(EXPERIMENT_NAME_KEY) {
            Some(Scalar::Str(name)) if !name.trim().is_empty() => Ok(()),
            Some(_) => Err(Error::config("experiment_name must be a non-empty string")),
            None => Err(Error::config("configuration must contain experiment_name")),
        }
    }

    /// Raw experiment name as supplied
    pub fn experiment_name(&self) -> Option<&str> {
        self.values.get(EXPERIMENT_NAME_KEY).and_then(Scalar::as_str)
    }

    /// Get a value
    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.values.get(key)
    }

    /// Get a numeric value
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Scalar::as_f64)
    }

    /// Set a value, keeping the original position of existing keys
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Option<Scalar> {
        self.values.insert(key.into(), value.into())
    }

    /// Whether a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Iterate in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Scalar)> {
        self.values.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy without the given keys
    pub fn without_keys<'a, I>(&self, keys: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut values = self.values.clone();
        for key in keys {
            values.shift_remove(key.as_str());
        }
        Self { values }
    }
}

/// Dashboard visualizer child process settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardSettings {
    /// Executable to launch, resolved through `PATH`
    #[serde(default = "default_dashboard_executable")]
    pub executable: String,
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            executable: default_dashboard_executable(),
            host: default_host(),
            port: default_dashboard_port(),
        }
    }
}

/// Controller front end child process settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerSettings {
    /// Executable providing the `serve` subcommand
    #[serde(default = "default_controller_executable")]
    pub executable: String,
    /// Interface the HTTP front end binds
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the HTTP front end binds
    #[serde(default = "default_controller_port")]
    pub port: u16,
    /// Loopback address the worker listens on for the control channel
    #[serde(default = "default_channel_addr")]
    pub channel_addr: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            executable: default_controller_executable(),
            host: default_host(),
            port: default_controller_port(),
            channel_addr: default_channel_addr(),
        }
    }
}

/// Operational settings for a training run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Directory holding the index and every run directory
    #[serde(default = "default_log_root")]
    pub log_root: PathBuf,
    /// Save the `latest` checkpoint every this many steps
    #[serde(default = "default_save_every")]
    pub save_every: u64,
    /// Bounded wait for the registry lock
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// Offer to archive training-curve event files before clearing them
    #[serde(default = "default_true")]
    pub archive_event_files: bool,
    /// Response history cap for the front end; unbounded when absent
    #[serde(default)]
    pub history_limit: Option<usize>,
    /// Grace period between SIGTERM and SIGKILL for children
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Dashboard visualizer; not started when absent
    #[serde(default)]
    pub dashboard: Option<DashboardSettings>,
    /// Controller front end; not started when absent
    #[serde(default = "default_controller")]
    pub controller: Option<ControllerSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_root: default_log_root(),
            save_every: default_save_every(),
            lock_timeout_secs: default_lock_timeout_secs(),
            archive_event_files: true,
            history_limit: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            dashboard: None,
            controller: default_controller(),
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus `TRAINCTL__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings: Self = builder
            .add_source(
                config::Environment::with_prefix("TRAINCTL")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.save_every == 0 {
            return Err(Error::config("save_every must be > 0"));
        }
        if self.lock_timeout_secs == 0 {
            return Err(Error::config("lock_timeout_secs must be > 0"));
        }
        if self.history_limit == Some(0) {
            return Err(Error::config("history_limit must be > 0 when set"));
        }
        Ok(())
    }

    /// Settings for a headless run: no child processes are started
    pub fn headless(log_root: impl Into<PathBuf>) -> Self {
        Self {
            log_root: log_root.into(),
            controller: None,
            dashboard: None,
            ..Self::default()
        }
    }
}

fn default_log_root() -> PathBuf {
    PathBuf::from("runs")
}

fn default_save_every() -> u64 {
    1000
}

fn default_lock_timeout_secs() -> u64 {
    10
}

fn default_shutdown_grace_ms() -> u64 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_dashboard_executable() -> String {
    "tensorboard".to_string()
}

fn default_dashboard_port() -> u16 {
    6006
}

fn default_controller_executable() -> String {
    "trainctl".to_string()
}

fn default_controller_port() -> u16 {
    6007
}

fn default_channel_addr() -> String {
    "127.0.0.1:6008".to_string()
}

fn default_controller() -> Option<ControllerSettings> {
    Some(ControllerSettings::default())
}
