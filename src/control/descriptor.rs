//! Control descriptors: named commands the operator can trigger remotely

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointStore;
use crate::config::Configuration;
use crate::error::Result;

/// What a control callback may touch while it runs
pub struct ControlContext<'a> {
    /// Live configuration; changes are seen by the next training step
    pub config: &'a mut Configuration,
    global_step: u64,
    checkpoints: &'a CheckpointStore,
}

impl<'a> ControlContext<'a> {
    /// Context over the driver's state
    pub fn new(
        config: &'a mut Configuration,
        global_step: u64,
        checkpoints: &'a CheckpointStore,
    ) -> Self {
        Self {
            config,
            global_step,
            checkpoints,
        }
    }

    /// Current step counter
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Write a named checkpoint of every owned object right now
    pub fn save_checkpoint(&self, name: &str) -> Result<PathBuf> {
        self.checkpoints.save(name, self.global_step)
    }
}

type ActionFn = Box<dyn FnMut(&mut ControlContext<'_>) -> anyhow::Result<String>>;
type InputFn = Box<dyn FnMut(&mut ControlContext<'_>, &str) -> anyhow::Result<String>>;

/// A registered control and its bound callback
pub enum Control {
    /// Runs with no argument
    Action {
        /// Unique name, also the request key
        name: String,
        /// Shown next to the button
        description: String,
        /// Bound callback
        callback: ActionFn,
    },
    /// Runs with one free-text argument
    Input {
        /// Unique name, also the request key
        name: String,
        /// Shown next to the field
        description: String,
        /// Hint shown in the empty field
        placeholder: String,
        /// Bound callback
        callback: InputFn,
    },
}

impl Control {
    /// An argument-less control. The callback's value is shown with `Display`.
    pub fn action<F, T>(name: impl Into<String>, description: impl Into<String>, mut callback: F) -> Self
    where
        F: FnMut(&mut ControlContext<'_>) -> anyhow::Result<T> + 'static,
        T: fmt::Display,
    {
        Self::Action {
            name: name.into(),
            description: description.into(),
            callback: Box::new(move |ctx| callback(ctx).map(|v| v.to_string())),
        }
    }

    /// A control taking one string argument
    pub fn input<F, T>(
        name: impl Into<String>,
        description: impl Into<String>,
        placeholder: impl Into<String>,
        mut callback: F,
    ) -> Self
    where
        F: FnMut(&mut ControlContext<'_>, &str) -> anyhow::Result<T> + 'static,
        T: fmt::Display,
    {
        Self::Input {
            name: name.into(),
            description: description.into(),
            placeholder: placeholder.into(),
            callback: Box::new(move |ctx, arg| callback(ctx, arg).map(|v| v.to_string())),
        }
    }

    /// Unique name
    pub fn name(&self) -> &str {
        match self {
            Control::Action { name, .. } | Control::Input { name, .. } => name,
        }
    }

    /// Read-only snapshot for the front end
    pub fn spec(&self) -> ControlSpec {
        match self {
            Control::Action { name, description, .. } => ControlSpec::Action {
                name: name.clone(),
                description: description.clone(),
            },
            Control::Input {
                name,
                description,
                placeholder,
                ..
            } => ControlSpec::Input {
                name: name.clone(),
                description: description.clone(),
                placeholder: placeholder.clone(),
            },
        }
    }
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Control").field(&self.spec()).finish()
    }
}

/// Serialisable description of a control, without its callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlSpec {
    /// Button
    Action {
        /// Request key
        name: String,
        /// Label
        description: String,
    },
    /// Text field with a submit button
    Input {
        /// Request key
        name: String,
        /// Label
        description: String,
        /// Hint
        placeholder: String,
    },
}

impl ControlSpec {
    /// Request key
    pub fn name(&self) -> &str {
        match self {
            ControlSpec::Action { name, .. } | ControlSpec::Input { name, .. } => name,
        }
    }
}
