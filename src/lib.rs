//! trainctl - remote control and bookkeeping for long-running training loops
//!
//! A training program hands its configuration, state objects and controls to
//! a [`Driver`]. The driver records the run in a lock-protected experiment
//! index, resumes from a checkpoint if asked, and then, once per training
//! step, saves on cadence and answers at most one request from the operator's
//! control panel.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod checkpoint;
pub mod config;
pub mod control;
pub mod decision;
pub mod driver;
pub mod error;
pub mod registry;
pub mod utils;

// Re-exports
pub use checkpoint::{CheckpointStore, OwnedState, Stateful};
pub use config::{Configuration, Scalar, Settings};
pub use control::{Control, ControlContext, ControllerClient, Request, Response};
pub use decision::{Decision, Fixed, Scripted, Terminal};
pub use driver::{Driver, DriverState, ServingScope, StepReport};
pub use error::{exit_code, Error, Result};
pub use registry::{ExperimentRegistry, RunDirectory};
