//! Training loop driver
//!
//! The driver owns everything a run needs: configuration, step counter,
//! controls, checkpointed state and the worker end of the control channel.
//! It moves through `Initializing -> Registered -> Serving -> Terminating`:
//!
//! ```no_run
//! # use trainctl::{Configuration, Driver, Settings};
//! # fn main() -> trainctl::Result<()> {
//! let config = Configuration::new().with("experiment_name", "demo").with("lr", 0.01);
//! let mut driver = Driver::builder(config, "train.rs")
//!     .settings(Settings::headless("runs"))
//!     .build()?;
//! driver.register()?;
//! let mut scope = driver.serve()?;
//! for _ in 0..10 {
//!     scope.step()?;
//! }
//! scope.finish()
//! # }
//! ```

pub mod children;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use candle_core::Device;
use tracing::{debug, error, info, instrument, warn};

use crate::checkpoint::{CheckpointStore, OwnedState, LATEST};
use crate::config::{Configuration, Settings};
use crate::control::{
    ChannelListener, Control, ControlContext, ControlRegistry, Request, Response, SessionInfo,
    WorkerEndpoint,
};
use crate::decision::{Decision, Terminal};
use crate::error::{Error, Result};
use crate::registry::{normalise_experiment_name, ExperimentRegistry, RunDirectory};

pub use children::ChildProcesses;

/// Lifecycle position of a [`Driver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Configuration checked, nothing written yet
    Initializing,
    /// Run recorded and directory prepared
    Registered,
    /// Inside a serving scope
    Serving,
    /// Final checkpoint and shutdown in progress or done
    Terminating,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Initializing => "initializing",
            DriverState::Registered => "registered",
            DriverState::Serving => "serving",
            DriverState::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

/// Collects everything a [`Driver`] needs before it starts
pub struct DriverBuilder {
    config: Configuration,
    script: PathBuf,
    settings: Settings,
    device: Device,
    states: Vec<(String, OwnedState)>,
    controls: Vec<Control>,
    decision: Box<dyn Decision>,
}

impl DriverBuilder {
    /// Operational settings; defaults otherwise
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Device checkpoints are loaded onto
    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Checkpoint this object under `key`
    pub fn state(mut self, key: impl Into<String>, state: OwnedState) -> Self {
        self.states.push((key.into(), state));
        self
    }

    /// Expose a control to the operator
    pub fn control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }

    /// Where confirmations come from; the terminal by default
    pub fn decision(mut self, decision: impl Decision + 'static) -> Self {
        self.decision = Box::new(decision);
        self
    }

    /// Validate everything and produce a driver in [`DriverState::Initializing`]
    pub fn build(self) -> Result<Driver> {
        self.settings.validate()?;
        self.config.validate()?;

        let mut controls = ControlRegistry::new();
        for control in self.controls {
            controls.register(control)?;
        }

        let raw_name = self
            .config
            .experiment_name()
            .ok_or_else(|| Error::config("configuration must contain experiment_name"))?;
        let experiment_name = normalise_experiment_name(raw_name);

        let mut store = CheckpointStore::new(
            self.settings.log_root.join(&experiment_name),
            self.device,
        );
        for (key, state) in self.states {
            store.insert(key, state)?;
        }

        debug!("Driver for {} initialised", experiment_name);
        Ok(Driver {
            state: DriverState::Initializing,
            registry: ExperimentRegistry::from_settings(&self.settings),
            settings: self.settings,
            config: self.config,
            script: self.script,
            experiment_name,
            controls,
            store,
            run: None,
            global_step: 0,
            decision: self.decision,
        })
    }
}

/// Long-lived owner of a training run
pub struct Driver {
    state: DriverState,
    settings: Settings,
    registry: ExperimentRegistry,
    config: Configuration,
    script: PathBuf,
    experiment_name: String,
    controls: ControlRegistry,
    store: CheckpointStore,
    run: Option<RunDirectory>,
    global_step: u64,
    decision: Box<dyn Decision>,
}

impl Driver {
    /// Start building a driver for `config`; `script` is the training
    /// program's source file.
    pub fn builder(config: Configuration, script: impl Into<PathBuf>) -> DriverBuilder {
        DriverBuilder {
            config,
            script: script.into(),
            settings: Settings::default(),
            device: Device::Cpu,
            states: Vec::new(),
            controls: Vec::new(),
            decision: Box::new(Terminal),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Live configuration, including maintenance args
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Normalised experiment name
    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    /// Steps taken so far
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Operational settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Prepared run directory, once registered
    pub fn run_dir(&self) -> Option<&Path> {
        self.run.as_ref().map(|run| run.path.as_path())
    }

    /// Checkpoint store over the registered objects
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.store
    }

    fn expect_state(&self, expected: DriverState, action: &str) -> Result<()> {
        if self.state != expected {
            return Err(Error::state(format!(
                "cannot {action} while {}; expected {expected}",
                self.state
            )));
        }
        Ok(())
    }

    /// Record the run in the experiment registry and prepare its directory
    #[instrument(skip(self), fields(experiment = %self.experiment_name))]
    pub fn register(&mut self) -> Result<&RunDirectory> {
        self.expect_state(DriverState::Initializing, "register")?;
        let run = self
            .registry
            .register(&self.config, &self.script, self.decision.as_mut())?;
        self.state = DriverState::Registered;
        let run = self.run.insert(run);
        Ok(&*run)
    }

    /// Resume from checkpoint `name`; `None` starts fresh
    pub fn load_checkpoint(&mut self, name: Option<&str>) -> Result<()> {
        self.expect_state(DriverState::Registered, "load a checkpoint")?;
        let Some(name) = name else {
            return Ok(());
        };
        if let Some(step) = self.store.load(name, self.decision.as_mut())? {
            self.global_step = step;
        }
        Ok(())
    }

    fn session(&self, dashboard_address: Option<String>) -> SessionInfo {
        SessionInfo {
            experiment_name: self.experiment_name.clone(),
            config: self.config.clone(),
            controls: self.controls.specs(),
            dashboard_address,
        }
    }

    /// Enter the serving scope, starting the configured child processes.
    ///
    /// With a controller configured the worker listens on its channel address
    /// and launches `<executable> serve --connect <addr>`. Without one the
    /// scope still checkpoints on cadence but never receives requests.
    pub fn serve(&mut self) -> Result<ServingScope<'_>> {
        self.expect_state(DriverState::Registered, "serve")?;
        let run_dir = self
            .run_dir()
            .ok_or_else(|| Error::state("registered without a run directory"))?
            .to_path_buf();

        let mut children = ChildProcesses::new();
        let mut dashboard_address = None;
        if let Some(dashboard) = &self.settings.dashboard {
            let mut command = Command::new(&dashboard.executable);
            command
                .arg("--port")
                .arg(dashboard.port.to_string())
                .arg("--logdir")
                .arg(&run_dir)
                .arg("--host")
                .arg(&dashboard.host);
            children.spawn("dashboard", command)?;
            dashboard_address = Some(format!("http://{}:{}", display_host(&dashboard.host), dashboard.port));
        }

        let mut listener = None;
        let mut endpoint = None;
        if let Some(controller) = self.settings.controller.clone() {
            let (bound, worker) =
                ChannelListener::bind(controller.channel_addr.as_str(), self.session(dashboard_address))?;
            let mut command = Command::new(&controller.executable);
            command
                .arg("serve")
                .arg("--connect")
                .arg(bound.local_addr().to_string())
                .arg("--host")
                .arg(&controller.host)
                .arg("--port")
                .arg(controller.port.to_string());
            if let Some(limit) = self.settings.history_limit {
                command.arg("--history-limit").arg(limit.to_string());
            }
            children.spawn("controller", command)?;
            info!(
                "Control panel at http://{}:{}",
                display_host(&controller.host),
                controller.port
            );
            listener = Some(bound);
            endpoint = Some(worker);
        }

        Ok(self.enter_scope(endpoint, listener, children))
    }

    /// Enter the serving scope over an endpoint the caller already holds,
    /// without starting any child process
    pub fn serve_with_channel(&mut self, endpoint: WorkerEndpoint) -> Result<ServingScope<'_>> {
        self.expect_state(DriverState::Registered, "serve")?;
        Ok(self.enter_scope(Some(endpoint), None, ChildProcesses::new()))
    }

    /// Session a controller would receive for this driver
    pub fn session_info(&self) -> SessionInfo {
        self.session(None)
    }

    fn enter_scope(
        &mut self,
        endpoint: Option<WorkerEndpoint>,
        listener: Option<ChannelListener>,
        children: ChildProcesses,
    ) -> ServingScope<'_> {
        self.state = DriverState::Serving;
        info!("Serving {} from step {}", self.experiment_name, self.global_step);
        ServingScope {
            driver: self,
            endpoint,
            _listener: listener,
            children,
            finished: false,
        }
    }

    fn save_latest(&self) -> Result<PathBuf> {
        self.store.save(LATEST, self.global_step)
    }
}

fn display_host(host: &str) -> &str {
    if host == "0.0.0.0" {
        "localhost"
    } else {
        host
    }
}

/// What happened during one [`ServingScope::step`]
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Step counter after the increment
    pub global_step: u64,
    /// Directory of the `latest` checkpoint if one was written this step
    pub checkpoint: Option<PathBuf>,
    /// Request handled this step and its dispatch result
    pub handled: Option<(Request, Response)>,
}

/// The driver while serving. Leaving the scope, by [`ServingScope::finish`]
/// or by drop during unwinding, writes a final `latest` checkpoint and stops
/// every child process.
pub struct ServingScope<'a> {
    driver: &'a mut Driver,
    endpoint: Option<WorkerEndpoint>,
    _listener: Option<ChannelListener>,
    children: ChildProcesses,
    finished: bool,
}

impl<'a> ServingScope<'a> {
    /// Live configuration; control callbacks may have changed it
    pub fn config(&self) -> &Configuration {
        &self.driver.config
    }

    /// Steps taken so far
    pub fn global_step(&self) -> u64 {
        self.driver.global_step
    }

    /// Run directory of the current run
    pub fn run_dir(&self) -> Option<&Path> {
        self.driver.run_dir()
    }

    /// Save a named checkpoint outside the cadence
    pub fn save_checkpoint(&self, name: &str) -> Result<PathBuf> {
        self.driver.store.save(name, self.driver.global_step)
    }

    /// Bookkeeping for one training step: cadence checkpoint, step
    /// increment, then at most one control request.
    pub fn step(&mut self) -> Result<StepReport> {
        let driver = &mut *self.driver;
        let save_every = driver.settings.save_every;

        let checkpoint = if driver.global_step % save_every == save_every - 1 {
            Some(driver.save_latest()?)
        } else {
            None
        };
        driver.global_step += 1;

        let handled = match self.endpoint.as_ref().and_then(WorkerEndpoint::poll) {
            Some(request) => {
                let mut ctx =
                    ControlContext::new(&mut driver.config, driver.global_step, &driver.store);
                let response = driver.controls.dispatch(&request, &mut ctx);
                if let Some(endpoint) = &self.endpoint {
                    let reply = response.clone().with_config(driver.config.clone());
                    if let Err(e) = endpoint.respond(reply) {
                        warn!("Could not send response for {}: {}", request, e);
                    }
                }
                Some((request, response))
            }
            None => None,
        };

        Ok(StepReport {
            global_step: driver.global_step,
            checkpoint,
            handled,
        })
    }

    /// Leave the scope: final checkpoint, then stop children
    pub fn finish(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.driver.state = DriverState::Terminating;
        info!("Shutting down {} at step {}", self.driver.experiment_name, self.driver.global_step);

        let saved = self.driver.save_latest();
        self.children
            .terminate(Duration::from_millis(self.driver.settings.shutdown_grace_ms));
        saved.map(|_| ())
    }
}

impl Drop for ServingScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            error!("Final checkpoint failed: {}", e);
        }
    }
}
