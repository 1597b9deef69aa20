//! Child processes started for the lifetime of a serving scope

use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Children to stop when serving ends
#[derive(Debug, Default)]
pub struct ChildProcesses {
    children: Vec<(String, Child)>,
}

impl ChildProcesses {
    /// No children yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `command` and track it under `label`
    pub fn spawn(&mut self, label: &str, mut command: Command) -> Result<u32> {
        let child = command
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| Error::process(format!("failed to start {label}: {e}")))?;
        let pid = child.id();
        info!("Started {} (pid {})", label, pid);
        self.children.push((label.to_string(), child));
        Ok(pid)
    }

    /// Number of tracked children
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Ask every child to stop, then kill whatever is left after `grace`
    pub fn terminate(&mut self, grace: Duration) {
        if self.children.is_empty() {
            return;
        }

        for (label, child) in &mut self.children {
            if matches!(child.try_wait(), Ok(Some(_))) {
                continue;
            }
            debug!("Sending SIGTERM to {}", label);
            if let Err(e) = signal::kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
                warn!("Could not signal {}: {}", label, e);
            }
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            self.reap();
            if self.children.is_empty() {
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }

        for (label, mut child) in self.children.drain(..) {
            warn!("{} did not stop within {:?}; killing", label, grace);
            if let Err(e) = child.kill() {
                error!("Failed to kill {}: {}", label, e);
            }
            let _ = child.wait();
        }
    }

    fn reap(&mut self) {
        self.children.retain_mut(|(label, child)| match child.try_wait() {
            Ok(Some(status)) => {
                info!("{} exited with {}", label, status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Could not poll {}: {}", label, e);
                true
            }
        });
    }
}

impl Drop for ChildProcesses {
    fn drop(&mut self) {
        self.terminate(Duration::ZERO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigterm_stops_a_cooperative_child() {
        let mut children = ChildProcesses::new();
        let mut sleep = Command::new("sleep");
        sleep.arg("30");
        children.spawn("sleeper", sleep).unwrap();

        let started = Instant::now();
        children.terminate(Duration::from_secs(5));
        assert!(children.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_ignoring_sigterm_gets_killed_after_grace() {
        let mut children = ChildProcesses::new();
        let mut stubborn = Command::new("sh");
        stubborn.args(["-c", "trap '' TERM; sleep 30"]);
        children.spawn("stubborn", stubborn).unwrap();
        thread::sleep(Duration::from_millis(200));

        children.terminate(Duration::from_millis(300));
        assert!(children.is_empty());
    }

    #[test]
    fn test_missing_executable_is_a_process_error() {
        let mut children = ChildProcesses::new();
        let err = children
            .spawn("ghost", Command::new("definitely-not-a-real-binary-trainctl"))
            .unwrap_err();
        assert!(matches!(err, Error::Process(_)));
    }
}
