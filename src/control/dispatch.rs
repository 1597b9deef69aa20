//! Routing requests to registered controls

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::control::descriptor::{Control, ControlContext, ControlSpec};
use crate::control::message::{Request, Response};
use crate::error::{Error, Result};

/// The controls a run exposes, in registration order
#[derive(Debug, Default)]
pub struct ControlRegistry {
    controls: Vec<Control>,
}

impl ControlRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a control; names must be unique within a run
    pub fn register(&mut self, control: Control) -> Result<()> {
        if self.get(control.name()).is_some() {
            return Err(Error::config(format!(
                "control '{}' registered twice",
                control.name()
            )));
        }
        debug!("Registered control {}", control.name());
        self.controls.push(control);
        Ok(())
    }

    /// Snapshot of every control for the front end
    pub fn specs(&self) -> Vec<ControlSpec> {
        self.controls.iter().map(Control::spec).collect()
    }

    /// Number of registered controls
    pub fn len(&self) -> usize {
        self.controls.len()
    }

    /// Whether no control is registered
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    fn get(&self, name: &str) -> Option<&Control> {
        self.controls.iter().find(|c| c.name() == name)
    }

    /// Run the control a request names.
    ///
    /// Never fails: unknown names, callback errors and callback panics all
    /// become unsuccessful responses.
    pub fn dispatch(&mut self, request: &Request, ctx: &mut ControlContext<'_>) -> Response {
        let Some(control) = self.controls.iter_mut().find(|c| c.name() == request.control) else {
            warn!("Request for unknown control {}", request.control);
            return Response::failure(format!("unknown control: {}", request.control));
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match control {
            Control::Action { callback, .. } => callback(ctx),
            Control::Input { callback, .. } => callback(ctx, request.argument_or_empty()),
        }));

        match outcome {
            Ok(Ok(content)) => {
                debug!("{} -> {}", request, content);
                Response::ok(content)
            }
            Ok(Err(e)) => {
                warn!("Control {} failed: {:#}", request.control, e);
                Response::failure(format!("{e:#}"))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("Control {} panicked: {}", request.control, message);
                Response::failure(message)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "control panicked".to_string()
    }
}
