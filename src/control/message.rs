//! Messages exchanged over the control channel

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Configuration;
use crate::control::descriptor::ControlSpec;
use crate::utils::timestamp_now;

/// A single `{control_name: argument}` command from the controller.
///
/// On the wire this is a one-entry JSON object; an empty argument and an
/// absent one are the same thing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    into = "HashMap<String, String>",
    try_from = "HashMap<String, String>"
)]
pub struct Request {
    /// Name of the control to run
    pub control: String,
    /// Argument for `Input` controls
    pub argument: Option<String>,
}

impl Request {
    /// Request for an `Action` control
    pub fn action(control: impl Into<String>) -> Self {
        Self {
            control: control.into(),
            argument: None,
        }
    }

    /// Request for an `Input` control
    pub fn input(control: impl Into<String>, argument: impl Into<String>) -> Self {
        let argument = argument.into();
        Self {
            control: control.into(),
            argument: (!argument.is_empty()).then_some(argument),
        }
    }

    /// Argument as passed to an `Input` callback
    pub fn argument_or_empty(&self) -> &str {
        self.argument.as_deref().unwrap_or("")
    }
}

impl From<Request> for HashMap<String, String> {
    fn from(request: Request) -> Self {
        HashMap::from([(request.control, request.argument.unwrap_or_default())])
    }
}

impl TryFrom<HashMap<String, String>> for Request {
    type Error = String;

    fn try_from(map: HashMap<String, String>) -> Result<Self, Self::Error> {
        if map.len() != 1 {
            return Err(format!("request must name exactly one control, got {}", map.len()));
        }
        let (control, argument) = map
            .into_iter()
            .next()
            .ok_or_else(|| "empty request".to_string())?;
        Ok(Request::input(control, argument))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.argument {
            Some(arg) => write!(f, "{}({:?})", self.control, arg),
            None => write!(f, "{}()", self.control),
        }
    }
}

/// Outcome of one dispatched request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Rendered callback result or error message
    pub content: String,
    /// Whether the callback ran to completion
    pub success: bool,
    /// Worker configuration after the request was handled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Configuration>,
}

impl Response {
    /// Successful response
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
            config: None,
        }
    }

    /// Failed response
    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: false,
            config: None,
        }
    }

    /// Attach the configuration the worker holds after dispatch
    pub fn with_config(mut self, config: Configuration) -> Self {
        self.config = Some(config);
        self
    }
}

/// A response as kept in the history shown to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// When the response arrived, `%d %b %Y, %H:%M`
    pub time: String,
    /// Rendered callback result or error message
    pub content: String,
    /// Whether the callback ran to completion
    pub success: bool,
    /// Random identifier
    pub id: Uuid,
}

impl ResponseRecord {
    /// Stamp a response with the current time and a fresh id
    pub fn new(response: Response) -> Self {
        Self {
            time: timestamp_now(),
            content: response.content,
            success: response.success,
            id: Uuid::new_v4(),
        }
    }
}

/// Append-only response log, oldest first, optionally capped
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ResponseHistory {
    records: VecDeque<ResponseRecord>,
    #[serde(skip)]
    limit: Option<usize>,
}

impl ResponseHistory {
    /// Unbounded history
    pub fn new() -> Self {
        Self::default()
    }

    /// History keeping at most `limit` records; `None` keeps everything
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            records: VecDeque::new(),
            limit,
        }
    }

    /// Record a response, dropping the oldest entry when over the cap
    pub fn push(&mut self, response: Response) -> &ResponseRecord {
        self.records.push_back(ResponseRecord::new(response));
        if let Some(limit) = self.limit {
            while self.records.len() > limit {
                self.records.pop_front();
            }
        }
        &self.records[self.records.len() - 1]
    }

    /// Records oldest first
    pub fn records(&self) -> impl Iterator<Item = &ResponseRecord> {
        self.records.iter()
    }

    /// Number of records kept
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// What the worker tells a controller when it connects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Normalised experiment name
    pub experiment_name: String,
    /// Configuration as of the last handled request
    pub config: Configuration,
    /// Registered controls in registration order
    pub controls: Vec<ControlSpec>,
    /// Where the dashboard visualizer can be reached, if one was started
    pub dashboard_address: Option<String>,
}

/// Frames sent from worker to controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerFrame {
    /// First frame on every connection
    Session(SessionInfo),
    /// Reply to the request in flight
    Response(Response),
}
