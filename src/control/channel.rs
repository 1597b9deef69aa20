//! Request and response queues between controller and worker
//!
//! Both transports end in the same pair of crossbeam queues, so the worker
//! loop and the controller front end never know whether the other side is in
//! the same process or behind a socket.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;
use tracing::debug;

use crate::control::descriptor::ControlSpec;
use crate::control::message::{Request, Response, SessionInfo};
use crate::error::{Error, Result};

/// Worker side: receives requests, sends responses
#[derive(Debug, Clone)]
pub struct WorkerEndpoint {
    requests: Receiver<Request>,
    responses: Sender<Response>,
}

impl WorkerEndpoint {
    pub(crate) fn new(requests: Receiver<Request>, responses: Sender<Response>) -> Self {
        Self { requests, responses }
    }

    /// Next request if one is waiting; never blocks
    pub fn poll(&self) -> Option<Request> {
        match self.requests.try_recv() {
            Ok(request) => Some(request),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                debug!("Controller side of the channel is gone");
                None
            }
        }
    }

    /// Wait for the next request
    pub fn poll_blocking(&self) -> Result<Request> {
        self.requests
            .recv()
            .map_err(|_| Error::channel("controller disconnected"))
    }

    /// Wait at most `timeout` for the next request
    pub fn poll_timeout(&self, timeout: Duration) -> Result<Option<Request>> {
        match self.requests.recv_timeout(timeout) {
            Ok(request) => Ok(Some(request)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::channel("controller disconnected")),
        }
    }

    /// Answer the request in flight
    pub fn respond(&self, response: Response) -> Result<()> {
        self.responses
            .send(response)
            .map_err(|_| Error::channel("controller disconnected"))
    }
}

/// Controller side: sends requests, receives responses
#[derive(Debug)]
pub struct ControllerEndpoint {
    requests: Sender<Request>,
    responses: Receiver<Response>,
    in_flight: bool,
}

impl ControllerEndpoint {
    pub(crate) fn new(requests: Sender<Request>, responses: Receiver<Response>) -> Self {
        Self {
            requests,
            responses,
            in_flight: false,
        }
    }

    /// Enqueue a request. Fails if the previous one was never answered.
    pub fn submit(&mut self, request: Request) -> Result<()> {
        if self.in_flight {
            return Err(Error::channel("a request is already in flight"));
        }
        self.requests
            .send(request)
            .map_err(|_| Error::channel("worker disconnected"))?;
        self.in_flight = true;
        Ok(())
    }

    /// Wait for the answer to the request in flight
    pub fn recv_response(&mut self) -> Result<Response> {
        let response = self
            .responses
            .recv()
            .map_err(|_| Error::channel("worker disconnected"))?;
        self.in_flight = false;
        Ok(response)
    }

    /// Submit and wait for the answer
    pub fn send(&mut self, request: Request) -> Result<Response> {
        self.submit(request)?;
        self.recv_response()
    }
}

/// A connected controller: the worker's session plus the request endpoint
#[derive(Debug)]
pub struct ControllerClient {
    session: SessionInfo,
    endpoint: ControllerEndpoint,
}

impl ControllerClient {
    pub(crate) fn new(session: SessionInfo, endpoint: ControllerEndpoint) -> Self {
        Self { session, endpoint }
    }

    /// What the worker announced on connect
    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    /// Controls the worker exposes
    pub fn list_controls(&self) -> &[ControlSpec] {
        &self.session.controls
    }

    /// Blocking round trip: one request, one response
    pub fn send(&mut self, request: Request) -> Result<Response> {
        debug!("Sending {}", request);
        self.endpoint.send(request)
    }

    /// Lower-level access for callers that interleave other work
    pub fn endpoint(&mut self) -> &mut ControllerEndpoint {
        &mut self.endpoint
    }
}

/// In-process channel: a worker endpoint and a client already holding the session
pub fn pair(session: SessionInfo) -> (WorkerEndpoint, ControllerClient) {
    let (request_tx, request_rx) = channel::unbounded();
    let (response_tx, response_rx) = channel::unbounded();
    (
        WorkerEndpoint::new(request_rx, response_tx),
        ControllerClient::new(session, ControllerEndpoint::new(request_tx, response_rx)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use std::thread;

    fn session() -> SessionInfo {
        SessionInfo {
            experiment_name: "run".to_string(),
            config: Configuration::new(),
            controls: Vec::new(),
            dashboard_address: None,
        }
    }

    #[test]
    fn test_poll_on_empty_channel_returns_none() {
        let (worker, _client) = pair(session());
        assert_eq!(worker.poll(), None);
    }

    #[test]
    fn test_round_trip() {
        let (worker, mut client) = pair(session());
        let handle = thread::spawn(move || {
            let request = worker.poll_blocking().unwrap();
            worker
                .respond(Response::ok(format!("got {}", request.control)))
                .unwrap();
        });

        let response = client.send(Request::action("ping")).unwrap();
        assert_eq!(response, Response::ok("got ping"));
        handle.join().unwrap();
    }

    #[test]
    fn test_second_submit_without_answer_is_refused() {
        let (_worker, mut client) = pair(session());
        client.endpoint().submit(Request::action("a")).unwrap();
        assert!(client.endpoint().submit(Request::action("b")).is_err());
    }

    #[test]
    fn test_worker_gone_is_an_error() {
        let (worker, mut client) = pair(session());
        drop(worker);
        assert!(client.send(Request::action("ping")).is_err());
    }
}
