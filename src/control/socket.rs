//! Loopback TCP transport for the control channel
//!
//! Frames are newline-delimited JSON. The worker listens; on every new
//! connection it first sends a [`WorkerFrame::Session`], then answers each
//! request line with a [`WorkerFrame::Response`].
//!
//! Only the most recent connection is current. Every forwarded request
//! remembers the connection generation it came from, and a response whose
//! request came from an older connection is dropped rather than delivered to
//! whoever is connected now.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::control::channel::{ControllerClient, ControllerEndpoint, WorkerEndpoint};
use crate::control::message::{Request, Response, SessionInfo, WorkerFrame};
use crate::error::{Error, Result};

/// The controller currently receiving responses
struct Connection {
    generation: u64,
    stream: TcpStream,
}

type WriterSlot = Arc<Mutex<Option<Connection>>>;

/// Generations of forwarded requests still waiting for their response, oldest first
type Origins = Arc<Mutex<VecDeque<u64>>>;

/// Worker-side listener. Stops accepting when dropped.
#[derive(Debug)]
pub struct ChannelListener {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
}

impl ChannelListener {
    /// Listen on `addr` and return the endpoint the driver polls
    pub fn bind(addr: impl ToSocketAddrs, session: SessionInfo) -> Result<(Self, WorkerEndpoint)> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        info!("Control channel listening on {}", local_addr);

        let (request_tx, request_rx) = channel::unbounded();
        let (response_tx, response_rx) = channel::unbounded::<Response>();
        let writer: WriterSlot = Arc::new(Mutex::new(None));
        let origins: Origins = Arc::new(Mutex::new(VecDeque::new()));
        let session = Arc::new(Mutex::new(session));
        let shutdown = Arc::new(AtomicBool::new(false));

        let pump = ResponsePump {
            writer: writer.clone(),
            origins: origins.clone(),
            session: session.clone(),
        };
        thread::Builder::new()
            .name("trainctl-responses".to_string())
            .spawn(move || pump.run(response_rx))?;

        let acceptor = Acceptor {
            session,
            requests: request_tx,
            writer,
            origins,
            shutdown: shutdown.clone(),
        };
        thread::Builder::new()
            .name("trainctl-accept".to_string())
            .spawn(move || acceptor.run(listener))?;

        Ok((
            Self {
                local_addr,
                shutdown,
            },
            WorkerEndpoint::new(request_rx, response_tx),
        ))
    }

    /// Bound address, useful when binding port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for ChannelListener {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // wake the blocking accept
        let _ = TcpStream::connect(self.local_addr);
    }
}

/// Routes worker responses back to the connection that asked
struct ResponsePump {
    writer: WriterSlot,
    origins: Origins,
    session: Arc<Mutex<SessionInfo>>,
}

impl ResponsePump {
    fn run(self, responses: Receiver<Response>) {
        for response in responses {
            if let Some(config) = &response.config {
                self.session.lock().config = config.clone();
            }

            let origin = self.origins.lock().pop_front();
            let mut slot = self.writer.lock();
            match (origin, slot.as_mut()) {
                (Some(origin), Some(connection)) if connection.generation == origin => {
                    if let Err(e) = write_line(&mut connection.stream, &WorkerFrame::Response(response)) {
                        warn!("Could not deliver response: {}", e);
                    }
                }
                (Some(origin), _) => {
                    warn!(
                        "Dropping response to controller #{} that is no longer connected: {}",
                        origin, response.content
                    );
                }
                (None, _) => {
                    warn!("Dropping response with no matching request: {}", response.content);
                }
            }
        }
    }
}

/// Accepts controller connections; the newest one becomes current
struct Acceptor {
    session: Arc<Mutex<SessionInfo>>,
    requests: Sender<Request>,
    writer: WriterSlot,
    origins: Origins,
    shutdown: Arc<AtomicBool>,
}

impl Acceptor {
    fn run(self, listener: TcpListener) {
        let mut generation = 0u64;
        for stream in listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to accept controller connection: {}", e);
                    continue;
                }
            };
            let peer = stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_string());

            let reader = match stream.try_clone() {
                Ok(reader) => reader,
                Err(e) => {
                    warn!("Failed to clone controller stream: {}", e);
                    continue;
                }
            };

            generation += 1;
            let mut connection = Connection { generation, stream };
            {
                let mut slot = self.writer.lock();
                let session = WorkerFrame::Session(self.session.lock().clone());
                if let Err(e) = write_line(&mut connection.stream, &session) {
                    warn!("Could not send session to {}: {}", peer, e);
                    continue;
                }
                *slot = Some(connection);
            }
            info!("Controller #{} connected from {}", generation, peer);

            let forwarder = RequestForwarder {
                generation,
                peer,
                requests: self.requests.clone(),
                writer: self.writer.clone(),
                origins: self.origins.clone(),
            };
            let spawned = thread::Builder::new()
                .name("trainctl-requests".to_string())
                .spawn(move || forwarder.run(reader));
            if let Err(e) = spawned {
                warn!("Could not start request reader: {}", e);
            }
        }
        debug!("Control channel listener stopped");
    }
}

/// Reads one connection's requests into the worker queue
struct RequestForwarder {
    generation: u64,
    peer: String,
    requests: Sender<Request>,
    writer: WriterSlot,
    origins: Origins,
}

impl RequestForwarder {
    fn run(self, stream: TcpStream) {
        let mut replies = match stream.try_clone() {
            Ok(replies) => replies,
            Err(e) => {
                warn!("Failed to clone stream for {}: {}", self.peer, e);
                return;
            }
        };

        for line in BufReader::new(stream).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    debug!("Read from {} failed: {}", self.peer, e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Request>(&line) {
                Ok(request) => {
                    let mut origins = self.origins.lock();
                    if self.requests.send(request).is_err() {
                        break;
                    }
                    origins.push_back(self.generation);
                }
                Err(e) => {
                    warn!("Malformed request from {}: {}", self.peer, e);
                    let reply = WorkerFrame::Response(Response::failure(format!("malformed request: {e}")));
                    if let Err(e) = write_line(&mut replies, &reply) {
                        warn!("Could not reject malformed request: {}", e);
                    }
                }
            }
        }

        let mut slot = self.writer.lock();
        if slot.as_ref().map(|c| c.generation) == Some(self.generation) {
            *slot = None;
        }
        info!("Controller {} disconnected", self.peer);
    }
}

fn write_line<T: Serialize>(stream: &mut TcpStream, value: &T) -> Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    stream.write_all(&line)?;
    stream.flush()?;
    Ok(())
}

/// Connect to a worker and read its session
pub fn connect(addr: impl ToSocketAddrs) -> Result<ControllerClient> {
    let stream = TcpStream::connect(addr)?;
    let peer = stream.peer_addr()?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut first = String::new();
    if reader.read_line(&mut first)? == 0 {
        return Err(Error::channel("worker closed the connection before its session"));
    }
    let session = match serde_json::from_str::<WorkerFrame>(&first)? {
        WorkerFrame::Session(session) => session,
        WorkerFrame::Response(_) => {
            return Err(Error::channel("expected a session frame first"));
        }
    };
    info!("Connected to worker {} for {}", peer, session.experiment_name);

    let (request_tx, request_rx) = channel::unbounded::<Request>();
    let (response_tx, response_rx) = channel::unbounded();

    let mut writer = stream;
    thread::Builder::new()
        .name("trainctl-send".to_string())
        .spawn(move || {
            for request in request_rx {
                if let Err(e) = write_line(&mut writer, &request) {
                    warn!("Could not send request: {}", e);
                    break;
                }
            }
        })?;

    thread::Builder::new()
        .name("trainctl-recv".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let Ok(line) = line else { break };
                match serde_json::from_str::<WorkerFrame>(&line) {
                    Ok(WorkerFrame::Response(response)) => {
                        if response_tx.send(response).is_err() {
                            break;
                        }
                    }
                    Ok(WorkerFrame::Session(_)) => debug!("Ignoring repeated session frame"),
                    Err(e) => warn!("Malformed frame from worker: {}", e),
                }
            }
            info!("Worker connection closed");
        })?;

    Ok(ControllerClient::new(
        session,
        ControllerEndpoint::new(request_tx, response_rx),
    ))
}

/// Keep trying to connect until `wait` has passed
pub fn connect_with_retry(addr: &str, wait: Duration) -> Result<ControllerClient> {
    let deadline = Instant::now() + wait;
    loop {
        match connect(addr) {
            Ok(client) => return Ok(client),
            Err(Error::Io(e)) if Instant::now() < deadline => {
                debug!("Worker at {} not reachable yet: {}", addr, e);
                thread::sleep(Duration::from_millis(100));
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::control::descriptor::ControlSpec;

    fn session() -> SessionInfo {
        SessionInfo {
            experiment_name: "socket_run".to_string(),
            config: Configuration::new().with("experiment_name", "socket_run"),
            controls: vec![ControlSpec::Action {
                name: "ping".to_string(),
                description: "Ping".to_string(),
            }],
            dashboard_address: None,
        }
    }

    #[test]
    fn test_session_then_round_trip_over_loopback() {
        let (listener, worker) = ChannelListener::bind("127.0.0.1:0", session()).unwrap();
        let mut client = connect(listener.local_addr()).unwrap();
        assert_eq!(client.session(), &session());
        assert_eq!(client.list_controls().len(), 1);

        let handle = thread::spawn(move || {
            let request = worker.poll_blocking().unwrap();
            worker.respond(Response::ok(format!("pong {}", request.control))).unwrap();
            worker
        });
        let response = client.send(Request::action("ping")).unwrap();
        assert_eq!(response, Response::ok("pong ping"));
        let worker = handle.join().unwrap();
        assert_eq!(worker.poll(), None);
    }

    #[test]
    fn test_answer_for_departed_controller_is_not_delivered_to_successor() {
        let (listener, worker) = ChannelListener::bind("127.0.0.1:0", session()).unwrap();

        let mut first = connect(listener.local_addr()).unwrap();
        first.endpoint().submit(Request::action("from_first")).unwrap();
        let stale = worker.poll_blocking().unwrap();
        drop(first);

        let mut second = connect(listener.local_addr()).unwrap();
        worker
            .respond(Response::ok(format!("answer to {}", stale.control)))
            .unwrap();

        let handle = thread::spawn(move || {
            let request = worker.poll_blocking().unwrap();
            worker
                .respond(Response::ok(format!("answer to {}", request.control)))
                .unwrap();
        });
        let response = second.send(Request::action("from_second")).unwrap();
        assert_eq!(response, Response::ok("answer to from_second"));
        handle.join().unwrap();
    }

    #[test]
    fn test_reconnecting_controller_sees_latest_config() {
        let (listener, worker) = ChannelListener::bind("127.0.0.1:0", session()).unwrap();
        let updated = Configuration::new()
            .with("experiment_name", "socket_run")
            .with("lr", 0.5);

        let mut first = connect(listener.local_addr()).unwrap();
        let reply = updated.clone();
        let handle = thread::spawn(move || {
            worker.poll_blocking().unwrap();
            worker.respond(Response::ok("lr set").with_config(reply)).unwrap();
            worker
        });
        let response = first.send(Request::input("set_lr", "0.5")).unwrap();
        assert_eq!(response.config.as_ref(), Some(&updated));
        let _worker = handle.join().unwrap();
        drop(first);

        let second = connect(listener.local_addr()).unwrap();
        assert_eq!(second.session().config, updated);
    }

    #[test]
    fn test_malformed_request_is_answered_by_transport() {
        let (listener, _worker) = ChannelListener::bind("127.0.0.1:0", session()).unwrap();
        let mut stream = TcpStream::connect(listener.local_addr()).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert!(matches!(
            serde_json::from_str::<WorkerFrame>(&line).unwrap(),
            WorkerFrame::Session(_)
        ));

        stream.write_all(b"{\"a\": \"1\", \"b\": \"2\"}\n").unwrap();
        line.clear();
        reader.read_line(&mut line).unwrap();
        match serde_json::from_str::<WorkerFrame>(&line).unwrap() {
            WorkerFrame::Response(response) => {
                assert!(!response.success);
                assert!(response.content.starts_with("malformed request"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
}
