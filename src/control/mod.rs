//! Remote control of a running training loop
//!
//! The worker registers [`Control`]s, polls a [`WorkerEndpoint`] once per
//! step and answers each [`Request`] with a [`Response`]. The controller holds
//! a [`ControllerClient`] and performs one blocking round trip per operator
//! action, so at most one request is ever in flight.

pub mod channel;
pub mod descriptor;
pub mod dispatch;
pub mod message;
pub mod socket;

pub use channel::{pair, ControllerClient, ControllerEndpoint, WorkerEndpoint};
pub use descriptor::{Control, ControlContext, ControlSpec};
pub use dispatch::ControlRegistry;
pub use message::{Request, Response, ResponseHistory, ResponseRecord, SessionInfo, WorkerFrame};
pub use socket::{connect, connect_with_retry, ChannelListener};
