//! seance: a client-side RPC session.
//!
//! One [`ClientSession`] is one long-lived, full-duplex association with
//! a remote server. It multiplexes any number of outstanding
//! request/response exchanges over a single connection, probes the
//! server with an application-level ping when replies go quiet, and
//! gives every caller a [`Call`] handle supporting waiting, polling and
//! cancellation from any task.
//!
//! Failure is terminal: whatever goes wrong first (resolution, connect,
//! disconnect, an unanswered ping) becomes the session's error, and
//! every present and future call on that session resolves with it.
//! There is no reconnection; make a new session.
//!
//! # Usage
//!
//! ```ignore
//! let deadline = Instant::now() + Duration::from_secs(5);
//! let session = ClientSession::connect(
//!     Endpoint::resolve("10.0.0.7:5254"),
//!     1024 * 1024,
//!     deadline,
//! ).await;
//!
//! let mut call = session.send_request(request_bytes);
//! call.wait(deadline).await;
//! call.update();
//! match call.status() {
//!     CallStatus::Ok => handle(call.take_reply().unwrap()),
//!     CallStatus::Error => eprintln!("{}", call.error_message().unwrap()),
//!     CallStatus::Pending => { /* deadline passed; keep the handle or cancel */ }
//!     CallStatus::Canceled => {}
//! }
//! ```

mod call;
mod connect;
mod endpoint;
mod session;
mod timer;

pub use call::{Call, CallStatus};
pub use connect::{ConnectError, ConnectFn, default_connector};
pub use endpoint::Endpoint;
pub use session::{ClientSession, TIMEOUT_MS};

pub use seance_core::{
    Frame, MemSocket, MessageId, MessageSocket, PING_MESSAGE_ID, SocketError, StreamSocket,
};
