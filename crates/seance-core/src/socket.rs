//! The message-socket trait.

use std::future::Future;
use std::pin::Pin;

use crate::{Frame, SocketError};

mod mem;
mod stream;

pub use mem::MemSocket;
pub use stream::StreamSocket;

/// Boxed future type for callers that need to store socket futures.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A message socket delivers whole frames between two peers over one
/// connection.
///
/// Sockets are responsible for:
/// - Framing (header encode/decode, payload length limits)
/// - Disconnect detection (a failed receive means the connection is gone)
///
/// Sockets are NOT responsible for:
/// - Matching replies to requests
/// - Liveness probing or timeouts
/// - Interpreting payloads
///
/// Invariant: frames sent on one socket arrive on the peer intact and in
/// the order they were sent, until the connection fails.
pub trait MessageSocket: Send + Sync {
    /// Send a frame to the peer.
    fn send(&self, frame: Frame) -> impl Future<Output = Result<(), SocketError>> + Send;

    /// Receive the next frame from the peer.
    ///
    /// Any error is terminal for the connection.
    fn recv(&self) -> impl Future<Output = Result<Frame, SocketError>> + Send;

    /// Close the socket. Subsequent sends and receives fail with
    /// [`SocketError::Closed`].
    fn close(&self);

    /// Whether the socket has been closed locally.
    fn is_closed(&self) -> bool;
}
