//! Socket-level error types.

use core::fmt;

/// Errors surfaced by a [`crate::MessageSocket`].
///
/// Every variant is fatal for the connection it occurred on: the session
/// layer treats any receive error as a disconnect.
#[derive(Debug)]
pub enum SocketError {
    /// The peer closed the connection, or the socket was closed locally.
    Closed,
    /// An I/O error on the underlying stream.
    Io(std::io::Error),
    /// A frame exceeded the negotiated maximum message length.
    TooLarge { len: u32, max: u32 },
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "socket closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::TooLarge { len, max } => {
                write!(f, "message of {len} bytes exceeds maximum of {max}")
            }
        }
    }
}

impl std::error::Error for SocketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SocketError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
