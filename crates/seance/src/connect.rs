//! The pluggable connect primitive.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpSocket, TcpStream};

use seance_core::BoxFuture;

/// Failures from a [`ConnectFn`], kept apart so the session can report
/// socket creation and connection establishment distinctly.
#[derive(Debug)]
pub enum ConnectError {
    /// Creating the socket failed before any connection was attempted.
    CreateSocket(std::io::Error),
    /// The connection attempt itself failed.
    Connect(std::io::Error),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateSocket(e) => write!(f, "failed to create socket: {e}"),
            Self::Connect(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CreateSocket(e) | Self::Connect(e) => Some(e),
        }
    }
}

/// The function a session uses to establish its TCP connection.
///
/// The default is [`default_connector`]; tests substitute a stub to
/// exercise connect failures and timeouts without a network.
pub type ConnectFn =
    Arc<dyn Fn(SocketAddr) -> BoxFuture<'static, Result<TcpStream, ConnectError>> + Send + Sync>;

/// The system connect primitive: create a non-blocking stream socket for
/// the address family and connect it.
pub fn default_connector() -> ConnectFn {
    Arc::new(|addr| {
        Box::pin(async move {
            let socket = match addr {
                SocketAddr::V4(_) => TcpSocket::new_v4(),
                SocketAddr::V6(_) => TcpSocket::new_v6(),
            }
            .map_err(ConnectError::CreateSocket)?;
            socket.connect(addr).await.map_err(ConnectError::Connect)
        })
    })
}
