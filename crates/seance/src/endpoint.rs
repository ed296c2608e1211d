//! Remote endpoint representation.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

/// The remote address a session connects to.
///
/// Keeps the text the caller supplied for diagnostics alongside the
/// resolved address, if resolution succeeded. An endpoint that failed to
/// resolve is refused before `connect(2)` ever runs: on some platforms
/// connecting an empty sockaddr reports success but leaves the socket
/// unconnected.
#[derive(Debug, Clone)]
pub struct Endpoint {
    text: String,
    addr: Option<SocketAddr>,
}

impl Endpoint {
    /// Resolve `text` to a socket address. Resolution failure is not an
    /// error here; it produces an endpoint that fails validation, and the
    /// session built from it is born failed.
    pub fn resolve(text: &str) -> Self {
        let addr = text.to_socket_addrs().ok().and_then(|mut addrs| addrs.next());
        Self {
            text: text.to_string(),
            addr,
        }
    }

    /// Build an endpoint from an already-resolved address.
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self {
            text: addr.to_string(),
            addr: Some(addr),
        }
    }

    /// Whether this endpoint resolved to a usable address.
    pub fn is_valid(&self) -> bool {
        self.addr.is_some()
    }

    /// The resolved address, if any.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::from_addr(addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
