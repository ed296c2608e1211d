//! In-process message socket.
//!
//! This is the semantic reference implementation: frames pass through
//! async channels with no serialization, so tests can stand in for the
//! remote server without touching the network. Dropping one side of the
//! pair reads as a disconnect on the other, which is how the session
//! tests simulate a server going away.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex as AsyncMutex, mpsc};

use super::MessageSocket;
use crate::{Frame, SocketError};

/// Channel capacity for the in-process socket.
const CHANNEL_CAPACITY: usize = 64;

/// An in-process message socket; create connected pairs with
/// [`MemSocket::pair`].
#[derive(Clone)]
pub struct MemSocket {
    inner: Arc<MemInner>,
}

struct MemInner {
    /// Frames sent here arrive at the peer.
    tx: mpsc::Sender<Frame>,
    /// Frames from the peer arrive here.
    rx: AsyncMutex<mpsc::Receiver<Frame>>,
    closed: AtomicBool,
}

impl MemSocket {
    /// Create a connected pair; frames sent on one side are received on
    /// the other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);

        let a = Self {
            inner: Arc::new(MemInner {
                tx: tx_b,
                rx: AsyncMutex::new(rx_a),
                closed: AtomicBool::new(false),
            }),
        };
        let b = Self {
            inner: Arc::new(MemInner {
                tx: tx_a,
                rx: AsyncMutex::new(rx_b),
                closed: AtomicBool::new(false),
            }),
        };
        (a, b)
    }
}

impl std::fmt::Debug for MemSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemSocket").finish_non_exhaustive()
    }
}

impl MessageSocket for MemSocket {
    async fn send(&self, frame: Frame) -> Result<(), SocketError> {
        if self.is_closed() {
            return Err(SocketError::Closed);
        }
        self.inner
            .tx
            .send(frame)
            .await
            .map_err(|_| SocketError::Closed)
    }

    async fn recv(&self) -> Result<Frame, SocketError> {
        if self.is_closed() {
            return Err(SocketError::Closed);
        }
        let mut rx = self.inner.rx.lock().await;
        rx.recv().await.ok_or(SocketError::Closed)
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
