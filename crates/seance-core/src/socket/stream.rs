//! Length-prefixed framing over an arbitrary byte stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

use super::MessageSocket;
use crate::{Frame, FrameHeader, HEADER_LEN, SocketError};

/// A message socket over any `AsyncRead + AsyncWrite` byte stream.
///
/// Each frame is written as a [`FrameHeader`] followed by the payload.
/// Frames larger than the configured maximum are rejected in both
/// directions: an oversized send fails, and an oversized inbound header
/// is a framing error that tears the connection down.
#[derive(Clone)]
pub struct StreamSocket {
    inner: Arc<StreamInner>,
}

impl std::fmt::Debug for StreamSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSocket").finish_non_exhaustive()
    }
}

struct StreamInner {
    reader: AsyncMutex<Box<dyn AsyncRead + Unpin + Send + Sync>>,
    writer: AsyncMutex<Box<dyn AsyncWrite + Unpin + Send + Sync>>,
    closed: AtomicBool,
    max_message_length: u32,
}

impl StreamSocket {
    /// Wrap a connected byte stream.
    pub fn new<S>(stream: S, max_message_length: u32) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            inner: Arc::new(StreamInner {
                reader: AsyncMutex::new(Box::new(reader)),
                writer: AsyncMutex::new(Box::new(writer)),
                closed: AtomicBool::new(false),
                max_message_length,
            }),
        }
    }

    /// Create a connected pair over an in-memory duplex pipe.
    pub fn pair(max_message_length: u32) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(65536);
        (
            Self::new(a, max_message_length),
            Self::new(b, max_message_length),
        )
    }

    fn is_closed_inner(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl MessageSocket for StreamSocket {
    async fn send(&self, frame: Frame) -> Result<(), SocketError> {
        if self.is_closed_inner() {
            return Err(SocketError::Closed);
        }

        let len = frame.payload.len() as u32;
        if len > self.inner.max_message_length {
            return Err(SocketError::TooLarge {
                len,
                max: self.inner.max_message_length,
            });
        }
        let header = FrameHeader {
            message_id: frame.message_id,
            payload_len: len,
        };

        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&header.encode()).await?;
        if !frame.payload.is_empty() {
            writer.write_all(&frame.payload).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Frame, SocketError> {
        if self.is_closed_inner() {
            return Err(SocketError::Closed);
        }

        let mut reader = self.inner.reader.lock().await;

        let mut header_buf = [0u8; HEADER_LEN];
        reader.read_exact(&mut header_buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SocketError::Closed
            } else {
                SocketError::Io(e)
            }
        })?;
        let header = FrameHeader::decode(&header_buf);

        if header.payload_len > self.inner.max_message_length {
            tracing::warn!(
                message_id = header.message_id,
                len = header.payload_len,
                max = self.inner.max_message_length,
                "inbound frame exceeds the maximum message length; dropping the connection"
            );
            return Err(SocketError::TooLarge {
                len: header.payload_len,
                max: self.inner.max_message_length,
            });
        }

        let payload = if header.payload_len > 0 {
            let mut buf = BytesMut::with_capacity(header.payload_len as usize);
            buf.resize(header.payload_len as usize, 0);
            reader.read_exact(&mut buf).await?;
            buf.freeze()
        } else {
            Bytes::new()
        };

        Ok(Frame::new(header.message_id, payload))
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.is_closed_inner()
    }
}
