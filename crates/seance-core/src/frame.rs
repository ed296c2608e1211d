//! Unified frame representation.

use bytes::Bytes;

/// Identifier correlating a request frame with its reply.
///
/// Assigned by the sending side; unique within a session.
pub type MessageId = u64;

/// The message ID reserved for liveness pings. No call is ever assigned
/// this ID, so a frame carrying it is unambiguously a ping request or a
/// ping reply. Pings carry an empty payload.
pub const PING_MESSAGE_ID: MessageId = 0;

/// Length in bytes of the wire header ahead of each payload.
pub const HEADER_LEN: usize = 12;

/// A single unit of exchange on a message socket: a message ID plus an
/// opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlates this frame with a call (or marks it as a ping).
    pub message_id: MessageId,
    /// Opaque payload bytes; interpretation belongs to the layer above.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame for the given message ID and payload.
    pub fn new(message_id: MessageId, payload: Bytes) -> Self {
        Self {
            message_id,
            payload,
        }
    }

    /// Create a ping frame: reserved ID, empty payload.
    pub fn ping() -> Self {
        Self {
            message_id: PING_MESSAGE_ID,
            payload: Bytes::new(),
        }
    }

    /// Whether this frame is a ping request or ping reply.
    pub fn is_ping(&self) -> bool {
        self.message_id == PING_MESSAGE_ID
    }
}

/// Wire header for the stream socket: message ID then payload length,
/// both little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_id: MessageId,
    pub payload_len: u32,
}

impl FrameHeader {
    /// Encode into the fixed-size wire representation.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..8].copy_from_slice(&self.message_id.to_le_bytes());
        buf[8..].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// Decode from the fixed-size wire representation.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[..8]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&buf[8..]);
        Self {
            message_id: MessageId::from_le_bytes(id),
            payload_len: u32::from_le_bytes(len),
        }
    }
}
