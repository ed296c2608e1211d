//! seance-core: frame and socket primitives for the seance RPC client.
//!
//! This crate defines:
//! - The frame model ([`Frame`], [`MessageId`], [`PING_MESSAGE_ID`])
//! - Socket-level errors ([`SocketError`])
//! - The message-socket trait ([`MessageSocket`])
//! - Two socket implementations: length-prefixed framing over a byte
//!   stream ([`StreamSocket`]) and an in-process channel pair
//!   ([`MemSocket`]) used as the semantic reference in tests.
//!
//! RPC semantics (call registry, liveness probing, cancellation) live in
//! the `seance` crate; everything here is payload-agnostic plumbing.

mod error;
mod frame;
mod socket;

pub use error::*;
pub use frame::*;
pub use socket::*;
