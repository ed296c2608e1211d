//! The caller-held handle for one in-flight call.

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;

use seance_core::MessageId;

use crate::session::ClientSession;

/// Where a [`Call`] is in its life cycle.
///
/// A call resolves exactly once: from [`Pending`](CallStatus::Pending)
/// to exactly one of the other three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// No outcome yet.
    Pending,
    /// The reply arrived; [`Call::reply`] has it.
    Ok,
    /// The session failed; [`Call::error_message`] says why.
    Error,
    /// The call was cancelled.
    Canceled,
}

/// A handle referring to one in-flight call on a [`ClientSession`].
///
/// Handles may be cloned and moved across threads freely; clones refer
/// to the same call. A handle keeps its session alive until the call
/// resolves, after which it holds only its own outcome and the session
/// reference is dropped. [`update`](Call::update) is a no-op once the
/// handle is resolved.
#[derive(Debug, Clone)]
pub struct Call {
    pub(crate) session: Option<Arc<ClientSession>>,
    pub(crate) token: MessageId,
    pub(crate) status: CallStatus,
    pub(crate) reply: Option<Bytes>,
    pub(crate) error: Option<String>,
}

impl Call {
    pub(crate) fn new(session: Arc<ClientSession>, token: MessageId) -> Self {
        Self {
            session: Some(session),
            token,
            status: CallStatus::Pending,
            reply: None,
            error: None,
        }
    }

    /// The message ID this call was sent with.
    pub fn token(&self) -> MessageId {
        self.token
    }

    /// Current status as of the last [`update`](Call::update).
    pub fn status(&self) -> CallStatus {
        self.status
    }

    /// The reply payload, once the status is [`CallStatus::Ok`].
    pub fn reply(&self) -> Option<&Bytes> {
        self.reply.as_ref()
    }

    /// Take ownership of the reply payload.
    pub fn take_reply(&mut self) -> Option<Bytes> {
        self.reply.take()
    }

    /// The session's error, once the status is [`CallStatus::Error`].
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Park until this call has an outcome to collect, the session
    /// fails, or `deadline` passes. Does not mutate the handle; follow
    /// with [`update`](Call::update) to materialize the result.
    pub async fn wait(&self, deadline: Instant) {
        // This handle may hold the last reference to the session; the
        // local clone keeps the session alive for the duration.
        if let Some(session) = self.session.clone() {
            session.wait(self, deadline).await;
        }
    }

    /// Poll for an outcome without blocking. On resolution the handle
    /// drops its session reference and later calls are no-ops.
    pub fn update(&mut self) {
        if let Some(session) = self.session.clone() {
            session.update(self);
        }
    }

    /// Cancel this call. Safe at any time; a cancelled call stays
    /// cancelled even if its reply arrives later.
    pub fn cancel(&mut self) {
        if let Some(session) = self.session.clone() {
            session.cancel(self);
        }
    }
}
