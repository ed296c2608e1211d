//! The client session: one connection, many concurrent calls.
//!
//! A [`ClientSession`] multiplexes request/response exchanges over a
//! single message socket. Four pieces cooperate around one lock:
//!
//! - the call registry, keyed by message ID
//! - the inbound dispatch task, which routes each received frame to the
//!   ping handler or the matching call
//! - the liveness timer, which turns silence into a ping and an
//!   unanswered ping into session expiry
//! - the [`Call`] handles callers hold, which support waiting, polling
//!   and cancellation from any task
//!
//! A session never recovers from failure: once its error is set, every
//! present and future call on it resolves with that error.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use seance_core::{Frame, MessageId, MessageSocket, PING_MESSAGE_ID, SocketError, StreamSocket};

use crate::call::{Call, CallStatus};
use crate::connect::{ConnectError, ConnectFn, default_connector};
use crate::endpoint::Endpoint;
use crate::timer::{self, LivenessTimer, TimerObserver};

/// Milliseconds of silence before the client gets suspicious about the
/// server. When this window elapses with calls outstanding, the client
/// sends a ping; if no response arrives within another window, the
/// session is expired. Ideally on the order of the 99th percentile of
/// expected call latency.
pub const TIMEOUT_MS: u64 = 100;

/// The suspicion window, honoring the `SEANCE_TIMEOUT_MS` override.
fn liveness_timeout() -> Duration {
    std::env::var("SEANCE_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(TIMEOUT_MS))
}

/// Observed TCP connect timeouts in the wild can be unreasonably long;
/// the connect phase never blocks longer than this, whatever deadline
/// the caller passed.
const CONNECT_DEADLINE_CLAMP: Duration = Duration::from_secs(10);

/// Registry-side state of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Waiting,
    HasReply,
    Canceled,
}

/// Registry record for one in-flight call.
#[derive(Debug)]
struct CallSlot {
    state: SlotState,
    reply: Bytes,
    /// True while some task is parked in `wait` on this call.
    has_waiter: bool,
    ready: Arc<Notify>,
}

impl CallSlot {
    fn new() -> Self {
        Self {
            state: SlotState::Waiting,
            reply: Bytes::new(),
            has_waiter: false,
            ready: Arc::new(Notify::new()),
        }
    }
}

/// Everything the session lock guards.
#[derive(Debug)]
struct State {
    /// Next call's message ID; 0 is reserved for pings and skipped.
    next_message_id: MessageId,
    calls: HashMap<MessageId, CallSlot>,
    /// Number of registry records still in `Waiting`.
    active_count: u64,
    /// Whether a ping is in flight. Undefined while `active_count == 0`.
    ping_outstanding: bool,
    /// Terminal error; empty while the session is healthy. The first
    /// error wins and is never overwritten.
    error: String,
}

impl State {
    fn new() -> Self {
        Self::with_error(String::new())
    }

    fn with_error(error: String) -> Self {
        Self {
            next_message_id: 1,
            calls: HashMap::new(),
            active_count: 0,
            ping_outstanding: false,
            error,
        }
    }

    fn alloc_message_id(&mut self) -> MessageId {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        if self.next_message_id == PING_MESSAGE_ID {
            self.next_message_id = 1;
        }
        id
    }
}

/// A long-lived association with one remote server, multiplexing any
/// number of outstanding calls over a single connection.
///
/// Construct with [`connect`](ClientSession::connect) (or
/// [`with_socket`](ClientSession::with_socket) over an already-framed
/// socket). Construction always yields a session: either connected, or
/// born failed with [`error_message`](ClientSession::error_message)
/// populated. A failed session resolves every call with its error.
pub struct ClientSession {
    endpoint: Endpoint,
    /// Outbound frame queue into the writer task; absent on a
    /// born-failed session.
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    state: Mutex<State>,
    timer: LivenessTimer,
    shutdown: CancellationToken,
}

impl ClientSession {
    /// Connect to `endpoint` within `deadline` (clamped to 10 s from
    /// now) on the current Tokio runtime. Returns once the session is
    /// connected or permanently failed.
    pub async fn connect(
        endpoint: Endpoint,
        max_message_length: u32,
        deadline: Instant,
    ) -> Arc<Self> {
        Self::connect_with(endpoint, max_message_length, deadline, &default_connector()).await
    }

    /// [`connect`](ClientSession::connect) with a substitute connect
    /// primitive.
    pub async fn connect_with(
        endpoint: Endpoint,
        max_message_length: u32,
        deadline: Instant,
        connect: &ConnectFn,
    ) -> Arc<Self> {
        let Some(addr) = endpoint.addr() else {
            let error = format!("failed to resolve {endpoint}");
            return Self::born_failed(endpoint, error);
        };

        let deadline = deadline.min(Instant::now() + CONNECT_DEADLINE_CLAMP);
        let stream = match time::timeout_at(deadline, (connect.as_ref())(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(ConnectError::CreateSocket(err))) => {
                tracing::debug!(error = %err, "socket creation failed");
                return Self::born_failed(endpoint, "failed to create socket".to_string());
            }
            Ok(Err(ConnectError::Connect(err))) => {
                let error = format!("failed to connect socket to {endpoint}: {err}");
                return Self::born_failed(endpoint, error);
            }
            Err(_) => {
                let error = format!("failed to connect socket to {endpoint}: timeout expired");
                return Self::born_failed(endpoint, error);
            }
        };
        let _ = stream.set_nodelay(true);
        tracing::debug!(endpoint = %endpoint, "connected");

        Self::with_socket(endpoint, StreamSocket::new(stream, max_message_length))
    }

    /// Build a session over an already-connected message socket. Must be
    /// called within a Tokio runtime; the dispatch, writer and timer
    /// tasks are spawned here.
    pub fn with_socket<S>(endpoint: Endpoint, socket: S) -> Arc<Self>
    where
        S: MessageSocket + Clone + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (liveness, timer_rx) = LivenessTimer::new();
        let session = Arc::new(Self {
            endpoint,
            outbound: Some(outbound),
            state: Mutex::new(State::new()),
            timer: liveness,
            shutdown: CancellationToken::new(),
        });

        timer::spawn(timer_rx, Arc::downgrade(&session));
        tokio::spawn(run_dispatch(
            socket.clone(),
            Arc::downgrade(&session),
            session.shutdown.clone(),
        ));
        tokio::spawn(run_writer(socket, outbound_rx, Arc::downgrade(&session)));

        session
    }

    fn born_failed(endpoint: Endpoint, error: String) -> Arc<Self> {
        tracing::debug!(endpoint = %endpoint, error = %error, "session born failed");
        let (liveness, timer_rx) = LivenessTimer::new();
        let session = Arc::new(Self {
            endpoint,
            outbound: None,
            state: Mutex::new(State::with_error(error)),
            timer: liveness,
            shutdown: CancellationToken::new(),
        });
        timer::spawn(timer_rx, Arc::downgrade(&session));
        session
    }

    /// Send a request and return the handle for its eventual outcome.
    ///
    /// The message ID issued is unique within the session. On a failed
    /// session the call is registered but never sent; it resolves with
    /// the session's error on the next [`Call::update`].
    pub fn send_request(self: &Arc<Self>, request: Bytes) -> Call {
        let token;
        {
            let mut state = self.state.lock();
            token = state.alloc_message_id();
            state.calls.insert(token, CallSlot::new());
            state.active_count += 1;
            if state.active_count == 1 {
                // ping_outstanding was undefined while nothing was active
                state.ping_outstanding = false;
                self.timer.schedule(liveness_timeout());
            }
        }
        // The lock is released before the frame reaches the socket, so
        // inbound dispatch proceeds concurrently with sends.
        if let Some(outbound) = &self.outbound {
            let _ = outbound.send(Frame::new(token, request));
        }
        tracing::trace!(message_id = token, "request queued");
        Call::new(self.clone(), token)
    }

    /// Non-blocking poll: move a finished call's outcome into the
    /// handle. Idempotent once the handle is resolved.
    pub fn update(&self, call: &mut Call) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(slot) = state.calls.get_mut(&call.token) else {
            // Already drained. Only a cancel through another clone of the
            // handle removes a record without resolving this one.
            if call.status == CallStatus::Pending {
                call.status = CallStatus::Canceled;
            }
            call.session = None;
            return;
        };

        match slot.state {
            SlotState::HasReply => {
                if let Some(slot) = state.calls.remove(&call.token) {
                    call.reply = Some(slot.reply);
                }
                call.status = CallStatus::Ok;
                call.session = None;
            }
            SlotState::Canceled => {
                // The record stays; cleanup belongs to the parked waiter.
                if call.status == CallStatus::Pending {
                    call.status = CallStatus::Canceled;
                }
                call.session = None;
            }
            SlotState::Waiting => {
                if !state.error.is_empty() {
                    state.calls.remove(&call.token);
                    state.active_count -= 1;
                    call.error = Some(state.error.clone());
                    call.status = CallStatus::Error;
                    call.session = None;
                }
                // else: no outcome yet, leave the handle pending
            }
        }
    }

    /// Park until `call` has an outcome, the session fails, or
    /// `deadline` passes. Never mutates the handle; the caller follows
    /// with [`update`](ClientSession::update).
    pub async fn wait(&self, call: &Call, deadline: Instant) {
        loop {
            // Scoped so the lock guard is released (rather than merely
            // dropped) before the `.await` below; a guard held across
            // a suspension point would make this future non-`Send`.
            let notified = {
                let mut guard = self.state.lock();
                let state = &mut *guard;
                let Some(slot) = state.calls.get_mut(&call.token) else {
                    return; // cancelled, or drained by an earlier update
                };
                match slot.state {
                    SlotState::HasReply => return,
                    SlotState::Canceled => {
                        // cancelled while we were parked; finish the cleanup
                        state.calls.remove(&call.token);
                        return;
                    }
                    SlotState::Waiting => {}
                }
                if !state.error.is_empty() || Instant::now() >= deadline {
                    return;
                }

                slot.has_waiter = true;
                let mut notified = Box::pin(slot.ready.clone().notified_owned());
                // Register while still holding the lock so a notification
                // between unlock and sleep cannot be lost.
                notified.as_mut().enable();
                notified
            };

            let _ = time::timeout_at(deadline, notified).await;

            let mut guard = self.state.lock();
            if let Some(slot) = guard.calls.get_mut(&call.token) {
                slot.has_waiter = false;
            }
        }
    }

    /// Cancel a call. If a waiter is parked on it, the record is marked
    /// and the waiter finishes the cleanup; otherwise the record is
    /// destroyed here. Safe at any time; a cancelled call stays
    /// cancelled even if its reply arrives later.
    pub fn cancel(&self, call: &mut Call) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if let Some(slot) = state.calls.get_mut(&call.token) {
                let was_waiting = slot.state == SlotState::Waiting;
                if slot.has_waiter {
                    slot.state = SlotState::Canceled;
                    slot.ready.notify_waiters();
                } else {
                    state.calls.remove(&call.token);
                }
                if was_waiting {
                    state.active_count -= 1;
                }
                // The timer stays armed even if this was the last active
                // call: descheduling here would order the scheduler's
                // lock under ours, and a spurious wake in the idle state
                // is harmless.
            }
        }
        if call.status == CallStatus::Pending {
            call.status = CallStatus::Canceled;
        }
        call.session = None;
    }

    /// The terminal error, or an empty string while the session is
    /// healthy.
    pub fn error_message(&self) -> String {
        self.state.lock().error.clone()
    }

    /// The endpoint this session was built for.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Number of calls still awaiting a reply.
    pub fn active_call_count(&self) -> u64 {
        self.state.lock().active_count
    }

    /// Message IDs of calls still in the registry, sorted.
    pub fn pending_tokens(&self) -> Vec<MessageId> {
        let state = self.state.lock();
        let mut tokens: Vec<MessageId> = state.calls.keys().copied().collect();
        tokens.sort_unstable();
        tokens
    }

    /// Route one inbound frame: ping bookkeeping, or reply delivery into
    /// the matching call record.
    fn on_frame(&self, frame: Frame) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if frame.message_id == PING_MESSAGE_ID {
            if state.active_count > 0 && state.ping_outstanding {
                // The server has shown it is alive for now; get
                // suspicious again in another window.
                state.ping_outstanding = false;
                self.timer.schedule(liveness_timeout());
            } else {
                tracing::trace!(
                    "unexpected ping response, dropped; harmless when all calls \
                     completed before it arrived"
                );
            }
            return;
        }

        let Some(slot) = state.calls.get_mut(&frame.message_id) else {
            tracing::trace!(
                message_id = frame.message_id,
                "response with no matching call, dropped; the call may have been \
                 cancelled before its reply arrived"
            );
            return;
        };
        match slot.state {
            SlotState::HasReply => {
                tracing::warn!(
                    message_id = frame.message_id,
                    "second response for one message id, dropped; either message ids \
                     are being assigned incorrectly or the server is misbehaving"
                );
                return;
            }
            SlotState::Canceled => {
                tracing::trace!(
                    message_id = frame.message_id,
                    "response for a cancelled call, dropped"
                );
                return;
            }
            SlotState::Waiting => {}
        }

        slot.reply = frame.payload;
        slot.state = SlotState::HasReply;
        slot.ready.notify_waiters();

        state.active_count -= 1;
        if state.active_count == 0 {
            self.timer.deschedule();
        } else {
            self.timer.schedule(liveness_timeout());
        }
    }

    /// The connection is gone: fail the session (first error wins) and
    /// wake every parked waiter.
    fn on_disconnect(&self, err: &SocketError) {
        tracing::debug!(endpoint = %self.endpoint, error = %err, "disconnected");
        let mut state = self.state.lock();
        if state.error.is_empty() {
            state.error = format!("disconnected from {}", self.endpoint);
            for slot in state.calls.values() {
                slot.ready.notify_waiters();
            }
        }
    }
}

impl TimerObserver for ClientSession {
    /// The liveness deadline fired: send a ping, expire the session, or
    /// recognize a spurious wake.
    fn on_deadline(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // Spurious wake: never connected, nothing outstanding, or
        // already failed. Cancellation leaves the timer armed on
        // purpose, so this path is routine.
        if self.outbound.is_none() || state.active_count == 0 || !state.error.is_empty() {
            return;
        }

        if !state.ping_outstanding {
            tracing::debug!(
                endpoint = %self.endpoint,
                "no reply within the suspicion window, sending ping"
            );
            state.ping_outstanding = true;
            if let Some(outbound) = &self.outbound {
                let _ = outbound.send(Frame::ping());
            }
            self.timer.schedule(liveness_timeout());
        } else {
            tracing::debug!(endpoint = %self.endpoint, "ping went unanswered, expiring session");
            state.error = format!("server {} timed out", self.endpoint);
            for slot in state.calls.values() {
                slot.ready.notify_waiters();
            }
        }
    }
}

impl fmt::Display for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let error = self.error_message();
        if error.is_empty() {
            write!(f, "Active session to {}", self.endpoint)
        } else {
            // The error already names the endpoint.
            write!(f, "Closed session: {error}")
        }
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        // Stop the dispatch task; the writer exits when the outbound
        // sender drops, the timer task when its watch sender drops.
        self.shutdown.cancel();
        self.timer.deschedule();
    }
}

/// Inbound half of the socket adapter: routes received frames into the
/// session until the connection fails or the session goes away.
async fn run_dispatch<S: MessageSocket>(
    socket: S,
    session: Weak<ClientSession>,
    shutdown: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => return,
            received = socket.recv() => received,
        };
        match received {
            Ok(frame) => match session.upgrade() {
                Some(session) => session.on_frame(frame),
                None => return,
            },
            Err(err) => {
                if let Some(session) = session.upgrade() {
                    session.on_disconnect(&err);
                }
                return;
            }
        }
    }
}

/// Outbound half of the socket adapter: relays queued frames onto the
/// socket. A send failure is a disconnect like any other.
async fn run_writer<S: MessageSocket>(
    socket: S,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    session: Weak<ClientSession>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(err) = socket.send(frame).await {
            if let Some(session) = session.upgrade() {
                session.on_disconnect(&err);
            }
            break;
        }
    }
    socket.close();
}
