//! Black-box session behavior, driven through an in-process socket pair
//! with the test playing the server role. Timing-sensitive scenarios run
//! under a paused clock, so the suspicion window is exercised in virtual
//! time.

use std::sync::{Arc, Once};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::{self, Instant};

use seance::{
    CallStatus, ClientSession, Endpoint, Frame, MemSocket, MessageSocket, StreamSocket,
};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn endpoint() -> Endpoint {
    Endpoint::resolve("127.0.0.1:5254")
}

fn connected() -> (Arc<ClientSession>, MemSocket) {
    init_tracing();
    let (client, server) = MemSocket::pair();
    (ClientSession::with_socket(endpoint(), client), server)
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(3600)
}

#[tokio::test]
async fn happy_path() {
    let (session, server) = connected();
    assert_eq!(session.to_string(), "Active session to 127.0.0.1:5254");

    let mut call = session.send_request(Bytes::from_static(b"A"));
    assert_eq!(call.token(), 1);
    assert_eq!(call.status(), CallStatus::Pending);
    assert_eq!(session.active_call_count(), 1);

    let request = server.recv().await.unwrap();
    assert_eq!(request.message_id, 1);
    assert_eq!(&request.payload[..], b"A");

    server
        .send(Frame::new(1, Bytes::from_static(b"reply-A")))
        .await
        .unwrap();

    call.wait(far_future()).await;
    call.update();
    assert_eq!(call.status(), CallStatus::Ok);
    assert_eq!(call.reply().unwrap().as_ref(), b"reply-A");
    assert!(call.error_message().is_none());

    assert_eq!(session.active_call_count(), 0);
    assert!(session.pending_tokens().is_empty());
    assert!(session.error_message().is_empty());
}

#[tokio::test(start_paused = true)]
async fn silence_draws_a_ping_and_a_ping_reply_recovers() {
    let (session, server) = connected();

    let mut call = session.send_request(Bytes::from_static(b"A"));
    let request = server.recv().await.unwrap();
    assert_eq!(request.message_id, 1);

    // No reply for a full suspicion window: the client turns suspicious
    // and probes.
    let started = Instant::now();
    let ping = server.recv().await.unwrap();
    assert!(ping.is_ping());
    assert!(started.elapsed() >= Duration::from_millis(100));

    // Answer the ping; the session stays healthy.
    time::sleep(Duration::from_millis(50)).await;
    server.send(Frame::ping()).await.unwrap();

    // Now the real reply.
    time::sleep(Duration::from_millis(50)).await;
    server
        .send(Frame::new(1, Bytes::from_static(b"reply-A")))
        .await
        .unwrap();

    call.wait(far_future()).await;
    call.update();
    assert_eq!(call.status(), CallStatus::Ok);
    assert_eq!(call.reply().unwrap().as_ref(), b"reply-A");

    // With nothing outstanding, the timer is disarmed: no expiry however
    // long we sit here.
    time::sleep(Duration::from_secs(2)).await;
    assert!(session.error_message().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unanswered_ping_expires_the_session() {
    let (session, server) = connected();

    let mut call = session.send_request(Bytes::from_static(b"A"));
    let request = server.recv().await.unwrap();
    assert_eq!(request.message_id, 1);

    // Say nothing: one window to get suspicious, one more for the ping
    // to go unanswered.
    call.wait(far_future()).await;

    assert_eq!(session.error_message(), "server 127.0.0.1:5254 timed out");
    let ping = server.recv().await.unwrap();
    assert!(ping.is_ping());

    call.update();
    assert_eq!(call.status(), CallStatus::Error);
    assert!(call.error_message().unwrap().contains("timed out"));
    assert_eq!(
        session.to_string(),
        "Closed session: server 127.0.0.1:5254 timed out"
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_without_a_waiter_destroys_the_call_and_drops_its_reply() {
    let (session, server) = connected();

    let mut call = session.send_request(Bytes::from_static(b"A"));
    assert_eq!(call.token(), 1);
    call.cancel();
    assert_eq!(call.status(), CallStatus::Canceled);
    assert_eq!(session.active_call_count(), 0);
    assert!(session.pending_tokens().is_empty());

    // The late reply lands on no record and is dropped.
    let request = server.recv().await.unwrap();
    server
        .send(Frame::new(request.message_id, Bytes::from_static(b"reply-A")))
        .await
        .unwrap();
    time::sleep(Duration::from_millis(10)).await;

    call.update();
    assert_eq!(call.status(), CallStatus::Canceled);
    assert!(call.reply().is_none());
    assert!(session.error_message().is_empty());

    // The session itself is unharmed: a fresh call round-trips.
    let mut second = session.send_request(Bytes::from_static(b"B"));
    assert_eq!(second.token(), 2);
    let request = server.recv().await.unwrap();
    server
        .send(Frame::new(request.message_id, Bytes::from_static(b"reply-B")))
        .await
        .unwrap();
    second.wait(far_future()).await;
    second.update();
    assert_eq!(second.status(), CallStatus::Ok);
}

#[tokio::test(start_paused = true)]
async fn cancel_with_a_parked_waiter_hands_cleanup_to_the_waiter() {
    let (session, _server) = connected();

    let mut call = session.send_request(Bytes::from_static(b"A"));
    let waiter = call.clone();
    let parked = tokio::spawn(async move {
        waiter.wait(far_future()).await;
        waiter
    });

    // Let the waiter park on the call before cancelling.
    time::sleep(Duration::from_millis(10)).await;
    call.cancel();
    assert_eq!(call.status(), CallStatus::Canceled);

    let mut waiter = parked.await.unwrap();
    waiter.update();
    assert_eq!(waiter.status(), CallStatus::Canceled);

    assert_eq!(session.active_call_count(), 0);
    assert!(session.pending_tokens().is_empty());
    assert!(session.error_message().is_empty());
}

#[tokio::test]
async fn disconnect_fans_out_to_every_outstanding_call() {
    let (session, server) = connected();

    let mut calls: Vec<_> = [b"A" as &[u8], b"B", b"C"]
        .into_iter()
        .map(|payload| session.send_request(Bytes::copy_from_slice(payload)))
        .collect();
    for expected in 1..=3u64 {
        assert_eq!(server.recv().await.unwrap().message_id, expected);
    }

    drop(server);

    for call in &mut calls {
        call.wait(far_future()).await;
        call.update();
        assert_eq!(call.status(), CallStatus::Error);
        assert_eq!(
            call.error_message(),
            Some("disconnected from 127.0.0.1:5254")
        );
    }
    assert_eq!(session.active_call_count(), 0);

    // Future calls observe the same terminal error.
    let mut late = session.send_request(Bytes::from_static(b"D"));
    late.wait(far_future()).await;
    late.update();
    assert_eq!(late.status(), CallStatus::Error);
    assert_eq!(
        late.error_message(),
        Some("disconnected from 127.0.0.1:5254")
    );
}

#[tokio::test]
async fn message_ids_are_nonzero_and_strictly_increasing() {
    let (session, _server) = connected();

    let tokens: Vec<_> = (0..3)
        .map(|_| session.send_request(Bytes::from_static(b"x")).token())
        .collect();
    assert_eq!(tokens, vec![1, 2, 3]);
    assert_eq!(session.pending_tokens(), vec![1, 2, 3]);
}

#[tokio::test]
async fn update_is_idempotent_once_resolved() {
    let (session, server) = connected();

    let mut call = session.send_request(Bytes::from_static(b"A"));
    let request = server.recv().await.unwrap();
    server
        .send(Frame::new(request.message_id, Bytes::from_static(b"reply")))
        .await
        .unwrap();

    call.wait(far_future()).await;
    call.update();
    assert_eq!(call.status(), CallStatus::Ok);

    // Resolved handles no longer reference the session; update and wait
    // are no-ops.
    call.update();
    call.wait(far_future()).await;
    assert_eq!(call.status(), CallStatus::Ok);
    assert_eq!(call.reply().unwrap().as_ref(), b"reply");
}

#[tokio::test(start_paused = true)]
async fn a_cancelled_call_stays_cancelled_even_if_its_reply_landed_first() {
    let (session, server) = connected();

    let mut call = session.send_request(Bytes::from_static(b"A"));
    let request = server.recv().await.unwrap();
    server
        .send(Frame::new(request.message_id, Bytes::from_static(b"reply")))
        .await
        .unwrap();
    // Let the reply land in the registry before the caller gets around
    // to cancelling.
    time::sleep(Duration::from_millis(10)).await;

    call.cancel();
    call.update();
    assert_eq!(call.status(), CallStatus::Canceled);
    assert!(call.reply().is_none());
    assert_eq!(session.active_call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn active_count_tracks_waiting_calls_exactly() {
    let (session, server) = connected();

    let mut a = session.send_request(Bytes::from_static(b"A"));
    let _b = session.send_request(Bytes::from_static(b"B"));
    let mut c = session.send_request(Bytes::from_static(b"C"));
    assert_eq!(session.active_call_count(), 3);

    a.cancel();
    assert_eq!(session.active_call_count(), 2);

    for _ in 0..3 {
        server.recv().await.unwrap();
    }
    server
        .send(Frame::new(c.token(), Bytes::from_static(b"reply-C")))
        .await
        .unwrap();
    c.wait(far_future()).await;
    assert_eq!(session.active_call_count(), 1);
    c.update();
    assert_eq!(c.status(), CallStatus::Ok);
}

#[tokio::test]
async fn wait_returns_at_its_deadline_with_the_call_still_pending() {
    let (session, server) = connected();

    let mut call = session.send_request(Bytes::from_static(b"A"));
    call.wait(Instant::now() + Duration::from_millis(20)).await;
    call.update();
    assert_eq!(call.status(), CallStatus::Pending);

    // The call is still live; a reply after the missed deadline resolves
    // it normally.
    let request = server.recv().await.unwrap();
    server
        .send(Frame::new(request.message_id, Bytes::from_static(b"late")))
        .await
        .unwrap();
    call.wait(far_future()).await;
    call.update();
    assert_eq!(call.status(), CallStatus::Ok);
    assert_eq!(call.reply().unwrap().as_ref(), b"late");
}

#[tokio::test]
async fn connect_and_round_trip_over_tcp() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let socket = StreamSocket::new(stream, 1024);
        let request = socket.recv().await.unwrap();
        socket
            .send(Frame::new(request.message_id, request.payload))
            .await
            .unwrap();
    });

    let session = ClientSession::connect(
        Endpoint::from_addr(addr),
        1024,
        Instant::now() + Duration::from_secs(5),
    )
    .await;
    assert!(session.error_message().is_empty(), "{}", session.error_message());

    let mut call = session.send_request(Bytes::from_static(b"echo"));
    call.wait(Instant::now() + Duration::from_secs(5)).await;
    call.update();
    assert_eq!(call.status(), CallStatus::Ok);
    assert_eq!(call.reply().unwrap().as_ref(), b"echo");

    server.await.unwrap();
}
