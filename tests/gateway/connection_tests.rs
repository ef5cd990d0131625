//! Gateway Connection Tests
//!
//! Full-stack connection flows over scripted links: handshake, ready,
//! resume after drops, invalid sessions, fatal closes, graceful
//! shutdown. The fake server side is driven frame by frame.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use chat_client::gateway::connection::{ConnectionStatus, GatewayConnection};
use chat_client::gateway::dispatch::Dispatcher;
use chat_client::gateway::session::Session;
use chat_client::shared::error::GatewayError;

use crate::common::{next_link, scripted_connector, test_config, ServerLink, EXCHANGE_TIMEOUT};

struct Harness {
    connection: GatewayConnection,
    session: Arc<Session>,
    dispatcher: Arc<Dispatcher>,
    links: mpsc::UnboundedReceiver<ServerLink>,
}

fn spawn_harness() -> Harness {
    let (connector, links) = scripted_connector();
    let session = Arc::new(Session::new());
    let dispatcher = Arc::new(Dispatcher::new());
    let connection = GatewayConnection::spawn(
        test_config(),
        connector,
        Arc::clone(&session),
        Arc::clone(&dispatcher),
    );
    Harness {
        connection,
        session,
        dispatcher,
        links,
    }
}

fn ready_payload(session_id: &str) -> serde_json::Value {
    json!({
        "v": 1,
        "session_id": session_id,
        "user": { "id": "10", "username": "self" },
        "guilds": [],
    })
}

async fn wait_for_status<F>(connection: &GatewayConnection, predicate: F)
where
    F: FnMut(&ConnectionStatus) -> bool,
{
    timeout(EXCHANGE_TIMEOUT, connection.status().wait_for(predicate))
        .await
        .expect("timed out waiting for a status change")
        .expect("status channel closed");
}

#[tokio::test]
async fn test_identify_ready_event_then_resume_after_drop() {
    let mut harness = spawn_harness();
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
    harness.dispatcher.on("X", move |event| {
        let ack = ack_tx.clone();
        async move {
            ack.send(event.sequence).ok();
            Ok(())
        }
    });

    let mut link = next_link(&mut harness.links).await;
    link.hello(40_000);

    let identify = link.expect_identify().await;
    assert_eq!(identify["token"], "test-token");
    assert_eq!(identify["properties"]["browser"], "chat-client");
    assert_eq!(identify["compress"], false);
    assert!(identify.get("intents").is_none());

    link.dispatch(1, "READY", ready_payload("abc"));
    timeout(EXCHANGE_TIMEOUT, harness.connection.wait_until_ready())
        .await
        .expect("ready timed out")
        .expect("connection failed");
    assert!(matches!(
        harness.connection.current_status(),
        ConnectionStatus::Ready { resumed: false, .. }
    ));

    link.dispatch(2, "X", json!({ "id": "1" }));
    assert_eq!(
        timeout(EXCHANGE_TIMEOUT, ack_rx.recv()).await.unwrap(),
        Some(Some(2))
    );
    assert_eq!(harness.session.sequence(), Some(2));

    // Abrupt transport drop; the session survives it.
    drop(link);

    let mut link = next_link(&mut harness.links).await;
    link.hello(40_000);
    let resume = link.expect_resume().await;
    assert_eq!(resume["token"], "test-token");
    assert_eq!(resume["session_id"], "abc");
    assert_eq!(resume["seq"], 2);

    link.dispatch(3, "RESUMED", json!({}));
    wait_for_status(&harness.connection, |status| {
        matches!(status, ConnectionStatus::Ready { resumed: true, .. })
    })
    .await;

    harness.connection.close().await;
}

#[tokio::test]
async fn test_authentication_rejection_is_fatal() {
    let mut harness = spawn_harness();

    let mut link = next_link(&mut harness.links).await;
    link.hello(40_000);
    link.expect_identify().await;
    link.close(4004, "Authentication failed");

    let err = timeout(EXCHANGE_TIMEOUT, harness.connection.wait_until_ready())
        .await
        .expect("failure timed out")
        .expect_err("expected a fatal error");
    assert_eq!(err, GatewayError::AuthenticationFailed);
    assert_eq!(
        harness.connection.current_status(),
        ConnectionStatus::Failed(GatewayError::AuthenticationFailed)
    );

    // Fatal means no further attempts.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.links.try_recv().is_err());
}

#[tokio::test]
async fn test_server_requested_reconnect_resumes() {
    let mut harness = spawn_harness();

    let mut link = next_link(&mut harness.links).await;
    link.hello(40_000);
    link.expect_identify().await;
    link.dispatch(1, "READY", ready_payload("abc"));
    timeout(EXCHANGE_TIMEOUT, harness.connection.wait_until_ready())
        .await
        .unwrap()
        .unwrap();

    link.request_reconnect();

    let mut link = next_link(&mut harness.links).await;
    link.hello(40_000);
    let resume = link.expect_resume().await;
    assert_eq!(resume["session_id"], "abc");
    assert_eq!(resume["seq"], 1);

    harness.connection.close().await;
}

#[tokio::test]
async fn test_invalid_session_clears_state_and_close_interrupts_the_pause() {
    let mut harness = spawn_harness();

    let mut link = next_link(&mut harness.links).await;
    link.hello(40_000);
    link.expect_identify().await;
    link.dispatch(1, "READY", ready_payload("abc"));
    timeout(EXCHANGE_TIMEOUT, harness.connection.wait_until_ready())
        .await
        .unwrap()
        .unwrap();

    link.invalid_session(false);

    // The reset happens before the mandatory re-identify pause.
    let mut cleared = false;
    for _ in 0..100 {
        if harness.session.session_id().is_none() {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(cleared, "session was never reset");
    assert!(!harness.session.resumable());

    // Closing during the pause returns promptly instead of waiting it out.
    timeout(EXCHANGE_TIMEOUT, harness.connection.close())
        .await
        .expect("close timed out");
    assert_eq!(
        harness.connection.current_status(),
        ConnectionStatus::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_carry_sequence_and_missed_ack_reconnects() {
    let mut harness = spawn_harness();

    let mut link = next_link(&mut harness.links).await;
    link.hello(1_000);
    link.expect_identify().await;
    link.dispatch(1, "READY", ready_payload("hb"));
    timeout(EXCHANGE_TIMEOUT, harness.connection.wait_until_ready())
        .await
        .unwrap()
        .unwrap();

    // First beat carries the sequence from the ready frame.
    assert_eq!(link.expect_heartbeat().await, Some(1));
    link.ack();

    link.dispatch(2, "X", json!({ "id": "2" }));
    assert_eq!(link.expect_heartbeat().await, Some(2));

    // Never acked: the client declares the link dead and resumes.
    let mut link = next_link(&mut harness.links).await;
    link.hello(1_000);
    let resume = link.expect_resume().await;
    assert_eq!(resume["session_id"], "hb");
    assert_eq!(resume["seq"], 2);

    harness.connection.close().await;
}

#[tokio::test]
async fn test_graceful_close_shuts_the_transport() {
    let mut harness = spawn_harness();

    let mut link = next_link(&mut harness.links).await;
    link.hello(40_000);
    link.expect_identify().await;
    link.dispatch(1, "READY", ready_payload("abc"));
    timeout(EXCHANGE_TIMEOUT, harness.connection.wait_until_ready())
        .await
        .unwrap()
        .unwrap();

    harness.connection.close().await;
    assert_eq!(
        harness.connection.current_status(),
        ConnectionStatus::Closed
    );
    timeout(EXCHANGE_TIMEOUT, link.closed)
        .await
        .expect("close timed out")
        .expect("transport was dropped without close");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.links.try_recv().is_err());
}

#[tokio::test]
async fn test_closed_connection_identifies_from_scratch() {
    let (connector, mut links) = scripted_connector();
    let session = Arc::new(Session::new());
    let dispatcher = Arc::new(Dispatcher::new());
    let connection = GatewayConnection::spawn(
        test_config(),
        connector.clone(),
        Arc::clone(&session),
        Arc::clone(&dispatcher),
    );

    let mut link = next_link(&mut links).await;
    link.hello(40_000);
    link.expect_identify().await;
    link.dispatch(1, "READY", ready_payload("abc"));
    timeout(EXCHANGE_TIMEOUT, connection.wait_until_ready())
        .await
        .unwrap()
        .unwrap();

    connection.close().await;
    assert!(session.session_id().is_none());
    assert!(!session.resumable());

    // A new connection over the same shared state starts a fresh
    // session instead of resuming the closed one.
    let connection = GatewayConnection::spawn(
        test_config(),
        connector.clone(),
        Arc::clone(&session),
        dispatcher,
    );
    let mut link = next_link(&mut links).await;
    link.hello(40_000);
    let identify = link.expect_identify().await;
    assert_eq!(identify["token"], "test-token");

    connection.close().await;
}

#[tokio::test]
async fn test_out_of_order_sequence_keeps_maximum() {
    let mut harness = spawn_harness();
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
    harness.dispatcher.on("X", move |event| {
        let ack = ack_tx.clone();
        async move {
            ack.send(event.sequence).ok();
            Ok(())
        }
    });

    let mut link = next_link(&mut harness.links).await;
    link.hello(40_000);
    link.expect_identify().await;
    link.dispatch(1, "READY", ready_payload("abc"));
    timeout(EXCHANGE_TIMEOUT, harness.connection.wait_until_ready())
        .await
        .unwrap()
        .unwrap();

    link.dispatch(5, "X", json!({}));
    link.dispatch(3, "X", json!({}));

    // Both events are still delivered, in arrival order.
    assert_eq!(
        timeout(EXCHANGE_TIMEOUT, ack_rx.recv()).await.unwrap(),
        Some(Some(5))
    );
    assert_eq!(
        timeout(EXCHANGE_TIMEOUT, ack_rx.recv()).await.unwrap(),
        Some(Some(3))
    );
    assert_eq!(harness.session.sequence(), Some(5));

    harness.connection.close().await;
}

#[tokio::test]
async fn test_refused_dials_retry_until_reachable() {
    let (connector, mut links) = scripted_connector();
    connector.refuse_connections(true);
    let session = Arc::new(Session::new());
    let dispatcher = Arc::new(Dispatcher::new());
    let connection = GatewayConnection::spawn(
        test_config(),
        connector.clone(),
        Arc::clone(&session),
        dispatcher,
    );

    // Let a few refused attempts burn through the backoff.
    tokio::time::sleep(Duration::from_millis(60)).await;
    connector.refuse_connections(false);

    let mut link = next_link(&mut links).await;
    link.hello(40_000);
    link.expect_identify().await;
    link.dispatch(1, "READY", ready_payload("abc"));
    timeout(EXCHANGE_TIMEOUT, connection.wait_until_ready())
        .await
        .unwrap()
        .unwrap();

    connection.close().await;
}

#[tokio::test]
async fn test_non_hello_first_frame_forces_reconnect() {
    let mut harness = spawn_harness();

    let link = next_link(&mut harness.links).await;
    // Server misbehaves: first frame is a dispatch instead of hello.
    link.dispatch(1, "X", json!({}));

    let mut link = next_link(&mut harness.links).await;
    link.hello(40_000);
    link.expect_identify().await;
    link.dispatch(1, "READY", ready_payload("abc"));
    timeout(EXCHANGE_TIMEOUT, harness.connection.wait_until_ready())
        .await
        .unwrap()
        .unwrap();

    harness.connection.close().await;
}
