//! Event Delivery Tests
//!
//! Listener behavior observed through a live scripted connection: a
//! failing listener never affects its siblings or the read loop, and
//! the entity cache stays warm from dispatched events.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

use chat_client::cache::EntityCache;
use chat_client::gateway::connection::GatewayConnection;
use chat_client::gateway::dispatch::Dispatcher;
use chat_client::gateway::session::Session;
use chat_client::Snowflake;

use crate::common::{next_link, scripted_connector, test_config, EXCHANGE_TIMEOUT};

#[tokio::test]
async fn test_failing_listener_does_not_break_the_read_loop() {
    let (connector, mut links) = scripted_connector();
    let session = Arc::new(Session::new());
    let dispatcher = Arc::new(Dispatcher::new());

    dispatcher.on("X", |_event| async { panic!("listener blew up") });
    dispatcher.on("X", |_event| async { anyhow::bail!("listener failed") });
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
    dispatcher.on("X", move |event| {
        let ack = ack_tx.clone();
        async move {
            ack.send(event.sequence).ok();
            Ok(())
        }
    });

    let connection = GatewayConnection::spawn(
        test_config(),
        connector,
        Arc::clone(&session),
        Arc::clone(&dispatcher),
    );

    let mut link = next_link(&mut links).await;
    link.hello(40_000);
    link.expect_identify().await;
    link.dispatch(
        1,
        "READY",
        json!({ "v": 1, "session_id": "abc", "user": { "id": "10" }, "guilds": [] }),
    );
    timeout(EXCHANGE_TIMEOUT, connection.wait_until_ready())
        .await
        .unwrap()
        .unwrap();

    // Two events; the healthy listener sees both despite its siblings.
    link.dispatch(2, "X", json!({}));
    link.dispatch(3, "X", json!({}));
    assert_eq!(
        timeout(EXCHANGE_TIMEOUT, ack_rx.recv()).await.unwrap(),
        Some(Some(2))
    );
    assert_eq!(
        timeout(EXCHANGE_TIMEOUT, ack_rx.recv()).await.unwrap(),
        Some(Some(3))
    );

    // The connection is still alive and processing.
    assert_eq!(session.sequence(), Some(3));
    connection.close().await;
}

#[tokio::test]
async fn test_cache_follows_connection_events() {
    let (connector, mut links) = scripted_connector();
    let session = Arc::new(Session::new());
    let dispatcher = Arc::new(Dispatcher::new());
    let cache = EntityCache::new();
    cache.attach(&dispatcher);

    let connection = GatewayConnection::spawn(
        test_config(),
        connector,
        Arc::clone(&session),
        Arc::clone(&dispatcher),
    );

    let mut link = next_link(&mut links).await;
    link.hello(40_000);
    link.expect_identify().await;
    link.dispatch(
        1,
        "READY",
        json!({ "v": 1, "session_id": "abc", "user": { "id": "10", "username": "self" }, "guilds": [] }),
    );
    timeout(EXCHANGE_TIMEOUT, connection.wait_until_ready())
        .await
        .unwrap()
        .unwrap();

    link.dispatch(
        2,
        "MESSAGE_CREATE",
        json!({ "id": "77", "channel_id": "5", "content": "hello" }),
    );
    link.dispatch(3, "GUILD_CREATE", json!({ "id": "42", "name": "test guild" }));

    let mut warm = false;
    for _ in 0..200 {
        if cache.messages().contains(Snowflake(77))
            && cache.guilds().contains(Snowflake(42))
            && cache.users().contains(Snowflake(10))
        {
            warm = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(warm, "cache never caught up with dispatched events");

    assert_eq!(
        cache
            .messages()
            .get(Snowflake(77))
            .and_then(|m| m.get("content").cloned()),
        Some(json!("hello"))
    );

    connection.close().await;
}
