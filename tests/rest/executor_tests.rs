//! REST Client Tests
//!
//! Rate limit behavior observed end to end through [`RestClient`] with a
//! scripted transport: depleted buckets defer the next call, routes the
//! server maps onto one bucket share its budget, and a global 429 stalls
//! every route. All tests run on the paused clock so waits are asserted
//! as exact virtual instants.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use chat_client::http::{ApiRequest, RestClient, Route};
use chat_client::Snowflake;

use crate::common::{bucket_headers, json_response, json_response_with, ScriptedHttp};

#[tokio::test(start_paused = true)]
async fn test_depleted_bucket_defers_the_next_call() {
    let http = ScriptedHttp::new(vec![
        json_response_with(200, bucket_headers("b1", 0, 5, 5.0), json!({ "id": "1" })),
        json_response_with(200, bucket_headers("b1", 4, 5, 5.0), json!({ "id": "2" })),
    ]);
    let client = RestClient::new(http.clone(), "https://api.example.test", "tok");
    let start = Instant::now();

    let first = client
        .request(ApiRequest::new(Route::get_messages(Snowflake(5))))
        .await
        .unwrap();
    assert_eq!(first, Some(json!({ "id": "1" })));

    // The response said the window is spent, so the next call holds back
    // until it resets rather than risking a 429.
    let second = client
        .request(ApiRequest::new(Route::get_messages(Snowflake(5))))
        .await
        .unwrap();
    assert_eq!(second, Some(json!({ "id": "2" })));

    let arrivals = http.arrivals();
    assert_eq!(arrivals, vec![start, start + Duration::from_secs(5)]);
}

#[tokio::test(start_paused = true)]
async fn test_sibling_route_waits_for_shared_bucket() {
    // The message route and the channel route land in one server bucket.
    let messages = Route::get_messages(Snowflake(5));
    let channel = Route::get_channel(Snowflake(5));

    let http = ScriptedHttp::new(vec![
        json_response_with(200, bucket_headers("shared", 3, 5, 10.0), json!([])),
        json_response_with(200, bucket_headers("shared", 0, 5, 10.0), json!({ "id": "5" })),
        json_response_with(200, bucket_headers("shared", 4, 5, 10.0), json!([])),
    ]);
    let client = RestClient::new(http.clone(), "https://api.example.test", "tok");
    let start = Instant::now();

    // First call teaches the tracker which bucket the message route uses.
    client
        .request(ApiRequest::new(messages.clone()))
        .await
        .unwrap();
    // The channel route reports the same bucket, now exhausted.
    client
        .request(ApiRequest::new(channel.clone()))
        .await
        .unwrap();

    // The message route never saw a zero itself, but its bucket did: the
    // request must not hit the wire before the shared window resets.
    client.request(ApiRequest::new(messages)).await.unwrap();

    let arrivals = http.arrivals();
    assert_eq!(arrivals.len(), 3);
    assert_eq!(arrivals[0], start);
    assert_eq!(arrivals[1], start);
    assert_eq!(arrivals[2], start + Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_global_rate_limit_stalls_other_routes() {
    let http = ScriptedHttp::new(vec![
        json_response(
            429,
            json!({
                "message": "You are being rate limited.",
                "retry_after": 3.0,
                "global": true,
            }),
        ),
        json_response(200, json!({ "ok": true })),
        json_response(200, json!({ "ok": true })),
    ]);
    let client = Arc::new(RestClient::new(
        http.clone(),
        "https://api.example.test",
        "tok",
    ));
    let start = Instant::now();

    let first = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .request(ApiRequest::new(Route::get_current_user()))
                .await
        })
    };

    // Let the first task take its 429 and park in the retry sleep.
    for _ in 0..1000 {
        if http.arrivals().len() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(http.arrivals().len(), 1);

    // A different route started during the block waits it out too.
    let second = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .request(ApiRequest::new(Route::get_user(Snowflake(9))))
                .await
        })
    };

    assert_eq!(first.await.unwrap().unwrap(), Some(json!({ "ok": true })));
    assert_eq!(second.await.unwrap().unwrap(), Some(json!({ "ok": true })));

    let arrivals = http.arrivals();
    assert_eq!(arrivals.len(), 3);
    assert_eq!(arrivals[0], start);
    assert_eq!(arrivals[1], start + Duration::from_secs(3));
    assert_eq!(arrivals[2], start + Duration::from_secs(3));
}
