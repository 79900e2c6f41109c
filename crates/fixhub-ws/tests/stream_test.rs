//! Event stream consumer integration tests.
//!
//! Runs the consumer against a mock feed:
//! - Handshake and bearer credential
//! - Bounded buffer and malformed frames
//! - Reconnection and stop behaviour

mod common;
use common::mock_ws::MockWsServer;

use fixhub_core::{Credential, Direction};
use fixhub_ws::{EventStreamConsumer, ReconnectPolicy, StreamConfig, StreamState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn frame(n: i64) -> String {
    serde_json::json!({
        "type": "incoming",
        "sessionId": "FIX.4.4:HUB->CLIENT1",
        "senderCompID": "CLIENT1",
        "targetCompID": "HUB",
        "messageType": "D",
        "messageBody": format!("8=FIX.4.4|35=D|11={n}|"),
        "timestamp": n,
        "direction": "FROM_CLIENT"
    })
    .to_string()
}

fn config(url: String, reconnect: ReconnectPolicy) -> StreamConfig {
    StreamConfig {
        reconnect,
        ..StreamConfig::new(url)
    }
}

fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy {
        enabled: true,
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        max_attempts: 0,
    }
}

/// Poll `check` every 20ms until it holds or two seconds pass.
async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    timeout(Duration::from_secs(2), async {
        loop {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_opens_with_bearer_credential() {
    let server = MockWsServer::start().await;
    let consumer = Arc::new(
        EventStreamConsumer::new(config(server.url(), ReconnectPolicy::disabled()))
            .with_credential(Some(Credential::new("t0k", "admin"))),
    );

    let handle = consumer.start();
    assert!(wait_for(|| consumer.is_connected()).await, "Should open");
    assert_eq!(server.authorizations(), vec![Some("Bearer t0k".to_string())]);

    handle.stop();
    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frame_is_dropped_and_stream_stays_open() {
    let server = MockWsServer::start().await;
    let consumer = Arc::new(EventStreamConsumer::new(config(
        server.url(),
        ReconnectPolicy::disabled(),
    )));
    let handle = consumer.start();
    assert!(wait_for(|| server.connection_count() == 1).await);

    server.push("{bad json}");
    server.push(frame(7));

    assert!(wait_for(|| consumer.stats().decoded == 1).await);
    let events = consumer.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].timestamp, 7);
    assert_eq!(events[0].direction, Direction::FromClient);
    assert_eq!(consumer.stats().dropped, 1);
    assert_eq!(consumer.state(), StreamState::Open);
    assert_eq!(server.connection_count(), 1);

    handle.stop();
    server.shutdown().await;
}

#[tokio::test]
async fn test_buffer_keeps_newest_hundred() {
    let server = MockWsServer::start().await;
    let consumer = Arc::new(EventStreamConsumer::new(config(
        server.url(),
        ReconnectPolicy::disabled(),
    )));
    let handle = consumer.start();
    assert!(wait_for(|| server.connection_count() == 1).await);

    for n in 0..150 {
        server.push(frame(n));
    }

    assert!(wait_for(|| consumer.stats().decoded == 150).await);
    let timestamps: Vec<i64> = consumer.events().iter().map(|e| e.timestamp).collect();
    let expected: Vec<i64> = (50..150).rev().collect();
    assert_eq!(timestamps, expected);

    consumer.clear();
    assert!(consumer.is_empty());

    handle.stop();
    server.shutdown().await;
}

#[tokio::test]
async fn test_reconnects_and_keeps_buffer() {
    let server = MockWsServer::start().await;
    let consumer = Arc::new(EventStreamConsumer::new(config(server.url(), fast_reconnect())));
    let handle = consumer.start();
    assert!(wait_for(|| server.connection_count() == 1).await);

    server.push(frame(1));
    assert!(wait_for(|| consumer.len() == 1).await);

    server.close_all();
    assert!(
        wait_for(|| server.connection_count() == 2 && consumer.is_connected()).await,
        "Should reconnect"
    );
    assert_eq!(consumer.stats().reconnects, 1);
    assert_eq!(consumer.len(), 1, "Buffer survives reconnection");

    server.push(frame(2));
    assert!(wait_for(|| consumer.len() == 2).await);

    handle.stop();
    server.shutdown().await;
}

#[tokio::test]
async fn test_without_reconnect_stays_closed() {
    let server = MockWsServer::start().await;
    let consumer = Arc::new(EventStreamConsumer::new(config(
        server.url(),
        ReconnectPolicy::disabled(),
    )));
    let handle = consumer.start();
    assert!(wait_for(|| consumer.is_connected()).await);

    server.close_all();
    assert!(wait_for(|| handle.is_finished()).await);
    assert_eq!(consumer.state(), StreamState::Closed);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count(), 1);
    server.shutdown().await;
}

#[tokio::test]
async fn test_stop_ends_decoding() {
    let server = MockWsServer::start().await;
    let consumer = Arc::new(EventStreamConsumer::new(config(server.url(), fast_reconnect())));
    let handle = consumer.start();
    assert!(wait_for(|| consumer.is_connected()).await);

    handle.stop();
    handle.stop();
    assert_eq!(consumer.state(), StreamState::Closed);
    assert!(wait_for(|| handle.is_finished()).await);

    server.push(frame(1));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(consumer.stats().decoded, 0);
    assert_eq!(server.connection_count(), 1, "No reconnect after stop");
    server.shutdown().await;
}

#[tokio::test]
async fn test_restart_clears_buffer() {
    let server = MockWsServer::start().await;
    let consumer = Arc::new(EventStreamConsumer::new(config(
        server.url(),
        ReconnectPolicy::disabled(),
    )));
    let first = consumer.start();
    assert!(wait_for(|| server.connection_count() == 1).await);
    server.push(frame(1));
    assert!(wait_for(|| consumer.len() == 1).await);

    let second = consumer.start();
    assert!(first.is_stopped());
    assert!(consumer.is_empty());
    assert!(wait_for(|| server.connection_count() == 2 && consumer.is_connected()).await);

    // Stopping the stale handle does not close the new connection
    first.stop();
    assert!(consumer.is_connected());

    second.stop();
    server.shutdown().await;
}

#[tokio::test]
async fn test_start_after_stop_clears_buffer() {
    let server = MockWsServer::start().await;
    let consumer = Arc::new(EventStreamConsumer::new(config(
        server.url(),
        ReconnectPolicy::disabled(),
    )));
    let first = consumer.start();
    assert!(wait_for(|| server.connection_count() == 1).await);
    server.push(frame(1));
    assert!(wait_for(|| consumer.len() == 1).await);

    first.stop();
    assert_eq!(consumer.state(), StreamState::Closed);
    assert_eq!(consumer.len(), 1, "Stopping alone keeps the events visible");

    let second = consumer.start();
    assert!(consumer.is_empty());
    assert!(wait_for(|| server.connection_count() == 2 && consumer.is_connected()).await);

    second.stop();
    server.shutdown().await;
}
