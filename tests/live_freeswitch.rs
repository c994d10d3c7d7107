//! Integration tests against a live FreeSWITCH instance.
//!
//! These tests require FreeSWITCH ESL on 127.0.0.1:8021 with password ClueCon.
//! Run with: cargo test --test live_freeswitch -- --ignored

use eventsocket::InboundSocket;
use std::time::Duration;

const ESL_HOST: &str = "127.0.0.1";
const ESL_PORT: u16 = 8021;
const ESL_PASSWORD: &str = "ClueCon";

async fn connect() -> InboundSocket {
    let socket = InboundSocket::connect(ESL_HOST, ESL_PORT, ESL_PASSWORD)
        .await
        .expect("failed to connect to FreeSWITCH");
    socket.set_command_timeout(Duration::from_secs(10));
    socket
}

#[tokio::test]
#[ignore]
async fn live_connect_and_status() {
    let socket = connect().await;
    assert!(socket.is_connected());

    let response = socket
        .api("status")
        .await
        .unwrap();
    assert!(response.success());
    assert!(
        response
            .body()
            .contains("UP"),
        "expected UP in status: {}",
        response.body()
    );
}

#[tokio::test]
#[ignore]
async fn live_subscribe_and_recv_heartbeat() {
    let socket = connect().await;
    let mut events = socket.events();

    socket
        .subscribe_events(&["HEARTBEAT"])
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(25), events.recv())
        .await
        .expect("timeout waiting for heartbeat")
        .expect("stream completed")
        .expect("event error");

    assert_eq!(event.event_name(), Some("HEARTBEAT"));
    assert!(event
        .header("Core-UUID")
        .is_some());
}

#[tokio::test]
#[ignore]
async fn live_bgapi_status() {
    let socket = connect().await;

    let result = socket
        .bgapi("status", None, None)
        .await
        .unwrap();
    assert!(result.success(), "bgapi status failed: {}", result.error());
    assert!(result
        .body()
        .unwrap_or("")
        .contains("UP"));
}

#[tokio::test]
#[ignore]
async fn live_api_failure_keeps_connection() {
    let socket = connect().await;

    let response = socket
        .api("no_such_command_exists")
        .await
        .unwrap();
    assert!(!response.success());
    assert!(socket.is_connected());

    let response = socket
        .api("status")
        .await
        .unwrap();
    assert!(response.success());
}
