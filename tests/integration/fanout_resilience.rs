// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for fan-out under failures and concurrency.
//!
//! Validates the relay's failure semantics over real connections:
//! - an abrupt disconnect (no close frame) never crashes the relay and never
//!   blocks delivery to the surviving clients
//! - the dead client is removed from the registry and from future fan-outs
//! - messages from concurrent senders are each delivered exactly once per
//!   client, preserving per-sender order

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use broadside_relay::relay::{self, RelayState, TWO_PLAYERS_NOTICE};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_relay() -> (std::net::SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) =
        relay::start_server_with_state("127.0.0.1:0", Path::new("dist"), Arc::clone(&state))
            .await
            .expect("failed to start relay server");
    (addr, state)
}

async fn connect(addr: std::net::SocketAddr) -> WsClient {
    let url = format!("ws://{addr}/ws");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

async fn send_text(ws: &mut WsClient, text: &str) {
    ws.send(tungstenite::Message::Text(text.into()))
        .await
        .unwrap();
}

async fn recv_text(ws: &mut WsClient) -> String {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed unexpectedly")
        .unwrap();
    msg.into_text().unwrap().as_str().to_string()
}

async fn wait_for_count(state: &RelayState, expected: usize) {
    for _ in 0..100 {
        if state.client_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "registry never reached {expected} clients (currently {})",
        state.client_count().await
    );
}

#[tokio::test]
async fn abrupt_disconnect_does_not_disturb_survivor() {
    let (addr, state) = start_relay().await;

    let mut ws_a = connect(addr).await;
    let ws_b = connect(addr).await;
    assert_eq!(recv_text(&mut ws_a).await, TWO_PLAYERS_NOTICE);

    // Kill B's connection without a close handshake.
    drop(ws_b);

    // A message racing the disconnect may or may not still target B, but it
    // must reach A either way and the relay must stay up.
    send_text(&mut ws_a, "fire:1,1").await;
    assert_eq!(recv_text(&mut ws_a).await, "fire:1,1");

    // Once the transport reports the closure, B's entry is reaped.
    wait_for_count(&state, 1).await;

    send_text(&mut ws_a, "fire:2,2").await;
    assert_eq!(recv_text(&mut ws_a).await, "fire:2,2");

    // The relay still accepts fresh connections afterwards.
    let mut ws_c = connect(addr).await;
    assert_eq!(recv_text(&mut ws_c).await, TWO_PLAYERS_NOTICE);
}

#[tokio::test]
async fn concurrent_senders_deliver_once_per_client_in_sender_order() {
    let (addr, _state) = start_relay().await;

    let mut ws_a = connect(addr).await;
    let mut ws_b = connect(addr).await;
    assert_eq!(recv_text(&mut ws_a).await, TWO_PLAYERS_NOTICE);
    assert_eq!(recv_text(&mut ws_b).await, TWO_PLAYERS_NOTICE);

    let rounds = 10u32;
    for i in 0..rounds {
        send_text(&mut ws_a, &format!("a-{i}")).await;
        send_text(&mut ws_b, &format!("b-{i}")).await;
    }

    // Every client sees all 2 * rounds messages; the interleaving between
    // senders is unspecified, but each sender's own sequence stays ordered.
    for ws in [&mut ws_a, &mut ws_b] {
        let mut from_a = Vec::new();
        let mut from_b = Vec::new();
        for _ in 0..2 * rounds {
            let text = recv_text(ws).await;
            if let Some(rest) = text.strip_prefix("a-") {
                from_a.push(rest.parse::<u32>().unwrap());
            } else if let Some(rest) = text.strip_prefix("b-") {
                from_b.push(rest.parse::<u32>().unwrap());
            } else {
                panic!("unexpected frame: {text}");
            }
        }
        let expected: Vec<u32> = (0..rounds).collect();
        assert_eq!(from_a, expected, "messages from A arrived out of order");
        assert_eq!(from_b, expected, "messages from B arrived out of order");
    }
}

#[tokio::test]
async fn close_all_sends_close_frames_to_every_client() {
    let (addr, state) = start_relay().await;

    let mut ws_a = connect(addr).await;
    let mut ws_b = connect(addr).await;
    assert_eq!(recv_text(&mut ws_a).await, TWO_PLAYERS_NOTICE);
    assert_eq!(recv_text(&mut ws_b).await, TWO_PLAYERS_NOTICE);

    state.close_all().await;

    // Both clients observe an orderly close instead of a dropped socket.
    for ws in [&mut ws_a, &mut ws_b] {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close frame")
            .expect("stream ended without a frame")
            .unwrap();
        assert!(msg.is_close(), "expected close frame, got {msg:?}");
    }
}
