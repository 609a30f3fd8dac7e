//! Integration tests for end-to-end relay behavior.
//!
//! These tests start a real server and connect real clients,
//! verifying the join gate, init delivery, and update fan-out.

use futures_util::{SinkExt, StreamExt};
use relaypad::client::{ClientState, RelayClient, RelayEvent};
use relaypad::protocol::INVALID_JOIN_CODE;
use relaypad::server::{RelayConfig, RelayServer};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port, return the port and a handle for
/// inspecting live state.
async fn start_test_server() -> (u16, Arc<RelayServer>) {
    let port = free_port().await;
    let config = RelayConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        join_code: "1234".to_string(),
        outbound_capacity: 64,
    };
    let server = Arc::new(RelayServer::new(config));
    let runner = server.clone();
    tokio::spawn(async move {
        runner.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    (port, server)
}

/// Connect a raw WebSocket to the test server.
async fn connect(port: u16) -> WsStream {
    let url = format!("ws://127.0.0.1:{port}");
    let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws
}

async fn send_frame(ws: &mut WsStream, payload: &str) {
    ws.send(Message::Text(payload.into())).await.unwrap();
}

/// Receive the next text frame, skipping control frames.
async fn recv_frame(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream still open")
            .expect("frame decodes");
        match msg {
            Message::Text(raw) => return raw.as_str().to_owned(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected text frame, got {other:?}"),
        }
    }
}

/// Assert that no frame arrives within the window.
async fn expect_silence(ws: &mut WsStream, ms: u64) {
    let result = timeout(Duration::from_millis(ms), ws.next()).await;
    assert!(result.is_err(), "Expected no frame, got {result:?}");
}

/// Receive the next client event, or panic after the timeout.
async fn next_event(rx: &mut mpsc::Receiver<RelayEvent>) -> RelayEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event within timeout")
        .expect("event channel open")
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let (port, _server) = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");

    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to server");
}

#[tokio::test]
async fn test_join_with_valid_code_receives_init() {
    let (port, server) = start_test_server().await;
    let mut ws = connect(port).await;

    send_frame(&mut ws, r#"{"type":"join","code":"1234"}"#).await;

    let reply = recv_frame(&mut ws).await;
    assert_eq!(reply, r#"{"type":"init","text":""}"#);
    assert_eq!(server.member_count().await, 1);
    assert_eq!(server.stats().joins_accepted, 1);
}

#[tokio::test]
async fn test_join_with_wrong_code_is_rejected() {
    let (port, server) = start_test_server().await;
    let mut ws = connect(port).await;

    send_frame(&mut ws, r#"{"type":"join","code":"9999"}"#).await;

    let reply = recv_frame(&mut ws).await;
    assert_eq!(
        reply,
        r#"{"type":"error","message":"Invalid join code."}"#
    );

    // The server closes the connection after the rejection.
    let next = timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("close within timeout");
    match next {
        Some(Ok(Message::Close(_))) | None => {}
        other => panic!("Expected close after rejection, got {other:?}"),
    }

    assert_eq!(server.member_count().await, 0);
    assert_eq!(server.stats().joins_rejected, 1);
    assert_eq!(server.stats().joins_accepted, 0);
}

#[tokio::test]
async fn test_update_broadcasts_to_other_members_only() {
    let (port, server) = start_test_server().await;

    // Alice joins the empty room.
    let mut alice = connect(port).await;
    send_frame(&mut alice, r#"{"type":"join","code":"1234"}"#).await;
    assert_eq!(recv_frame(&mut alice).await, r#"{"type":"init","text":""}"#);

    // Alice replaces the text while alone; nobody is echoed to.
    send_frame(&mut alice, r#"{"type":"updateText","text":"hello"}"#).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Bob joins and his init carries Alice's update.
    let mut bob = connect(port).await;
    send_frame(&mut bob, r#"{"type":"join","code":"1234"}"#).await;
    assert_eq!(
        recv_frame(&mut bob).await,
        r#"{"type":"init","text":"hello"}"#
    );

    // Bob updates; Alice receives it, Bob does not hear himself.
    send_frame(&mut bob, r#"{"type":"updateText","text":"world"}"#).await;
    assert_eq!(
        recv_frame(&mut alice).await,
        r#"{"type":"updateText","text":"world"}"#
    );
    expect_silence(&mut bob, 200).await;

    assert_eq!(server.current_text().await, "world");
    let stats = server.stats();
    assert_eq!(stats.updates_applied, 2);
    // Alice's solo update reached nobody; Bob's reached Alice.
    assert_eq!(stats.broadcasts_queued, 1);
    assert_eq!(stats.broadcasts_dropped, 0);
}

#[tokio::test]
async fn test_update_before_join_is_ignored() {
    let (port, server) = start_test_server().await;
    let mut ws = connect(port).await;

    // Not a member yet, so this must not touch the shared text.
    send_frame(&mut ws, r#"{"type":"updateText","text":"sneak"}"#).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(server.current_text().await, "");
    assert_eq!(server.stats().updates_applied, 0);

    // The connection is still usable; joining now shows untouched text.
    send_frame(&mut ws, r#"{"type":"join","code":"1234"}"#).await;
    assert_eq!(recv_frame(&mut ws).await, r#"{"type":"init","text":""}"#);
}

#[tokio::test]
async fn test_unknown_message_type_is_ignored() {
    let (port, server) = start_test_server().await;
    let mut ws = connect(port).await;

    send_frame(&mut ws, r#"{"type":"chatMessage","body":"hi"}"#).await;

    // Still pre-join, still usable.
    send_frame(&mut ws, r#"{"type":"join","code":"1234"}"#).await;
    assert_eq!(recv_frame(&mut ws).await, r#"{"type":"init","text":""}"#);

    // Unknown types are equally inert after joining.
    send_frame(&mut ws, r#"{"type":"cursorMove","x":3,"y":7}"#).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.current_text().await, "");
    assert_eq!(server.member_count().await, 1);
}

#[tokio::test]
async fn test_malformed_frame_is_dropped() {
    let (port, server) = start_test_server().await;
    let mut ws = connect(port).await;

    // Not JSON at all.
    send_frame(&mut ws, "this is not json").await;
    // Valid JSON, but the join payload is missing its code.
    send_frame(&mut ws, r#"{"type":"join"}"#).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(server.member_count().await, 0);

    // The connection survived both frames.
    send_frame(&mut ws, r#"{"type":"join","code":"1234"}"#).await;
    assert_eq!(recv_frame(&mut ws).await, r#"{"type":"init","text":""}"#);
}

#[tokio::test]
async fn test_disconnect_removes_member() {
    let (port, server) = start_test_server().await;

    let mut alice = connect(port).await;
    send_frame(&mut alice, r#"{"type":"join","code":"1234"}"#).await;
    recv_frame(&mut alice).await;

    let mut bob = connect(port).await;
    send_frame(&mut bob, r#"{"type":"join","code":"1234"}"#).await;
    recv_frame(&mut bob).await;

    assert_eq!(server.member_count().await, 2);

    bob.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.member_count().await, 1);

    // The room keeps working for the remaining member.
    send_frame(&mut alice, r#"{"type":"updateText","text":"after"}"#).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.current_text().await, "after");
}

#[tokio::test]
async fn test_rejoin_resends_current_text() {
    let (port, server) = start_test_server().await;
    let mut ws = connect(port).await;

    send_frame(&mut ws, r#"{"type":"join","code":"1234"}"#).await;
    assert_eq!(recv_frame(&mut ws).await, r#"{"type":"init","text":""}"#);

    send_frame(&mut ws, r#"{"type":"updateText","text":"hi"}"#).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A second join is idempotent: same membership, fresh init.
    send_frame(&mut ws, r#"{"type":"join","code":"1234"}"#).await;
    assert_eq!(recv_frame(&mut ws).await, r#"{"type":"init","text":"hi"}"#);
    assert_eq!(server.member_count().await, 1);
}

#[tokio::test]
async fn test_updates_arrive_in_order() {
    let (port, _server) = start_test_server().await;

    let mut alice = connect(port).await;
    send_frame(&mut alice, r#"{"type":"join","code":"1234"}"#).await;
    recv_frame(&mut alice).await;

    let mut bob = connect(port).await;
    send_frame(&mut bob, r#"{"type":"join","code":"1234"}"#).await;
    recv_frame(&mut bob).await;

    send_frame(&mut alice, r#"{"type":"updateText","text":"one"}"#).await;
    send_frame(&mut alice, r#"{"type":"updateText","text":"two"}"#).await;
    send_frame(&mut alice, r#"{"type":"updateText","text":"three"}"#).await;

    assert_eq!(
        recv_frame(&mut bob).await,
        r#"{"type":"updateText","text":"one"}"#
    );
    assert_eq!(
        recv_frame(&mut bob).await,
        r#"{"type":"updateText","text":"two"}"#
    );
    assert_eq!(
        recv_frame(&mut bob).await,
        r#"{"type":"updateText","text":"three"}"#
    );
}

#[tokio::test]
async fn test_client_receives_init_and_remote_updates() {
    let (port, _server) = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");

    let mut alice = RelayClient::new(&url);
    let mut alice_events = alice.take_event_rx().unwrap();
    alice.connect().await.unwrap();
    assert_eq!(next_event(&mut alice_events).await, RelayEvent::Connected);

    alice.join("1234").await.unwrap();
    assert_eq!(
        next_event(&mut alice_events).await,
        RelayEvent::Init {
            text: String::new()
        }
    );
    assert_eq!(alice.state().await, ClientState::Connected);

    let mut bob = RelayClient::new(&url);
    let mut bob_events = bob.take_event_rx().unwrap();
    bob.connect().await.unwrap();
    assert_eq!(next_event(&mut bob_events).await, RelayEvent::Connected);

    bob.join("1234").await.unwrap();
    assert_eq!(
        next_event(&mut bob_events).await,
        RelayEvent::Init {
            text: String::new()
        }
    );

    bob.send_update("from bob").await.unwrap();
    assert_eq!(
        next_event(&mut alice_events).await,
        RelayEvent::RemoteUpdate {
            text: "from bob".to_string()
        }
    );
}

#[tokio::test]
async fn test_client_join_rejected() {
    let (port, server) = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");

    let mut client = RelayClient::new(&url);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, RelayEvent::Connected);

    client.join("0000").await.unwrap();
    match next_event(&mut events).await {
        RelayEvent::Rejected { message } => assert_eq!(message, INVALID_JOIN_CODE),
        other => panic!("Expected Rejected event, got {other:?}"),
    }

    // The server hangs up right after the rejection.
    assert_eq!(next_event(&mut events).await, RelayEvent::Disconnected);
    assert_eq!(client.state().await, ClientState::Disconnected);
    assert_eq!(server.member_count().await, 0);
}
