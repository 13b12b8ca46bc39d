//! End-to-end tests over real WebSocket connections.
//!
//! A server is bound to an ephemeral port and driven by `tokio-tungstenite`
//! clients speaking the `{"event": ..., "data": ...}` frame protocol.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use bidroom_server::config::Config;
use bidroom_server::routes::{create_router, AppState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long to wait for an expected frame.
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait before concluding no frame is coming.
const QUIET_PERIOD: Duration = Duration::from_millis(200);

// ============================================================================
// Test Helpers
// ============================================================================

/// Spawns a test server on a random available port.
async fn spawn_test_server() -> (SocketAddr, AppState) {
    let state = AppState::new(Config::default());
    let app = create_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Waits until the relay holds exactly `rooms` rooms.
async fn wait_for_room_count(state: &AppState, rooms: usize) {
    timeout(RECV_TIMEOUT, async {
        loop {
            if state.relay.lock().await.room_count() == rooms {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("room count settled");
}

struct WsClient {
    stream: WsStream,
}

impl WsClient {
    async fn connect(addr: SocketAddr) -> Self {
        let (stream, _response) = connect_async(format!("ws://{addr}/ws"))
            .await
            .expect("WebSocket handshake");
        Self { stream }
    }

    async fn send(&mut self, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data }).to_string();
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .expect("send frame");
    }

    /// Next text frame as `(event, data)`.
    async fn recv(&mut self) -> (String, Value) {
        loop {
            let msg = timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .expect("WebSocket error");
            if let Message::Text(text) = msg {
                let mut frame: Value = serde_json::from_str(text.as_str()).unwrap();
                let event = frame["event"].as_str().unwrap().to_string();
                return (event, frame["data"].take());
            }
        }
    }

    /// Receives frames until `event` arrives and returns its data.
    async fn expect(&mut self, event: &str) -> Value {
        loop {
            let (name, data) = self.recv().await;
            if name == event {
                return data;
            }
        }
    }

    async fn assert_quiet(&mut self) {
        let next = timeout(QUIET_PERIOD, self.stream.next()).await;
        assert!(next.is_err(), "unexpected frame: {next:?}");
    }

    async fn join(&mut self, room: &str, role: &str, team: Option<&str>) -> Value {
        let mut data = json!({ "roomId": room, "type": role });
        if let Some(team) = team {
            data["teamName"] = json!(team);
        }
        self.send("join-room", data).await;

        let (event, ack) = self.recv().await;
        assert_eq!(event, "room-joined");
        let (event, _snapshot) = self.recv().await;
        assert_eq!(event, "auction-state");
        let (event, _stats) = self.recv().await;
        assert_eq!(event, "clients-update");
        ack
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn join_acknowledges_role() {
    let (addr, _state) = spawn_test_server().await;
    let mut admin = WsClient::connect(addr).await;
    let mut second = WsClient::connect(addr).await;

    let ack = admin.join("R1", "admin", None).await;
    assert_eq!(ack["role"], "admin");
    assert_eq!(ack["roomId"], "R1");

    let ack = second.join("R1", "admin", None).await;
    assert_eq!(ack["role"], "spectator");
    assert_eq!(ack["requestedRole"], "admin");
}

#[tokio::test]
async fn bid_reaches_every_member_of_the_room_only() {
    let (addr, _state) = spawn_test_server().await;
    let mut admin = WsClient::connect(addr).await;
    let mut team = WsClient::connect(addr).await;
    let mut outsider = WsClient::connect(addr).await;

    admin.join("R1", "admin", None).await;
    team.join("R1", "team", Some("Mumbai Indians")).await;
    outsider.join("R2", "spectator", None).await;
    admin.expect("clients-update").await;

    admin
        .send(
            "update-auction-state",
            json!({
                "currentPlayer": { "id": "P1", "name": "Player One", "basePrice": 2 },
                "isAuctionActive": true
            }),
        )
        .await;
    admin.expect("auction-state").await;
    team.expect("auction-state").await;

    team.send(
        "place-bid",
        json!({
            "teamName": "Mumbai Indians",
            "amount": 5,
            "playerId": "P1",
            "playerName": "Player One"
        }),
    )
    .await;

    let state = admin.expect("auction-state").await;
    assert_eq!(state["currentPlayer"]["currentBid"], 5.0);
    assert_eq!(state["currentPlayer"]["currentBidder"], "Mumbai Indians");
    let bid = admin.expect("new-bid").await;
    assert_eq!(bid["amount"], 5.0);
    assert_eq!(bid["teamName"], "Mumbai Indians");

    let bid = team.expect("new-bid").await;
    assert_eq!(bid["playerId"], "P1");

    outsider.assert_quiet().await;
}

#[tokio::test]
async fn refused_operation_is_reported_to_sender() {
    let (addr, _state) = spawn_test_server().await;
    let mut admin = WsClient::connect(addr).await;
    let mut viewer = WsClient::connect(addr).await;

    admin.join("R1", "admin", None).await;
    viewer.join("R1", "spectator", None).await;
    admin.expect("clients-update").await;

    viewer
        .send("update-auction-state", json!({ "timer": 5 }))
        .await;

    let (event, rejection) = viewer.recv().await;
    assert_eq!(event, "operation-rejected");
    assert_eq!(rejection["operation"], "update-auction-state");
    assert_eq!(rejection["reason"]["code"], "forbidden");
    admin.assert_quiet().await;
}

#[tokio::test]
async fn garbage_frames_do_not_drop_the_connection() {
    let (addr, _state) = spawn_test_server().await;
    let mut client = WsClient::connect(addr).await;

    client
        .stream
        .send(Message::Text("not json".into()))
        .await
        .unwrap();
    let (event, _) = client.recv().await;
    assert_eq!(event, "operation-rejected");

    let ack = client.join("R1", "spectator", None).await;
    assert_eq!(ack["role"], "spectator");
}

#[tokio::test]
async fn end_room_notifies_all_members() {
    let (addr, state) = spawn_test_server().await;
    let mut admin = WsClient::connect(addr).await;
    let mut team = WsClient::connect(addr).await;

    admin.join("R1", "admin", None).await;
    team.join("R1", "team", Some("Mumbai Indians")).await;
    admin.expect("clients-update").await;

    admin.send("end-room", json!({ "roomId": "R1" })).await;

    let ended = team.expect("room-ended").await;
    assert_eq!(ended["roomId"], "R1");
    admin.expect("room-ended").await;
    assert_eq!(state.relay.lock().await.room_count(), 0);
}

#[tokio::test]
async fn disconnect_updates_remaining_members() {
    let (addr, state) = spawn_test_server().await;
    let mut admin = WsClient::connect(addr).await;
    let mut team = WsClient::connect(addr).await;

    admin.join("R1", "admin", None).await;
    team.join("R1", "team", Some("Mumbai Indians")).await;
    admin.expect("clients-update").await;

    team.stream.close(None).await.unwrap();

    let stats = admin.expect("clients-update").await;
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["teams"], 0);

    admin.stream.close(None).await.unwrap();
    wait_for_room_count(&state, 0).await;
}

#[tokio::test]
async fn dropped_socket_without_close_frame_leaves_the_room() {
    let (addr, state) = spawn_test_server().await;
    let mut admin = WsClient::connect(addr).await;
    let mut viewer = WsClient::connect(addr).await;

    admin.join("R1", "admin", None).await;
    viewer.join("R1", "spectator", None).await;
    admin.expect("clients-update").await;

    drop(viewer);

    let stats = admin.expect("clients-update").await;
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["spectators"], 0);

    drop(admin);
    wait_for_room_count(&state, 0).await;
    assert_eq!(state.relay.lock().await.connection_count(), 0);
}

#[tokio::test]
async fn repeated_join_keeps_room_state() {
    let (addr, state) = spawn_test_server().await;
    let mut admin = WsClient::connect(addr).await;

    admin.join("R1", "admin", None).await;
    admin
        .send("update-auction-state", json!({ "timer": 5, "isAuctionActive": true }))
        .await;
    admin.expect("auction-state").await;

    admin.send("join-room", json!({ "roomId": "R1", "type": "admin" })).await;
    let ack = admin.expect("room-joined").await;
    assert_eq!(ack["role"], "admin");
    let (event, snapshot) = admin.recv().await;
    assert_eq!(event, "auction-state");
    assert_eq!(snapshot["timer"], 5);
    assert_eq!(snapshot["isAuctionActive"], true);
    assert_eq!(state.relay.lock().await.room_count(), 1);
}
