//! HTTP route handlers for the BidRoom server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `GET /ws` - WebSocket endpoint carrying the room protocol
//! - `GET /health` - Health check endpoint
//! - `GET /auction-state/{room_id}` - Snapshot of a room (defaults if absent)
//! - `GET /room-stats/{room_id}` - Role breakdown of a room's members
//! - `POST /reset-auction/{room_id}` - Reset a room to the default snapshot
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration
//! - The [`Relay`] behind a single async mutex
//! - Server start time for uptime reporting
//!
//! Every handler holds the relay lock only for the duration of one
//! synchronous relay call, so inbound events are applied one at a time.
//!
//! # Example
//!
//! ```rust,no_run
//! use bidroom_server::routes::{create_router, AppState};
//! use bidroom_server::config::Config;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::new(config);
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::{HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::broadcast::{connection_channel, ConnectionRx};
use crate::config::Config;
use crate::relay::{Relay, RelaySettings};
use crate::types::{AuctionState, RoomStats, SessionId};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Room relay shared by every connection and request.
    pub relay: Arc<Mutex<Relay>>,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates a new application state with an in-memory relay.
    ///
    /// # Example
    ///
    /// ```rust
    /// use bidroom_server::routes::AppState;
    /// use bidroom_server::config::Config;
    ///
    /// let state = AppState::new(Config::default());
    /// ```
    #[must_use]
    pub fn new(config: Config) -> Self {
        let relay = Relay::new(RelaySettings::from(&config));
        Self::with_relay(config, relay)
    }

    /// Creates application state around an existing relay.
    ///
    /// Useful for testing or when a custom room store is needed.
    #[must_use]
    pub fn with_relay(config: Config, relay: Relay) -> Self {
        Self {
            config: Arc::new(config),
            relay: Arc::new(Mutex::new(relay)),
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("relay", &"<Relay>")
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes and middleware configured.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/ws", get(get_ws))
        .route("/health", get(get_health))
        .route("/auction-state/{room_id}", get(get_auction_state))
        .route("/room-stats/{room_id}", get(get_room_stats))
        .route("/reset-auction/{room_id}", post(post_reset_auction))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Builds the CORS policy: permissive unless origins are configured.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

// ============================================================================
// GET /ws - WebSocket Room Protocol
// ============================================================================

/// GET /ws - WebSocket endpoint.
///
/// The connection starts unjoined. Clients send `join-room` to enter a room
/// and then exchange `{"event": ..., "data": ...}` text frames.
///
/// # Responses
///
/// - `101 Switching Protocols` - WebSocket upgrade successful
async fn get_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state.relay))
}

/// Handles an established WebSocket connection.
///
/// Registers the connection with the relay, forwards its outbound queue to
/// the socket and feeds inbound text frames to the relay until the client
/// goes away or the relay drops the connection for falling behind.
async fn handle_websocket(socket: WebSocket, relay: Arc<Mutex<Relay>>) {
    use futures_util::{SinkExt, StreamExt};

    let session_id: SessionId = Uuid::new_v4();
    let (tx, rx) = connection_channel();
    relay.lock().await.connect(session_id, tx);

    let (mut sender, mut receiver) = socket.split();
    info!(session_id = %session_id, "WebSocket client connected");

    // Spawn a task to forward room events to the client
    let mut forward_task = tokio::spawn(async move {
        let mut rx: ConnectionRx = rx;
        while let Some(event) = rx.recv().await {
            match event.to_json() {
                Ok(json) => {
                    trace!(session_id = %session_id, event = event.name(), "Sending event");
                    if let Err(err) = sender.send(Message::Text(json.into())).await {
                        debug!(error = %err, "Failed to send event to WebSocket client");
                        break;
                    }
                }
                Err(err) => {
                    error!(error = %err, event = event.name(), "Failed to serialize event");
                }
            }
        }
        let _ = sender.close().await;
    });

    let read_loop = async {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    relay.lock().await.handle_text(session_id, text.as_str());
                }
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        relay.lock().await.handle_text(session_id, text);
                    }
                    Err(_) => debug!(session_id = %session_id, "Ignoring non-UTF-8 binary frame"),
                },
                Ok(Message::Close(_)) => {
                    debug!(session_id = %session_id, "WebSocket client sent close frame");
                    break;
                }
                Ok(Message::Ping(data)) => {
                    // axum handles pong automatically
                    trace!(data_len = data.len(), "Received ping");
                }
                Ok(Message::Pong(_)) => {}
                Err(err) => {
                    debug!(session_id = %session_id, error = %err, "Connection dropped");
                    break;
                }
            }
        }
    };

    tokio::select! {
        () = read_loop => {}
        _ = &mut forward_task => {
            debug!(session_id = %session_id, "Outbound queue closed, closing connection");
        }
    }

    relay.lock().await.disconnect(session_id);
    forward_task.abort();
    info!(session_id = %session_id, "WebSocket client disconnected");
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Time the response was produced.
    pub timestamp: DateTime<Utc>,

    /// Number of open WebSocket connections.
    pub total_connections: usize,

    /// Number of rooms holding state.
    pub active_rooms: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
///
/// # Response
///
/// ```json
/// {
///   "status": "ok",
///   "timestamp": "2024-03-01T12:00:00Z",
///   "totalConnections": 42,
///   "activeRooms": 3,
///   "uptimeSeconds": 3600
/// }
/// ```
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let relay = state.relay.lock().await;

    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        total_connections: relay.connection_count(),
        active_rooms: relay.room_count(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Room endpoints
// ============================================================================

/// GET /auction-state/{room_id} - Current snapshot of a room.
///
/// Rooms without state answer with the default snapshot; nothing is
/// allocated.
async fn get_auction_state(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Json<AuctionState> {
    Json(state.relay.lock().await.snapshot(&room_id))
}

/// GET /room-stats/{room_id} - Role breakdown of a room's members.
async fn get_room_stats(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Json<RoomStats> {
    Json(state.relay.lock().await.room_stats(&room_id))
}

/// Response body for `POST /reset-auction/{room_id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub success: bool,
    pub message: String,
}

/// POST /reset-auction/{room_id} - Reset a room to the default snapshot.
///
/// Members of the room receive the fresh `auction-state`. Resetting a room
/// that does not exist succeeds without creating it.
async fn post_reset_auction(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Response {
    let existed = {
        let mut relay = state.relay.lock().await;
        let existed = relay.has_room(&room_id);
        relay.reset_room(&room_id);
        existed
    };

    let message = if existed {
        format!("Auction state reset for room {room_id}")
    } else {
        format!("Room {room_id} has no active auction; nothing to reset")
    };

    Json(ResetResponse {
        success: true,
        message,
    })
    .into_response()
}

// ============================================================================
// Tests
// ============================================================================
