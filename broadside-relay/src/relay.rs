//! Relay server core: shared state, WebSocket handler, client registry, and
//! message fan-out.
//!
//! The relay accepts WebSocket connections on `/ws`, tracks every connected
//! client in an insertion-ordered registry, and forwards each inbound text
//! frame verbatim to all currently connected clients, the sender included.
//! When the second client connects, a one-time notice is sent to both so the
//! frontends know a match can start. The same process also serves the game's
//! entry page on `/` and its prebuilt assets from a bundled directory.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use axum::response::Html;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};
use tower_http::services::ServeDir;

/// Text sent to every client the moment the second one connects.
pub const TWO_PLAYERS_NOTICE: &str = "Two players have been connected.";

/// Directory the prebuilt frontend bundle is served from by default.
pub const DEFAULT_ASSETS_DIR: &str = "dist";

/// Entry page returned for `GET /`. References the bundle's module script;
/// everything else the page needs is resolved through the asset fallback.
const INDEX_HTML: &str = "\
<!DOCTYPE html>
<html>
<head>
    <title>Battleship Game</title>
    <script type=\"module\" src=\"/main.js\"></script>
</head>
<body>
    <div id=\"app\"></div>
</body>
</html>
";

/// Identity of a single accepted connection, unique for the process lifetime.
///
/// Registry removal is keyed on this rather than the remote address, so two
/// clients behind the same address never alias each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientId(u64);

/// One registry entry: where the client connected from and the sender half of
/// the channel feeding its WebSocket writer task.
struct Client {
    id: ClientId,
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Message>,
}

/// Shared relay state holding the client registry.
///
/// All registry access goes through the methods here; the interior `RwLock`
/// serializes joins, leaves, and fan-out snapshots so no caller ever observes
/// a half-updated set.
pub struct RelayState {
    clients: RwLock<Vec<Client>>,
    next_id: AtomicU64,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a new relay state with an empty client registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a newly accepted client, returning its id.
    ///
    /// If this append brings the registry to exactly two clients, the
    /// two-players notice is queued to every member before the lock is
    /// released, so no later fan-out can overtake it. The trigger is the
    /// size-2 transition itself: it fires again if the registry drops back to
    /// one and a new client re-completes the pair, and it does not fire when
    /// a third client joins an existing pair.
    pub async fn join(&self, addr: SocketAddr, tx: mpsc::UnboundedSender<Message>) -> ClientId {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut clients = self.clients.write().await;
        clients.push(Client { id, addr, tx });
        if clients.len() == 2 {
            for client in clients.iter() {
                let _ = client.tx.send(Message::Text(TWO_PLAYERS_NOTICE.into()));
            }
            tracing::info!("two players have been connected");
        }
        id
    }

    /// Removes a client from the registry, returning its address if it was
    /// still present.
    ///
    /// Idempotent: removing an id that was already dropped (or never existed)
    /// is a no-op returning `None`.
    pub async fn leave(&self, id: ClientId) -> Option<SocketAddr> {
        let mut clients = self.clients.write().await;
        let index = clients.iter().position(|c| c.id == id)?;
        Some(clients.remove(index).addr)
    }

    /// Fans a text payload out to every connected client in join order.
    ///
    /// The sender is not excluded: game frontends rely on seeing their own
    /// messages echoed back. A client whose writer task has
    /// gone away is treated as disconnected and removed; delivery to the
    /// remaining clients is unaffected.
    pub async fn broadcast(&self, text: &str) {
        let targets: Vec<(ClientId, mpsc::UnboundedSender<Message>)> = {
            let clients = self.clients.read().await;
            clients.iter().map(|c| (c.id, c.tx.clone())).collect()
        };

        let mut dropped = Vec::new();
        for (id, tx) in targets {
            if tx.send(Message::Text(text.into())).is_err() {
                dropped.push(id);
            }
        }
        for id in dropped {
            if let Some(addr) = self.leave(id).await {
                tracing::warn!(%addr, "removing unreachable client during fan-out");
            }
        }
    }

    /// Returns the number of currently registered clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Sends a WebSocket Close frame to every connected client.
    ///
    /// Each client's writer task forwards the frame, which lets the remote
    /// end see an orderly shutdown instead of a dropped TCP connection.
    pub async fn close_all(&self) {
        let clients = self.clients.read().await;
        for client in clients.iter() {
            tracing::info!(addr = %client.addr, "sending close frame to client");
            let _ = client.tx.send(Message::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Register the client (queues the two-players notice if it completes a
///    pair).
/// 2. Spawn a writer task draining the client's channel into the socket.
/// 3. Run the reader loop, fanning out each inbound text frame.
/// 4. On close or transport error, remove the client from the registry.
///
/// Removal runs on every exit path, so the registry never leaks an entry for
/// a dead connection.
pub async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    tracing::info!(%addr, "new client connected");
    let id = state.join(addr, tx).await;

    // Writer task: forwards queued messages to the WebSocket. Keeping this
    // independent per client means one slow receiver never stalls fan-out to
    // the others.
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(%addr, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader loop: every inbound text frame is relayed to all clients,
    // the sender included. Binary, ping, and pong frames are ignored.
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    reader_state.broadcast(text.as_str()).await;
                }
                Message::Close(_) => {
                    tracing::info!(%addr, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.leave(id).await;
    tracing::info!(%addr, "client disconnected");
}

/// `GET /` — fixed entry page for the game frontend.
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Builds the relay router: entry page, WebSocket endpoint, and the asset
/// directory as fallback for everything else.
pub fn build_router(state: Arc<RelayState>, assets_dir: &Path) -> axum::Router {
    axum::Router::new()
        .route("/", axum::routing::get(index))
        .route("/ws", axum::routing::get(ws_handler))
        .fallback_service(ServeDir::new(assets_dir))
        .with_state(state)
}

/// Starts the relay server on the given address with a fresh registry and
/// the default asset directory, returning the bound address and a join
/// handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Path::new(DEFAULT_ASSETS_DIR), Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-built [`RelayState`] and asset
/// directory.
///
/// This is the primary entry point used by both `main.rs` and test code;
/// tests keep their own `Arc` to the state so they can observe the registry
/// from outside.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    assets_dir: &Path,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = build_router(state, assets_dir);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Starts the relay server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port) and returns the bound address
/// and a [`tokio::task::JoinHandle`] for cleanup.
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<SocketAddr>,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}
