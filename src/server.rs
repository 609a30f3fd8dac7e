//! WebSocket relay server: one room, a join-code gate, text fan-out.
//!
//! ```text
//! Client A ──┐
//!             ├── accept loop ── one task per connection
//! Client B ──┘                        │
//!                                     ├── join-code gate
//!                                     ▼
//!                              SessionStore (members + shared text)
//!                                     │
//!                          ┌──────────┴──────────┐
//!                          ▼                     ▼
//!                   outbound queue A      outbound queue B
//!                   (bounded, try_send)   (bounded, try_send)
//! ```
//!
//! Each connection task drives a `select!` over its inbound frames and its
//! own outbound queue. An accepted `updateText` writes the store and takes a
//! membership snapshot under one lock, then enqueues the new value on every
//! other member's queue without blocking; a member whose queue is full or
//! gone loses that delivery and nothing else. Connections that never present
//! the correct join code never become members and never receive the text.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage, INVALID_JOIN_CODE};
use crate::session::{MemberHandle, SessionStore, SharedStore};

/// Relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Address to listen on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Shared secret a client must present to join the room
    #[serde(default = "default_join_code")]
    pub join_code: String,
    /// Outbound frames buffered per member before deliveries are dropped
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_join_code() -> String {
    "1234".to_string()
}

fn default_outbound_capacity() -> usize {
    64
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            join_code: default_join_code(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from `RELAYPAD_`-prefixed environment variables,
    /// reading an optional `.env` file first. Unset variables fall back to
    /// the field defaults.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed("RELAYPAD_").from_env()
    }
}

/// Point-in-time relay counters.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub joins_accepted: u64,
    pub joins_rejected: u64,
    pub updates_applied: u64,
    pub broadcasts_queued: u64,
    pub broadcasts_dropped: u64,
}

/// Atomic counters behind the snapshot, lock-free on the hot path.
#[derive(Default)]
struct AtomicRelayStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    joins_accepted: AtomicU64,
    joins_rejected: AtomicU64,
    updates_applied: AtomicU64,
    broadcasts_queued: AtomicU64,
    broadcasts_dropped: AtomicU64,
}

impl AtomicRelayStats {
    fn snapshot(&self) -> RelayStats {
        RelayStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            joins_accepted: self.joins_accepted.load(Ordering::Relaxed),
            joins_rejected: self.joins_rejected.load(Ordering::Relaxed),
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            broadcasts_queued: self.broadcasts_queued.load(Ordering::Relaxed),
            broadcasts_dropped: self.broadcasts_dropped.load(Ordering::Relaxed),
        }
    }
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    /// The one session store; connection tasks hold clones of the `Arc`.
    store: SharedStore,
    stats: Arc<AtomicRelayStats>,
}

impl RelayServer {
    /// Create a relay with the given configuration. The store starts with
    /// empty text and no members.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            store: Arc::new(RwLock::new(SessionStore::new())),
            stats: Arc::new(AtomicRelayStats::default()),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the accept loop. Call from an async runtime; it only
    /// returns on listener failure.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on ws://{}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let store = self.store.clone();
            let config = self.config.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, store, config, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle one WebSocket connection from accept to close.
    ///
    /// Closed is terminal from any state and any cause, so membership
    /// removal happens unconditionally after the session loop exits,
    /// including on send failures propagated out of it.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        store: SharedStore,
        config: RelayConfig,
        stats: Arc<AtomicRelayStats>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        log::info!("WebSocket connection established from {addr}");

        stats.total_connections.fetch_add(1, Ordering::Relaxed);
        stats.active_connections.fetch_add(1, Ordering::Relaxed);

        let conn_id = Uuid::new_v4();
        let result = Self::serve_member(ws_stream, addr, conn_id, &store, &config, &stats).await;

        store.write().await.remove_member(&conn_id);
        stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        log::info!("Connection closed from {addr}");

        result
    }

    /// Drive one connection's protocol session: inbound frames on one side,
    /// the member's own outbound queue on the other.
    async fn serve_member(
        ws_stream: WebSocketStream<TcpStream>,
        addr: SocketAddr,
        conn_id: Uuid,
        store: &SharedStore,
        config: &RelayConfig,
        stats: &AtomicRelayStats,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // The outbound queue exists before the join so the handle can be
        // registered the instant a join is accepted. Unjoined connections
        // simply never have anything queued.
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(config.outbound_capacity.max(1));
        let mut joined = false;

        loop {
            tokio::select! {
                inbound = ws_receiver.next() => {
                    match inbound {
                        Some(Ok(Message::Text(raw))) => {
                            let msg = match ClientMessage::decode(raw.as_str()) {
                                Ok(msg) => msg,
                                Err(e) => {
                                    // Malformed frame: drop it, keep serving.
                                    log::warn!("Dropping malformed message from {addr}: {e}");
                                    continue;
                                }
                            };

                            match msg {
                                ClientMessage::Join { code } => {
                                    if code != config.join_code {
                                        stats.joins_rejected.fetch_add(1, Ordering::Relaxed);
                                        log::info!("Join rejected for {addr}: invalid code");
                                        let error = ServerMessage::Error {
                                            message: INVALID_JOIN_CODE.to_string(),
                                        };
                                        ws_sender.send(Message::Text(error.encode()?.into())).await?;
                                        ws_sender.send(Message::Close(None)).await?;
                                        break;
                                    }

                                    // Insert and read under one write guard so no
                                    // accepted update can slip between membership
                                    // and the init snapshot. A repeated join
                                    // re-inserts the same handle and re-sends init.
                                    let text = {
                                        let mut session = store.write().await;
                                        session.add_member(MemberHandle::new(conn_id, out_tx.clone()));
                                        session.text().to_owned()
                                    };
                                    joined = true;
                                    stats.joins_accepted.fetch_add(1, Ordering::Relaxed);

                                    let init = ServerMessage::Init { text };
                                    ws_sender.send(Message::Text(init.encode()?.into())).await?;
                                    log::info!("Member {conn_id} joined from {addr}");
                                }

                                ClientMessage::UpdateText { text } => {
                                    if !joined {
                                        // Unjoined peers cannot touch the shared text.
                                        log::debug!("Ignoring updateText from unjoined {addr}");
                                        continue;
                                    }

                                    // Write, then snapshot, under one guard: every
                                    // enqueue below observes the post-write value.
                                    let members = {
                                        let mut session = store.write().await;
                                        session.set_text(text.clone());
                                        session.snapshot_members()
                                    };
                                    stats.updates_applied.fetch_add(1, Ordering::Relaxed);

                                    let update = ServerMessage::UpdateText { text };
                                    let frame = Message::Text(update.encode()?.into());
                                    for member in &members {
                                        if member.id() == conn_id {
                                            continue; // Never echo back to the sender.
                                        }
                                        if member.try_queue(frame.clone()) {
                                            stats.broadcasts_queued.fetch_add(1, Ordering::Relaxed);
                                        } else {
                                            stats.broadcasts_dropped.fetch_add(1, Ordering::Relaxed);
                                            log::warn!(
                                                "Dropping update for member {}: outbound queue unavailable",
                                                member.id()
                                            );
                                        }
                                    }
                                }

                                ClientMessage::Unknown => {
                                    // Passthrough-ignore: unknown types have no
                                    // effect in any state.
                                    log::debug!("Ignoring unknown message type from {addr}");
                                }
                            }
                        }

                        Some(Ok(Message::Binary(_))) => {
                            // The protocol rides in text frames; binary is ignored.
                            log::debug!("Ignoring binary frame from {addr}");
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => break,

                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // A broadcast queued for this member by another connection's task.
                outbound = out_rx.recv() => {
                    match outbound {
                        Some(frame) => ws_sender.send(frame).await?,
                        None => break,
                    }
                }
            }
        }

        Ok(())
    }

    /// Current relay counters.
    pub fn stats(&self) -> RelayStats {
        self.stats.snapshot()
    }

    /// Number of currently joined members.
    pub async fn member_count(&self) -> usize {
        self.store.read().await.member_count()
    }

    /// The current shared text.
    pub async fn current_text(&self) -> String {
        self.store.read().await.text().to_owned()
    }

    /// The configured listen address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}
