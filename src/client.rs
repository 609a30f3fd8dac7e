//! WebSocket client for the relay.
//!
//! Used by consumers of the protocol (the game client connects exactly this
//! way) and by the integration tests. Provides:
//! - Connection lifecycle (connect, observe disconnect)
//! - Join with the shared code, then send whole-text updates
//! - Server frames decoded into [`RelayEvent`]s on an event channel

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the relay client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Transport established.
    Connected,
    /// Transport lost or closed by the relay.
    Disconnected,
    /// Join accepted; carries the shared text at the moment of joining.
    Init { text: String },
    /// Another member replaced the shared text.
    RemoteUpdate { text: String },
    /// Join rejected; the relay closes the transport right after this.
    Rejected { message: String },
}

/// The relay client.
///
/// `connect` spawns a writer task draining an outbound queue into the socket
/// and a reader task decoding server frames into events, mirroring the
/// relay's own per-connection split.
pub struct RelayClient {
    server_url: String,
    state: Arc<RwLock<ClientState>>,
    /// Channel into the writer task; `None` until connected.
    outgoing_tx: Option<mpsc::Sender<String>>,
    /// Event receiver handed to the application once.
    event_rx: Option<mpsc::Receiver<RelayEvent>>,
    /// Event sender held by the reader task.
    event_tx: mpsc::Sender<RelayEvent>,
}

impl RelayClient {
    /// Create a client for the given `ws://host:port` URL.
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ClientState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.event_rx.take()
    }

    /// Connect to the relay.
    ///
    /// Spawns background tasks for reading and writing WebSocket frames.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ClientState::Connecting;

        let ws_result = tokio_tungstenite::connect_async(&self.server_url).await;
        match ws_result {
            Ok((ws_stream, _)) => {
                let (mut ws_writer, mut ws_reader) = ws_stream.split();

                let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
                self.outgoing_tx = Some(out_tx);

                // Writer task: forward outgoing payloads to the socket.
                tokio::spawn(async move {
                    while let Some(payload) = out_rx.recv().await {
                        if ws_writer.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                });

                *self.state.write().await = ClientState::Connected;
                let _ = self.event_tx.send(RelayEvent::Connected).await;

                // Reader task: decode server frames into events.
                let event_tx = self.event_tx.clone();
                let state = self.state.clone();
                tokio::spawn(async move {
                    while let Some(msg) = ws_reader.next().await {
                        match msg {
                            Ok(Message::Text(raw)) => {
                                match ServerMessage::decode(raw.as_str()) {
                                    Ok(server_msg) => {
                                        let event = match server_msg {
                                            ServerMessage::Init { text } => {
                                                RelayEvent::Init { text }
                                            }
                                            ServerMessage::UpdateText { text } => {
                                                RelayEvent::RemoteUpdate { text }
                                            }
                                            ServerMessage::Error { message } => {
                                                RelayEvent::Rejected { message }
                                            }
                                        };
                                        if event_tx.send(event).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        log::debug!("Ignoring undecodable relay frame: {e}");
                                    }
                                }
                            }
                            Ok(Message::Close(_)) | Err(_) => break,
                            _ => {}
                        }
                    }

                    // Transport gone, whatever the cause.
                    *state.write().await = ClientState::Disconnected;
                    let _ = event_tx.send(RelayEvent::Disconnected).await;
                });

                Ok(())
            }
            Err(_e) => {
                *self.state.write().await = ClientState::Disconnected;
                Err(ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Send a join request with the given code.
    ///
    /// The relay answers with `init` (surfaced as [`RelayEvent::Init`]) or
    /// `error` followed by a close.
    pub async fn join(&self, code: impl Into<String>) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Join { code: code.into() }).await
    }

    /// Replace the shared text. Only honored by the relay once joined.
    pub async fn send_update(&self, text: impl Into<String>) -> Result<(), ProtocolError> {
        self.send(ClientMessage::UpdateText { text: text.into() })
            .await
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), ProtocolError> {
        let payload = msg.encode()?;
        match &self.outgoing_tx {
            Some(tx) => tx
                .send(payload)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Get the current connection state.
    pub async fn state(&self) -> ClientState {
        *self.state.read().await
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
