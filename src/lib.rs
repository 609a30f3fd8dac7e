//! # relaypad: single-room WebSocket text relay
//!
//! Clients join one shared room with a secret code and collaboratively
//! replace a single shared text value; every accepted update is fanned out
//! in real time to all other members, never back to the sender.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket       ┌─────────────┐
//! │ RelayClient │ ◄─────────────────► │ RelayServer │
//! │ (per user)  │     JSON frames     │  (central)  │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                     ┌──────┴───────┐
//!                                     │ SessionStore │
//!                                     │ members+text │
//!                                     └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire messages (`join`, `init`, `updateText`, `error`)
//! - [`session`]: the single room, member set plus latest shared text
//! - [`server`]: WebSocket relay with the join-code gate and fan-out
//! - [`client`]: WebSocket client for protocol consumers and tests

pub mod protocol;
pub mod session;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{ClientMessage, ProtocolError, ServerMessage, INVALID_JOIN_CODE};
pub use session::{MemberHandle, SessionStore, SharedStore};
pub use server::{RelayConfig, RelayServer, RelayStats};
pub use client::{ClientState, RelayClient, RelayEvent};
