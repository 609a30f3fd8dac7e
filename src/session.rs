//! In-memory session store: the single shared room.
//!
//! Holds the two pieces of shared mutable state, the joined member set and
//! the latest shared text, and nothing else. The store is a plain struct;
//! the relay owns it behind [`SharedStore`] and serializes all access with
//! that lock, so compound operations (join, update) see one consistent point.
//!
//! Members are keyed by their server-assigned connection id, which makes
//! removal on close O(1) and makes repeated joins from the same connection
//! idempotent.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Shared handle to the one session store. Created by the relay at startup;
/// connection tasks hold clones for the life of the process.
pub type SharedStore = Arc<RwLock<SessionStore>>;

/// A joined connection as the store sees it: connection id plus the bounded
/// outbound queue its own task drains into the socket.
#[derive(Debug, Clone)]
pub struct MemberHandle {
    id: Uuid,
    outbound: mpsc::Sender<Message>,
}

impl MemberHandle {
    pub fn new(id: Uuid, outbound: mpsc::Sender<Message>) -> Self {
        Self { id, outbound }
    }

    /// Server-assigned connection id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Best-effort, non-blocking enqueue of one outbound frame.
    ///
    /// Returns `false` when the member's queue is full (slow consumer) or its
    /// receiver is gone (connection already closing). Callers skip that
    /// member and keep going; a broadcast never stalls on one peer.
    pub fn try_queue(&self, frame: Message) -> bool {
        self.outbound.try_send(frame).is_ok()
    }
}

/// The single shared room: current members plus the latest shared text.
///
/// `text` always holds the most recently accepted update as a whole-value
/// replacement; there is no history. Created once with empty text and no
/// members; lives until the process exits.
pub struct SessionStore {
    members: HashMap<Uuid, MemberHandle>,
    text: String,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
            text: String::new(),
        }
    }

    /// Add a member. Re-adding the same connection id replaces the existing
    /// entry, so a duplicate join is a no-op for the member set.
    pub fn add_member(&mut self, member: MemberHandle) {
        self.members.insert(member.id(), member);
    }

    /// Remove a member if present. Absent ids are a silent no-op so late or
    /// duplicate close notifications are safe.
    pub fn remove_member(&mut self, id: &Uuid) -> Option<MemberHandle> {
        self.members.remove(id)
    }

    /// The current shared text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace the shared text unconditionally. Last write wins.
    pub fn set_text(&mut self, value: String) {
        self.text = value;
    }

    /// Point-in-time copy of the member set for broadcast iteration.
    /// Membership changes after the snapshot do not affect the iteration.
    pub fn snapshot_members(&self) -> Vec<MemberHandle> {
        self.members.values().cloned().collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_member(&self, id: &Uuid) -> bool {
        self.members.contains_key(id)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
