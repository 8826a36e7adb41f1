//! Live connection and room-membership state.
//!
//! The registry is the single source of truth for "who is connected and in
//! which rooms". All maps are sharded (`DashMap`), so connect/join/
//! disconnect traffic for unrelated rooms never contends on one lock.
//!
//! Every operation is total over "the connection may or may not exist":
//! disconnect races are expected and absorbed as no-ops, never surfaced as
//! errors. Nothing outside this module holds a reference to a connection
//! beyond its id.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque identifier for one live socket.
pub type ConnectionId = Uuid;

/// Builds the room key for a conversation id.
///
/// Rooms are keyed by conversation; the prefix keeps the key space stable
/// if other room kinds are ever added.
pub fn room_key(conversation_id: &str) -> String {
    format!("conversation:{conversation_id}")
}

/// State held for one live connection.
struct ConnectionEntry {
    /// Outbound frame channel. Bounded: slow consumers drop frames rather
    /// than growing memory without bound.
    sender: mpsc::Sender<String>,
    /// Authenticated user id, `None` while anonymous.
    identity: Option<String>,
    /// Room keys this connection has joined.
    rooms: HashSet<String>,
}

/// Manages live connections, their identities, and room membership.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, ConnectionEntry>>,
    /// Reverse mapping: room key -> member connection ids.
    rooms: Arc<DashMap<String, HashSet<ConnectionId>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection with an empty room set and no identity.
    ///
    /// Idempotent per id: re-registering an existing id replaces the entry
    /// after releasing any rooms the old entry held, so no membership is
    /// orphaned.
    pub fn register(&self, connection_id: ConnectionId, sender: mpsc::Sender<String>) {
        let previous = self.connections.insert(
            connection_id,
            ConnectionEntry {
                sender,
                identity: None,
                rooms: HashSet::new(),
            },
        );

        if let Some(old) = previous {
            tracing::info!(%connection_id, "replaced existing connection entry");
            for room in &old.rooms {
                self.drop_membership(room, connection_id);
            }
        }
    }

    /// Attaches an authenticated identity to a registered connection.
    ///
    /// Absorbed silently (logged) when the connection has already gone
    /// away — authenticating races with disconnecting.
    pub fn authenticate(&self, connection_id: ConnectionId, user_id: &str) {
        match self.connections.get_mut(&connection_id) {
            Some(mut entry) => entry.identity = Some(user_id.to_string()),
            None => {
                tracing::debug!(%connection_id, "authenticate on unknown connection, ignoring");
            }
        }
    }

    /// Adds a connection to a room. No-op if already joined or the
    /// connection does not exist.
    pub fn join(&self, connection_id: ConnectionId, room: &str) {
        {
            let Some(mut entry) = self.connections.get_mut(&connection_id) else {
                tracing::debug!(%connection_id, room, "join on unknown connection, ignoring");
                return;
            };
            if !entry.rooms.insert(room.to_string()) {
                return; // Already joined
            }
        }

        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id);

        // The connection may have been unregistered between the two map
        // updates; re-check so the membership entry cannot be orphaned.
        if !self.connections.contains_key(&connection_id) {
            self.drop_membership(room, connection_id);
        }
    }

    /// Removes a connection from a room. No-op when not joined.
    pub fn leave(&self, connection_id: ConnectionId, room: &str) {
        if let Some(mut entry) = self.connections.get_mut(&connection_id) {
            entry.rooms.remove(room);
        }
        self.drop_membership(room, connection_id);
    }

    /// Removes a connection entirely, releasing all of its rooms.
    ///
    /// Idempotent: a second call for the same id is a no-op and leaves the
    /// registry in the same state as one call.
    pub fn unregister(&self, connection_id: ConnectionId) {
        let Some((_, entry)) = self.connections.remove(&connection_id) else {
            return; // Already removed
        };
        for room in &entry.rooms {
            self.drop_membership(room, connection_id);
        }
    }

    /// Returns a snapshot of the current members of a room.
    ///
    /// Always a copy — iterating the result cannot be invalidated by a
    /// concurrent join or unregister.
    pub fn members_of(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns whether a connection has joined a room.
    pub fn is_joined(&self, connection_id: ConnectionId, room: &str) -> bool {
        self.connections
            .get(&connection_id)
            .map(|entry| entry.rooms.contains(room))
            .unwrap_or(false)
    }

    /// Returns the outbound sender for a connection, if it is still live.
    pub fn sender(&self, connection_id: ConnectionId) -> Option<mpsc::Sender<String>> {
        self.connections
            .get(&connection_id)
            .map(|entry| entry.sender.clone())
    }

    /// Returns the authenticated identity of a connection, if any.
    pub fn identity(&self, connection_id: ConnectionId) -> Option<String> {
        self.connections
            .get(&connection_id)
            .and_then(|entry| entry.identity.clone())
    }

    /// Number of live connections (used by tests and diagnostics).
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Removes one member from a room set, garbage-collecting the set when
    /// it becomes empty.
    fn drop_membership(&self, room: &str, connection_id: ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&connection_id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }
}
