//! Room fan-out.

use crate::registry::{ConnectionId, ConnectionRegistry};

/// Delivers payloads to every current member of a room.
///
/// Delivery is best-effort real-time: a member whose outbound channel is
/// full or already closed is skipped (logged), never retried. Ordering
/// within a room is the caller's responsibility — the message pipeline
/// issues its broadcasts sequentially under a per-room lock, so members
/// observe them in submission order. No ordering is guaranteed, or needed,
/// across distinct rooms.
#[derive(Clone)]
pub struct RoomBroadcaster {
    registry: ConnectionRegistry,
}

impl RoomBroadcaster {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Sends `payload_json` to every member of `room`, optionally excluding
    /// one connection (the originator). Returns the number of members the
    /// payload was handed to.
    pub fn broadcast(
        &self,
        room: &str,
        payload_json: &str,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let members = self.registry.members_of(room);
        let mut delivered = 0;

        for connection_id in members {
            if Some(connection_id) == exclude {
                continue;
            }
            // A member that disconnected after the snapshot no longer has a
            // sender; skip it.
            let Some(sender) = self.registry.sender(connection_id) else {
                continue;
            };
            match sender.try_send(payload_json.to_string()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        %connection_id,
                        room,
                        "dropping broadcast frame for slow or closed consumer: {}",
                        e
                    );
                }
            }
        }

        delivered
    }
}
