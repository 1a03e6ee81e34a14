//! Broadcast Layer
//!
//! Room-scoped fan-out and targeted unicast over per-connection channels.
//!
//! Delivery contract: at-most-once, best-effort, fire-and-forget. A send to
//! a connection whose task has gone away is dropped. Order is preserved per
//! connection only; clients must tolerate missing or reordered updates
//! relative to other connections.

use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc;

use ens_core::ConnectionId;

use crate::protocol::ServerMessage;

/// Outbound half of one connection
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

/// Broadcast groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Players,
    Conductors,
    Mp3Players,
    Mp3Conductors,
}

/// Connection table plus room membership
#[derive(Debug, Default)]
pub struct Broadcaster {
    connections: HashMap<ConnectionId, Outbound>,
    rooms: HashMap<Room, BTreeSet<ConnectionId>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, conn: ConnectionId, outbound: Outbound) {
        self.connections.insert(conn, outbound);
    }

    /// Drop the connection's sender and every room membership
    pub fn unregister(&mut self, conn: ConnectionId) {
        self.connections.remove(&conn);
        for members in self.rooms.values_mut() {
            members.remove(&conn);
        }
    }

    pub fn is_registered(&self, conn: ConnectionId) -> bool {
        self.connections.contains_key(&conn)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn join(&mut self, conn: ConnectionId, room: Room) {
        self.rooms.entry(room).or_default().insert(conn);
    }

    pub fn leave(&mut self, conn: ConnectionId, room: Room) {
        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&conn);
        }
    }

    pub fn members(&self, room: Room) -> impl Iterator<Item = ConnectionId> + '_ {
        self.rooms.get(&room).into_iter().flatten().copied()
    }

    pub fn room_size(&self, room: Room) -> usize {
        self.rooms.get(&room).map(|m| m.len()).unwrap_or(0)
    }

    /// Send to one connection; `false` if it is unknown or gone
    pub fn unicast(&self, conn: ConnectionId, message: ServerMessage) -> bool {
        match self.connections.get(&conn) {
            Some(tx) => tx.send(message).is_ok(),
            None => {
                log::trace!("[Broadcast] drop for unknown {conn}");
                false
            }
        }
    }

    /// Send to every member of `room`; returns how many sends succeeded
    pub fn to_room(&self, room: Room, message: &ServerMessage) -> usize {
        self.members(room)
            .filter(|conn| self.unicast(*conn, message.clone()))
            .count()
    }
}
