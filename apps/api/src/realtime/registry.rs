//! Connection registry keyed by user id, injected through `AppState`.
//!
//! Each connection owns a bounded outbox; a full outbox drops the event for that
//! connection only.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::realtime::events::ServerEvent;

pub type ConnId = u64;

const OUTBOX_CAPACITY: usize = 64;

struct Connection {
    user_id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    next_id: ConnId,
    connections: HashMap<ConnId, Connection>,
    users: HashMap<Uuid, HashSet<ConnId>>,
    rooms: HashMap<String, HashSet<ConnId>>,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: Uuid) -> (ConnId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.next_id += 1;
        let conn_id = inner.next_id;
        inner.connections.insert(
            conn_id,
            Connection {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        inner.users.entry(user_id).or_default().insert(conn_id);
        (conn_id, rx)
    }

    /// Drops the connection and every room membership it held.
    pub fn unregister(&self, conn_id: ConnId) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(conn) = inner.connections.remove(&conn_id) else {
            return;
        };

        if let Some(set) = inner.users.get_mut(&conn.user_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                inner.users.remove(&conn.user_id);
            }
        }
        for room in &conn.rooms {
            if let Some(set) = inner.rooms.get_mut(room) {
                set.remove(&conn_id);
                if set.is_empty() {
                    inner.rooms.remove(room);
                }
            }
        }
    }

    pub fn join(&self, conn_id: ConnId, room: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(conn) = inner.connections.get_mut(&conn_id) else {
            return false;
        };
        conn.rooms.insert(room.to_string());
        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(conn_id);
        true
    }

    pub fn leave(&self, conn_id: ConnId, room: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let removed = inner
            .connections
            .get_mut(&conn_id)
            .is_some_and(|c| c.rooms.remove(room));
        if let Some(set) = inner.rooms.get_mut(room) {
            set.remove(&conn_id);
            if set.is_empty() {
                inner.rooms.remove(room);
            }
        }
        removed
    }

    pub fn is_member(&self, conn_id: ConnId, room: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .connections
            .get(&conn_id)
            .is_some_and(|c| c.rooms.contains(room))
    }

    /// Returns how many connections accepted the event.
    pub fn send_to_user(&self, user_id: Uuid, event: &ServerEvent) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let Some(ids) = inner.users.get(&user_id) else {
            return 0;
        };
        deliver(&inner, ids, event)
    }

    pub fn send_to_room(&self, room: &str, event: &ServerEvent) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let Some(ids) = inner.rooms.get(room) else {
            return 0;
        };
        deliver(&inner, ids, event)
    }

    pub fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .users
            .get(&user_id)
            .map_or(0, HashSet::len)
    }

    #[cfg(test)]
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.connection_count(user_id) > 0
    }
}

fn deliver(inner: &Inner, ids: &HashSet<ConnId>, event: &ServerEvent) -> usize {
    ids.iter()
        .filter_map(|id| inner.connections.get(id))
        .filter(|conn| match conn.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(e) => {
                debug!(user_id = %conn.user_id, "Dropping socket event: {e}");
                false
            }
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> String {
        format!("team:{}", Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_user_with_two_connections_gets_both() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (_a, mut rx_a) = registry.register(user);
        let (_b, mut rx_b) = registry.register(user);

        assert_eq!(registry.send_to_user(user, &ServerEvent::Pong), 2);
        assert_eq!(rx_a.recv().await, Some(ServerEvent::Pong));
        assert_eq!(rx_b.recv().await, Some(ServerEvent::Pong));
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery_and_cleans_rooms() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let room = room();
        let (conn, _rx) = registry.register(user);
        assert!(registry.join(conn, &room));

        registry.unregister(conn);
        assert!(!registry.is_online(user));
        assert_eq!(registry.send_to_user(user, &ServerEvent::Pong), 0);
        assert_eq!(registry.send_to_room(&room, &ServerEvent::Pong), 0);
    }

    #[tokio::test]
    async fn test_room_delivery_only_reaches_members() {
        let registry = ConnectionRegistry::new();
        let room = room();
        let (member, mut rx_member) = registry.register(Uuid::new_v4());
        let (_outsider, mut rx_outsider) = registry.register(Uuid::new_v4());
        registry.join(member, &room);

        assert_eq!(registry.send_to_room(&room, &ServerEvent::Pong), 1);
        assert_eq!(rx_member.recv().await, Some(ServerEvent::Pong));
        assert!(rx_outsider.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_removes_membership() {
        let registry = ConnectionRegistry::new();
        let room = room();
        let (conn, _rx) = registry.register(Uuid::new_v4());
        registry.join(conn, &room);
        assert!(registry.is_member(conn, &room));
        assert!(registry.leave(conn, &room));
        assert!(!registry.is_member(conn, &room));
        assert!(!registry.leave(conn, &room));
    }

    #[tokio::test]
    async fn test_join_unknown_connection_fails() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.join(42, &room()));
    }

    #[tokio::test]
    async fn test_full_outbox_drops_instead_of_blocking() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (_conn, _rx) = registry.register(user);
        for _ in 0..OUTBOX_CAPACITY {
            assert_eq!(registry.send_to_user(user, &ServerEvent::Pong), 1);
        }
        assert_eq!(registry.send_to_user(user, &ServerEvent::Pong), 0);
    }
}
