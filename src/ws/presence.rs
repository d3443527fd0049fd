use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use super::connctx::{Connection, ConnectionId};
use super::registry::RoomRegistry;
use crate::models::{
    timestamp, OnlineUser, PresenceOfflineMessage, PresenceOnlineMessage, ServerEvent,
};

/// Online/offline status per identity, aggregated over all of its connections.
pub struct PresenceTracker {
    sessions: Mutex<HashMap<String, HashSet<ConnectionId>>>,
    registry: Arc<RoomRegistry>,
}

impl PresenceTracker {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            registry,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, HashSet<ConnectionId>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attribute a connection to its identity. Idempotent.
    pub fn track(&self, conn: &Connection) {
        self.sessions()
            .entry(conn.identity.id.clone())
            .or_default()
            .insert(conn.id.clone());
    }

    /// Register the connection and broadcast who is in the document's room.
    /// Returns the online identity ids; empty when the room does not exist.
    pub fn subscribe(&self, document_id: &str, conn: &Connection) -> Vec<String> {
        self.track(conn);

        let online = self
            .registry
            .with_room(document_id, |room| {
                let user_ids = room.user_ids();
                room.broadcast(&ServerEvent::PresenceOnline(PresenceOnlineMessage {
                    document_id: document_id.to_string(),
                    users: user_ids
                        .iter()
                        .map(|id| OnlineUser { id: id.clone() })
                        .collect(),
                    timestamp: timestamp(),
                }));
                user_ids
            })
            .unwrap_or_default();

        debug!(
            "Presence subscribe: {} in document {} ({} online)",
            conn.identity.email,
            document_id,
            online.len()
        );
        online
    }

    /// Drop a connection. When it was the identity's last one, announce the
    /// identity offline in each of `rooms` that still has members.
    /// Returns true when the identity went offline.
    pub fn on_disconnect(&self, conn: &Connection, rooms: &[String]) -> bool {
        let went_offline = {
            let mut sessions = self.sessions();
            match sessions.get_mut(&conn.identity.id) {
                Some(set) => {
                    let removed = set.remove(&conn.id);
                    if removed && set.is_empty() {
                        sessions.remove(&conn.identity.id);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if !went_offline {
            return false;
        }

        info!("User {} is now offline", conn.identity.email);
        for document_id in rooms {
            self.registry.with_room(document_id, |room| {
                room.broadcast(&ServerEvent::PresenceOffline(PresenceOfflineMessage {
                    document_id: document_id.clone(),
                    user_id: conn.identity.id.clone(),
                    timestamp: timestamp(),
                }));
            });
        }
        true
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.sessions().contains_key(user_id)
    }

    pub fn online_count(&self) -> usize {
        self.sessions().len()
    }

    pub fn connection_count(&self) -> usize {
        self.sessions().values().map(|set| set.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::models::{ClientMeta, Identity};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup() -> (Arc<RoomRegistry>, PresenceTracker) {
        let store = Arc::new(MemoryStore::new());
        store.add_document("doc1");
        store.add_document("doc2");
        let registry = Arc::new(RoomRegistry::new(store));
        let presence = PresenceTracker::new(registry.clone());
        (registry, presence)
    }

    fn connect(id: &str) -> (Connection, UnboundedReceiver<ServerEvent>) {
        Connection::new(
            Identity {
                id: id.to_string(),
                name: None,
                email: format!("{}@example.com", id),
            },
            ClientMeta::default(),
        )
    }

    fn offline_events(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<PresenceOfflineMessage> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServerEvent::PresenceOffline(msg) = event {
                events.push(msg);
            }
        }
        events
    }

    #[tokio::test]
    async fn subscribe_broadcasts_distinct_room_members() {
        let (registry, presence) = setup();
        let (a1, mut rx_a1) = connect("a");
        let (a2, _rx_a2) = connect("a");
        let (b, mut rx_b) = connect("b");
        registry.join("doc1", &a1).await.unwrap();
        registry.join("doc1", &a2).await.unwrap();
        registry.join("doc1", &b).await.unwrap();

        let online = presence.subscribe("doc1", &b);
        assert_eq!(online, vec!["a".to_string(), "b".to_string()]);

        for rx in [&mut rx_a1, &mut rx_b] {
            let mut saw_online = false;
            while let Ok(event) = rx.try_recv() {
                if let ServerEvent::PresenceOnline(msg) = event {
                    assert_eq!(msg.users.len(), 2);
                    saw_online = true;
                }
            }
            assert!(saw_online);
        }
    }

    #[tokio::test]
    async fn subscribe_to_missing_room_is_quiet() {
        let (_registry, presence) = setup();
        let (a, _rx) = connect("a");
        assert!(presence.subscribe("nowhere", &a).is_empty());
        assert!(presence.is_online("a"));
    }

    #[tokio::test]
    async fn second_session_keeps_identity_online() {
        let (registry, presence) = setup();
        let (a1, _rx_a1) = connect("a");
        let (a2, _rx_a2) = connect("a");
        let (b, mut rx_b) = connect("b");
        for conn in [&a1, &a2, &b] {
            presence.track(conn);
            registry.join("doc1", conn).await.unwrap();
        }

        registry.leave("doc1", &a1.id);
        assert!(!presence.on_disconnect(&a1, &["doc1".to_string()]));
        assert!(presence.is_online("a"));
        assert!(offline_events(&mut rx_b).is_empty());

        registry.leave("doc1", &a2.id);
        assert_eq!(presence.connection_count(), 2);
        assert!(presence.on_disconnect(&a2, &["doc1".to_string()]));
        assert!(!presence.is_online("a"));
        assert_eq!(presence.connection_count(), 1);

        let events = offline_events(&mut rx_b);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, "a");
        assert_eq!(events[0].document_id, "doc1");
    }

    #[tokio::test]
    async fn offline_fires_once_per_joined_document() {
        let (registry, presence) = setup();
        let (a, _rx_a) = connect("a");
        let (b, mut rx_b) = connect("b");
        presence.track(&a);
        presence.track(&b);
        for doc in ["doc1", "doc2"] {
            registry.join(doc, &a).await.unwrap();
            registry.join(doc, &b).await.unwrap();
        }

        let rooms = vec!["doc1".to_string(), "doc2".to_string()];
        for doc in &rooms {
            registry.leave(doc, &a.id);
        }
        assert!(presence.on_disconnect(&a, &rooms));
        // Repeating the disconnect must not announce again.
        assert!(!presence.on_disconnect(&a, &rooms));

        let mut docs: Vec<String> = offline_events(&mut rx_b)
            .into_iter()
            .map(|m| m.document_id)
            .collect();
        docs.sort();
        assert_eq!(docs, rooms);
    }

    #[tokio::test]
    async fn untracked_connection_disconnect_is_noop() {
        let (_registry, presence) = setup();
        let (a, _rx) = connect("a");
        assert!(!presence.on_disconnect(&a, &[]));
        assert_eq!(presence.online_count(), 0);
    }
}
