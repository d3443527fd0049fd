use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use super::connctx::Connection;
use super::cursor::CursorRelay;
use super::edit_sync::{EditOutcome, EditSynchronizer};
use super::presence::PresenceTracker;
use super::registry::RoomRegistry;
use crate::db::{AccessResolver, DocumentStore};
use crate::error::{AuthError, SessionError};
use crate::models::{ClientEvent, ClientMeta, ConflictMessage, Identity, ServerEvent, UsersMessage};
use crate::services::auth_service::IdentityResolver;

/// Per-connection state owned by the dispatcher's caller.
pub struct Session {
    conn: Connection,
    joined: BTreeSet<String>,
}

impl Session {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn joined(&self) -> impl Iterator<Item = &String> {
        self.joined.iter()
    }
}

/// Routes inbound events of authenticated connections to the room,
/// edit, cursor and presence components.
pub struct SessionDispatcher {
    identities: Arc<dyn IdentityResolver>,
    access: Arc<dyn AccessResolver>,
    registry: Arc<RoomRegistry>,
    presence: PresenceTracker,
    cursors: CursorRelay,
    edits: EditSynchronizer,
}

impl SessionDispatcher {
    pub fn new(
        registry: Arc<RoomRegistry>,
        identities: Arc<dyn IdentityResolver>,
        access: Arc<dyn AccessResolver>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            identities,
            presence: PresenceTracker::new(registry.clone()),
            cursors: CursorRelay::new(registry.clone()),
            edits: EditSynchronizer::new(registry.clone(), access.clone(), store),
            access,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn identities(&self) -> &Arc<dyn IdentityResolver> {
        &self.identities
    }

    /// Resolve a connection credential. Runs before any session exists.
    pub async fn authenticate(&self, credential: &str) -> Result<Identity, AuthError> {
        self.identities.resolve(credential).await
    }

    /// Open a session for an authenticated identity.
    pub fn open(&self, identity: Identity, meta: ClientMeta) -> (Session, UnboundedReceiver<ServerEvent>) {
        let (conn, rx) = Connection::new(identity, meta);
        info!("User connected: {} ({})", conn.identity.email, conn.id);
        self.presence.track(&conn);
        (
            Session {
                conn,
                joined: BTreeSet::new(),
            },
            rx,
        )
    }

    /// Parse and dispatch one text frame.
    pub async fn dispatch_text(&self, session: &mut Session, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.dispatch(session, event).await,
            Err(e) => {
                warn!("Failed to parse message from {}: {}", session.conn.id, e);
                session.conn.send(ServerEvent::error("Invalid message"));
            }
        }
    }

    /// Handle one event to completion. Failures go back to the sender as an
    /// `error` event and never end the session.
    pub async fn dispatch(&self, session: &mut Session, event: ClientEvent) {
        if let Err(e) = self.handle(session, event).await {
            warn!("Event from {} failed: {}", session.conn.id, e);
            session.conn.send(ServerEvent::error(e.client_message()));
        }
    }

    async fn handle(&self, session: &mut Session, event: ClientEvent) -> Result<(), SessionError> {
        if event.document_id().trim().is_empty() {
            return Err(SessionError::InvalidInput("Document ID is required".to_string()));
        }

        match event {
            ClientEvent::Join(msg) => self.join(session, &msg.document_id).await,
            ClientEvent::Leave(msg) => {
                self.leave(session, &msg.document_id);
                Ok(())
            }
            ClientEvent::Edit(msg) => {
                let outcome = self
                    .edits
                    .apply_edit(&msg.document_id, &session.conn, msg.operations, msg.version)
                    .await?;
                if let EditOutcome::Rejected {
                    current_version,
                    claimed_version,
                } = outcome
                {
                    session.conn.send(ServerEvent::Conflict(ConflictMessage {
                        document_id: msg.document_id,
                        current_version,
                        your_version: claimed_version,
                    }));
                }
                Ok(())
            }
            ClientEvent::Cursor(msg) => {
                self.cursors
                    .relay(&msg.document_id, &session.conn.id, msg.position);
                Ok(())
            }
            ClientEvent::PresenceSubscribe(msg) => {
                self.presence.subscribe(&msg.document_id, &session.conn);
                Ok(())
            }
        }
    }

    async fn join(&self, session: &mut Session, document_id: &str) -> Result<(), SessionError> {
        let access = self
            .access
            .check_access(document_id, &session.conn.identity.id)
            .await
            .map_err(SessionError::store("Failed to join document"))?;
        if !access.can_view {
            return Err(SessionError::Forbidden(
                "You do not have access to this document".to_string(),
            ));
        }

        let outcome = self.registry.join(document_id, &session.conn).await?;
        session.joined.insert(document_id.to_string());
        session.conn.send(ServerEvent::Users(UsersMessage {
            document_id: document_id.to_string(),
            users: outcome.participants,
        }));

        info!(
            "User {} joined document {}",
            session.conn.identity.email, document_id
        );
        Ok(())
    }

    fn leave(&self, session: &mut Session, document_id: &str) {
        session.joined.remove(document_id);
        if self.registry.leave(document_id, &session.conn.id).is_some() {
            info!(
                "User {} left document {}",
                session.conn.identity.email, document_id
            );
        }
    }

    /// Tear down a session: leave every joined room first, then update
    /// presence so offline notices reach only rooms that were occupied.
    /// Safe to call more than once.
    pub fn disconnect(&self, session: &mut Session) {
        let rooms: Vec<String> = std::mem::take(&mut session.joined).into_iter().collect();
        for document_id in &rooms {
            self.registry.leave(document_id, &session.conn.id);
        }
        self.presence.on_disconnect(&session.conn, &rooms);
        info!(
            "User disconnected: {} ({})",
            session.conn.identity.email, session.conn.id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::models::{CursorMessage, CursorPosition, DocumentAccess, DocumentRef, EditMessage};
    use crate::services::auth_service::tests::{token_for, SECRET};
    use crate::services::auth_service::JwtIdentityResolver;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        dispatcher: SessionDispatcher,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.add_document("doc1");
        store.add_document("doc2");
        for id in ["a", "b", "viewer"] {
            store.add_user(Identity {
                id: id.to_string(),
                name: None,
                email: format!("{}@example.com", id),
            });
        }
        for doc in ["doc1", "doc2"] {
            store.grant(doc, "a", DocumentAccess::full());
            store.grant(doc, "b", DocumentAccess::full());
            store.grant(doc, "viewer", DocumentAccess::view_only());
        }

        let registry = Arc::new(RoomRegistry::new(store.clone()));
        let identities = Arc::new(JwtIdentityResolver::new(
            Some(SECRET.to_string()),
            store.clone(),
            Duration::from_secs(60),
        ));
        let dispatcher = SessionDispatcher::new(registry, identities, store.clone(), store.clone());
        Fixture { store, dispatcher }
    }

    async fn connect(fx: &Fixture, user: &str) -> (Session, UnboundedReceiver<ServerEvent>) {
        let identity = fx
            .dispatcher
            .authenticate(&token_for(user, SECRET))
            .await
            .unwrap();
        fx.dispatcher.open(identity, ClientMeta::default())
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn join(doc: &str) -> ClientEvent {
        ClientEvent::Join(DocumentRef {
            document_id: doc.to_string(),
        })
    }

    fn edit(doc: &str, version: u64) -> ClientEvent {
        ClientEvent::Edit(EditMessage {
            document_id: doc.to_string(),
            operations: vec![json!({"insert": "x", "at": 0})],
            version,
        })
    }

    #[tokio::test]
    async fn invalid_credential_never_opens_session() {
        let fx = fixture();
        let result = fx.dispatcher.authenticate(&token_for("a", "wrong")).await;
        assert!(matches!(result, Err(AuthError::InvalidToken(_))));
        assert_eq!(fx.dispatcher.presence().online_count(), 0);
    }

    #[tokio::test]
    async fn edit_then_stale_edit_scenario() {
        let fx = fixture();
        let (mut a, mut rx_a) = connect(&fx, "a").await;
        let (mut b, mut rx_b) = connect(&fx, "b").await;

        fx.dispatcher.dispatch(&mut a, join("doc1")).await;
        fx.dispatcher.dispatch(&mut b, join("doc1")).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        fx.dispatcher.dispatch(&mut a, edit("doc1", 0)).await;
        for rx in [&mut rx_a, &mut rx_b] {
            match drain(rx).as_slice() {
                [ServerEvent::Updated(msg)] => {
                    assert_eq!(msg.version, 1);
                    assert_eq!(msg.user_id, "a");
                }
                other => panic!("unexpected events {:?}", other),
            }
        }

        fx.dispatcher.dispatch(&mut b, edit("doc1", 0)).await;
        match drain(&mut rx_b).as_slice() {
            [ServerEvent::Conflict(msg)] => {
                assert_eq!(msg.current_version, 1);
                assert_eq!(msg.your_version, 0);
            }
            other => panic!("unexpected events {:?}", other),
        }
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn join_replies_with_users_and_announces() {
        let fx = fixture();
        let (mut a, mut rx_a) = connect(&fx, "a").await;
        let (mut b, mut rx_b) = connect(&fx, "b").await;

        fx.dispatcher.dispatch(&mut a, join("doc1")).await;
        fx.dispatcher.dispatch(&mut b, join("doc1")).await;

        match drain(&mut rx_b).as_slice() {
            [ServerEvent::Users(msg)] => assert_eq!(msg.users.len(), 2),
            other => panic!("unexpected events {:?}", other),
        }
        let to_a = drain(&mut rx_a);
        assert!(matches!(to_a.as_slice(), [ServerEvent::Users(_), ServerEvent::UserJoined(_)]));
        assert_eq!(b.joined().count(), 1);
    }

    #[tokio::test]
    async fn join_without_access_reports_error() {
        let fx = fixture();
        let (mut a, mut rx_a) = connect(&fx, "a").await;
        fx.store.add_document("private");

        fx.dispatcher.dispatch(&mut a, join("private")).await;
        match drain(&mut rx_a).as_slice() {
            [ServerEvent::Error(msg)] => {
                assert_eq!(msg.message, "You do not have access to this document")
            }
            other => panic!("unexpected events {:?}", other),
        }
        assert!(!fx.dispatcher.registry().contains("private"));
        assert_eq!(a.joined().count(), 0);
    }

    #[tokio::test]
    async fn join_missing_document_reports_error() {
        let fx = fixture();
        let (mut a, mut rx_a) = connect(&fx, "a").await;
        fx.store.grant("ghost", "a", DocumentAccess::full());

        fx.dispatcher.dispatch(&mut a, join("ghost")).await;
        match drain(&mut rx_a).as_slice() {
            [ServerEvent::Error(msg)] => assert_eq!(msg.message, "Document not found"),
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test]
    async fn viewer_edit_is_refused_and_session_survives() {
        let fx = fixture();
        let (mut viewer, mut rx) = connect(&fx, "viewer").await;
        fx.dispatcher.dispatch(&mut viewer, join("doc1")).await;
        drain(&mut rx);

        fx.dispatcher.dispatch(&mut viewer, edit("doc1", 0)).await;
        match drain(&mut rx).as_slice() {
            [ServerEvent::Error(msg)] => assert_eq!(msg.message, "You do not have edit permission"),
            other => panic!("unexpected events {:?}", other),
        }

        fx.dispatcher
            .dispatch(
                &mut viewer,
                ClientEvent::PresenceSubscribe(DocumentRef {
                    document_id: "doc1".to_string(),
                }),
            )
            .await;
        assert!(matches!(drain(&mut rx).as_slice(), [ServerEvent::PresenceOnline(_)]));
    }

    #[tokio::test]
    async fn malformed_frames_produce_error_events() {
        let fx = fixture();
        let (mut a, mut rx) = connect(&fx, "a").await;

        fx.dispatcher.dispatch_text(&mut a, "not json").await;
        fx.dispatcher
            .dispatch_text(&mut a, r#"{"type":"document:join","documentId":"  "}"#)
            .await;

        let messages: Vec<String> = drain(&mut rx)
            .into_iter()
            .map(|e| match e {
                ServerEvent::Error(msg) => msg.message,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(messages, vec!["Invalid message", "Document ID is required"]);
    }

    #[tokio::test]
    async fn cursor_is_relayed_only_after_join() {
        let fx = fixture();
        let (mut a, _rx_a) = connect(&fx, "a").await;
        let (mut b, mut rx_b) = connect(&fx, "b").await;
        fx.dispatcher.dispatch(&mut b, join("doc1")).await;
        drain(&mut rx_b);

        let cursor = ClientEvent::Cursor(CursorMessage {
            document_id: "doc1".to_string(),
            position: CursorPosition { line: 1, ch: 2 },
        });
        fx.dispatcher.dispatch(&mut a, cursor.clone()).await;
        assert!(drain(&mut rx_b).is_empty());

        fx.dispatcher.dispatch(&mut a, join("doc1")).await;
        drain(&mut rx_b);
        fx.dispatcher.dispatch(&mut a, cursor).await;
        assert!(matches!(drain(&mut rx_b).as_slice(), [ServerEvent::CursorMoved(_)]));
    }

    #[tokio::test]
    async fn vacated_room_restarts_at_version_zero() {
        let fx = fixture();
        let (mut a, mut rx_a) = connect(&fx, "a").await;
        fx.dispatcher.dispatch(&mut a, join("doc1")).await;
        fx.dispatcher.dispatch(&mut a, edit("doc1", 0)).await;
        fx.dispatcher.dispatch(&mut a, edit("doc1", 1)).await;
        assert_eq!(fx.dispatcher.registry().get("doc1").unwrap().version, 2);

        fx.dispatcher.disconnect(&mut a);
        assert!(!fx.dispatcher.registry().contains("doc1"));
        drain(&mut rx_a);

        let (mut a2, mut rx_a2) = connect(&fx, "a").await;
        fx.dispatcher.dispatch(&mut a2, join("doc1")).await;
        assert_eq!(fx.dispatcher.registry().get("doc1").unwrap().version, 0);
        fx.dispatcher.dispatch(&mut a2, edit("doc1", 0)).await;
        let versions: Vec<u64> = drain(&mut rx_a2)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Updated(msg) => Some(msg.version),
                _ => None,
            })
            .collect();
        assert_eq!(versions, vec![1]);
    }

    #[tokio::test]
    async fn disconnect_leaves_rooms_then_announces_offline() {
        let fx = fixture();
        let (mut a1, _rx_a1) = connect(&fx, "a").await;
        let (mut a2, _rx_a2) = connect(&fx, "a").await;
        let (mut b, mut rx_b) = connect(&fx, "b").await;
        for session in [&mut a1, &mut a2, &mut b] {
            fx.dispatcher.dispatch(session, join("doc1")).await;
        }
        fx.dispatcher.dispatch(&mut a1, join("doc2")).await;
        fx.dispatcher.dispatch(&mut b, join("doc2")).await;
        drain(&mut rx_b);

        fx.dispatcher.disconnect(&mut a1);
        let events = drain(&mut rx_b);
        assert_eq!(events.iter().filter(|e| matches!(e, ServerEvent::UserLeft(_))).count(), 2);
        assert!(!events.iter().any(|e| matches!(e, ServerEvent::PresenceOffline(_))));
        assert!(fx.dispatcher.presence().is_online("a"));

        fx.dispatcher.disconnect(&mut a2);
        let events = drain(&mut rx_b);
        let offline: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::PresenceOffline(msg) => Some(msg.document_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(offline, vec!["doc1".to_string()]);
        assert!(!fx.dispatcher.presence().is_online("a"));

        // Second teardown of the same session is harmless.
        fx.dispatcher.disconnect(&mut a2);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn explicit_leave_then_disconnect() {
        let fx = fixture();
        let (mut a, _rx_a) = connect(&fx, "a").await;
        let (mut b, mut rx_b) = connect(&fx, "b").await;
        fx.dispatcher.dispatch(&mut a, join("doc1")).await;
        fx.dispatcher.dispatch(&mut b, join("doc1")).await;
        drain(&mut rx_b);

        fx.dispatcher
            .dispatch(
                &mut a,
                ClientEvent::Leave(DocumentRef {
                    document_id: "doc1".to_string(),
                }),
            )
            .await;
        assert!(matches!(drain(&mut rx_b).as_slice(), [ServerEvent::UserLeft(_)]));
        assert_eq!(a.joined().count(), 0);

        fx.dispatcher.disconnect(&mut a);
        assert!(drain(&mut rx_b).is_empty());
    }
}
