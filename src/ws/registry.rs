use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

use super::color::color_for;
use super::connctx::{Connection, Outbox};
use crate::db::DocumentStore;
use crate::error::SessionError;
use crate::models::{
    Participant, ServerEvent, UserJoinedMessage, UserLeftMessage,
};

struct RoomMember {
    participant: Participant,
    outbox: Outbox,
}

/// Live collaboration state of one document.
///
/// A room only exists while it has members; `version` starts at 0 and moves
/// by exactly one per accepted edit.
pub struct Room {
    document_id: String,
    members: Vec<RoomMember>,
    version: u64,
    closed: bool,
}

impl Room {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            members: Vec::new(),
            version: 0,
            closed: false,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn participant(&self, connection_id: &str) -> Option<&Participant> {
        self.members
            .iter()
            .find(|m| m.participant.connection_id == connection_id)
            .map(|m| &m.participant)
    }

    /// Participants in join order.
    pub fn participants(&self) -> Vec<Participant> {
        self.members.iter().map(|m| m.participant.clone()).collect()
    }

    /// Distinct identity ids present in the room, sorted.
    pub fn user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .members
            .iter()
            .map(|m| m.participant.user_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn broadcast(&self, event: &ServerEvent) {
        for member in &self.members {
            member.outbox.send(event.clone());
        }
    }

    /// Send to every member but `connection_id`. Returns the number of recipients.
    pub fn broadcast_except(&self, connection_id: &str, event: &ServerEvent) -> usize {
        let mut sent = 0;
        for member in self
            .members
            .iter()
            .filter(|m| m.participant.connection_id != connection_id)
        {
            member.outbox.send(event.clone());
            sent += 1;
        }
        sent
    }

    pub(super) fn advance_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Insert or refresh a member. Returns true when the connection was already present.
    fn upsert(&mut self, participant: Participant, outbox: Outbox) -> bool {
        match self
            .members
            .iter_mut()
            .find(|m| m.participant.connection_id == participant.connection_id)
        {
            Some(member) => {
                member.participant = participant;
                member.outbox = outbox;
                true
            }
            None => {
                self.members.push(RoomMember {
                    participant,
                    outbox,
                });
                false
            }
        }
    }

    fn remove(&mut self, connection_id: &str) -> Option<Participant> {
        let index = self
            .members
            .iter()
            .position(|m| m.participant.connection_id == connection_id)?;
        Some(self.members.remove(index).participant)
    }
}

/// Read-only copy of a room's state.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub document_id: String,
    pub version: u64,
    pub participants: Vec<Participant>,
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub participant: Participant,
    pub participants: Vec<Participant>,
    pub rejoined: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of all active rooms.
///
/// The map lock is only held to find, create or drop rooms; each room has its
/// own lock so edits on different documents never serialize on each other.
/// Lock order is always map, then room.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Mutex<Room>>>>,
    store: Arc<dyn DocumentStore>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Add `conn` to the room of `document_id`, creating the room if the
    /// document exists. Capability must already have been checked.
    pub async fn join(
        &self,
        document_id: &str,
        conn: &Connection,
    ) -> Result<JoinOutcome, SessionError> {
        if !self.contains(document_id) {
            let exists = self
                .store
                .document_exists(document_id)
                .await
                .map_err(SessionError::store("Failed to join document"))?;
            if !exists {
                return Err(SessionError::DocumentNotFound);
            }
        }

        let participant = Participant {
            user_id: conn.identity.id.clone(),
            user_name: conn.identity.display_name(),
            color: color_for(&conn.identity.id).to_string(),
            connection_id: conn.id.clone(),
        };

        let mut rooms = lock(&self.rooms);
        let handle = rooms
            .entry(document_id.to_string())
            .or_insert_with(|| {
                info!("Opening room for document {}", document_id);
                Arc::new(Mutex::new(Room::new(document_id)))
            })
            .clone();
        let mut room = lock(&handle);

        let rejoined = room.upsert(participant.clone(), conn.outbox.clone());
        if !rejoined {
            room.broadcast_except(
                &conn.id,
                &ServerEvent::UserJoined(UserJoinedMessage {
                    document_id: document_id.to_string(),
                    participant: participant.clone(),
                }),
            );
        }

        Ok(JoinOutcome {
            participant,
            participants: room.participants(),
            rejoined,
        })
    }

    /// Remove a connection from a room. The room is dropped in the same
    /// critical section when it becomes empty.
    pub fn leave(&self, document_id: &str, connection_id: &str) -> Option<Participant> {
        let mut rooms = lock(&self.rooms);
        let handle = rooms.get(document_id)?.clone();
        let mut room = lock(&handle);

        let removed = room.remove(connection_id)?;
        room.broadcast(&ServerEvent::UserLeft(UserLeftMessage {
            document_id: document_id.to_string(),
            user_id: removed.user_id.clone(),
            connection_id: connection_id.to_string(),
        }));

        if room.members.is_empty() {
            room.closed = true;
            rooms.remove(document_id);
            info!("Closed empty room for document {}", document_id);
        }
        Some(removed)
    }

    pub fn get(&self, document_id: &str) -> Option<RoomSnapshot> {
        self.with_room(document_id, |room| RoomSnapshot {
            document_id: room.document_id.clone(),
            version: room.version,
            participants: room.participants(),
        })
    }

    pub fn contains(&self, document_id: &str) -> bool {
        lock(&self.rooms).contains_key(document_id)
    }

    /// Run `f` against a live room without exposing it for mutation.
    pub fn with_room<R>(&self, document_id: &str, f: impl FnOnce(&Room) -> R) -> Option<R> {
        self.with_room_mut(document_id, |room| f(room))
    }

    /// Run `f` with the room locked. A room closed between lookup and lock
    /// counts as absent.
    pub(super) fn with_room_mut<R>(
        &self,
        document_id: &str,
        f: impl FnOnce(&mut Room) -> R,
    ) -> Option<R> {
        let handle = lock(&self.rooms).get(document_id)?.clone();
        let mut room = lock(&handle);
        if room.closed {
            return None;
        }
        Some(f(&mut *room))
    }

    pub fn room_count(&self) -> usize {
        lock(&self.rooms).len()
    }

    pub fn participant_count(&self) -> usize {
        let handles: Vec<_> = lock(&self.rooms).values().cloned().collect();
        handles.iter().map(|h| lock(h).len()).sum()
    }
}
