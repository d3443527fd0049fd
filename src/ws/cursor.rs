use std::sync::Arc;
use tracing::debug;

use super::registry::RoomRegistry;
use crate::models::{timestamp, CursorMovedMessage, CursorPosition, ServerEvent};

/// Rebroadcasts cursor positions using the sender's participant record.
pub struct CursorRelay {
    registry: Arc<RoomRegistry>,
}

impl CursorRelay {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// Relay `position` to every other member of the room. Updates from
    /// connections that are not participants are dropped.
    /// Returns the number of recipients.
    pub fn relay(&self, document_id: &str, connection_id: &str, position: CursorPosition) -> usize {
        let sent = self
            .registry
            .with_room(document_id, |room| {
                let participant = room.participant(connection_id)?.clone();
                let event = ServerEvent::CursorMoved(CursorMovedMessage {
                    document_id: document_id.to_string(),
                    participant,
                    position,
                    timestamp: timestamp(),
                });
                Some(room.broadcast_except(connection_id, &event))
            })
            .flatten();

        match sent {
            Some(n) => {
                debug!("Cursor update from {} in document {} relayed to {}", connection_id, document_id, n);
                n
            }
            None => {
                debug!("Dropping cursor update from non-participant {} in document {}", connection_id, document_id);
                0
            }
        }
    }
}
