use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::connctx::Connection;
use super::registry::RoomRegistry;
use crate::db::{AccessResolver, DocumentStore};
use crate::error::SessionError;
use crate::models::{timestamp, EditRecord, ServerEvent, UpdatedMessage};

/// Result of a version-gated edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Accepted { version: u64 },
    Rejected { current_version: u64, claimed_version: u64 },
}

/// Accepts an edit only when it was made against the room's current version.
pub struct EditSynchronizer {
    registry: Arc<RoomRegistry>,
    access: Arc<dyn AccessResolver>,
    store: Arc<dyn DocumentStore>,
}

impl EditSynchronizer {
    pub fn new(
        registry: Arc<RoomRegistry>,
        access: Arc<dyn AccessResolver>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            registry,
            access,
            store,
        }
    }

    pub async fn apply_edit(
        &self,
        document_id: &str,
        conn: &Connection,
        operations: Vec<Value>,
        claimed_version: u64,
    ) -> Result<EditOutcome, SessionError> {
        // Capability may change between edits, so it is checked every time.
        let access = self
            .access
            .check_access(document_id, &conn.identity.id)
            .await
            .map_err(SessionError::store("Failed to process edit"))?;
        if !access.can_edit {
            return Err(SessionError::Forbidden(
                "You do not have edit permission".to_string(),
            ));
        }

        // Check, increment and broadcast under the room lock with no await in between.
        let outcome = self
            .registry
            .with_room_mut(document_id, |room| {
                let sender = room.participant(&conn.id).cloned()?;

                if claimed_version != room.version() {
                    return Some(EditOutcome::Rejected {
                        current_version: room.version(),
                        claimed_version,
                    });
                }

                let version = room.advance_version();
                room.broadcast(&ServerEvent::Updated(UpdatedMessage {
                    document_id: document_id.to_string(),
                    operations: operations.clone(),
                    version,
                    user_id: sender.user_id,
                    user_name: sender.user_name,
                    timestamp: timestamp(),
                }));
                Some(EditOutcome::Accepted { version })
            })
            .flatten()
            .ok_or(SessionError::RoomNotFound)?;

        match outcome {
            EditOutcome::Accepted { version } => {
                info!(
                    "User {} edited document {}, version {}",
                    conn.identity.email, document_id, version
                );
                self.persist(EditRecord {
                    document_id: document_id.to_string(),
                    user_id: conn.identity.id.clone(),
                    operations,
                    version,
                    meta: conn.meta.clone(),
                });
            }
            EditOutcome::Rejected {
                current_version,
                claimed_version,
            } => {
                warn!(
                    "Version conflict on document {} from {}: current {}, claimed {}",
                    document_id, conn.identity.email, current_version, claimed_version
                );
            }
        }

        Ok(outcome)
    }

    /// Write the edit record and bump the document timestamp in the background.
    /// Failures are logged only; the live room has already moved on.
    fn persist(&self, record: EditRecord) {
        let store = self.store.clone();
        tokio::spawn(async move {
            let document_id = record.document_id.clone();
            let version = record.version;
            if let Err(e) = store.append_edit(record).await {
                error!(
                    "Error saving document edit for document {} (version {}): {}",
                    document_id, version, e
                );
                return;
            }
            if let Err(e) = store.touch_document(&document_id).await {
                error!("Error updating timestamp of document {}: {}", document_id, e);
            }
        });
    }
}
