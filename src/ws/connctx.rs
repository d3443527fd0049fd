use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::models::{ClientMeta, Identity, ServerEvent};

pub type ConnectionId = String;

/// Sending half of a connection's outbound queue.
///
/// Sending never waits, so it is safe to call while holding a room lock.
#[derive(Clone, Debug)]
pub struct Outbox {
    connection_id: ConnectionId,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl Outbox {
    pub fn new(connection_id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { connection_id, tx }, rx)
    }

    pub fn send(&self, event: ServerEvent) {
        if self.tx.send(event).is_err() {
            debug!("Dropping event for closed connection {}", self.connection_id);
        }
    }
}

/// One authenticated transport session.
#[derive(Clone, Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub identity: Identity,
    pub meta: ClientMeta,
    pub outbox: Outbox,
}

impl Connection {
    pub fn new(
        identity: Identity,
        meta: ClientMeta,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = Uuid::new_v4().to_string();
        let (outbox, rx) = Outbox::new(id.clone());
        (
            Self {
                id,
                identity,
                meta,
                outbox,
            },
            rx,
        )
    }

    pub fn send(&self, event: ServerEvent) {
        self.outbox.send(event);
    }
}
