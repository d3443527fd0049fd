use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Participant;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPosition {
    pub line: u32,
    pub ch: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    #[serde(alias = "noteId")]
    pub document_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EditMessage {
    #[serde(alias = "noteId")]
    pub document_id: String,
    pub operations: Vec<Value>,
    pub version: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorMessage {
    #[serde(alias = "noteId")]
    pub document_id: String,
    pub position: CursorPosition,
}

/// Events a client may send over its socket.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "document:join")]
    Join(DocumentRef),
    #[serde(rename = "document:leave")]
    Leave(DocumentRef),
    #[serde(rename = "document:edit")]
    Edit(EditMessage),
    #[serde(rename = "cursor:update")]
    Cursor(CursorMessage),
    #[serde(rename = "presence:subscribe")]
    PresenceSubscribe(DocumentRef),
}

impl ClientEvent {
    pub fn document_id(&self) -> &str {
        match self {
            ClientEvent::Join(msg) | ClientEvent::Leave(msg) | ClientEvent::PresenceSubscribe(msg) => {
                &msg.document_id
            }
            ClientEvent::Edit(msg) => &msg.document_id,
            ClientEvent::Cursor(msg) => &msg.document_id,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsersMessage {
    pub document_id: String,
    pub users: Vec<Participant>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserJoinedMessage {
    pub document_id: String,
    #[serde(flatten)]
    pub participant: Participant,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserLeftMessage {
    pub document_id: String,
    pub user_id: String,
    pub connection_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedMessage {
    pub document_id: String,
    pub operations: Vec<Value>,
    pub version: u64,
    pub user_id: String,
    pub user_name: String,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictMessage {
    pub document_id: String,
    pub current_version: u64,
    pub your_version: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorMovedMessage {
    pub document_id: String,
    #[serde(flatten)]
    pub participant: Participant,
    pub position: CursorPosition,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OnlineUser {
    pub id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceOnlineMessage {
    pub document_id: String,
    pub users: Vec<OnlineUser>,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceOfflineMessage {
    pub document_id: String,
    pub user_id: String,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub message: String,
}

/// Events the server pushes to a client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "document:users")]
    Users(UsersMessage),
    #[serde(rename = "document:user:joined")]
    UserJoined(UserJoinedMessage),
    #[serde(rename = "document:user:left")]
    UserLeft(UserLeftMessage),
    #[serde(rename = "document:updated")]
    Updated(UpdatedMessage),
    #[serde(rename = "document:conflict")]
    Conflict(ConflictMessage),
    #[serde(rename = "cursor:moved")]
    CursorMoved(CursorMovedMessage),
    #[serde(rename = "presence:online")]
    PresenceOnline(PresenceOnlineMessage),
    #[serde(rename = "presence:offline")]
    PresenceOffline(PresenceOfflineMessage),
    #[serde(rename = "error")]
    Error(ErrorMessage),
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorMessage {
            message: message.into(),
        })
    }
}

/// Current time as sent to clients.
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
