use serde::{Deserialize, Serialize};

/// A user as resolved from a connection credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: Option<String>,
    pub email: String,
}

impl Identity {
    /// Name shown to other participants: the user's name, or the local part of the email.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => self
                .email
                .split('@')
                .next()
                .unwrap_or(&self.email)
                .to_string(),
        }
    }
}

/// A connection's presentation inside one document room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub user_name: String,
    pub color: String,
    pub connection_id: String,
}

/// View/edit capability of a user on a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentAccess {
    pub can_view: bool,
    pub can_edit: bool,
}

impl DocumentAccess {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        Self {
            can_view: true,
            can_edit: true,
        }
    }

    pub fn view_only() -> Self {
        Self {
            can_view: true,
            can_edit: false,
        }
    }
}
