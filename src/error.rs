use thiserror::Error;

/// Failure talking to one of the external collaborators (database, directory).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Reasons a connection is refused before it reaches event routing.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication error: No token provided")]
    MissingCredential,

    #[error("Authentication error: Invalid token ({0})")]
    InvalidToken(String),

    #[error("Authentication error: User not found")]
    UnknownUser,

    #[error("JWT secret is not configured")]
    NotConfigured,

    #[error("Authentication error: {0}")]
    Store(#[from] StoreError),
}

/// Failure of a single inbound event. Reported to the offending connection only.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Forbidden(String),

    #[error("Document not found")]
    DocumentNotFound,

    #[error("Document room not found. Please rejoin.")]
    RoomNotFound,

    #[error("{0}")]
    InvalidInput(String),

    #[error("{context}: {source}")]
    Store {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl SessionError {
    pub fn store(context: &'static str) -> impl FnOnce(StoreError) -> SessionError {
        move |source| SessionError::Store { context, source }
    }

    /// Text sent in the `error` event. Store failures never leak their cause.
    pub fn client_message(&self) -> String {
        match self {
            SessionError::Store { context, .. } => context.to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_hide_their_cause_from_clients() {
        let err = SessionError::store("Failed to join document")(StoreError::Unavailable(
            "connection refused on 10.0.0.3".to_string(),
        ));
        assert_eq!(err.client_message(), "Failed to join document");
        assert!(err.to_string().contains("10.0.0.3"));
    }

    #[test]
    fn room_not_found_asks_for_rejoin() {
        assert_eq!(
            SessionError::RoomNotFound.client_message(),
            "Document room not found. Please rejoin."
        );
    }
}
