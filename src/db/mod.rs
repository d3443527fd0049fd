//! Seams to the collaborators that live outside the session engine: the
//! note store, the sharing rules and the user directory.

use futures_util::future::BoxFuture;

use crate::error::StoreError;
use crate::models::{DocumentAccess, EditRecord, Identity};

pub mod dbnotes;
#[cfg(test)]
pub mod memory;

pub type StoreResult<T> = Result<T, StoreError>;

/// Document existence and the append-only edit log.
pub trait DocumentStore: Send + Sync {
    fn document_exists<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, StoreResult<bool>>;

    fn append_edit(&self, record: EditRecord) -> BoxFuture<'_, StoreResult<()>>;

    /// Bump the document's modification timestamp.
    fn touch_document<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, StoreResult<()>>;
}

/// Capability of a user on a document. Consulted on every join and every edit.
pub trait AccessResolver: Send + Sync {
    fn check_access<'a>(
        &'a self,
        document_id: &'a str,
        user_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<DocumentAccess>>;
}

pub trait UserDirectory: Send + Sync {
    fn find_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, StoreResult<Option<Identity>>>;
}

/// Sharing levels as stored on notes and shares.
pub const ACCESS_LEVEL_EDIT: &str = "EDIT";

/// Resolve capability from a note's ownership and sharing facts.
pub fn resolve_access(
    user_id: &str,
    owner_id: &str,
    is_public: bool,
    public_access: Option<&str>,
    shared_level: Option<&str>,
) -> DocumentAccess {
    if owner_id == user_id {
        return DocumentAccess::full();
    }

    if is_public {
        return DocumentAccess {
            can_view: true,
            can_edit: public_access == Some(ACCESS_LEVEL_EDIT),
        };
    }

    match shared_level {
        Some(level) => DocumentAccess {
            can_view: true,
            can_edit: level == ACCESS_LEVEL_EDIT,
        },
        None => DocumentAccess::none(),
    }
}
