use futures_util::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Error as SqlxError, Row};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{resolve_access, AccessResolver, DocumentStore, StoreResult, UserDirectory};
use crate::models::{DocumentAccess, EditRecord, Identity};

/// Note row as far as sharing decisions are concerned
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NoteAccessRow {
    pub owner_id: String,
    pub is_public: bool,
    pub public_access: Option<String>,
    pub shared_level: Option<String>,
}

/// Database connection pool
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    /// * `max_connections` - Upper bound of the pool
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(2) // Keep some connections alive
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    fn log_pool(&self, action: &str, subject: &str) {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        debug!(
            "{} {}. Pool connections: {} idle, {} in use",
            action,
            subject,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );
    }

    /// Check whether a note exists
    pub async fn note_exists(&self, note_id: &str) -> Result<bool, SqlxError> {
        self.log_pool("Checking existence of note", note_id);

        let row = sqlx::query("SELECT 1 AS found FROM notes WHERE id = $1")
            .bind(note_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    /// Load the ownership and sharing facts of a note for one user
    ///
    /// # Returns
    /// * `Result<Option<NoteAccessRow>, SqlxError>` - None when the note does not exist
    pub async fn load_note_access(
        &self,
        note_id: &str,
        user_id: &str,
    ) -> Result<Option<NoteAccessRow>, SqlxError> {
        self.log_pool("Checking access to note", note_id);

        let query_sql = r#"
            SELECT
                n.owner_id,
                n.is_public,
                n.public_access,
                sa.access_level AS shared_level
            FROM notes n
                LEFT JOIN shared_access sa ON sa.note_id = n.id AND sa.user_id = $2
            WHERE n.id = $1
            LIMIT 1
        "#;

        sqlx::query_as::<_, NoteAccessRow>(query_sql)
            .bind(note_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Look up a user by id
    pub async fn load_user(&self, user_id: &str) -> Result<Option<Identity>, SqlxError> {
        self.log_pool("Loading user", user_id);

        let row = sqlx::query("SELECT id, email, name FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Identity {
                id: row.try_get("id")?,
                email: row.try_get("email")?,
                name: row.try_get("name")?,
            })),
            None => Ok(None),
        }
    }

    /// Append an accepted edit to the edit log
    pub async fn insert_document_edit(&self, record: &EditRecord) -> Result<(), SqlxError> {
        self.log_pool("Recording edit on note", &record.document_id);

        let query_sql = r#"
            INSERT INTO document_edits(note_id, user_id, operations, version, ip_address, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
        "#;
        sqlx::query(query_sql)
            .bind(&record.document_id)
            .bind(&record.user_id)
            .bind(Json(record.operations.clone()))
            .bind(record.version as i64)
            .bind(record.meta.ip_address.as_deref())
            .bind(record.meta.user_agent.as_deref())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Set the note's modification timestamp to now
    pub async fn touch_note(&self, note_id: &str) -> Result<(), SqlxError> {
        let result = sqlx::query("UPDATE notes SET updated_at = NOW() WHERE id = $1")
            .bind(note_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            error!("Note not found while updating timestamp: {}", note_id);
            return Err(SqlxError::RowNotFound);
        }
        Ok(())
    }
}

impl DocumentStore for PgStore {
    fn document_exists<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, StoreResult<bool>> {
        Box::pin(async move { Ok(self.note_exists(document_id).await?) })
    }

    fn append_edit(&self, record: EditRecord) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move { Ok(self.insert_document_edit(&record).await?) })
    }

    fn touch_document<'a>(&'a self, document_id: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move { Ok(self.touch_note(document_id).await?) })
    }
}

impl AccessResolver for PgStore {
    fn check_access<'a>(
        &'a self,
        document_id: &'a str,
        user_id: &'a str,
    ) -> BoxFuture<'a, StoreResult<DocumentAccess>> {
        Box::pin(async move {
            let access = match self.load_note_access(document_id, user_id).await? {
                Some(row) => resolve_access(
                    user_id,
                    &row.owner_id,
                    row.is_public,
                    row.public_access.as_deref(),
                    row.shared_level.as_deref(),
                ),
                None => DocumentAccess::none(),
            };
            Ok(access)
        })
    }
}

impl UserDirectory for PgStore {
    fn find_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, StoreResult<Option<Identity>>> {
        Box::pin(async move { Ok(self.load_user(user_id).await?) })
    }
}
