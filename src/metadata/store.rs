//! Abstract metadata store trait.
//!
//! Any metadata backend must implement [`MetadataStore`].  The trait
//! uses manually desugared async methods (pinned boxed futures) so it can
//! be used as a trait object by the auth service and object pipelines.
//!
//! Uniqueness is enforced here, not by callers: a second user with the
//! same email or username, a second object at the same `(username,
//! filename)`, or a duplicate backend key all fail with
//! [`StoreError::Conflict`].

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

// ── Errors ─────────────────────────────────────────────────────────

/// Errors surfaced by a metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other storage failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(message.unwrap_or_else(|| "constraint violation".into()))
            }
            other => StoreError::Other(other.into()),
        }
    }
}

/// Result alias for metadata store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Boxed future returned by every [`MetadataStore`] method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

// ── Record types ───────────────────────────────────────────────────

/// A registered account.
#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    /// Primary identity.
    pub email: String,
    /// PHC-format password hash.
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Unique display / namespace name.
    pub username: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

/// A login session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    /// Opaque bearer token.
    pub id: String,
    /// Owning user's email.
    pub email: String,
    /// Best-effort "city, region, country" or `unknown`.
    pub location: String,
    /// Client `User-Agent` at login.
    pub agent: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 last-seen timestamp.
    pub last_seen: String,
}

/// Metadata for one uploaded object.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectRecord {
    /// Externally addressable object ID.
    pub id: String,
    /// Owning principal.
    pub username: String,
    /// Logical path within the owner's namespace.
    pub filename: String,
    /// Access password; empty means public.
    #[serde(skip_serializing)]
    pub password: String,
    /// Path inside the blob store.
    pub backend_key: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
}

impl ObjectRecord {
    /// Whether downloads require a password.
    pub fn is_protected(&self) -> bool {
        !self.password.is_empty()
    }
}

/// Tables that may be cleared by an administrative reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Users,
    Sessions,
    Objects,
}

impl Table {
    /// Parse a table name as used on the admin surface.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "users" => Some(Table::Users),
            "sessions" => Some(Table::Sessions),
            "objects" => Some(Table::Objects),
            _ => None,
        }
    }

    /// SQL table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Sessions => "sessions",
            Table::Objects => "objects",
        }
    }
}

/// Current time as an RFC 3339 string.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

// ── Trait ───────────────────────────────────────────────────────────

/// Async metadata store contract.
pub trait MetadataStore: Send + Sync + 'static {
    // ── Users ───────────────────────────────────────────────────────

    /// Insert a user.  Duplicate email or username is a `Conflict`.
    fn create_user(&self, record: UserRecord) -> StoreFuture<'_, ()>;

    /// Point lookup by email.
    fn get_user_by_email(&self, email: &str) -> StoreFuture<'_, Option<UserRecord>>;

    /// Point lookup by username.
    fn get_user_by_username(&self, username: &str) -> StoreFuture<'_, Option<UserRecord>>;

    /// All users.
    fn list_users(&self) -> StoreFuture<'_, Vec<UserRecord>>;

    // ── Sessions ────────────────────────────────────────────────────

    /// Insert a session.
    fn create_session(&self, record: SessionRecord) -> StoreFuture<'_, ()>;

    /// Point lookup by session ID.
    fn get_session(&self, id: &str) -> StoreFuture<'_, Option<SessionRecord>>;

    /// Sessions owned by `email`, oldest first.
    fn list_sessions_for(&self, email: &str) -> StoreFuture<'_, Vec<SessionRecord>>;

    /// All sessions.
    fn list_sessions(&self) -> StoreFuture<'_, Vec<SessionRecord>>;

    /// Delete a session.  Deleting a missing session is not an error.
    fn delete_session(&self, id: &str) -> StoreFuture<'_, ()>;

    // ── Objects ─────────────────────────────────────────────────────

    /// Insert an object row.  Duplicate ID, `(username, filename)` or
    /// backend key is a `Conflict`.
    fn insert_object(&self, record: ObjectRecord) -> StoreFuture<'_, ()>;

    /// Point lookup by object ID.
    fn get_object(&self, id: &str) -> StoreFuture<'_, Option<ObjectRecord>>;

    /// Point lookup by owner and logical path.
    fn get_object_by_path(
        &self,
        username: &str,
        filename: &str,
    ) -> StoreFuture<'_, Option<ObjectRecord>>;

    /// Objects owned by `username`, oldest first.
    fn list_objects_for(&self, username: &str) -> StoreFuture<'_, Vec<ObjectRecord>>;

    /// All objects.
    fn list_objects(&self) -> StoreFuture<'_, Vec<ObjectRecord>>;

    // ── Admin ───────────────────────────────────────────────────────

    /// Delete every row of `table`.  Clearing users cascades to sessions.
    fn reset(&self, table: Table) -> StoreFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_parse_roundtrip() {
        for table in [Table::Users, Table::Sessions, Table::Objects] {
            assert_eq!(Table::parse(table.as_str()), Some(table));
        }
        assert_eq!(Table::parse("credentials"), None);
        assert_eq!(Table::parse("users; DROP TABLE users"), None);
    }

    #[test]
    fn test_object_password_not_serialized() {
        let record = ObjectRecord {
            id: "abc".into(),
            username: "alice".into(),
            filename: "notes.txt".into(),
            password: "hunter2".into(),
            backend_key: "alice/abc/notes.txt".into(),
            created_at: now_rfc3339(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(record.is_protected());
    }
}
