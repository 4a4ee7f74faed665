//! SQLite-backed metadata store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::store::{
    now_rfc3339, MetadataStore, ObjectRecord, SessionRecord, StoreFuture, StoreResult, Table,
    UserRecord,
};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

const USER_COLUMNS: &str = "email, password_hash, username, created_at";
const SESSION_COLUMNS: &str = "id, email, location, agent, created_at, last_seen";
const OBJECT_COLUMNS: &str = "id, username, filename, password, backend_key, created_at";

/// Metadata store backed by a single SQLite database file.
pub struct SqliteMetadataStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the required tables and indexes if they do not already exist.
    /// Idempotent; runs on every startup.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                email          TEXT PRIMARY KEY,
                password_hash  TEXT NOT NULL,
                username       TEXT NOT NULL UNIQUE,
                created_at     TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL,
                location    TEXT NOT NULL DEFAULT 'unknown',
                agent       TEXT NOT NULL DEFAULT '',
                created_at  TEXT NOT NULL,
                last_seen   TEXT NOT NULL,

                FOREIGN KEY (email) REFERENCES users(email) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_email
                ON sessions(email);

            -- filename: logical path, segments separated by '/'
            -- backend_key: path inside the blob store
            CREATE TABLE IF NOT EXISTS objects (
                id           TEXT PRIMARY KEY,
                username     TEXT NOT NULL,
                filename     TEXT NOT NULL,
                password     TEXT NOT NULL DEFAULT '',
                backend_key  TEXT NOT NULL UNIQUE,
                created_at   TEXT NOT NULL,

                UNIQUE (username, filename)
            );

            CREATE INDEX IF NOT EXISTS idx_objects_username
                ON objects(username);
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |v| v < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now_rfc3339()],
            )?;
        }

        Ok(())
    }

    fn query_one<T>(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StoreResult<Option<T>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        Ok(conn.query_row(sql, args, map).optional()?)
    }

    fn query_many<T>(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StoreResult<Vec<T>> {
        let conn = self.conn.lock().expect("mutex poisoned");
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, map)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        email: row.get(0)?,
        password_hash: row.get(1)?,
        username: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        email: row.get(1)?,
        location: row.get(2)?,
        agent: row.get(3)?,
        created_at: row.get(4)?,
        last_seen: row.get(5)?,
    })
}

fn map_object(row: &Row<'_>) -> rusqlite::Result<ObjectRecord> {
    Ok(ObjectRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        filename: row.get(2)?,
        password: row.get(3)?,
        backend_key: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ── MetadataStore implementation ───────────────────────────────────

impl MetadataStore for SqliteMetadataStore {
    // ── Users ───────────────────────────────────────────────────────

    fn create_user(&self, record: UserRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO users (email, password_hash, username, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.email,
                    record.password_hash,
                    record.username,
                    record.created_at,
                ],
            )?;
            Ok(())
        })
    }

    fn get_user_by_email(&self, email: &str) -> StoreFuture<'_, Option<UserRecord>> {
        let email = email.to_string();
        Box::pin(async move {
            self.query_one(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                &[&email],
                map_user,
            )
        })
    }

    fn get_user_by_username(&self, username: &str) -> StoreFuture<'_, Option<UserRecord>> {
        let username = username.to_string();
        Box::pin(async move {
            self.query_one(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                &[&username],
                map_user,
            )
        })
    }

    fn list_users(&self) -> StoreFuture<'_, Vec<UserRecord>> {
        Box::pin(async move {
            self.query_many(
                &format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at, email"),
                &[],
                map_user,
            )
        })
    }

    // ── Sessions ────────────────────────────────────────────────────

    fn create_session(&self, record: SessionRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO sessions (id, email, location, agent, created_at, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.email,
                    record.location,
                    record.agent,
                    record.created_at,
                    record.last_seen,
                ],
            )?;
            Ok(())
        })
    }

    fn get_session(&self, id: &str) -> StoreFuture<'_, Option<SessionRecord>> {
        let id = id.to_string();
        Box::pin(async move {
            self.query_one(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                &[&id],
                map_session,
            )
        })
    }

    fn list_sessions_for(&self, email: &str) -> StoreFuture<'_, Vec<SessionRecord>> {
        let email = email.to_string();
        Box::pin(async move {
            self.query_many(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions WHERE email = ?1
                     ORDER BY created_at, rowid"
                ),
                &[&email],
                map_session,
            )
        })
    }

    fn list_sessions(&self) -> StoreFuture<'_, Vec<SessionRecord>> {
        Box::pin(async move {
            self.query_many(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at, rowid"),
                &[],
                map_session,
            )
        })
    }

    fn delete_session(&self, id: &str) -> StoreFuture<'_, ()> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    // ── Objects ─────────────────────────────────────────────────────

    fn insert_object(&self, record: ObjectRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            conn.execute(
                "INSERT INTO objects (id, username, filename, password, backend_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.username,
                    record.filename,
                    record.password,
                    record.backend_key,
                    record.created_at,
                ],
            )?;
            Ok(())
        })
    }

    fn get_object(&self, id: &str) -> StoreFuture<'_, Option<ObjectRecord>> {
        let id = id.to_string();
        Box::pin(async move {
            self.query_one(
                &format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE id = ?1"),
                &[&id],
                map_object,
            )
        })
    }

    fn get_object_by_path(
        &self,
        username: &str,
        filename: &str,
    ) -> StoreFuture<'_, Option<ObjectRecord>> {
        let username = username.to_string();
        let filename = filename.to_string();
        Box::pin(async move {
            self.query_one(
                &format!(
                    "SELECT {OBJECT_COLUMNS} FROM objects WHERE username = ?1 AND filename = ?2"
                ),
                &[&username, &filename],
                map_object,
            )
        })
    }

    fn list_objects_for(&self, username: &str) -> StoreFuture<'_, Vec<ObjectRecord>> {
        let username = username.to_string();
        Box::pin(async move {
            self.query_many(
                &format!(
                    "SELECT {OBJECT_COLUMNS} FROM objects WHERE username = ?1
                     ORDER BY created_at, rowid"
                ),
                &[&username],
                map_object,
            )
        })
    }

    fn list_objects(&self) -> StoreFuture<'_, Vec<ObjectRecord>> {
        Box::pin(async move {
            self.query_many(
                &format!("SELECT {OBJECT_COLUMNS} FROM objects ORDER BY created_at, rowid"),
                &[],
                map_object,
            )
        })
    }

    // ── Admin ───────────────────────────────────────────────────────

    fn reset(&self, table: Table) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            // Table names come from a closed enum, never from user input.
            conn.execute(&format!("DELETE FROM {}", table.as_str()), [])?;
            Ok(())
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
