use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;

mod blobs;
mod groups;
mod messages;
mod relationships;

pub use blobs::{BlobRecord, UploadTicketRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thread-safe SQLite store
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied
        // transaction behind, so a poisoned guard is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS profiles (
                user_id TEXT PRIMARY KEY,
                nickname TEXT,
                profile_photo_ref TEXT,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS relationships (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                target_user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (target_user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                created_by TEXT NOT NULL,
                is_private INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (created_by) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (group_id, user_id),
                FOREIGN KEY (group_id) REFERENCES groups(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                author_id TEXT NOT NULL,
                group_id TEXT,
                recipient_id TEXT,
                type TEXT NOT NULL,
                content TEXT,
                file_ref TEXT,
                file_name TEXT,
                file_type TEXT,
                reply_to_id TEXT,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                edited_at TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (author_id) REFERENCES users(id),
                CHECK ((group_id IS NULL) <> (recipient_id IS NULL))
            );

            CREATE TABLE IF NOT EXISTS uploads (
                token TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                used_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS blobs (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                content_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                data BLOB NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_profiles_nickname ON profiles(nickname);
            CREATE INDEX IF NOT EXISTS idx_relationships_user_target ON relationships(user_id, target_user_id);
            CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_user_id);
            CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);
            CREATE INDEX IF NOT EXISTS idx_messages_group ON messages(group_id, seq);
            CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_id, seq);
            CREATE INDEX IF NOT EXISTS idx_messages_author ON messages(author_id, seq);
            "#,
        )?;
        Ok(())
    }

    // ==================== User Operations ====================

    pub fn create_user(&self, user: &mut User) -> StoreResult<()> {
        let conn = self.conn();
        user.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        user.created_at = now;
        user.updated_at = now;

        conn.execute(
            r#"INSERT INTO users (id, name, email, password_hash, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                &user.id,
                &user.name,
                &user.email,
                &user.password_hash,
                user.created_at.to_rfc3339(),
                user.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn find_user(&self, id: &str) -> StoreResult<Option<User>> {
        let conn = self.conn();
        Ok(conn
            .query_row("SELECT * FROM users WHERE id = ?1", params![id], row_to_user)
            .optional()?)
    }

    pub fn get_user_by_email(&self, email: &str) -> StoreResult<User> {
        let conn = self.conn();
        conn.query_row(
            "SELECT * FROM users WHERE email = ?1",
            params![email],
            row_to_user,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("User {}", email)),
            _ => StoreError::Database(e),
        })
    }

    pub fn user_exists(&self, id: &str) -> StoreResult<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn email_taken(&self, email: &str) -> StoreResult<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ==================== Profile Operations ====================

    pub fn get_profile(&self, user_id: &str) -> StoreResult<Option<Profile>> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                "SELECT * FROM profiles WHERE user_id = ?1",
                params![user_id],
                row_to_profile,
            )
            .optional()?)
    }

    /// Create the profile on first use, otherwise patch only the supplied fields.
    pub fn upsert_profile(
        &self,
        user_id: &str,
        nickname: Option<&str>,
        profile_photo_ref: Option<&str>,
    ) -> StoreResult<Profile> {
        let now = Utc::now();
        {
            let conn = self.conn();
            conn.execute(
                r#"INSERT INTO profiles (user_id, nickname, profile_photo_ref, updated_at)
                   VALUES (?1, ?2, ?3, ?4)
                   ON CONFLICT(user_id) DO UPDATE SET
                       nickname = COALESCE(?2, nickname),
                       profile_photo_ref = COALESCE(?3, profile_photo_ref),
                       updated_at = ?4"#,
                params![user_id, nickname, profile_photo_ref, now.to_rfc3339()],
            )?;
        }
        self.get_profile(user_id)?
            .ok_or_else(|| StoreError::NotFound(format!("Profile {}", user_id)))
    }

    /// Profiles whose nickname equals `nickname` exactly
    pub fn find_profiles_by_nickname(&self, nickname: &str, limit: i64) -> StoreResult<Vec<Profile>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM profiles WHERE nickname = ?1 ORDER BY updated_at ASC LIMIT ?2",
        )?;
        let profiles = stmt
            .query_map(params![nickname, limit], row_to_profile)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(profiles)
    }
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}

fn row_to_profile(row: &rusqlite::Row) -> rusqlite::Result<Profile> {
    Ok(Profile {
        user_id: row.get("user_id")?,
        nickname: row.get("nickname")?,
        profile_photo_ref: row.get("profile_photo_ref")?,
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(parse_datetime)
}

/// Map an unknown enum label to a conversion error so a bad row fails loudly.
fn corrupt(column: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(StoreError::Corrupt(format!("{} = {:?}", column, value))),
    )
}


#[cfg(test)]
mod tests {
    use super::test_support::user;
    use super::*;

    #[test]
    fn test_create_and_get_user() {
        let store = Store::in_memory().unwrap();
        let alice = user(&store, "Alice");
        assert!(!alice.id.is_empty());

        let retrieved = store.find_user(&alice.id).unwrap().unwrap();
        assert_eq!(retrieved.name, "Alice");
        assert_eq!(store.get_user_by_email("alice@example.com").unwrap().id, alice.id);
        assert!(store.email_taken("alice@example.com").unwrap());
        assert!(store.find_user("nope").unwrap().is_none());
    }

    #[test]
    fn test_profile_created_lazily_and_patched() {
        let store = Store::in_memory().unwrap();
        let alice = user(&store, "Alice");
        assert!(store.get_profile(&alice.id).unwrap().is_none());

        let profile = store.upsert_profile(&alice.id, Some("ally"), None).unwrap();
        assert_eq!(profile.nickname.as_deref(), Some("ally"));
        assert!(profile.profile_photo_ref.is_none());

        // Omitted fields are kept
        let profile = store.upsert_profile(&alice.id, None, Some("blob-1")).unwrap();
        assert_eq!(profile.nickname.as_deref(), Some("ally"));
        assert_eq!(profile.profile_photo_ref.as_deref(), Some("blob-1"));
    }

    #[test]
    fn test_find_profiles_by_exact_nickname() {
        let store = Store::in_memory().unwrap();
        let alice = user(&store, "Alice");
        let bob = user(&store, "Bob");
        store.upsert_profile(&alice.id, Some("sky"), None).unwrap();
        store.upsert_profile(&bob.id, Some("skyline"), None).unwrap();

        let found = store.find_profiles_by_nickname("sky", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_id, alice.id);
    }
}
