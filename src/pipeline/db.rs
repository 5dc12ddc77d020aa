//! Watchlist, content and user persistence
//!
//! SQLite implementation with rusqlite. Schema lives in `/sql/*.sql` and is
//! applied by [`run_schema_migrations`].

use crate::types::{Fingerprint, KeywordSet, User, WatchlistContent, WatchlistId};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug)]
pub enum StoreError {
    NotFound(WatchlistId),
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Database(String),
    Schema(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "Watchlist not found: {}", id),
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Schema(e) => write!(f, "Schema error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Watchlist definitions and their last seen content
///
/// Tables (see `/sql/`):
/// - `watchlists` - keyword sets keyed by derived id
/// - `watchlist_content` + `watchlist_fingerprints` - written together
#[async_trait]
pub trait WatchlistStore: Send + Sync {
    async fn load_watchlist(&self, id: &WatchlistId) -> Result<KeywordSet, StoreError>;

    /// Store a keyword set under its derived id; saving the same set twice is a no-op
    async fn save_watchlist(&self, keywords: &KeywordSet) -> Result<WatchlistId, StoreError>;

    /// Persist content and fingerprint atomically: both or neither
    async fn save_watchlist_content(&self, content: &WatchlistContent) -> Result<WatchlistId, StoreError>;

    async fn load_watchlist_content(&self, id: &WatchlistId) -> Result<Option<WatchlistContent>, StoreError>;

    async fn delete_watchlist_content(&self, id: &WatchlistId) -> Result<(), StoreError>;

    async fn load_fingerprint(&self, id: &WatchlistId) -> Result<Option<Fingerprint>, StoreError>;

    /// Every stored watchlist id, used by the discovery loop
    async fn list_watchlists(&self) -> Result<Vec<WatchlistId>, StoreError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
}

/// Run schema migrations from SQL files
///
/// Reads every `.sql` file in `schema_dir` in file-name order and executes it.
/// Files must use `IF NOT EXISTS` so reruns are harmless.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> Result<(), StoreError> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(StoreError::Schema(format!("Schema directory not found: {}", schema_dir)));
    }

    // journal_mode returns a row, so pragma_update rather than execute
    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::debug!("📊 Enabled WAL mode for SQLite database");

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        log::info!("   ├─ Executing: {}", filename);
        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)?;
    }

    log::info!("   └─ ✅ Schema ready");
    Ok(())
}

/// SQLite-backed [`WatchlistStore`] and [`UserDirectory`]
#[derive(Clone)]
pub struct SqliteWatchStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWatchStore {
    /// Open (or create) the database and apply the schema
    pub fn open(db_path: &str, schema_dir: &str) -> Result<Self, StoreError> {
        let mut conn = Connection::open(db_path)?;
        run_schema_migrations(&mut conn, schema_dir)?;
        Ok(Self::new(conn))
    }

    /// Wrap a connection whose schema is already in place
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    /// Insert or replace a user record
    pub fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let watchlists = serde_json::to_string(&user.watchlists)?;
        let now = chrono::Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO users (id, name, email, verified, watchlists_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                verified = excluded.verified,
                watchlists_json = excluded.watchlists_json,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![user.id, user.name, user.email, user.verified, watchlists, now],
        )?;
        Ok(())
    }
}

#[async_trait]
impl WatchlistStore for SqliteWatchStore {
    async fn load_watchlist(&self, id: &WatchlistId) -> Result<KeywordSet, StoreError> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT keywords_json FROM watchlists WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    async fn save_watchlist(&self, keywords: &KeywordSet) -> Result<WatchlistId, StoreError> {
        let id = keywords.id();
        let json = serde_json::to_string(keywords)?;
        let now = chrono::Utc::now().timestamp();

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO watchlists (id, keywords_json, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id.as_str(), json, now],
        )?;
        Ok(id)
    }

    async fn save_watchlist_content(&self, content: &WatchlistContent) -> Result<WatchlistId, StoreError> {
        let json = serde_json::to_string(content)?;
        let id = content.watchlist_id.as_str();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO watchlist_content (watchlist_id, content_json, item_count, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(watchlist_id) DO UPDATE SET
                content_json = excluded.content_json,
                item_count = excluded.item_count,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![id, json, content.items.len() as i64, content.timestamp],
        )?;
        tx.execute(
            r#"
            INSERT INTO watchlist_fingerprints (watchlist_id, fingerprint, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(watchlist_id) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![id, content.fingerprint.as_str(), content.timestamp],
        )?;
        tx.commit()?;

        Ok(content.watchlist_id.clone())
    }

    async fn load_watchlist_content(&self, id: &WatchlistId) -> Result<Option<WatchlistContent>, StoreError> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT content_json FROM watchlist_content WHERE watchlist_id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete_watchlist_content(&self, id: &WatchlistId) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM watchlist_content WHERE watchlist_id = ?1", [id.as_str()])?;
        tx.execute("DELETE FROM watchlist_fingerprints WHERE watchlist_id = ?1", [id.as_str()])?;
        tx.commit()?;
        Ok(())
    }

    async fn load_fingerprint(&self, id: &WatchlistId) -> Result<Option<Fingerprint>, StoreError> {
        let conn = self.lock()?;
        let fingerprint: Option<String> = conn
            .query_row(
                "SELECT fingerprint FROM watchlist_fingerprints WHERE watchlist_id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(fingerprint.map(Fingerprint::from_hex))
    }

    async fn list_watchlists(&self) -> Result<Vec<WatchlistId>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM watchlists ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(WatchlistId::new).collect())
    }
}

#[async_trait]
impl UserDirectory for SqliteWatchStore {
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, name, email, verified, watchlists_json FROM users")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut users = Vec::with_capacity(rows.len());
        for (id, name, email, verified, watchlists_json) in rows {
            let watchlists: HashMap<String, String> = serde_json::from_str(&watchlists_json)?;
            users.push(User {
                id,
                name,
                email,
                verified,
                watchlists,
            });
        }
        Ok(users)
    }
}
