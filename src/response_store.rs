use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

/// Last successful raw response per coldchain query file.
pub struct ResponseStore {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub body: String,
    pub fetched_at: String,
}

impl ResponseStore {
    /// Open (or create) the cache database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqliteResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS responses (
                query TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                digest TEXT NOT NULL,
                fetched_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        info!("Response cache initialized");
        Ok(Self { conn })
    }

    pub fn digest(body: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(body.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Store a response body. Returns false when the stored body is identical.
    pub fn store(&self, query: &str, body: &str) -> SqliteResult<bool> {
        let digest = Self::digest(body);
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT digest FROM responses WHERE query = ?1",
                params![query],
                |row| row.get(0),
            )
            .optional()?;
        if existing.as_deref() == Some(digest.as_str()) {
            debug!(query, "Response unchanged");
            return Ok(false);
        }

        self.conn.execute(
            "INSERT INTO responses (query, body, digest, fetched_at)
             VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
             ON CONFLICT(query) DO UPDATE SET
                body = excluded.body,
                digest = excluded.digest,
                fetched_at = excluded.fetched_at",
            params![query, body, digest],
        )?;
        Ok(true)
    }

    /// The last stored response for a query file.
    pub fn load(&self, query: &str) -> SqliteResult<Option<CachedResponse>> {
        self.conn
            .query_row(
                "SELECT body, fetched_at FROM responses WHERE query = ?1",
                params![query],
                |row| {
                    Ok(CachedResponse {
                        body: row.get(0)?,
                        fetched_at: row.get(1)?,
                    })
                },
            )
            .optional()
    }

    #[cfg(test)]
    pub fn count(&self) -> SqliteResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM responses", [], |row| row.get(0))
    }
}
