// SQLite persistence for the authenticated session.
//
// The only state that survives process restarts: access/refresh tokens and
// the denormalized buyer identifier used for the push-channel room join.
// Auction view state is never persisted.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// SQLite-backed key-value store for session state.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

const KEY_ACCESS_TOKEN: &str = "access_token";
const KEY_REFRESH_TOKEN: &str = "refresh_token";
const KEY_BUYER_ID: &str = "buyer_id";

impl SessionStore {
    /// Open (or create) the session database at `path` and ensure the schema
    /// exists. Pass `":memory:"` for an ephemeral in-memory store (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open session database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set session database pragmas")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS session (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .context("failed to create session schema")?;

        Ok(SessionStore {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().expect("session store mutex poisoned");
        conn.query_row(
            "SELECT value FROM session WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to read session key {key}"))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().expect("session store mutex poisoned");
        conn.execute(
            "INSERT INTO session (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .with_context(|| format!("failed to write session key {key}"))?;
        Ok(())
    }

    /// Store both tokens after a successful login.
    pub fn set_tokens(&self, access: &str, refresh: &str) -> Result<()> {
        self.set(KEY_ACCESS_TOKEN, access)?;
        self.set(KEY_REFRESH_TOKEN, refresh)
    }

    /// Replace only the access token (the refresh-and-retry path).
    pub fn set_access_token(&self, access: &str) -> Result<()> {
        self.set(KEY_ACCESS_TOKEN, access)
    }

    pub fn access_token(&self) -> Result<Option<String>> {
        self.get(KEY_ACCESS_TOKEN)
    }

    pub fn refresh_token(&self) -> Result<Option<String>> {
        self.get(KEY_REFRESH_TOKEN)
    }

    /// Record the buyer identity announced to the push channel.
    pub fn set_buyer_id(&self, buyer_id: u64) -> Result<()> {
        self.set(KEY_BUYER_ID, &buyer_id.to_string())
    }

    pub fn buyer_id(&self) -> Result<Option<u64>> {
        Ok(self
            .get(KEY_BUYER_ID)?
            .and_then(|v| v.parse::<u64>().ok()))
    }

    /// Wipe the session (forced logout on an expired refresh token).
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().expect("session store mutex poisoned");
        conn.execute("DELETE FROM session", [])
            .context("failed to clear session")?;
        Ok(())
    }
}

/// Resolve the default on-disk location for the session database when the
/// config does not name one: `<platform data dir>/buyer-assistant/session.db`.
pub fn default_db_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "buyer-assistant")
        .context("could not determine a platform data directory")?;
    let dir = dirs.data_dir();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create data directory {}", dir.display()))?;
    Ok(dir.join("session.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_round_trip() {
        let store = SessionStore::in_memory().unwrap();
        assert!(store.access_token().unwrap().is_none());

        store.set_tokens("acc-1", "ref-1").unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("acc-1"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("ref-1"));
    }

    #[test]
    fn set_access_token_keeps_refresh_token() {
        let store = SessionStore::in_memory().unwrap();
        store.set_tokens("acc-1", "ref-1").unwrap();

        store.set_access_token("acc-2").unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("acc-2"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("ref-1"));
    }

    #[test]
    fn buyer_id_round_trip() {
        let store = SessionStore::in_memory().unwrap();
        assert!(store.buyer_id().unwrap().is_none());

        store.set_buyer_id(7).unwrap();
        assert_eq!(store.buyer_id().unwrap(), Some(7));

        // Last write wins
        store.set_buyer_id(42).unwrap();
        assert_eq!(store.buyer_id().unwrap(), Some(42));
    }

    #[test]
    fn clear_removes_everything() {
        let store = SessionStore::in_memory().unwrap();
        store.set_tokens("acc", "ref").unwrap();
        store.set_buyer_id(9).unwrap();

        store.clear().unwrap();
        assert!(store.access_token().unwrap().is_none());
        assert!(store.refresh_token().unwrap().is_none());
        assert!(store.buyer_id().unwrap().is_none());
    }
}
