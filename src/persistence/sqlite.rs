//! SQLite-backed wallet store
//!
//! One connection behind a mutex; every statement runs on the blocking pool
//! so the async callers never wait on disk I/O directly.

use super::WalletStore;
use crate::addresses::Address;
use crate::balances::HiddenTokens;
use crate::cache::{CacheSnapshot, SnapshotEntry};
use crate::config::PersistenceConfig;
use crate::errors::{SyncError, SyncResult};
use crate::logger::{self, LogTag};
use crate::pending::PendingTransaction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache_snapshots (
    wallet_id   TEXT NOT NULL,
    node_key    TEXT NOT NULL,
    value_json  TEXT NOT NULL,
    fetched_at  TEXT NOT NULL,
    PRIMARY KEY (wallet_id, node_key)
);

CREATE TABLE IF NOT EXISTS pending_transactions (
    wallet_id     TEXT NOT NULL,
    hash          TEXT NOT NULL,
    body_json     TEXT NOT NULL,
    status        TEXT NOT NULL,
    submitted_at  TEXT NOT NULL,
    PRIMARY KEY (wallet_id, hash)
);

CREATE TABLE IF NOT EXISTS addresses (
    wallet_id         TEXT    NOT NULL,
    hash              TEXT    NOT NULL,
    derivation_index  INTEGER NOT NULL,
    group_id          INTEGER NOT NULL,
    is_default        INTEGER NOT NULL DEFAULT 0,
    label             TEXT,
    color             TEXT,
    PRIMARY KEY (wallet_id, hash),
    UNIQUE (wallet_id, derivation_index)
);

CREATE TABLE IF NOT EXISTS hidden_tokens (
    wallet_id  TEXT NOT NULL,
    token_id   TEXT NOT NULL,
    PRIMARY KEY (wallet_id, token_id)
);
";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl SqliteStore {
    /// Open (or create) the database file, creating parent directories
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn, path.display().to_string())?;
        logger::info(
            LogTag::Persistence,
            &format!("Wallet store ready at {}", store.location),
        );
        Ok(store)
    }

    pub fn in_memory() -> SyncResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, ":memory:".to_string())
    }

    pub fn from_config(config: &PersistenceConfig) -> SyncResult<Self> {
        Self::open(&config.database_path)
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn with_connection(conn: Connection, location: String) -> SyncResult<Self> {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        logger::debug(
            LogTag::Persistence,
            &format!("Schema initialized at {} (journal mode {})", location, mode),
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn run<T, F>(&self, op: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> SyncResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            op(&mut guard)
        })
        .await
        .map_err(|e| SyncError::internal(format!("Store task failed: {}", e)))?
    }
}

fn parse_timestamp(raw: &str) -> SyncResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SyncError::persistence(format!("Bad timestamp '{}': {}", raw, e)))
}

#[async_trait]
impl WalletStore for SqliteStore {
    async fn save_snapshot(&self, wallet_id: &str, snapshot: &CacheSnapshot) -> SyncResult<()> {
        let wallet_id = wallet_id.to_string();
        let rows: Vec<(String, String, String)> = snapshot
            .entries
            .iter()
            .map(|(key, entry)| -> SyncResult<(String, String, String)> {
                Ok((
                    key.clone(),
                    serde_json::to_string(&entry.value)?,
                    entry.fetched_at.to_rfc3339(),
                ))
            })
            .collect::<SyncResult<_>>()?;

        let count = rows.len();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM cache_snapshots WHERE wallet_id = ?1", params![wallet_id])?;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO cache_snapshots (wallet_id, node_key, value_json, fetched_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (key, value, fetched_at) in &rows {
                    insert.execute(params![wallet_id, key, value, fetched_at])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        logger::debug(LogTag::Persistence, &format!("Saved {} snapshot entries", count));
        Ok(())
    }

    async fn load_snapshot(&self, wallet_id: &str) -> SyncResult<CacheSnapshot> {
        let wallet_id = wallet_id.to_string();
        let rows: Vec<(String, String, String)> = self
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT node_key, value_json, fetched_at FROM cache_snapshots
                     WHERE wallet_id = ?1",
                )?;
                let rows = stmt
                    .query_map(params![wallet_id], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut snapshot = CacheSnapshot::default();
        for (key, value, fetched_at) in rows {
            let entry = SnapshotEntry {
                value: serde_json::from_str(&value)?,
                fetched_at: parse_timestamp(&fetched_at)?,
            };
            snapshot.entries.insert(key, entry);
        }
        Ok(snapshot)
    }

    async fn save_pending(
        &self,
        wallet_id: &str,
        pending: &[PendingTransaction],
    ) -> SyncResult<()> {
        let wallet_id = wallet_id.to_string();
        let rows: Vec<(String, String, &'static str, String)> = pending
            .iter()
            .map(|tx| -> SyncResult<(String, String, &'static str, String)> {
                Ok((
                    tx.hash.clone(),
                    serde_json::to_string(tx)?,
                    tx.status.as_str(),
                    tx.submitted_at.to_rfc3339(),
                ))
            })
            .collect::<SyncResult<_>>()?;

        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM pending_transactions WHERE wallet_id = ?1",
                params![wallet_id],
            )?;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO pending_transactions
                     (wallet_id, hash, body_json, status, submitted_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for (hash, body, status, submitted_at) in &rows {
                    insert.execute(params![wallet_id, hash, body, status, submitted_at])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn load_pending(&self, wallet_id: &str) -> SyncResult<Vec<PendingTransaction>> {
        let wallet_id = wallet_id.to_string();
        let bodies: Vec<String> = self
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT body_json FROM pending_transactions
                     WHERE wallet_id = ?1 ORDER BY submitted_at, hash",
                )?;
                let rows = stmt
                    .query_map(params![wallet_id], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(SyncError::from))
            .collect()
    }

    async fn save_addresses(&self, wallet_id: &str, addresses: &[Address]) -> SyncResult<()> {
        let wallet_id = wallet_id.to_string();
        let addresses = addresses.to_vec();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM addresses WHERE wallet_id = ?1", params![wallet_id])?;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO addresses
                        (wallet_id, hash, derivation_index, group_id, is_default, label, color)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for a in &addresses {
                    insert.execute(params![
                        wallet_id,
                        a.hash,
                        a.derivation_index,
                        a.group,
                        a.is_default,
                        a.label,
                        a.color
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn load_addresses(&self, wallet_id: &str) -> SyncResult<Vec<Address>> {
        let wallet_id = wallet_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT hash, derivation_index, group_id, is_default, label, color
                 FROM addresses WHERE wallet_id = ?1 ORDER BY derivation_index",
            )?;
            let rows = stmt
                .query_map(params![wallet_id], |row| {
                    Ok(Address {
                        hash: row.get(0)?,
                        derivation_index: row.get(1)?,
                        group: row.get(2)?,
                        is_default: row.get(3)?,
                        label: row.get(4)?,
                        color: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn save_hidden_tokens(&self, wallet_id: &str, hidden: &HiddenTokens) -> SyncResult<()> {
        let wallet_id = wallet_id.to_string();
        let ids: Vec<String> = hidden.iter().map(str::to_string).collect();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM hidden_tokens WHERE wallet_id = ?1", params![wallet_id])?;
            {
                let mut insert =
                    tx.prepare("INSERT INTO hidden_tokens (wallet_id, token_id) VALUES (?1, ?2)")?;
                for id in &ids {
                    insert.execute(params![wallet_id, id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn load_hidden_tokens(&self, wallet_id: &str) -> SyncResult<HiddenTokens> {
        let wallet_id = wallet_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare("SELECT token_id FROM hidden_tokens WHERE wallet_id = ?1")?;
            let ids = stmt
                .query_map(params![wallet_id], |row| row.get::<_, String>(0))?
                .collect::<Result<HiddenTokens, _>>()?;
            Ok(ids)
        })
        .await
    }

    async fn forget_wallet(&self, wallet_id: &str) -> SyncResult<()> {
        let wallet_id = wallet_id.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            for table in ["cache_snapshots", "pending_transactions", "addresses", "hidden_tokens"] {
                tx.execute(
                    &format!("DELETE FROM {} WHERE wallet_id = ?1", table),
                    params![wallet_id],
                )?;
            }
            tx.commit()?;
            logger::info(LogTag::Persistence, &format!("Forgot wallet {}", wallet_id));
            Ok(())
        })
        .await
    }
}
