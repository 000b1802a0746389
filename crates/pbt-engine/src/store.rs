//! Persistent key-value store holding one package's change snapshot.
//!
//! Each package gets its own SQLite file under the cache directory with a
//! single `kv` table. Writes go through a [`WriteBatch`] applied in one
//! transaction so a snapshot is never half written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::EngineError;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (key BLOB PRIMARY KEY, value BLOB NOT NULL)";

/// Puts and deletes applied atomically by [`SnapshotStore::write`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    put: Vec<(Vec<u8>, Vec<u8>)>,
    delete: Vec<Vec<u8>>,
}

impl WriteBatch {
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.put.push((key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.delete.push(key.into());
    }

    pub fn is_empty(&self) -> bool {
        self.put.is_empty() && self.delete.is_empty()
    }
}

pub struct SnapshotStore {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore").field("path", &self.path).finish()
    }
}

impl SnapshotStore {
    /// Open or create the store at `path`, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the directory or database cannot be created.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            pbt_util::fs::ensure_dir(parent)?;
        }
        let conn = Connection::open(path).map_err(|source| store_error(path, source))?;
        Self::init(conn, path.to_path_buf())
    }

    /// A store that lives only as long as the value.
    ///
    /// # Errors
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, EngineError> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|source| store_error(&path, source))?;
        Self::init(conn, path)
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self, EngineError> {
        conn.execute_batch(SCHEMA)
            .map_err(|source| store_error(&path, source))?;
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    /// Returns an error if the database cannot be queried.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .map_err(|source| store_error(&self.path, source))
    }

    /// Every key starting with `prefix`, sorted.
    ///
    /// # Errors
    /// Returns an error if the database cannot be queried.
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, EngineError> {
        let len = i64::try_from(prefix.len()).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM kv WHERE substr(key, 1, ?2) = ?1 ORDER BY key")
            .map_err(|source| store_error(&self.path, source))?;
        let rows = stmt
            .query_map(params![prefix, len], |row| row.get::<_, Vec<u8>>(0))
            .map_err(|source| store_error(&self.path, source))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|source| store_error(&self.path, source))
    }

    /// Apply all puts, then all deletes, in one transaction.
    ///
    /// # Errors
    /// Returns an error if the transaction fails; nothing is written then.
    pub fn write(&mut self, batch: WriteBatch) -> Result<(), EngineError> {
        if batch.is_empty() {
            return Ok(());
        }
        let path = self.path.clone();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| store_error(&path, source))?;
        for (key, value) in &batch.put {
            tx.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|source| store_error(&path, source))?;
        }
        for key in &batch.delete {
            tx.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(|source| store_error(&path, source))?;
        }
        tx.commit().map_err(|source| store_error(&path, source))
    }
}

/// Lazily opened stores, one per package, under a cache directory.
#[derive(Debug)]
pub struct SnapshotStores {
    dir: PathBuf,
    stores: HashMap<PathBuf, SnapshotStore>,
}

impl SnapshotStores {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            stores: HashMap::new(),
        }
    }

    /// The store for `package`, opened on first use and reused afterwards.
    ///
    /// # Errors
    /// Returns an error if the store cannot be opened.
    pub fn open(&mut self, package: &str) -> Result<&mut SnapshotStore, EngineError> {
        let path = self.dir.join(format!("{package}.db"));
        match self.stores.entry(path) {
            std::collections::hash_map::Entry::Occupied(entry) => Ok(entry.into_mut()),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let store = SnapshotStore::open(entry.key())?;
                Ok(entry.insert(store))
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn store_error(path: &Path, source: rusqlite::Error) -> EngineError {
    EngineError::Store {
        path: path.display().to_string(),
        source,
    }
}
