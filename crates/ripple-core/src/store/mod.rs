//! Storage layer: SQLite-backed graph store and semantic index.
//!
//! `Database` is a repository-scoped handle passed explicitly into every
//! operation; there is no ambient registry. Each call opens its own
//! connection (WAL mode), so readers work against consistent snapshots while
//! a writer holds the per-repository lock for the duration of a batch.

pub mod graph;
pub mod schema;
pub mod vector;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::errors::RippleResult;

static MEMORY_DB_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Handle to one SQLite database holding graph, index, and queue tables.
///
/// Every public operation opens its own connection so callers never manage
/// connection lifetime. In-memory databases use a shared-cache URI and keep
/// one pinned connection alive so the database survives between calls.
pub struct Database {
    db_path: String,
    _keeper: Option<Mutex<Connection>>,
}

impl Database {
    /// Open (creating parent directories if needed) a database file.
    pub fn open(db_path: impl AsRef<Path>) -> RippleResult<Self> {
        let resolved: PathBuf = if db_path.as_ref().is_absolute() {
            db_path.as_ref().to_path_buf()
        } else {
            std::env::current_dir()?.join(db_path.as_ref())
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            db_path: resolved.to_string_lossy().into_owned(),
            _keeper: None,
        })
    }

    /// Open a process-private in-memory database satisfying the same
    /// contract as a file-backed one. Intended for tests.
    pub fn open_in_memory() -> RippleResult<Self> {
        let n = MEMORY_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let uri = format!("file:ripple_mem_{n}?mode=memory&cache=shared");
        let keeper = Connection::open(&uri)?;
        Ok(Self {
            db_path: uri,
            _keeper: Some(Mutex::new(keeper)),
        })
    }

    /// Resolved database path (or memory URI).
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Open a new connection with foreign keys enabled.
    pub fn connect(&self) -> RippleResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Initialise the schema: WAL mode, all tables and indexes, then pending
    /// migrations. Safe to call repeatedly.
    pub fn init_schema(&self) -> RippleResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        Ok(())
    }
}

/// One writer lock per repository.
///
/// Coarse by design: a repository's analysis pass holds its lock for the
/// whole batch, while different repositories analyze concurrently.
#[derive(Default)]
pub struct WriterLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WriterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch (creating on first use) the lock handle for a repository.
    pub fn acquire(&self, repo_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock();
        map.entry(repo_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
