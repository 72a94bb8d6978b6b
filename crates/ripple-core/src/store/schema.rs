//! SQLite schema DDL and migration framework.

use rusqlite::Connection;

use crate::errors::RippleResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 2;

/// Core DDL statements: 6 CREATE TABLE + 9 CREATE INDEX.
///
/// Executed with `CREATE ... IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (6) ──────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS repo_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS repos (
        repo_id TEXT PRIMARY KEY,
        root_path TEXT NOT NULL,
        last_analyzed TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS files (
        repo_id TEXT NOT NULL,
        path TEXT NOT NULL,
        language TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        last_indexed_at TEXT DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (repo_id, path)
    );",
    "CREATE TABLE IF NOT EXISTS nodes (
        id TEXT PRIMARY KEY,
        repo_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        language TEXT NOT NULL,
        file_path TEXT NOT NULL,
        start_line INTEGER NOT NULL DEFAULT 0,
        end_line INTEGER NOT NULL DEFAULT 0,
        layer TEXT NOT NULL DEFAULT 'unknown',
        metrics TEXT,
        content_hash TEXT NOT NULL DEFAULT '',
        last_analyzed TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS edges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_id TEXT NOT NULL,
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        target_type TEXT NOT NULL DEFAULT 'node',
        relationship TEXT NOT NULL,
        weight INTEGER NOT NULL DEFAULT 1,
        arg_calls INTEGER NOT NULL DEFAULT 0,
        return_calls INTEGER NOT NULL DEFAULT 0,
        recursive INTEGER NOT NULL DEFAULT 0,
        UNIQUE(source_id, target_id, target_type, relationship)
    );",
    "CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        repo_id TEXT NOT NULL,
        file_path TEXT NOT NULL,
        symbol TEXT,
        kind TEXT NOT NULL,
        language TEXT NOT NULL,
        layer TEXT NOT NULL DEFAULT 'unknown',
        byte_start INTEGER NOT NULL,
        byte_end INTEGER NOT NULL,
        text TEXT NOT NULL,
        embedding BLOB NOT NULL,
        dim INTEGER NOT NULL,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    // ── indexes (9) ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_nodes_repo ON nodes(repo_id);",
    "CREATE INDEX IF NOT EXISTS idx_nodes_repo_kind ON nodes(repo_id, kind);",
    "CREATE INDEX IF NOT EXISTS idx_nodes_repo_name ON nodes(repo_id, name);",
    "CREATE INDEX IF NOT EXISTS idx_nodes_file ON nodes(repo_id, file_path);",
    "CREATE INDEX IF NOT EXISTS idx_edges_repo ON edges(repo_id);",
    "CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id, relationship);",
    "CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id, relationship);",
    "CREATE INDEX IF NOT EXISTS idx_chunks_repo_kind ON chunks(repo_id, kind);",
    "CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(repo_id, file_path);",
];

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations from the current stored version up to
/// [`SCHEMA_VERSION`]. Each step is wrapped in a SAVEPOINT so a failure rolls
/// back only that single step.
pub fn migrate_schema(conn: &Connection) -> RippleResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT ripple_migrate_step;")?;

        let step_result = (|| -> RippleResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                2 => migrate_to_v2(conn)?,
                _ => {} // future versions: no-op until a migration is defined
            }
            set_schema_version(conn, next_version)?;
            conn.execute_batch("RELEASE SAVEPOINT ripple_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => current_version = next_version,
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT ripple_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT ripple_migrate_step;");
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Read the current schema version from `repo_meta`.
/// Returns 0 when the key is absent or unparseable.
fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM repo_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> RippleResult<()> {
    conn.execute(
        "INSERT INTO repo_meta(key, value) VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v0 -> v1: baseline, no-op. The base schema is created by
/// `SCHEMA_STATEMENTS` before migrations run.
fn migrate_to_v1(_conn: &Connection) -> RippleResult<()> {
    Ok(())
}

/// v1 -> v2: add the embedding retry queue.
fn migrate_to_v2(conn: &Connection) -> RippleResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS embed_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repo_id TEXT NOT NULL,
            chunk_json TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        );",
    )?;
    conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_embed_queue_repo ON embed_queue(repo_id);")?;
    Ok(())
}
