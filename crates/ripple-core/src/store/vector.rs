//! Semantic index: chunk storage and cosine nearest-neighbor search.
//!
//! Vectors are stored as little-endian f32 BLOBs next to their metadata, and
//! search is a filtered scan with cosine scoring. The index never computes
//! embeddings; vectors arrive from the embedding collaborator. The first
//! vector written fixes the index dimensionality.

use rusqlite::{params, Connection};

use crate::errors::{RippleError, RippleResult};
use crate::models::{Chunk, ChunkFilters, ChunkHit, ChunkKind, Layer};
use crate::store::Database;

// ---------------------------------------------------------------------------
// Vector encoding
// ---------------------------------------------------------------------------

pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; zero for mismatched or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

// ---------------------------------------------------------------------------
// Dimensionality contract
// ---------------------------------------------------------------------------

/// The index's fixed embedding dimensionality, if any vector was written yet.
pub fn index_dimensions(conn: &Connection) -> RippleResult<Option<usize>> {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM repo_meta WHERE key = 'embedding_dim';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => Ok(v.parse::<usize>().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn enforce_dimensions(conn: &Connection, dim: usize) -> RippleResult<()> {
    match index_dimensions(conn)? {
        None => {
            conn.execute(
                "INSERT INTO repo_meta(key, value) VALUES('embedding_dim', ?1) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
                params![dim.to_string()],
            )?;
            Ok(())
        }
        Some(existing) if existing == dim => Ok(()),
        Some(existing) => Err(RippleError::Validation(format!(
            "embedding dimensionality {dim} does not match index dimensionality {existing}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Chunk operations
// ---------------------------------------------------------------------------

/// Insert or replace a chunk with its vector. Idempotent by chunk id.
pub fn upsert_chunk(conn: &Connection, chunk: &Chunk, vector: &[f32]) -> RippleResult<()> {
    if chunk.id.trim().is_empty() {
        return Err(RippleError::Validation("chunk id must not be empty".into()));
    }
    if vector.is_empty() {
        return Err(RippleError::Validation(format!(
            "chunk {} has an empty embedding",
            chunk.id
        )));
    }
    enforce_dimensions(conn, vector.len())?;
    conn.execute(
        "INSERT INTO chunks (id, repo_id, file_path, symbol, kind, language, layer, \
                             byte_start, byte_end, text, embedding, dim) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
         ON CONFLICT(id) DO UPDATE SET \
             symbol = excluded.symbol, \
             language = excluded.language, \
             layer = excluded.layer, \
             text = excluded.text, \
             embedding = excluded.embedding, \
             dim = excluded.dim, \
             created_at = CURRENT_TIMESTAMP;",
        params![
            chunk.id,
            chunk.repo_id,
            chunk.file_path,
            chunk.symbol,
            chunk.kind.as_str(),
            chunk.language,
            chunk.layer.as_str(),
            chunk.byte_start,
            chunk.byte_end,
            chunk.text,
            vector_to_blob(vector),
            vector.len() as i64,
        ],
    )?;
    Ok(())
}

/// Nearest-neighbor search over chunks matching an exact-metadata filter.
///
/// Results are sorted by descending cosine score, chunk id as tiebreak.
/// Fails with `EmptyIndex` only when the filtered set is empty; callers must
/// treat that as "no evidence", not a fault.
pub fn search(
    conn: &Connection,
    query_vector: &[f32],
    filters: &ChunkFilters,
    k: usize,
) -> RippleResult<Vec<ChunkHit>> {
    let mut sql = String::from(
        "SELECT id, repo_id, file_path, symbol, kind, language, layer, \
                byte_start, byte_end, text, embedding FROM chunks WHERE 1 = 1",
    );
    let mut bind: Vec<String> = Vec::new();
    if let Some(repo_id) = &filters.repo_id {
        sql.push_str(" AND repo_id = ?");
        bind.push(repo_id.clone());
    }
    if let Some(language) = &filters.language {
        sql.push_str(" AND language = ?");
        bind.push(language.clone());
    }
    if let Some(layer) = filters.layer {
        sql.push_str(" AND layer = ?");
        bind.push(layer.as_str().to_string());
    }
    if let Some(kind) = filters.kind {
        sql.push_str(" AND kind = ?");
        bind.push(kind.as_str().to_string());
    }
    sql.push(';');

    let mut stmt = conn.prepare(&sql)?;
    let bind_refs: Vec<&dyn rusqlite::types::ToSql> =
        bind.iter().map(|v| v as &dyn rusqlite::types::ToSql).collect();

    let mut hits: Vec<ChunkHit> = Vec::new();
    let mut rows = stmt.query(bind_refs.as_slice())?;
    while let Some(row) = rows.next()? {
        let kind_raw: String = row.get(4)?;
        let layer_raw: String = row.get(6)?;
        let blob: Vec<u8> = row.get(10)?;
        let chunk = Chunk {
            id: row.get(0)?,
            repo_id: row.get(1)?,
            file_path: row.get(2)?,
            symbol: row.get(3)?,
            kind: ChunkKind::parse(&kind_raw).unwrap_or(ChunkKind::Implementation),
            language: row.get(5)?,
            layer: Layer::parse(&layer_raw),
            byte_start: row.get(7)?,
            byte_end: row.get(8)?,
            text: row.get(9)?,
        };
        let score = cosine_similarity(query_vector, &blob_to_vector(&blob));
        hits.push(ChunkHit { chunk, score });
    }

    if hits.is_empty() {
        return Err(RippleError::EmptyIndex);
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    hits.truncate(k);
    Ok(hits)
}

/// Whether any `test` chunk in the repository references the given symbol
/// name in its text. Drives the test-coverage term of the risk formula.
pub fn has_test_reference(conn: &Connection, repo_id: &str, symbol_name: &str) -> RippleResult<bool> {
    let pattern = format!("%{symbol_name}%");
    let result: Result<i64, _> = conn.query_row(
        "SELECT 1 FROM chunks WHERE repo_id = ?1 AND kind = 'test' AND text LIKE ?2 LIMIT 1;",
        params![repo_id, pattern],
        |row| row.get(0),
    );
    match result {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Embedding retry queue
// ---------------------------------------------------------------------------

/// Park a chunk whose embedding attempts ran out; a later incremental pass
/// drains the queue.
pub fn queue_chunk(conn: &Connection, chunk: &Chunk, error: &str) -> RippleResult<()> {
    conn.execute(
        "INSERT INTO embed_queue(repo_id, chunk_json, attempts, last_error) VALUES(?1, ?2, 1, ?3);",
        params![chunk.repo_id, serde_json::to_string(chunk)?, error],
    )?;
    Ok(())
}

/// Drain the queued chunks of a repository, returning them with their row ids.
pub fn take_queued_chunks(conn: &Connection, repo_id: &str) -> RippleResult<Vec<(i64, Chunk)>> {
    let mut stmt = conn.prepare(
        "SELECT id, chunk_json FROM embed_queue WHERE repo_id = ?1 ORDER BY id;",
    )?;
    let rows: Vec<(i64, String)> = stmt
        .query_map(params![repo_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();
    let mut out = Vec::with_capacity(rows.len());
    for (id, json) in rows {
        let chunk: Chunk = serde_json::from_str(&json)?;
        out.push((id, chunk));
    }
    Ok(out)
}

pub fn remove_queued_chunk(conn: &Connection, queue_id: i64) -> RippleResult<()> {
    conn.execute("DELETE FROM embed_queue WHERE id = ?1;", params![queue_id])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// One-shot Database wrappers
// ---------------------------------------------------------------------------

impl Database {
    pub fn upsert_chunk(&self, chunk: &Chunk, vector: &[f32]) -> RippleResult<()> {
        upsert_chunk(&self.connect()?, chunk, vector)
    }

    pub fn search_chunks(
        &self,
        query_vector: &[f32],
        filters: &ChunkFilters,
        k: usize,
    ) -> RippleResult<Vec<ChunkHit>> {
        search(&self.connect()?, query_vector, filters, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chunk_id;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().unwrap();
        db
    }

    fn chunk(repo: &str, path: &str, kind: ChunkKind, text: &str) -> Chunk {
        Chunk {
            id: chunk_id(repo, path, 0, text.len() as i64, kind),
            repo_id: repo.to_string(),
            file_path: path.to_string(),
            symbol: None,
            kind,
            language: "python".to_string(),
            layer: Layer::Unknown,
            byte_start: 0,
            byte_end: text.len() as i64,
            text: text.to_string(),
        }
    }

    #[test]
    fn upsert_is_idempotent_by_id() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let c = chunk("r1", "src/a.py", ChunkKind::Implementation, "def a(): pass");
        upsert_chunk(&conn, &c, &[1.0, 0.0]).unwrap();
        upsert_chunk(&conn, &c, &[0.0, 1.0]).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn rejects_mixed_dimensionality() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let a = chunk("r1", "src/a.py", ChunkKind::Implementation, "aaa");
        let b = chunk("r1", "src/b.py", ChunkKind::Implementation, "bbb");
        upsert_chunk(&conn, &a, &[1.0, 0.0]).unwrap();
        let err = upsert_chunk(&conn, &b, &[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, RippleError::Validation(_)));
    }

    #[test]
    fn search_scores_and_orders_by_cosine() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let near = chunk("r1", "src/near.py", ChunkKind::Implementation, "near");
        let far = chunk("r1", "src/far.py", ChunkKind::Implementation, "far");
        upsert_chunk(&conn, &near, &[1.0, 0.0]).unwrap();
        upsert_chunk(&conn, &far, &[0.0, 1.0]).unwrap();

        let hits = search(&conn, &[1.0, 0.1], &ChunkFilters::repo("r1"), 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.file_path, "src/near.py");
        assert!(hits[0].score > hits[1].score);
        for hit in &hits {
            assert!(hit.score >= -1.0 && hit.score <= 1.0);
        }
    }

    #[test]
    fn filters_are_exact_match_conjunctions() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let implementation = chunk("r1", "src/a.py", ChunkKind::Implementation, "impl");
        let test_chunk = chunk("r1", "tests/test_a.py", ChunkKind::Test, "test impl");
        upsert_chunk(&conn, &implementation, &[1.0, 0.0]).unwrap();
        upsert_chunk(&conn, &test_chunk, &[1.0, 0.0]).unwrap();

        let mut filters = ChunkFilters::repo("r1");
        filters.kind = Some(ChunkKind::Test);
        let hits = search(&conn, &[1.0, 0.0], &filters, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.kind, ChunkKind::Test);
    }

    #[test]
    fn empty_filtered_set_is_empty_index_error() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let c = chunk("r1", "src/a.py", ChunkKind::Implementation, "aaa");
        upsert_chunk(&conn, &c, &[1.0, 0.0]).unwrap();
        let err = search(&conn, &[1.0, 0.0], &ChunkFilters::repo("r2"), 5).unwrap_err();
        assert!(matches!(err, RippleError::EmptyIndex));
    }

    #[test]
    fn queue_roundtrip() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let c = chunk("r1", "src/a.py", ChunkKind::Implementation, "queued");
        queue_chunk(&conn, &c, "backend down").unwrap();
        let queued = take_queued_chunks(&conn, "r1").unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].1.id, c.id);
        remove_queued_chunk(&conn, queued[0].0).unwrap();
        assert!(take_queued_chunks(&conn, "r1").unwrap().is_empty());
    }

    #[test]
    fn test_reference_lookup_matches_symbol_name() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let t = chunk("r1", "tests/test_a.py", ChunkKind::Test, "def test_handler(): handler()");
        upsert_chunk(&conn, &t, &[1.0, 0.0]).unwrap();
        assert!(has_test_reference(&conn, "r1", "handler").unwrap());
        assert!(!has_test_reference(&conn, "r1", "unrelated_fn").unwrap());
    }
}
