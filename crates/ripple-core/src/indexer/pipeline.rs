//! Analysis pipeline: scan, parallel parse, and two-pass batch commit.
//!
//! The parse phase fans out on a rayon pool (each file is independent); the
//! store phase runs under the repository's writer lock and commits the whole
//! batch in one transaction — nodes first, then edges, so edge creation
//! never races its own endpoints. Cancellation between phases discards
//! uncommitted work, leaving the store exactly as it was.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use rayon::prelude::*;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::embed::{embed_with_retry, Embedder};
use crate::errors::{RippleError, RippleResult};
use crate::indexer::chunker::{chunk_file, insight_chunk, is_test_path};
use crate::indexer::coupling::analyze_coupling;
use crate::indexer::filesystem::{hash_bytes, scan_repo_files, SourceFile};
use crate::indexer::layers::classify_layer;
use crate::indexer::parser::{ParsedFile, SourceParser};
use crate::models::{
    file_node_id, module_node_id, symbol_node_id, AnalysisReport, Chunk, EdgeKind, EdgeSpec, Layer,
    Node, NodeKind, ParseWarning,
};
use crate::store::{graph, vector, Database, WriterLocks};

// ---------------------------------------------------------------------------
// Repository handle and cancellation
// ---------------------------------------------------------------------------

/// Explicit repository-scoped handle passed into every operation.
#[derive(Clone, Debug)]
pub struct RepoContext {
    pub repo_id: String,
    pub root: PathBuf,
}

impl RepoContext {
    /// Canonicalize the root and derive the repository id from it.
    pub fn discover(root: &Path) -> RippleResult<Self> {
        let canonical = root.canonicalize()?;
        let repo_id = crate::models::repo_id_from_path(&canonical.to_string_lossy());
        Ok(Self {
            repo_id,
            root: canonical,
        })
    }
}

/// Cooperative cancellation signal checked between pipeline phases.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Internal batch types
// ---------------------------------------------------------------------------

struct FileOutcome {
    file: SourceFile,
    content_hash: String,
    parsed: Result<(ParsedFile, String), ParseWarning>,
}

#[derive(Default)]
struct Batch {
    nodes: IndexMap<String, Node>,
    edges: Vec<EdgeSpec>,
    chunks: Vec<Chunk>,
    /// `(source_module_name, target_module_name, weight)` for coupling.
    module_imports: Vec<(String, String, i64)>,
    module_layers: HashMap<String, Layer>,
    module_ids: HashMap<String, String>,
}

/// Symbol candidates for call/import/inheritance resolution, merged from the
/// store (minus files being replaced) and the current batch.
#[derive(Default)]
struct Candidates {
    functions_by_name: HashMap<String, Vec<(String, String)>>,
    functions_by_qualified: HashMap<String, Vec<String>>,
    classes_by_name: HashMap<String, Vec<String>>,
    modules_by_name: HashMap<String, String>,
    modules_by_tail: HashMap<String, Vec<String>>,
}

impl Candidates {
    fn add_function(&mut self, name: &str, qualified: &str, file_path: &str, id: &str) {
        self.functions_by_name
            .entry(name.to_string())
            .or_default()
            .push((file_path.to_string(), id.to_string()));
        self.functions_by_qualified
            .entry(qualified.to_string())
            .or_default()
            .push(id.to_string());
    }

    fn add_class(&mut self, name: &str, id: &str) {
        self.classes_by_name
            .entry(name.to_string())
            .or_default()
            .push(id.to_string());
    }

    fn add_module(&mut self, name: &str, id: &str) {
        self.modules_by_name.insert(name.to_string(), id.to_string());
        if let Some(tail) = name.rsplit('.').next() {
            self.modules_by_tail
                .entry(tail.to_string())
                .or_default()
                .push(id.to_string());
        }
    }

    /// Resolve a call site to a function id: class-qualified first, then
    /// same-file, then globally unique bare name.
    fn resolve_call(
        &self,
        callee: &str,
        receiver: Option<&str>,
        caller_owner: Option<&str>,
        caller_file: &str,
    ) -> Option<String> {
        for scope in [receiver, caller_owner].into_iter().flatten() {
            let qualified = format!("{scope}.{callee}");
            if let Some(ids) = self.functions_by_qualified.get(&qualified) {
                if ids.len() == 1 {
                    return Some(ids[0].clone());
                }
            }
        }
        if let Some(entries) = self.functions_by_name.get(callee) {
            let same_file: Vec<&String> = entries
                .iter()
                .filter(|(file, _)| file == caller_file)
                .map(|(_, id)| id)
                .collect();
            if same_file.len() == 1 {
                return Some(same_file[0].clone());
            }
            if entries.len() == 1 {
                return Some(entries[0].1.clone());
            }
        }
        None
    }

    fn resolve_module(&self, import: &str) -> Option<String> {
        if let Some(id) = self.modules_by_name.get(import) {
            return Some(id.clone());
        }
        let tail = import.rsplit('.').next()?;
        let candidates = self.modules_by_tail.get(tail)?;
        if candidates.len() == 1 {
            Some(candidates[0].clone())
        } else {
            None
        }
    }

    fn resolve_class(&self, name: &str) -> Option<String> {
        let ids = self.classes_by_name.get(name)?;
        if ids.len() == 1 {
            Some(ids[0].clone())
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Builds and maintains the code graph and semantic index of repositories.
pub struct AnalysisEngine {
    db: Arc<Database>,
    config: EngineConfig,
    locks: WriterLocks,
}

impl AnalysisEngine {
    pub fn new(db: Arc<Database>, config: EngineConfig) -> Self {
        Self {
            db,
            config,
            locks: WriterLocks::new(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Full analysis pass over the repository.
    pub fn analyze_repository(
        &self,
        repo: &RepoContext,
        parser: &dyn SourceParser,
        embedder: &dyn Embedder,
        cancel: &CancelToken,
    ) -> RippleResult<AnalysisReport> {
        let started = Instant::now();
        let lock = self.locks.acquire(&repo.repo_id);
        let _guard = lock.lock();

        let (files_seen, records) = scan_repo_files(&repo.root);
        info!(repo_id = %repo.repo_id, files_seen, "starting full analysis pass");

        let conn = self.db.connect()?;
        let stored_hashes = load_stored_hashes(&conn, &repo.repo_id)?;
        drop(conn);

        let mut report = AnalysisReport {
            repo_id: repo.repo_id.clone(),
            files_seen,
            ..AnalysisReport::default()
        };

        // Partition into unchanged (hash match) and files needing a parse.
        let mut unchanged: Vec<SourceFile> = Vec::new();
        let mut to_parse: Vec<SourceFile> = Vec::new();
        for record in records.iter() {
            match std::fs::read(&record.absolute) {
                Ok(bytes) => {
                    if stored_hashes.get(&record.path) == Some(&hash_bytes(&bytes)) {
                        unchanged.push(record.clone());
                    } else {
                        to_parse.push(record.clone());
                    }
                }
                Err(e) => report.warnings.push(ParseWarning {
                    file_path: record.path.clone(),
                    message: format!("unreadable: {e}"),
                }),
            }
        }
        report.files_unchanged = unchanged.len() as i64;

        if cancel.is_cancelled() {
            report.cancelled = true;
            report.elapsed_ms = started.elapsed().as_millis() as i64;
            return Ok(report);
        }

        let outcomes = parallel_parse(&to_parse, parser, self.config.workers, cancel);

        // Files on disk now, for deletion of vanished ones.
        let present: HashSet<String> = records.iter().map(|r| r.path.clone()).collect();
        let stored: Vec<String> = stored_hashes.keys().cloned().collect();
        let deleted: Vec<String> = stored
            .into_iter()
            .filter(|path| !present.contains(path))
            .collect();

        self.commit_pass(
            repo,
            outcomes,
            unchanged,
            deleted,
            true,
            embedder,
            cancel,
            &mut report,
        )?;

        report.elapsed_ms = started.elapsed().as_millis() as i64;
        Ok(report)
    }

    /// Incremental pass over a changed-file set (from the repository change
    /// feed), extended with the direct dependents of the changed files so
    /// their edges get recomputed.
    pub fn analyze_changed(
        &self,
        repo: &RepoContext,
        changed_paths: &[String],
        parser: &dyn SourceParser,
        embedder: &dyn Embedder,
        cancel: &CancelToken,
    ) -> RippleResult<AnalysisReport> {
        let started = Instant::now();
        let lock = self.locks.acquire(&repo.repo_id);
        let _guard = lock.lock();

        let mut report = AnalysisReport {
            repo_id: repo.repo_id.clone(),
            ..AnalysisReport::default()
        };

        let conn = self.db.connect()?;
        let mut reparse_set: IndexMap<String, ()> = IndexMap::new();
        let mut deleted: Vec<String> = Vec::new();
        for path in changed_paths {
            if repo.root.join(path).is_file() {
                reparse_set.insert(path.clone(), ());
            } else {
                deleted.push(path.clone());
            }
        }
        for path in collect_direct_dependents(&conn, &repo.repo_id, changed_paths)? {
            if repo.root.join(&path).is_file() {
                reparse_set.insert(path, ());
            }
        }
        drop(conn);

        let mut to_parse: Vec<SourceFile> = Vec::new();
        for path in reparse_set.keys() {
            let absolute = repo.root.join(path);
            match crate::indexer::filesystem::detect_language(path) {
                Some(language) => to_parse.push(SourceFile {
                    path: path.clone(),
                    absolute,
                    language,
                }),
                None => debug!(path = %path, "skipping unsupported changed file"),
            }
        }
        report.files_seen = to_parse.len() as i64;

        if cancel.is_cancelled() {
            report.cancelled = true;
            report.elapsed_ms = started.elapsed().as_millis() as i64;
            return Ok(report);
        }

        let outcomes = parallel_parse(&to_parse, parser, self.config.workers, cancel);
        self.commit_pass(repo, outcomes, Vec::new(), deleted, false, embedder, cancel, &mut report)?;

        // Chunks parked by earlier passes get another embedding attempt.
        self.drain_embed_queue(repo, embedder, &mut report)?;

        report.elapsed_ms = started.elapsed().as_millis() as i64;
        Ok(report)
    }

    /// Two-pass batch commit: nodes, then edges, then chunks, atomically.
    #[allow(clippy::too_many_arguments)]
    fn commit_pass(
        &self,
        repo: &RepoContext,
        outcomes: Vec<FileOutcome>,
        unchanged: Vec<SourceFile>,
        deleted: Vec<String>,
        derive_insights: bool,
        embedder: &dyn Embedder,
        cancel: &CancelToken,
        report: &mut AnalysisReport,
    ) -> RippleResult<()> {
        let mut parsed_files: Vec<(SourceFile, String, ParsedFile, String)> = Vec::new();
        for outcome in outcomes {
            match outcome.parsed {
                Ok((parsed, source)) => {
                    parsed_files.push((outcome.file, outcome.content_hash, parsed, source));
                }
                Err(warning) => {
                    warn!(file = %warning.file_path, message = %warning.message, "parse warning");
                    report.warnings.push(warning);
                }
            }
        }
        report.files_indexed = parsed_files.len() as i64;

        let conn = self.db.connect()?;
        let replaced: HashSet<String> = parsed_files
            .iter()
            .map(|(file, ..)| file.path.clone())
            .chain(deleted.iter().cloned())
            .collect();
        let mut candidates = load_stored_candidates(&conn, &repo.repo_id, &replaced)?;

        let batch = build_batch(
            &repo.repo_id,
            &parsed_files,
            &mut candidates,
            derive_insights,
            self.config.coupling_threshold,
        );

        // Embedding happens before the transaction opens; the store never
        // waits on the collaborator.
        let mut embedded: Vec<(Chunk, Result<Vec<f32>, String>)> = Vec::new();
        for chunk in batch.chunks.iter() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }
            let result = embed_with_retry(
                embedder,
                &chunk.text,
                self.config.embed_max_attempts,
                self.config.embed_backoff_ms,
            )
            .map_err(|e| e.0);
            embedded.push((chunk.clone(), result));
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(());
        }

        conn.execute_batch("BEGIN IMMEDIATE;")?;
        let commit_result = (|| -> RippleResult<()> {
            graph::upsert_repo(&conn, &repo.repo_id, &repo.root.to_string_lossy())?;

            for path in &deleted {
                debug!(path = %path, "cascading deletion of removed file");
                graph::delete_file_entities(&conn, &repo.repo_id, path)?;
            }
            for (file, hash, ..) in &parsed_files {
                graph::delete_file_entities(&conn, &repo.repo_id, &file.path)?;
                graph::upsert_file(&conn, &repo.repo_id, &file.path, &file.language, hash)?;
            }
            for file in &unchanged {
                graph::touch_file_nodes(&conn, &repo.repo_id, &file.path)?;
                conn.execute(
                    "UPDATE files SET last_indexed_at = CURRENT_TIMESTAMP \
                     WHERE repo_id = ?1 AND path = ?2;",
                    rusqlite::params![repo.repo_id, file.path],
                )?;
            }

            // Pass 1: nodes.
            for node in batch.nodes.values() {
                graph::upsert_node(&conn, node)?;
                report.nodes_upserted += 1;
            }

            // Pass 2: edges. A reference that is still dangling here is
            // dropped and logged; the batch continues.
            for edge in &batch.edges {
                match graph::upsert_edge(&conn, edge) {
                    Ok(()) => report.edges_upserted += 1,
                    Err(RippleError::DanglingReference { from, to }) => {
                        warn!(%from, %to, "dropping dangling edge");
                        report.edges_dropped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            for (chunk, result) in &embedded {
                match result {
                    Ok(vector_values) => {
                        vector::upsert_chunk(&conn, chunk, vector_values)?;
                        report.chunks_upserted += 1;
                    }
                    Err(message) => {
                        vector::queue_chunk(&conn, chunk, message)?;
                        report.chunks_queued += 1;
                    }
                }
            }
            Ok(())
        })();

        match commit_result {
            Ok(()) if cancel.is_cancelled() => {
                conn.execute_batch("ROLLBACK;")?;
                report.cancelled = true;
                // The rollback voids every counter accumulated above.
                report.nodes_upserted = 0;
                report.edges_upserted = 0;
                report.edges_dropped = 0;
                report.chunks_upserted = 0;
                report.chunks_queued = 0;
                Ok(())
            }
            Ok(()) => {
                conn.execute_batch("COMMIT;")?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK;");
                Err(e)
            }
        }
    }

    /// Retry embedding for chunks parked by earlier passes.
    fn drain_embed_queue(
        &self,
        repo: &RepoContext,
        embedder: &dyn Embedder,
        report: &mut AnalysisReport,
    ) -> RippleResult<()> {
        let conn = self.db.connect()?;
        let queued = vector::take_queued_chunks(&conn, &repo.repo_id)?;
        for (queue_id, chunk) in queued {
            match embed_with_retry(
                embedder,
                &chunk.text,
                self.config.embed_max_attempts,
                self.config.embed_backoff_ms,
            ) {
                Ok(vector_values) => {
                    vector::upsert_chunk(&conn, &chunk, &vector_values)?;
                    vector::remove_queued_chunk(&conn, queue_id)?;
                    report.chunks_upserted += 1;
                }
                Err(e) => {
                    conn.execute(
                        "UPDATE embed_queue SET attempts = attempts + 1, last_error = ?1 \
                         WHERE id = ?2;",
                        rusqlite::params![e.0, queue_id],
                    )?;
                    report.chunks_queued += 1;
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parse phase
// ---------------------------------------------------------------------------

fn parse_one(file: &SourceFile, parser: &dyn SourceParser) -> FileOutcome {
    let bytes = match std::fs::read(&file.absolute) {
        Ok(b) => b,
        Err(e) => {
            return FileOutcome {
                file: file.clone(),
                content_hash: String::new(),
                parsed: Err(ParseWarning {
                    file_path: file.path.clone(),
                    message: format!("unreadable: {e}"),
                }),
            }
        }
    };
    let content_hash = hash_bytes(&bytes);
    let source = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(_) => {
            return FileOutcome {
                file: file.clone(),
                content_hash,
                parsed: Err(ParseWarning {
                    file_path: file.path.clone(),
                    message: "not valid UTF-8".to_string(),
                }),
            }
        }
    };
    let parsed = parser
        .parse(&file.path, &file.language, &source)
        .map(|p| (p, source));
    FileOutcome {
        file: file.clone(),
        content_hash,
        parsed,
    }
}

/// Parse files on a bounded rayon pool; falls back to sequential if the pool
/// cannot be built. Output order matches input order.
fn parallel_parse(
    files: &[SourceFile],
    parser: &dyn SourceParser,
    workers: usize,
    cancel: &CancelToken,
) -> Vec<FileOutcome> {
    if files.is_empty() {
        return Vec::new();
    }
    let worker = |file: &SourceFile| -> Option<FileOutcome> {
        if cancel.is_cancelled() {
            return None;
        }
        Some(parse_one(file, parser))
    };

    let threads = if workers == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        workers
    };
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build();
    let outcomes: Vec<Option<FileOutcome>> = match pool {
        Ok(pool) => pool.install(|| files.par_iter().map(worker).collect()),
        Err(_) => files.iter().map(worker).collect(),
    };
    outcomes.into_iter().flatten().collect()
}

// ---------------------------------------------------------------------------
// Batch assembly
// ---------------------------------------------------------------------------

fn load_stored_hashes(conn: &Connection, repo_id: &str) -> RippleResult<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT path, content_hash FROM files WHERE repo_id = ?1;")?;
    let map = stmt
        .query_map(rusqlite::params![repo_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(map)
}

/// Files whose nodes have edges into nodes owned by the changed paths.
fn collect_direct_dependents(
    conn: &Connection,
    repo_id: &str,
    changed_paths: &[String],
) -> RippleResult<Vec<String>> {
    let mut dependents: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = changed_paths.iter().cloned().collect();
    let mut stmt = conn.prepare(
        "SELECT DISTINCT src.file_path FROM edges e \
         JOIN nodes src ON src.id = e.source_id \
         JOIN nodes dst ON dst.id = e.target_id \
         WHERE e.repo_id = ?1 AND e.target_type = 'node' \
           AND e.relationship IN ('CALLS', 'IMPORTS') \
           AND dst.file_path = ?2 \
         ORDER BY src.file_path;",
    )?;
    for path in changed_paths {
        let rows: Vec<String> = stmt
            .query_map(rusqlite::params![repo_id, path], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        for dependent in rows {
            if seen.insert(dependent.clone()) {
                dependents.push(dependent);
            }
        }
    }
    Ok(dependents)
}

/// Candidate symbols already in the store, excluding files being replaced in
/// this batch.
fn load_stored_candidates(
    conn: &Connection,
    repo_id: &str,
    replaced: &HashSet<String>,
) -> RippleResult<Candidates> {
    let mut candidates = Candidates::default();
    let mut stmt = conn.prepare(
        "SELECT id, kind, name, file_path FROM nodes WHERE repo_id = ?1 ORDER BY id;",
    )?;
    let rows: Vec<(String, String, String, String)> = stmt
        .query_map(rusqlite::params![repo_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .filter_map(|r| r.ok())
        .collect();
    for (id, kind, name, file_path) in rows {
        if replaced.contains(&file_path) {
            continue;
        }
        match kind.as_str() {
            "function" => {
                let qualified = id.rsplit("::").next().unwrap_or(&name).to_string();
                candidates.add_function(&name, &qualified, &file_path, &id);
            }
            "class" => candidates.add_class(&name, &id),
            "module" => candidates.add_module(&name, &id),
            _ => {}
        }
    }
    Ok(candidates)
}

fn file_metrics(parsed: &ParsedFile, is_test: bool) -> serde_json::Value {
    serde_json::json!({
        "loc": parsed.line_count,
        "functions": parsed.functions.len(),
        "classes": parsed.classes.len(),
        "is_test": is_test,
    })
}

fn build_batch(
    repo_id: &str,
    parsed_files: &[(SourceFile, String, ParsedFile, String)],
    candidates: &mut Candidates,
    derive_insights: bool,
    coupling_threshold: i64,
) -> Batch {
    let mut batch = Batch::default();

    // First sweep: declare every node and register resolution candidates, so
    // cross-file references resolve regardless of file order.
    for (file, hash, parsed, _source) in parsed_files {
        let layer = classify_layer(&file.path);
        let in_tests = is_test_path(&file.path);

        let file_id = file_node_id(repo_id, &file.path);
        let file_name = file.path.rsplit('/').next().unwrap_or(&file.path).to_string();
        batch.nodes.insert(
            file_id.clone(),
            Node {
                id: file_id.clone(),
                repo_id: repo_id.to_string(),
                kind: NodeKind::File,
                name: file_name,
                language: file.language.clone(),
                file_path: file.path.clone(),
                start_line: 1,
                end_line: parsed.line_count.max(1),
                layer,
                metrics: file_metrics(parsed, in_tests),
                content_hash: hash.clone(),
            },
        );
        batch.edges.push(EdgeSpec::layer(repo_id, &file_id, layer));

        let module_id = module_node_id(repo_id, &parsed.module_name);
        batch.nodes.insert(
            module_id.clone(),
            Node {
                id: module_id.clone(),
                repo_id: repo_id.to_string(),
                kind: NodeKind::Module,
                name: parsed.module_name.clone(),
                language: file.language.clone(),
                file_path: file.path.clone(),
                start_line: 1,
                end_line: parsed.line_count.max(1),
                layer,
                metrics: serde_json::Value::Null,
                content_hash: hash.clone(),
            },
        );
        batch.edges.push(EdgeSpec::layer(repo_id, &module_id, layer));
        candidates.add_module(&parsed.module_name, &module_id);
        batch.module_layers.insert(parsed.module_name.clone(), layer);
        batch.module_ids.insert(parsed.module_name.clone(), module_id);

        for class in &parsed.classes {
            let class_id = symbol_node_id(repo_id, &file.path, &class.name);
            batch.nodes.insert(
                class_id.clone(),
                Node {
                    id: class_id.clone(),
                    repo_id: repo_id.to_string(),
                    kind: NodeKind::Class,
                    name: class.name.clone(),
                    language: file.language.clone(),
                    file_path: file.path.clone(),
                    start_line: class.start_line,
                    end_line: class.end_line,
                    layer,
                    metrics: serde_json::json!({ "bases": class.bases }),
                    content_hash: hash.clone(),
                },
            );
            batch
                .edges
                .push(EdgeSpec::node(repo_id, &file_id, &class_id, EdgeKind::Contains));
            candidates.add_class(&class.name, &class_id);
        }

        for function in &parsed.functions {
            let function_id = symbol_node_id(repo_id, &file.path, &function.qualified_name);
            batch.nodes.insert(
                function_id.clone(),
                Node {
                    id: function_id.clone(),
                    repo_id: repo_id.to_string(),
                    kind: NodeKind::Function,
                    name: function.name.clone(),
                    language: file.language.clone(),
                    file_path: file.path.clone(),
                    start_line: function.start_line,
                    end_line: function.end_line,
                    layer,
                    metrics: serde_json::json!({
                        "complexity": function.complexity,
                        "loc": function.end_line - function.start_line + 1,
                        "params": function.param_count,
                        "is_test": in_tests,
                    }),
                    content_hash: hash.clone(),
                },
            );
            let container = match &function.owner {
                Some(owner) => symbol_node_id(repo_id, &file.path, owner),
                None => file_id.clone(),
            };
            // Method containers may be absent (e.g. go receiver without the
            // struct in scope); fall back to the file.
            let container = if batch.nodes.contains_key(&container) {
                container
            } else {
                file_id.clone()
            };
            batch
                .edges
                .push(EdgeSpec::node(repo_id, &container, &function_id, EdgeKind::Contains));
            candidates.add_function(
                &function.name,
                &function.qualified_name,
                &file.path,
                &function_id,
            );
        }
    }

    // Second sweep: reference edges, now that every candidate is known.
    for (file, _hash, parsed, source) in parsed_files {
        let layer = classify_layer(&file.path);

        for class in &parsed.classes {
            let class_id = symbol_node_id(repo_id, &file.path, &class.name);
            for base in &class.bases {
                if let Some(base_id) = candidates.resolve_class(base) {
                    if base_id != class_id {
                        batch
                            .edges
                            .push(EdgeSpec::node(repo_id, &class_id, &base_id, EdgeKind::Inherits));
                    }
                }
            }
        }

        // Imports aggregate per target module.
        let source_module_id = batch.module_ids[&parsed.module_name].clone();
        let mut import_weights: IndexMap<String, i64> = IndexMap::new();
        let mut import_names: IndexMap<String, String> = IndexMap::new();
        for import in &parsed.imports {
            if let Some(target_id) = candidates.resolve_module(&import.module) {
                if target_id != source_module_id {
                    *import_weights.entry(target_id.clone()).or_insert(0) += 1;
                    let target_name = target_id
                        .split_once("::")
                        .map(|(_, name)| name.to_string())
                        .unwrap_or_else(|| import.module.clone());
                    import_names.insert(target_id, target_name);
                }
            }
        }
        for (target_id, weight) in &import_weights {
            let mut edge = EdgeSpec::node(repo_id, &source_module_id, target_id, EdgeKind::Imports);
            edge.weight = *weight;
            batch.edges.push(edge);
            batch.module_imports.push((
                parsed.module_name.clone(),
                import_names[target_id].clone(),
                *weight,
            ));
        }

        // Calls aggregate per (caller, callee) with sensitivity counts.
        let mut call_stats: IndexMap<(String, String), (i64, i64, i64)> = IndexMap::new();
        for call in &parsed.calls {
            let Some(caller_qualified) = &call.caller else {
                continue;
            };
            let caller_id = symbol_node_id(repo_id, &file.path, caller_qualified);
            let owner = caller_qualified
                .split_once('.')
                .map(|(class, _)| class.to_string());
            let Some(callee_id) = candidates.resolve_call(
                &call.callee,
                call.receiver.as_deref(),
                owner.as_deref(),
                &file.path,
            ) else {
                continue;
            };
            let entry = call_stats.entry((caller_id, callee_id)).or_insert((0, 0, 0));
            entry.0 += 1;
            if call.has_args {
                entry.1 += 1;
            }
            if call.uses_return {
                entry.2 += 1;
            }
        }
        for ((caller_id, callee_id), (count, args, returns)) in &call_stats {
            let recursive = caller_id == callee_id;
            let mut edge = EdgeSpec::node(repo_id, caller_id, callee_id, EdgeKind::Calls);
            edge.weight = *count;
            edge.arg_calls = *args;
            edge.return_calls = *returns;
            edge.recursive = recursive;
            batch.edges.push(edge);
        }

        batch
            .chunks
            .extend(chunk_file(parsed, source, repo_id, layer));
    }

    if derive_insights {
        let coupling = analyze_coupling(&batch.module_imports, &batch.module_layers, coupling_threshold);
        for (a, b) in &coupling.circular_pairs {
            if let (Some(a_id), Some(b_id)) = (batch.module_ids.get(a), batch.module_ids.get(b)) {
                batch
                    .edges
                    .push(EdgeSpec::node(repo_id, a_id, b_id, EdgeKind::CircularDependency));
            }
        }
        for (a, b, weight) in &coupling.tight_pairs {
            if let (Some(a_id), Some(b_id)) = (batch.module_ids.get(a), batch.module_ids.get(b)) {
                let mut edge = EdgeSpec::node(repo_id, a_id, b_id, EdgeKind::TightCoupling);
                edge.weight = *weight;
                batch.edges.push(edge);
            }
        }
        for (sequence, sentence) in coupling.insights.iter().enumerate() {
            batch
                .chunks
                .push(insight_chunk(repo_id, sequence as i64, sentence));
        }
    }

    batch
}
