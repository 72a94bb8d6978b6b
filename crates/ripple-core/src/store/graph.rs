//! Graph store operations: node/edge upserts, caller queries, bounded
//! traversals, cycle detection, and cascade deletion.
//!
//! Free functions take a `&Connection` so a batch can run inside one
//! transaction; the `Database` methods are one-shot wrappers that open their
//! own connection.

use std::collections::{HashMap, HashSet, VecDeque};

use rusqlite::{params, Connection};

use crate::errors::{RippleError, RippleResult};
use crate::models::{
    CallChain, CallChainNode, Caller, Cycle, EdgeKind, EdgeSpec, EdgeTarget, Node, NodeKind,
    RepoStats,
};
use crate::query::guards::MAX_GRAPH_VISITED;
use crate::store::Database;

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const NODE_COLUMNS: &str =
    "id, repo_id, kind, name, language, file_path, start_line, end_line, layer, metrics, content_hash";

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    let kind_raw: String = row.get(2)?;
    let layer_raw: String = row.get(8)?;
    let metrics_raw: Option<String> = row.get(9)?;
    Ok(Node {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        kind: NodeKind::parse(&kind_raw).unwrap_or(NodeKind::Function),
        name: row.get(3)?,
        language: row.get(4)?,
        file_path: row.get(5)?,
        start_line: row.get(6)?,
        end_line: row.get(7)?,
        layer: crate::models::Layer::parse(&layer_raw),
        metrics: metrics_raw
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or(serde_json::Value::Null),
        content_hash: row.get(10)?,
    })
}

// ---------------------------------------------------------------------------
// Repository and file bookkeeping
// ---------------------------------------------------------------------------

pub fn upsert_repo(conn: &Connection, repo_id: &str, root_path: &str) -> RippleResult<()> {
    conn.execute(
        "INSERT INTO repos(repo_id, root_path) VALUES(?1, ?2) \
         ON CONFLICT(repo_id) DO UPDATE SET \
             root_path = excluded.root_path, \
             last_analyzed = CURRENT_TIMESTAMP;",
        params![repo_id, root_path],
    )?;
    Ok(())
}

pub fn upsert_file(
    conn: &Connection,
    repo_id: &str,
    path: &str,
    language: &str,
    content_hash: &str,
) -> RippleResult<()> {
    conn.execute(
        "INSERT INTO files(repo_id, path, language, content_hash) VALUES(?1, ?2, ?3, ?4) \
         ON CONFLICT(repo_id, path) DO UPDATE SET \
             language = excluded.language, \
             content_hash = excluded.content_hash, \
             last_indexed_at = CURRENT_TIMESTAMP;",
        params![repo_id, path, language, content_hash],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Node operations
// ---------------------------------------------------------------------------

/// Insert or update a node by identifier. Re-upserting an unchanged node
/// refreshes its `last_analyzed` timestamp without duplicating it.
pub fn upsert_node(conn: &Connection, node: &Node) -> RippleResult<()> {
    if node.id.trim().is_empty() {
        return Err(RippleError::Validation("node id must not be empty".into()));
    }
    if node.name.trim().is_empty() {
        return Err(RippleError::Validation(format!(
            "node {} has an empty name",
            node.id
        )));
    }
    if node.language.trim().is_empty() {
        return Err(RippleError::Validation(format!(
            "node {} has an empty language",
            node.id
        )));
    }
    let metrics = if node.metrics.is_null() {
        None
    } else {
        Some(serde_json::to_string(&node.metrics)?)
    };
    conn.execute(
        "INSERT INTO nodes (id, repo_id, kind, name, language, file_path, start_line, end_line, \
                            layer, metrics, content_hash) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
         ON CONFLICT(id) DO UPDATE SET \
             kind = excluded.kind, \
             name = excluded.name, \
             language = excluded.language, \
             file_path = excluded.file_path, \
             start_line = excluded.start_line, \
             end_line = excluded.end_line, \
             layer = excluded.layer, \
             metrics = excluded.metrics, \
             content_hash = excluded.content_hash, \
             last_analyzed = CURRENT_TIMESTAMP;",
        params![
            node.id,
            node.repo_id,
            node.kind.as_str(),
            node.name,
            node.language,
            node.file_path,
            node.start_line,
            node.end_line,
            node.layer.as_str(),
            metrics,
            node.content_hash,
        ],
    )?;
    Ok(())
}

/// Refresh `last_analyzed` on every node owned by a file whose content is
/// unchanged.
pub fn touch_file_nodes(conn: &Connection, repo_id: &str, path: &str) -> RippleResult<()> {
    conn.execute(
        "UPDATE nodes SET last_analyzed = CURRENT_TIMESTAMP \
         WHERE repo_id = ?1 AND file_path = ?2;",
        params![repo_id, path],
    )?;
    Ok(())
}

pub fn node_exists(conn: &Connection, node_id: &str) -> RippleResult<bool> {
    let result: Result<i64, _> = conn.query_row(
        "SELECT 1 FROM nodes WHERE id = ?1 LIMIT 1;",
        params![node_id],
        |row| row.get(0),
    );
    match result {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub fn get_node(conn: &Connection, node_id: &str) -> RippleResult<Option<Node>> {
    let sql = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1;");
    let result = conn.query_row(&sql, params![node_id], row_to_node);
    match result {
        Ok(node) => Ok(Some(node)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Resolve a display name or full identifier to a node.
///
/// Exact id match wins; otherwise the name match with functions preferred
/// over classes, ties broken by identifier for determinism.
pub fn resolve_symbol(conn: &Connection, repo_id: &str, name: &str) -> RippleResult<Option<Node>> {
    if let Some(node) = get_node(conn, name)? {
        return Ok(Some(node));
    }
    let sql = format!(
        "SELECT {NODE_COLUMNS} FROM nodes \
         WHERE repo_id = ?1 AND name = ?2 AND kind IN ('function', 'class') \
         ORDER BY CASE kind WHEN 'function' THEN 0 ELSE 1 END, id ASC LIMIT 1;"
    );
    let result = conn.query_row(&sql, params![repo_id, name], row_to_node);
    match result {
        Ok(node) => Ok(Some(node)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Edge operations
// ---------------------------------------------------------------------------

/// Insert or update an edge. Endpoints must exist (`DanglingReferenceError`
/// otherwise); a `CALLS`/`IMPORTS` self-edge is rejected unless it carries
/// the explicit recursion tag.
pub fn upsert_edge(conn: &Connection, edge: &EdgeSpec) -> RippleResult<()> {
    if edge.source_id.trim().is_empty() {
        return Err(RippleError::Validation("edge source must not be empty".into()));
    }
    let (target_id, target_type) = match &edge.target {
        EdgeTarget::Node(id) => (id.clone(), "node"),
        EdgeTarget::Layer(layer) => (layer.as_str().to_string(), "layer"),
    };
    if matches!(edge.kind, EdgeKind::Calls | EdgeKind::Imports)
        && target_type == "node"
        && target_id == edge.source_id
        && !edge.recursive
    {
        return Err(RippleError::Validation(format!(
            "self {} edge on {} without recursion tag",
            edge.kind.as_str(),
            edge.source_id
        )));
    }
    if !node_exists(conn, &edge.source_id)? {
        return Err(RippleError::DanglingReference {
            from: edge.source_id.clone(),
            to: target_id,
        });
    }
    if target_type == "node" && !node_exists(conn, &target_id)? {
        return Err(RippleError::DanglingReference {
            from: edge.source_id.clone(),
            to: target_id,
        });
    }
    conn.execute(
        "INSERT INTO edges (repo_id, source_id, target_id, target_type, relationship, weight, \
                            arg_calls, return_calls, recursive) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
         ON CONFLICT(source_id, target_id, target_type, relationship) DO UPDATE SET \
             weight = excluded.weight, \
             arg_calls = excluded.arg_calls, \
             return_calls = excluded.return_calls, \
             recursive = excluded.recursive;",
        params![
            edge.repo_id,
            edge.source_id,
            target_id,
            target_type,
            edge.kind.as_str(),
            edge.weight,
            edge.arg_calls,
            edge.return_calls,
            edge.recursive as i64,
        ],
    )?;
    Ok(())
}

/// All nodes with an outgoing `CALLS` edge to `function_id`, ordered by
/// descending call count, ties broken by node identifier.
pub fn find_callers(conn: &Connection, function_id: &str) -> RippleResult<Vec<Caller>> {
    let sql = "SELECT n.id, n.repo_id, n.kind, n.name, n.language, n.file_path, n.start_line, \
                      n.end_line, n.layer, n.metrics, n.content_hash, \
                      e.weight, e.arg_calls, e.return_calls \
               FROM edges e JOIN nodes n ON n.id = e.source_id \
               WHERE e.relationship = 'CALLS' AND e.target_type = 'node' AND e.target_id = ?1 \
               ORDER BY e.weight DESC, n.id ASC;";
    let mut stmt = conn.prepare(sql)?;
    let callers = stmt
        .query_map(params![function_id], |row| {
            Ok(Caller {
                node: row_to_node(row)?,
                call_count: row.get(11)?,
                arg_calls: row.get(12)?,
                return_calls: row.get(13)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(callers)
}

// ---------------------------------------------------------------------------
// Bounded traversals
// ---------------------------------------------------------------------------

struct ArenaEntry {
    id: String,
    name: String,
    depth: i64,
    children: Vec<usize>,
    /// Identifiers on the path from the root to this entry, inclusive.
    path: HashSet<String>,
}

/// Breadth-first expansion of outgoing `CALLS` edges up to `max_depth` hops.
///
/// Cycles terminate via per-path visited sets and do not count as
/// truncation; `truncated` is set only when the depth limit or the visited
/// budget left real edges unexpanded.
pub fn trace_call_chain(
    conn: &Connection,
    function_id: &str,
    max_depth: i64,
) -> RippleResult<CallChain> {
    let root = get_node(conn, function_id)?
        .ok_or_else(|| RippleError::Query(format!("node not found: {function_id}")))?;

    let mut arena: Vec<ArenaEntry> = Vec::new();
    let mut root_path = HashSet::new();
    root_path.insert(root.id.clone());
    arena.push(ArenaEntry {
        id: root.id.clone(),
        name: root.name.clone(),
        depth: 0,
        children: Vec::new(),
        path: root_path,
    });

    let sql = "SELECT e.target_id, n.name FROM edges e JOIN nodes n ON n.id = e.target_id \
               WHERE e.relationship = 'CALLS' AND e.target_type = 'node' AND e.source_id = ?1 \
               ORDER BY e.weight DESC, n.id ASC;";
    let mut stmt = conn.prepare(sql)?;

    let mut queue: VecDeque<usize> = VecDeque::new();
    queue.push_back(0);
    let mut truncated = false;

    'outer: while let Some(index) = queue.pop_front() {
        let (current_id, depth, path) = {
            let entry = &arena[index];
            (entry.id.clone(), entry.depth, entry.path.clone())
        };
        let callees: Vec<(String, String)> = stmt
            .query_map(params![current_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        for (callee_id, callee_name) in callees {
            if path.contains(&callee_id) {
                // Cycle back-edge: terminate this path silently.
                continue;
            }
            if depth + 1 > max_depth {
                truncated = true;
                continue;
            }
            if arena.len() as i64 >= MAX_GRAPH_VISITED {
                truncated = true;
                break 'outer;
            }
            let mut child_path = path.clone();
            child_path.insert(callee_id.clone());
            arena.push(ArenaEntry {
                id: callee_id,
                name: callee_name,
                depth: depth + 1,
                children: Vec::new(),
                path: child_path,
            });
            let child_index = arena.len() - 1;
            arena[index].children.push(child_index);
            queue.push_back(child_index);
        }
    }

    fn build(arena: &[ArenaEntry], index: usize) -> CallChainNode {
        let entry = &arena[index];
        CallChainNode {
            id: entry.id.clone(),
            name: entry.name.clone(),
            depth: entry.depth,
            children: entry.children.iter().map(|&c| build(arena, c)).collect(),
        }
    }

    Ok(CallChain {
        root: build(&arena, 0),
        truncated,
    })
}

/// Reverse breadth-first walk over incoming `CALLS` edges: callers, callers
/// of callers, and so on up to `max_depth`.
///
/// Returns `(callers-with-depth, truncated)`; truncation signals a depth or
/// budget cutoff, never an error.
pub fn trace_callers(
    conn: &Connection,
    function_id: &str,
    max_depth: i64,
) -> RippleResult<(Vec<(String, i64)>, bool)> {
    let sql = "SELECT e.source_id FROM edges e JOIN nodes n ON n.id = e.source_id \
               WHERE e.relationship = 'CALLS' AND e.target_type = 'node' AND e.target_id = ?1 \
               ORDER BY e.weight DESC, n.id ASC;";
    let mut stmt = conn.prepare(sql)?;

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(function_id.to_string());
    let mut queue: VecDeque<(String, i64)> = VecDeque::new();
    queue.push_back((function_id.to_string(), 0));
    let mut out: Vec<(String, i64)> = Vec::new();
    let mut truncated = false;

    'outer: while let Some((current, depth)) = queue.pop_front() {
        let sources: Vec<String> = stmt
            .query_map(params![current], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        for source in sources {
            if visited.contains(&source) {
                continue;
            }
            if depth + 1 > max_depth {
                truncated = true;
                continue;
            }
            if visited.len() as i64 >= MAX_GRAPH_VISITED {
                truncated = true;
                break 'outer;
            }
            visited.insert(source.clone());
            out.push((source.clone(), depth + 1));
            queue.push_back((source, depth + 1));
        }
    }

    Ok((out, truncated))
}

// ---------------------------------------------------------------------------
// Cycle detection (Tarjan strongly-connected components)
// ---------------------------------------------------------------------------

/// Run cycle detection separately over the `IMPORTS` and `CALLS` subgraphs.
///
/// Each cycle is reported with its members lexicographically ordered; cycles
/// sort by their first member, so output is deterministic for a fixed graph.
pub fn detect_circular_dependencies(conn: &Connection, repo_id: &str) -> RippleResult<Vec<Cycle>> {
    let mut cycles = Vec::new();
    for relationship in [EdgeKind::Imports, EdgeKind::Calls] {
        let mut stmt = conn.prepare(
            "SELECT source_id, target_id FROM edges \
             WHERE repo_id = ?1 AND relationship = ?2 AND target_type = 'node' \
             ORDER BY source_id, target_id;",
        )?;
        let edges: Vec<(String, String)> = stmt
            .query_map(params![repo_id, relationship.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let mut node_set: Vec<String> = edges
            .iter()
            .flat_map(|(s, t)| [s.clone(), t.clone()])
            .collect();
        node_set.sort();
        node_set.dedup();

        let index_of: HashMap<&str, usize> = node_set
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); node_set.len()];
        let mut self_loops: HashSet<usize> = HashSet::new();
        for (source, target) in &edges {
            let s = index_of[source.as_str()];
            let t = index_of[target.as_str()];
            if s == t {
                self_loops.insert(s);
            }
            adjacency[s].push(t);
        }

        for component in tarjan_scc(&adjacency) {
            let is_cycle = component.len() > 1
                || (component.len() == 1 && self_loops.contains(&component[0]));
            if !is_cycle {
                continue;
            }
            let mut members: Vec<String> =
                component.iter().map(|&i| node_set[i].clone()).collect();
            members.sort();
            cycles.push(Cycle {
                relationship,
                members,
            });
        }
    }
    cycles.sort_by(|a, b| {
        (a.relationship.as_str(), a.members.first())
            .cmp(&(b.relationship.as_str(), b.members.first()))
    });
    Ok(cycles)
}

/// Iterative Tarjan SCC over an index-based adjacency list.
fn tarjan_scc(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut index: Vec<Option<usize>> = vec![None; n];
    let mut lowlink: Vec<usize> = vec![0; n];
    let mut on_stack: Vec<bool> = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut components: Vec<Vec<usize>> = Vec::new();

    for start in 0..n {
        if index[start].is_some() {
            continue;
        }
        // (vertex, position in its adjacency list)
        let mut call_stack: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some(&(v, position)) = call_stack.last() {
            if position == 0 {
                index[v] = Some(next_index);
                lowlink[v] = next_index;
                next_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }
            if position < adjacency[v].len() {
                if let Some(frame) = call_stack.last_mut() {
                    frame.1 += 1;
                }
                let w = adjacency[v][position];
                if index[w].is_none() {
                    call_stack.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w].unwrap_or(0));
                }
            } else {
                call_stack.pop();
                if let Some(&(parent, _)) = call_stack.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if Some(lowlink[v]) == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    components.push(component);
                }
            }
        }
    }
    components
}

// ---------------------------------------------------------------------------
// Cascade deletion
// ---------------------------------------------------------------------------

/// Remove everything a repository owns: chunks, edges, nodes, files, the
/// retry queue, and the repository row itself.
pub fn delete_repository(conn: &Connection, repo_id: &str) -> RippleResult<()> {
    conn.execute("DELETE FROM chunks WHERE repo_id = ?1;", params![repo_id])?;
    conn.execute("DELETE FROM edges WHERE repo_id = ?1;", params![repo_id])?;
    conn.execute("DELETE FROM nodes WHERE repo_id = ?1;", params![repo_id])?;
    conn.execute("DELETE FROM files WHERE repo_id = ?1;", params![repo_id])?;
    conn.execute("DELETE FROM embed_queue WHERE repo_id = ?1;", params![repo_id])?;
    conn.execute("DELETE FROM repos WHERE repo_id = ?1;", params![repo_id])?;
    Ok(())
}

/// Remove a deleted source file's nodes, their edges, and its chunks.
pub fn delete_file_entities(conn: &Connection, repo_id: &str, path: &str) -> RippleResult<()> {
    conn.execute(
        "DELETE FROM edges WHERE repo_id = ?1 AND (\
             source_id IN (SELECT id FROM nodes WHERE repo_id = ?1 AND file_path = ?2) OR \
             (target_type = 'node' AND target_id IN \
                 (SELECT id FROM nodes WHERE repo_id = ?1 AND file_path = ?2)));",
        params![repo_id, path],
    )?;
    conn.execute(
        "DELETE FROM nodes WHERE repo_id = ?1 AND file_path = ?2;",
        params![repo_id, path],
    )?;
    conn.execute(
        "DELETE FROM chunks WHERE repo_id = ?1 AND file_path = ?2;",
        params![repo_id, path],
    )?;
    conn.execute(
        "DELETE FROM files WHERE repo_id = ?1 AND path = ?2;",
        params![repo_id, path],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

/// Render the repository's call graph as mermaid `graph TD` text.
pub fn render_call_graph_mermaid(
    conn: &Connection,
    repo_id: &str,
    limit: i64,
) -> RippleResult<String> {
    fn sanitize(name: &str) -> String {
        name.chars()
            .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
            .collect()
    }

    let mut stmt = conn.prepare(
        "SELECT s.name, t.name FROM edges e \
         JOIN nodes s ON s.id = e.source_id \
         JOIN nodes t ON t.id = e.target_id \
         WHERE e.repo_id = ?1 AND e.relationship = 'CALLS' AND e.target_type = 'node' \
         ORDER BY s.id, t.id LIMIT ?2;",
    )?;
    let pairs: Vec<(String, String)> = stmt
        .query_map(params![repo_id, limit], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .filter_map(|r| r.ok())
        .collect();

    let mut lines = vec!["graph TD".to_string()];
    for (source, target) in pairs {
        lines.push(format!("    {} --> {}", sanitize(&source), sanitize(&target)));
    }
    Ok(lines.join("\n"))
}

/// Count summary for a repository.
pub fn repository_stats(conn: &Connection, repo_id: &str) -> RippleResult<RepoStats> {
    let mut stats = RepoStats::default();
    let mut stmt =
        conn.prepare("SELECT kind, COUNT(*) FROM nodes WHERE repo_id = ?1 GROUP BY kind;")?;
    let counts: Vec<(String, i64)> = stmt
        .query_map(params![repo_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();
    for (kind, count) in counts {
        match kind.as_str() {
            "file" => stats.files = count,
            "module" => stats.modules = count,
            "class" => stats.classes = count,
            "function" => stats.functions = count,
            _ => {}
        }
    }
    stats.total_loc = conn.query_row(
        "SELECT COALESCE(SUM(end_line - start_line + 1), 0) FROM nodes \
         WHERE repo_id = ?1 AND kind = 'file';",
        params![repo_id],
        |row| row.get(0),
    )?;
    let mut layer_stmt = conn.prepare(
        "SELECT layer, COUNT(*) FROM nodes WHERE repo_id = ?1 AND kind = 'file' \
         GROUP BY layer ORDER BY layer;",
    )?;
    stats.nodes_by_layer = layer_stmt
        .query_map(params![repo_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(stats)
}

// ---------------------------------------------------------------------------
// One-shot Database wrappers
// ---------------------------------------------------------------------------

impl Database {
    pub fn upsert_node(&self, node: &Node) -> RippleResult<()> {
        upsert_node(&self.connect()?, node)
    }

    pub fn upsert_edge(&self, edge: &EdgeSpec) -> RippleResult<()> {
        upsert_edge(&self.connect()?, edge)
    }

    pub fn find_callers(&self, function_id: &str) -> RippleResult<Vec<Caller>> {
        find_callers(&self.connect()?, function_id)
    }

    pub fn trace_call_chain(&self, function_id: &str, max_depth: i64) -> RippleResult<CallChain> {
        trace_call_chain(&self.connect()?, function_id, max_depth)
    }

    pub fn detect_circular_dependencies(&self, repo_id: &str) -> RippleResult<Vec<Cycle>> {
        detect_circular_dependencies(&self.connect()?, repo_id)
    }

    pub fn delete_repository(&self, repo_id: &str) -> RippleResult<()> {
        delete_repository(&self.connect()?, repo_id)
    }

    pub fn render_call_graph_mermaid(&self, repo_id: &str, limit: i64) -> RippleResult<String> {
        let limit = crate::query::guards::clamp_int(limit, 1, crate::query::guards::MAX_MERMAID_EDGES);
        render_call_graph_mermaid(&self.connect()?, repo_id, limit)
    }

    pub fn repository_stats(&self, repo_id: &str) -> RippleResult<RepoStats> {
        repository_stats(&self.connect()?, repo_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{symbol_node_id, Layer};

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init_schema().unwrap();
        db
    }

    fn function_node(repo: &str, name: &str) -> Node {
        Node {
            id: symbol_node_id(repo, "src/lib.py", name),
            repo_id: repo.to_string(),
            kind: NodeKind::Function,
            name: name.to_string(),
            language: "python".to_string(),
            file_path: "src/lib.py".to_string(),
            start_line: 1,
            end_line: 5,
            layer: Layer::Unknown,
            metrics: serde_json::Value::Null,
            content_hash: "abc".to_string(),
        }
    }

    fn calls(repo: &str, from: &Node, to: &Node, weight: i64) -> EdgeSpec {
        let mut edge = EdgeSpec::node(repo, &from.id, &to.id, EdgeKind::Calls);
        edge.weight = weight;
        edge
    }

    #[test]
    fn upsert_node_rejects_missing_attributes() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let mut node = function_node("r1", "f");
        node.language = String::new();
        let err = upsert_node(&conn, &node).unwrap_err();
        assert!(matches!(err, RippleError::Validation(_)));
    }

    #[test]
    fn upsert_node_is_idempotent() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let node = function_node("r1", "f");
        upsert_node(&conn, &node).unwrap();
        upsert_node(&conn, &node).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM nodes;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn upsert_edge_rejects_dangling_endpoints() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let a = function_node("r1", "a");
        upsert_node(&conn, &a).unwrap();
        let edge = EdgeSpec::node("r1", &a.id, "r1::src/lib.py::ghost", EdgeKind::Calls);
        let err = upsert_edge(&conn, &edge).unwrap_err();
        assert!(matches!(err, RippleError::DanglingReference { .. }));
    }

    #[test]
    fn self_edge_requires_recursion_tag() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let a = function_node("r1", "a");
        upsert_node(&conn, &a).unwrap();

        let plain = EdgeSpec::node("r1", &a.id, &a.id, EdgeKind::Calls);
        assert!(matches!(
            upsert_edge(&conn, &plain).unwrap_err(),
            RippleError::Validation(_)
        ));

        let mut tagged = EdgeSpec::node("r1", &a.id, &a.id, EdgeKind::Calls);
        tagged.recursive = true;
        upsert_edge(&conn, &tagged).unwrap();
    }

    #[test]
    fn find_callers_orders_by_weight_then_id() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let target = function_node("r1", "target");
        let x = function_node("r1", "x_caller");
        let y = function_node("r1", "y_caller");
        let z = function_node("r1", "z_caller");
        for node in [&target, &x, &y, &z] {
            upsert_node(&conn, node).unwrap();
        }
        upsert_edge(&conn, &calls("r1", &x, &target, 5)).unwrap();
        upsert_edge(&conn, &calls("r1", &y, &target, 5)).unwrap();
        upsert_edge(&conn, &calls("r1", &z, &target, 1)).unwrap();

        let callers = find_callers(&conn, &target.id).unwrap();
        let names: Vec<&str> = callers.iter().map(|c| c.node.name.as_str()).collect();
        assert_eq!(names, vec!["x_caller", "y_caller", "z_caller"]);
    }

    #[test]
    fn trace_call_chain_terminates_on_mutual_recursion() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let f = function_node("r1", "f");
        let g = function_node("r1", "g");
        upsert_node(&conn, &f).unwrap();
        upsert_node(&conn, &g).unwrap();
        upsert_edge(&conn, &calls("r1", &f, &g, 1)).unwrap();
        upsert_edge(&conn, &calls("r1", &g, &f, 1)).unwrap();

        let chain = trace_call_chain(&conn, &f.id, 3).unwrap();
        assert!(!chain.truncated);
        assert_eq!(chain.root.children.len(), 1);
        assert_eq!(chain.root.children[0].name, "g");
        // g's only callee is f, which is on the path: the branch ends there.
        assert!(chain.root.children[0].children.is_empty());
    }

    #[test]
    fn trace_call_chain_terminates_on_direct_recursion() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let f = function_node("r1", "f");
        upsert_node(&conn, &f).unwrap();
        let mut edge = calls("r1", &f, &f, 2);
        edge.recursive = true;
        upsert_edge(&conn, &edge).unwrap();

        let chain = trace_call_chain(&conn, &f.id, 4).unwrap();
        assert!(!chain.truncated);
        assert!(chain.root.children.is_empty());
    }

    #[test]
    fn trace_call_chain_flags_depth_truncation() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let names = ["c1", "c2", "c3", "c4"];
        let nodes: Vec<Node> = names.iter().map(|n| function_node("r1", n)).collect();
        for node in &nodes {
            upsert_node(&conn, node).unwrap();
        }
        for pair in nodes.windows(2) {
            upsert_edge(&conn, &calls("r1", &pair[0], &pair[1], 1)).unwrap();
        }
        let chain = trace_call_chain(&conn, &nodes[0].id, 2).unwrap();
        assert!(chain.truncated);
        let deep = trace_call_chain(&conn, &nodes[0].id, 5).unwrap();
        assert!(!deep.truncated);
    }

    #[test]
    fn detects_import_cycle_and_ignores_dag() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let mk_module = |name: &str| Node {
            id: format!("r1::{name}"),
            kind: NodeKind::Module,
            ..function_node("r1", name)
        };
        let a = mk_module("mod_a");
        let b = mk_module("mod_b");
        let c = mk_module("mod_c");
        let d = mk_module("mod_d");
        for node in [&a, &b, &c, &d] {
            upsert_node(&conn, node).unwrap();
        }
        for (from, to) in [(&a, &b), (&b, &c), (&c, &a)] {
            upsert_edge(&conn, &EdgeSpec::node("r1", &from.id, &to.id, EdgeKind::Imports)).unwrap();
        }
        // d -> a is a DAG edge; it must not produce a cycle.
        upsert_edge(&conn, &EdgeSpec::node("r1", &d.id, &a.id, EdgeKind::Imports)).unwrap();

        let cycles = detect_circular_dependencies(&conn, "r1").unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].relationship, EdgeKind::Imports);
        assert_eq!(
            cycles[0].members,
            vec!["r1::mod_a".to_string(), "r1::mod_b".to_string(), "r1::mod_c".to_string()]
        );
    }

    #[test]
    fn pure_dag_has_no_cycles() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let a = function_node("r1", "a");
        let b = function_node("r1", "b");
        upsert_node(&conn, &a).unwrap();
        upsert_node(&conn, &b).unwrap();
        upsert_edge(&conn, &calls("r1", &a, &b, 1)).unwrap();
        assert!(detect_circular_dependencies(&conn, "r1").unwrap().is_empty());
    }

    #[test]
    fn delete_repository_cascades() {
        let db = test_db();
        let conn = db.connect().unwrap();
        upsert_repo(&conn, "r1", "/tmp/r1").unwrap();
        let a = function_node("r1", "a");
        let b = function_node("r1", "b");
        upsert_node(&conn, &a).unwrap();
        upsert_node(&conn, &b).unwrap();
        upsert_edge(&conn, &calls("r1", &a, &b, 1)).unwrap();

        delete_repository(&conn, "r1").unwrap();
        let nodes: i64 = conn
            .query_row("SELECT COUNT(*) FROM nodes WHERE repo_id = 'r1';", [], |r| r.get(0))
            .unwrap();
        let edges: i64 = conn
            .query_row("SELECT COUNT(*) FROM edges WHERE repo_id = 'r1';", [], |r| r.get(0))
            .unwrap();
        assert_eq!((nodes, edges), (0, 0));
        // Querying afterwards yields empty results, not errors.
        assert!(find_callers(&conn, &b.id).unwrap().is_empty());
    }

    #[test]
    fn mermaid_rendering_sanitizes_names() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let a = function_node("r1", "Greeter.greet");
        let b = function_node("r1", "format_name");
        upsert_node(&conn, &a).unwrap();
        upsert_node(&conn, &b).unwrap();
        upsert_edge(&conn, &calls("r1", &a, &b, 1)).unwrap();

        let mermaid = render_call_graph_mermaid(&conn, "r1", 100).unwrap();
        assert!(mermaid.starts_with("graph TD"));
        assert!(mermaid.contains("Greeter_greet --> format_name"));
    }

    #[test]
    fn repository_stats_counts_by_kind() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let mut file = function_node("r1", "lib.py");
        file.id = "r1::src/lib.py".to_string();
        file.kind = NodeKind::File;
        file.start_line = 1;
        file.end_line = 40;
        upsert_node(&conn, &file).unwrap();
        upsert_node(&conn, &function_node("r1", "f1")).unwrap();
        upsert_node(&conn, &function_node("r1", "f2")).unwrap();

        let stats = repository_stats(&conn, "r1").unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.functions, 2);
        assert_eq!(stats.total_loc, 40);
    }

    #[test]
    fn resolve_symbol_prefers_exact_id_then_name() {
        let db = test_db();
        let conn = db.connect().unwrap();
        let f = function_node("r1", "handler");
        upsert_node(&conn, &f).unwrap();
        assert_eq!(resolve_symbol(&conn, "r1", &f.id).unwrap().unwrap().id, f.id);
        assert_eq!(resolve_symbol(&conn, "r1", "handler").unwrap().unwrap().id, f.id);
        assert!(resolve_symbol(&conn, "r1", "missing").unwrap().is_none());
    }
}
