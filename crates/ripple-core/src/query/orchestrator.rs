//! Query orchestration: resolve a question to graph and/or semantic
//! evidence and assemble a structured bundle for the downstream explanation
//! collaborator. No prose is generated here.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::Connection;
use tracing::debug;

use crate::config::EngineConfig;
use crate::embed::{embed_with_retry, Embedder};
use crate::errors::{RippleError, RippleResult};
use crate::models::{
    ChangeType, ChunkFilters, EvidenceBundle, EvidenceItem, Node, Strategy,
};
use crate::query::guards::{truncate_question, DEFAULT_SEARCH_K};
use crate::query::impact::analyze_impact;
use crate::query::intent::classify_intent;
use crate::store::{graph, vector, Database};

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]{2,}").unwrap());

/// Question words that look like identifiers but never name code.
const STOPWORDS: &[&str] = &[
    "who", "what", "when", "where", "which", "does", "the", "this", "that", "calls", "call",
    "callers", "impact", "breaks", "break", "change", "changing", "changed", "delete", "deleting",
    "function", "class", "module", "file", "code", "show", "find", "similar", "pattern", "like",
    "example", "examples", "related", "how", "happens", "would", "with", "from", "into", "about",
];

/// Orchestrates retrieval over the graph store and semantic index.
pub struct QueryOrchestrator {
    db: Arc<Database>,
    config: EngineConfig,
}

impl QueryOrchestrator {
    pub fn new(db: Arc<Database>, config: EngineConfig) -> Self {
        Self { db, config }
    }

    /// Answer a question with structured evidence.
    ///
    /// `strategy` overrides intent classification when given. An empty
    /// semantic index degrades SEMANTIC/HYBRID to structure-only evidence.
    pub fn answer(
        &self,
        question: &str,
        repo_id: &str,
        strategy: Option<Strategy>,
        embedder: &dyn Embedder,
    ) -> RippleResult<EvidenceBundle> {
        let question = truncate_question(question);
        let strategy = strategy.unwrap_or_else(|| classify_intent(&question));
        let conn = self.db.connect()?;

        let mut bundle = EvidenceBundle {
            question: question.clone(),
            strategy,
            subjects: Vec::new(),
            impact: None,
            items: Vec::new(),
            degraded_to_structure: false,
        };

        let mut graph_items: Vec<EvidenceItem> = Vec::new();
        if matches!(strategy, Strategy::Structure | Strategy::Hybrid) {
            self.gather_structure(&conn, repo_id, &question, &mut bundle, &mut graph_items)?;
        }

        let mut semantic_items: Vec<EvidenceItem> = Vec::new();
        if matches!(strategy, Strategy::Semantic | Strategy::Hybrid) {
            match self.gather_semantic(&conn, repo_id, &question, embedder) {
                Ok(items) => semantic_items = items,
                Err(RippleError::EmptyIndex) => {
                    // No evidence is not a fault: fall back to structure.
                    debug!(repo_id, "semantic index empty, degrading to structure");
                    bundle.degraded_to_structure = true;
                    if graph_items.is_empty() {
                        self.gather_structure(
                            &conn,
                            repo_id,
                            &question,
                            &mut bundle,
                            &mut graph_items,
                        )?;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        bundle.items = merge_evidence(graph_items, semantic_items);
        Ok(bundle)
    }

    /// Resolve identifiers from the question against the graph and collect
    /// caller evidence (plus impact analysis for change-risk questions).
    fn gather_structure(
        &self,
        conn: &Connection,
        repo_id: &str,
        question: &str,
        bundle: &mut EvidenceBundle,
        items: &mut Vec<EvidenceItem>,
    ) -> RippleResult<()> {
        let subjects = resolve_subjects(conn, repo_id, question)?;
        let wants_impact = {
            let lowered = question.to_lowercase();
            ["impact", "breaks", "break", "change", "delete", "risk"]
                .iter()
                .any(|k| lowered.contains(k))
        };

        for subject in subjects {
            if !bundle.subjects.contains(&subject.id) {
                bundle.subjects.push(subject.id.clone());
            }
            if wants_impact
                && bundle.impact.is_none()
                && subject.kind == crate::models::NodeKind::Function
            {
                bundle.impact =
                    Some(analyze_impact(conn, &self.config, &subject.id, ChangeType::Behavior)?);
            }
            for caller in graph::find_callers(conn, &subject.id)? {
                items.push(EvidenceItem::Graph {
                    of: subject.id.clone(),
                    id: caller.node.id,
                    name: caller.node.name,
                    file_path: caller.node.file_path,
                    call_count: caller.call_count,
                });
            }
        }
        Ok(())
    }

    fn gather_semantic(
        &self,
        conn: &Connection,
        repo_id: &str,
        question: &str,
        embedder: &dyn Embedder,
    ) -> RippleResult<Vec<EvidenceItem>> {
        let query_vector = embed_with_retry(
            embedder,
            question,
            self.config.embed_max_attempts,
            self.config.embed_backoff_ms,
        )
        .map_err(RippleError::from)?;
        let hits = vector::search(
            conn,
            &query_vector,
            &ChunkFilters::repo(repo_id),
            DEFAULT_SEARCH_K,
        )?;
        Ok(hits
            .into_iter()
            .map(|hit| EvidenceItem::Semantic {
                chunk_id: hit.chunk.id,
                file_path: hit.chunk.file_path,
                symbol: hit.chunk.symbol,
                score: hit.score,
                snippet: snippet(&hit.chunk.text),
            })
            .collect())
    }
}

/// Identifiers mentioned in the question that resolve to graph nodes.
fn resolve_subjects(conn: &Connection, repo_id: &str, question: &str) -> RippleResult<Vec<Node>> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut subjects = Vec::new();
    for m in IDENTIFIER_RE.find_iter(question) {
        let word = m.as_str();
        if STOPWORDS.contains(&word.to_lowercase().as_str()) {
            continue;
        }
        if let Some(node) = graph::resolve_symbol(conn, repo_id, word)? {
            if seen.insert(node.id.clone()) {
                subjects.push(node);
            }
        }
    }
    Ok(subjects)
}

/// Interleave graph and semantic evidence, deduplicating by the underlying
/// file/function identity.
fn merge_evidence(
    graph_items: Vec<EvidenceItem>,
    semantic_items: Vec<EvidenceItem>,
) -> Vec<EvidenceItem> {
    fn dedup_key(item: &EvidenceItem) -> String {
        match item {
            EvidenceItem::Graph { id, .. } => id.clone(),
            EvidenceItem::Semantic {
                file_path, symbol, ..
            } => match symbol {
                Some(symbol) => format!("{file_path}::{symbol}"),
                None => file_path.clone(),
            },
        }
    }

    let mut merged = Vec::with_capacity(graph_items.len() + semantic_items.len());
    let mut seen: HashSet<String> = HashSet::new();
    let mut graph_iter = graph_items.into_iter();
    let mut semantic_iter = semantic_items.into_iter();
    loop {
        let mut exhausted = true;
        for next in [graph_iter.next(), semantic_iter.next()] {
            if let Some(item) = next {
                exhausted = false;
                if seen.insert(dedup_key(&item)) {
                    merged.push(item);
                }
            }
        }
        if exhausted {
            break;
        }
    }
    merged
}

fn snippet(text: &str) -> String {
    const SNIPPET_CHARS: usize = 200;
    match text.char_indices().nth(SNIPPET_CHARS) {
        Some((offset, _)) => format!("{}...", &text[..offset]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::mock::MockEmbedder;
    use crate::indexer::parser::RegexParser;
    use crate::indexer::pipeline::{AnalysisEngine, CancelToken, RepoContext};
    use crate::models::RiskBucket;

    fn indexed_repo() -> (Arc<Database>, RepoContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let write = |path: &str, content: &str| {
            let full = dir.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        };
        write(
            "src/billing.py",
            "def charge_card(amount):\n    return amount\n\ndef checkout():\n    total = charge_card(10)\n    return total\n",
        );
        write(
            "tests/test_billing.py",
            "def test_checkout():\n    assert checkout() == 10\n",
        );

        let db = Arc::new(Database::open_in_memory().unwrap());
        db.init_schema().unwrap();
        let engine = AnalysisEngine::new(
            db.clone(),
            crate::config::EngineConfig {
                embed_backoff_ms: 1,
                ..crate::config::EngineConfig::default()
            },
        );
        let repo = RepoContext::discover(dir.path()).unwrap();
        engine
            .analyze_repository(&repo, &RegexParser, &MockEmbedder::default(), &CancelToken::new())
            .unwrap();
        (db, repo, dir)
    }

    fn orchestrator(db: Arc<Database>) -> QueryOrchestrator {
        QueryOrchestrator::new(
            db,
            crate::config::EngineConfig {
                embed_backoff_ms: 1,
                ..crate::config::EngineConfig::default()
            },
        )
    }

    #[test]
    fn structural_question_finds_callers_and_impact() {
        let (db, repo, _dir) = indexed_repo();
        let orchestrator = orchestrator(db);
        let bundle = orchestrator
            .answer(
                "what breaks if I change charge_card?",
                &repo.repo_id,
                None,
                &MockEmbedder::default(),
            )
            .unwrap();

        assert_eq!(bundle.strategy, Strategy::Structure);
        assert!(!bundle.subjects.is_empty());
        let impact = bundle.impact.as_ref().expect("impact requested");
        assert_eq!(impact.target_name, "charge_card");
        assert_eq!(impact.risk, RiskBucket::Low);
        assert!(bundle
            .items
            .iter()
            .any(|i| matches!(i, EvidenceItem::Graph { name, .. } if name == "checkout")));
    }

    #[test]
    fn hybrid_question_merges_and_dedups() {
        let (db, repo, _dir) = indexed_repo();
        let orchestrator = orchestrator(db);
        let bundle = orchestrator
            .answer(
                "tell me about checkout totals",
                &repo.repo_id,
                None,
                &MockEmbedder::default(),
            )
            .unwrap();
        assert_eq!(bundle.strategy, Strategy::Hybrid);
        assert!(!bundle.items.is_empty());

        let mut keys: Vec<String> = Vec::new();
        for item in &bundle.items {
            let key = match item {
                EvidenceItem::Graph { id, .. } => id.clone(),
                EvidenceItem::Semantic { chunk_id, .. } => chunk_id.clone(),
            };
            assert!(!keys.contains(&key), "duplicate evidence: {key}");
            keys.push(key);
        }
    }

    #[test]
    fn empty_index_degrades_semantic_to_structure() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.init_schema().unwrap();
        // Graph has a node, index has nothing.
        let conn = db.connect().unwrap();
        let node = crate::models::Node {
            id: "r1::src/a.py::alpha_fn".to_string(),
            repo_id: "r1".to_string(),
            kind: crate::models::NodeKind::Function,
            name: "alpha_fn".to_string(),
            language: "python".to_string(),
            file_path: "src/a.py".to_string(),
            start_line: 1,
            end_line: 2,
            layer: crate::models::Layer::Unknown,
            metrics: serde_json::Value::Null,
            content_hash: "h".to_string(),
        };
        graph::upsert_node(&conn, &node).unwrap();

        let orchestrator = orchestrator(db);
        let bundle = orchestrator
            .answer(
                "anything similar to alpha_fn",
                "r1",
                Some(Strategy::Semantic),
                &MockEmbedder::default(),
            )
            .unwrap();
        assert!(bundle.degraded_to_structure);
        assert_eq!(bundle.subjects, vec!["r1::src/a.py::alpha_fn".to_string()]);
    }

    #[test]
    fn unresolvable_question_yields_empty_not_error() {
        let (db, repo, _dir) = indexed_repo();
        let orchestrator = orchestrator(db);
        let bundle = orchestrator
            .answer(
                "who calls nonexistent_thing?",
                &repo.repo_id,
                None,
                &MockEmbedder::default(),
            )
            .unwrap();
        assert!(bundle.subjects.is_empty());
        assert!(bundle.items.is_empty());
        assert!(bundle.impact.is_none());
    }
}
