//! Shared typed models used across the indexing, storage, and query layers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Identifier helpers
// ---------------------------------------------------------------------------

/// Derive a short repository identifier (first 16 hex chars of SHA-256) from a
/// canonical root path.
pub fn repo_id_from_path(canonical_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_path.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Node identifier of a file: `repo_id::path`.
pub fn file_node_id(repo_id: &str, path: &str) -> String {
    format!("{repo_id}::{path}")
}

/// Node identifier of a module: `repo_id::dotted.module.name`.
pub fn module_node_id(repo_id: &str, module_name: &str) -> String {
    format!("{repo_id}::{module_name}")
}

/// Node identifier of a class or function: `repo_id::path::qualified_name`.
///
/// Derived from content-stable parts only (never line numbers), so that
/// re-analysis of unchanged code maps to the same identifier.
pub fn symbol_node_id(repo_id: &str, path: &str, qualified_name: &str) -> String {
    format!("{repo_id}::{path}::{qualified_name}")
}

/// Chunk identifier: `repo_id::path::start-end::kind`.
pub fn chunk_id(repo_id: &str, path: &str, byte_start: i64, byte_end: i64, kind: ChunkKind) -> String {
    format!("{repo_id}::{path}::{byte_start}-{byte_end}::{}", kind.as_str())
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Graph entity kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Module,
    Class,
    Function,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Module => "module",
            NodeKind::Class => "class",
            NodeKind::Function => "function",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "file" => Some(NodeKind::File),
            "module" => Some(NodeKind::Module),
            "class" => Some(NodeKind::Class),
            "function" => Some(NodeKind::Function),
            _ => None,
        }
    }
}

/// Architectural layer label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Api,
    Core,
    Data,
    Unknown,
}

impl Layer {
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Api => "api",
            Layer::Core => "core",
            Layer::Data => "data",
            Layer::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "api" => Layer::Api,
            "core" => Layer::Core,
            "data" => Layer::Data,
            _ => Layer::Unknown,
        }
    }

    /// Rank in the dependency order: `api` sits on top of `core`, which sits
    /// on top of `data`. A dependency from a higher rank to a lower rank is a
    /// layering violation.
    pub fn rank(self) -> Option<u8> {
        match self {
            Layer::Api => Some(0),
            Layer::Core => Some(1),
            Layer::Data => Some(2),
            Layer::Unknown => None,
        }
    }
}

/// Typed edge relationship.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    Contains,
    Calls,
    Imports,
    Inherits,
    InLayer,
    CircularDependency,
    TightCoupling,
}

impl EdgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Contains => "CONTAINS",
            EdgeKind::Calls => "CALLS",
            EdgeKind::Imports => "IMPORTS",
            EdgeKind::Inherits => "INHERITS",
            EdgeKind::InLayer => "IN_LAYER",
            EdgeKind::CircularDependency => "CIRCULAR_DEPENDENCY",
            EdgeKind::TightCoupling => "TIGHT_COUPLING",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CONTAINS" => Some(EdgeKind::Contains),
            "CALLS" => Some(EdgeKind::Calls),
            "IMPORTS" => Some(EdgeKind::Imports),
            "INHERITS" => Some(EdgeKind::Inherits),
            "IN_LAYER" => Some(EdgeKind::InLayer),
            "CIRCULAR_DEPENDENCY" => Some(EdgeKind::CircularDependency),
            "TIGHT_COUPLING" => Some(EdgeKind::TightCoupling),
            _ => None,
        }
    }
}

/// Semantic chunk kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Implementation,
    Docstring,
    Test,
    Pattern,
    Insight,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Implementation => "implementation",
            ChunkKind::Docstring => "docstring",
            ChunkKind::Test => "test",
            ChunkKind::Pattern => "pattern",
            ChunkKind::Insight => "insight",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "implementation" => Some(ChunkKind::Implementation),
            "docstring" => Some(ChunkKind::Docstring),
            "test" => Some(ChunkKind::Test),
            "pattern" => Some(ChunkKind::Pattern),
            "insight" => Some(ChunkKind::Insight),
            _ => None,
        }
    }
}

/// Kind of change being assessed by impact analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Signature,
    Behavior,
    Deletion,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Signature => "signature",
            ChangeType::Behavior => "behavior",
            ChangeType::Deletion => "deletion",
        }
    }
}

/// Risk bucket produced by impact analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskBucket {
    Low,
    Medium,
    High,
}

impl RiskBucket {
    /// Bucket a clamped risk score: `LOW` below 1, `MEDIUM` in `[1, 3]`,
    /// `HIGH` above 3.
    pub fn from_score(score: f64) -> Self {
        if score < 1.0 {
            RiskBucket::Low
        } else if score <= 3.0 {
            RiskBucket::Medium
        } else {
            RiskBucket::High
        }
    }
}

/// Retrieval strategy chosen by the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strategy {
    Structure,
    Semantic,
    Hybrid,
}

// ---------------------------------------------------------------------------
// Graph entities
// ---------------------------------------------------------------------------

/// A graph node: file, module, class, or function.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub repo_id: String,
    pub kind: NodeKind,
    pub name: String,
    pub language: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub layer: Layer,
    /// Free-form metrics bag (cyclomatic complexity, loc, test flag, ...).
    pub metrics: serde_json::Value,
    /// SHA-256 of the content this node was derived from.
    pub content_hash: String,
}

/// Target of an edge: another node, or an architectural layer tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeTarget {
    Node(String),
    Layer(Layer),
}

/// A directed, typed, weighted edge to be upserted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub repo_id: String,
    pub source_id: String,
    pub target: EdgeTarget,
    pub kind: EdgeKind,
    pub weight: i64,
    /// `CALLS` only: call sites that pass arguments.
    pub arg_calls: i64,
    /// `CALLS` only: call sites that consume the return value.
    pub return_calls: i64,
    /// Set when the analyzer explicitly detected direct recursion; a
    /// self-edge without this tag is rejected.
    pub recursive: bool,
}

impl EdgeSpec {
    /// Edge between two nodes with weight 1.
    pub fn node(repo_id: &str, source_id: &str, target_id: &str, kind: EdgeKind) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            source_id: source_id.to_string(),
            target: EdgeTarget::Node(target_id.to_string()),
            kind,
            weight: 1,
            arg_calls: 0,
            return_calls: 0,
            recursive: false,
        }
    }

    /// `IN_LAYER` edge from a node to a layer tag.
    pub fn layer(repo_id: &str, source_id: &str, layer: Layer) -> Self {
        Self {
            repo_id: repo_id.to_string(),
            source_id: source_id.to_string(),
            target: EdgeTarget::Layer(layer),
            kind: EdgeKind::InLayer,
            weight: 1,
            arg_calls: 0,
            return_calls: 0,
            recursive: false,
        }
    }
}

/// A caller of a function, as returned by `find_callers`.
#[derive(Clone, Debug, Serialize)]
pub struct Caller {
    pub node: Node,
    pub call_count: i64,
    pub arg_calls: i64,
    pub return_calls: i64,
}

/// One node of the call-chain tree produced by `trace_call_chain`.
#[derive(Clone, Debug, Serialize)]
pub struct CallChainNode {
    pub id: String,
    pub name: String,
    pub depth: i64,
    pub children: Vec<CallChainNode>,
}

/// Result of a bounded call-chain expansion.
#[derive(Clone, Debug, Serialize)]
pub struct CallChain {
    pub root: CallChainNode,
    /// True when the depth limit or the traversal budget cut off unexpanded
    /// edges. Cycle back-edges do not count as truncation.
    pub truncated: bool,
}

/// A detected dependency cycle over one relationship kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Cycle {
    pub relationship: EdgeKind,
    /// Member node identifiers, lexicographically ordered for determinism.
    pub members: Vec<String>,
}

/// Per-repository count summary.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RepoStats {
    pub files: i64,
    pub modules: i64,
    pub classes: i64,
    pub functions: i64,
    pub total_loc: i64,
    pub nodes_by_layer: Vec<(String, i64)>,
}

// ---------------------------------------------------------------------------
// Semantic index entities
// ---------------------------------------------------------------------------

/// A unit of text indexed for nearest-neighbor retrieval.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub repo_id: String,
    pub file_path: String,
    /// Enclosing function or class name, when there is one.
    pub symbol: Option<String>,
    pub kind: ChunkKind,
    pub language: String,
    pub layer: Layer,
    pub byte_start: i64,
    pub byte_end: i64,
    pub text: String,
}

/// Exact-match metadata filters for a semantic search; `None` fields match
/// everything.
#[derive(Clone, Debug, Default)]
pub struct ChunkFilters {
    pub repo_id: Option<String>,
    pub language: Option<String>,
    pub layer: Option<Layer>,
    pub kind: Option<ChunkKind>,
}

impl ChunkFilters {
    pub fn repo(repo_id: &str) -> Self {
        Self {
            repo_id: Some(repo_id.to_string()),
            ..Self::default()
        }
    }
}

/// A search hit: chunk plus cosine similarity in `[-1, 1]`.
#[derive(Clone, Debug, Serialize)]
pub struct ChunkHit {
    pub chunk: Chunk,
    pub score: f32,
}

// ---------------------------------------------------------------------------
// Analysis results
// ---------------------------------------------------------------------------

/// A non-fatal parse failure recorded during an analysis pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    pub file_path: String,
    pub message: String,
}

/// Summary of one analysis pass (full or incremental).
#[derive(Clone, Debug, Default, Serialize)]
pub struct AnalysisReport {
    pub repo_id: String,
    pub files_seen: i64,
    pub files_indexed: i64,
    pub files_unchanged: i64,
    pub nodes_upserted: i64,
    pub edges_upserted: i64,
    /// Edges dropped because an endpoint was missing after the second pass.
    pub edges_dropped: i64,
    pub chunks_upserted: i64,
    /// Chunks parked on the retry queue after embedding attempts ran out.
    pub chunks_queued: i64,
    pub warnings: Vec<ParseWarning>,
    pub cancelled: bool,
    pub elapsed_ms: i64,
}

/// A direct caller annotated with sensitivity flags.
#[derive(Clone, Debug, Serialize)]
pub struct DirectCaller {
    pub id: String,
    pub name: String,
    pub file_path: String,
    pub call_count: i64,
    /// The caller passes positional/keyword arguments at the call site.
    pub signature_sensitive: bool,
    /// The caller consumes the return value.
    pub return_sensitive: bool,
    /// At least one `test` chunk in the semantic index references the caller.
    pub has_test: bool,
}

/// Structured result of impact analysis for one target function.
#[derive(Clone, Debug, Serialize)]
pub struct ImpactAnalysis {
    pub target_id: String,
    pub target_name: String,
    pub change_type: ChangeType,
    pub risk: RiskBucket,
    pub risk_score: f64,
    pub direct_callers: Vec<DirectCaller>,
    /// Transitive callers (identifiers only), breadth-first order.
    pub transitive_caller_ids: Vec<String>,
    pub test_coverage_ratio: f64,
    pub affected_files: Vec<String>,
    /// True when the reverse traversal hit its depth or budget limit.
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// Orchestrator output
// ---------------------------------------------------------------------------

/// One piece of evidence in a bundle.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum EvidenceItem {
    /// A caller surfaced by graph traversal.
    Graph {
        of: String,
        id: String,
        name: String,
        file_path: String,
        call_count: i64,
    },
    /// A chunk surfaced by semantic search.
    Semantic {
        chunk_id: String,
        file_path: String,
        symbol: Option<String>,
        score: f32,
        snippet: String,
    },
}

/// Structured evidence for a downstream explanation collaborator.  This core
/// never phrases prose; it only assembles evidence.
#[derive(Clone, Debug, Serialize)]
pub struct EvidenceBundle {
    pub question: String,
    pub strategy: Strategy,
    /// Node identifiers the question resolved to.
    pub subjects: Vec<String>,
    pub impact: Option<ImpactAnalysis>,
    pub items: Vec<EvidenceItem>,
    /// Set when a semantic search found no evidence and the orchestrator fell
    /// back to structure-only results.
    pub degraded_to_structure: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_deterministic() {
        let a = symbol_node_id("r1", "src/a.py", "Foo.bar");
        let b = symbol_node_id("r1", "src/a.py", "Foo.bar");
        assert_eq!(a, b);
        assert_eq!(a, "r1::src/a.py::Foo.bar");
    }

    #[test]
    fn repo_id_is_stable_and_short() {
        let id = repo_id_from_path("/home/user/project");
        assert_eq!(id.len(), 16);
        assert_eq!(id, repo_id_from_path("/home/user/project"));
        assert_ne!(id, repo_id_from_path("/home/user/other"));
    }

    #[test]
    fn risk_buckets_follow_thresholds() {
        assert_eq!(RiskBucket::from_score(0.0), RiskBucket::Low);
        assert_eq!(RiskBucket::from_score(0.99), RiskBucket::Low);
        assert_eq!(RiskBucket::from_score(1.0), RiskBucket::Medium);
        assert_eq!(RiskBucket::from_score(3.0), RiskBucket::Medium);
        assert_eq!(RiskBucket::from_score(3.01), RiskBucket::High);
    }

    #[test]
    fn layer_ranks_order_api_over_data() {
        assert!(Layer::Api.rank() < Layer::Core.rank());
        assert!(Layer::Core.rank() < Layer::Data.rank());
        assert_eq!(Layer::Unknown.rank(), None);
    }
}
