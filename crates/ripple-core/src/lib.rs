//! Ripple core library — impact-analysis and call-graph engine.
//!
//! Answers "what breaks if I change this function?" over two coordinated
//! stores: a typed, weighted code graph (files, modules, classes, functions
//! and their CALLS/IMPORTS/CONTAINS/INHERITS edges) and a semantic index of
//! embedded text chunks. The analysis engine populates both from source; the
//! query layer classifies questions, traverses, scores risk, and assembles
//! structured evidence for a downstream explanation collaborator.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ripple_core::config::EngineConfig;
//! use ripple_core::embed::mock::MockEmbedder;
//! use ripple_core::indexer::parser::RegexParser;
//! use ripple_core::indexer::pipeline::{AnalysisEngine, CancelToken, RepoContext};
//! use ripple_core::query::orchestrator::QueryOrchestrator;
//! use ripple_core::store::Database;
//!
//! fn main() -> Result<(), ripple_core::errors::RippleError> {
//!     let db = Arc::new(Database::open("ripple.db")?);
//!     db.init_schema()?;
//!
//!     let engine = AnalysisEngine::new(db.clone(), EngineConfig::default());
//!     let repo = RepoContext::discover(std::path::Path::new("."))?;
//!     let embedder = MockEmbedder::default();
//!     let report =
//!         engine.analyze_repository(&repo, &RegexParser, &embedder, &CancelToken::new())?;
//!     println!("indexed {} files", report.files_indexed);
//!
//!     let orchestrator = QueryOrchestrator::new(db, EngineConfig::default());
//!     let bundle =
//!         orchestrator.answer("what breaks if I change main?", &repo.repo_id, None, &embedder)?;
//!     println!("{} evidence items", bundle.items.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod embed;
pub mod errors;
pub mod indexer;
pub mod models;
pub mod query;
pub mod store;

pub use config::{EngineConfig, ImpactWeights};
pub use errors::{RippleError, RippleResult};
pub use indexer::pipeline::{AnalysisEngine, CancelToken, RepoContext};
pub use models::{
    AnalysisReport, CallChain, Caller, ChangeType, Chunk, ChunkFilters, ChunkHit, ChunkKind,
    Cycle, EdgeKind, EdgeSpec, EvidenceBundle, EvidenceItem, ImpactAnalysis, Layer, Node,
    NodeKind, ParseWarning, RiskBucket, Strategy,
};
pub use query::orchestrator::QueryOrchestrator;
pub use store::Database;
