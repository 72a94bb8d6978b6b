//! Error types for the ripple core library.

/// Top-level error enum for the ripple core library.
#[derive(Debug, thiserror::Error)]
pub enum RippleError {
    /// Malformed node/edge/chunk input, rejected before any store mutation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Edge referencing a node that does not exist at call time.
    #[error("dangling edge reference: {from} -> {to}")]
    DanglingReference { from: String, to: String },

    #[error("query error: {0}")]
    Query(String),

    /// The embedding collaborator could not produce a vector after the
    /// configured retry budget.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A semantic search whose metadata filter matched nothing.  Callers must
    /// treat this as "no evidence", not a fault.
    #[error("semantic index empty for the given filters")]
    EmptyIndex,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RippleResult<T> = Result<T, RippleError>;
