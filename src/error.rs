//! Error types shared across the service.

use crate::index::IndexKind;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad paths, dimensions, or unreadable configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// An ingest operation failed before the document reached the index.
    /// The failing stage is recorded so callers can retry the whole
    /// operation with context.
    #[error("ingest of document '{id}' failed while {stage}: {source}")]
    Ingest {
        id: String,
        stage: IngestStage,
        source: Box<Error>,
    },

    /// The document record was written but the vector never made it into
    /// the index (or its position was never bound). Distinct from
    /// [`Error::Ingest`] so callers can compensate: re-ingesting the same
    /// id repairs the record.
    #[error("document '{id}' was stored but not indexed: {source}")]
    PartialIngest { id: String, source: Box<Error> },

    #[error("document '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Stage names for ingest failures, matching the operation's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Embedding,
    StoringDocument,
    IndexingVector,
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IngestStage::Embedding => "embedding",
            IngestStage::StoringDocument => "storing document",
            IngestStage::IndexingVector => "indexing vector",
        };
        write!(f, "{name}")
    }
}

/// Failures from the index layer.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A persisted index file exists but could not be read back.
    #[error("failed to load {kind} index from {path}: {reason}")]
    Load {
        kind: IndexKind,
        path: PathBuf,
        reason: String,
    },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Neither backend supports point deletion; dangling entries are
    /// reclaimed by a rebuild.
    #[error("point deletion is not supported by the index backends; run a rebuild instead")]
    Unsupported,

    #[error("failed to persist {kind} index to {path}: {source}")]
    Persist {
        kind: IndexKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures from the document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open document store at {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("document store transaction failed: {0}")]
    Transaction(String),

    #[error("failed to decode document record '{id}': {reason}")]
    Decode { id: String, reason: String },
}

/// A model-server or generation-engine collaborator failed.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("embedding request failed: {0}")]
    Embedding(String),

    #[error("summarization request failed: {0}")]
    Summarization(String),

    #[error("rerank request failed: {0}")]
    Rerank(String),

    #[error("generation engine request failed: {0}")]
    Generation(String),
}
