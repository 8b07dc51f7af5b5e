//! vectord — retrieval orchestration over a dual vector index.
//!
//! The service keeps two nearest-neighbor structures (an exact flat index and
//! an approximate HNSW graph) position-aligned with an embedded document
//! store, and answers queries through an embed → retrieve → rerank pipeline.
//! Model inference (embeddings, summaries, rerank scores, text generation)
//! lives behind collaborator traits; this crate owns the index lifecycle and
//! the index-to-document consistency contract.

pub mod api;
pub mod config;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod orchestrator;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use index::{IndexKind, IndexStore};
pub use orchestrator::RetrievalOrchestrator;
pub use store::{DocumentRecord, DocumentStore};
