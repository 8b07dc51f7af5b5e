//! Collaborator interfaces for the model servers.
//!
//! Embedding, summarization, and reranking are black boxes to this service:
//! traits at the seam, with HTTP clients against the models server and a
//! fastembed-backed local embedder. Inference details live on the other
//! side of these interfaces.

mod embedding;
mod rerank;
mod summarize;

pub use embedding::{HttpEmbedder, LocalEmbedder};
pub use rerank::HttpReranker;
pub use summarize::HttpSummarizer;

use crate::error::Result;
use async_trait::async_trait;

/// Text → fixed-dimension vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimension of the vectors this embedder produces.
    fn dimension(&self) -> usize;
}

/// Long text → shorter text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, max_len: usize, min_len: usize) -> Result<String>;
}

/// (query, candidates) → relevance scores, same length and order as the
/// candidates.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
}

/// Short prefix of a text for error context, cut on a char boundary.
pub(crate) fn excerpt(text: &str) -> String {
    const MAX: usize = 48;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}…")
    }
}
