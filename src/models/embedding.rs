//! Embedding backends: in-process fastembed or the remote model server.

use super::{Embedder, excerpt};
use crate::error::{ModelError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// In-process embedding via fastembed.
///
/// fastembed's `TextEmbedding` is blocking, so calls go through
/// `spawn_blocking` with the model behind an `Arc`.
pub struct LocalEmbedder {
    model: Arc<fastembed::TextEmbedding>,
    dim: usize,
}

impl LocalEmbedder {
    /// Load the default fastembed model, storing downloaded files in
    /// `cache_dir`. `dim` must match the model's output dimension; the
    /// index layer rejects anything else at append time.
    pub fn new(cache_dir: &Path, dim: usize) -> Result<Self> {
        let options = fastembed::InitOptions::default()
            .with_cache_dir(cache_dir.to_path_buf())
            .with_show_download_progress(false);

        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| ModelError::Embedding(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            dim,
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model.clone();
        let input = text.to_string();

        let mut embeddings = tokio::task::spawn_blocking(move || {
            model
                .embed(vec![input], None)
                .map_err(|e| ModelError::Embedding(e.to_string()))
        })
        .await
        .map_err(|e| ModelError::Embedding(format!("embedding task failed: {e}")))??;

        embeddings.pop().ok_or_else(|| {
            ModelError::Embedding(format!("model returned no embedding for '{}'", excerpt(text)))
                .into()
        })
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding via the model server's `/v1/embeddings` endpoint.
pub struct HttpEmbedder {
    http: reqwest::Client,
    base_url: String,
    dim: usize,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, timeout: Duration, dim: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Embedding(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            dim,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let wrap = |detail: String| {
            ModelError::Embedding(format!("'{}': {detail}", excerpt(text)))
        };

        let response = self
            .http
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&serde_json::json!({ "input": [text] }))
            .send()
            .await
            .map_err(|e| wrap(e.to_string()))?
            .error_for_status()
            .map_err(|e| wrap(e.to_string()))?;

        let mut parsed: EmbeddingsResponse =
            response.json().await.map_err(|e| wrap(e.to_string()))?;

        parsed
            .embeddings
            .pop()
            .ok_or_else(|| wrap("server returned no embeddings".to_string()).into())
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}
