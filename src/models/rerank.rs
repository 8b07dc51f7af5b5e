//! Cross-encoder reranking via the model server.

use super::{Reranker, excerpt};
use crate::error::{ModelError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

/// Reranking via the model server's `/v1/reranker` endpoint.
pub struct HttpReranker {
    http: reqwest::Client,
    base_url: String,
}

impl HttpReranker {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Rerank(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let wrap = |detail: String| {
            ModelError::Rerank(format!("query '{}': {detail}", excerpt(query)))
        };

        let response = self
            .http
            .post(format!("{}/v1/reranker", self.base_url))
            .json(&serde_json::json!({
                "query": query,
                "documents": candidates,
            }))
            .send()
            .await
            .map_err(|e| wrap(e.to_string()))?
            .error_for_status()
            .map_err(|e| wrap(e.to_string()))?;

        let parsed: RerankResponse = response.json().await.map_err(|e| wrap(e.to_string()))?;

        // A score list that doesn't line up with the candidates would
        // silently misattribute relevance downstream.
        if parsed.scores.len() != candidates.len() {
            return Err(wrap(format!(
                "expected {} scores, got {}",
                candidates.len(),
                parsed.scores.len()
            ))
            .into());
        }

        Ok(parsed.scores)
    }
}

#[cfg(test)]
mod tests {
    use super::RerankResponse;

    #[test]
    fn rerank_response_shape_parses() {
        let parsed: RerankResponse =
            serde_json::from_str(r#"{"scores": [0.9, 0.1]}"#).expect("parse");
        assert_eq!(parsed.scores, vec![0.9, 0.1]);
    }
}
