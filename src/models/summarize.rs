//! Summarization via the model server.

use super::{Summarizer, excerpt};
use crate::error::{ModelError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct SummaryResponse {
    summary: String,
}

/// Summarization via the model server's `/v1/summarize` endpoint.
pub struct HttpSummarizer {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSummarizer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Summarization(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, text: &str, max_len: usize, min_len: usize) -> Result<String> {
        let wrap = |detail: String| {
            ModelError::Summarization(format!("'{}': {detail}", excerpt(text)))
        };

        let response = self
            .http
            .post(format!("{}/v1/summarize", self.base_url))
            .json(&serde_json::json!({
                "text": text,
                "max_len": max_len,
                "min_len": min_len,
            }))
            .send()
            .await
            .map_err(|e| wrap(e.to_string()))?
            .error_for_status()
            .map_err(|e| wrap(e.to_string()))?;

        let parsed: SummaryResponse = response.json().await.map_err(|e| wrap(e.to_string()))?;
        Ok(parsed.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::SummaryResponse;

    #[test]
    fn summary_response_shape_parses() {
        let parsed: SummaryResponse =
            serde_json::from_str(r#"{"summary": "short version"}"#).expect("parse");
        assert_eq!(parsed.summary, "short version");
    }
}
