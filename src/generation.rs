//! Client for the external text-generation engine.
//!
//! Generation requests are long-running and cancelable: each one carries a
//! correlation id, and [`GenerationClient::abort`] is idempotent — safe on
//! ids that already finished or were already aborted. Streams abort
//! themselves when dropped before completion, which is how a client
//! disconnect propagates to the engine.

use crate::config::GenerationConfig;
use crate::error::{ModelError, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Per-request sampling overrides; unset fields fall back to configured
/// defaults.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SamplingOverrides {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// Fully resolved sampling parameters sent to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl SamplingParams {
    pub fn resolve(overrides: SamplingOverrides, defaults: &GenerationConfig) -> Self {
        Self {
            max_tokens: overrides.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: overrides.temperature.unwrap_or(defaults.temperature),
            top_p: overrides.top_p.unwrap_or(defaults.top_p),
        }
    }
}

/// One frame of the engine's NUL-delimited JSON stream.
#[derive(Deserialize)]
struct Frame {
    text: Vec<String>,
}

pub struct GenerationClient {
    http: reqwest::Client,
    base_url: String,
    /// Correlation ids with a request in flight. Abort skips the engine
    /// call for ids not in here — they already finished or aborted.
    active: Mutex<HashSet<Uuid>>,
}

impl GenerationClient {
    pub fn new(base_url: &str) -> Result<Self> {
        // No request timeout: generation length is the caller's business.
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ModelError::Generation(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            active: Mutex::new(HashSet::new()),
        })
    }

    /// Stream incremental text for `prompt`. Lazy and restartable per call,
    /// not resumable. Dropping the stream before it finishes fires
    /// [`GenerationClient::abort`] for `request_id`.
    pub fn generate(
        self: &Arc<Self>,
        prompt: String,
        params: SamplingParams,
        request_id: Uuid,
    ) -> BoxStream<'static, Result<String>> {
        let client = self.clone();

        let stream = async_stream::try_stream! {
            client.track(request_id);
            let mut guard = AbortOnDrop::new(client.clone(), request_id);

            let wrap = |detail: String| {
                ModelError::Generation(format!("request {request_id}: {detail}"))
            };

            let response = client
                .http
                .post(format!("{}/generate", client.base_url))
                .json(&serde_json::json!({
                    "prompt": prompt,
                    "stream": true,
                    "request_id": request_id,
                    "max_tokens": params.max_tokens,
                    "temperature": params.temperature,
                    "top_p": params.top_p,
                }))
                .send()
                .await
                .map_err(|e| wrap(e.to_string()))?
                .error_for_status()
                .map_err(|e| wrap(e.to_string()))?;

            let mut body = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| wrap(e.to_string()))?;
                buffer.extend_from_slice(&chunk);

                for frame in drain_frames(&mut buffer) {
                    let parsed: Frame = serde_json::from_slice(&frame)
                        .map_err(|e| wrap(format!("bad frame: {e}")))?;
                    yield parsed.text.into_iter().next().unwrap_or_default();
                }
            }

            guard.disarm();
            client.finish(request_id);
        };
        stream.boxed()
    }

    /// Tell the engine to stop generating for `request_id`. Idempotent:
    /// calling it on a finished, unknown, or already-aborted id succeeds
    /// without touching the engine.
    pub async fn abort(&self, request_id: Uuid) -> Result<()> {
        if !self.finish(request_id) {
            return Ok(());
        }

        let response = self
            .http
            .post(format!("{}/abort", self.base_url))
            .json(&serde_json::json!({ "request_id": request_id }))
            .send()
            .await
            .map_err(|e| ModelError::Generation(format!("abort {request_id}: {e}")))?;

        // The engine may have finished the request on its own; gone-already
        // answers are still a successful abort.
        let status = response.status();
        if status.is_success()
            || status == reqwest::StatusCode::NOT_FOUND
            || status == reqwest::StatusCode::CONFLICT
        {
            tracing::debug!(%request_id, "generation aborted");
            Ok(())
        } else {
            Err(ModelError::Generation(format!("abort {request_id}: engine returned {status}")).into())
        }
    }

    fn track(&self, request_id: Uuid) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id);
    }

    /// Untrack an id; returns whether it was still in flight.
    fn finish(&self, request_id: Uuid) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&request_id)
    }
}

/// Split complete NUL-terminated frames out of `buffer`, leaving any
/// trailing partial frame in place.
fn drain_frames(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while let Some(end) = buffer.iter().position(|&b| b == 0) {
        let mut frame: Vec<u8> = buffer.drain(..=end).collect();
        frame.pop(); // trailing NUL
        frames.push(frame);
    }
    frames
}

/// Aborts the tracked request when dropped unless disarmed first; this is
/// what turns a dropped response stream into an engine-side abort.
struct AbortOnDrop {
    client: Arc<GenerationClient>,
    request_id: Uuid,
    armed: bool,
}

impl AbortOnDrop {
    fn new(client: Arc<GenerationClient>, request_id: Uuid) -> Self {
        Self {
            client,
            request_id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let client = self.client.clone();
        let request_id = self.request_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(error) = client.abort(request_id).await {
                    tracing::warn!(%request_id, %error, "abort after disconnect failed");
                }
            });
        }
    }
}
