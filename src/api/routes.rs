//! API handlers and their request/response types.

use super::state::ApiState;

use crate::error::{Error, IndexError};
use crate::generation::{SamplingOverrides, SamplingParams};
use crate::index::IndexKind;
use crate::orchestrator::QueryOptions;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

type ApiError = (StatusCode, Json<serde_json::Value>);
type ApiResult<T> = Result<T, ApiError>;

pub(super) async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub(super) async fn status(State(state): State<Arc<ApiState>>) -> ApiResult<Json<serde_json::Value>> {
    let documents = state
        .orchestrator
        .document_count()
        .map_err(error_response)?;
    let index_entries = state.orchestrator.index_size().await;

    Ok(Json(serde_json::json!({
        "status": "running",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "documents": documents,
        "index_entries": index_entries,
    })))
}

#[derive(Deserialize)]
pub(super) struct IngestRequest {
    id: String,
    content: String,
}

pub(super) async fn ingest(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .orchestrator
        .ingest(&request.id, &request.content)
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({ "id": request.id, "status": "ingested" })))
}

#[derive(Deserialize)]
pub(super) struct QueryRequest {
    text: String,
    top_n: Option<usize>,
    top_k: Option<usize>,
    backend: Option<IndexKind>,
}

#[derive(Serialize)]
pub(super) struct QueryResultItem {
    id: String,
    content: String,
    summary: String,
    ingested_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub(super) struct QueryResponse {
    results: Vec<QueryResultItem>,
}

pub(super) async fn query(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<QueryResponse>> {
    let records = state
        .orchestrator
        .query(
            &request.text,
            QueryOptions {
                top_n: request.top_n,
                top_k: request.top_k,
                backend: request.backend,
            },
        )
        .await
        .map_err(error_response)?;

    let results = records
        .into_iter()
        .map(|record| QueryResultItem {
            id: record.id,
            content: record.content,
            summary: record.summary,
            ingested_at: record.ingested_at,
        })
        .collect();

    Ok(Json(QueryResponse { results }))
}

#[derive(Deserialize)]
pub(super) struct DeleteRequest {
    id: String,
}

pub(super) async fn delete(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<DeleteRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .orchestrator
        .delete(&request.id)
        .await
        .map_err(error_response)?;

    Ok(Json(serde_json::json!({ "id": request.id, "status": "deleted" })))
}

pub(super) async fn rebuild(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let reindexed = state.orchestrator.rebuild().await.map_err(error_response)?;
    Ok(Json(serde_json::json!({ "reindexed": reindexed })))
}

#[derive(Deserialize)]
pub(super) struct GenerateRequest {
    prompt: String,
    #[serde(default = "default_stream")]
    stream: bool,
    #[serde(flatten)]
    sampling: SamplingOverrides,
}

fn default_stream() -> bool {
    true
}

/// Proxy to the generation engine. In streaming mode the response body
/// relays the engine's NUL-delimited frames; dropping the connection drops
/// the stream, which aborts the engine request under the same correlation
/// id.
pub(super) async fn generate(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Response> {
    let request_id = Uuid::new_v4();
    let params = SamplingParams::resolve(request.sampling, &state.generation_defaults);
    tracing::info!(%request_id, stream = request.stream, "generation requested");

    let chunks = state
        .generation
        .generate(request.prompt, params, request_id);

    if request.stream {
        let body = chunks.map(|chunk| {
            chunk.map(|text| {
                let mut frame = serde_json::json!({ "text": [text] }).to_string().into_bytes();
                frame.push(0);
                frame
            })
        });

        let response = Response::builder()
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from_stream(body))
            .map_err(|e| error_response(Error::Other(anyhow::anyhow!(e))))?;
        return Ok(response);
    }

    // Non-streaming: frames carry cumulative text, so the last one is the
    // full output.
    let mut chunks = std::pin::pin!(chunks);
    let mut last = String::new();
    while let Some(chunk) = chunks.next().await {
        last = chunk.map_err(error_response)?;
    }

    Ok(Json(serde_json::json!({ "text": [last] })).into_response())
}

/// Map a service error to an HTTP response: 4xx for caller-input problems,
/// 502 for collaborator failures, 500 otherwise.
fn error_response(error: Error) -> ApiError {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!(%error, "request failed");
    } else {
        tracing::warn!(%error, "request rejected");
    }
    (status, Json(serde_json::json!({ "error": error.to_string() })))
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Index(IndexError::DimensionMismatch { .. }) => StatusCode::BAD_REQUEST,
        Error::Model(_) => StatusCode::BAD_GATEWAY,
        Error::Ingest { source, .. } => status_for(source),
        Error::PartialIngest { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(
            status_for(&Error::NotFound("a".to_string())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn dimension_mismatch_maps_to_400() {
        let error = Error::Index(IndexError::DimensionMismatch {
            expected: 3,
            actual: 4,
        });
        assert_eq!(status_for(&error), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upstream_model_failure_maps_to_502() {
        let error = Error::Model(ModelError::Embedding("down".to_string()));
        assert_eq!(status_for(&error), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn ingest_wrapper_maps_through_its_source() {
        let error = Error::Ingest {
            id: "a".to_string(),
            stage: crate::error::IngestStage::Embedding,
            source: Box::new(Error::Model(ModelError::Embedding("down".to_string()))),
        };
        assert_eq!(status_for(&error), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn partial_ingest_maps_to_500() {
        let error = Error::PartialIngest {
            id: "a".to_string(),
            source: Box::new(Error::Index(IndexError::DimensionMismatch {
                expected: 3,
                actual: 4,
            })),
        };
        assert_eq!(status_for(&error), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
