//! Retrieval orchestration: the one component allowed to mutate the index
//! and the document store together.
//!
//! Mutations (`ingest`, `delete`, `rebuild`) serialize on a write lock over
//! the index store; queries share a read lock, so they see either the
//! pre- or post-mutation state, never a torn one.

use crate::config::RetrievalConfig;
use crate::error::{Error, IngestStage, ModelError, Result};
use crate::index::{IndexKind, IndexStore};
use crate::models::{Embedder, Reranker, Summarizer};
use crate::store::{DocumentRecord, DocumentStore};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-request overrides for [`RetrievalOrchestrator::query`]. Unset fields
/// fall back to the configured defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    pub top_n: Option<usize>,
    pub top_k: Option<usize>,
    pub backend: Option<IndexKind>,
}

pub struct RetrievalOrchestrator {
    index: RwLock<IndexStore>,
    documents: DocumentStore,
    embedder: Arc<dyn Embedder>,
    summarizer: Arc<dyn Summarizer>,
    reranker: Arc<dyn Reranker>,
    retrieval: RetrievalConfig,
    summary_min_len: usize,
    summary_max_len: usize,
}

impl RetrievalOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: IndexStore,
        documents: DocumentStore,
        embedder: Arc<dyn Embedder>,
        summarizer: Arc<dyn Summarizer>,
        reranker: Arc<dyn Reranker>,
        retrieval: RetrievalConfig,
        summary_min_len: usize,
        summary_max_len: usize,
    ) -> Self {
        Self {
            index: RwLock::new(index),
            documents,
            embedder,
            summarizer,
            reranker,
            retrieval,
            summary_min_len,
            summary_max_len,
        }
    }

    /// Ingest one document: summarize, embed the summary (summarization is
    /// the normalization step before embedding, not the raw content), store
    /// the record, append the vector, bind its position.
    ///
    /// Idempotent on `id`: re-ingesting overwrites the record and rebinds
    /// it to the new position; the superseded vector stays in the indexes
    /// as a dangling entry until a rebuild.
    ///
    /// If the record lands in the store but the vector never reaches the
    /// index (or its position is never bound), the error is
    /// [`Error::PartialIngest`] — re-ingesting the same id repairs it.
    pub async fn ingest(&self, id: &str, content: &str) -> Result<()> {
        let ingest_err = |stage: IngestStage, source: Error| Error::Ingest {
            id: id.to_string(),
            stage,
            source: Box::new(source),
        };

        // Summaries are bounded: long inputs get a proportionally longer
        // cap, short ones keep the configured floor.
        let words = content.split_whitespace().count();
        let max_len = self.summary_max_len.max(words / 2);
        let summary = self
            .summarizer
            .summarize(truncate_chars(content, 1024), max_len, self.summary_min_len)
            .await
            .map_err(|e| ingest_err(IngestStage::Embedding, e))?;

        let embedding = self
            .embedder
            .embed(&summary)
            .await
            .map_err(|e| ingest_err(IngestStage::Embedding, e))?;

        let mut index = self.index.write().await;

        let record = DocumentRecord {
            id: id.to_string(),
            content: content.to_string(),
            summary,
            embedding: embedding.clone(),
            position: None,
            ingested_at: Utc::now(),
        };
        let prior_position = self
            .documents
            .upsert(&record)
            .map_err(|e| ingest_err(IngestStage::StoringDocument, e))?;

        // From here on the record exists; failures leave it stored but
        // unindexed, which callers must be able to tell apart.
        let partial = |source: Error| Error::PartialIngest {
            id: id.to_string(),
            source: Box::new(source),
        };

        let position = index.add(&[embedding]).map_err(&partial)?;
        self.documents
            .bind_position(id, position as u64)
            .map_err(&partial)?;

        if let Some(old) = prior_position {
            tracing::debug!(id, old_position = old, "re-ingest left a dangling index entry");
        }
        tracing::info!(id, position, "document ingested");
        Ok(())
    }

    /// Two-stage retrieval: embed the query, pull `top_n` candidates from
    /// the chosen backend, resolve them to documents, rerank their content,
    /// return the best `top_k` (descending score, ties in candidate order).
    ///
    /// Positions that no longer resolve — dangling deletes, missing
    /// records — are logged and skipped, never failing the query. An empty
    /// index or an empty surviving set yields an empty Vec.
    pub async fn query(&self, text: &str, options: QueryOptions) -> Result<Vec<DocumentRecord>> {
        let query = text.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let top_n = options.top_n.unwrap_or(self.retrieval.top_n);
        let top_k = options.top_k.unwrap_or(self.retrieval.top_k).min(top_n);
        let backend = options.backend.unwrap_or(self.retrieval.backend);

        let embedding = self.embedder.embed(query).await?;

        let hits = {
            let index = self.index.read().await;
            index.search(&embedding, top_n, backend)?
        };

        let mut candidates = Vec::with_capacity(hits.len());
        for hit in &hits {
            let id = match self.documents.resolve_position(hit.position as u64)? {
                Some(id) => id,
                None => {
                    tracing::warn!(position = hit.position, "skipping dangling index position");
                    continue;
                }
            };
            match self.documents.get(&id)? {
                Some(record) => candidates.push(record),
                None => {
                    tracing::warn!(
                        position = hit.position,
                        id,
                        "position resolves to a missing document, skipping"
                    );
                }
            }
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let contents: Vec<String> = candidates.iter().map(|r| r.content.clone()).collect();
        let scores = self.reranker.score(query, &contents).await?;
        if scores.len() != candidates.len() {
            return Err(ModelError::Rerank(format!(
                "expected {} scores, got {}",
                candidates.len(),
                scores.len()
            ))
            .into());
        }

        let mut scored: Vec<(f32, DocumentRecord)> =
            scores.into_iter().zip(candidates).collect();
        // Stable sort: equal scores keep the pre-rerank candidate order.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        tracing::debug!(
            query = %query,
            retrieved = hits.len(),
            returned = scored.len(),
            backend = %backend,
            "query served"
        );
        Ok(scored.into_iter().map(|(_, record)| record).collect())
    }

    /// Delete a document record and unmap its index position. The vector
    /// stays in both indexes until a rebuild; queries skip it as dangling.
    pub async fn delete(&self, id: &str) -> Result<()> {
        // Serialized with other mutations even though the index itself is
        // untouched: the position map and the record must move together.
        let _index = self.index.write().await;

        if !self.documents.delete(id)? {
            return Err(Error::NotFound(id.to_string()));
        }

        tracing::info!(id, "document deleted; index entry dangles until rebuild");
        Ok(())
    }

    /// Maintenance: rebuild both indexes from the live document records,
    /// renumbering every position and reclaiming dangling entries.
    pub async fn rebuild(&self) -> Result<usize> {
        let mut index = self.index.write().await;
        let dim = index.dimension();

        let records = self.documents.iter_records()?;
        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            if record.embedding.len() == dim {
                kept.push(record);
            } else {
                tracing::warn!(
                    id = %record.id,
                    stored_dim = record.embedding.len(),
                    expected_dim = dim,
                    "skipping record with mismatched embedding during rebuild"
                );
            }
        }

        let count = index.rebuild_from(kept.iter().map(|r| r.embedding.clone()))?;

        let bindings: Vec<(String, u64)> = kept
            .iter()
            .enumerate()
            .map(|(position, record)| (record.id.clone(), position as u64))
            .collect();
        self.documents.rebind_all(&bindings)?;

        tracing::info!(reindexed = count, "rebuild complete");
        Ok(count)
    }

    /// Entries currently in the index (including dangling ones).
    pub async fn index_size(&self) -> usize {
        self.index.read().await.len()
    }

    /// Live document records.
    pub fn document_count(&self) -> Result<u64> {
        self.documents.len()
    }
}

/// Cut `text` to at most `max` chars on a char boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::error::IndexError;
    use async_trait::async_trait;

    /// Deterministic embedder: maps keyword presence onto axes, so texts
    /// about the same topic land near each other.
    struct StubEmbedder {
        dim: usize,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            let mut v = vec![0.0_f32; self.dim];
            v[0] = if lower.contains("credit") { 1.0 } else { 0.0 };
            v[1] = if lower.contains("loan") { 1.0 } else { 0.0 };
            v[2] = if lower.contains("market") { 1.0 } else { 0.0 };
            Ok(v)
        }

        fn dimension(&self) -> usize {
            self.dim
        }
    }

    /// Keeps the leading words so topic keywords survive into the summary.
    struct StubSummarizer;

    #[async_trait]
    impl Summarizer for StubSummarizer {
        async fn summarize(&self, text: &str, _max_len: usize, _min_len: usize) -> Result<String> {
            Ok(text.split_whitespace().take(6).collect::<Vec<_>>().join(" "))
        }
    }

    /// Scores candidates mentioning "credit" highest, then "loan".
    struct StubReranker;

    #[async_trait]
    impl Reranker for StubReranker {
        async fn score(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>> {
            Ok(candidates
                .iter()
                .map(|c| {
                    let lower = c.to_lowercase();
                    if lower.contains("credit") {
                        0.9
                    } else if lower.contains("loan") {
                        0.5
                    } else {
                        0.1
                    }
                })
                .collect())
        }
    }

    const DIM: usize = 4;

    fn build(dir: &std::path::Path) -> RetrievalOrchestrator {
        build_with_embedder(dir, Arc::new(StubEmbedder { dim: DIM }))
    }

    fn build_with_embedder(
        dir: &std::path::Path,
        embedder: Arc<dyn Embedder>,
    ) -> RetrievalOrchestrator {
        let index_config = IndexConfig {
            dir: dir.join("index"),
            embedding_dim: DIM,
            ..IndexConfig::default()
        };
        let index = IndexStore::open(&index_config).expect("open index");
        let documents = DocumentStore::open(&dir.join("docs.redb")).expect("open store");

        RetrievalOrchestrator::new(
            index,
            documents,
            embedder,
            Arc::new(StubSummarizer),
            Arc::new(StubReranker),
            RetrievalConfig::default(),
            100,
            100,
        )
    }

    #[tokio::test]
    async fn ingest_keeps_index_sizes_equal_to_document_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = build(dir.path());

        orchestrator
            .ingest("a", "credit risk is the chance of loss")
            .await
            .expect("ingest a");
        orchestrator
            .ingest("b", "loan defaults are rising")
            .await
            .expect("ingest b");
        orchestrator
            .ingest("c", "market volatility overview")
            .await
            .expect("ingest c");

        assert_eq!(orchestrator.index_size().await, 3);
        assert_eq!(orchestrator.document_count().expect("count"), 3);
    }

    #[tokio::test]
    async fn reingest_is_idempotent_on_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = build(dir.path());

        orchestrator
            .ingest("a", "credit risk first version")
            .await
            .expect("first ingest");
        orchestrator
            .ingest("a", "credit risk second version")
            .await
            .expect("second ingest");

        // One resolvable document; the superseded vector dangles.
        assert_eq!(orchestrator.document_count().expect("count"), 1);
        assert_eq!(orchestrator.index_size().await, 2);

        let results = orchestrator
            .query("credit risk", QueryOptions::default())
            .await
            .expect("query");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[0].content, "credit risk second version");
    }

    #[tokio::test]
    async fn query_returns_top_k_sorted_descending() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = build(dir.path());

        orchestrator
            .ingest("a", "credit risk is the chance of loss")
            .await
            .expect("ingest a");
        orchestrator
            .ingest("b", "loan defaults are rising")
            .await
            .expect("ingest b");
        orchestrator
            .ingest("c", "market volatility overview")
            .await
            .expect("ingest c");

        let results = orchestrator
            .query(
                "credit and loan exposure",
                QueryOptions {
                    top_n: Some(3),
                    top_k: Some(2),
                    backend: None,
                },
            )
            .await
            .expect("query");

        assert_eq!(results.len(), 2);
        // Stub reranker: credit (0.9) above loan (0.5).
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "b");
    }

    #[tokio::test]
    async fn query_against_empty_index_returns_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = build(dir.path());

        let results = orchestrator
            .query("anything at all", QueryOptions::default())
            .await
            .expect("query");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn query_skips_dangling_positions_after_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = build(dir.path());

        orchestrator
            .ingest("a", "credit risk is the chance of loss")
            .await
            .expect("ingest a");
        orchestrator
            .ingest("b", "loan defaults are rising")
            .await
            .expect("ingest b");

        orchestrator.delete("a").await.expect("delete a");

        // The deleted vector is still the nearest hit for this query; the
        // result must silently exclude it.
        let results = orchestrator
            .query("credit risk", QueryOptions::default())
            .await
            .expect("query");
        assert!(results.iter().all(|r| r.id != "a"));
        assert_eq!(orchestrator.index_size().await, 2);
    }

    #[tokio::test]
    async fn credit_risk_scenario_returns_a() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = build(dir.path());

        orchestrator
            .ingest("A", "credit risk is the possibility of lender loss")
            .await
            .expect("ingest A");
        orchestrator
            .ingest("B", "loan defaults are a growing concern")
            .await
            .expect("ingest B");

        let results = orchestrator
            .query(
                "What is credit risk?",
                QueryOptions {
                    top_n: Some(2),
                    top_k: Some(1),
                    backend: None,
                },
            )
            .await
            .expect("query");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "A");
    }

    #[tokio::test]
    async fn delete_missing_id_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = build(dir.path());

        let result = orchestrator.delete("ghost").await;
        assert!(matches!(result, Err(Error::NotFound(id)) if id == "ghost"));
    }

    #[tokio::test]
    async fn rebuild_reclaims_dangling_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = build(dir.path());

        orchestrator
            .ingest("a", "credit risk is the chance of loss")
            .await
            .expect("ingest a");
        orchestrator
            .ingest("b", "loan defaults are rising")
            .await
            .expect("ingest b");
        orchestrator.delete("a").await.expect("delete a");
        assert_eq!(orchestrator.index_size().await, 2);

        let reindexed = orchestrator.rebuild().await.expect("rebuild");
        assert_eq!(reindexed, 1);
        assert_eq!(orchestrator.index_size().await, 1);

        // The surviving document is still reachable at its new position.
        let results = orchestrator
            .query("loan defaults", QueryOptions::default())
            .await
            .expect("query");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
    }

    #[tokio::test]
    async fn top_k_is_clamped_to_top_n() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = build(dir.path());

        orchestrator
            .ingest("a", "credit risk is the chance of loss")
            .await
            .expect("ingest a");
        orchestrator
            .ingest("b", "loan defaults are rising")
            .await
            .expect("ingest b");
        orchestrator
            .ingest("c", "credit scoring models")
            .await
            .expect("ingest c");

        let results = orchestrator
            .query(
                "credit",
                QueryOptions {
                    top_n: Some(2),
                    top_k: Some(5),
                    backend: None,
                },
            )
            .await
            .expect("query");
        assert!(results.len() <= 2);
    }

    /// Embedder whose output dimension doesn't match the index, so the
    /// index append fails after the record is stored.
    struct WrongDimEmbedder;

    #[async_trait]
    impl Embedder for WrongDimEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; DIM + 1])
        }

        fn dimension(&self) -> usize {
            DIM + 1
        }
    }

    #[tokio::test]
    async fn index_failure_after_store_is_partial_ingest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = build_with_embedder(dir.path(), Arc::new(WrongDimEmbedder));

        let result = orchestrator.ingest("a", "credit risk text").await;
        match result {
            Err(Error::PartialIngest { id, source }) => {
                assert_eq!(id, "a");
                assert!(matches!(
                    *source,
                    Error::Index(IndexError::DimensionMismatch { .. })
                ));
            }
            other => panic!("expected PartialIngest, got {other:?}"),
        }

        // The record exists but never reached the index.
        assert_eq!(orchestrator.document_count().expect("count"), 1);
        assert_eq!(orchestrator.index_size().await, 0);
    }
}
