//! Retrieval query handler
//!
//! Two-stage scoring: candidates come back from the vector store with a
//! cosine distance, survive a similarity threshold, then get re-scored
//! against fresh embeddings of their own content. The re-score measures
//! the same quantity the store already ranked by; keeping both makes the
//! final score robust to a store whose distance math drifts from the
//! embedder's. Retrieval never raises: any failure degrades to an empty
//! result list and the caller falls back to the plain query.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::vector::{cosine_similarity, ChunkMetadata, ImportanceLevel, VectorStoreManager};

/// A scored retrieval result
#[derive(Debug, Clone, Serialize)]
pub struct RagResult {
    pub content: String,
    #[serde(skip)]
    pub metadata: ChunkMetadata,
    /// Similarity reported by the vector store (1 − distance)
    pub vector_similarity: f64,
    /// Similarity recomputed from fresh embeddings
    pub semantic_score: f64,
    /// Mean of the two similarities; results are ranked by this
    pub final_score: f64,
}

impl RagResult {
    pub fn source(&self) -> &str {
        &self.metadata.file_path
    }
}

/// Runs similarity queries against a workspace collection.
pub struct RagQueryHandler {
    store: Arc<VectorStoreManager>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RagQueryHandler {
    pub fn new(store: Arc<VectorStoreManager>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Query without an importance filter.
    pub fn query(
        &self,
        query_text: &str,
        workspace_id: &str,
        top_k: usize,
        threshold: f64,
    ) -> Vec<RagResult> {
        self.query_filtered(query_text, workspace_id, top_k, threshold, None)
    }

    /// Query a workspace, returning at most `top_k` results whose vector
    /// and semantic similarities both meet `threshold` (inclusive).
    pub fn query_filtered(
        &self,
        query_text: &str,
        workspace_id: &str,
        top_k: usize,
        threshold: f64,
        importance_filter: Option<ImportanceLevel>,
    ) -> Vec<RagResult> {
        if query_text.trim().is_empty() || top_k == 0 {
            return Vec::new();
        }

        // Over-fetch so threshold filtering still leaves top_k candidates
        let candidates = match self.store.query(workspace_id, query_text, top_k * 2) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(workspace = workspace_id, error = %e, "vector store query failed");
                return Vec::new();
            }
        };
        if candidates.is_empty() {
            return Vec::new();
        }

        let query_embedding = match self.embedder.embed_query(query_text) {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(workspace = workspace_id, error = %e, "query embedding failed");
                return Vec::new();
            }
        };

        let mut results = Vec::new();
        for candidate in candidates {
            if let Some(filter) = importance_filter {
                if candidate.metadata.importance_level != filter {
                    continue;
                }
            }

            let vector_similarity = 1.0 - candidate.distance;
            if vector_similarity < threshold {
                continue;
            }

            let semantic_score =
                match self.embedder.embed_documents(std::slice::from_ref(&candidate.content)) {
                    Ok(embeddings) if !embeddings.is_empty() => {
                        cosine_similarity(&query_embedding, &embeddings[0])
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "candidate embedding failed, dropping result");
                        continue;
                    }
                };
            if semantic_score < threshold {
                continue;
            }

            results.push(RagResult {
                content: candidate.content,
                metadata: candidate.metadata,
                vector_similarity,
                semantic_score,
                final_score: (vector_similarity + semantic_score) / 2.0,
            });
        }

        results.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        results.truncate(top_k);
        debug!(
            workspace = workspace_id,
            returned = results.len(),
            "retrieval query complete"
        );
        results
    }
}
