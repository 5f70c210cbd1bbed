//! Prompt enhancement middleware
//!
//! Formats retrieval results into a context block and substitutes them
//! into a prompt template. When retrieval finds nothing usable, the
//! original query passes through unchanged.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::rag::query::{RagQueryHandler, RagResult};
use crate::vector::ImportanceLevel;

pub const DEFAULT_CONTEXT_TEMPLATE: &str =
    "Relevant context:\n{context}\n\nUser query: {query}";

/// Retrieval and formatting parameters
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Results included in the context block
    pub max_results: usize,
    /// Minimum similarity for inclusion
    pub min_similarity: f64,
    /// Restrict results to one importance level
    pub importance_filter: Option<ImportanceLevel>,
    /// Template with `{context}` and `{query}` placeholders
    pub context_template: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_results: 3,
            min_similarity: 0.7,
            importance_filter: None,
            context_template: DEFAULT_CONTEXT_TEMPLATE.to_string(),
        }
    }
}

/// Injects retrieved context into user queries.
pub struct RagMiddleware {
    handler: Arc<RagQueryHandler>,
    config: RagConfig,
}

impl RagMiddleware {
    pub fn new(handler: Arc<RagQueryHandler>, config: RagConfig) -> Self {
        Self { handler, config }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Retrieve context for a query and return the enhanced prompt along
    /// with the results that produced it. No results → the original query
    /// and an empty list.
    pub fn enhance_prompt(&self, query: &str, workspace_id: &str) -> Result<(String, Vec<RagResult>)> {
        if !self.config.context_template.contains("{context}")
            || !self.config.context_template.contains("{query}")
        {
            return Err(anyhow!(
                "context template must contain {{context}} and {{query}} placeholders"
            ));
        }

        let results = self.handler.query_filtered(
            query,
            workspace_id,
            self.config.max_results,
            self.config.min_similarity,
            self.config.importance_filter,
        );
        if results.is_empty() {
            debug!(workspace = workspace_id, "no relevant context, query unchanged");
            return Ok((query.to_string(), results));
        }

        let context = format_context(&results);
        let enhanced = self
            .config
            .context_template
            .replace("{context}", &context)
            .replace("{query}", query);
        Ok((enhanced, results))
    }
}

/// One block per result, blank-line separated:
/// `[Source: <file>, Score: <final_score>] <content>`
pub fn format_context(results: &[RagResult]) -> String {
    results
        .iter()
        .map(|r| {
            format!(
                "[Source: {}, Score: {:.2}] {}",
                r.source(),
                r.final_score,
                r.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::ChunkMetadata;
    use chrono::Utc;

    fn result(file: &str, score: f64, content: &str) -> RagResult {
        let now = Utc::now();
        RagResult {
            content: content.to_string(),
            metadata: ChunkMetadata {
                file_path: file.to_string(),
                workspace_id: "ws".to_string(),
                importance_level: ImportanceLevel::Medium,
                chunk_index: 0,
                created_at: now,
                modified_at: now,
                file_type: Some("txt".to_string()),
            },
            vector_similarity: score,
            semantic_score: score,
            final_score: score,
        }
    }

    #[test]
    fn test_format_context_blocks() {
        let results = vec![
            result("/notes/a.md", 0.9142, "Alpha content."),
            result("/notes/b.md", 0.75, "Beta content."),
        ];
        assert_eq!(
            format_context(&results),
            "[Source: /notes/a.md, Score: 0.91] Alpha content.\n\n\
             [Source: /notes/b.md, Score: 0.75] Beta content."
        );
    }

    #[test]
    fn test_default_template_shape() {
        let results = vec![result("/a.txt", 0.8, "Context body.")];
        let context = format_context(&results);
        let prompt = DEFAULT_CONTEXT_TEMPLATE
            .replace("{context}", &context)
            .replace("{query}", "what is alpha?");
        assert_eq!(
            prompt,
            "Relevant context:\n[Source: /a.txt, Score: 0.80] Context body.\n\nUser query: what is alpha?"
        );
    }
}
