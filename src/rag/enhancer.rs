//! Message enhancer
//!
//! Wraps a downstream message processor (typically an LLM client) and
//! feeds it retrieval-enhanced prompts. Enhancement is strictly best
//! effort: if anything inside the retrieval path fails, the original
//! message goes through untouched rather than blocking the conversation.

use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::rag::middleware::RagMiddleware;

/// Downstream consumer of (possibly enhanced) messages.
pub trait MessageProcessor: Send + Sync {
    fn process(&self, message: &str, workspace_id: &str) -> Result<String>;
}

/// Record of the most recent enhancement, for inspection in a UI.
#[derive(Debug, Clone)]
pub struct RagInteraction {
    pub query: String,
    pub enhanced: bool,
    pub result_count: usize,
    /// (source file, final score) per result
    pub sources: Vec<(String, f64)>,
    pub timestamp: DateTime<Utc>,
}

/// Retrieval-enhancing wrapper around a [`MessageProcessor`].
pub struct RagEnhancer {
    processor: Box<dyn MessageProcessor>,
    middleware: RagMiddleware,
    last_interaction: Mutex<Option<RagInteraction>>,
}

impl RagEnhancer {
    pub fn new(processor: Box<dyn MessageProcessor>, middleware: RagMiddleware) -> Self {
        Self {
            processor,
            middleware,
            last_interaction: Mutex::new(None),
        }
    }

    /// Enhance the message with retrieved context and pass it downstream.
    /// On any enhancement failure the original message is processed
    /// instead; only the downstream processor's own error propagates.
    pub fn process_message(&self, message: &str, workspace_id: &str) -> Result<String> {
        let (prompt, interaction) = match self.middleware.enhance_prompt(message, workspace_id) {
            Ok((enhanced, results)) => {
                let interaction = RagInteraction {
                    query: message.to_string(),
                    enhanced: !results.is_empty(),
                    result_count: results.len(),
                    sources: results
                        .iter()
                        .map(|r| (r.source().to_string(), r.final_score))
                        .collect(),
                    timestamp: Utc::now(),
                };
                (enhanced, interaction)
            }
            Err(e) => {
                warn!(workspace = workspace_id, error = %e, "enhancement failed, using original message");
                let interaction = RagInteraction {
                    query: message.to_string(),
                    enhanced: false,
                    result_count: 0,
                    sources: Vec::new(),
                    timestamp: Utc::now(),
                };
                (message.to_string(), interaction)
            }
        };

        if let Ok(mut guard) = self.last_interaction.lock() {
            *guard = Some(interaction);
        }
        self.processor.process(&prompt, workspace_id)
    }

    /// Metadata for the most recent call, if any.
    pub fn last_interaction(&self) -> Option<RagInteraction> {
        self.last_interaction.lock().ok().and_then(|g| g.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingProvider, MockEmbedding};
    use crate::rag::middleware::RagConfig;
    use crate::rag::query::RagQueryHandler;
    use crate::vector::{ChunkMetadata, ImportanceLevel, VectorStoreManager};
    use anyhow::anyhow;
    use chrono::Utc;
    use std::sync::Arc;

    /// Echoes its input so tests can see exactly what reached downstream.
    struct EchoProcessor;

    impl MessageProcessor for EchoProcessor {
        fn process(&self, message: &str, _workspace_id: &str) -> Result<String> {
            Ok(format!("echo: {message}"))
        }
    }

    struct FailingEmbedding;

    impl EmbeddingProvider for FailingEmbedding {
        fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(anyhow!("embedding service unavailable"))
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn enhancer_with(embedder: Arc<dyn EmbeddingProvider>, config: RagConfig) -> RagEnhancer {
        let store =
            Arc::new(VectorStoreManager::open_in_memory(Arc::clone(&embedder), "workspace_").unwrap());
        let handler = Arc::new(RagQueryHandler::new(store, embedder));
        RagEnhancer::new(Box::new(EchoProcessor), RagMiddleware::new(handler, config))
    }

    #[test]
    fn test_no_results_passes_original_message() {
        let enhancer = enhancer_with(Arc::new(MockEmbedding::new(16)), RagConfig::default());

        let response = enhancer.process_message("what is alpha?", "ws").unwrap();
        assert_eq!(response, "echo: what is alpha?");

        let interaction = enhancer.last_interaction().unwrap();
        assert!(!interaction.enhanced);
        assert_eq!(interaction.result_count, 0);
    }

    #[test]
    fn test_failing_retrieval_falls_back_to_original() {
        let enhancer = enhancer_with(Arc::new(FailingEmbedding), RagConfig::default());

        let response = enhancer.process_message("hello there", "ws").unwrap();
        assert_eq!(response, "echo: hello there");
        assert!(!enhancer.last_interaction().unwrap().enhanced);
    }

    #[test]
    fn test_broken_template_falls_back_to_original() {
        let config = RagConfig {
            context_template: "missing placeholders".to_string(),
            ..RagConfig::default()
        };
        let enhancer = enhancer_with(Arc::new(MockEmbedding::new(16)), config);

        let response = enhancer.process_message("hello", "ws").unwrap();
        assert_eq!(response, "echo: hello");
    }

    #[test]
    fn test_enhanced_prompt_reaches_processor() {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbedding::new(16));
        let store =
            Arc::new(VectorStoreManager::open_in_memory(Arc::clone(&embedder), "workspace_").unwrap());

        // Store the query text itself so the mock embedder scores it 1.0
        let now = Utc::now();
        let meta = ChunkMetadata {
            file_path: "/kb/answer.txt".to_string(),
            workspace_id: "ws".to_string(),
            importance_level: ImportanceLevel::High,
            chunk_index: 0,
            created_at: now,
            modified_at: now,
            file_type: Some("txt".to_string()),
        };
        store
            .add_chunks(
                "ws",
                &["what is alpha?".to_string()],
                &[meta],
                &["ws_kb_0".to_string()],
            )
            .unwrap();

        let handler = Arc::new(RagQueryHandler::new(store, embedder));
        let enhancer = RagEnhancer::new(
            Box::new(EchoProcessor),
            RagMiddleware::new(handler, RagConfig::default()),
        );

        let response = enhancer.process_message("what is alpha?", "ws").unwrap();
        assert!(response.starts_with("echo: Relevant context:"));
        assert!(response.contains("[Source: /kb/answer.txt, Score: 1.00] what is alpha?"));
        assert!(response.ends_with("User query: what is alpha?"));

        let interaction = enhancer.last_interaction().unwrap();
        assert!(interaction.enhanced);
        assert_eq!(interaction.result_count, 1);
        assert_eq!(interaction.sources[0].0, "/kb/answer.txt");
    }
}
