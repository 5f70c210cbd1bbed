//! Document indexing pipeline
//!
//! extract → chunk → embed → store. Chunk IDs are a pure function of
//! workspace, file path, and chunk index, so reprocessing an unchanged
//! document writes the same IDs and the delete-before-insert in the store
//! makes the whole operation idempotent.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::extract::HandlerRegistry;
use crate::hash::content_hash;
use crate::rag::TextChunker;
use crate::vector::{ChunkMetadata, ImportanceLevel, VectorStoreManager};

/// Result of a single document pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Document indexed with this many chunks (0 means it was emptied)
    Indexed(usize),
    /// No handler accepted the file; nothing was indexed
    Skipped,
}

/// Composes extraction, chunking, and vector storage.
pub struct DocumentPipeline {
    registry: Arc<HandlerRegistry>,
    chunker: TextChunker,
    store: Arc<VectorStoreManager>,
}

impl DocumentPipeline {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        chunker: TextChunker,
        store: Arc<VectorStoreManager>,
    ) -> Self {
        Self {
            registry,
            chunker,
            store,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Index one document into its workspace collection.
    ///
    /// Extraction failures propagate so the caller can record an error
    /// status; a file no handler accepts is a skip, not an error.
    pub fn process_document(
        &self,
        path: &Path,
        workspace_id: &str,
        importance: ImportanceLevel,
    ) -> Result<ProcessOutcome> {
        let file_path = path.to_string_lossy().into_owned();

        let Some(handler) = self.registry.find_handler(path) else {
            debug!(file = %file_path, "no handler accepts file, skipping");
            return Ok(ProcessOutcome::Skipped);
        };

        let (text, doc_meta) = handler
            .extract_text(path)
            .with_context(|| format!("extraction failed for {file_path}"))?;

        let chunks = self.chunker.split(&text);
        if chunks.is_empty() {
            // Document emptied: clear whatever was indexed before
            let removed = self.store.delete_by_file_path(workspace_id, &file_path)?;
            debug!(file = %file_path, removed, "document has no content, cleared index");
            return Ok(ProcessOutcome::Indexed(0));
        }

        let modified_at = file_mtime(path).unwrap_or_else(Utc::now);
        let created_at = Utc::now();
        let path_digest = content_hash(&file_path);
        let path_tag = &path_digest[..16];

        let ids: Vec<String> = (0..chunks.len())
            .map(|i| format!("{workspace_id}_{path_tag}_{i}"))
            .collect();
        let metadatas: Vec<ChunkMetadata> = (0..chunks.len())
            .map(|i| ChunkMetadata {
                file_path: file_path.clone(),
                workspace_id: workspace_id.to_string(),
                importance_level: importance,
                chunk_index: i,
                created_at,
                modified_at,
                file_type: Some(doc_meta.file_type.clone()),
            })
            .collect();

        self.store
            .add_chunks(workspace_id, &chunks, &metadatas, &ids)?;

        info!(
            file = %file_path,
            workspace = workspace_id,
            chunks = chunks.len(),
            handler = handler.name(),
            "indexed document"
        );
        Ok(ProcessOutcome::Indexed(chunks.len()))
    }
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}
