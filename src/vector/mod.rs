//! Embedded vector store
//!
//! Chunks live in SQLite, one logical collection per workspace, with
//! embeddings stored as little-endian f32 blobs. Queries embed the input
//! and rank candidates by cosine distance in memory. Writes are serialized
//! through an internal mutex; errors propagate to callers, which decide
//! whether to degrade.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::EmbeddingProvider;

/// Schema for the vector database
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vector_chunks (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    chunk_text TEXT NOT NULL,
    embedding BLOB NOT NULL,
    file_path TEXT NOT NULL,
    workspace_id TEXT NOT NULL,
    importance_level TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL,
    file_type TEXT,
    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_vector_chunks_file
    ON vector_chunks(collection, file_path);
"#;

/// Importance assigned to indexed content; `Excluded` chunks are stored
/// but never surface in filtered retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceLevel {
    High,
    Medium,
    Low,
    Excluded,
}

impl ImportanceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportanceLevel::High => "high",
            ImportanceLevel::Medium => "medium",
            ImportanceLevel::Low => "low",
            ImportanceLevel::Excluded => "excluded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(ImportanceLevel::High),
            "medium" => Some(ImportanceLevel::Medium),
            "low" => Some(ImportanceLevel::Low),
            "excluded" => Some(ImportanceLevel::Excluded),
            _ => None,
        }
    }
}

impl fmt::Display for ImportanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata stored with every chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_path: String,
    pub workspace_id: String,
    pub importance_level: ImportanceLevel,
    pub chunk_index: usize,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub file_type: Option<String>,
}

/// A retrieval candidate: chunk content, its metadata, and its cosine
/// distance from the query (similarity = 1 − distance).
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub distance: f64,
}

/// Per-collection usage counters
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionStats {
    pub chunk_count: usize,
    pub query_count: u64,
}

/// Vector store over all workspace collections
pub struct VectorStoreManager {
    conn: Mutex<Connection>,
    embedder: Arc<dyn EmbeddingProvider>,
    collection_prefix: String,
    monitor: Mutex<HashMap<String, CollectionStats>>,
}

impl VectorStoreManager {
    pub fn open(
        path: &std::path::Path,
        embedder: Arc<dyn EmbeddingProvider>,
        collection_prefix: &str,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create data directory {parent:?}"))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open vector database at {path:?}"))?;
        Self::initialize(conn, embedder, collection_prefix)
    }

    /// In-memory store for tests.
    pub fn open_in_memory(
        embedder: Arc<dyn EmbeddingProvider>,
        collection_prefix: &str,
    ) -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("failed to open in-memory vector database")?;
        Self::initialize(conn, embedder, collection_prefix)
    }

    fn initialize(
        conn: Connection,
        embedder: Arc<dyn EmbeddingProvider>,
        collection_prefix: &str,
    ) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to initialize vector schema")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("failed to set busy timeout")?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            collection_prefix: collection_prefix.to_string(),
            monitor: Mutex::new(HashMap::new()),
        })
    }

    /// Collection name for a workspace: `<prefix><workspace_id>`.
    pub fn collection_name(&self, workspace_id: &str) -> String {
        format!("{}{}", self.collection_prefix, workspace_id)
    }

    /// Add chunks to a workspace collection.
    ///
    /// Rows with the same IDs and rows from the same source files are
    /// removed in the same transaction before insertion, so re-adding a
    /// document replaces it entirely even when it shrank.
    pub fn add_chunks(
        &self,
        workspace_id: &str,
        texts: &[String],
        metadatas: &[ChunkMetadata],
        ids: &[String],
    ) -> Result<()> {
        if texts.len() != metadatas.len() || texts.len() != ids.len() {
            return Err(anyhow!(
                "mismatched chunk arrays: {} texts, {} metadatas, {} ids",
                texts.len(),
                metadatas.len(),
                ids.len()
            ));
        }
        if texts.is_empty() {
            return Ok(());
        }

        // Embed outside the connection lock
        let embeddings = self.embedder.embed_documents(texts)?;
        let collection = self.collection_name(workspace_id);

        let mut conn = self.lock_conn()?;
        let tx = conn.transaction().context("failed to begin transaction")?;
        for id in ids {
            tx.execute(
                "DELETE FROM vector_chunks WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )
            .context("failed to delete chunk by id")?;
        }
        let mut file_paths: Vec<&str> = metadatas.iter().map(|m| m.file_path.as_str()).collect();
        file_paths.sort_unstable();
        file_paths.dedup();
        for file_path in file_paths {
            tx.execute(
                "DELETE FROM vector_chunks WHERE collection = ?1 AND file_path = ?2",
                params![collection, file_path],
            )
            .context("failed to delete stale chunks by file path")?;
        }
        for ((text, meta), (id, embedding)) in texts
            .iter()
            .zip(metadatas.iter())
            .zip(ids.iter().zip(embeddings.iter()))
        {
            tx.execute(
                "INSERT INTO vector_chunks
                     (collection, id, chunk_text, embedding, file_path, workspace_id,
                      importance_level, chunk_index, created_at, modified_at, file_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    collection,
                    id,
                    text,
                    encode_embedding(embedding),
                    meta.file_path,
                    meta.workspace_id,
                    meta.importance_level.as_str(),
                    meta.chunk_index,
                    meta.created_at.to_rfc3339(),
                    meta.modified_at.to_rfc3339(),
                    meta.file_type,
                ],
            )
            .context("failed to insert chunk")?;
        }
        tx.commit().context("failed to commit chunk insert")?;
        drop(conn);

        debug!(collection, added = texts.len(), "added chunks");
        self.refresh_count(workspace_id)?;
        Ok(())
    }

    /// Query a workspace collection, returning up to `n_results` matches
    /// by ascending cosine distance.
    pub fn query(
        &self,
        workspace_id: &str,
        query_text: &str,
        n_results: usize,
    ) -> Result<Vec<QueryMatch>> {
        let query_embedding = self.embedder.embed_query(query_text)?;
        let collection = self.collection_name(workspace_id);

        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, chunk_text, embedding, file_path, workspace_id,
                        importance_level, chunk_index, created_at, modified_at, file_type
                 FROM vector_chunks WHERE collection = ?1",
            )
            .context("failed to prepare query")?;
        let rows = stmt
            .query_map(params![collection], row_to_stored_chunk)
            .context("failed to query chunks")?;

        let mut matches = Vec::new();
        for row in rows {
            let mut chunk = row.context("failed to read chunk row")?;
            let embedding = decode_embedding(&chunk.embedding);
            let distance = 1.0 - cosine_similarity(&query_embedding, &embedding);
            let id = std::mem::take(&mut chunk.id);
            let content = std::mem::take(&mut chunk.chunk_text);
            matches.push(QueryMatch {
                id,
                content,
                metadata: chunk.try_into_metadata()?,
                distance,
            });
        }
        drop(stmt);
        drop(conn);

        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        matches.truncate(n_results);

        let mut monitor = self.lock_monitor()?;
        monitor.entry(collection).or_default().query_count += 1;
        Ok(matches)
    }

    pub fn delete_by_ids(&self, workspace_id: &str, ids: &[String]) -> Result<usize> {
        let collection = self.collection_name(workspace_id);
        let mut deleted = 0;
        {
            let conn = self.lock_conn()?;
            for id in ids {
                deleted += conn
                    .execute(
                        "DELETE FROM vector_chunks WHERE collection = ?1 AND id = ?2",
                        params![collection, id],
                    )
                    .context("failed to delete chunk by id")?;
            }
        }
        self.refresh_count(workspace_id)?;
        Ok(deleted)
    }

    /// Delete every chunk originating from a source file.
    pub fn delete_by_file_path(&self, workspace_id: &str, file_path: &str) -> Result<usize> {
        let collection = self.collection_name(workspace_id);
        let deleted = {
            let conn = self.lock_conn()?;
            conn.execute(
                "DELETE FROM vector_chunks WHERE collection = ?1 AND file_path = ?2",
                params![collection, file_path],
            )
            .context("failed to delete chunks by file path")?
        };
        self.refresh_count(workspace_id)?;
        Ok(deleted)
    }

    pub fn chunk_count(&self, workspace_id: &str) -> Result<usize> {
        let collection = self.collection_name(workspace_id);
        let conn = self.lock_conn()?;
        let count: usize = conn
            .query_row(
                "SELECT COUNT(*) FROM vector_chunks WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )
            .context("failed to count chunks")?;
        Ok(count)
    }

    /// Usage counters per collection.
    pub fn stats(&self) -> Result<Vec<(String, CollectionStats)>> {
        let monitor = self.lock_monitor()?;
        let mut stats: Vec<_> = monitor.iter().map(|(k, v)| (k.clone(), *v)).collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(stats)
    }

    fn refresh_count(&self, workspace_id: &str) -> Result<()> {
        let count = self.chunk_count(workspace_id)?;
        let collection = self.collection_name(workspace_id);
        let mut monitor = self.lock_monitor()?;
        monitor.entry(collection).or_default().chunk_count = count;
        Ok(())
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("vector store connection lock poisoned"))
    }

    fn lock_monitor(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CollectionStats>>> {
        self.monitor
            .lock()
            .map_err(|_| anyhow!("vector store monitor lock poisoned"))
    }
}

/// Raw stored chunk row
struct StoredChunk {
    id: String,
    chunk_text: String,
    embedding: Vec<u8>,
    file_path: String,
    workspace_id: String,
    importance_level: String,
    chunk_index: usize,
    created_at: String,
    modified_at: String,
    file_type: Option<String>,
}

impl StoredChunk {
    fn try_into_metadata(self) -> Result<ChunkMetadata> {
        Ok(ChunkMetadata {
            file_path: self.file_path,
            workspace_id: self.workspace_id,
            importance_level: ImportanceLevel::parse(&self.importance_level)
                .ok_or_else(|| anyhow!("unknown importance level: {}", self.importance_level))?,
            chunk_index: self.chunk_index,
            created_at: parse_timestamp(&self.created_at)?,
            modified_at: parse_timestamp(&self.modified_at)?,
            file_type: self.file_type,
        })
    }
}

fn row_to_stored_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredChunk> {
    Ok(StoredChunk {
        id: row.get(0)?,
        chunk_text: row.get(1)?,
        embedding: row.get(2)?,
        file_path: row.get(3)?,
        workspace_id: row.get(4)?,
        importance_level: row.get(5)?,
        chunk_index: row.get(6)?,
        created_at: row.get(7)?,
        modified_at: row.get(8)?,
        file_type: row.get(9)?,
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp in vector store: {s}"))
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap_or([0; 4])))
        .collect()
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;

    fn store() -> VectorStoreManager {
        VectorStoreManager::open_in_memory(Arc::new(MockEmbedding::new(32)), "workspace_").unwrap()
    }

    fn metadata(file_path: &str, index: usize) -> ChunkMetadata {
        let now = Utc::now();
        ChunkMetadata {
            file_path: file_path.to_string(),
            workspace_id: "ws".to_string(),
            importance_level: ImportanceLevel::Medium,
            chunk_index: index,
            created_at: now,
            modified_at: now,
            file_type: Some("txt".to_string()),
        }
    }

    fn add_file(store: &VectorStoreManager, file_path: &str, chunks: &[&str]) {
        let texts: Vec<String> = chunks.iter().map(|s| s.to_string()).collect();
        let metadatas: Vec<ChunkMetadata> = (0..chunks.len()).map(|i| metadata(file_path, i)).collect();
        let ids: Vec<String> = (0..chunks.len()).map(|i| format!("ws_{file_path}_{i}")).collect();
        store.add_chunks("ws", &texts, &metadatas, &ids).unwrap();
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-9);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let original = vec![0.5f32, -1.25, 3.75, 0.0];
        assert_eq!(decode_embedding(&encode_embedding(&original)), original);
    }

    #[test]
    fn test_query_identical_text_ranks_first() {
        let s = store();
        add_file(&s, "/a.txt", &["the quick brown fox", "lorem ipsum dolor"]);

        let matches = s.query("ws", "the quick brown fox", 2).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].content, "the quick brown fox");
        // Identical text embeds identically with the mock provider
        assert!(matches[0].distance.abs() < 1e-6);
        assert!(matches[0].distance <= matches[1].distance);
    }

    #[test]
    fn test_query_match_carries_id_content_and_metadata() {
        let s = store();
        add_file(&s, "/a.txt", &["only chunk"]);

        let matches = s.query("ws", "only chunk", 1).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "ws_/a.txt_0");
        assert_eq!(matches[0].content, "only chunk");
        assert_eq!(matches[0].metadata.file_path, "/a.txt");
        assert_eq!(matches[0].metadata.workspace_id, "ws");
        assert_eq!(matches[0].metadata.importance_level, ImportanceLevel::Medium);
    }

    #[test]
    fn test_readd_shrunk_file_removes_stale_chunks() {
        let s = store();
        add_file(&s, "/doc.txt", &["c0", "c1", "c2", "c3", "c4"]);
        assert_eq!(s.chunk_count("ws").unwrap(), 5);

        add_file(&s, "/doc.txt", &["c0 rewritten", "c1 rewritten"]);
        assert_eq!(s.chunk_count("ws").unwrap(), 2);
    }

    #[test]
    fn test_collections_are_isolated() {
        let s = store();
        add_file(&s, "/a.txt", &["alpha"]);

        let texts = vec!["beta".to_string()];
        let mut meta = metadata("/b.txt", 0);
        meta.workspace_id = "other".to_string();
        s.add_chunks("other", &texts, &[meta], &["other_b_0".to_string()])
            .unwrap();

        assert_eq!(s.chunk_count("ws").unwrap(), 1);
        assert_eq!(s.chunk_count("other").unwrap(), 1);
        assert!(s.query("other", "alpha", 10).unwrap().iter().all(|m| m.content != "alpha"));
    }

    #[test]
    fn test_delete_by_file_path() {
        let s = store();
        add_file(&s, "/a.txt", &["one", "two"]);
        add_file(&s, "/b.txt", &["three"]);

        let deleted = s.delete_by_file_path("ws", "/a.txt").unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(s.chunk_count("ws").unwrap(), 1);
        assert_eq!(s.delete_by_file_path("ws", "/missing.txt").unwrap(), 0);
    }

    #[test]
    fn test_monitor_counters() {
        let s = store();
        add_file(&s, "/a.txt", &["one", "two"]);
        s.query("ws", "one", 1).unwrap();
        s.query("ws", "two", 1).unwrap();

        let stats = s.stats().unwrap();
        let (name, collection_stats) = &stats[0];
        assert_eq!(name, "workspace_ws");
        assert_eq!(collection_stats.chunk_count, 2);
        assert_eq!(collection_stats.query_count, 2);
    }

    #[test]
    fn test_mismatched_arrays_rejected() {
        let s = store();
        let err = s
            .add_chunks("ws", &["text".to_string()], &[], &[])
            .unwrap_err();
        assert!(err.to_string().contains("mismatched"));
    }
}
