//! Configuration
//!
//! TOML config with serde defaults for every field, so a missing or
//! partial file always yields a usable configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Watched workspaces, keyed by workspace id
    #[serde(default)]
    pub workspaces: BTreeMap<String, WorkspaceConfig>,

    /// Directory holding the tracking and vector databases
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Collection name prefix in the vector store
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,

    /// Maximum file size handled by extractors, in megabytes
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Background processor poll interval, in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// One watched workspace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root directories watched for this workspace
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results returned per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum similarity for a result to survive filtering
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider: "ollama", "openai", or "mock"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ragline")
}

fn default_collection_prefix() -> String {
    "workspace_".to_string()
}

fn default_max_file_size_mb() -> u64 {
    10
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_chunk_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_top_k() -> usize {
    3
}

fn default_similarity_threshold() -> f64 {
    0.7
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}

fn default_embedding_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_dimension() -> usize {
    768
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspaces: BTreeMap::new(),
            data_dir: default_data_dir(),
            collection_prefix: default_collection_prefix(),
            max_file_size_mb: default_max_file_size_mb(),
            poll_interval_secs: default_poll_interval_secs(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            api_key: None,
            dimension: default_embedding_dimension(),
        }
    }
}

impl AppConfig {
    /// Load configuration, falling back to defaults if the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read config from {path:?}"))?;
            toml::from_str(&content).with_context(|| format!("failed to parse config at {path:?}"))
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory {parent:?}"))?;
        }
        fs::write(path, content).with_context(|| format!("failed to write config to {path:?}"))
    }

    pub fn tracking_db_path(&self) -> PathBuf {
        self.data_dir.join("tracking.db")
    }

    pub fn vector_db_path(&self) -> PathBuf {
        self.data_dir.join("vectors.db")
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}
