//! Ragline - local document watching and retrieval pipeline
//!
//! Watches workspace directories for document changes, tracks every file
//! through a pending → processed/error/deleted lifecycle in SQLite,
//! indexes extracted text into an embedded vector store, and answers
//! similarity queries that can be injected as context into downstream
//! prompts.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod hash;
pub mod rag;
pub mod tracker;
pub mod vector;
pub mod watcher;

pub use config::AppConfig;
pub use embedding::{EmbeddingProvider, MockEmbedding};
pub use extract::{DocumentHandler, ExtractError, HandlerRegistry};
pub use rag::{DocumentPipeline, MessageProcessor, RagConfig, RagEnhancer, RagMiddleware, RagQueryHandler};
pub use tracker::{DocumentStatus, DocumentTracker};
pub use vector::{ImportanceLevel, VectorStoreManager};
pub use watcher::{ChangeProcessor, WorkspaceWatcher, WorkspaceWatcherManager};

/// Version of ragline
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "ragline";
