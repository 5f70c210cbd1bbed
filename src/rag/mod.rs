//! Retrieval-augmented generation layer
//!
//! Chunking, document indexing, similarity queries, and prompt
//! enhancement over the vector store.

mod chunker;
mod enhancer;
mod middleware;
mod pipeline;
mod query;

pub use chunker::TextChunker;
pub use enhancer::{MessageProcessor, RagEnhancer, RagInteraction};
pub use middleware::{format_context, RagConfig, RagMiddleware, DEFAULT_CONTEXT_TEMPLATE};
pub use pipeline::{DocumentPipeline, ProcessOutcome};
pub use query::{RagQueryHandler, RagResult};
