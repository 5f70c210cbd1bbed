//! Embedding providers
//!
//! Turns text into vectors for the store and the query handler. Providers
//! are blocking HTTP clients because indexing runs on dedicated threads;
//! the mock provider keeps tests and offline use deterministic.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;

use crate::config::EmbeddingConfig;
use crate::hash::content_hash;

/// Trait for embedding providers
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input, in order.
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_documents(std::slice::from_ref(&text.to_string()))?;
        vectors.pop().ok_or_else(|| anyhow!("provider returned no embedding"))
    }

    /// Embedding dimension.
    fn dimension(&self) -> usize;
}

/// Build a provider from configuration.
pub fn provider_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaEmbedding::new(
            &config.endpoint,
            &config.model,
            config.dimension,
        ))),
        "openai" => Ok(Arc::new(OpenAiEmbedding::new(
            &config.endpoint,
            &config.model,
            config.api_key.as_deref().unwrap_or_default(),
            config.dimension,
        ))),
        "mock" => Ok(Arc::new(MockEmbedding::new(config.dimension))),
        other => Err(anyhow!("unknown embedding provider: {other}")),
    }
}

/// Local embedding via an Ollama server
pub struct OllamaEmbedding {
    endpoint: String,
    model: String,
    dimension: usize,
    client: reqwest::blocking::Client,
}

impl OllamaEmbedding {
    pub fn new(endpoint: &str, model: &str, dimension: usize) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
            client: reqwest::blocking::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct OllamaResponse {
    embedding: Vec<f32>,
}

impl EmbeddingProvider for OllamaEmbedding {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embeddings", self.endpoint);
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let response = self
                .client
                .post(&url)
                .json(&json!({
                    "model": self.model,
                    "prompt": text,
                }))
                .send()
                .with_context(|| format!("failed to reach Ollama at {url}"))?;

            if !response.status().is_success() {
                return Err(anyhow!("Ollama returned status {}", response.status()));
            }
            let body: OllamaResponse = response
                .json()
                .context("failed to parse Ollama embedding response")?;
            vectors.push(body.embedding);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// OpenAI-compatible embedding endpoint
pub struct OpenAiEmbedding {
    endpoint: String,
    model: String,
    api_key: String,
    dimension: usize,
    client: reqwest::blocking::Client,
}

impl OpenAiEmbedding {
    pub fn new(endpoint: &str, model: &str, api_key: &str, dimension: usize) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            dimension,
            client: reqwest::blocking::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl EmbeddingProvider for OpenAiEmbedding {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.endpoint);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .with_context(|| format!("failed to reach embedding endpoint at {url}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("embedding endpoint returned status {}", response.status()));
        }

        let mut body: OpenAiResponse = response
            .json()
            .context("failed to parse embedding response")?;
        // The API may return items out of order
        body.data.sort_by_key(|d| d.index);
        if body.data.len() != texts.len() {
            return Err(anyhow!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.data.len()
            ));
        }
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic embedding derived from a content hash. No network, no
/// model; identical text always produces the identical vector.
pub struct MockEmbedding {
    dimension: usize,
}

impl MockEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl EmbeddingProvider for MockEmbedding {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let digest = content_hash(text);
                let bytes = digest.as_bytes();
                (0..self.dimension)
                    .map(|i| {
                        let b = bytes[i % bytes.len()] as f32;
                        (b / 127.5) - 1.0
                    })
                    .collect()
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
