//! Embedding model wrapper.
//!
//! Chunk content and queries are embedded through one of two backends: a
//! local model loaded via mistralrs, or a remote OpenAI-compatible
//! embeddings endpoint. A mock backend returns dummy vectors for tests.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use mistralrs::{EmbeddingModelBuilder, EmbeddingRequest, Model};

use crate::config::{EmbeddingApi, EmbeddingConfig};

enum Backend {
    Local(Arc<Model>),
    Remote(Client<OpenAIConfig>),
    Mock,
}

/// Text embedding function with a fixed output dimension.
pub struct Embedder {
    backend: Backend,
    model: String,
    /// Vector dimensions produced by this model
    pub dimensions: usize,
}

impl Embedder {
    /// Build the backend selected by `config`.
    pub async fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        match config.api {
            EmbeddingApi::Local => Self::local(&config.model, config.dimensions).await,
            EmbeddingApi::Remote => Ok(Self::remote(&config.model, config.dimensions)),
        }
    }

    /// Load a local embedding model from HuggingFace.
    pub async fn local(hf_repo_id: &str, dimensions: usize) -> Result<Self> {
        tracing::info!("Loading embedding model: {}", hf_repo_id);

        let model = EmbeddingModelBuilder::new(hf_repo_id)
            .with_logging()
            .build()
            .await
            .context("Failed to load embedding model")?;

        tracing::info!("Embedding model loaded: {} ({}D)", hf_repo_id, dimensions);

        Ok(Self {
            backend: Backend::Local(Arc::new(model)),
            model: hf_repo_id.to_string(),
            dimensions,
        })
    }

    /// Use a remote OpenAI-compatible embeddings endpoint.
    ///
    /// The API key is read from `OPENAI_API_KEY`.
    pub fn remote(model: &str, dimensions: usize) -> Self {
        Self {
            backend: Backend::Remote(Client::new()),
            model: model.to_string(),
            dimensions,
        }
    }

    /// Create a mock embedder for testing.
    ///
    /// Returns dummy vectors instead of calling a real model.
    pub fn mock(dimensions: usize) -> Self {
        Self {
            backend: Backend::Mock,
            model: "mock".to_string(),
            dimensions,
        }
    }

    /// Short backend name, part of the collection identity.
    pub fn api_name(&self) -> &'static str {
        match self.backend {
            Backend::Local(_) => "local",
            Backend::Remote(_) => "remote",
            Backend::Mock => "mock",
        }
    }

    /// Model name, part of the collection identity.
    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Embed a single text (for queries).
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            tracing::debug!("Empty text, returning zero vector");
            return Ok(vec![0.0; self.dimensions]);
        }

        match &self.backend {
            Backend::Mock => Ok(vec![0.1; self.dimensions]),
            Backend::Local(model) => {
                let start = std::time::Instant::now();
                let result = model
                    .generate_embedding(text)
                    .await
                    .context("Failed to generate embedding");
                tracing::debug!(
                    elapsed_ms = start.elapsed().as_millis(),
                    "Embedding complete"
                );
                result
            }
            Backend::Remote(_) => {
                let mut vectors = self.embed_batch(&[text.to_string()]).await?;
                vectors
                    .pop()
                    .context("Embeddings endpoint returned no vector")
            }
        }
    }

    /// Batch embed multiple texts.
    ///
    /// More efficient than calling `embed()` per text. An error means no
    /// vector was produced for any input.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        tracing::debug!(batch_size = texts.len(), "Embedding batch");
        let start = std::time::Instant::now();

        let result = match &self.backend {
            Backend::Mock => Ok(texts.iter().map(|_| vec![0.1; self.dimensions]).collect()),
            Backend::Local(model) => {
                let request =
                    EmbeddingRequest::builder().add_prompts(texts.iter().map(|s| s.to_string()));
                model
                    .generate_embeddings(request)
                    .await
                    .context("Failed to generate batch embeddings")
            }
            Backend::Remote(client) => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(&self.model)
                    .input(texts.to_vec())
                    .build()
                    .context("Failed to build embeddings request")?;
                let response = client
                    .embeddings()
                    .create(request)
                    .await
                    .context("Embeddings request failed")?;
                Ok(response.data.into_iter().map(|d| d.embedding).collect())
            }
        };

        tracing::debug!(
            batch_size = texts.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Batch embedding complete"
        );

        result
    }
}
