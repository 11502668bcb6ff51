//! Model provider abstraction.
//!
//! Defines the [`ChatModel`] and [`Embedder`] traits and [`ProviderSettings`],
//! the pair of live handles the rest of the pipeline talks to. Concrete
//! implementations live in [`openai`] and cover both backends:
//!
//! | Backend | Chat | Embeddings | Credentials |
//! |---------|------|------------|-------------|
//! | [`Backend::OpenAi`] | `POST /v1/chat/completions` | `POST /v1/embeddings` | `OPENAI_API_KEY` |
//! | [`Backend::Azure`] | deployment `chat/completions` | deployment `embeddings` | `AZURE_OPENAI_API_KEY`, `AZURE_OPENAI_ENDPOINT` |
//!
//! # Retry Strategy
//!
//! Both clients use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{non_empty_env, Backend, ProviderConfig};
use crate::error::RagError;

use openai::{Endpoint, OpenAiChat, OpenAiClient, OpenAiEmbeddings};

/// A language model that turns a prompt into text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model or deployment identifier (e.g. `"gpt-3.5-turbo"`).
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// A text embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model or deployment identifier (e.g. `"text-embedding-ada-002"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input, in order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// The backend selector, model identifiers, and live model handles.
///
/// Built once per session and shared; never mutated afterwards.
#[derive(Clone)]
pub struct ProviderSettings {
    pub backend: Backend,
    pub chat_model: String,
    pub embed_model: String,
    pub llm: Arc<dyn ChatModel>,
    pub embedder: Arc<dyn Embedder>,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("backend", &self.backend)
            .field("chat_model", &self.chat_model)
            .field("embed_model", &self.embed_model)
            .finish_non_exhaustive()
    }
}

impl ProviderSettings {
    /// Wrap existing handles. Model identifiers are taken from the handles.
    pub fn new(backend: Backend, llm: Arc<dyn ChatModel>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            backend,
            chat_model: llm.model_name().to_string(),
            embed_model: embedder.model_name().to_string(),
            llm,
            embedder,
        }
    }

    /// Build HTTP-backed handles for the configured backend.
    ///
    /// # Errors
    ///
    /// [`RagError::Config`] when the backend's credentials are missing from
    /// the environment. No network call is made here.
    pub fn from_env(config: &ProviderConfig) -> Result<Self> {
        let (endpoint, api_key) = match config.backend {
            Backend::OpenAi => {
                let key = non_empty_env("OPENAI_API_KEY")
                    .ok_or_else(|| RagError::config("OPENAI_API_KEY environment variable not set"))?;
                let base_url = config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| openai::DEFAULT_BASE_URL.to_string());
                (Endpoint::OpenAi { base_url }, key)
            }
            Backend::Azure => {
                let key = non_empty_env("AZURE_OPENAI_API_KEY").ok_or_else(|| {
                    RagError::config("AZURE_OPENAI_API_KEY environment variable not set")
                })?;
                let endpoint = non_empty_env("AZURE_OPENAI_ENDPOINT").ok_or_else(|| {
                    RagError::config("AZURE_OPENAI_ENDPOINT environment variable not set")
                })?;
                (
                    Endpoint::Azure {
                        endpoint,
                        api_version: config.api_version.clone(),
                    },
                    key,
                )
            }
        };

        let client = Arc::new(OpenAiClient::new(
            endpoint,
            api_key,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?);
        let llm = OpenAiChat::new(client.clone(), &config.chat_model, config.temperature);
        let embedder = OpenAiEmbeddings::new(client, &config.embedding_model, config.batch_size);

        tracing::debug!(
            backend = %config.backend,
            chat_model = %config.chat_model,
            embedding_model = %config.embedding_model,
            "provider configured"
        );

        Ok(Self::new(config.backend, Arc::new(llm), Arc::new(embedder)))
    }
}
