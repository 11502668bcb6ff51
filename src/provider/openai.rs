//! OpenAI and Azure OpenAI HTTP clients.
//!
//! One [`OpenAiClient`] holds the connection, credentials and retry policy;
//! [`OpenAiChat`] and [`OpenAiEmbeddings`] share it and implement the
//! provider traits.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{ChatModel, Embedder};
use crate::error::RagError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Where requests go and how models are addressed.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// `{base_url}/chat/completions`, model in the request body.
    OpenAi { base_url: String },
    /// `{endpoint}/openai/deployments/{model}/...?api-version=`, model in the path.
    Azure {
        endpoint: String,
        api_version: String,
    },
}

pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: Endpoint,
    api_key: String,
    max_retries: u32,
    backoff_base: Duration,
}

impl OpenAiClient {
    pub fn new(
        endpoint: Endpoint,
        api_key: String,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            api_key,
            max_retries,
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Replace the 1s base delay between retries.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn label(&self) -> &'static str {
        match self.endpoint {
            Endpoint::OpenAi { .. } => "OpenAI",
            Endpoint::Azure { .. } => "Azure OpenAI",
        }
    }

    fn url(&self, model: &str, operation: &str) -> String {
        match &self.endpoint {
            Endpoint::OpenAi { base_url } => {
                format!("{}/{}", base_url.trim_end_matches('/'), operation)
            }
            Endpoint::Azure {
                endpoint,
                api_version,
            } => format!(
                "{}/openai/deployments/{}/{}?api-version={}",
                endpoint.trim_end_matches('/'),
                model,
                operation,
                api_version
            ),
        }
    }

    /// Azure addresses the model through the deployment path instead.
    fn body_model<'a>(&self, model: &'a str) -> Option<&'a str> {
        match self.endpoint {
            Endpoint::OpenAi { .. } => Some(model),
            Endpoint::Azure { .. } => None,
        }
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match self.endpoint {
            Endpoint::OpenAi { .. } => req.bearer_auth(&self.api_key),
            Endpoint::Azure { .. } => req.header("api-key", &self.api_key),
        }
    }

    /// POST a JSON body with retry/backoff and decode the JSON response.
    async fn post<B, T>(&self, model: &str, operation: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(model, operation);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = self.backoff_base * (1u32 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying {} request", self.label());
                tokio::time::sleep(delay).await;
            }

            let resp = self.authorize(self.http.post(&url)).json(body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json::<T>().await?);
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%status, "{} request failed, will retry", self.label());
                        last_err = Some(anyhow::anyhow!(
                            "{} API error {}: {}",
                            self.label(),
                            status,
                            body_text
                        ));
                        continue;
                    }

                    return Err(RagError::Provider(format!(
                        "{} API error {}: {}",
                        self.label(),
                        status,
                        body_text
                    ))
                    .into());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "{} request failed, will retry", self.label());
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", self.label())))
    }
}

// ============ Chat ============

pub struct OpenAiChat {
    client: Arc<OpenAiClient>,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(client: Arc<OpenAiClient>, model: &str, temperature: f32) -> Self {
        Self {
            client,
            model: model.to_string(),
            temperature,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: self.client.body_model(&self.model),
            temperature: self.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let parsed: ChatResponse = self
            .client
            .post(&self.model, "chat/completions", &body)
            .await?;
        let answer = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| RagError::Provider("chat response contained no message".into()))?;
        Ok(answer.trim().to_string())
    }
}

// ============ Embeddings ============

pub struct OpenAiEmbeddings {
    client: Arc<OpenAiClient>,
    model: String,
    batch_size: usize,
}

impl OpenAiEmbeddings {
    pub fn new(client: Arc<OpenAiClient>, model: &str, batch_size: usize) -> Self {
        Self {
            client,
            model: model.to_string(),
            batch_size: batch_size.max(1),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = EmbeddingRequest {
                model: self.client.body_model(&self.model),
                input: batch,
            };
            let mut parsed: EmbeddingResponse =
                self.client.post(&self.model, "embeddings", &body).await?;
            if parsed.data.len() != batch.len() {
                return Err(RagError::Provider(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    parsed.data.len()
                ))
                .into());
            }
            // Sort by index to ensure order matches input
            parsed.data.sort_by_key(|d| d.index);
            out.extend(parsed.data.into_iter().map(|d| d.embedding));
        }
        Ok(out)
    }
}
