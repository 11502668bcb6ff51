//! Configuration loading.
//!
//! Settings come from an optional TOML file, then environment variables,
//! then CLI flags (applied by the binary). Secrets (API keys, Confluence
//! tokens) are only ever read from the environment.
//!
//! ```toml
//! [index]
//! path = "data/vectorstore"
//!
//! [chunking]
//! chunk_size = 1200
//! chunk_overlap = 150
//!
//! [retrieval]
//! top_k = 5
//!
//! [provider]
//! backend = "openai"            # or "azure"
//! chat_model = "gpt-3.5-turbo"
//! embedding_model = "text-embedding-ada-002"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::error::RagError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("data/vectorstore")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

/// Which API family serves the chat and embedding models.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// api.openai.com (or a compatible base URL), models addressed by name.
    #[default]
    OpenAi,
    /// Azure OpenAI, models addressed by deployment name.
    Azure,
}

impl FromStr for Backend {
    type Err = RagError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Backend::OpenAi),
            "azure" | "azure openai" | "azure-openai" => Ok(Backend::Azure),
            other => Err(RagError::config(format!(
                "unknown provider backend '{}'. Must be openai or azure.",
                other
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::OpenAi => write!(f, "OpenAI"),
            Backend::Azure => write!(f, "Azure OpenAI"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Overrides `https://api.openai.com/v1` for the OpenAI backend.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            temperature: 0.0,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            base_url: None,
            api_version: default_api_version(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_api_version() -> String {
    "2024-08-01-preview".to_string()
}

/// Confluence connection settings. Read from the environment only when an
/// ingest command needs them, so a missing token never blocks startup.
#[derive(Debug, Clone, Default)]
pub struct ConfluenceConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub api_token: Option<String>,
}

/// Validated Confluence credentials.
#[derive(Debug, Clone)]
pub struct ConfluenceCredentials {
    pub url: String,
    pub username: String,
    pub api_token: String,
}

impl ConfluenceConfig {
    pub fn from_env() -> Self {
        Self {
            url: non_empty_env("CONFLUENCE_URL"),
            username: non_empty_env("CONFLUENCE_USERNAME"),
            api_token: non_empty_env("CONFLUENCE_API_TOKEN"),
        }
    }

    pub fn credentials(&self) -> Result<ConfluenceCredentials> {
        match (&self.url, &self.username, &self.api_token) {
            (Some(url), Some(username), Some(api_token)) => Ok(ConfluenceCredentials {
                url: url.trim_end_matches('/').to_string(),
                username: username.clone(),
                api_token: api_token.clone(),
            }),
            _ => Err(RagError::config(
                "Set CONFLUENCE_URL, CONFLUENCE_USERNAME, and CONFLUENCE_API_TOKEN in your environment.",
            )
            .into()),
        }
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load the file if it exists, fall back to defaults otherwise, then
    /// apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Config> {
        let mut config = if path.exists() {
            load_config_file(path)?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(backend) = non_empty_env("KBA_PROVIDER") {
            self.provider.backend = backend.parse()?;
        }
        if let Some(model) = non_empty_env("OPENAI_MODEL") {
            self.provider.chat_model = model;
        }
        if let Some(model) = non_empty_env("OPENAI_EMBEDDING_MODEL") {
            self.provider.embedding_model = model;
        }
        if let Some(url) = non_empty_env("OPENAI_BASE_URL") {
            self.provider.base_url = Some(url);
        }
        if let Some(version) = non_empty_env("AZURE_OPENAI_API_VERSION") {
            self.provider.api_version = version;
        }
        if let Some(path) = non_empty_env("KBA_INDEX_PATH") {
            self.index.path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(RagError::config("chunking.chunk_size must be > 0").into());
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(
                RagError::config("chunking.chunk_overlap must be < chunking.chunk_size").into(),
            );
        }
        if self.retrieval.top_k < 1 {
            return Err(RagError::config("retrieval.top_k must be >= 1").into());
        }
        if self.provider.batch_size < 1 {
            return Err(RagError::config("provider.batch_size must be >= 1").into());
        }
        if self.index.path.as_os_str().is_empty() {
            return Err(RagError::config("index.path must not be empty").into());
        }
        if self.provider.chat_model.trim().is_empty()
            || self.provider.embedding_model.trim().is_empty()
        {
            return Err(RagError::config("provider model names must not be empty").into());
        }
        Ok(())
    }
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    Ok(config)
}
