//! Error taxonomy for the assistant.
//!
//! Most functions return [`anyhow::Result`]. Failures whose kind matters to
//! the caller (fail-fast configuration problems, rejected uploads) are raised
//! as a [`RagError`] inside the `anyhow::Error`, so they can be recovered with
//! `err.downcast_ref::<RagError>()`.
//!
//! Index load failures and index persist failures never surface here: the
//! index falls back to a fresh state and ingestion swallows save errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Missing credentials, missing paths, or invalid settings.
    #[error("configuration error: {0}")]
    Config(String),

    /// The file extension is not one the loader understands.
    #[error("Unsupported file type: {extension}")]
    UnsupportedFormat { extension: String },

    /// A supported file could not be parsed.
    #[error("failed to extract text from {path}: {message}")]
    Extract { path: String, message: String },

    /// A model API rejected the request and retrying will not help.
    #[error("model provider error: {0}")]
    Provider(String),

    /// The index cannot accept the requested change.
    #[error("vector index error: {0}")]
    Index(String),
}

impl RagError {
    pub fn config(msg: impl Into<String>) -> Self {
        RagError::Config(msg.into())
    }

    /// True for errors the user should fix before retrying anything.
    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            RagError::Config(_) | RagError::UnsupportedFormat { .. }
        )
    }
}
