//! Core data models used throughout the assistant.
//!
//! These types represent the documents, chunks, and citations that flow
//! through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Source metadata carried by every document and chunk.
///
/// `source` is the file path (uploads) or page URL (Confluence), `page` the
/// zero-based PDF page, `url` the remote page URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
}

/// A unit of ingested text produced by the loader.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub text: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

/// A bounded slice of a document's text. The unit stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: Metadata,
    /// Position of this chunk within its parent document.
    pub chunk_index: usize,
}

/// A citation as shown to the user: `{source, page?, url?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl From<&Metadata> for SourceRef {
    fn from(meta: &Metadata) -> Self {
        Self {
            source: meta.source.clone().unwrap_or_default(),
            page: meta.page,
            url: meta.url.clone(),
        }
    }
}

impl SourceRef {
    /// Display line: `- report.pdf (page 3) — https://...`.
    pub fn label(&self) -> String {
        let name = if self.source.is_empty() {
            "doc".to_string()
        } else if self.source.contains("://") {
            self.source.clone()
        } else {
            Path::new(&self.source)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.source.clone())
        };
        let mut label = format!("- {}", name);
        if let Some(page) = self.page {
            label.push_str(&format!(" (page {})", page));
        }
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            label.push_str(&format!(" — {}", url));
        }
        label
    }
}
