//! Answer generation: prompt assembly over retrieved context.
//!
//! [`AnswerGenerator`] exposes the two retrieval-augmented operations:
//!
//! | Operation | Retrieval query | Prompt | Result |
//! |-----------|-----------------|--------|--------|
//! | [`answer`](AnswerGenerator::answer) | the user question | QA prompt | [`Response::Answer`] |
//! | [`summarize`](AnswerGenerator::summarize) | [`SUMMARY_QUERY`] | summary prompt | [`Response::Summary`] |
//!
//! Both are stateless. Retrieved chunks are rendered into one context
//! block, each prefixed by a `[source: ...]` header and separated by a
//! `---` divider. The index's placeholder seed is never used as context;
//! when nothing else is retrieved the model is not called at all.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::index::{SearchHit, VectorIndex};
use crate::models::{Chunk, SourceRef};
use crate::provider::ChatModel;
use crate::retriever::Retriever;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's question using only the provided context.\n\
- If the answer cannot be found in the context, say you don't know.\n\
- Cite the most relevant sources at the end if available.\n\
Keep answers concise but accurate.";

/// Fixed retrieval query used for summaries.
pub const SUMMARY_QUERY: &str = "Comprehensive overview of the corpus";

/// Instruction used when the caller gives none.
pub const DEFAULT_SUMMARY_INSTRUCTION: &str =
    "Provide a concise, well-structured summary with key points and action items.";

pub const NO_CONTEXT_ANSWER: &str =
    "I don't know. The knowledge base does not contain any information about this yet.";

pub const NO_CONTEXT_SUMMARY: &str = "Nothing to summarize: the knowledge base is empty.";

const CONTEXT_DIVIDER: &str = "\n\n---\n\n";

/// Result of a generation call together with the chunks it was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Answer {
        answer: String,
        source_documents: Vec<SourceRef>,
    },
    Summary {
        summary: String,
        source_documents: Vec<SourceRef>,
    },
}

impl Response {
    pub fn text(&self) -> &str {
        match self {
            Response::Answer { answer, .. } => answer,
            Response::Summary { summary, .. } => summary,
        }
    }

    pub fn sources(&self) -> &[SourceRef] {
        match self {
            Response::Answer {
                source_documents, ..
            }
            | Response::Summary {
                source_documents, ..
            } => source_documents,
        }
    }
}

pub struct AnswerGenerator {
    llm: Arc<dyn ChatModel>,
    retriever: Retriever,
}

impl AnswerGenerator {
    pub fn new(llm: Arc<dyn ChatModel>, retriever: Retriever) -> Self {
        Self { llm, retriever }
    }

    /// Answer `question` from the chunks retrieved for it.
    pub async fn answer(&self, index: &VectorIndex, question: &str) -> Result<Response> {
        let chunks = self.context_chunks(index, question).await?;
        if chunks.is_empty() {
            tracing::info!("no indexed content matched, answering without the model");
            return Ok(Response::Answer {
                answer: NO_CONTEXT_ANSWER.to_string(),
                source_documents: Vec::new(),
            });
        }

        let prompt = qa_prompt(question, &format_context(&chunks));
        let answer = self.llm.complete(&prompt).await?;
        Ok(Response::Answer {
            answer,
            source_documents: sources(&chunks),
        })
    }

    /// Summarize the indexed content following `instruction`.
    pub async fn summarize(&self, index: &VectorIndex, instruction: &str) -> Result<Response> {
        let chunks = self.context_chunks(index, SUMMARY_QUERY).await?;
        if chunks.is_empty() {
            return Ok(Response::Summary {
                summary: NO_CONTEXT_SUMMARY.to_string(),
                source_documents: Vec::new(),
            });
        }

        let prompt = summary_prompt(instruction, &format_context(&chunks));
        let summary = self.llm.complete(&prompt).await?;
        Ok(Response::Summary {
            summary,
            source_documents: sources(&chunks),
        })
    }

    async fn context_chunks(&self, index: &VectorIndex, query: &str) -> Result<Vec<Chunk>> {
        let hits = self.retriever.retrieve_content(index, query).await?;
        Ok(hits.into_iter().map(|SearchHit { chunk, .. }| chunk).collect())
    }
}

fn sources(chunks: &[Chunk]) -> Vec<SourceRef> {
    chunks.iter().map(|c| SourceRef::from(&c.metadata)).collect()
}

pub fn qa_prompt(question: &str, context: &str) -> String {
    format!(
        "{}\nQuestion: {}\nContext:\n{}\nAnswer:",
        SYSTEM_PROMPT, question, context
    )
}

pub fn summary_prompt(instruction: &str, context: &str) -> String {
    format!(
        "You are a senior technical writer. Using the retrieved context, write a concise, well-structured summary.\n\
Include:\n\
- Executive summary (3-5 bullets)\n\
- Key details\n\
- Risks/unknowns\n\
- Action items (if any)\n\
Instruction: {}\n\n\
Context:\n\
{}\n\n\
Summary:",
        instruction, context
    )
}

/// Render chunks as `[source: path p.N | url]` headers followed by text,
/// joined by a divider line.
pub fn format_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|chunk| {
            let meta = &chunk.metadata;
            let mut header = format!("[source: {}", meta.source.as_deref().unwrap_or(""));
            if let Some(page) = meta.page {
                header.push_str(&format!(" p.{}", page));
            }
            if let Some(url) = meta.url.as_deref().filter(|u| !u.is_empty()) {
                header.push_str(&format!(" | {}", url));
            }
            header.push(']');
            format!("{}\n{}", header, chunk.text)
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_DIVIDER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn chunk(text: &str, meta: Metadata) -> Chunk {
        Chunk {
            text: text.to_string(),
            metadata: meta,
            chunk_index: 0,
        }
    }

    #[test]
    fn context_headers_and_divider() {
        let chunks = vec![
            chunk(
                "first",
                Metadata {
                    source: Some("docs/a.pdf".into()),
                    page: Some(3),
                    ..Default::default()
                },
            ),
            chunk(
                "second",
                Metadata {
                    source: Some("https://wiki/x".into()),
                    url: Some("https://wiki/x".into()),
                    ..Default::default()
                },
            ),
            chunk("third", Metadata::default()),
        ];
        assert_eq!(
            format_context(&chunks),
            "[source: docs/a.pdf p.3]\nfirst\n\n---\n\n[source: https://wiki/x | https://wiki/x]\nsecond\n\n---\n\n[source: ]\nthird"
        );
    }

    #[test]
    fn qa_prompt_layout() {
        let prompt = qa_prompt("What is X?", "CTX");
        assert!(prompt.starts_with("You are a helpful assistant."));
        assert!(prompt.ends_with("\nQuestion: What is X?\nContext:\nCTX\nAnswer:"));
    }

    #[test]
    fn summary_prompt_carries_instruction() {
        let prompt = summary_prompt("Focus on risks.", "CTX");
        assert!(prompt.contains("- Executive summary (3-5 bullets)\n"));
        assert!(prompt.contains("Instruction: Focus on risks.\n\nContext:\nCTX\n\nSummary:"));
    }

    #[test]
    fn response_serializes_untagged() {
        let r = Response::Summary {
            summary: "S".into(),
            source_documents: vec![SourceRef {
                source: "a.pdf".into(),
                page: Some(1),
                url: None,
            }],
        };
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            serde_json::json!({
                "summary": "S",
                "source_documents": [{ "source": "a.pdf", "page": 1 }]
            })
        );
        assert_eq!(r.text(), "S");
        assert_eq!(r.sources().len(), 1);
    }
}
