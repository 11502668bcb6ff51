//! # kb-assistant
//!
//! A retrieval-augmented knowledge-base assistant.
//!
//! Documents (PDF, Word, PowerPoint, plain text) and Confluence pages are
//! split into overlapping chunks, embedded, and stored in a local vector
//! index. Questions and summary requests retrieve the closest chunks and
//! ask a language model (OpenAI or Azure OpenAI) to answer from them, with
//! citations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Loader /    │──▶│  Chunk +    │──▶│ Vector index │
//! │ Confluence  │   │  Embed      │   │ json + vec   │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │ top-k
//!                                            ▼
//!                    ┌──────────┐      ┌───────────┐
//!                    │   CLI    │◀─────│ Generator │
//!                    │  (kba)   │      │  QA / sum │
//!                    └──────────┘      └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kba ingest docs/                       # index local files
//! kba confluence space ENG               # index a Confluence space
//! kba ask "How do we rotate keys?"
//! kba chat
//! kba summarize --file report.pdf
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Documents, chunks, citations |
//! | [`extract`] | PDF / DOCX / PPTX text extraction |
//! | [`loader`] | File → documents |
//! | [`confluence`] | Confluence REST connector |
//! | [`chunk`] | Recursive character splitter |
//! | [`provider`] | Chat and embedding model clients |
//! | [`index`] | Vector index lifecycle and persistence |
//! | [`retriever`] | Top-k retrieval |
//! | [`generate`] | Answer and summary generation |
//! | [`history`] | Conversation log |
//! | [`ingest`] | Ingestion pipeline |
//! | [`chat`] | Ask / chat / summarize commands |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod confluence;
pub mod error;
pub mod extract;
pub mod generate;
pub mod history;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod provider;
pub mod retriever;
