//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow: loader / connector → chunking → embedding →
//! index → persist.
//!
//! | Entry point | Input | Failure before any indexing |
//! |-------------|-------|-----------------------------|
//! | [`ingest_files`] | local paths | unsupported extension, unreadable file |
//! | [`ingest_space`] | Confluence space key + optional CQL | missing credentials |
//! | [`ingest_pages`] | Confluence page ids / URLs | missing credentials |
//!
//! Every entry point returns the number of chunks added. A batch that
//! produces no chunks returns 0 and leaves the index untouched. Persisting
//! after an add is best-effort: a failed save is logged and the in-memory
//! count is still reported.

use anyhow::Result;
use std::path::PathBuf;

use crate::chunk::Chunker;
use crate::config::{Config, ConfluenceConfig, ConfluenceCredentials};
use crate::confluence::{ConfluenceClient, PageSource};
use crate::error::RagError;
use crate::index::{IndexMode, VectorIndex};
use crate::loader;
use crate::models::Document;
use crate::provider::ProviderSettings;

/// Load, chunk, and index local files.
///
/// Every path is checked before anything is loaded, so one unsupported
/// file aborts the whole batch with the index unchanged.
pub async fn ingest_files(
    paths: &[PathBuf],
    index: &mut VectorIndex,
    chunker: &Chunker,
) -> Result<usize> {
    for path in paths {
        loader::check_supported(path)?;
    }

    let mut docs = Vec::new();
    for path in paths {
        docs.extend(loader::load_file(path)?);
    }
    tracing::info!(files = paths.len(), documents = docs.len(), "loaded files");
    add_documents(docs, index, chunker).await
}

/// Index every page of a Confluence space.
///
/// Credentials are validated before `connect` is called, so a missing
/// setting never reaches the network.
pub async fn ingest_space<F, S>(
    confluence: &ConfluenceConfig,
    connect: F,
    space_key: &str,
    cql: Option<&str>,
    index: &mut VectorIndex,
    chunker: &Chunker,
) -> Result<usize>
where
    F: FnOnce(ConfluenceCredentials) -> Result<S>,
    S: PageSource,
{
    let creds = confluence.credentials()?;
    if space_key.trim().is_empty() {
        return Err(RagError::config("a Confluence space key is required").into());
    }
    let source = connect(creds)?;
    let docs = source.space_pages(space_key.trim(), cql).await?;
    tracing::info!(space = space_key, documents = docs.len(), "fetched Confluence space");
    add_documents(docs, index, chunker).await
}

/// Index specific Confluence pages.
pub async fn ingest_pages<F, S>(
    confluence: &ConfluenceConfig,
    connect: F,
    ids_or_urls: &[String],
    index: &mut VectorIndex,
    chunker: &Chunker,
) -> Result<usize>
where
    F: FnOnce(ConfluenceCredentials) -> Result<S>,
    S: PageSource,
{
    let creds = confluence.credentials()?;
    if ids_or_urls.is_empty() {
        return Err(RagError::config("at least one Confluence page id or URL is required").into());
    }
    let source = connect(creds)?;
    let docs = source.pages(ids_or_urls).await?;
    tracing::info!(documents = docs.len(), "fetched Confluence pages");
    add_documents(docs, index, chunker).await
}

/// Chunk `docs`, add the chunks to `index`, and persist it.
pub async fn add_documents(
    docs: Vec<Document>,
    index: &mut VectorIndex,
    chunker: &Chunker,
) -> Result<usize> {
    let chunks = chunker.split_documents(&docs);
    if chunks.is_empty() {
        tracing::info!("no chunks produced, index unchanged");
        return Ok(0);
    }

    let added = index.add(chunks).await?;

    if let Some(path) = index.path() {
        if let Err(e) = index.persist(path) {
            tracing::warn!(
                path = %path.display(),
                error = %format!("{:#}", e),
                "failed to persist vector index, changes are kept in memory only"
            );
        }
    }

    tracing::info!(added, total = index.len(), "indexed chunks");
    Ok(added)
}

// ============ CLI handlers ============

pub async fn run_ingest(config: &Config, mode: IndexMode, inputs: &[PathBuf]) -> Result<()> {
    let files = loader::expand_inputs(inputs)?;
    for file in &files {
        loader::check_supported(file)?;
    }
    if files.is_empty() {
        println!("No supported files found.");
        return Ok(());
    }

    let chunker = Chunker::from_config(&config.chunking)?;
    let settings = ProviderSettings::from_env(&config.provider)?;
    let mut index = VectorIndex::open(&settings, mode).await?;

    let count = ingest_files(&files, &mut index, &chunker).await?;
    println!("Ingested {} chunks from {} file(s).", count, files.len());
    Ok(())
}

pub async fn run_confluence_space(
    config: &Config,
    mode: IndexMode,
    space_key: &str,
    cql: Option<&str>,
) -> Result<()> {
    let confluence = ConfluenceConfig::from_env();
    confluence.credentials()?;

    let chunker = Chunker::from_config(&config.chunking)?;
    let settings = ProviderSettings::from_env(&config.provider)?;
    let mut index = VectorIndex::open(&settings, mode).await?;

    let count = ingest_space(
        &confluence,
        ConfluenceClient::new,
        space_key,
        cql,
        &mut index,
        &chunker,
    )
    .await?;
    println!("Ingested {} Confluence page chunks.", count);
    Ok(())
}

pub async fn run_confluence_pages(config: &Config, mode: IndexMode, pages: &[String]) -> Result<()> {
    let confluence = ConfluenceConfig::from_env();
    confluence.credentials()?;

    let chunker = Chunker::from_config(&config.chunking)?;
    let settings = ProviderSettings::from_env(&config.provider)?;
    let mut index = VectorIndex::open(&settings, mode).await?;

    let count = ingest_pages(&confluence, ConfluenceClient::new, pages, &mut index, &chunker).await?;
    println!("Ingested {} Confluence page chunks.", count);
    Ok(())
}
