//! Top-K retrieval over the vector index.

use anyhow::Result;

use crate::index::{SearchHit, VectorIndex};

/// Query embedding search with a fixed result count.
#[derive(Debug, Clone, Copy)]
pub struct Retriever {
    k: usize,
}

impl Retriever {
    /// Any `k` is accepted here; the CLI bounds it to 2..=15.
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// The `k` chunks closest to `query`, closest first, each with its
    /// original metadata. `k = 0` returns nothing without embedding.
    pub async fn retrieve(&self, index: &VectorIndex, query: &str) -> Result<Vec<SearchHit>> {
        let hits = index.search(query, self.k).await?;
        tracing::debug!(k = self.k, hits = hits.len(), "retrieved chunks");
        Ok(hits)
    }

    /// Like [`retrieve`](Self::retrieve), but the index's placeholder seed
    /// never takes one of the `k` slots.
    pub async fn retrieve_content(&self, index: &VectorIndex, query: &str) -> Result<Vec<SearchHit>> {
        if self.k == 0 {
            return Ok(Vec::new());
        }
        // A fresh index holds exactly one placeholder.
        let mut hits = index.search(query, self.k.saturating_add(1)).await?;
        hits.retain(|hit| !hit.placeholder);
        hits.truncate(self.k);
        tracing::debug!(k = self.k, hits = hits.len(), "retrieved content chunks");
        Ok(hits)
    }
}
