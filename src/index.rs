//! Vector index: chunk storage, lifecycle, and nearest-neighbour search.
//!
//! The index keeps every chunk together with its embedding and answers
//! k-nearest-neighbour queries by brute-force squared Euclidean distance
//! (smaller = closer). A fresh index is always seeded with one placeholder
//! entry so that it is never empty.
//!
//! # Lifecycle
//!
//! [`VectorIndex::open`] takes an [`IndexMode`]:
//!
//! | Mode | Behaviour | Fallback |
//! |------|-----------|----------|
//! | [`IndexMode::Load`] | read the index persisted at the path | fresh index if missing or unreadable |
//! | [`IndexMode::Recreate`] | fresh index bound to the path | none |
//! | [`IndexMode::Ephemeral`] | fresh index, never persisted | none |
//!
//! # On-disk format
//!
//! ```text
//! <path>/index.json   sidecar: version, model, dims, checksum, entries
//! <path>/index.vec    row-major little-endian f32 vectors
//! ```
//!
//! No locking is performed: two processes writing the same path can
//! corrupt it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::RagError;
use crate::models::{Chunk, Metadata};
use crate::provider::{Embedder, ProviderSettings};

/// Text of the seed entry every fresh index starts with.
pub const PLACEHOLDER_TEXT: &str = "Initialization vector";

const FORMAT_VERSION: u32 = 1;
const SIDECAR_FILE: &str = "index.json";
const VECTORS_FILE: &str = "index.vec";

/// How [`VectorIndex::open`] obtains its index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexMode {
    /// Load the index persisted at this path, or start fresh there.
    Load(PathBuf),
    /// Start fresh at this path. Old files are replaced on the next persist.
    Recreate(PathBuf),
    /// Start fresh in memory; persisting is never attempted.
    Ephemeral,
}

/// A stored chunk. Its embedding lives in the index's vector table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub chunk: Chunk,
    #[serde(default)]
    pub placeholder: bool,
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub distance: f32,
    pub placeholder: bool,
}

#[derive(Serialize, Deserialize)]
struct Sidecar {
    version: u32,
    embedding_model: String,
    dims: usize,
    vectors_sha256: String,
    saved_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    path: Option<PathBuf>,
    dims: usize,
    entries: Vec<IndexEntry>,
    /// Row-major, `entries.len() * dims` values.
    vectors: Vec<f32>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("path", &self.path)
            .field("dims", &self.dims)
            .field("len", &self.entries.len())
            .finish()
    }
}

impl VectorIndex {
    /// Open an index according to `mode`.
    ///
    /// Load failures never surface: a missing index is logged at info
    /// level, an unreadable one (corrupt files, checksum or dimension
    /// mismatch, different embedding model) at warn level, and both fall
    /// back to a fresh index. Errors only come from embedding the seed.
    pub async fn open(settings: &ProviderSettings, mode: IndexMode) -> Result<Self> {
        let embedder = settings.embedder.clone();
        match mode {
            IndexMode::Ephemeral => Self::fresh(embedder, None).await,
            IndexMode::Recreate(path) => {
                tracing::info!(path = %path.display(), "recreating vector index");
                Self::fresh(embedder, Some(path)).await
            }
            IndexMode::Load(path) => match Self::load(embedder.clone(), &path) {
                Ok(Some(index)) => {
                    tracing::info!(path = %path.display(), entries = index.len(), "loaded vector index");
                    Ok(index)
                }
                Ok(None) => {
                    tracing::info!(path = %path.display(), "no vector index found, creating a new one");
                    Self::fresh(embedder, Some(path)).await
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %format!("{:#}", e),
                        "vector index unreadable, starting from an empty index"
                    );
                    Self::fresh(embedder, Some(path)).await
                }
            },
        }
    }

    async fn fresh(embedder: Arc<dyn Embedder>, path: Option<PathBuf>) -> Result<Self> {
        let seed = embedder.embed_query(PLACEHOLDER_TEXT).await?;
        if seed.is_empty() {
            return Err(RagError::Index("embedder returned an empty vector".into()).into());
        }
        Ok(Self {
            embedder,
            path,
            dims: seed.len(),
            entries: vec![IndexEntry {
                id: Uuid::new_v4().to_string(),
                chunk: Chunk {
                    text: PLACEHOLDER_TEXT.to_string(),
                    metadata: Metadata::default(),
                    chunk_index: 0,
                },
                placeholder: true,
            }],
            vectors: seed,
        })
    }

    /// Read a persisted index. `Ok(None)` when nothing is persisted at
    /// `path`; `Err` when something is there but cannot be used.
    fn load(embedder: Arc<dyn Embedder>, path: &Path) -> Result<Option<Self>> {
        let sidecar_path = path.join(SIDECAR_FILE);
        let vectors_path = path.join(VECTORS_FILE);
        if !sidecar_path.exists() && !vectors_path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(&sidecar_path)
            .with_context(|| format!("Failed to read {}", sidecar_path.display()))?;
        let sidecar: Sidecar = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", sidecar_path.display()))?;
        if sidecar.version != FORMAT_VERSION {
            anyhow::bail!("unsupported index format version {}", sidecar.version);
        }
        if sidecar.embedding_model != embedder.model_name() {
            anyhow::bail!(
                "index was built with embedding model '{}', configured model is '{}'",
                sidecar.embedding_model,
                embedder.model_name()
            );
        }

        let blob = std::fs::read(&vectors_path)
            .with_context(|| format!("Failed to read {}", vectors_path.display()))?;
        if sha256_hex(&blob) != sidecar.vectors_sha256 {
            anyhow::bail!("vector file checksum mismatch");
        }
        let expected = sidecar
            .entries
            .len()
            .checked_mul(sidecar.dims)
            .and_then(|n| n.checked_mul(4))
            .with_context(|| {
                format!(
                    "index size overflows: {} entries x {} dims",
                    sidecar.entries.len(),
                    sidecar.dims
                )
            })?;
        if sidecar.dims == 0 || blob.len() != expected {
            anyhow::bail!(
                "vector file has {} bytes, expected {} ({} entries x {} dims)",
                blob.len(),
                expected,
                sidecar.entries.len(),
                sidecar.dims
            );
        }

        Ok(Some(Self {
            embedder,
            path: Some(path.to_path_buf()),
            dims: sidecar.dims,
            entries: sidecar.entries,
            vectors: blob_to_vec(&blob),
        }))
    }

    /// Write the index to `path`, creating the directory if needed.
    pub fn persist(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let blob = vec_to_blob(&self.vectors);
        let sidecar = Sidecar {
            version: FORMAT_VERSION,
            embedding_model: self.embedder.model_name().to_string(),
            dims: self.dims,
            vectors_sha256: sha256_hex(&blob),
            saved_at: Utc::now(),
            entries: self.entries.clone(),
        };
        let json = serde_json::to_vec(&sidecar)?;

        write_atomic(&path.join(VECTORS_FILE), &blob)?;
        write_atomic(&path.join(SIDECAR_FILE), &json)?;
        tracing::debug!(path = %path.display(), entries = self.entries.len(), "persisted vector index");
        Ok(())
    }

    /// Embed and append `chunks`. Returns the number added; an empty input
    /// is a no-op that never calls the embedder.
    pub async fn add(&mut self, chunks: Vec<Chunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(RagError::Index(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            ))
            .into());
        }
        if let Some(bad) = embeddings.iter().find(|v| v.len() != self.dims) {
            return Err(RagError::Index(format!(
                "embedding dimension {} does not match index dimension {}",
                bad.len(),
                self.dims
            ))
            .into());
        }

        let added = chunks.len();
        self.vectors.reserve(added * self.dims);
        for (chunk, vector) in chunks.into_iter().zip(embeddings) {
            self.entries.push(IndexEntry {
                id: Uuid::new_v4().to_string(),
                chunk,
                placeholder: false,
            });
            self.vectors.extend_from_slice(&vector);
        }
        tracing::debug!(added, total = self.entries.len(), "added chunks to index");
        Ok(added)
    }

    /// Embed `query` and return the `k` nearest entries.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed_query(query).await?;
        if query_vec.len() != self.dims {
            return Err(RagError::Index(format!(
                "query embedding dimension {} does not match index dimension {}",
                query_vec.len(),
                self.dims
            ))
            .into());
        }
        Ok(self.search_by_vector(&query_vec, k))
    }

    /// The `k` nearest entries to `query_vec`, closest first. Ties keep
    /// insertion order.
    pub fn search_by_vector(&self, query_vec: &[f32], k: usize) -> Vec<SearchHit> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dims)
            .map(|row| squared_l2(query_vec, row))
            .enumerate()
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        scored
            .into_iter()
            .map(|(i, distance)| SearchHit {
                chunk: self.entries[i].chunk.clone(),
                distance,
                placeholder: self.entries[i].placeholder,
            })
            .collect()
    }

    /// Number of stored entries, placeholder included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Persist location, `None` for ephemeral indices.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes. Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
