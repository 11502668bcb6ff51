//! Recursive character text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `chunk_size` characters.
//! Splitting prefers paragraph boundaries (`\n\n`), then line boundaries,
//! then spaces, and finally falls back to single characters. Consecutive
//! chunks of the same document share up to `chunk_overlap` characters: the
//! shared region is a suffix of the earlier chunk and a prefix of the later.
//!
//! Lengths are measured in `char`s, not bytes. Every chunk inherits its
//! parent document's metadata unchanged.

use anyhow::Result;
use std::collections::VecDeque;
use std::ops::Range;

use crate::config::ChunkingConfig;
use crate::error::RagError;
use crate::models::{Chunk, Document};

pub const DEFAULT_CHUNK_SIZE: usize = 1200;
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;

/// Separators in priority order. The empty separator splits per character.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::config("chunking.chunk_size must be > 0").into());
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            ))
            .into());
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split every document, numbering chunks per document from 0.
    pub fn split_documents(&self, docs: &[Document]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for doc in docs {
            for (chunk_index, text) in self.split_text(&doc.text).into_iter().enumerate() {
                chunks.push(Chunk {
                    text: text.to_string(),
                    metadata: doc.metadata.clone(),
                    chunk_index,
                });
            }
        }
        chunks
    }

    /// Split a single text. Empty or whitespace-only input yields no chunks.
    pub fn split_text<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.split_spans(text)
            .into_iter()
            .map(|span| &text[span])
            .collect()
    }

    /// Byte ranges of each chunk within `text`, in order, whitespace-trimmed.
    pub(crate) fn split_spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut out = Vec::new();
        if !text.is_empty() {
            self.split_range(text, 0..text.len(), &SEPARATORS, &mut out);
        }
        out
    }

    fn split_range(
        &self,
        text: &str,
        range: Range<usize>,
        separators: &[&str],
        out: &mut Vec<Range<usize>>,
    ) {
        let slice = &text[range.clone()];
        let idx = separators
            .iter()
            .position(|s| s.is_empty() || slice.contains(s))
            .unwrap_or(separators.len() - 1);
        let separator = separators[idx];
        let finer = &separators[idx + 1..];

        let mut good: Vec<Range<usize>> = Vec::new();
        for piece in split_keep_separator(slice, separator, range.start) {
            if char_len(&text[piece.clone()]) < self.chunk_size {
                good.push(piece);
                continue;
            }
            if !good.is_empty() {
                self.merge(text, &good, out);
                good.clear();
            }
            if finer.is_empty() {
                push_trimmed(text, piece, out);
            } else {
                self.split_range(text, piece, finer, out);
            }
        }
        if !good.is_empty() {
            self.merge(text, &good, out);
        }
    }

    /// Greedily pack contiguous pieces into windows, carrying trailing
    /// pieces worth at most `chunk_overlap` characters into the next window.
    fn merge(&self, text: &str, pieces: &[Range<usize>], out: &mut Vec<Range<usize>>) {
        let mut current: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(&text[piece.clone()]);
            if total + len > self.chunk_size && !current.is_empty() {
                push_window(text, &current, out);
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            current.push_back((piece.clone(), len));
            total += len;
        }

        if !current.is_empty() {
            push_window(text, &current, out);
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `slice` on `separator`, keeping the separator at the start of the
/// following piece so pieces stay contiguous. Ranges are offset into the
/// full text. Empty pieces are dropped.
fn split_keep_separator(slice: &str, separator: &str, offset: usize) -> Vec<Range<usize>> {
    if separator.is_empty() {
        return slice
            .char_indices()
            .map(|(i, c)| offset + i..offset + i + c.len_utf8())
            .collect();
    }

    let mut starts: Vec<usize> = vec![0];
    starts.extend(slice.match_indices(separator).map(|(i, _)| i).filter(|&i| i > 0));
    let mut pieces = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(slice.len());
        if end > start {
            pieces.push(offset + start..offset + end);
        }
    }
    pieces
}

fn push_window(text: &str, window: &VecDeque<(Range<usize>, usize)>, out: &mut Vec<Range<usize>>) {
    if let (Some(first), Some(last)) = (window.front(), window.back()) {
        push_trimmed(text, first.0.start..last.0.end, out);
    }
}

fn push_trimmed(text: &str, range: Range<usize>, out: &mut Vec<Range<usize>>) {
    let slice = &text[range.clone()];
    let trimmed_start = slice.trim_start();
    if trimmed_start.is_empty() {
        return;
    }
    let start = range.start + (slice.len() - trimmed_start.len());
    let end = start + trimmed_start.trim_end().len();
    out.push(start..end);
}
