//! File loading: extension dispatch from a path to [`Document`]s.
//!
//! | Extension | Result |
//! |-----------|--------|
//! | `.pdf` | one document per non-empty page, `page` = zero-based index |
//! | `.docx` | one document |
//! | `.pptx` | one document, slides separated by blank lines |
//! | `.txt`, `.md` | one document with the file contents |
//!
//! Every document carries `source` = the path exactly as given. Anything
//! else fails with [`RagError::UnsupportedFormat`].

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::RagError;
use crate::extract;
use crate::models::{Document, Metadata};

/// Extensions accepted for upload, lowercase with leading dot.
pub const SUPPORTED_EXTENSIONS: [&str; 5] = [".pdf", ".docx", ".pptx", ".txt", ".md"];

/// Lowercased extension with a leading dot, or `""` when there is none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

pub fn is_supported(path: &Path) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension_of(path).as_str())
}

/// Fail with [`RagError::UnsupportedFormat`] unless the loader handles `path`.
pub fn check_supported(path: &Path) -> Result<()> {
    if is_supported(path) {
        Ok(())
    } else {
        Err(RagError::UnsupportedFormat {
            extension: extension_of(path),
        }
        .into())
    }
}

/// Load one file into documents tagged with `source` = `path`.
pub fn load_file(path: &Path) -> Result<Vec<Document>> {
    check_supported(path)?;
    let ext = extension_of(path);
    let source = path.to_string_lossy().into_owned();
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let extract_err = |message: String| RagError::Extract {
        path: source.clone(),
        message,
    };

    let docs = match ext.as_str() {
        ".pdf" => extract::extract_pdf_pages(&bytes)
            .map_err(|e| extract_err(e.to_string()))?
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(page, text)| {
                Document::new(
                    text,
                    Metadata {
                        source: Some(source.clone()),
                        page: Some(page as u32),
                        ..Default::default()
                    },
                )
            })
            .collect(),
        ".docx" => {
            let text = extract::extract_docx(&bytes).map_err(|e| extract_err(e.to_string()))?;
            vec![Document::new(text, source_metadata(&source))]
        }
        ".pptx" => {
            let text = extract::extract_pptx(&bytes).map_err(|e| extract_err(e.to_string()))?;
            vec![Document::new(text, source_metadata(&source))]
        }
        _ => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            vec![Document::new(text, source_metadata(&source))]
        }
    };

    tracing::debug!(path = %path.display(), documents = docs.len(), "loaded file");
    Ok(docs)
}

fn source_metadata(source: &str) -> Metadata {
    Metadata {
        source: Some(source.to_string()),
        ..Default::default()
    }
}

/// Expand CLI inputs into a file list.
///
/// Explicit files are kept as given (and later fail fast if unsupported).
/// Directories are walked recursively; unsupported files found inside
/// them are skipped with a warning.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if !input.exists() {
            return Err(RagError::config(format!("input does not exist: {}", input.display())).into());
        }
        if !input.is_dir() {
            files.push(input.clone());
            continue;
        }
        let mut found = Vec::new();
        for entry in WalkDir::new(input).follow_links(false) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if is_supported(path) {
                found.push(path.to_path_buf());
            } else {
                tracing::warn!(path = %path.display(), "skipping unsupported file");
            }
        }
        found.sort();
        files.extend(found);
    }
    Ok(files)
}
