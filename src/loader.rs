//! Document loading: file on disk → ordered pages of text.
//!
//! The loader is chosen by extension. `.pdf` (any case) goes through
//! `pdf-extract`, one [`Page`] per PDF page. Every other extension,
//! including none at all, is read as UTF-8 text and yields a single page.
//!
//! PDF parsing runs on the blocking pool. A parser panic on a malformed
//! file is caught there and reported as [`LoadError::Pdf`].

use std::path::{Path, PathBuf};

use thiserror::Error;

use docqa_core::models::Page;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("{0} is not valid UTF-8 text")]
    Encoding(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("pdf") => DocumentKind::Pdf,
            _ => DocumentKind::Text,
        }
    }
}

/// Load a document into ordered pages.
pub async fn load_document(path: &Path) -> Result<Vec<Page>, LoadError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    match DocumentKind::from_path(path) {
        DocumentKind::Pdf => tokio::task::spawn_blocking(move || load_pdf(&bytes))
            .await
            .map_err(|e| LoadError::Pdf(format!("parser aborted: {}", e)))?,
        DocumentKind::Text => load_text(path, bytes),
    }
}

/// Split a PDF into pages, numbered from 1.
pub fn load_pdf(bytes: &[u8]) -> Result<Vec<Page>, LoadError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| LoadError::Pdf(e.to_string()))?;
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| Page { number: i + 1, text })
        .collect())
}

fn load_text(path: &Path, bytes: Vec<u8>) -> Result<Vec<Page>, LoadError> {
    let text = String::from_utf8(bytes).map_err(|_| LoadError::Encoding(path.to_path_buf()))?;
    Ok(vec![Page { number: 1, text }])
}
