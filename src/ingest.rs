//! Ingestion pipeline: stored file → pages → passages → vectors → index.
//!
//! Loading, chunking, and embedding run without any lock held; only the
//! final append-persist-swap step goes through the knowledge base's
//! single-writer lock (see [`KnowledgeBase::commit_passages`]).
//!
//! Two entry points:
//! - [`try_ingest_document`] returns a typed [`IngestError`].
//! - [`ingest_document`] logs any failure and reports a plain `bool`.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

use docqa_core::chunk::chunk_pages;

use crate::config::ChunkingConfig;
use crate::knowledge::KnowledgeBase;
use crate::loader::{self, LoadError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("{0} contains no extractable text")]
    Empty(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("failed to persist index: {0}")]
    Persist(String),
}

/// Outcome of one successful ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document: String,
    pub pages: usize,
    pub passages: usize,
    /// Passages in the index after this ingestion.
    pub total_passages: usize,
}

/// Reduce a client-supplied file name to its final path component.
///
/// Both `/` and `\` count as separators. Names that reduce to nothing,
/// `.` or `..` are rejected.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    match base {
        "" | "." | ".." => None,
        other => Some(other.to_string()),
    }
}

/// Write an uploaded file into `upload_dir`, replacing any file with the
/// same name. Returns the stored path.
pub async fn save_upload(upload_dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
    let Some(name) = sanitize_filename(filename) else {
        bail!("Invalid file name: {:?}", filename);
    };
    tokio::fs::create_dir_all(upload_dir)
        .await
        .with_context(|| format!("Failed to create {}", upload_dir.display()))?;
    let path = upload_dir.join(name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Ingest a stored document into the knowledge base.
pub async fn try_ingest_document(
    kb: &KnowledgeBase,
    chunking: &ChunkingConfig,
    path: &Path,
) -> Result<IngestReport, IngestError> {
    let document = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let pages = loader::load_document(path).await?;
    let passages = chunk_pages(&document, &pages, chunking.chunk_size, chunking.chunk_overlap);
    if passages.is_empty() {
        return Err(IngestError::Empty(document));
    }

    let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
    let vectors = kb
        .embedder()
        .embed(&texts)
        .await
        .map_err(|e| IngestError::Embedding(format!("{:#}", e)))?;

    let count = passages.len();
    let total_passages = kb.commit_passages(passages, vectors).await?;

    let report = IngestReport {
        document,
        pages: pages.len(),
        passages: count,
        total_passages,
    };
    info!(
        document = %report.document,
        pages = report.pages,
        passages = report.passages,
        total = report.total_passages,
        "ingested document"
    );
    Ok(report)
}

/// Ingest a stored document, logging any failure. Returns `true` on success.
pub async fn ingest_document(kb: &KnowledgeBase, chunking: &ChunkingConfig, path: &Path) -> bool {
    match try_ingest_document(kb, chunking, path).await {
        Ok(_) => true,
        Err(e) => {
            error!(path = %path.display(), error = %e, "ingestion failed");
            false
        }
    }
}
