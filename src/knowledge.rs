//! The process-wide knowledge base: one vector index behind a lock.
//!
//! [`KnowledgeBase`] owns the live [`VectorIndex`] and its on-disk path.
//! Readers take a cheap [`Arc`] snapshot and search without holding any
//! lock. Writers are serialized by a single-writer mutex and never mutate
//! the live index in place: they extend a copy, persist it, and only then
//! swap it in. A failed write leaves both memory and disk unchanged.

use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use docqa_core::embedding::{embed_query, Embedder};
use docqa_core::index::{IndexError, VectorIndex};
use docqa_core::models::{Passage, ScoredPassage};

use crate::index_store;
use crate::ingest::IngestError;

/// Where the index handle currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    /// Nothing ingested yet and nothing on disk.
    Absent,
    Loaded,
    /// A persisted index exists but could not be read.
    Failed(String),
}

impl IndexState {
    pub fn label(&self) -> &'static str {
        match self {
            IndexState::Absent => "absent",
            IndexState::Loaded => "loaded",
            IndexState::Failed(_) => "failed",
        }
    }
}

/// Snapshot of the index for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub passages: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub dims: usize,
}

#[derive(Default)]
struct Slot {
    index: Option<Arc<VectorIndex>>,
    failure: Option<String>,
}

pub struct KnowledgeBase {
    index_path: PathBuf,
    embedder: Arc<dyn Embedder>,
    slot: RwLock<Slot>,
    writer: Mutex<()>,
}

impl KnowledgeBase {
    pub fn new(index_path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index_path: index_path.into(),
            embedder,
            slot: RwLock::new(Slot::default()),
            writer: Mutex::new(()),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Load the persisted index into the handle if one exists.
    ///
    /// Returns `true` when an index was loaded. A missing file returns
    /// `false`. An unreadable file is logged, recorded as
    /// [`IndexState::Failed`], and also returns `false`.
    pub async fn load_existing_index(&self) -> bool {
        let _writer = self.writer.lock().await;
        self.load_locked().await
    }

    /// Caller must hold `self.writer`.
    async fn load_locked(&self) -> bool {
        match index_store::load_index(&self.index_path).await {
            Ok(Some(index)) => {
                if index.model() != self.embedder.model_name() {
                    warn!(
                        persisted = index.model(),
                        configured = self.embedder.model_name(),
                        "persisted index was built with a different embedding model"
                    );
                }
                info!(
                    passages = index.len(),
                    path = %self.index_path.display(),
                    "loaded vector index"
                );
                let mut slot = self.slot.write().await;
                slot.index = Some(Arc::new(index));
                slot.failure = None;
                true
            }
            Ok(None) => {
                let mut slot = self.slot.write().await;
                slot.failure = None;
                false
            }
            Err(e) => {
                error!(error = %e, "failed to load vector index");
                let mut slot = self.slot.write().await;
                slot.index = None;
                slot.failure = Some(e.to_string());
                false
            }
        }
    }

    /// Current index, if any, without touching disk.
    pub async fn snapshot(&self) -> Option<Arc<VectorIndex>> {
        self.slot.read().await.index.clone()
    }

    /// Current index, loading it from disk first if the handle is unset.
    pub async fn ensure_loaded(&self) -> Option<Arc<VectorIndex>> {
        if let Some(index) = self.snapshot().await {
            return Some(index);
        }
        self.load_existing_index().await;
        self.snapshot().await
    }

    pub async fn state(&self) -> IndexState {
        let slot = self.slot.read().await;
        match (&slot.index, &slot.failure) {
            (Some(_), _) => IndexState::Loaded,
            (None, Some(reason)) => IndexState::Failed(reason.clone()),
            (None, None) => IndexState::Absent,
        }
    }

    pub async fn status(&self) -> IndexStatus {
        let state = self.state().await;
        let index = self.snapshot().await;
        IndexStatus {
            state: state.label(),
            reason: match state {
                IndexState::Failed(reason) => Some(reason),
                _ => None,
            },
            passages: index.as_ref().map(|i| i.len()).unwrap_or(0),
            model: index.as_ref().map(|i| i.model().to_string()),
            dims: index.as_ref().map(|i| i.dims()).unwrap_or(0),
        }
    }

    /// Append embedded passages, persist, and publish the new index.
    ///
    /// Serialized against other writers. When the handle is unset the
    /// persisted index (if readable) is used as the base so earlier
    /// ingestions are kept. Returns the total passage count afterwards.
    pub async fn commit_passages(
        &self,
        passages: Vec<Passage>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<usize, IngestError> {
        let _writer = self.writer.lock().await;

        let mut current = self.snapshot().await;
        if current.is_none() && self.load_locked().await {
            current = self.snapshot().await;
        }

        let next = match current {
            Some(existing) => {
                let mut next = (*existing).clone();
                next.add(passages, vectors).map_err(index_error)?;
                next
            }
            None => VectorIndex::from_passages(self.embedder.model_name(), passages, vectors)
                .map_err(index_error)?,
        };

        index_store::save_index(&self.index_path, &next)
            .await
            .map_err(|e| IngestError::Persist(format!("{:#}", e)))?;

        let total = next.len();
        let mut slot = self.slot.write().await;
        slot.index = Some(Arc::new(next));
        slot.failure = None;
        Ok(total)
    }

    /// Embed `query` and return the `k` most similar passages.
    ///
    /// `Ok(None)` means there is no index to search.
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Option<Vec<ScoredPassage>>> {
        let Some(index) = self.ensure_loaded().await else {
            return Ok(None);
        };
        let vector = embed_query(self.embedder.as_ref(), query).await?;
        Ok(Some(index.search(&vector, k)?))
    }

    /// Word-overlap search over every indexed passage.
    pub async fn lexical_search(&self, query: &str, k: usize) -> Option<Vec<ScoredPassage>> {
        let index = self.ensure_loaded().await?;
        Some(index.lexical_search(query, k))
    }
}

fn index_error(e: IndexError) -> IngestError {
    match e {
        IndexError::DimensionMismatch { expected, actual } => {
            IngestError::DimensionMismatch { expected, actual }
        }
        other => IngestError::Embedding(other.to_string()),
    }
}
