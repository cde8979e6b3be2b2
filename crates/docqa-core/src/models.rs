//! Data types that flow through ingestion, retrieval and chat.

use serde::{Deserialize, Serialize};

/// One page-level text unit produced by a document loader.
///
/// Plain-text files produce a single page numbered 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number within the source document.
    pub number: usize,
    pub text: String,
}

/// A contiguous slice of a document's extracted text.
///
/// Passages are immutable once created. `ordinal` is the position of the
/// passage within the ingestion of its document, starting at 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    /// File name of the source document.
    pub document: String,
    pub page: usize,
    pub ordinal: usize,
    pub text: String,
    /// SHA-256 of `text`, lowercase hex.
    pub hash: String,
}

/// A passage returned from a search together with its score.
///
/// For vector search the score is the cosine similarity; for the lexical
/// fallback it is the number of matched query words.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "human")]
    User,
    #[serde(alias = "ai", alias = "model")]
    Assistant,
}

/// A single turn of a chat session, serialized as `{"role", "content"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
