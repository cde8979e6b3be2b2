//! In-memory vector index with exact cosine search and a lexical fallback.
//!
//! The index is an ordered list of `(passage, vector)` entries plus the
//! embedding model name and dimensionality. Insertion order is significant:
//! it is the tie-breaker for both search strategies.
//!
//! # Ranking
//!
//! - [`VectorIndex::search`] scores every entry by cosine similarity to the
//!   query vector and returns the top `k`, descending. Ties keep insertion
//!   order (stable sort).
//! - [`VectorIndex::lexical_search`] and [`simple_text_search`] score each
//!   passage by how many lowercased, whitespace-split query words occur in
//!   it as substrings. A repeated query word counts once per repetition.
//!   Zero-score passages remain eligible, so the result is always
//!   `min(k, len)` entries.

use thiserror::Error;

use crate::embedding::cosine_similarity;
use crate::models::{Passage, ScoredPassage};

/// Structural errors raised while mutating or querying the index.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("got {vectors} vectors for {passages} passages")]
    CountMismatch { passages: usize, vectors: usize },
    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("cannot index an empty vector")]
    EmptyVector,
}

/// One stored passage with its embedding.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub passage: Passage,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// An empty index for `model` vectors of `dims` dimensions.
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            model: model.into(),
            dims,
            entries: Vec::new(),
        }
    }

    /// Build an index from passages and their vectors. The dimensionality
    /// is taken from the first vector.
    pub fn from_passages(
        model: impl Into<String>,
        passages: Vec<Passage>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        let dims = vectors.first().map(Vec::len).unwrap_or(0);
        if dims == 0 && !vectors.is_empty() {
            return Err(IndexError::EmptyVector);
        }
        let mut index = Self::new(model, dims);
        index.add(passages, vectors)?;
        Ok(index)
    }

    /// Rebuild an index from already-validated entries, e.g. when reading
    /// the persisted form back.
    pub fn from_entries(
        model: impl Into<String>,
        dims: usize,
        entries: Vec<IndexEntry>,
    ) -> Result<Self, IndexError> {
        for e in &entries {
            if e.vector.len() != dims {
                return Err(IndexError::DimensionMismatch {
                    expected: dims,
                    actual: e.vector.len(),
                });
            }
        }
        Ok(Self {
            model: model.into(),
            dims,
            entries,
        })
    }

    /// Append passages and their vectors, preserving order.
    ///
    /// All inputs are validated before the index is touched, so a failed
    /// call leaves it unchanged. An index created with `dims == 0` adopts
    /// the dimensionality of the first vector added.
    pub fn add(&mut self, passages: Vec<Passage>, vectors: Vec<Vec<f32>>) -> Result<(), IndexError> {
        if passages.len() != vectors.len() {
            return Err(IndexError::CountMismatch {
                passages: passages.len(),
                vectors: vectors.len(),
            });
        }

        let expected = if self.dims == 0 {
            vectors.first().map(Vec::len).unwrap_or(0)
        } else {
            self.dims
        };
        for v in &vectors {
            if v.is_empty() {
                return Err(IndexError::EmptyVector);
            }
            if v.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: v.len(),
                });
            }
        }

        self.dims = expected;
        self.entries.extend(
            passages
                .into_iter()
                .zip(vectors)
                .map(|(passage, vector)| IndexEntry { passage, vector }),
        );
        Ok(())
    }

    /// Exact nearest-neighbour search by cosine similarity.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredPassage>, IndexError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredPassage {
                passage: self.entries[i].passage.clone(),
                score,
            })
            .collect())
    }

    /// Word-overlap search over the indexed passage texts.
    pub fn lexical_search(&self, query: &str, k: usize) -> Vec<ScoredPassage> {
        let texts: Vec<&str> = self.entries.iter().map(|e| e.passage.text.as_str()).collect();
        rank_by_term_overlap(&texts, query, k)
            .into_iter()
            .map(|(i, hits)| ScoredPassage {
                passage: self.entries[i].passage.clone(),
                score: hits as f32,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}

/// Rank raw texts by query word overlap and return the best `top_k`.
///
/// ```rust
/// use docqa_core::index::simple_text_search;
///
/// let corpus = ["cat sat mat", "dog ran far"];
/// assert_eq!(simple_text_search(&corpus, "cat mat", 3), vec!["cat sat mat", "dog ran far"]);
/// ```
pub fn simple_text_search<'a, S: AsRef<str>>(corpus: &'a [S], query: &str, top_k: usize) -> Vec<&'a str> {
    let texts: Vec<&str> = corpus.iter().map(AsRef::as_ref).collect();
    rank_by_term_overlap(&texts, query, top_k)
        .into_iter()
        .map(|(i, _)| texts[i])
        .collect()
}

/// `(position, hits)` pairs, best first, ties in corpus order.
fn rank_by_term_overlap(texts: &[&str], query: &str, top_k: usize) -> Vec<(usize, usize)> {
    let words: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();

    let mut scored: Vec<(usize, usize)> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let lower = text.to_lowercase();
            let hits = words.iter().filter(|w| lower.contains(w.as_str())).count();
            (i, hits)
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.truncate(top_k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(ordinal: usize, text: &str) -> Passage {
        Passage {
            id: format!("p{}", ordinal),
            document: "doc.txt".to_string(),
            page: 1,
            ordinal,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    fn sample() -> VectorIndex {
        VectorIndex::from_passages(
            "test-model",
            vec![passage(0, "east"), passage(1, "north"), passage(2, "north-east")],
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = sample();
        let hits = index.search(&[0.0, 1.0], 3).unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.passage.text.as_str()).collect();
        assert_eq!(texts, vec!["north", "north-east", "east"]);
        assert!(hits[0].score >= hits[1].score && hits[1].score >= hits[2].score);
    }

    #[test]
    fn test_search_ties_keep_insertion_order() {
        let index = VectorIndex::from_passages(
            "m",
            vec![passage(0, "first"), passage(1, "second"), passage(2, "third")],
            vec![vec![1.0, 0.0], vec![2.0, 0.0], vec![0.0, 1.0]],
        )
        .unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].passage.text, "first");
        assert_eq!(hits[1].passage.text, "second");
    }

    #[test]
    fn test_search_truncates_to_k() {
        assert_eq!(sample().search(&[1.0, 0.0], 1).unwrap().len(), 1);
        assert_eq!(sample().search(&[1.0, 0.0], 10).unwrap().len(), 3);
    }

    #[test]
    fn test_search_rejects_wrong_query_dims() {
        let err = sample().search(&[1.0, 0.0, 0.0], 2).unwrap_err();
        assert_eq!(
            err,
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_add_is_all_or_nothing() {
        let mut index = sample();
        let err = index
            .add(
                vec![passage(3, "ok"), passage(4, "bad")],
                vec![vec![0.5, 0.5], vec![0.5]],
            )
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_add_count_mismatch() {
        let mut index = VectorIndex::new("m", 0);
        let err = index.add(vec![passage(0, "a")], vec![]).unwrap_err();
        assert_eq!(
            err,
            IndexError::CountMismatch {
                passages: 1,
                vectors: 0
            }
        );
        assert!(index.is_empty());
    }

    #[test]
    fn test_empty_index_adopts_dims() {
        let mut index = VectorIndex::new("m", 0);
        index.add(vec![passage(0, "a")], vec![vec![1.0, 2.0, 3.0]]).unwrap();
        assert_eq!(index.dims(), 3);
    }

    #[test]
    fn test_from_entries_validates_dims() {
        let entries = vec![IndexEntry {
            passage: passage(0, "a"),
            vector: vec![1.0],
        }];
        assert!(VectorIndex::from_entries("m", 2, entries).is_err());
    }

    #[test]
    fn test_simple_text_search_ranks_overlap() {
        let corpus = vec!["cat sat mat".to_string(), "dog ran far".to_string()];
        let out = simple_text_search(&corpus, "cat mat", 3);
        assert_eq!(out, vec!["cat sat mat", "dog ran far"]);
    }

    #[test]
    fn test_simple_text_search_case_and_substrings() {
        let corpus = ["The Category", "nothing here"];
        let out = simple_text_search(&corpus, "CAT", 1);
        assert_eq!(out, vec!["The Category"]);
    }

    #[test]
    fn test_simple_text_search_repeated_words_and_ties() {
        let corpus = ["alpha beta", "beta", "alpha"];
        // "alpha alpha" scores 2 on entries containing alpha.
        let out = simple_text_search(&corpus, "alpha alpha", 3);
        assert_eq!(out, vec!["alpha beta", "alpha", "beta"]);
    }

    #[test]
    fn test_simple_text_search_empty_corpus() {
        let corpus: [&str; 0] = [];
        assert!(simple_text_search(&corpus, "anything", 3).is_empty());
    }

    #[test]
    fn test_lexical_search_scores() {
        let hits = sample().lexical_search("north EAST", 2);
        assert_eq!(hits[0].passage.text, "north-east");
        assert_eq!(hits[0].score, 2.0);
        assert_eq!(hits[1].passage.text, "east");
    }
}
