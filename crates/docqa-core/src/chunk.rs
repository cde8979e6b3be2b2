//! Overlapping fixed-window text chunker.
//!
//! Splits each page's text into passages of at most `chunk_size`
//! characters, where consecutive passages of the same page share exactly
//! `overlap` characters. Lengths are measured in Unicode scalar values, so
//! multi-byte text is never split inside a character.
//!
//! # Window rule
//!
//! For a page of `L` characters, `stride = chunk_size - overlap`:
//!
//! ```text
//! L <= chunk_size  →  1 passage (the whole page)
//! L >  chunk_size  →  ceil((L - overlap) / stride) passages
//! ```
//!
//! Passage `k` covers characters `[k × stride, min(k × stride + chunk_size, L))`.
//! Every window except the last is exactly `chunk_size` long, so the last
//! window overlaps its predecessor by exactly `overlap` as well.
//!
//! # Example
//!
//! ```rust
//! use docqa_core::chunk::split_text;
//!
//! let text = "a".repeat(2600);
//! let pieces = split_text(&text, 1000, 200);
//! assert_eq!(pieces.len(), 3); // ceil((2600 - 200) / 800)
//! assert!(pieces.iter().all(|p| p.chars().count() <= 1000));
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Page, Passage};

/// Default maximum passage length, in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default overlap between consecutive passages, in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Split `text` into overlapping windows following the window rule above.
///
/// Returns an empty vector for empty text. If `overlap >= chunk_size` the
/// stride falls back to 1 character so the loop always advances; callers
/// are expected to validate the configuration before getting here.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    // Byte offset of every char, plus the end of the string.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    bounds.push(text.len());
    let len = bounds.len() - 1;

    if len <= chunk_size {
        return vec![text.to_string()];
    }

    let stride = chunk_size.saturating_sub(overlap).max(1);
    let mut pieces = Vec::with_capacity(len / stride + 1);
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(len);
        pieces.push(text[bounds[start]..bounds[end]].to_string());
        if end == len {
            break;
        }
        start += stride;
    }
    pieces
}

/// Split a document's pages into [`Passage`]s, preserving page order.
///
/// Page text is trimmed first and whitespace-only pages are skipped.
/// Ordinals are contiguous across the whole document, starting at 0.
pub fn chunk_pages(
    document: &str,
    pages: &[Page],
    chunk_size: usize,
    overlap: usize,
) -> Vec<Passage> {
    let mut passages = Vec::new();
    for page in pages {
        let text = page.text.trim();
        if text.is_empty() {
            continue;
        }
        for piece in split_text(text, chunk_size, overlap) {
            let ordinal = passages.len();
            passages.push(make_passage(document, page.number, ordinal, piece));
        }
    }
    passages
}

/// Create a [`Passage`] with a fresh UUID and SHA-256 content hash.
fn make_passage(document: &str, page: usize, ordinal: usize, text: String) -> Passage {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Passage {
        id: Uuid::new_v4().to_string(),
        document: document.to_string(),
        page,
        ordinal,
        text,
        hash,
    }
}
