//! On-disk form of the vector index.
//!
//! The index is persisted as a small SQLite file holding plain data only:
//!
//! ```text
//! index_meta(key TEXT PRIMARY KEY, value TEXT)     format_version, model, dims, saved_at
//! passages(seq INTEGER PRIMARY KEY, id, document, page, ordinal, text, hash, embedding BLOB)
//! ```
//!
//! `seq` preserves insertion order, which is the search tie-breaker.
//! Embeddings are little-endian `f32` blobs.
//!
//! Every save writes a complete new file next to the target
//! (`<path>.tmp`) and renames it over the old one, so readers never see a
//! partially written index and a failed save leaves the previous file in
//! place.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use docqa_core::embedding::{blob_to_vec, vec_to_blob};
use docqa_core::index::{IndexEntry, VectorIndex};
use docqa_core::models::Passage;

pub const FORMAT_VERSION: &str = "1";

#[derive(Debug, Error)]
pub enum IndexLoadError {
    #[error("cannot open index at {path}: {reason}")]
    Io { path: PathBuf, reason: String },
    #[error("index at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

fn corrupt(path: &Path, reason: impl ToString) -> IndexLoadError {
    IndexLoadError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

async fn open(path: &Path, create: bool) -> std::result::Result<SqlitePool, sqlx::Error> {
    let mut options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .read_only(!create);
    if create {
        // No -wal/-shm side files, so a single rename publishes everything.
        options = options.journal_mode(SqliteJournalMode::Delete);
    }

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

/// Read the persisted index at `path`.
///
/// Returns `Ok(None)` when no file exists. The file is opened read-only.
pub async fn load_index(path: &Path) -> Result<Option<VectorIndex>, IndexLoadError> {
    match tokio::fs::metadata(path).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(IndexLoadError::Io {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    }

    let pool = open(path, false).await.map_err(|e| IndexLoadError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let result = read_index(&pool, path).await;
    pool.close().await;
    result.map(Some)
}

async fn read_index(pool: &SqlitePool, path: &Path) -> Result<VectorIndex, IndexLoadError> {
    let meta: HashMap<String, String> =
        sqlx::query_as::<_, (String, String)>("SELECT key, value FROM index_meta")
            .fetch_all(pool)
            .await
            .map_err(|e| corrupt(path, e))?
            .into_iter()
            .collect();

    let version = meta.get("format_version").map(String::as_str);
    if version != Some(FORMAT_VERSION) {
        return Err(corrupt(
            path,
            format!("unsupported format version {:?}", version),
        ));
    }
    let model = meta
        .get("model")
        .cloned()
        .ok_or_else(|| corrupt(path, "missing model"))?;
    let dims: usize = meta
        .get("dims")
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| corrupt(path, "missing or invalid dims"))?;

    let rows = sqlx::query(
        "SELECT id, document, page, ordinal, text, hash, embedding FROM passages ORDER BY seq",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| corrupt(path, e))?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let page: i64 = row.try_get("page").map_err(|e| corrupt(path, e))?;
        let ordinal: i64 = row.try_get("ordinal").map_err(|e| corrupt(path, e))?;
        let blob: Vec<u8> = row.try_get("embedding").map_err(|e| corrupt(path, e))?;
        let passage = Passage {
            id: row.try_get("id").map_err(|e| corrupt(path, e))?,
            document: row.try_get("document").map_err(|e| corrupt(path, e))?,
            page: page as usize,
            ordinal: ordinal as usize,
            text: row.try_get("text").map_err(|e| corrupt(path, e))?,
            hash: row.try_get("hash").map_err(|e| corrupt(path, e))?,
        };
        entries.push(IndexEntry {
            passage,
            vector: blob_to_vec(&blob),
        });
    }

    debug!(passages = entries.len(), %model, "read persisted index");
    VectorIndex::from_entries(model, dims, entries).map_err(|e| corrupt(path, e))
}

/// Path of the scratch file a save writes before renaming.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Persist `index` to `path`, replacing any previous file atomically.
pub async fn save_index(path: &Path, index: &VectorIndex) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let tmp = temp_path(path);
    if tokio::fs::metadata(&tmp).await.is_ok() {
        tokio::fs::remove_file(&tmp)
            .await
            .with_context(|| format!("Failed to remove stale {}", tmp.display()))?;
    }

    let pool = open(&tmp, true)
        .await
        .with_context(|| format!("Failed to create {}", tmp.display()))?;
    let written = write_index(&pool, index).await;
    pool.close().await;
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("Failed to write {}", tmp.display()));
    }

    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move index into place at {}", path.display()))?;
    debug!(passages = index.len(), path = %path.display(), "saved index");
    Ok(())
}

async fn write_index(pool: &SqlitePool, index: &VectorIndex) -> Result<()> {
    sqlx::query("CREATE TABLE index_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
        .execute(pool)
        .await?;
    sqlx::query(
        r#"
        CREATE TABLE passages (
            seq INTEGER PRIMARY KEY,
            id TEXT NOT NULL,
            document TEXT NOT NULL,
            page INTEGER NOT NULL,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let mut tx = pool.begin().await?;

    let saved_at = chrono::Utc::now().to_rfc3339();
    let dims = index.dims().to_string();
    for (key, value) in [
        ("format_version", FORMAT_VERSION),
        ("model", index.model()),
        ("dims", dims.as_str()),
        ("saved_at", saved_at.as_str()),
    ] {
        sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    for (seq, entry) in index.entries().iter().enumerate() {
        let p = &entry.passage;
        sqlx::query(
            "INSERT INTO passages (seq, id, document, page, ordinal, text, hash, embedding) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(seq as i64)
        .bind(&p.id)
        .bind(&p.document)
        .bind(p.page as i64)
        .bind(p.ordinal as i64)
        .bind(&p.text)
        .bind(&p.hash)
        .bind(vec_to_blob(&entry.vector))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(ordinal: usize, text: &str) -> Passage {
        Passage {
            id: format!("id-{}", ordinal),
            document: "notes.txt".to_string(),
            page: 1,
            ordinal,
            text: text.to_string(),
            hash: format!("h{}", ordinal),
        }
    }

    fn sample() -> VectorIndex {
        VectorIndex::from_passages(
            "test-model",
            vec![passage(0, "first"), passage(1, "second")],
            vec![vec![1.0, 0.0, 0.5], vec![0.0, 1.0, -0.5]],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_index(&dir.path().join("index.sqlite")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_preserves_order_and_meta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.sqlite");
        save_index(&path, &sample()).await.unwrap();
        assert!(!temp_path(&path).exists());

        let loaded = load_index(&path).await.unwrap().unwrap();
        assert_eq!(loaded.model(), "test-model");
        assert_eq!(loaded.dims(), 3);
        let texts: Vec<&str> = loaded.entries().iter().map(|e| e.passage.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(loaded.entries()[1].vector, vec![0.0, 1.0, -0.5]);
    }

    #[tokio::test]
    async fn test_save_overwrites_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sqlite");
        save_index(&path, &sample()).await.unwrap();

        let mut bigger = sample();
        bigger
            .add(vec![passage(2, "third")], vec![vec![0.3, 0.3, 0.3]])
            .unwrap();
        save_index(&path, &bigger).await.unwrap();

        let loaded = load_index(&path).await.unwrap().unwrap();
        assert_eq!(loaded.len(), 3);
    }

    #[tokio::test]
    async fn test_garbage_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sqlite");
        std::fs::write(&path, b"this is not a database at all, just some bytes").unwrap();
        assert!(load_index(&path).await.is_err());
    }
}
