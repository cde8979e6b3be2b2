//! Shared test doubles and fixtures.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use docqa::config::Config;
use docqa_core::chat::{ChatMessage, ChatModel, ChatRole, ModelTurn, ToolCall, ToolSpec};
use docqa_core::embedding::Embedder;

/// Words the keyword embedder counts, one dimension each.
pub const VOCAB: &[&str] = &[
    "cat", "dog", "refund", "shipping", "invoice", "warranty", "battery", "password",
];

/// Deterministic embedder: one dimension per [`VOCAB`] word holding its
/// occurrence count, plus a small constant so no vector is all zeros.
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
    pub delay: Duration,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn vectorize(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = VOCAB.iter().map(|w| lower.matches(w).count() as f32).collect();
        v.push(0.1);
        v
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }
}

/// Embedder whose provider is unreachable.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("connection refused")
    }
}

/// Embedder producing vectors of a fixed, different dimensionality.
pub struct WideEmbedder;

#[async_trait]
impl Embedder for WideEmbedder {
    fn model_name(&self) -> &str {
        "wide-test"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0; 64]).collect())
    }
}

/// A chat model that always searches once with the user's question and
/// then answers by quoting the first line the tool returned.
pub struct RagModel;

#[async_trait]
impl ChatModel for RagModel {
    fn model_name(&self) -> &str {
        "rag-test"
    }

    async fn complete(&self, messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<ModelTurn> {
        let Some(last) = messages.last() else {
            bail!("empty conversation");
        };
        if last.role == ChatRole::Tool {
            let first_line = last.content.lines().next().unwrap_or_default();
            return Ok(ModelTurn::Final(format!("From the documents: {}", first_line)));
        }
        Ok(ModelTurn::ToolCalls(vec![ToolCall {
            id: "call_1".to_string(),
            name: "search_documents".to_string(),
            arguments: serde_json::json!({ "query": last.content }),
        }]))
    }
}

/// Config rooted in `dir`, parsed the same way the binary does.
pub fn test_config(dir: &Path, extra: &str) -> Config {
    let text = format!(
        r#"
[storage]
upload_dir = "{}"
index_path = "{}"

[sessions]
idle_ttl_secs = 0

[server]
bind = "127.0.0.1:0"
{}
"#,
        dir.join("uploads").display(),
        dir.join("index.sqlite").display(),
        extra
    );
    let config: Config = toml::from_str(&text).unwrap();
    docqa::config::validate(&config).unwrap();
    config
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Minimal single-page PDF showing `phrase`, with correct xref offsets.
pub fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    let mut offsets = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            stream.len(),
            stream
        )
        .as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for o in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", o).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}
