//! Answering agent tests with a real knowledge base and scripted models.

mod common;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use common::{test_config, write_file, FailingEmbedder, KeywordEmbedder, RagModel};
use docqa::agent::{AnsweringAgent, ERROR_ANSWER, PREVIEW_SEPARATOR};
use docqa::config::Config;
use docqa::ingest::try_ingest_document;
use docqa::knowledge::KnowledgeBase;
use docqa::traits::{Tool, ToolContext, ToolRegistry, NO_DOCUMENTS};
use docqa_core::chat::{ChatMessage, ChatModel, ChatRole, ModelTurn, ToolCall, ToolSpec};
use docqa_core::embedding::Embedder;

async fn seeded_kb(dir: &std::path::Path, cfg: &Config) -> Arc<KnowledgeBase> {
    let kb = Arc::new(KnowledgeBase::new(
        dir.join("index.sqlite"),
        Arc::new(KeywordEmbedder::new()),
    ));
    for (name, text) in [
        ("refunds.txt", "Refund requests are accepted within 30 days."),
        ("shipping.txt", "Shipping takes 5 business days."),
        ("warranty.txt", "The warranty covers the battery for one year."),
    ] {
        let path = write_file(dir, name, text);
        try_ingest_document(&kb, &cfg.chunking, &path).await.unwrap();
    }
    kb
}

#[tokio::test]
async fn test_answer_with_resampled_preview() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path(), "");
    let kb = seeded_kb(dir.path(), &cfg).await;
    let agent = AnsweringAgent::new(kb, Arc::new(RagModel), &cfg);

    let out = agent.answer("how do I get a refund", &[]).await;
    assert_eq!(
        out.answer,
        "From the documents: Refund requests are accepted within 30 days."
    );
    let preview: Vec<&str> = out.context_preview.split(PREVIEW_SEPARATOR).collect();
    assert_eq!(preview.len(), 2);
    assert_eq!(preview[0], "Refund requests are accepted within 30 days.");
}

#[tokio::test]
async fn test_answer_with_trace_preview() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path(), "[retrieval]\npreview = \"trace\"\npreview_k = 3\n");
    let kb = seeded_kb(dir.path(), &cfg).await;
    let agent = AnsweringAgent::new(kb, Arc::new(RagModel), &cfg);

    let out = agent.answer("is the battery under warranty", &[]).await;
    let preview: Vec<&str> = out.context_preview.split(PREVIEW_SEPARATOR).collect();
    assert_eq!(preview.len(), 3);
    assert_eq!(preview[0], "The warranty covers the battery for one year.");
}

#[tokio::test]
async fn test_answer_without_documents() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path(), "");
    let kb = Arc::new(KnowledgeBase::new(
        dir.path().join("index.sqlite"),
        Arc::new(KeywordEmbedder::new()),
    ));
    let agent = AnsweringAgent::new(kb, Arc::new(RagModel), &cfg);

    let out = agent.answer("anything", &[]).await;
    assert_eq!(out.answer, format!("From the documents: {}", NO_DOCUMENTS));
    assert_eq!(out.context_preview, "");
}

#[tokio::test]
async fn test_preview_failure_without_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path(), "[retrieval]\nlexical_fallback = false\n");
    seeded_kb(dir.path(), &cfg).await;

    let degraded = Arc::new(KnowledgeBase::new(
        dir.path().join("index.sqlite"),
        Arc::new(FailingEmbedder),
    ));
    let agent = AnsweringAgent::new(degraded, Arc::new(RagModel), &cfg);
    let out = agent.answer("refund", &[]).await;
    assert_eq!(out.answer, ERROR_ANSWER);
    assert_eq!(out.context_preview, "");
}

#[tokio::test]
async fn test_preview_uses_lexical_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path(), "");
    seeded_kb(dir.path(), &cfg).await;

    let degraded = Arc::new(KnowledgeBase::new(
        dir.path().join("index.sqlite"),
        Arc::new(FailingEmbedder),
    ));
    let agent = AnsweringAgent::new(degraded, Arc::new(RagModel), &cfg);
    let out = agent.answer("shipping days", &[]).await;
    assert_eq!(out.answer, "From the documents: Shipping takes 5 business days.");
    assert!(out
        .context_preview
        .starts_with("Shipping takes 5 business days."));
}

/// Reports how many passages the index holds.
struct PassageCountTool;

#[async_trait]
impl Tool for PassageCountTool {
    fn name(&self) -> &str {
        "passage_count"
    }

    fn description(&self) -> &str {
        "Number of indexed passages"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<String> {
        Ok(ctx.knowledge().status().await.passages.to_string())
    }
}

/// Calls `passage_count` once, then echoes its result.
struct CountingModel;

#[async_trait]
impl ChatModel for CountingModel {
    fn model_name(&self) -> &str {
        "counting-test"
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelTurn> {
        assert!(tools.iter().any(|t| t.name == "passage_count"));
        match messages.last() {
            Some(m) if m.role == ChatRole::Tool => Ok(ModelTurn::Final(format!("{} passages", m.content))),
            _ => Ok(ModelTurn::ToolCalls(vec![ToolCall {
                id: "call_0".to_string(),
                name: "passage_count".to_string(),
                arguments: json!({}),
            }])),
        }
    }
}

#[tokio::test]
async fn test_custom_tool_registry() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path(), "[retrieval]\npreview = \"trace\"\n");
    let kb = seeded_kb(dir.path(), &cfg).await;

    let mut tools = ToolRegistry::with_builtins();
    tools.register(Box::new(PassageCountTool));
    assert_eq!(tools.len(), 2);

    let agent = AnsweringAgent::new(kb, Arc::new(CountingModel), &cfg).with_tools(tools);
    let out = agent.answer("how big is the index", &[]).await;
    assert_eq!(out.answer, "3 passages");
    // The retrieval tool never ran, so nothing was traced.
    assert_eq!(out.context_preview, "");
}

#[tokio::test]
async fn test_keyword_embedder_is_deterministic() {
    let embedder = KeywordEmbedder::new();
    let texts = vec!["cat cat dog".to_string()];
    let a = embedder.embed(&texts).await.unwrap();
    let b = embedder.embed(&texts).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a[0][0], 2.0);
    assert_eq!(a[0][1], 1.0);
}
