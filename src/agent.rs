//! The answering agent: a bounded tool-calling loop over a chat model.
//!
//! # State machine
//!
//! ```text
//!                 ┌─────────────── tool results appended ───────────────┐
//!                 ▼                                                     │
//!          AwaitingModel ── ToolCalls ──▶ ToolRequested(calls) ─────────┘
//!                 │                              │
//!               Final                   rounds > max_tool_rounds
//!                 ▼                              ▼
//!            Done(answer)                 Failed(reason)
//! ```
//!
//! A model error also moves to `Failed`. Unknown tool names do not abort
//! the loop: the model receives an error message as that call's result.
//!
//! Every failure is logged and surfaces to callers as the fixed answer
//! [`ERROR_ANSWER`] with an empty context preview.

use anyhow::{bail, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

use docqa_core::chat::{ChatMessage, ChatModel, ModelTurn, ToolCall};
use docqa_core::models::{ScoredPassage, Turn};

use crate::config::{Config, PreviewMode, RetrievalConfig};
use crate::knowledge::KnowledgeBase;
use crate::traits::{ToolContext, ToolRegistry};

pub const ERROR_ANSWER: &str = "An error occurred.";

/// Separator between passages in the context preview.
pub const PREVIEW_SEPARATOR: &str = "\n...\n";

#[derive(Debug, Clone, PartialEq)]
pub enum AgentState {
    AwaitingModel,
    ToolRequested(Vec<ToolCall>),
    Done(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentAnswer {
    pub answer: String,
    pub context_preview: String,
}

impl AgentAnswer {
    fn error() -> Self {
        Self {
            answer: ERROR_ANSWER.to_string(),
            context_preview: String::new(),
        }
    }
}

pub struct AnsweringAgent {
    kb: Arc<KnowledgeBase>,
    model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    retrieval: RetrievalConfig,
    system_prompt: String,
    max_tool_rounds: usize,
}

impl AnsweringAgent {
    pub fn new(kb: Arc<KnowledgeBase>, model: Arc<dyn ChatModel>, config: &Config) -> Self {
        Self {
            kb,
            model,
            tools: ToolRegistry::with_builtins(),
            retrieval: config.retrieval.clone(),
            system_prompt: config.llm.system_prompt.clone(),
            max_tool_rounds: config.llm.max_tool_rounds,
        }
    }

    /// Replace the tool set offered to the model.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Answer `query` in the context of `history`.
    pub async fn answer(&self, query: &str, history: &[Turn]) -> AgentAnswer {
        self.kb.ensure_loaded().await;
        let ctx = ToolContext::new(self.kb.clone(), self.retrieval.clone());

        let answer = match self.run(query, history, &ctx).await {
            Ok(answer) => answer,
            Err(e) => {
                error!(error = %format!("{:#}", e), "agent failed to answer");
                return AgentAnswer::error();
            }
        };

        match self.preview(query, &ctx).await {
            Ok(context_preview) => AgentAnswer {
                answer,
                context_preview,
            },
            Err(e) => {
                error!(error = %format!("{:#}", e), "failed to build context preview");
                AgentAnswer::error()
            }
        }
    }

    fn initial_messages(&self, query: &str, history: &[Turn]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(history.iter().map(ChatMessage::from));
        messages.push(ChatMessage::user(query));
        messages
    }

    async fn run(&self, query: &str, history: &[Turn], ctx: &ToolContext) -> Result<String> {
        let mut messages = self.initial_messages(query, history);
        let specs = self.tools.specs();
        let mut rounds = 0;
        let mut state = AgentState::AwaitingModel;

        loop {
            state = match state {
                AgentState::AwaitingModel => match self.model.complete(&messages, &specs).await {
                    Ok(ModelTurn::Final(text)) => AgentState::Done(text),
                    Ok(ModelTurn::ToolCalls(calls)) => AgentState::ToolRequested(calls),
                    Err(e) => AgentState::Failed(format!("{:#}", e)),
                },
                AgentState::ToolRequested(calls) => {
                    rounds += 1;
                    if rounds > self.max_tool_rounds {
                        AgentState::Failed(format!(
                            "model requested tools more than {} times",
                            self.max_tool_rounds
                        ))
                    } else {
                        messages.push(ChatMessage::assistant_tool_calls(calls.clone()));
                        for call in &calls {
                            let result = self.run_tool(call, ctx).await;
                            messages.push(ChatMessage::tool_result(call, result));
                        }
                        AgentState::AwaitingModel
                    }
                }
                AgentState::Done(answer) => {
                    debug!(rounds, "agent finished");
                    return Ok(answer);
                }
                AgentState::Failed(reason) => bail!(reason),
            };
        }
    }

    async fn run_tool(&self, call: &ToolCall, ctx: &ToolContext) -> String {
        let Some(tool) = self.tools.find(&call.name) else {
            warn!(tool = %call.name, "model called an unknown tool");
            return format!("Error: unknown tool '{}'", call.name);
        };
        debug!(tool = %call.name, "executing tool");
        match tool.execute(call.arguments.clone(), ctx).await {
            Ok(text) => text,
            Err(e) => format!("Error: {:#}", e),
        }
    }

    async fn preview(&self, query: &str, ctx: &ToolContext) -> Result<String> {
        let k = self.retrieval.preview_k;
        match self.retrieval.preview {
            PreviewMode::Resample => {
                let hits = match self.kb.similarity_search(query, k).await {
                    Ok(Some(hits)) => hits,
                    Ok(None) => return Ok(String::new()),
                    Err(e) if self.retrieval.lexical_fallback => {
                        warn!(error = %format!("{:#}", e), "preview falling back to lexical search");
                        self.kb.lexical_search(query, k).await.unwrap_or_default()
                    }
                    Err(e) => return Err(e),
                };
                Ok(join_preview(&hits))
            }
            PreviewMode::Trace => {
                let mut seen: Vec<String> = Vec::new();
                for text in ctx.retrieved() {
                    if seen.len() == k {
                        break;
                    }
                    if !seen.contains(&text) {
                        seen.push(text);
                    }
                }
                Ok(seen.join(PREVIEW_SEPARATOR))
            }
        }
    }
}

fn join_preview(hits: &[ScoredPassage]) -> String {
    hits.iter()
        .map(|h| h.passage.text.as_str())
        .collect::<Vec<_>>()
        .join(PREVIEW_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use docqa_core::chat::{ChatRole, ToolSpec};
    use serde_json::json;
    use std::sync::Mutex;

    use crate::embedding::DisabledEmbedder;

    /// Plays back a fixed list of turns and records what it was sent.
    struct Scripted {
        turns: Mutex<Vec<Result<ModelTurn>>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Scripted {
        fn new(turns: Vec<Result<ModelTurn>>) -> Self {
            Self {
                turns: Mutex::new(turns.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<ModelTurn> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.turns
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(ModelTurn::ToolCalls(vec![call("search_documents")])))
        }
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: "c1".to_string(),
            name: name.to_string(),
            arguments: json!({ "query": "anything" }),
        }
    }

    fn agent(dir: &tempfile::TempDir, model: Arc<Scripted>) -> AnsweringAgent {
        let kb = Arc::new(KnowledgeBase::new(
            dir.path().join("index.sqlite"),
            Arc::new(DisabledEmbedder),
        ));
        AnsweringAgent::new(kb, model, &Config::minimal())
    }

    #[tokio::test]
    async fn test_final_answer_without_tools() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(Scripted::new(vec![Ok(ModelTurn::Final("Hi.".to_string()))]));
        let out = agent(&dir, model.clone())
            .answer("hello", &[Turn::user("earlier"), Turn::assistant("reply")])
            .await;
        assert_eq!(out.answer, "Hi.");
        assert_eq!(out.context_preview, "");

        let seen = model.seen.lock().unwrap();
        let roles: Vec<ChatRole> = seen[0].iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::System, ChatRole::User, ChatRole::Assistant, ChatRole::User]
        );
        assert_eq!(seen[0][0].content, crate::config::DEFAULT_SYSTEM_PROMPT);
        assert_eq!(seen[0][3].content, "hello");
    }

    #[tokio::test]
    async fn test_tool_result_reaches_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(Scripted::new(vec![
            Ok(ModelTurn::ToolCalls(vec![call("search_documents")])),
            Ok(ModelTurn::Final("Nothing indexed.".to_string())),
        ]));
        let out = agent(&dir, model.clone()).answer("q", &[]).await;
        assert_eq!(out.answer, "Nothing indexed.");

        let seen = model.seen.lock().unwrap();
        let last = seen[1].last().unwrap();
        assert_eq!(last.role, ChatRole::Tool);
        assert_eq!(last.content, crate::traits::NO_DOCUMENTS);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_to_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(Scripted::new(vec![
            Ok(ModelTurn::ToolCalls(vec![call("delete_everything")])),
            Ok(ModelTurn::Final("ok".to_string())),
        ]));
        let out = agent(&dir, model.clone()).answer("q", &[]).await;
        assert_eq!(out.answer, "ok");
        let seen = model.seen.lock().unwrap();
        assert!(seen[1].last().unwrap().content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_tool_round_cap() {
        let dir = tempfile::tempdir().unwrap();
        // No scripted turns: the model asks for a tool forever.
        let model = Arc::new(Scripted::new(vec![]));
        let out = agent(&dir, model.clone()).answer("q", &[]).await;
        assert_eq!(out.answer, ERROR_ANSWER);
        assert_eq!(out.context_preview, "");
        // Initial call plus one per allowed round.
        assert_eq!(model.seen.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_model_error_becomes_fixed_answer() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(Scripted::new(vec![Err(anyhow!("quota exceeded"))]));
        let out = agent(&dir, model).answer("q", &[]).await;
        assert_eq!(out, AgentAnswer::error());
    }
}
