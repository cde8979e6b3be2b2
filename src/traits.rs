//! Tools the answering agent can call.
//!
//! A [`Tool`] is described to the chat model by name, description, and a
//! JSON Schema for its parameters, and executed against a [`ToolContext`]
//! that bridges to the knowledge base.
//!
//! ```text
//! ┌────────────────────────────┐
//! │        ToolRegistry        │
//! │  ┌──────────────────────┐  │
//! │  │ search_documents     │  │
//! │  │ (RetrievalTool)      │  │
//! │  └──────────────────────┘  │
//! └─────────────┬──────────────┘
//!               ▼
//!   AnsweringAgent tool loop
//! ```
//!
//! # Usage
//!
//! ```rust
//! use docqa::traits::ToolRegistry;
//!
//! let tools = ToolRegistry::with_builtins();
//! assert!(tools.find("search_documents").is_some());
//! ```

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tracing::warn;

use docqa_core::chat::ToolSpec;
use docqa_core::embedding::embed_query;
use docqa_core::models::ScoredPassage;

use crate::config::RetrievalConfig;
use crate::knowledge::KnowledgeBase;

/// Returned by the retrieval tool when nothing has been ingested.
pub const NO_DOCUMENTS: &str = "No documents found in knowledge base.";

pub const SEARCH_TOOL_NAME: &str = "search_documents";

/// A function exposed to the chat model.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::{json, Value};
/// use docqa::traits::{Tool, ToolContext};
///
/// pub struct PassageCountTool;
///
/// #[async_trait]
/// impl Tool for PassageCountTool {
///     fn name(&self) -> &str { "passage_count" }
///     fn description(&self) -> &str { "Number of indexed passages" }
///
///     fn parameters_schema(&self) -> Value {
///         json!({ "type": "object", "properties": {} })
///     }
///
///     async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<String> {
///         Ok(ctx.knowledge().status().await.passages.to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Function name the model calls, e.g. `"search_documents"`.
    fn name(&self) -> &str;

    /// One-line description the model uses to decide whether to call it.
    fn description(&self) -> &str;

    /// JSON Schema object describing the parameters.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. The returned text is handed back to the model.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Per-answer bridge from tools to the knowledge base.
///
/// Also records every passage text the retrieval tool returned, so the
/// agent can report what it actually saw.
pub struct ToolContext {
    kb: Arc<KnowledgeBase>,
    retrieval: RetrievalConfig,
    trace: Mutex<Vec<String>>,
}

impl ToolContext {
    pub fn new(kb: Arc<KnowledgeBase>, retrieval: RetrievalConfig) -> Self {
        Self {
            kb,
            retrieval,
            trace: Mutex::new(Vec::new()),
        }
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.kb
    }

    /// Search the knowledge base and render the hits as text.
    ///
    /// Never fails:
    /// - no index → [`NO_DOCUMENTS`]
    /// - hits → passage texts joined by a blank line, best first
    /// - query embedding fails → lexical fallback when enabled,
    ///   otherwise `"Search error: <cause>"`
    pub async fn search_documents(&self, query: &str) -> String {
        let index = match self.kb.ensure_loaded().await {
            Some(index) if !index.is_empty() => index,
            _ => return NO_DOCUMENTS.to_string(),
        };

        let hits = match embed_query(self.kb.embedder().as_ref(), query).await {
            Ok(vector) => match index.search(&vector, self.retrieval.top_k) {
                Ok(hits) => hits,
                Err(e) => return format!("Search error: {}", e),
            },
            Err(e) if self.retrieval.lexical_fallback => {
                warn!(error = %e, "query embedding failed, answering from lexical fallback");
                index.lexical_search(query, self.retrieval.fallback_top_k)
            }
            Err(e) => return format!("Search error: {:#}", e),
        };

        self.record(&hits);
        hits.iter()
            .map(|h| h.passage.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn record(&self, hits: &[ScoredPassage]) {
        let mut trace = self.trace.lock().unwrap_or_else(|e| e.into_inner());
        trace.extend(hits.iter().map(|h| h.passage.text.clone()));
    }

    /// Passage texts retrieved so far, in retrieval order.
    pub fn retrieved(&self) -> Vec<String> {
        self.trace.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// The `search_documents` tool.
pub struct RetrievalTool;

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Searches uploaded documents. Input is the user's question."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The user's question"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let query = params
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing required parameter: query"))?;
        Ok(ctx.search_documents(query).await)
    }
}

/// Registry of tools offered to the model.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// A registry holding the retrieval tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(RetrievalTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Specs for every registered tool, in registration order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
