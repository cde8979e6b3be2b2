//! Chat model providers with function calling.
//!
//! Concrete [`ChatModel`] implementations selected by `[llm].provider`:
//!
//! | Config Value | Provider | Endpoint |
//! |--------------|----------|----------|
//! | `"disabled"` | [`DisabledChat`] | none, every call fails |
//! | `"openai"` | [`OpenAIChat`] | `POST {url}/v1/chat/completions` |
//! | `"gemini"` | [`GeminiChat`] | `POST .../v1beta/models/{model}:generateContent` |
//!
//! Each provider converts the neutral [`ChatMessage`] list into its wire
//! format and parses the reply into a [`ModelTurn`]. The conversions are
//! plain functions so they can be tested without a network.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use docqa_core::chat::{ChatMessage, ChatModel, ChatRole, ModelTurn, ToolCall, ToolSpec};

use crate::config::LlmConfig;
use crate::http;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChat)),
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        "gemini" => Ok(Arc::new(GeminiChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

fn require_model(config: &LlmConfig) -> Result<String> {
    config
        .resolved_model()
        .ok_or_else(|| anyhow!("llm.model required for {} provider", config.provider))
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| anyhow!("{} environment variable not set", name))
}

// ============ Disabled ============

pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage], _tools: &[ToolSpec]) -> Result<ModelTurn> {
        bail!("Language model provider is disabled")
    }
}

// ============ OpenAI ============

pub struct OpenAIChat {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            model: require_model(config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key: require_env("OPENAI_API_KEY")?,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelTurn> {
        let body = openai_request_body(&self.model, self.temperature, messages, tools);
        let endpoint = format!("{}/v1/chat/completions", self.url.trim_end_matches('/'));
        let json = http::send_json_with_retry("OpenAI", self.max_retries, || {
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        parse_openai_turn(&json)
    }
}

fn openai_message(m: &ChatMessage) -> Value {
    match m.role {
        ChatRole::System => json!({ "role": "system", "content": m.content }),
        ChatRole::User => json!({ "role": "user", "content": m.content }),
        ChatRole::Assistant if !m.tool_calls.is_empty() => {
            let calls: Vec<Value> = m
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments.to_string() }
                    })
                })
                .collect();
            json!({ "role": "assistant", "content": Value::Null, "tool_calls": calls })
        }
        ChatRole::Assistant => json!({ "role": "assistant", "content": m.content }),
        ChatRole::Tool => json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
            "content": m.content
        }),
    }
}

fn openai_request_body(
    model: &str,
    temperature: f32,
    messages: &[ChatMessage],
    tools: &[ToolSpec],
) -> Value {
    let mut body = json!({
        "model": model,
        "temperature": temperature,
        "messages": messages.iter().map(openai_message).collect::<Vec<_>>(),
    });
    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    }
                })
            })
            .collect();
    }
    body
}

fn parse_openai_turn(json: &Value) -> Result<ModelTurn> {
    let message = json
        .pointer("/choices/0/message")
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message"))?;

    if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
        if !calls.is_empty() {
            let mut out = Vec::with_capacity(calls.len());
            for (i, call) in calls.iter().enumerate() {
                let name = call
                    .pointer("/function/name")
                    .and_then(|n| n.as_str())
                    .ok_or_else(|| anyhow!("Invalid OpenAI response: tool call without name"))?;
                // Arguments arrive as a JSON-encoded string.
                let arguments = match call.pointer("/function/arguments") {
                    Some(Value::String(s)) if !s.trim().is_empty() => serde_json::from_str(s)
                        .map_err(|e| anyhow!("Invalid tool call arguments: {}", e))?,
                    Some(Value::Object(o)) => Value::Object(o.clone()),
                    _ => json!({}),
                };
                out.push(ToolCall {
                    id: call
                        .get("id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call_{}", i)),
                    name: name.to_string(),
                    arguments,
                });
            }
            return Ok(ModelTurn::ToolCalls(out));
        }
    }

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default();
    Ok(ModelTurn::Final(content.to_string()))
}

// ============ Gemini ============

pub struct GeminiChat {
    client: reqwest::Client,
    model: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
}

impl GeminiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = require_model(config)?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            model: model.trim_start_matches("models/").to_string(),
            api_key: require_env("GOOGLE_API_KEY")?,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatModel for GeminiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ModelTurn> {
        let body = gemini_request_body(self.temperature, messages, tools);
        let endpoint = format!("{}/models/{}:generateContent", GEMINI_BASE, self.model);
        let json = http::send_json_with_retry("Gemini", self.max_retries, || {
            self.client
                .post(&endpoint)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;
        parse_gemini_turn(&json)
    }
}

/// Build a `generateContent` body.
///
/// System messages become `systemInstruction`. Consecutive tool results
/// are merged into a single `user` content of `functionResponse` parts, as
/// Gemini expects one response turn per function-call turn.
fn gemini_request_body(temperature: f32, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
    let mut system_parts = Vec::new();
    let mut contents: Vec<Value> = Vec::new();
    let mut pending_responses: Vec<Value> = Vec::new();

    let flush = |contents: &mut Vec<Value>, pending: &mut Vec<Value>| {
        if !pending.is_empty() {
            contents.push(json!({ "role": "user", "parts": std::mem::take(pending) }));
        }
    };

    for m in messages {
        match m.role {
            ChatRole::System => system_parts.push(json!({ "text": m.content })),
            ChatRole::Tool => pending_responses.push(json!({
                "functionResponse": {
                    "name": m.name.clone().unwrap_or_default(),
                    "response": { "content": m.content }
                }
            })),
            ChatRole::User => {
                flush(&mut contents, &mut pending_responses);
                contents.push(json!({ "role": "user", "parts": [{ "text": m.content }] }));
            }
            ChatRole::Assistant => {
                flush(&mut contents, &mut pending_responses);
                let parts: Vec<Value> = if m.tool_calls.is_empty() {
                    vec![json!({ "text": m.content })]
                } else {
                    m.tool_calls
                        .iter()
                        .map(|c| json!({ "functionCall": { "name": c.name, "args": c.arguments } }))
                        .collect()
                };
                contents.push(json!({ "role": "model", "parts": parts }));
            }
        }
    }
    flush(&mut contents, &mut pending_responses);

    let mut body = json!({
        "contents": contents,
        "generationConfig": { "temperature": temperature },
    });
    if !system_parts.is_empty() {
        body["systemInstruction"] = json!({ "parts": system_parts });
    }
    if !tools.is_empty() {
        let decls: Vec<Value> = tools
            .iter()
            .map(|t| json!({ "name": t.name, "description": t.description, "parameters": t.parameters }))
            .collect();
        body["tools"] = json!([{ "functionDeclarations": decls }]);
    }
    body
}

fn parse_gemini_turn(json: &Value) -> Result<ModelTurn> {
    let parts = match json.pointer("/candidates/0/content/parts").and_then(|p| p.as_array()) {
        Some(parts) => parts,
        None => {
            if let Some(reason) = json.pointer("/promptFeedback/blockReason").and_then(|r| r.as_str()) {
                bail!("Gemini blocked the prompt: {}", reason);
            }
            if let Some(reason) = json.pointer("/candidates/0/finishReason").and_then(|r| r.as_str()) {
                // A candidate with no parts, e.g. finishReason STOP on an empty reply.
                if reason == "STOP" {
                    return Ok(ModelTurn::Final(String::new()));
                }
                bail!("Gemini returned no content (finishReason {})", reason);
            }
            bail!("Invalid Gemini response: missing candidates[0].content.parts");
        }
    };

    let calls: Vec<ToolCall> = parts
        .iter()
        .filter_map(|p| p.get("functionCall"))
        .enumerate()
        .map(|(i, fc)| ToolCall {
            id: fc
                .get("id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", i)),
            name: fc
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string(),
            arguments: fc.get("args").cloned().unwrap_or_else(|| json!({})),
        })
        .collect();
    if !calls.is_empty() {
        return Ok(ModelTurn::ToolCalls(calls));
    }

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    Ok(ModelTurn::Final(text))
}
