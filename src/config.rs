//! Configuration parsing and validation.
//!
//! docqa is configured via a TOML file (default: `config/docqa.toml`).
//! Every section has serde defaults, so an empty file is a valid
//! configuration with embeddings and chat disabled.
//!
//! # Example
//!
//! ```toml
//! [storage]
//! upload_dir = "data/source_docs"
//! index_path = "data/index.sqlite"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [retrieval]
//! top_k = 4
//! preview = "resample"
//!
//! [embedding]
//! provider = "gemini"
//! model = "models/text-embedding-004"
//!
//! [llm]
//! provider = "gemini"
//! model = "gemini-2.5-flash-lite"
//!
//! [server]
//! bind = "0.0.0.0:8001"
//! ```
//!
//! API keys are never stored in the file. They are read from the
//! environment (`OPENAI_API_KEY`, `GOOGLE_API_KEY`), which `main` populates
//! from a `.env` file when present.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docqa_core::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// All defaults. Used when no config file exists yet.
    pub fn minimal() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory that receives uploaded documents.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Fixed location of the persisted vector index.
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            index_path: default_index_path(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("data/source_docs")
}

fn default_index_path() -> PathBuf {
    PathBuf::from("data/index.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

/// How the context preview returned alongside an answer is produced.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PreviewMode {
    /// Run a fresh top-`preview_k` similarity search on the raw query.
    #[default]
    Resample,
    /// Show the passages the agent's tool calls actually retrieved.
    Trace,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_preview_k")]
    pub preview_k: usize,
    #[serde(default)]
    pub preview: PreviewMode,
    /// Answer from word overlap when the query cannot be embedded.
    #[serde(default = "default_true")]
    pub lexical_fallback: bool,
    #[serde(default = "default_fallback_top_k")]
    pub fallback_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            preview_k: default_preview_k(),
            preview: PreviewMode::default(),
            lexical_fallback: true,
            fallback_top_k: default_fallback_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

fn default_preview_k() -> usize {
    2
}

fn default_fallback_top_k() -> usize {
    3
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL override (Ollama server, OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_embed_retries(),
            timeout_secs: default_embed_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Configured model, or the provider's default when it has one.
    pub fn resolved_model(&self) -> Option<String> {
        self.model.clone().or_else(|| match self.provider.as_str() {
            "gemini" => Some("models/text-embedding-004".to_string()),
            _ => None,
        })
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}

fn default_batch_size() -> usize {
    64
}

fn default_embed_retries() -> u32 {
    5
}

fn default_embed_timeout() -> u64 {
    30
}

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer using ONLY the 'search_documents' tool.";

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            temperature: 0.0,
            max_tool_rounds: default_max_tool_rounds(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn resolved_model(&self) -> Option<String> {
        self.model.clone().or_else(|| match self.provider.as_str() {
            "gemini" => Some("gemini-2.5-flash-lite".to_string()),
            _ => None,
        })
    }
}

fn default_max_tool_rounds() -> usize {
    5
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_llm_retries() -> u32 {
    3
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    /// Turns kept per session; the oldest are dropped first.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Sessions untouched for this long are dropped. 0 disables expiry.
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            idle_ttl_secs: default_idle_ttl(),
        }
    }
}

fn default_max_turns() -> usize {
    200
}

fn default_idle_ttl() -> u64 {
    86_400
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8001".to_string()
}

fn default_max_upload_mb() -> usize {
    50
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.fallback_top_k < 1 {
        bail!("retrieval.fallback_top_k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "gemini" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or gemini.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.resolved_model().is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" | "gemini" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or gemini.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.resolved_model().is_none() {
        bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }
    if config.llm.max_tool_rounds == 0 {
        bail!("llm.max_tool_rounds must be >= 1");
    }

    Ok(())
}
