//! # docqa
//!
//! Question answering over uploaded documents, backed by a persisted
//! vector index and a tool-calling chat model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Chunker  │──▶│ Embedder │──▶│ Vector index │
//! │ PDF/text │   │ 1000/200 │   │  remote  │   │ (SQLite file)│
//! └──────────┘   └──────────┘   └──────────┘   └──────┬───────┘
//!                                                     │
//!                            ┌────────────────────────┤
//!                            ▼                        ▼
//!                     ┌─────────────┐          ┌────────────┐
//!                     │  Answering  │◀────────▶│ search_    │
//!                     │    agent    │  tools   │ documents  │
//!                     └──────┬──────┘          └────────────┘
//!                            ▼
//!                  ┌──────────────────┐
//!                  │ HTTP API  /  CLI │
//!                  └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa ingest ./handbook.pdf
//! docqa search "vacation policy"
//! docqa ask "How many vacation days do I get?"
//! docqa serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`loader`] | File → pages (PDF, plain text) |
//! | [`embedding`] | Embedding providers (OpenAI, Ollama, Gemini) |
//! | [`llm`] | Chat model providers with function calling |
//! | [`index_store`] | On-disk form of the vector index |
//! | [`knowledge`] | Lock-guarded handle to the live index |
//! | [`ingest`] | Upload storage and the ingestion pipeline |
//! | [`traits`] | Agent tools, including `search_documents` |
//! | [`agent`] | The answering agent's tool loop |
//! | [`sessions`] | In-memory chat sessions |
//! | [`server`] | HTTP API |
//!
//! Passage models, the chunker, and the in-memory index live in the
//! `docqa-core` crate.

pub mod agent;
pub mod config;
pub mod embedding;
pub mod http;
pub mod index_store;
pub mod ingest;
pub mod knowledge;
pub mod llm;
pub mod loader;
pub mod server;
pub mod sessions;
pub mod traits;
