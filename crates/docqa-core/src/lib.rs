//! # docqa core
//!
//! Runtime-agnostic building blocks for docqa: passage models, the
//! overlapping-window chunker, the in-memory vector index with its lexical
//! fallback, and the [`Embedder`](embedding::Embedder) /
//! [`ChatModel`](chat::ChatModel) traits that the application crate
//! implements against remote providers.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or HTTP code.

pub mod chat;
pub mod chunk;
pub mod embedding;
pub mod index;
pub mod models;
