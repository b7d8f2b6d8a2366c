//! # Blog QA Core
//!
//! Shared, runtime-agnostic logic for Blog QA: data models, sentence-aware
//! chunking, the store abstraction, hybrid title/content ranking, tone
//! resolution, prompt assembly, and the embedding and chat-model traits.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! The `blog-qa` app crate supplies concrete stores and providers and runs
//! the streaming synthesizer on top of these pieces.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod store;
pub mod tone;

pub use error::AskError;
pub use models::{ContextEntry, RetrievalResult};
