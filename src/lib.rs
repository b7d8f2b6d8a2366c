//! # Blog QA
//!
//! Question answering over a user's own blog posts.
//!
//! Post bodies are chunked and embedded at ingestion time. At ask time the
//! question is embedded, chunks are ranked by a blend of content and title
//! similarity, and a chat model streams a grounded answer back as
//! server-sent events.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Ingest    │──▶│ Chunk+Embed  │──▶│  SQLite  │
//! │ title/body │   │              │   │  BLOBs   │
//! └────────────┘   └──────────────┘   └────┬─────┘
//!                                          │
//!                  ┌────────────┐   ┌──────▼──────┐
//!   question ─────▶│ Synthesizer│◀──│   Ranker    │
//!                  │ tone+prompt│   └─────────────┘
//!                  └─────┬──────┘
//!                        ▼
//!          exist_in_post_status → context → answer* → end
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! blogqa init
//! blogqa add-category --id 1 --user alice --name Programming
//! blogqa upsert-post --post-id 1 --user alice --category 1 --title "Async Rust in practice"
//! blogqa ingest-title --post-id 1 --title "Async Rust in practice"
//! blogqa ingest-content --post-id 1 --file post.md
//! blogqa ask "How do I cancel a task?" --user alice
//! blogqa serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`embedding`] | OpenAI / Ollama embedding providers |
//! | [`chat`] | Streaming OpenAI-compatible chat client |
//! | [`ingest`] | Title and content ingestion |
//! | [`synth`] | Streaming answer synthesizer |
//! | [`server`] | HTTP server |

pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod migrate;
pub mod server;
pub mod sqlite_store;
pub mod synth;
