//! # testforge
//!
//! Retrieval-augmented test-case generation.
//!
//! Requirement documents are chunked, embedded and indexed. A generation
//! job retrieves the passages relevant to a scenario, asks a generative
//! backend for structured test cases, validates what comes back and stores
//! the survivors. Stored test cases can be edited and projected into mind
//! maps.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────┐
//! │ Document │──▶│ Chunk+Embed  │──▶│  SQLite  │
//! │  (text)  │   │   (ingest)   │   │ chunks + │
//! └──────────┘   └──────────────┘   │ vectors  │
//!                                   └────┬─────┘
//!                                        │ retrieve
//!                ┌───────────────────────▼──────┐
//!                │ GenerationOrchestrator       │
//!                │ prompt → backend → parse     │
//!                │ (retry, timeout, cancel)     │
//!                └───────────────┬──────────────┘
//!                                ▼
//!                    test cases ──▶ mind maps
//! ```
//!
//! The pure pipeline stages (chunking, retrieval, prompt assembly, response
//! parsing, mind-map projection) live in `testforge-core`; this crate adds
//! SQLite persistence, HTTP providers, the job runner and the two front
//! ends (`tforge` CLI and the HTTP API).
//!
//! ## Quick Start
//!
//! ```bash
//! tforge init
//! tforge ingest ./requirements.txt --title "Checkout"
//! tforge generate --doc <id> --scenario "guest checkout" --count 5
//! tforge serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite entity store and vector index |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Generative backends |
//! | [`ingest`] | Document processing pipeline |
//! | [`orchestrator`] | Generation job runner |
//! | [`services`] | Wiring of the above from a config |
//! | [`server`] | HTTP API |

pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod orchestrator;
pub mod server;
pub mod services;
pub mod sqlite_store;
