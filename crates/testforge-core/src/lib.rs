//! # testforge core
//!
//! Runtime-agnostic pieces of the test case generation pipeline: data
//! models, chunking, the embedding and vector index traits, retrieval,
//! prompt assembly, response parsing, mind-map derivation, and the entity
//! store abstraction.
//!
//! This crate has no tokio, sqlx, or HTTP dependencies. The native
//! application (`testforge`) supplies SQLite storage, HTTP providers and
//! the async job orchestrator on top of these traits.

pub mod backend;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod mindmap;
pub mod models;
pub mod parse;
pub mod prompt;
pub mod retrieve;
pub mod store;

pub use error::{Error, Result};
