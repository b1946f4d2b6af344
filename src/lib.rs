//! # repo-rag
//!
//! An incremental semantic index over a project's source code and docs.
//!
//! Files matching the corpus globs are embedded and stored in SQLite along
//! with a content hash, so later passes only re-embed what changed and
//! remove what disappeared. Queries return the top results plus a
//! relevance-filtered set, falling back to the single best match when
//! nothing clears the threshold.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────┐
//! │  Loader  │──▶│  Changes  │──▶│ Embedder │──▶│  Store   │
//! │ globs+fs │   │ hash diff │   │ + retry  │   │  SQLite  │
//! └──────────┘   └───────────┘   └──────────┘   └────┬─────┘
//!                                                    │
//!                        ┌───────────────────────────┤
//!                        ▼                           ▼
//!                  ┌───────────┐               ┌───────────┐
//!                  │    CLI    │               │   HTTP    │
//!                  │   (rag)   │               │ api+tools │
//!                  └───────────┘               └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag init
//! rag index
//! rag search "how is the connection pool sized"
//! rag serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Error types per layer |
//! | [`models`] | Core data types |
//! | [`language`] | Extension to language tag mapping |
//! | [`loader`] | Corpus discovery and file loading |
//! | [`changes`] | Hash-based change detection |
//! | [`embedding`] | Embedding backends, batching, and retry |
//! | [`store`] | Vector store trait, SQLite and in-memory stores |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`progress`] | Indexing pass state and progress reporting |
//! | [`indexer`] | Full and single-file indexing passes |
//! | [`retrieval`] | Query execution and relevance filtering |
//! | [`session`] | Per-session message history |
//! | [`service`] | Operation facade used by every front end |
//! | [`tools`] | Agent-callable tool registry |
//! | [`server`] | HTTP API |

pub mod changes;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod language;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod retrieval;
pub mod server;
pub mod service;
pub mod session;
pub mod store;
pub mod tools;
