//! # Kontext
//!
//! A local code-context engine: structural indexing and hybrid retrieval
//! over a source tree, for AI coding agents and humans alike.
//!
//! Kontext parses source files with tree-sitter, cuts them into
//! declaration-sized chunks, stores them in SQLite (FTS5 + embedding
//! BLOBs), and answers queries by running several retrieval strategies
//! concurrently and fusing their rankings.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────┐   ┌───────────┐
//! │ Discovery  │──▶│ Change       │──▶│ Parse+Chunk │──▶│  SQLite   │
//! │ (ignore)   │   │ detection    │   │ +Embed      │   │ FTS5+Vec  │
//! └────────────┘   └──────────────┘   └─────────────┘   └─────┬─────┘
//!        ▲                                                    │
//!   ┌────┴────┐                        ┌──────────────────────┤
//!   │ Watcher │                        ▼                      ▼
//!   └─────────┘                  ┌──────────┐          ┌────────────┐
//!                                │ Planner  │─────────▶│ Strategies │──▶ Fusion
//!                                └──────────┘          └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ctx init                          # index the current directory
//! ctx find "where are tokens validated"
//! ctx symbols --name validateToken --mode exact
//! ctx deps src/auth.ts --reverse
//! ctx watch                         # keep the index fresh
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration under `.ctx/` |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation and versioning |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`languages`] | tree-sitter grammar registry |
//! | [`parser`] | Per-language declaration extraction |
//! | [`discovery`] | Source file enumeration |
//! | [`vcs`] | Git working-tree state |
//! | [`incremental`] | Change detection with the git fast path |
//! | [`embedding`] | Embedding providers |
//! | [`progress`] | Indexing progress reporting |
//! | [`indexer`] | The indexing pipeline |
//! | [`watcher`] | Watch mode |
//! | [`status`] | `ctx status` |
//! | [`index_cmd`] | `ctx init` / `ctx update` |
//! | [`query`] | `ctx find` / `symbols` / `deps` / `chunk` |

pub mod config;
pub mod db;
pub mod discovery;
pub mod embedding;
pub mod incremental;
pub mod index_cmd;
pub mod indexer;
pub mod languages;
pub mod logging;
pub mod migrate;
pub mod parser;
pub mod progress;
pub mod query;
pub mod sqlite_store;
pub mod status;
pub mod vcs;
pub mod watcher;
