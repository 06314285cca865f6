//! # Kontext Core
//!
//! Pure retrieval logic for Kontext: code data models, chunking, the
//! change classifier, the store abstraction, the five retrieval strategies,
//! and rank fusion.
//!
//! This crate contains no tokio, sqlx, tree-sitter, or filesystem I/O.
//! Parsing, persistence, and embedding providers live in the `kontext`
//! app crate and reach this crate through the [`store::Store`] and
//! [`embedding::Embedder`] traits.

pub mod changes;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod models;
pub mod plan;
pub mod search;
pub mod store;
