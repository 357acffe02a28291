//! # mementa-index
//!
//! Embedded SQLite index over the vault: derived state, rebuildable from the
//! note files at any time.
//!
//! This crate provides:
//! - The database manager (schema bootstrap, pragmas, transactions,
//!   integrity, vacuum)
//! - A full-text index over markdown-stripped bodies (FTS5, BM25 ranking,
//!   highlighted snippets)
//! - The directed link graph (backlinks, bounded BFS, orphan detection)
//! - The hybrid search engine blending textual relevance with link
//!   centrality

pub mod engine;
pub mod fts;
pub mod graph;
pub mod manager;

pub use engine::{
    BatchIndexReport, EngineStats, IndexFailure, SearchEngine, SearchMetrics, SearchOptions,
    SearchResult,
};
pub use fts::{strip_markdown, tokenize_query, FtsHit, FtsIndex, FtsMetrics, FtsQuery};
pub use graph::{
    ConnectedNode, ConnectedOptions, Direction, GraphLink, GraphStats, LinkGraph, OrphanNote,
    TopTarget,
};
pub use manager::{Database, DatabaseStats, DbOptions};
