//! # code-slice - Hybrid Code Retrieval Engine
//!
//! A Model Context Protocol (MCP) server that indexes a codebase into
//! overlapping line-window chunks and serves ranked retrieval over it:
//! BM25 lexical scoring fused with an optional semantic channel, diversity
//! filtering, token-budgeted context packing, and session memory for
//! picking work back up.
//!
//! ## Key Features
//!
//! - **Deterministic chunking**: pure line-window chunker with boundary
//!   snapping; unchanged input always produces identical chunk ids
//! - **Hybrid Search**: hand-rolled BM25 postings fused with embedding
//!   similarity (FastEmbed, with a deterministic term-vector fallback)
//! - **Diversity**: maximal-marginal-relevance selection over Jaccard
//!   term overlap keeps near-duplicates out of the top results
//! - **Live Index**: debounced file watching applies incremental updates
//! - **Context Packing**: greedy token-budgeted packing with trailing-line
//!   trimming
//! - **Session Memory**: SQLite-backed summaries plus TODO markers and
//!   recent commits for a resume briefing
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   MCP Client    │  (stdio)
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ SliceMcpServer  │  (9 tools, 4 prompts)
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐     ┌──────────────┐
//! │     Engine      │────▶│ CacheManager │
//! └──┬────┬────┬────┘     └──────────────┘
//!    │    │    │
//! ┌──▼──┐┌▼───────┐┌▼────────┐
//! │BM25 ││Semantic││ Watcher  │
//! │Index││ Index  ││(debounce)│
//! └─────┘└────────┘└──────────┘
//! ```

/// Deterministic namespaced cache with TTL and LRU eviction
pub mod cache;

/// Configuration management with environment variable overrides
pub mod config;

/// Embedding providers (FastEmbed and the term-vector fallback)
pub mod embedding;

/// The engine: indexing, retrieval, caches, watcher, and session plumbing
pub mod engine;

/// Error types and utilities
pub mod error;

/// Glob pattern matching for include/exclude filters
pub mod glob_utils;

/// File walking, chunking, and the lexical/semantic indexes
pub mod indexer;

/// MCP server implementation with tools and prompts
pub mod mcp_server;

/// Session memory backed by SQLite, plus git history for resume
pub mod memory;

/// Token-budgeted context packing and hit summaries
pub mod packer;

/// Hybrid score fusion, recency boost, and MMR diversity
pub mod ranker;

/// On-disk layout for the engine's data directory
pub mod storage;

/// Shared tokenization and token estimation
pub mod text;

/// MCP request/response types with JSON schema definitions
pub mod types;

/// Debounced file watching with a polling fallback
pub mod watcher;
