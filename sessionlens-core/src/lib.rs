//! # sessionlens-core
//!
//! Core library for sessionlens - local Claude Code session history and
//! usage statistics.
//!
//! This library provides:
//! - Transcript discovery over the `~/.claude/projects` JSONL layout
//! - An in-memory session and message index built from append-only transcripts
//! - Cached usage statistics with change-driven recomputation
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Store:** transcript files on disk (immutable inputs, append-only)
//! - **Index:** parsed messages grouped into sessions and threads
//! - **Snapshot:** folded statistics served from an invalidate/recompute cache
//!
//! ## Example
//!
//! ```rust,no_run
//! use sessionlens_core::{Config, QueryService, TranscriptStore};
//!
//! let config = Config::load().expect("failed to load config");
//! let store = TranscriptStore::from_config(&config.claude).expect("no Claude home found");
//! let service = QueryService::with_config(store, &config.stats);
//!
//! let stats = service.stats().expect("aggregation failed");
//! println!("{} sessions, {} messages", stats.total_sessions, stats.total_messages);
//! ```

// Re-export commonly used items at the crate root
pub use aggregator::{StatsAggregator, UsageSnapshot};
pub use config::Config;
pub use error::{Error, Result};
pub use query::QueryService;
pub use store::TranscriptStore;
pub use types::*;

// Public modules
pub mod aggregator;
pub mod config;
pub mod error;
pub mod format;
pub mod indexer;
pub mod logging;
pub mod query;
pub mod store;
pub mod types;
