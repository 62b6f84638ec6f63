//! Arbor Core - Recursive source tree summarization
//!
//! This library summarizes every file and folder of a source tree bottom-up,
//! keeps each summary in a sidecar cache next to its item, mirrors the results
//! into a queryable SQLite index and ranks them for search and Q&A.

pub mod access;
pub mod analyzer;
pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod inventory;
pub mod node;
pub mod qa;
pub mod runner;
pub mod scoring;
pub mod search;
pub mod source;
pub mod summarizer;
pub mod task;

pub use access::{AccessControl, Action, AllowAll, Caller};
pub use analyzer::{Analyzer, RunStats};
pub use cache::{CacheKey, SummaryCache};
pub use config::Config;
pub use error::ArborError;
pub use index::{IndexedSummary, NodeIndex, TreeNode};
pub use inventory::{InventoryEntry, SnapshotTree};
pub use node::{Node, NodeKind, Snapshot, SnapshotStatus};
pub use qa::{answer_question, select_context, Answer, QaContext};
pub use runner::AnalysisRunner;
pub use scoring::{LexicalScorer, Scorer};
pub use search::{search, SearchHit};
pub use source::{ContentReader, FsContentReader, Materialized, SourceProvider, SourceRouter};
pub use summarizer::{ExtractiveSummarizer, RetryPolicy, Summarizer, SummaryKind};
pub use task::{AnalysisPhase, NoProgress, PhaseTracker, ProgressSink, Task, TaskStatus};

/// Result type alias for arbor operations
pub type Result<T> = std::result::Result<T, ArborError>;
