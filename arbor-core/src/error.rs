//! Error types for arbor operations

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ArborError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Glob pattern error: {0}")]
    GlobPattern(String),

    #[error("Could not acquire source tree for {origin}: {message}")]
    Acquisition { origin: String, message: String },

    #[error("Summarizer error: {0}")]
    Summarizer(String),

    #[error("Summarizer call timed out after {0}s")]
    SummarizerTimeout(u64),

    #[error("Root summary key {} collides with an existing entry", .0.display())]
    RootKeyCollision(PathBuf),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Background task failed: {0}")]
    Background(String),

    #[error("Schema version mismatch: database is v{found}, expected v{expected}. Remove the database and rebuild it from the summary cache.")]
    SchemaVersionMismatch { found: i32, expected: i32 },
}

impl ArborError {
    pub fn acquisition(origin: &str, message: impl Into<String>) -> Self {
        Self::Acquisition {
            origin: origin.to_string(),
            message: message.into(),
        }
    }
}
