//! Error types shared across the pipeline

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

/// Failures returned to the submitting client
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Submission for problem {problem_id} by user {user_id} is already in progress, retry after {window_ms}ms")]
    DuplicateSubmission {
        user_id: i64,
        problem_id: i64,
        window_ms: u64,
    },

    #[error("No judge reply within {0:?}")]
    QueueTimeout(Duration),

    #[error(transparent)]
    UnsupportedLanguage(#[from] UnsupportedLanguage),

    #[error("Internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

/// The sandbox service could not be reached or answered unexpectedly
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Sandbox request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Sandbox returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode sandbox response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Sandbox returned {got} results for {expected} commands")]
    ResultCount { expected: usize, got: usize },
}

/// Test fixtures could not be fetched or parsed
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to download fixture {fixture}: {source:#}")]
    Download {
        fixture: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid fixture archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Fixture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One entity could not be reconciled during a contest flush
#[derive(Debug, Error)]
pub enum FlushError {
    #[error("Unparseable value {value:?} at {key}")]
    Parse { key: String, value: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
