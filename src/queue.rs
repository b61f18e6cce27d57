//! Work queue with request/reply correlation

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{InlineExample, SubmissionRequest, Verdict};

/// Priority used for every submission today
pub const DEFAULT_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Unit of work consumed by a judge worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeTask {
    pub correlation_id: String,
    /// Durable record to update; `None` for test runs
    pub submission_id: Option<i64>,
    pub request: SubmissionRequest,
    /// Judge against this single case instead of the stored fixtures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<InlineExample>,
}

/// Verdict payload returned to the waiting dispatcher and pushed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeReply {
    pub submission_id: Option<i64>,
    pub problem_id: i64,
    /// Human-readable status
    pub result: String,
    pub verdict: Verdict,
}

impl JudgeReply {
    pub fn new(task: &JudgeTask, verdict: Verdict) -> Self {
        Self {
            submission_id: task.submission_id,
            problem_id: task.request.problem_id,
            result: verdict.status.label().to_string(),
            verdict,
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a task; higher priority is served first, FIFO within a priority
    async fn push(&self, task: &JudgeTask, priority: u8) -> Result<()>;

    /// Wait for the next task
    async fn pop(&self) -> Result<JudgeTask>;

    /// Deliver the reply correlated with `correlation_id`
    async fn reply(&self, correlation_id: &str, reply: &JudgeReply) -> Result<()>;

    /// Wait up to `timeout` for the correlated reply; `None` on timeout
    async fn await_reply(&self, correlation_id: &str, timeout: Duration)
        -> Result<Option<JudgeReply>>;
}
