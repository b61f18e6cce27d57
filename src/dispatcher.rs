//! Submission Dispatcher
//!
//! Intake of client submissions: deduplicates rapid resubmission of the same
//! problem, records the submission, enqueues it and waits for the correlated
//! judge reply. A reply timeout does not cancel the queued work; the verdict
//! still lands in durable storage and is pushed to the client when it arrives.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{InlineExample, Language, RequestContext, SubmissionRequest, SubmitCode};
use crate::error::DispatchError;
use crate::fast_store::{keys, FastStore};
use crate::queue::{JobQueue, JudgeReply, JudgeTask, DEFAULT_PRIORITY};
use crate::repository::Repository;

pub struct Dispatcher {
    store: Arc<dyn FastStore>,
    queue: Arc<dyn JobQueue>,
    repo: Arc<dyn Repository>,
    dedup_window: Duration,
    reply_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn FastStore>,
        queue: Arc<dyn JobQueue>,
        repo: Arc<dyn Repository>,
        dedup_window: Duration,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            repo,
            dedup_window,
            reply_timeout,
        }
    }

    /// Judge a submission against the problem's stored fixtures
    pub async fn submit(
        &self,
        ctx: &RequestContext,
        body: SubmitCode,
    ) -> Result<JudgeReply, DispatchError> {
        let language: Language = body.language.parse()?;
        let request = SubmissionRequest::new(ctx, body, language, Utc::now());
        let correlation_id = self.acquire(&request).await?;

        let submission_id = self.repo.create_pending_submission(&request).await?;
        info!(
            "Submission {} accepted: user {}, problem {}, {}",
            submission_id, request.user_id, request.problem_id, request.language
        );

        let task = JudgeTask {
            correlation_id,
            submission_id: Some(submission_id),
            request,
            example: None,
        };
        self.dispatch(task).await
    }

    /// Judge code against a single inline example; nothing is recorded
    pub async fn test_run(
        &self,
        ctx: &RequestContext,
        body: SubmitCode,
        example: InlineExample,
    ) -> Result<JudgeReply, DispatchError> {
        let language: Language = body.language.parse()?;
        let request = SubmissionRequest::new(ctx, body, language, Utc::now());
        let correlation_id = self.acquire(&request).await?;

        let task = JudgeTask {
            correlation_id,
            submission_id: None,
            request,
            example: Some(example),
        };
        self.dispatch(task).await
    }

    /// Take the dedup lock of (user, problem); its expiry is the release
    async fn acquire(&self, request: &SubmissionRequest) -> Result<String, DispatchError> {
        let correlation_id = Uuid::new_v4().to_string();
        let key = keys::dedup(request.user_id, request.problem_id);

        if !self
            .store
            .set_nx(&key, &correlation_id, self.dedup_window)
            .await?
        {
            debug!(
                "Rejected duplicate submission of problem {} by user {}",
                request.problem_id, request.user_id
            );
            return Err(DispatchError::DuplicateSubmission {
                user_id: request.user_id,
                problem_id: request.problem_id,
                window_ms: self.dedup_window.as_millis() as u64,
            });
        }
        Ok(correlation_id)
    }

    async fn dispatch(&self, task: JudgeTask) -> Result<JudgeReply, DispatchError> {
        self.queue.push(&task, DEFAULT_PRIORITY).await?;

        match self
            .queue
            .await_reply(&task.correlation_id, self.reply_timeout)
            .await?
        {
            Some(reply) => Ok(reply),
            None => {
                warn!(
                    "No verdict for submission {:?} (problem {}) within {:?}",
                    task.submission_id, task.request.problem_id, self.reply_timeout
                );
                Err(DispatchError::QueueTimeout(self.reply_timeout))
            }
        }
    }
}
