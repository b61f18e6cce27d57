//! Judge worker: takes tasks off the queue, judges them and publishes the outcome

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{SubmissionRequest, Verdict};
use crate::judge::{CaseSource, JudgeInput, StrategyRegistry};
use crate::notifier::{JudgeEvent, Notifier};
use crate::queue::{JobQueue, JudgeReply, JudgeTask};
use crate::ranking::RankingEngine;
use crate::repository::Repository;

/// Pause after a failed dequeue before trying again
const RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct Worker {
    id: usize,
    queue: Arc<dyn JobQueue>,
    repo: Arc<dyn Repository>,
    registry: Arc<StrategyRegistry>,
    ranking: Arc<RankingEngine>,
    notifier: Arc<Notifier>,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: Arc<dyn JobQueue>,
        repo: Arc<dyn Repository>,
        registry: Arc<StrategyRegistry>,
        ranking: Arc<RankingEngine>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            id,
            queue,
            repo,
            registry,
            ranking,
            notifier,
        }
    }

    pub async fn run(self, token: CancellationToken) {
        info!("Judge worker {} started, waiting for tasks...", self.id);
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = self.queue.pop() => next,
            };
            match next {
                Ok(task) => {
                    self.process(task).await;
                }
                Err(e) => {
                    warn!("Worker {} failed to take a task: {:#}", self.id, e);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }
        info!("Judge worker {} stopped", self.id);
    }

    /// Judge one task end to end; failures after judging are logged, never raised
    pub async fn process(&self, task: JudgeTask) -> JudgeReply {
        let request = &task.request;
        info!(
            "Received judge task: submission_id={:?}, problem_id={}, language={}",
            task.submission_id, request.problem_id, request.language
        );

        if let Some(id) = task.submission_id {
            if let Err(e) = self.repo.mark_judging(id).await {
                warn!("Failed to mark submission {} as judging: {:#}", id, e);
            }
        }
        self.notifier.push(
            request.user_id,
            &JudgeEvent::Judging {
                submission_id: task.submission_id,
                problem_id: request.problem_id,
            },
        );

        let verdict = self.judge(&task).await;

        if let Some(id) = task.submission_id {
            self.record_statistics(request, &verdict).await;
            if let Err(e) = self.repo.finish_submission(id, &verdict).await {
                error!("Failed to store verdict of submission {}: {:#}", id, e);
            }
        }

        let reply = JudgeReply::new(&task, verdict);
        self.notifier
            .push(request.user_id, &JudgeEvent::Result(reply.clone()));
        if let Err(e) = self.queue.reply(&task.correlation_id, &reply).await {
            error!(
                "Failed to send reply for submission {:?}: {:#}",
                task.submission_id, e
            );
        }

        info!(
            "Judge task completed: submission_id={:?}, verdict={}",
            task.submission_id, reply.verdict.status
        );
        reply
    }

    async fn judge(&self, task: &JudgeTask) -> Verdict {
        let request = &task.request;
        let Some(strategy) = self.registry.get(request.language) else {
            return Verdict::system_error(format!("No judge registered for {}", request.language));
        };

        let fixture = request.fixture_ref();
        let source = match &task.example {
            Some(example) => CaseSource::Example(example),
            None => CaseSource::Fixture(&fixture),
        };

        strategy
            .judge(JudgeInput {
                code: &request.code,
                source,
                time_limit_ms: request.time_limit_ms,
                memory_limit_mb: request.memory_limit_mb,
            })
            .await
    }

    async fn record_statistics(&self, request: &SubmissionRequest, verdict: &Verdict) {
        if !request.is_contest() {
            if let Err(e) = self
                .repo
                .record_practice_outcome(request.user_id, request.problem_id, verdict.is_accepted())
                .await
            {
                error!(
                    "Failed to update statistics of problem {}: {:#}",
                    request.problem_id, e
                );
            }
            return;
        }

        match self.ranking.record_verdict(request, verdict, Utc::now()).await {
            Ok(Some(standing)) => debug!(
                "Contest {} user {}: {} solved, {} penalty",
                request.competition_id,
                request.user_id,
                standing.pass_count,
                standing.penalty_minutes
            ),
            Ok(None) => debug!(
                "Verdict for problem {} not ranked in contest {}",
                request.problem_id, request.competition_id
            ),
            Err(e) => error!(
                "Failed to rank verdict in contest {}: {:#}",
                request.competition_id, e
            ),
        }
    }
}
