//! Contest flush: copies live ranking state into durable storage when the
//! contest marker expires.
//!
//! Writes are absolute values, so repeated expiry events for the same contest
//! leave durable storage unchanged. The fast state is not deleted here; its
//! keys outlive the marker and expire on their own.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::engine::live_standings;
use super::read_counter;
use crate::error::FlushError;
use crate::fast_store::{keys, FastStore};
use crate::repository::{ProblemCounters, Repository};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub competition_id: i64,
    pub participants_saved: usize,
    pub problems_saved: usize,
    pub skipped: usize,
}

pub struct ContestFlusher {
    store: Arc<dyn FastStore>,
    repo: Arc<dyn Repository>,
}

impl ContestFlusher {
    pub fn new(store: Arc<dyn FastStore>, repo: Arc<dyn Repository>) -> Self {
        Self { store, repo }
    }

    /// Consume expiry events until cancelled or the stream ends
    pub async fn run(self, mut events: UnboundedReceiver<String>, token: CancellationToken) {
        info!("Contest flush listener started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => {
                    let Some(key) = event else {
                        warn!("Expiry event stream ended");
                        break;
                    };
                    if let Err(e) = self.handle_expired_key(&key).await {
                        error!("Flush triggered by {} failed: {:#}", key, e);
                    }
                }
            }
        }
        info!("Contest flush listener stopped");
    }

    /// React to one expired key; keys other than contest markers are ignored
    pub async fn handle_expired_key(&self, key: &str) -> Result<Option<FlushReport>> {
        let Some(cid) = keys::parse_contest_marker(key) else {
            return Ok(None);
        };
        info!("Contest {} marker expired", cid);
        self.flush_contest(cid).await.map(Some)
    }

    pub async fn flush_contest(&self, cid: i64) -> Result<FlushReport> {
        info!("Flushing contest {}", cid);
        let mut report = FlushReport {
            competition_id: cid,
            ..FlushReport::default()
        };

        let live = live_standings(self.store.as_ref(), cid).await?;
        let ranked = live.standings.len() + live.skipped;
        report.skipped += live.skipped;

        for standing in &live.standings {
            match self.repo.save_participant_standing(cid, standing).await {
                Ok(()) => report.participants_saved += 1,
                Err(e) => {
                    report.skipped += 1;
                    warn!(
                        "Skipping standing of user {} in contest {}: {:#}",
                        standing.user_id, cid, e
                    );
                }
            }
        }

        let Some(problem_ids) = self.problem_ids(cid, ranked > 0).await? else {
            info!("Contest {} has no live state left, nothing to flush", cid);
            return Ok(report);
        };

        for problem_id in problem_ids {
            match self.problem_counters(cid, problem_id).await {
                Ok(counters) => match self.repo.save_problem_counters(cid, &counters).await {
                    Ok(()) => report.problems_saved += 1,
                    Err(e) => {
                        report.skipped += 1;
                        warn!(
                            "Skipping counters of problem {} in contest {}: {:#}",
                            problem_id, cid, e
                        );
                    }
                },
                Err(e) => {
                    report.skipped += 1;
                    warn!(
                        "Skipping counters of problem {} in contest {}: {}",
                        problem_id, cid, e
                    );
                }
            }
        }

        info!(
            "Flushed contest {}: {} participants, {} problems, {} skipped",
            cid, report.participants_saved, report.problems_saved, report.skipped
        );
        Ok(report)
    }

    /// Problems to reconcile
    ///
    /// Taken from the live problem list; when that is gone but participants
    /// remain, from durable storage. `None` when no live state is left at all.
    async fn problem_ids(&self, cid: i64, has_participants: bool) -> Result<Option<Vec<i64>>> {
        if let Some(raw) = self.store.get(&keys::contest_problems(cid)).await? {
            match serde_json::from_str::<Vec<i64>>(&raw) {
                Ok(ids) => return Ok(Some(ids)),
                Err(_) => warn!(
                    "{}",
                    FlushError::Parse {
                        key: keys::contest_problems(cid),
                        value: raw,
                    }
                ),
            }
        } else if !has_participants {
            return Ok(None);
        }

        Ok(self
            .repo
            .load_contest(cid)
            .await?
            .map(|contest| contest.problem_ids))
    }

    async fn problem_counters(&self, cid: i64, problem_id: i64) -> Result<ProblemCounters, FlushError> {
        let store = self.store.as_ref();
        Ok(ProblemCounters {
            problem_id,
            submit_count: read_counter(store, &keys::problem_submit(cid, problem_id)).await?,
            pass_count: read_counter(store, &keys::problem_pass(cid, problem_id)).await?,
        })
    }
}
