use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{read_counter, PENALTY_MINUTES};
use crate::core::{SubmissionRequest, Verdict};
use crate::fast_store::{keys, FastStore, UpdatedStanding, VerdictUpdate};
use crate::repository::{ContestInfo, ParticipantStanding, Repository};

/// Live contest window as seen by the fast store
#[derive(Debug, Clone, PartialEq)]
pub struct WarmContest {
    pub id: i64,
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub problem_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContestState {
    Warm(WarmContest),
    /// The contest is over; live state is no longer kept
    Closed,
    NotFound,
}

pub struct RankingEngine {
    store: Arc<dyn FastStore>,
    repo: Arc<dyn Repository>,
    grace: Duration,
}

impl RankingEngine {
    pub fn new(store: Arc<dyn FastStore>, repo: Arc<dyn Repository>, grace: Duration) -> Self {
        Self { store, repo, grace }
    }

    /// Marker lifetime and data lifetime for a contest ending at `end`
    fn lifetimes(&self, end: DateTime<Utc>, now: DateTime<Utc>) -> (Duration, Duration) {
        let remaining = (end - now).to_std().unwrap_or(Duration::ZERO);
        let marker = remaining + self.grace;
        (marker, marker + self.grace)
    }

    /// Make sure live state exists for `cid`, loading it from durable storage if cold
    pub async fn ensure_warm(&self, cid: i64, now: DateTime<Utc>) -> Result<ContestState> {
        if let Some(warm) = self.read_warm(cid).await? {
            if now >= warm.end {
                return Ok(ContestState::Closed);
            }
            return Ok(ContestState::Warm(warm));
        }

        let Some(contest) = self.repo.load_contest(cid).await? else {
            return Ok(ContestState::NotFound);
        };
        if now >= contest.end {
            return Ok(ContestState::Closed);
        }

        self.seed(&contest, now).await?;
        Ok(ContestState::Warm(WarmContest {
            id: contest.id,
            begin: contest.begin,
            end: contest.end,
            problem_ids: contest.problem_ids,
        }))
    }

    /// Warm state recorded in the fast store, if complete
    async fn read_warm(&self, cid: i64) -> Result<Option<WarmContest>> {
        let Some(end) = self.store.get(&keys::contest_marker(cid)).await? else {
            return Ok(None);
        };
        let begin = self.store.get(&keys::contest_begin(cid)).await?;
        let problems = self.store.get(&keys::contest_problems(cid)).await?;

        let (Some(begin), Some(problems)) = (begin, problems) else {
            warn!("Contest {} has a marker but partial state, reloading", cid);
            return Ok(None);
        };

        let parse_millis = |raw: &str| {
            raw.parse::<i64>()
                .ok()
                .and_then(DateTime::from_timestamp_millis)
                .with_context(|| format!("Invalid timestamp {:?} for contest {}", raw, cid))
        };

        Ok(Some(WarmContest {
            id: cid,
            begin: parse_millis(&begin)?,
            end: parse_millis(&end)?,
            problem_ids: serde_json::from_str(&problems)
                .with_context(|| format!("Invalid problem list for contest {}", cid))?,
        }))
    }

    async fn seed(&self, contest: &ContestInfo, now: DateTime<Utc>) -> Result<()> {
        let cid = contest.id;
        let (marker_ttl, data_ttl) = self.lifetimes(contest.end, now);

        self.store
            .set(
                &keys::contest_begin(cid),
                &contest.begin.timestamp_millis().to_string(),
                data_ttl,
            )
            .await?;
        self.store
            .set(
                &keys::contest_problems(cid),
                &serde_json::to_string(&contest.problem_ids)?,
                data_ttl,
            )
            .await?;

        for problem_id in &contest.problem_ids {
            self.store
                .set_nx(&keys::problem_submit(cid, *problem_id), "0", data_ttl)
                .await?;
            self.store
                .set_nx(&keys::problem_pass(cid, *problem_id), "0", data_ttl)
                .await?;
        }

        for participant in &contest.participants {
            self.seed_participant(cid, participant.user_id, &participant.user_name, data_ttl)
                .await?;
        }

        // Marker last, so a visible marker implies seeded data
        self.store
            .set(
                &keys::contest_marker(cid),
                &contest.end.timestamp_millis().to_string(),
                marker_ttl,
            )
            .await?;

        info!(
            "Warmed contest {}: {} problems, {} participants, marker expires in {}s",
            cid,
            contest.problem_ids.len(),
            contest.participants.len(),
            marker_ttl.as_secs()
        );
        Ok(())
    }

    /// Zero counters for a participant; true if the participant was new to the ranking
    async fn seed_participant(
        &self,
        cid: i64,
        user_id: i64,
        user_name: &str,
        ttl: Duration,
    ) -> Result<bool> {
        self.store
            .set_nx(&keys::user_pass(cid, user_id), "0", ttl)
            .await?;
        self.store
            .set_nx(&keys::user_penalty(cid, user_id), "0", ttl)
            .await?;
        let member = user_id.to_string();
        let added = self
            .store
            .zadd_nx(&keys::ranking(cid), &member, 0.0, ttl)
            .await?;
        // Names are only recorded once; a known participant keeps theirs
        if added && !user_name.is_empty() {
            self.store
                .hset(&keys::user_names(cid), &member, user_name, ttl)
                .await?;
        }
        Ok(added)
    }

    /// Apply a judged contest submission to the live ranking
    ///
    /// Returns `None` when the contest has no live state to update (unknown,
    /// already over, or the problem is not part of it).
    pub async fn record_verdict(
        &self,
        request: &SubmissionRequest,
        verdict: &Verdict,
        now: DateTime<Utc>,
    ) -> Result<Option<UpdatedStanding>> {
        let cid = request.competition_id;
        let contest = match self.ensure_warm(cid, now).await? {
            ContestState::Warm(contest) => contest,
            state => {
                info!(
                    "Submission for contest {} not ranked, contest is {:?}",
                    cid, state
                );
                return Ok(None);
            }
        };

        if !contest.problem_ids.contains(&request.problem_id) {
            warn!(
                "Problem {} is not part of contest {}, not ranked",
                request.problem_id, cid
            );
            return Ok(None);
        }

        let (_, data_ttl) = self.lifetimes(contest.end, now);
        let uid = request.user_id;

        if self
            .seed_participant(cid, uid, &request.user_name, data_ttl)
            .await?
        {
            debug!("Registered user {} in contest {}", uid, cid);
            self.repo
                .ensure_participant(cid, uid, &request.user_name)
                .await?;
        }

        let elapsed_minutes = (request.submitted_at - contest.begin).num_minutes().max(0);
        let update = VerdictUpdate {
            ranking_key: keys::ranking(cid),
            member: uid.to_string(),
            solved_key: keys::user_solved(cid, uid),
            user_pass_key: keys::user_pass(cid, uid),
            user_penalty_key: keys::user_penalty(cid, uid),
            problem_pass_key: keys::problem_pass(cid, request.problem_id),
            problem_submit_key: keys::problem_submit(cid, request.problem_id),
            problem_id: request.problem_id,
            accepted: verdict.is_accepted(),
            elapsed_minutes,
            penalty_minutes: PENALTY_MINUTES,
            ttl: data_ttl,
        };

        let standing = self.store.apply_verdict(&update).await?;
        debug!(
            "Contest {} user {}: pass={} penalty={}",
            cid, uid, standing.pass_count, standing.penalty_minutes
        );
        Ok(Some(standing))
    }

    /// Current standings: live while the contest is running, persisted otherwise
    pub async fn standings(&self, cid: i64, now: DateTime<Utc>) -> Result<Vec<ParticipantStanding>> {
        match self.ensure_warm(cid, now).await? {
            ContestState::Warm(_) => Ok(live_standings(self.store.as_ref(), cid).await?.standings),
            ContestState::Closed | ContestState::NotFound => {
                self.repo.contest_standings(cid).await
            }
        }
    }
}

/// Standings read from one snapshot of the ranking index
#[derive(Debug, Default)]
pub(crate) struct LiveStandings {
    pub standings: Vec<ParticipantStanding>,
    /// Ranking members that could not be read
    pub skipped: usize,
}

/// Standings read from the fast store in ranking order
///
/// Entries that cannot be read are logged and counted as skipped.
pub(crate) async fn live_standings(store: &dyn FastStore, cid: i64) -> Result<LiveStandings> {
    let ranking = store.zrange_with_scores(&keys::ranking(cid)).await?;
    let names = store.hgetall(&keys::user_names(cid)).await?;

    let mut live = LiveStandings {
        standings: Vec::with_capacity(ranking.len()),
        skipped: 0,
    };
    for (position, (member, _)) in ranking.iter().enumerate() {
        let Ok(user_id) = member.parse::<i64>() else {
            warn!("Skipping ranking member {:?} of contest {}", member, cid);
            live.skipped += 1;
            continue;
        };

        let counters = async {
            let pass_count = read_counter(store, &keys::user_pass(cid, user_id)).await?;
            let penalty_minutes = read_counter(store, &keys::user_penalty(cid, user_id)).await?;
            Ok::<_, crate::error::FlushError>((pass_count, penalty_minutes))
        };
        match counters.await {
            Ok((pass_count, penalty_minutes)) => live.standings.push(ParticipantStanding {
                rank: position as u32 + 1,
                user_id,
                user_name: names.get(member).cloned().unwrap_or_default(),
                pass_count,
                penalty_minutes,
            }),
            Err(e) => {
                warn!("Skipping user {} of contest {}: {}", user_id, cid, e);
                live.skipped += 1;
            }
        }
    }
    Ok(live)
}
