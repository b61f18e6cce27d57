//! Durable storage: submission records, practice statistics and contest results

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::{SubmissionRequest, Verdict};

pub use sqlite::SqliteRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Pending,
    Judging,
    Finished,
}

impl SubmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionState::Pending => "pending",
            SubmissionState::Judging => "judging",
            SubmissionState::Finished => "finished",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(SubmissionState::Pending),
            "judging" => Some(SubmissionState::Judging),
            "finished" => Some(SubmissionState::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    pub id: i64,
    pub user_id: i64,
    pub problem_id: i64,
    pub competition_id: i64,
    pub state: SubmissionState,
    pub verdict: Option<Verdict>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub user_id: i64,
    pub user_name: String,
}

/// Contest data needed to warm the ranking state
#[derive(Debug, Clone, PartialEq)]
pub struct ContestInfo {
    pub id: i64,
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub problem_ids: Vec<i64>,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantStanding {
    pub rank: u32,
    pub user_id: i64,
    pub user_name: String,
    pub pass_count: i64,
    pub penalty_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProblemCounters {
    pub problem_id: i64,
    pub submit_count: i64,
    pub pass_count: i64,
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert a submission in the pending state and return its id
    async fn create_pending_submission(&self, request: &SubmissionRequest) -> Result<i64>;

    async fn mark_judging(&self, submission_id: i64) -> Result<()>;

    async fn finish_submission(&self, submission_id: i64, verdict: &Verdict) -> Result<()>;

    async fn get_submission(&self, submission_id: i64) -> Result<Option<SubmissionRecord>>;

    /// Count a practice verdict; only a user's first accept counts as a pass
    async fn record_practice_outcome(
        &self,
        user_id: i64,
        problem_id: i64,
        accepted: bool,
    ) -> Result<()>;

    async fn load_contest(&self, competition_id: i64) -> Result<Option<ContestInfo>>;

    /// Register a participant unless already known
    async fn ensure_participant(
        &self,
        competition_id: i64,
        user_id: i64,
        user_name: &str,
    ) -> Result<()>;

    /// Overwrite a participant's final standing
    async fn save_participant_standing(
        &self,
        competition_id: i64,
        standing: &ParticipantStanding,
    ) -> Result<()>;

    /// Overwrite a contest problem's counters
    async fn save_problem_counters(
        &self,
        competition_id: i64,
        counters: &ProblemCounters,
    ) -> Result<()>;

    /// Persisted standings ordered by rank
    async fn contest_standings(&self, competition_id: i64) -> Result<Vec<ParticipantStanding>>;

    async fn problem_counters(&self, competition_id: i64) -> Result<Vec<ProblemCounters>>;
}
