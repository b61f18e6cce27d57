//! Fast key-value / sorted-set store used for dedup locks and live contest state

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

/// Key naming of everything kept in the fast store
pub mod keys {
    pub const CONTEST_MARKER_PREFIX: &str = "competition_time_out:";

    pub fn dedup(user_id: i64, problem_id: i64) -> String {
        format!("submission:user:{}_{}", user_id, problem_id)
    }

    /// Time-boxed marker whose expiry triggers the contest flush
    pub fn contest_marker(cid: i64) -> String {
        format!("{}{}", CONTEST_MARKER_PREFIX, cid)
    }

    /// Contest id of an expired marker key, if it is one
    pub fn parse_contest_marker(key: &str) -> Option<i64> {
        key.strip_prefix(CONTEST_MARKER_PREFIX)?.parse().ok()
    }

    pub fn contest_begin(cid: i64) -> String {
        format!("competition_begin:{}", cid)
    }

    pub fn contest_problems(cid: i64) -> String {
        format!("competition:{}:problems", cid)
    }

    pub fn ranking(cid: i64) -> String {
        format!("competition_ranking:{}", cid)
    }

    pub fn user_names(cid: i64) -> String {
        format!("competition_user_names:{}", cid)
    }

    pub fn user_pass(cid: i64, uid: i64) -> String {
        format!("competition_user_pass:{}:{}", cid, uid)
    }

    pub fn user_penalty(cid: i64, uid: i64) -> String {
        format!("competition_user_penalty:{}:{}", cid, uid)
    }

    pub fn user_solved(cid: i64, uid: i64) -> String {
        format!("competition_user_solved:{}:{}", cid, uid)
    }

    pub fn problem_pass(cid: i64, pid: i64) -> String {
        format!("competition_problem_pass:{}:{}", cid, pid)
    }

    pub fn problem_submit(cid: i64, pid: i64) -> String {
        format!("competition_problem_submit:{}:{}", cid, pid)
    }
}

/// Keys and inputs of one contest verdict, applied atomically by the store
#[derive(Debug, Clone, PartialEq)]
pub struct VerdictUpdate {
    pub ranking_key: String,
    pub member: String,
    pub solved_key: String,
    pub user_pass_key: String,
    pub user_penalty_key: String,
    pub problem_pass_key: String,
    pub problem_submit_key: String,
    pub problem_id: i64,
    pub accepted: bool,
    pub elapsed_minutes: i64,
    pub penalty_minutes: i64,
    /// Lifetime given to keys the update creates
    pub ttl: Duration,
}

/// Participant counters after an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatedStanding {
    pub pass_count: i64,
    pub penalty_minutes: i64,
}

#[async_trait]
pub trait FastStore: Send + Sync {
    /// `SET NX` with a lifetime; true if this call created the key
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Add `member` with `score` unless it is already present; true if added
    async fn zadd_nx(&self, key: &str, member: &str, score: f64, ttl: Duration) -> Result<bool>;

    /// All members ordered by ascending score
    async fn zrange_with_scores(&self, key: &str) -> Result<Vec<(String, f64)>>;

    async fn hset(&self, key: &str, field: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Apply one contest verdict as a single atomic step
    ///
    /// The problem submit counter is always incremented. If the problem is not
    /// yet in the participant's solved set, an accepted verdict marks it solved
    /// and adds one pass to the participant and the problem plus the elapsed
    /// minutes as penalty, while any other verdict adds the fixed penalty.
    /// The ranking score is rewritten from the resulting counters.
    async fn apply_verdict(&self, update: &VerdictUpdate) -> Result<UpdatedStanding>;

    /// Stream of keys removed by expiry
    async fn expired_keys(&self) -> Result<UnboundedReceiver<String>>;
}
