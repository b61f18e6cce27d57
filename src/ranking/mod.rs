//! Contest ranking: live counters in the fast store, flushed to durable storage
//! when the contest marker expires.

pub mod engine;
pub mod flush;

pub use engine::{ContestState, RankingEngine};
pub use flush::{ContestFlusher, FlushReport};

use crate::error::FlushError;
use crate::fast_store::FastStore;

/// Penalty minutes charged for a rejected attempt on an unsolved problem
pub const PENALTY_MINUTES: i64 = 20;

/// Weight of one solved problem in the ranking score (2^32)
pub const SCORE_PASS_WEIGHT: i64 = 1 << 32;

/// Ranking score: ascending order puts more solves first, then less penalty
pub fn compose_score(pass_count: i64, penalty_minutes: i64) -> i64 {
    (-pass_count << 32) | (penalty_minutes & 0xFFFF_FFFF)
}

/// Counter value where a missing key reads as zero
pub(crate) async fn read_counter(store: &dyn FastStore, key: &str) -> Result<i64, FlushError> {
    match store.get(key).await? {
        None => Ok(0),
        Some(raw) => raw.trim().parse::<i64>().map_err(|_| FlushError::Parse {
            key: key.to_string(),
            value: raw,
        }),
    }
}
