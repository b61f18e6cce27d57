//! Redis Manager - Centralized Redis connection and operations
//!
//! This module handles all Redis-related operations including:
//! - Fast store commands (dedup locks, contest counters, rankings)
//! - Priority work queue (ZADD / BZPOPMIN) and correlated replies (RPUSH / BLPOP)
//! - Keyspace expiry notifications for the contest flush

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use serde::Deserialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::Verdict;
use crate::fast_store::{FastStore, UpdatedStanding, VerdictUpdate};
use crate::queue::{JobQueue, JudgeReply, JudgeTask};
use crate::ranking::SCORE_PASS_WEIGHT;

/// Redis key constants
pub mod keys {
    /// Judge job queue (sorted set)
    pub const JUDGE_QUEUE: &str = "judge:queue";

    /// Suffix of the list holding queue entries that could not be read
    pub const DEAD_LETTER_SUFFIX: &str = ":dead";

    /// Judge reply list prefix, suffixed with the correlation id
    pub const JUDGE_REPLY_PREFIX: &str = "judge:reply:";

    /// Expired-key events of every database
    pub const EXPIRED_EVENTS: &str = "__keyevent@*__:expired";
}

const REPLY_EXPIRY_SECS: i64 = 60;
/// Upper bound of one BZPOPMIN wait before the loop re-issues it
const POP_WAIT: Duration = Duration::from_secs(5);
const PRIORITY_WEIGHT: f64 = 1e13;
/// Extra time a blocking command gets for the round trip
const BLOCKING_GRACE: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Idle blocking connections kept for reuse
const BLOCKING_POOL_IDLE: usize = 16;

/// Applies one contest verdict; see `FastStore::apply_verdict`
///
/// KEYS: ranking, solved, user_pass, user_penalty, problem_pass, problem_submit
/// ARGV: member, problem_id, accepted, elapsed_minutes, penalty_minutes, ttl_ms, pass_weight
const APPLY_VERDICT_SCRIPT: &str = r#"
local function touch(key)
  if redis.call('PTTL', key) < 0 then
    redis.call('PEXPIRE', key, ARGV[6])
  end
end

redis.call('INCR', KEYS[6])
touch(KEYS[6])

if redis.call('SISMEMBER', KEYS[2], ARGV[2]) == 0 then
  if ARGV[3] == '1' then
    redis.call('SADD', KEYS[2], ARGV[2])
    touch(KEYS[2])
    redis.call('INCR', KEYS[3])
    redis.call('INCR', KEYS[5])
    touch(KEYS[5])
    redis.call('INCRBY', KEYS[4], ARGV[4])
  else
    redis.call('INCRBY', KEYS[4], ARGV[5])
  end
end

local pass = tonumber(redis.call('GET', KEYS[3]) or '0')
local penalty = tonumber(redis.call('GET', KEYS[4]) or '0')
touch(KEYS[3])
touch(KEYS[4])

redis.call('ZADD', KEYS[1], -pass * tonumber(ARGV[7]) + penalty, ARGV[1])
touch(KEYS[1])

return {pass, penalty}
"#;

/// Centralized Redis manager for all Redis operations
#[derive(Clone)]
pub struct RedisManager {
    client: redis::Client,
    conn: ConnectionManager,
    blocking: Arc<BlockingPool>,
    verdict_script: redis::Script,
    queue_key: String,
}

impl RedisManager {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .with_context(|| format!("Failed to connect to Redis at {}", redis_url))?;
        info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            blocking: Arc::new(BlockingPool::new(client.clone())),
            client,
            conn,
            verdict_script: redis::Script::new(APPLY_VERDICT_SCRIPT),
            queue_key: keys::JUDGE_QUEUE.to_string(),
        })
    }

    #[cfg(test)]
    fn with_queue_key(mut self, queue_key: &str) -> Self {
        self.queue_key = queue_key.to_string();
        self
    }

    fn shared(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Expiry events are off by default on a stock Redis
    async fn enable_expiry_notifications(&self) {
        let mut conn = self.shared();
        if let Err(e) = redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("Ex")
            .query_async::<()>(&mut conn)
            .await
        {
            warn!(
                "Could not enable keyspace expiry notifications ({}); relying on server config",
                e
            );
        }
    }

    fn dead_letter_key(&self) -> String {
        format!("{}{}", self.queue_key, keys::DEAD_LETTER_SUFFIX)
    }

    /// Park an unreadable queue entry and answer its caller when it can be identified
    async fn dead_letter(&self, raw: &str, error: &serde_json::Error) {
        let key = self.dead_letter_key();
        warn!("Unreadable judge task moved to {}: {}", key, error);

        let mut conn = self.shared();
        if let Err(e) = conn.rpush::<_, _, ()>(&key, raw).await {
            warn!("Failed to park unreadable judge task: {}", e);
        }

        let Ok(header) = serde_json::from_str::<TaskHeader>(raw) else {
            return;
        };
        let verdict = Verdict::system_error(format!("Unreadable judge task: {}", error));
        let reply = JudgeReply {
            submission_id: header.submission_id,
            problem_id: header.request.problem_id,
            result: verdict.status.label().to_string(),
            verdict,
        };
        if let Err(e) = self.reply(&header.correlation_id, &reply).await {
            warn!("Failed to answer unreadable task {}: {:#}", header.correlation_id, e);
        }
    }
}

/// Fields of a queue entry needed to answer it when the rest does not parse
#[derive(Debug, Deserialize)]
struct TaskHeader {
    correlation_id: String,
    #[serde(default)]
    submission_id: Option<i64>,
    #[serde(default)]
    request: RequestHeader,
}

#[derive(Debug, Default, Deserialize)]
struct RequestHeader {
    #[serde(default)]
    problem_id: i64,
}

/// Connections reserved for blocking commands
///
/// A blocked BZPOPMIN or BLPOP stalls every other command sharing its
/// connection, so each wait borrows one connection exclusively. Connections
/// come back only after their command completed; interrupted ones are dropped.
struct BlockingPool {
    client: redis::Client,
    idle: Mutex<Vec<MultiplexedConnection>>,
}

impl BlockingPool {
    fn new(client: redis::Client) -> Self {
        Self {
            client,
            idle: Mutex::new(Vec::new()),
        }
    }

    async fn checkout(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.idle.lock().await.pop() {
            return Ok(conn);
        }
        tokio::time::timeout(CONNECT_TIMEOUT, self.client.get_multiplexed_async_connection())
            .await
            .context("Timed out connecting to Redis")?
            .context("Failed to connect to Redis")
    }

    async fn checkin(&self, conn: MultiplexedConnection) {
        let mut idle = self.idle.lock().await;
        if idle.len() < BLOCKING_POOL_IDLE {
            idle.push(conn);
        }
    }

    /// Run one blocking command that waits up to `wait` on the server
    ///
    /// The whole call, connecting included, is bounded by `wait` plus a grace
    /// for the round trip; an unanswered call yields `None`.
    async fn blocking<T: redis::FromRedisValue + Send>(
        &self,
        cmd: redis::Cmd,
        wait: Duration,
    ) -> Result<Option<T>> {
        let call = async {
            let mut conn = self.checkout().await?;
            let value: Option<T> = cmd.query_async(&mut conn).await?;
            self.checkin(conn).await;
            Ok::<_, anyhow::Error>(value)
        };
        match tokio::time::timeout(wait + BLOCKING_GRACE, call).await {
            Ok(value) => value,
            Err(_) => {
                warn!("Redis did not answer a blocking call within {:?}", wait + BLOCKING_GRACE);
                Ok(None)
            }
        }
    }

    async fn blpop(&self, key: &str, wait: Duration) -> Result<Option<String>> {
        let mut cmd = redis::cmd("BLPOP");
        cmd.arg(key).arg(wait.as_secs_f64());
        let popped: Option<(String, String)> = self
            .blocking(cmd, wait)
            .await
            .with_context(|| format!("BLPOP {} failed", key))?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn bzpopmin(&self, key: &str, wait: Duration) -> Result<Option<String>> {
        let mut cmd = redis::cmd("BZPOPMIN");
        cmd.arg(key).arg(wait.as_secs_f64());
        let popped: Option<(String, String, f64)> = self
            .blocking(cmd, wait)
            .await
            .with_context(|| format!("BZPOPMIN {} failed", key))?;
        Ok(popped.map(|(_, member, _)| member))
    }
}

fn millis(ttl: Duration) -> u64 {
    ttl.as_millis().max(1) as u64
}

/// Sort key of a queued task: higher priority first, then enqueue order
pub fn queue_score(priority: u8, enqueued_at_ms: i64) -> f64 {
    -f64::from(priority) * PRIORITY_WEIGHT + enqueued_at_ms as f64
}

#[async_trait]
impl FastStore for RedisManager {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.shared();
        let created: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .with_context(|| format!("SET NX {} failed", key))?;
        Ok(created.is_some())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.shared();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async::<()>(&mut conn)
            .await
            .with_context(|| format!("SET {} failed", key))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.shared();
        conn.get(key)
            .await
            .with_context(|| format!("GET {} failed", key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.shared();
        conn.exists(key)
            .await
            .with_context(|| format!("EXISTS {} failed", key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.shared();
        redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async::<()>(&mut conn)
            .await
            .with_context(|| format!("PEXPIRE {} failed", key))
    }

    async fn zadd_nx(&self, key: &str, member: &str, score: f64, ttl: Duration) -> Result<bool> {
        let mut conn = self.shared();
        let (added, _): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .with_context(|| format!("ZADD NX {} failed", key))?;
        Ok(added == 1)
    }

    async fn zrange_with_scores(&self, key: &str) -> Result<Vec<(String, f64)>> {
        let mut conn = self.shared();
        conn.zrange_withscores(key, 0, -1)
            .await
            .with_context(|| format!("ZRANGE {} failed", key))
    }

    async fn hset(&self, key: &str, field: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.shared();
        redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .with_context(|| format!("HSET {} failed", key))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.shared();
        conn.hgetall(key)
            .await
            .with_context(|| format!("HGETALL {} failed", key))
    }

    async fn apply_verdict(&self, update: &VerdictUpdate) -> Result<UpdatedStanding> {
        let mut conn = self.shared();
        let mut invocation = self.verdict_script.prepare_invoke();
        invocation
            .key(&update.ranking_key)
            .key(&update.solved_key)
            .key(&update.user_pass_key)
            .key(&update.user_penalty_key)
            .key(&update.problem_pass_key)
            .key(&update.problem_submit_key)
            .arg(&update.member)
            .arg(update.problem_id)
            .arg(if update.accepted { "1" } else { "0" })
            .arg(update.elapsed_minutes)
            .arg(update.penalty_minutes)
            .arg(millis(update.ttl))
            .arg(SCORE_PASS_WEIGHT);

        let (pass_count, penalty_minutes): (i64, i64) = invocation
            .invoke_async(&mut conn)
            .await
            .with_context(|| format!("Failed to apply verdict to {}", update.ranking_key))?;

        Ok(UpdatedStanding {
            pass_count,
            penalty_minutes,
        })
    }

    async fn expired_keys(&self) -> Result<UnboundedReceiver<String>> {
        self.enable_expiry_notifications().await;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_expired_keys(self.client.clone(), tx));
        Ok(rx)
    }
}

#[async_trait]
impl JobQueue for RedisManager {
    async fn push(&self, task: &JudgeTask, priority: u8) -> Result<()> {
        let json = serde_json::to_string(task)?;
        let score = queue_score(priority, chrono::Utc::now().timestamp_millis());
        let mut conn = self.shared();
        conn.zadd::<_, _, _, ()>(&self.queue_key, &json, score)
            .await
            .context("Failed to enqueue judge task")
    }

    /// Errors are returned to the caller, whose loop decides when to retry
    async fn pop(&self) -> Result<JudgeTask> {
        loop {
            let Some(job_data) = self.blocking.bzpopmin(&self.queue_key, POP_WAIT).await? else {
                continue;
            };
            match serde_json::from_str::<JudgeTask>(&job_data) {
                Ok(task) => return Ok(task),
                Err(e) => self.dead_letter(&job_data, &e).await,
            }
        }
    }

    async fn reply(&self, correlation_id: &str, reply: &JudgeReply) -> Result<()> {
        let key = format!("{}{}", keys::JUDGE_REPLY_PREFIX, correlation_id);
        let json = serde_json::to_string(reply)?;
        let mut conn = self.shared();
        redis::pipe()
            .atomic()
            .rpush(&key, &json)
            .ignore()
            .expire(&key, REPLY_EXPIRY_SECS)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .with_context(|| format!("Failed to push reply {}", key))
    }

    async fn await_reply(
        &self,
        correlation_id: &str,
        timeout: Duration,
    ) -> Result<Option<JudgeReply>> {
        let key = format!("{}{}", keys::JUDGE_REPLY_PREFIX, correlation_id);
        match self.blocking.blpop(&key, timeout).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

/// Forward expired-key events into `tx`, resubscribing until the receiver is gone
async fn forward_expired_keys(client: redis::Client, tx: UnboundedSender<String>) {
    loop {
        match client.get_async_pubsub().await {
            Ok(mut pubsub) => match pubsub.psubscribe(keys::EXPIRED_EVENTS).await {
                Ok(()) => {
                    info!("Subscribed to {}", keys::EXPIRED_EVENTS);
                    let mut messages = pubsub.on_message();
                    while let Some(msg) = messages.next().await {
                        match msg.get_payload::<String>() {
                            Ok(key) => {
                                debug!("Key expired: {}", key);
                                if tx.send(key).is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!("Unreadable expiry event: {}", e),
                        }
                    }
                    warn!("Expiry subscription closed. Resubscribing...");
                }
                Err(e) => warn!("Failed to subscribe to expiry events: {}", e),
            },
            Err(e) => warn!("Failed to open Redis pub/sub connection: {}", e),
        }

        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
}
