//! In-memory stand-ins for the external services, used by unit tests

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::core::{SubmissionRequest, Verdict};
use crate::error::SandboxError;
use crate::fast_store::{FastStore, UpdatedStanding, VerdictUpdate};
use crate::queue::{JobQueue, JudgeReply, JudgeTask};
use crate::ranking::SCORE_PASS_WEIGHT;
use crate::repository::{
    ContestInfo, Participant, ParticipantStanding, ProblemCounters, Repository, SubmissionRecord,
    SubmissionState,
};
use crate::sandbox::types::CmdFile;
use crate::sandbox::{Cmd, RunResult, Sandbox};
use crate::storage::ObjectStore;

/// Zip archive holding `1.in`/`1.out`, `2.in`/`2.out`, ...
pub fn fixture_zip(cases: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (index, (input, output)) in cases.iter().enumerate() {
        writer.start_file(format!("{}.in", index + 1), options).unwrap();
        writer.write_all(input.as_bytes()).unwrap();
        writer.start_file(format!("{}.out", index + 1), options).unwrap();
        writer.write_all(output.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

// ---------------------------------------------------------------------------
// Object storage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    downloads: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl MemoryObjectStore {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn put(&self, key: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
    }

    /// Download attempts for `key`, failed ones included
    pub fn download_count(&self, key: &str) -> usize {
        self.downloads.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        *self
            .downloads
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("NoSuchKey: {}", key))
    }
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

type Script = Box<dyn Fn(&Cmd) -> RunResult + Send + Sync>;

/// Sandbox answering every command through a closure
///
/// Commands that ask for cached output are compile steps; when the closure
/// accepts them, each cached name gets a fresh file id (`ARTIFACT-1`, ...).
pub struct ScriptedSandbox {
    script: Script,
    costs: Mutex<Vec<(u64, u64)>>,
    fail_runs: bool,
    requests: Mutex<Vec<Vec<Cmd>>>,
    deleted: Mutex<Vec<String>>,
    next_file: AtomicU64,
}

impl ScriptedSandbox {
    pub fn new(script: impl Fn(&Cmd) -> RunResult + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            costs: Mutex::new(Vec::new()),
            fail_runs: false,
            requests: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            next_file: AtomicU64::new(1),
        }
    }

    /// Prints the sum of the integers on stdin
    pub fn echo_sum() -> Self {
        Self::new(Self::sum_of)
    }

    pub fn sum_of(cmd: &Cmd) -> RunResult {
        let sum: i64 = stdin_of(cmd)
            .split_whitespace()
            .filter_map(|n| n.parse::<i64>().ok())
            .sum();
        run_result("Accepted", &format!("{}\n", sum))
    }

    /// (time ms, memory MB) reported for successive run commands
    pub fn with_costs(self, costs: Vec<(u64, u64)>) -> Self {
        *self.costs.lock().unwrap() = costs.into_iter().rev().collect();
        self
    }

    /// Compile steps still work, run requests fail at the transport level
    pub fn failing_runs(mut self) -> Self {
        self.fail_runs = true;
        self
    }

    pub fn requests(&self) -> Vec<Vec<Cmd>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn run(&self, cmds: &[Cmd]) -> std::result::Result<Vec<RunResult>, SandboxError> {
        self.requests.lock().unwrap().push(cmds.to_vec());

        let is_compile = cmds.iter().any(|cmd| !cmd.copy_out_cached.is_empty());
        if self.fail_runs && !is_compile {
            return Err(SandboxError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }

        let results = cmds
            .iter()
            .map(|cmd| {
                let mut result = (self.script)(cmd);
                if !cmd.copy_out_cached.is_empty() {
                    if result.status == "Accepted" {
                        for name in &cmd.copy_out_cached {
                            let id = self.next_file.fetch_add(1, Ordering::SeqCst);
                            result.file_ids.insert(name.clone(), format!("ARTIFACT-{}", id));
                        }
                    }
                } else if let Some((time_ms, memory_mb)) = self.costs.lock().unwrap().pop() {
                    result.time = time_ms * 1_000_000;
                    result.memory = memory_mb * 1024 * 1024;
                }
                result
            })
            .collect();
        Ok(results)
    }

    async fn delete_file(&self, file_id: &str) -> std::result::Result<(), SandboxError> {
        self.deleted.lock().unwrap().push(file_id.to_string());
        Ok(())
    }
}

pub fn stdin_of(cmd: &Cmd) -> &str {
    match cmd.files.first() {
        Some(CmdFile::Memory { content }) => content,
        _ => "",
    }
}

pub fn run_result(status: &str, stdout: &str) -> RunResult {
    let mut result = RunResult {
        status: status.to_string(),
        exit_status: if status == "Nonzero Exit Status" { 1 } else { 0 },
        ..RunResult::default()
    };
    result.files.insert("stdout".into(), stdout.to_string());
    result.files.insert("stderr".into(), String::new());
    result
}

// ---------------------------------------------------------------------------
// Fast store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    SortedSet(Vec<(String, f64)>),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

/// Fast store with lazy expiry on tokio's clock
///
/// Expiry events are only emitted through [`MemoryFastStore::fire_expired`].
#[derive(Default)]
pub struct MemoryFastStore {
    entries: Mutex<HashMap<String, Entry>>,
    expired_tx: Mutex<Option<UnboundedSender<String>>>,
}

impl MemoryFastStore {
    /// Remaining lifetime of a live key
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut entries = self.entries.lock().unwrap();
        purge(&mut entries, key);
        entries
            .get(key)?
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Drop `key` and publish it as expired
    pub fn fire_expired(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
        if let Some(tx) = self.expired_tx.lock().unwrap().as_ref() {
            let _ = tx.send(key.to_string());
        }
    }
}

fn purge(entries: &mut HashMap<String, Entry>, key: &str) {
    let expired = entries
        .get(key)
        .and_then(|entry| entry.expires_at)
        .is_some_and(|at| at <= Instant::now());
    if expired {
        entries.remove(key);
    }
}

fn deadline(ttl: Duration) -> Option<Instant> {
    Some(Instant::now() + ttl)
}

fn read_int(entries: &HashMap<String, Entry>, key: &str) -> Result<i64> {
    match entries.get(key).map(|entry| &entry.value) {
        None => Ok(0),
        Some(Value::Str(raw)) => raw
            .parse()
            .map_err(|_| anyhow!("value at {} is not an integer", key)),
        Some(_) => bail!("WRONGTYPE at {}", key),
    }
}

fn incr_by(entries: &mut HashMap<String, Entry>, key: &str, by: i64) -> Result<i64> {
    let value = read_int(entries, key)? + by;
    let expires_at = entries.get(key).and_then(|entry| entry.expires_at);
    entries.insert(
        key.to_string(),
        Entry {
            value: Value::Str(value.to_string()),
            expires_at,
        },
    );
    Ok(value)
}

/// Give `key` a lifetime unless it already has one
fn touch(entries: &mut HashMap<String, Entry>, key: &str, ttl: Duration) {
    if let Some(entry) = entries.get_mut(key) {
        if entry.expires_at.is_none() {
            entry.expires_at = deadline(ttl);
        }
    }
}

#[async_trait]
impl FastStore for MemoryFastStore {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        purge(&mut entries, key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: deadline(ttl),
            },
        );
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap();
        purge(&mut entries, key);
        match entries.get(key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::Str(raw)) => Ok(Some(raw.clone())),
            Some(_) => bail!("WRONGTYPE at {}", key),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        purge(&mut entries, key);
        Ok(entries.contains_key(key))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        purge(&mut entries, key);
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = deadline(ttl);
        }
        Ok(())
    }

    async fn zadd_nx(&self, key: &str, member: &str, score: f64, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        purge(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::SortedSet(Vec::new()),
            expires_at: None,
        });
        entry.expires_at = deadline(ttl);
        let Value::SortedSet(members) = &mut entry.value else {
            bail!("WRONGTYPE at {}", key);
        };
        if members.iter().any(|(m, _)| m == member) {
            return Ok(false);
        }
        members.push((member.to_string(), score));
        Ok(true)
    }

    async fn zrange_with_scores(&self, key: &str) -> Result<Vec<(String, f64)>> {
        let mut entries = self.entries.lock().unwrap();
        purge(&mut entries, key);
        let mut members = match entries.get(key).map(|entry| &entry.value) {
            None => return Ok(Vec::new()),
            Some(Value::SortedSet(members)) => members.clone(),
            Some(_) => bail!("WRONGTYPE at {}", key),
        };
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(members)
    }

    async fn hset(&self, key: &str, field: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        purge(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        entry.expires_at = deadline(ttl);
        let Value::Hash(fields) = &mut entry.value else {
            bail!("WRONGTYPE at {}", key);
        };
        fields.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut entries = self.entries.lock().unwrap();
        purge(&mut entries, key);
        match entries.get(key).map(|entry| &entry.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(fields)) => Ok(fields.clone()),
            Some(_) => bail!("WRONGTYPE at {}", key),
        }
    }

    async fn apply_verdict(&self, update: &VerdictUpdate) -> Result<UpdatedStanding> {
        let mut entries = self.entries.lock().unwrap();
        for key in [
            &update.ranking_key,
            &update.solved_key,
            &update.user_pass_key,
            &update.user_penalty_key,
            &update.problem_pass_key,
            &update.problem_submit_key,
        ] {
            purge(&mut entries, key);
        }
        let ttl = update.ttl;

        incr_by(&mut entries, &update.problem_submit_key, 1)?;
        touch(&mut entries, &update.problem_submit_key, ttl);

        let problem = update.problem_id.to_string();
        let solved = match entries.get(&update.solved_key).map(|entry| &entry.value) {
            None => false,
            Some(Value::Set(members)) => members.contains(&problem),
            Some(_) => bail!("WRONGTYPE at {}", update.solved_key),
        };

        if !solved {
            if update.accepted {
                let entry = entries
                    .entry(update.solved_key.clone())
                    .or_insert_with(|| Entry {
                        value: Value::Set(HashSet::new()),
                        expires_at: None,
                    });
                if let Value::Set(members) = &mut entry.value {
                    members.insert(problem);
                }
                touch(&mut entries, &update.solved_key, ttl);
                incr_by(&mut entries, &update.user_pass_key, 1)?;
                incr_by(&mut entries, &update.problem_pass_key, 1)?;
                touch(&mut entries, &update.problem_pass_key, ttl);
                incr_by(&mut entries, &update.user_penalty_key, update.elapsed_minutes)?;
            } else {
                incr_by(&mut entries, &update.user_penalty_key, update.penalty_minutes)?;
            }
        }

        let pass_count = read_int(&entries, &update.user_pass_key)?;
        let penalty_minutes = read_int(&entries, &update.user_penalty_key)?;
        touch(&mut entries, &update.user_pass_key, ttl);
        touch(&mut entries, &update.user_penalty_key, ttl);

        let score = (-pass_count * SCORE_PASS_WEIGHT + penalty_minutes) as f64;
        let entry = entries
            .entry(update.ranking_key.clone())
            .or_insert_with(|| Entry {
                value: Value::SortedSet(Vec::new()),
                expires_at: None,
            });
        let Value::SortedSet(members) = &mut entry.value else {
            bail!("WRONGTYPE at {}", update.ranking_key);
        };
        members.retain(|(m, _)| m != &update.member);
        members.push((update.member.clone(), score));
        touch(&mut entries, &update.ranking_key, ttl);

        Ok(UpdatedStanding {
            pass_count,
            penalty_minutes,
        })
    }

    async fn expired_keys(&self) -> Result<UnboundedReceiver<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.expired_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// Job queue
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryQueue {
    /// (priority, sequence, task)
    tasks: Mutex<Vec<(u8, u64, JudgeTask)>>,
    replies: Mutex<HashMap<String, JudgeReply>>,
    sequence: AtomicU64,
    task_ready: Notify,
    reply_ready: Notify,
}

impl MemoryQueue {
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Next task without waiting
    pub fn take(&self) -> Option<JudgeTask> {
        let mut tasks = self.tasks.lock().unwrap();
        let next = tasks
            .iter()
            .enumerate()
            .min_by_key(|(_, (priority, seq, _))| (std::cmp::Reverse(*priority), *seq))
            .map(|(index, _)| index)?;
        Some(tasks.remove(next).2)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn push(&self, task: &JudgeTask, priority: u8) -> Result<()> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().unwrap().push((priority, seq, task.clone()));
        self.task_ready.notify_waiters();
        Ok(())
    }

    async fn pop(&self) -> Result<JudgeTask> {
        loop {
            let ready = self.task_ready.notified();
            if let Some(task) = self.take() {
                return Ok(task);
            }
            ready.await;
        }
    }

    async fn reply(&self, correlation_id: &str, reply: &JudgeReply) -> Result<()> {
        self.replies
            .lock()
            .unwrap()
            .insert(correlation_id.to_string(), reply.clone());
        self.reply_ready.notify_waiters();
        Ok(())
    }

    async fn await_reply(
        &self,
        correlation_id: &str,
        timeout: Duration,
    ) -> Result<Option<JudgeReply>> {
        let deadline = Instant::now() + timeout;
        loop {
            let ready = self.reply_ready.notified();
            if let Some(reply) = self.replies.lock().unwrap().remove(correlation_id) {
                return Ok(Some(reply));
            }
            if tokio::time::timeout_at(deadline, ready).await.is_err() {
                return Ok(None);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredParticipant {
    user_name: String,
    pass_count: i64,
    penalty_minutes: i64,
    rank: u32,
}

#[derive(Debug, Clone)]
struct StoredContest {
    info: ContestInfo,
    participants: HashMap<i64, StoredParticipant>,
    problems: HashMap<i64, ProblemCounters>,
}

/// Repository following the same rules as the SQLite one
#[derive(Default)]
pub struct MemoryRepository {
    submissions: Mutex<Vec<(SubmissionRequest, SubmissionRecord)>>,
    practice: Mutex<HashMap<i64, (i64, i64)>>,
    solved: Mutex<HashSet<(i64, i64)>>,
    contests: Mutex<HashMap<i64, StoredContest>>,
}

impl MemoryRepository {
    pub fn add_contest(&self, info: ContestInfo) {
        let participants = info
            .participants
            .iter()
            .map(|p| {
                (
                    p.user_id,
                    StoredParticipant {
                        user_name: p.user_name.clone(),
                        pass_count: 0,
                        penalty_minutes: 0,
                        rank: 0,
                    },
                )
            })
            .collect();
        let problems = info
            .problem_ids
            .iter()
            .map(|&problem_id| {
                (
                    problem_id,
                    ProblemCounters {
                        problem_id,
                        submit_count: 0,
                        pass_count: 0,
                    },
                )
            })
            .collect();
        self.contests.lock().unwrap().insert(
            info.id,
            StoredContest {
                info,
                participants,
                problems,
            },
        );
    }

    /// Registered participant ids, sorted
    pub fn participants(&self, competition_id: i64) -> Vec<i64> {
        let contests = self.contests.lock().unwrap();
        let mut ids: Vec<i64> = contests
            .get(&competition_id)
            .map(|c| c.participants.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Practice (submit, pass) counters of a problem
    pub fn practice_stats(&self, problem_id: i64) -> (i64, i64) {
        self.practice
            .lock()
            .unwrap()
            .get(&problem_id)
            .copied()
            .unwrap_or((0, 0))
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    fn update_state(
        &self,
        submission_id: i64,
        state: SubmissionState,
        verdict: Option<&Verdict>,
    ) -> Result<()> {
        let mut submissions = self.submissions.lock().unwrap();
        let Some((_, record)) = submissions.iter_mut().find(|(_, r)| r.id == submission_id) else {
            bail!("Submission {} not found", submission_id);
        };
        record.state = state;
        if let Some(verdict) = verdict {
            record.verdict = Some(verdict.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_pending_submission(&self, request: &SubmissionRequest) -> Result<i64> {
        let mut submissions = self.submissions.lock().unwrap();
        let id = submissions.len() as i64 + 1;
        submissions.push((
            request.clone(),
            SubmissionRecord {
                id,
                user_id: request.user_id,
                problem_id: request.problem_id,
                competition_id: request.competition_id,
                state: SubmissionState::Pending,
                verdict: None,
            },
        ));
        Ok(id)
    }

    async fn mark_judging(&self, submission_id: i64) -> Result<()> {
        self.update_state(submission_id, SubmissionState::Judging, None)
    }

    async fn finish_submission(&self, submission_id: i64, verdict: &Verdict) -> Result<()> {
        self.update_state(submission_id, SubmissionState::Finished, Some(verdict))
    }

    async fn get_submission(&self, submission_id: i64) -> Result<Option<SubmissionRecord>> {
        Ok(self
            .submissions
            .lock()
            .unwrap()
            .iter()
            .find(|(_, r)| r.id == submission_id)
            .map(|(_, r)| r.clone()))
    }

    async fn record_practice_outcome(
        &self,
        user_id: i64,
        problem_id: i64,
        accepted: bool,
    ) -> Result<()> {
        let first_solve = accepted && self.solved.lock().unwrap().insert((user_id, problem_id));
        let mut practice = self.practice.lock().unwrap();
        let counters = practice.entry(problem_id).or_default();
        counters.0 += 1;
        if first_solve {
            counters.1 += 1;
        }
        Ok(())
    }

    async fn load_contest(&self, competition_id: i64) -> Result<Option<ContestInfo>> {
        let contests = self.contests.lock().unwrap();
        Ok(contests.get(&competition_id).map(|contest| {
            let mut participants: Vec<Participant> = contest
                .participants
                .iter()
                .map(|(&user_id, p)| Participant {
                    user_id,
                    user_name: p.user_name.clone(),
                })
                .collect();
            participants.sort_by_key(|p| p.user_id);
            let mut problem_ids = contest.info.problem_ids.clone();
            problem_ids.sort_unstable();
            ContestInfo {
                participants,
                problem_ids,
                ..contest.info.clone()
            }
        }))
    }

    async fn ensure_participant(
        &self,
        competition_id: i64,
        user_id: i64,
        user_name: &str,
    ) -> Result<()> {
        let mut contests = self.contests.lock().unwrap();
        let contest = contests
            .get_mut(&competition_id)
            .ok_or_else(|| anyhow!("Competition {} not found", competition_id))?;
        contest
            .participants
            .entry(user_id)
            .or_insert_with(|| StoredParticipant {
                user_name: user_name.to_string(),
                pass_count: 0,
                penalty_minutes: 0,
                rank: 0,
            });
        Ok(())
    }

    async fn save_participant_standing(
        &self,
        competition_id: i64,
        standing: &ParticipantStanding,
    ) -> Result<()> {
        let mut contests = self.contests.lock().unwrap();
        let contest = contests
            .get_mut(&competition_id)
            .ok_or_else(|| anyhow!("Competition {} not found", competition_id))?;
        let stored = contest
            .participants
            .entry(standing.user_id)
            .or_insert_with(|| StoredParticipant {
                user_name: String::new(),
                pass_count: 0,
                penalty_minutes: 0,
                rank: 0,
            });
        if !standing.user_name.is_empty() {
            stored.user_name = standing.user_name.clone();
        }
        stored.pass_count = standing.pass_count;
        stored.penalty_minutes = standing.penalty_minutes;
        stored.rank = standing.rank;
        Ok(())
    }

    async fn save_problem_counters(
        &self,
        competition_id: i64,
        counters: &ProblemCounters,
    ) -> Result<()> {
        let mut contests = self.contests.lock().unwrap();
        let contest = contests
            .get_mut(&competition_id)
            .ok_or_else(|| anyhow!("Competition {} not found", competition_id))?;
        contest.problems.insert(counters.problem_id, *counters);
        Ok(())
    }

    async fn contest_standings(&self, competition_id: i64) -> Result<Vec<ParticipantStanding>> {
        let contests = self.contests.lock().unwrap();
        let Some(contest) = contests.get(&competition_id) else {
            return Ok(Vec::new());
        };
        let mut standings: Vec<ParticipantStanding> = contest
            .participants
            .iter()
            .map(|(&user_id, p)| ParticipantStanding {
                rank: p.rank,
                user_id,
                user_name: p.user_name.clone(),
                pass_count: p.pass_count,
                penalty_minutes: p.penalty_minutes,
            })
            .collect();
        standings.sort_by_key(|s| {
            (
                s.rank == 0,
                s.rank,
                std::cmp::Reverse(s.pass_count),
                s.penalty_minutes,
                s.user_id,
            )
        });
        Ok(standings)
    }

    async fn problem_counters(&self, competition_id: i64) -> Result<Vec<ProblemCounters>> {
        let contests = self.contests.lock().unwrap();
        let mut counters: Vec<ProblemCounters> = contests
            .get(&competition_id)
            .map(|c| c.problems.values().copied().collect())
            .unwrap_or_default();
        counters.sort_by_key(|c| c.problem_id);
        Ok(counters)
    }
}
