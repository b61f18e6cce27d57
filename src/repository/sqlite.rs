use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;

use super::{
    ContestInfo, Participant, ParticipantStanding, ProblemCounters, Repository, SubmissionRecord,
    SubmissionState,
};
use crate::core::{SubmissionRequest, Verdict};

#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to open database {}", database_url))?;

        let repo = Self { pool };
        repo.init().await?;
        info!("Initialized database at {}", database_url);
        Ok(repo)
    }

    async fn init(&self) -> Result<()> {
        for pragma_sql in &["PRAGMA foreign_keys = ON;", "PRAGMA busy_timeout = 2000;"] {
            sqlx::query(pragma_sql).execute(&self.pool).await?;
        }

        let mut tx = self.pool.begin().await?;

        for sql in &[
            r"
            CREATE TABLE IF NOT EXISTS submissions (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id         INTEGER NOT NULL,
                user_name       TEXT    NOT NULL,
                problem_id      INTEGER NOT NULL,
                competition_id  INTEGER NOT NULL,
                language        TEXT    NOT NULL,
                code            TEXT    NOT NULL,
                submitted_at    INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL,
                state           TEXT    NOT NULL,
                verdict         TEXT
            );",
            r"
            CREATE TABLE IF NOT EXISTS problem_stats (
                problem_id      INTEGER PRIMARY KEY,
                submit_count    INTEGER NOT NULL DEFAULT 0,
                pass_count      INTEGER NOT NULL DEFAULT 0
            );",
            r"
            CREATE TABLE IF NOT EXISTS user_solved (
                user_id         INTEGER NOT NULL,
                problem_id      INTEGER NOT NULL,
                solved_at       INTEGER NOT NULL,
                PRIMARY KEY (user_id, problem_id)
            );",
            r"
            CREATE TABLE IF NOT EXISTS competitions (
                id              INTEGER PRIMARY KEY,
                begin_at        INTEGER NOT NULL,
                end_at          INTEGER NOT NULL
            );",
            r"
            CREATE TABLE IF NOT EXISTS competition_problems (
                competition_id  INTEGER NOT NULL,
                problem_id      INTEGER NOT NULL,
                submit_count    INTEGER NOT NULL DEFAULT 0,
                pass_count      INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (competition_id, problem_id),
                FOREIGN KEY (competition_id) REFERENCES competitions (id)
            );",
            r"
            CREATE TABLE IF NOT EXISTS competition_participants (
                competition_id  INTEGER NOT NULL,
                user_id         INTEGER NOT NULL,
                user_name       TEXT    NOT NULL,
                pass_count      INTEGER NOT NULL DEFAULT 0,
                penalty_minutes INTEGER NOT NULL DEFAULT 0,
                final_rank      INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (competition_id, user_id),
                FOREIGN KEY (competition_id) REFERENCES competitions (id)
            );",
        ] {
            sqlx::query(sql).execute(tx.as_mut()).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_state(
        &self,
        submission_id: i64,
        state: SubmissionState,
        verdict: Option<String>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE submissions SET state = ?, verdict = COALESCE(?, verdict), updated_at = ? WHERE id = ?",
        )
        .bind(state.as_str())
        .bind(verdict)
        .bind(Utc::now().timestamp_millis())
        .bind(submission_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update submission {}", submission_id))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Submission {} not found", submission_id);
        }
        Ok(())
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("Timestamp out of range: {}", ms))
}

fn standing_from_row(row: &SqliteRow) -> Result<ParticipantStanding> {
    Ok(ParticipantStanding {
        rank: row.try_get::<i64, _>("final_rank")? as u32,
        user_id: row.try_get("user_id")?,
        user_name: row.try_get("user_name")?,
        pass_count: row.try_get("pass_count")?,
        penalty_minutes: row.try_get("penalty_minutes")?,
    })
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn create_pending_submission(&self, request: &SubmissionRequest) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO submissions
                (user_id, user_name, problem_id, competition_id, language, code, submitted_at, updated_at, state)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending')
            "#,
        )
        .bind(request.user_id)
        .bind(&request.user_name)
        .bind(request.problem_id)
        .bind(request.competition_id)
        .bind(request.language.key())
        .bind(&request.code)
        .bind(request.submitted_at.timestamp_millis())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to insert submission")?;

        Ok(result.last_insert_rowid())
    }

    async fn mark_judging(&self, submission_id: i64) -> Result<()> {
        self.set_state(submission_id, SubmissionState::Judging, None)
            .await
    }

    async fn finish_submission(&self, submission_id: i64, verdict: &Verdict) -> Result<()> {
        let json = serde_json::to_string(verdict)?;
        self.set_state(submission_id, SubmissionState::Finished, Some(json))
            .await
    }

    async fn get_submission(&self, submission_id: i64) -> Result<Option<SubmissionRecord>> {
        let row = sqlx::query(
            "SELECT id, user_id, problem_id, competition_id, state, verdict FROM submissions WHERE id = ?",
        )
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw_state: String = row.try_get("state")?;
        let state = SubmissionState::parse(&raw_state)
            .with_context(|| format!("Unknown submission state {}", raw_state))?;
        let verdict = match row.try_get::<Option<String>, _>("verdict")? {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };

        Ok(Some(SubmissionRecord {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            problem_id: row.try_get("problem_id")?,
            competition_id: row.try_get("competition_id")?,
            state,
            verdict,
        }))
    }

    async fn record_practice_outcome(
        &self,
        user_id: i64,
        problem_id: i64,
        accepted: bool,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO problem_stats (problem_id, submit_count, pass_count) VALUES (?, 1, 0)
            ON CONFLICT (problem_id) DO UPDATE SET submit_count = submit_count + 1
            "#,
        )
        .bind(problem_id)
        .execute(tx.as_mut())
        .await?;

        if accepted {
            let solved = sqlx::query(
                "INSERT OR IGNORE INTO user_solved (user_id, problem_id, solved_at) VALUES (?, ?, ?)",
            )
            .bind(user_id)
            .bind(problem_id)
            .bind(Utc::now().timestamp_millis())
            .execute(tx.as_mut())
            .await?;

            if solved.rows_affected() == 1 {
                sqlx::query("UPDATE problem_stats SET pass_count = pass_count + 1 WHERE problem_id = ?")
                    .bind(problem_id)
                    .execute(tx.as_mut())
                    .await?;
            }
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to record outcome for problem {}", problem_id))?;
        Ok(())
    }

    async fn load_contest(&self, competition_id: i64) -> Result<Option<ContestInfo>> {
        let row = sqlx::query("SELECT id, begin_at, end_at FROM competitions WHERE id = ?")
            .bind(competition_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let problem_ids = sqlx::query(
            "SELECT problem_id FROM competition_problems WHERE competition_id = ? ORDER BY problem_id",
        )
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| row.try_get::<i64, _>("problem_id"))
        .collect::<Result<Vec<_>, _>>()?;

        let participants = sqlx::query(
            "SELECT user_id, user_name FROM competition_participants WHERE competition_id = ? ORDER BY user_id",
        )
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok(Participant {
                user_id: row.try_get("user_id")?,
                user_name: row.try_get("user_name")?,
            })
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(Some(ContestInfo {
            id: row.try_get("id")?,
            begin: from_millis(row.try_get("begin_at")?)?,
            end: from_millis(row.try_get("end_at")?)?,
            problem_ids,
            participants,
        }))
    }

    async fn ensure_participant(
        &self,
        competition_id: i64,
        user_id: i64,
        user_name: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO competition_participants (competition_id, user_id, user_name) VALUES (?, ?, ?)",
        )
        .bind(competition_id)
        .bind(user_id)
        .bind(user_name)
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!("Failed to register user {} in competition {}", user_id, competition_id)
        })?;
        Ok(())
    }

    async fn save_participant_standing(
        &self,
        competition_id: i64,
        standing: &ParticipantStanding,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO competition_participants
                (competition_id, user_id, user_name, pass_count, penalty_minutes, final_rank)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (competition_id, user_id) DO UPDATE SET
                user_name = CASE WHEN excluded.user_name = '' THEN user_name ELSE excluded.user_name END,
                pass_count = excluded.pass_count,
                penalty_minutes = excluded.penalty_minutes,
                final_rank = excluded.final_rank
            "#,
        )
        .bind(competition_id)
        .bind(standing.user_id)
        .bind(&standing.user_name)
        .bind(standing.pass_count)
        .bind(standing.penalty_minutes)
        .bind(i64::from(standing.rank))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_problem_counters(
        &self,
        competition_id: i64,
        counters: &ProblemCounters,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO competition_problems (competition_id, problem_id, submit_count, pass_count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (competition_id, problem_id) DO UPDATE SET
                submit_count = excluded.submit_count,
                pass_count = excluded.pass_count
            "#,
        )
        .bind(competition_id)
        .bind(counters.problem_id)
        .bind(counters.submit_count)
        .bind(counters.pass_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn contest_standings(&self, competition_id: i64) -> Result<Vec<ParticipantStanding>> {
        // Participants never flushed have rank 0 and go last
        let rows = sqlx::query(
            r#"
            SELECT user_id, user_name, pass_count, penalty_minutes, final_rank
            FROM competition_participants
            WHERE competition_id = ?
            ORDER BY final_rank = 0, final_rank, pass_count DESC, penalty_minutes ASC, user_id
            "#,
        )
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(standing_from_row).collect()
    }

    async fn problem_counters(&self, competition_id: i64) -> Result<Vec<ProblemCounters>> {
        let rows = sqlx::query(
            "SELECT problem_id, submit_count, pass_count FROM competition_problems WHERE competition_id = ? ORDER BY problem_id",
        )
        .bind(competition_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ProblemCounters {
                    problem_id: row.try_get("problem_id")?,
                    submit_count: row.try_get("submit_count")?,
                    pass_count: row.try_get("pass_count")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
impl SqliteRepository {
    pub async fn insert_contest(&self, info: &ContestInfo) -> Result<()> {
        sqlx::query("INSERT INTO competitions (id, begin_at, end_at) VALUES (?, ?, ?)")
            .bind(info.id)
            .bind(info.begin.timestamp_millis())
            .bind(info.end.timestamp_millis())
            .execute(&self.pool)
            .await?;
        for problem_id in &info.problem_ids {
            sqlx::query(
                "INSERT INTO competition_problems (competition_id, problem_id) VALUES (?, ?)",
            )
            .bind(info.id)
            .bind(problem_id)
            .execute(&self.pool)
            .await?;
        }
        for participant in &info.participants {
            self.ensure_participant(info.id, participant.user_id, &participant.user_name)
                .await?;
        }
        Ok(())
    }

    pub async fn problem_stats(&self, problem_id: i64) -> Result<(i64, i64)> {
        let row = sqlx::query("SELECT submit_count, pass_count FROM problem_stats WHERE problem_id = ?")
            .bind(problem_id)
            .fetch_one(&self.pool)
            .await?;
        Ok((row.try_get("submit_count")?, row.try_get("pass_count")?))
    }
}
