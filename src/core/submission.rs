//! Submission data carried from the API layer through the queue to a worker.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::UnsupportedLanguage;

/// Languages that have a judge strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Cpp,
    Java,
    Python,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Cpp, Language::Java, Language::Python];

    /// Key used in `files/languages.toml`
    pub fn key(&self) -> &'static str {
        match self {
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "python",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpp" | "c++" | "cplusplus" | "g++" | "cxx" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "python" | "python3" | "py" => Ok(Language::Python),
            _ => Err(UnsupportedLanguage(s.to_string())),
        }
    }
}

/// Identity of the caller, established upstream and passed explicitly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: i64,
    pub user_name: String,
}

/// Body of a submission as received from the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitCode {
    pub code: String,
    pub language: String,
    pub problem_id: i64,
    /// 0 for practice submissions
    #[serde(default)]
    pub competition_id: i64,
    pub time_limit_ms: u32,
    pub memory_limit_mb: u32,
}

/// One input/output pair supplied inline for a test run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineExample {
    pub input: String,
    pub output: String,
}

/// An accepted submission, immutable once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub code: String,
    pub language: Language,
    pub problem_id: i64,
    pub competition_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub submitted_at: DateTime<Utc>,
    pub time_limit_ms: u32,
    pub memory_limit_mb: u32,
}

impl SubmissionRequest {
    pub fn new(
        ctx: &RequestContext,
        body: SubmitCode,
        language: Language,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            code: body.code,
            language,
            problem_id: body.problem_id,
            competition_id: body.competition_id,
            user_id: ctx.user_id,
            user_name: ctx.user_name.clone(),
            submitted_at,
            time_limit_ms: body.time_limit_ms,
            memory_limit_mb: body.memory_limit_mb,
        }
    }

    pub fn is_contest(&self) -> bool {
        self.competition_id != 0
    }

    /// Object-storage key of this problem's fixture archive
    pub fn fixture_ref(&self) -> String {
        fixture_ref(self.problem_id)
    }
}

pub fn fixture_ref(problem_id: i64) -> String {
    format!("{}.zip", problem_id)
}
