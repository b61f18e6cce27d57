use serde::{Deserialize, Serialize};
use std::fmt;

/// Final status of a judged submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompileError,
    SystemError,
}

impl VerdictStatus {
    /// Human-readable label shown to users
    pub fn label(&self) -> &'static str {
        match self {
            VerdictStatus::Accepted => "Accepted",
            VerdictStatus::WrongAnswer => "Wrong Answer",
            VerdictStatus::TimeLimitExceeded => "Time Limit Exceeded",
            VerdictStatus::MemoryLimitExceeded => "Memory Limit Exceeded",
            VerdictStatus::RuntimeError => "Runtime Error",
            VerdictStatus::CompileError => "Compile Error",
            VerdictStatus::SystemError => "System Error",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, VerdictStatus::Accepted)
    }
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerdictStatus::Accepted => "accepted",
            VerdictStatus::WrongAnswer => "wrong_answer",
            VerdictStatus::TimeLimitExceeded => "time_limit_exceeded",
            VerdictStatus::MemoryLimitExceeded => "memory_limit_exceeded",
            VerdictStatus::RuntimeError => "runtime_error",
            VerdictStatus::CompileError => "compile_error",
            VerdictStatus::SystemError => "system_error",
        };
        write!(f, "{}", s)
    }
}

/// Result of judging one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    /// Maximum CPU time over the executed cases, in milliseconds
    pub run_time_ms: u64,
    /// Maximum memory over the executed cases, in megabytes
    pub memory_mb: u64,
    pub passed_case_count: u32,
    pub total_case_count: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diagnostic: String,
}

impl Verdict {
    /// A verdict that never reached test execution
    pub fn terminal(status: VerdictStatus, diagnostic: impl Into<String>) -> Self {
        Self {
            status,
            run_time_ms: 0,
            memory_mb: 0,
            passed_case_count: 0,
            total_case_count: 0,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn system_error(diagnostic: impl Into<String>) -> Self {
        Self::terminal(VerdictStatus::SystemError, diagnostic)
    }

    pub fn compile_error(diagnostic: impl Into<String>) -> Self {
        Self::terminal(VerdictStatus::CompileError, diagnostic)
    }

    pub fn is_accepted(&self) -> bool {
        self.status.is_accepted()
    }
}
