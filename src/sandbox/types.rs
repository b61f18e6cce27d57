//! Wire types of the sandbox RPC

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Cap for the stdout/stderr collectors, in bytes
pub const OUTPUT_LIMIT_BYTES: u64 = 10240;
pub const PROC_LIMIT: u32 = 50;
/// CPU ceiling for compile commands, in nanoseconds (10 s)
pub const COMPILE_CPU_LIMIT_NS: u64 = 10_000_000_000;
/// Memory ceiling for compile commands, in bytes (100 MiB)
pub const COMPILE_MEMORY_LIMIT_BYTES: u64 = 104_857_600;

const NANOS_PER_MS: u64 = 1_000_000;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// A file handed to a command: inline content, an output collector or a cached artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CmdFile {
    Memory { content: String },
    Collector { name: String, max: u64 },
    Cached {
        #[serde(rename = "fileId")]
        file_id: String,
    },
}

/// One command executed by the sandbox
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cmd {
    pub args: Vec<String>,
    pub env: Vec<String>,
    /// stdin, stdout, stderr
    pub files: Vec<CmdFile>,
    pub cpu_limit: u64,
    pub memory_limit: u64,
    pub proc_limit: u32,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub copy_in: HashMap<String, CmdFile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub copy_out: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub copy_out_cached: Vec<String>,
}

impl Cmd {
    pub fn new(args: &[String], env: &[String]) -> Self {
        Self {
            args: args.to_vec(),
            env: env.to_vec(),
            files: vec![
                CmdFile::Memory {
                    content: String::new(),
                },
                CmdFile::Collector {
                    name: "stdout".into(),
                    max: OUTPUT_LIMIT_BYTES,
                },
                CmdFile::Collector {
                    name: "stderr".into(),
                    max: OUTPUT_LIMIT_BYTES,
                },
            ],
            cpu_limit: COMPILE_CPU_LIMIT_NS,
            memory_limit: COMPILE_MEMORY_LIMIT_BYTES,
            proc_limit: PROC_LIMIT,
            copy_in: HashMap::new(),
            copy_out: vec!["stdout".into(), "stderr".into()],
            copy_out_cached: Vec::new(),
        }
    }

    pub fn with_stdin(mut self, input: &str) -> Self {
        self.files[0] = CmdFile::Memory {
            content: input.to_string(),
        };
        self
    }

    /// Limits expressed in the sandbox's units
    pub fn with_limits(mut self, time_ms: u32, memory_mb: u32) -> Self {
        self.cpu_limit = u64::from(time_ms) * NANOS_PER_MS;
        self.memory_limit = u64::from(memory_mb) * BYTES_PER_MB;
        self
    }

    pub fn with_file(mut self, name: &str, content: &str) -> Self {
        self.copy_in.insert(
            name.to_string(),
            CmdFile::Memory {
                content: content.to_string(),
            },
        );
        self
    }

    pub fn with_cached_file(mut self, name: &str, file_id: &str) -> Self {
        self.copy_in.insert(
            name.to_string(),
            CmdFile::Cached {
                file_id: file_id.to_string(),
            },
        );
        self
    }

    /// Keep `name` on the sandbox after the command and report its file id
    pub fn caching(mut self, name: &str) -> Self {
        self.copy_out_cached.push(name.to_string());
        self
    }
}

#[derive(Debug, Serialize)]
pub struct RunRequest<'a> {
    pub cmd: &'a [Cmd],
}

/// Status reported by the sandbox for one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    Accepted,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    OutputLimitExceeded,
    /// Killed by a signal; the sandbox reports memory kills this way
    Signalled,
    NonzeroExitStatus,
    FileError,
    InternalError,
    Unknown,
}

impl SandboxStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Accepted" => SandboxStatus::Accepted,
            "Time Limit Exceeded" => SandboxStatus::TimeLimitExceeded,
            "Memory Limit Exceeded" => SandboxStatus::MemoryLimitExceeded,
            "Output Limit Exceeded" => SandboxStatus::OutputLimitExceeded,
            "Signalled" => SandboxStatus::Signalled,
            "Nonzero Exit Status" => SandboxStatus::NonzeroExitStatus,
            "File Error" => SandboxStatus::FileError,
            "Internal Error" => SandboxStatus::InternalError,
            _ => SandboxStatus::Unknown,
        }
    }
}

/// Result of one command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunResult {
    pub status: String,
    pub exit_status: i32,
    /// CPU time in nanoseconds
    pub time: u64,
    /// Peak memory in bytes
    pub memory: u64,
    /// Wall time in nanoseconds
    pub run_time: u64,
    pub files: HashMap<String, String>,
    pub file_ids: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    pub fn status(&self) -> SandboxStatus {
        SandboxStatus::parse(&self.status)
    }

    pub fn time_ms(&self) -> u64 {
        self.time / NANOS_PER_MS
    }

    pub fn memory_mb(&self) -> u64 {
        self.memory / BYTES_PER_MB
    }

    pub fn stdout(&self) -> &str {
        self.files.get("stdout").map(String::as_str).unwrap_or("")
    }

    pub fn stderr(&self) -> &str {
        self.files.get("stderr").map(String::as_str).unwrap_or("")
    }

    pub fn file_id(&self, name: &str) -> Option<&str> {
        self.file_ids.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_serializes_in_sandbox_shape() {
        let cmd = Cmd::new(&["a".to_string()], &["PATH=/usr/bin".to_string()])
            .with_stdin("3 4")
            .with_limits(1000, 256)
            .with_cached_file("a", "F1");
        let json = serde_json::to_value(&cmd).unwrap();

        assert_eq!(json["cpuLimit"], 1_000_000_000u64);
        assert_eq!(json["memoryLimit"], 268_435_456u64);
        assert_eq!(json["procLimit"], 50);
        assert_eq!(json["files"][0]["content"], "3 4");
        assert_eq!(json["files"][1]["name"], "stdout");
        assert_eq!(json["files"][2]["max"], 10240);
        assert_eq!(json["copyIn"]["a"]["fileId"], "F1");
        assert!(json.get("copyOutCached").is_none());
    }

    #[test]
    fn test_run_result_units_and_defaults() {
        let result: RunResult = serde_json::from_str(
            r#"{"status":"Signalled","exitStatus":9,"time":12500000,"memory":3145728,
                "files":{"stdout":"7\n"}}"#,
        )
        .unwrap();

        assert_eq!(result.status(), SandboxStatus::Signalled);
        assert_eq!(result.time_ms(), 12);
        assert_eq!(result.memory_mb(), 3);
        assert_eq!(result.stdout(), "7\n");
        assert_eq!(result.stderr(), "");
        assert!(result.file_id("a").is_none());
    }
}
