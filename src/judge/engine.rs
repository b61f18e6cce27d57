//! Shared judging steps: case loading, compilation, execution and verdict rendering

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{CaseSource, JudgeInput};
use crate::core::{Verdict, VerdictStatus};
use crate::languages::LanguageConfig;
use crate::sandbox::{Cmd, RunResult, Sandbox, SandboxStatus};
use crate::testcase::{TestCase, TestCaseCache, TestCaseSet};

const INPUT_PREVIEW_CHARS: usize = 100;
const OUTPUT_PREVIEW_CHARS: usize = 200;
const STDERR_PREVIEW_CHARS: usize = 1000;

/// Effective limits of one run, after per-language adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub time_ms: u32,
    pub memory_mb: u32,
}

/// What a run command starts from
#[derive(Debug, Clone, Copy)]
pub enum Program<'a> {
    /// Compiled artifact cached on the sandbox
    Artifact(&'a str),
    /// Source copied in for every run
    Source(&'a str),
}

pub struct JudgeEngine {
    sandbox: Arc<dyn Sandbox>,
    cache: Arc<TestCaseCache>,
}

impl JudgeEngine {
    pub fn new(sandbox: Arc<dyn Sandbox>, cache: Arc<TestCaseCache>) -> Self {
        Self { sandbox, cache }
    }

    /// Compile, run every case in batches of `batch_size`, then drop the artifact
    pub async fn judge_compiled(
        &self,
        config: &LanguageConfig,
        input: &JudgeInput<'_>,
        batch_size: usize,
    ) -> Verdict {
        let cases = match self.load_cases(&input.source).await {
            Ok(cases) => cases,
            Err(verdict) => return verdict,
        };
        let artifact = match self.compile(config, input.code).await {
            Ok(artifact) => artifact,
            Err(verdict) => return verdict,
        };

        let limits = adjusted_limits(config, input);
        let verdict = self
            .run_cases(&cases, batch_size, limits, |case| {
                run_command(config, limits, Program::Artifact(&artifact), case)
            })
            .await;

        self.release(&artifact).await;
        verdict
    }

    /// Run every case one at a time from source
    pub async fn judge_interpreted(&self, config: &LanguageConfig, input: &JudgeInput<'_>) -> Verdict {
        let cases = match self.load_cases(&input.source).await {
            Ok(cases) => cases,
            Err(verdict) => return verdict,
        };

        let limits = adjusted_limits(config, input);
        self.run_cases(&cases, 1, limits, |case| {
            run_command(config, limits, Program::Source(input.code), case)
        })
        .await
    }

    pub async fn load_cases(&self, source: &CaseSource<'_>) -> Result<TestCaseSet, Verdict> {
        let cases = match source {
            CaseSource::Example(example) => Arc::new(vec![TestCase {
                input: example.input.trim().to_string(),
                output: example.output.trim().to_string(),
            }]),
            CaseSource::Fixture(fixture) => self.cache.get(fixture).await.map_err(|e| {
                Verdict::system_error(format!("Failed to load test cases: {}", e))
            })?,
        };

        if cases.is_empty() {
            return Err(Verdict::system_error("No test cases available"));
        }
        Ok(cases)
    }

    /// Compile `code`, returning the id of the cached artifact
    pub async fn compile(&self, config: &LanguageConfig, code: &str) -> Result<String, Verdict> {
        let (Some(compile_command), Some(artifact)) = (&config.compile_command, &config.artifact)
        else {
            return Err(Verdict::system_error("Language has no compile step"));
        };

        let cmd = Cmd::new(compile_command, &config.env)
            .with_file(&config.source_file, code)
            .caching(artifact);

        let result = match self.sandbox.run(std::slice::from_ref(&cmd)).await {
            Ok(results) => match results.into_iter().next() {
                Some(result) => result,
                None => return Err(Verdict::system_error("Sandbox returned no compile result")),
            },
            Err(e) => {
                warn!("Compile request failed: {}", e);
                return Err(Verdict::system_error(format!("Sandbox unavailable: {}", e)));
            }
        };

        match (result.status(), result.file_id(artifact)) {
            (SandboxStatus::Accepted, Some(file_id)) => Ok(file_id.to_string()),
            (status, _) => {
                // Anything cached by a failed compile is useless
                for file_id in result.file_ids.values() {
                    self.release(file_id).await;
                }
                if status == SandboxStatus::MemoryLimitExceeded {
                    debug!("Compiler ran out of memory");
                    return Err(Verdict::terminal(
                        VerdictStatus::MemoryLimitExceeded,
                        "Compiler exceeded the memory limit",
                    ));
                }
                debug!("Compilation failed: {}", result.status);
                Err(Verdict::compile_error(compile_message(&result)))
            }
        }
    }

    /// Execute `cases` in order and stop at the first case that does not pass
    ///
    /// Time and memory are the maxima over the cases evaluated, the failing one
    /// included.
    pub async fn run_cases<F>(
        &self,
        cases: &[TestCase],
        batch_size: usize,
        limits: RunLimits,
        build: F,
    ) -> Verdict
    where
        F: Fn(&TestCase) -> Cmd + Send + Sync,
    {
        let total = cases.len() as u32;
        let mut tally = Verdict {
            status: VerdictStatus::Accepted,
            run_time_ms: 0,
            memory_mb: 0,
            passed_case_count: 0,
            total_case_count: total,
            diagnostic: String::new(),
        };

        for batch in cases.chunks(batch_size.max(1)) {
            let cmds: Vec<Cmd> = batch.iter().map(&build).collect();
            let results = match self.sandbox.run(&cmds).await {
                Ok(results) => results,
                Err(e) => {
                    warn!("Run request failed: {}", e);
                    tally.status = VerdictStatus::SystemError;
                    tally.diagnostic = format!("Sandbox unavailable: {}", e);
                    return tally;
                }
            };

            for (case, result) in batch.iter().zip(&results) {
                tally.run_time_ms = tally.run_time_ms.max(result.time_ms());
                tally.memory_mb = tally.memory_mb.max(result.memory_mb());

                if let Some((status, diagnostic)) = evaluate(case, result) {
                    if status == VerdictStatus::MemoryLimitExceeded {
                        tally.memory_mb = tally.memory_mb.max(u64::from(limits.memory_mb));
                    }
                    tally.status = status;
                    tally.diagnostic = diagnostic;
                    return tally;
                }
                tally.passed_case_count += 1;
            }
        }

        tally
    }

    /// Delete a cached artifact; failures are only logged
    pub async fn release(&self, file_id: &str) {
        if let Err(e) = self.sandbox.delete_file(file_id).await {
            warn!("Failed to delete sandbox file {}: {}", file_id, e);
        }
    }
}

/// Declared limits adjusted for the language
pub fn adjusted_limits(config: &LanguageConfig, input: &JudgeInput<'_>) -> RunLimits {
    RunLimits {
        time_ms: config.calculate_time_limit(input.time_limit_ms),
        memory_mb: config.calculate_memory_limit(input.memory_limit_mb),
    }
}

pub fn run_command(config: &LanguageConfig, limits: RunLimits, program: Program<'_>, case: &TestCase) -> Cmd {
    let cmd = Cmd::new(&config.run_command, &config.env)
        .with_stdin(&case.input)
        .with_limits(limits.time_ms, limits.memory_mb);

    match program {
        Program::Artifact(file_id) => {
            let name = config.artifact.as_deref().unwrap_or(&config.source_file);
            cmd.with_cached_file(name, file_id)
        }
        Program::Source(code) => cmd.with_file(&config.source_file, code),
    }
}

/// `None` if the case passed, otherwise the failing status and a diagnostic
fn evaluate(case: &TestCase, result: &RunResult) -> Option<(VerdictStatus, String)> {
    match result.status() {
        SandboxStatus::Accepted => {
            let actual = result.stdout().trim();
            if actual == case.output {
                None
            } else {
                Some((
                    VerdictStatus::WrongAnswer,
                    format!(
                        "Input: {}\nExpected: {}\nActual: {}",
                        truncate(&case.input, INPUT_PREVIEW_CHARS),
                        truncate(&case.output, OUTPUT_PREVIEW_CHARS),
                        truncate(actual, OUTPUT_PREVIEW_CHARS)
                    ),
                ))
            }
        }
        SandboxStatus::TimeLimitExceeded => Some((VerdictStatus::TimeLimitExceeded, String::new())),
        // Memory kills surface as a signal
        SandboxStatus::MemoryLimitExceeded | SandboxStatus::Signalled => {
            Some((VerdictStatus::MemoryLimitExceeded, String::new()))
        }
        SandboxStatus::NonzeroExitStatus => Some((
            VerdictStatus::RuntimeError,
            format!(
                "Exit status {}\n{}",
                result.exit_status,
                truncate(result.stderr(), STDERR_PREVIEW_CHARS)
            ),
        )),
        SandboxStatus::OutputLimitExceeded => {
            Some((VerdictStatus::RuntimeError, "Output limit exceeded".to_string()))
        }
        SandboxStatus::FileError | SandboxStatus::InternalError | SandboxStatus::Unknown => {
            info!("Sandbox reported {}: {:?}", result.status, result.error);
            Some((
                VerdictStatus::SystemError,
                format!(
                    "Sandbox reported {}: {}",
                    result.status,
                    result.error.as_deref().unwrap_or("")
                ),
            ))
        }
    }
}

fn compile_message(result: &RunResult) -> String {
    let stderr = result.stderr().trim();
    let message = if stderr.is_empty() {
        result.stdout().trim()
    } else {
        stderr
    };
    if message.is_empty() {
        return format!("Compilation failed ({})", result.status);
    }
    truncate(message, STDERR_PREVIEW_CHARS)
}

/// At most `max` characters, with the full length noted when cut
pub fn truncate(text: &str, max: usize) -> String {
    let length = text.chars().count();
    if length <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}...(truncated, {} chars)", head, length)
}
