//! Judging: per-language strategies on top of a shared engine

pub mod engine;
pub mod languages;
pub mod registry;

use async_trait::async_trait;

pub use engine::JudgeEngine;
pub use registry::StrategyRegistry;

use crate::core::{InlineExample, Language, Verdict};

/// Where the cases of a judgement come from
#[derive(Debug, Clone, Copy)]
pub enum CaseSource<'a> {
    /// Fixture archive in object storage, e.g. "1001.zip"
    Fixture(&'a str),
    /// Single case supplied with a test run
    Example(&'a InlineExample),
}

#[derive(Debug, Clone, Copy)]
pub struct JudgeInput<'a> {
    pub code: &'a str,
    pub source: CaseSource<'a>,
    /// Declared limits, before per-language adjustment
    pub time_limit_ms: u32,
    pub memory_limit_mb: u32,
}

/// Judges source code of one language
///
/// Never fails: infrastructure problems come back as a `SystemError` verdict.
#[async_trait]
pub trait JudgeStrategy: Send + Sync {
    fn language(&self) -> Language;

    async fn judge(&self, input: JudgeInput<'_>) -> Verdict;
}
