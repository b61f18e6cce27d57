use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::core::{Language, Verdict};
use crate::judge::{JudgeEngine, JudgeInput, JudgeStrategy};
use crate::languages::LanguageConfig;

/// Cases sent to the sandbox per request
const BATCH_SIZE: usize = 16;

pub struct CppStrategy {
    engine: Arc<JudgeEngine>,
    config: LanguageConfig,
}

impl CppStrategy {
    pub fn new(engine: Arc<JudgeEngine>, config: LanguageConfig) -> Self {
        Self { engine, config }
    }
}

#[async_trait]
impl JudgeStrategy for CppStrategy {
    fn language(&self) -> Language {
        Language::Cpp
    }

    async fn judge(&self, input: JudgeInput<'_>) -> Verdict {
        let verdict = self.engine.judge_compiled(&self.config, &input, BATCH_SIZE).await;
        info!(
            "C++ verdict: {} ({}/{} cases, {}ms, {}MB)",
            verdict.status,
            verdict.passed_case_count,
            verdict.total_case_count,
            verdict.run_time_ms,
            verdict.memory_mb
        );
        verdict
    }
}
