use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::core::{Language, Verdict};
use crate::judge::{JudgeEngine, JudgeInput, JudgeStrategy};
use crate::languages::LanguageConfig;

pub struct PythonStrategy {
    engine: Arc<JudgeEngine>,
    config: LanguageConfig,
}

impl PythonStrategy {
    pub fn new(engine: Arc<JudgeEngine>, config: LanguageConfig) -> Self {
        Self { engine, config }
    }
}

#[async_trait]
impl JudgeStrategy for PythonStrategy {
    fn language(&self) -> Language {
        Language::Python
    }

    async fn judge(&self, input: JudgeInput<'_>) -> Verdict {
        let verdict = self.engine.judge_interpreted(&self.config, &input).await;
        info!(
            "Python verdict: {} ({}/{} cases, {}ms, {}MB)",
            verdict.status,
            verdict.passed_case_count,
            verdict.total_case_count,
            verdict.run_time_ms,
            verdict.memory_mb
        );
        verdict
    }
}
