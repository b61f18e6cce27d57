use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::core::{Language, Verdict};
use crate::judge::{JudgeEngine, JudgeInput, JudgeStrategy};
use crate::languages::LanguageConfig;

/// JVM start-up dominates, so cases go one per request to keep timings apart
pub struct JavaStrategy {
    engine: Arc<JudgeEngine>,
    config: LanguageConfig,
}

impl JavaStrategy {
    pub fn new(engine: Arc<JudgeEngine>, config: LanguageConfig) -> Self {
        Self { engine, config }
    }
}

#[async_trait]
impl JudgeStrategy for JavaStrategy {
    fn language(&self) -> Language {
        Language::Java
    }

    async fn judge(&self, input: JudgeInput<'_>) -> Verdict {
        let verdict = self.engine.judge_compiled(&self.config, &input, 1).await;
        info!(
            "Java verdict: {} ({}/{} cases, {}ms, {}MB)",
            verdict.status,
            verdict.passed_case_count,
            verdict.total_case_count,
            verdict.run_time_ms,
            verdict.memory_mb
        );
        verdict
    }
}
