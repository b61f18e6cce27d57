use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::languages::{CppStrategy, JavaStrategy, PythonStrategy};
use super::{JudgeEngine, JudgeStrategy};
use crate::core::Language;
use crate::error::UnsupportedLanguage;
use crate::languages::LanguageTable;

/// Strategies keyed by language, built once at startup
pub struct StrategyRegistry {
    strategies: HashMap<Language, Arc<dyn JudgeStrategy>>,
}

impl StrategyRegistry {
    pub fn new(engine: Arc<JudgeEngine>, table: &LanguageTable) -> anyhow::Result<Self> {
        let mut strategies: HashMap<Language, Arc<dyn JudgeStrategy>> = HashMap::new();

        for language in Language::ALL {
            let config = table.require(language)?;
            let strategy: Arc<dyn JudgeStrategy> = match language {
                Language::Cpp => Arc::new(CppStrategy::new(engine.clone(), config)),
                Language::Java => Arc::new(JavaStrategy::new(engine.clone(), config)),
                Language::Python => Arc::new(PythonStrategy::new(engine.clone(), config)),
            };
            strategies.insert(strategy.language(), strategy);
        }

        info!("Registered judge strategies for {} languages", strategies.len());
        Ok(Self { strategies })
    }

    /// Strategy for a client-supplied language name; aliases are accepted
    pub fn select(&self, name: &str) -> Result<Arc<dyn JudgeStrategy>, UnsupportedLanguage> {
        let language: Language = name.parse()?;
        self.get(language)
            .ok_or_else(|| UnsupportedLanguage(name.to_string()))
    }

    pub fn get(&self, language: Language) -> Option<Arc<dyn JudgeStrategy>> {
        self.strategies.get(&language).cloned()
    }

    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.strategies.keys().copied().collect();
        languages.sort_by_key(|l| l.key());
        languages
    }
}
