//! Language configuration for compilation and execution in the sandbox

use std::collections::HashMap;

use anyhow::Context;
use serde::Deserialize;

use crate::core::Language;

/// Toolchain settings for one supported language
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageConfig {
    /// Name of the source file inside the sandbox (e.g., "a.cc")
    pub source_file: String,
    /// File produced by the compile step and cached on the sandbox side
    pub artifact: Option<String>,
    /// Compile command (None for interpreted languages)
    pub compile_command: Option<Vec<String>>,
    /// Run command
    pub run_command: Vec<String>,
    /// Environment passed to every sandbox command
    pub env: Vec<String>,
    /// Time limit multiplier and bonus: (multiplier, bonus_seconds)
    /// actual_time = base_time * multiplier + bonus
    pub time_limit: Option<(u32, u32)>,
    /// Memory limit multiplier and bonus: (multiplier, bonus_mb)
    /// actual_memory = base_memory * multiplier + bonus
    pub memory_limit: Option<(u32, u32)>,
}

impl LanguageConfig {
    /// Adjusted time limit in milliseconds
    pub fn calculate_time_limit(&self, base_time_ms: u32) -> u32 {
        match self.time_limit {
            Some((multiplier, bonus_seconds)) => base_time_ms
                .saturating_mul(multiplier)
                .saturating_add(bonus_seconds.saturating_mul(1000)),
            None => base_time_ms,
        }
    }

    /// Adjusted memory limit in MB
    pub fn calculate_memory_limit(&self, base_memory_mb: u32) -> u32 {
        match self.memory_limit {
            Some((multiplier, bonus_mb)) => base_memory_mb
                .saturating_mul(multiplier)
                .saturating_add(bonus_mb),
            None => base_memory_mb,
        }
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    source_file: String,
    artifact: Option<String>,
    compile_command: Option<String>,
    run_command: String,
    #[serde(default)]
    env: Vec<String>,
    #[serde(default)]
    time_limit: Vec<String>,
    #[serde(default)]
    memory_limit: Vec<String>,
}

/// Toolchains of every configured language, built once at startup
#[derive(Debug, Clone, Default)]
pub struct LanguageTable {
    configs: HashMap<Language, LanguageConfig>,
}

impl LanguageTable {
    /// Load the table embedded from `files/languages.toml`
    pub fn load() -> anyhow::Result<Self> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
        Self::parse(content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let raw_configs: HashMap<String, RawLanguageConfig> =
            toml::from_str(content).context("Invalid languages.toml")?;

        let mut configs = HashMap::new();

        for (name, raw) in raw_configs {
            let language: Language = name.parse()?;

            let parse_limit =
                |raw_limit: Vec<String>, kind: &str| -> anyhow::Result<Option<(u32, u32)>> {
                    if raw_limit.is_empty() {
                        return Ok(None);
                    }
                    if raw_limit.len() != 2 {
                        anyhow::bail!("Invalid {} limit for {}: {:?}", kind, name, raw_limit);
                    }
                    let multiplier = raw_limit[0].parse::<u32>().with_context(|| {
                        format!("Invalid {} multiplier for {}: {}", kind, name, raw_limit[0])
                    })?;
                    let offset = raw_limit[1].parse::<u32>().with_context(|| {
                        format!("Invalid {} offset for {}: {}", kind, name, raw_limit[1])
                    })?;
                    Ok(Some((multiplier, offset)))
                };

            if raw.compile_command.is_some() && raw.artifact.is_none() {
                anyhow::bail!("Compiled language {} must declare an artifact", name);
            }

            let config = LanguageConfig {
                source_file: raw.source_file,
                artifact: raw.artifact,
                compile_command: raw.compile_command.map(|cmd| into_command(&cmd)),
                run_command: into_command(&raw.run_command),
                env: raw.env,
                time_limit: parse_limit(raw.time_limit, "time")?,
                memory_limit: parse_limit(raw.memory_limit, "memory")?,
            };

            configs.insert(language, config);
        }

        Ok(Self { configs })
    }

    pub fn get(&self, language: Language) -> Option<&LanguageConfig> {
        self.configs.get(&language)
    }

    /// Configuration for a language that must be present
    pub fn require(&self, language: Language) -> anyhow::Result<LanguageConfig> {
        self.get(language)
            .cloned()
            .with_context(|| format!("No toolchain configured for {}", language))
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_table_covers_every_language() {
        let table = LanguageTable::load().unwrap();
        for language in Language::ALL {
            assert!(table.get(language).is_some(), "missing {}", language);
        }
        let cpp = table.get(Language::Cpp).unwrap();
        assert_eq!(cpp.artifact.as_deref(), Some("a"));
        assert!(table.get(Language::Python).unwrap().compile_command.is_none());
    }

    #[test]
    fn test_limits_are_adjusted() {
        let table = LanguageTable::parse(
            r#"
[java]
source_file = "Main.java"
artifact = "Main.class"
compile_command = "javac Main.java"
run_command = "java -cp . Main"
time_limit = ["2", "1"]
memory_limit = ["2", "32"]
"#,
        )
        .unwrap();
        let java = table.get(Language::Java).unwrap();
        assert_eq!(java.calculate_time_limit(1000), 3000);
        assert_eq!(java.calculate_memory_limit(256), 544);
        assert_eq!(java.run_command, vec!["java", "-cp", ".", "Main"]);
    }

    #[test]
    fn test_unknown_language_key_is_rejected() {
        let result = LanguageTable::parse(
            r#"
[cobol]
source_file = "main.cob"
run_command = "cobc main.cob"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_compiled_language_without_artifact_is_rejected() {
        let result = LanguageTable::parse(
            r#"
[cpp]
source_file = "a.cc"
compile_command = "g++ a.cc -o a"
run_command = "a"
"#,
        );
        assert!(result.is_err());
    }
}
