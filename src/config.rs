//! Engine configuration loaded from a YAML file.
//!
//! Every value has a default, so a missing file or an empty file yields a
//! working configuration. The structure is passed explicitly into the
//! resolver; there is no global lookup.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub llm: LlmConfig,
    pub safety: SafetyConfig,
    pub knowledge: KnowledgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// LLM provider: "anthropic", "openai" or "ollama".
    pub provider: String,
    /// Model name; each provider has its own default when unset.
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Oracle call timeout in seconds.
    pub timeout: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: None,
            temperature: 0.0,
            max_tokens: 2000,
            timeout: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Query execution timeout in seconds.
    pub query_timeout: u64,
    /// Maximum number of rows returned; also the injected default LIMIT.
    pub max_results: usize,
    /// Maximum correction-loop attempts per question.
    pub max_retries: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            query_timeout: 30,
            max_results: 1000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Maximum number of knowledge documents injected into a prompt.
    pub budget: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self { budget: 5 }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file, falling back to defaults when
    /// the file is missing or empty.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_when_file_is_missing() {
        let config = EngineConfig::load("does-not-exist.yaml").unwrap();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.safety.max_retries, 3);
        assert_eq!(config.safety.max_results, 1000);
        assert_eq!(config.knowledge.budget, 5);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "safety:\n  max_retries: 5\nllm:\n  provider: ollama").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.safety.max_retries, 5);
        assert_eq!(config.safety.query_timeout, 30);
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.max_tokens, 2000);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "safety: [not a map").unwrap();
        assert!(EngineConfig::load(file.path()).is_err());
    }
}
