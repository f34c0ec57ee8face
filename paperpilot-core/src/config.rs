//! Configuration system for PaperPilot.
//!
//! Uses `figment` for layered configuration: built-in defaults ->
//! `paperpilot.toml` in the working directory -> environment variables
//! prefixed `PAPERPILOT_` (sections split on `__`, e.g.
//! `PAPERPILOT_LLM__MODEL`) -> explicit overrides from the CLI.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the pipeline and chat session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub llm: LlmConfig,
    pub chat: ChatConfig,
    pub paths: PathsConfig,
    pub limits: LimitsConfig,
}

/// Configuration for the completion client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible chat completions endpoint
    /// (Ollama's default port).
    pub base_url: String,
    /// Model identifier (e.g., "gemma3:1b", "llama3.2:3b", "qwen3:4b").
    pub model: String,
    /// Sampling temperature. Pinned to 0.0 for reproducible pipeline output.
    pub temperature: f32,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Per-request timeout in seconds. A timeout counts as a transient
    /// failure and is retried.
    pub request_timeout_secs: u64,
    /// Retry policy for transient completion failures.
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "gemma3:1b".to_string(),
            temperature: 0.0,
            max_tokens: 4000,
            request_timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry policy for the completion client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Multiplier applied to the backoff on each retry.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Configuration for the interactive chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Maximum tool-call rounds before falling back to the preloaded
    /// context snapshot.
    pub max_tool_rounds: u32,
    /// Chat temperature. Slightly above zero for more natural answers.
    pub temperature: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            temperature: 0.3,
        }
    }
}

/// Directory layout, relative to the working directory unless overridden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory scanned for input PDF documents.
    pub papers_dir: PathBuf,
    /// Directory for per-paper and synthesis file outputs.
    pub data_dir: PathBuf,
    /// Directory holding the SQLite database.
    pub db_dir: PathBuf,
    /// Directory for the JSONL trace log.
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            papers_dir: PathBuf::from("papers"),
            data_dir: PathBuf::from("data"),
            db_dir: PathBuf::from("database"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl PathsConfig {
    /// Full path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.db_dir.join("research.db")
    }
}

/// Bounded sizes applied when composing prompts and rendering outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Leading characters of a paper's full text included in the
    /// summarization prompt. Deterministic leading truncation.
    pub summary_input_chars: usize,
    /// Word cap for the rendered mini-survey.
    pub survey_word_cap: usize,
    /// Characters of each abstract included in the chat context snapshot.
    pub abstract_excerpt_chars: usize,
    /// Characters of each overview returned by the chat list tools.
    pub tool_overview_excerpt_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            summary_input_chars: 3000,
            survey_word_cap: 800,
            abstract_excerpt_chars: 300,
            tool_overview_excerpt_chars: 300,
        }
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument, typically from CLI flags)
/// 2. Environment variables (prefixed `PAPERPILOT_`, sections split on `__`)
/// 3. `paperpilot.toml` in the working directory (or an explicit file)
/// 4. Built-in defaults
pub fn load_config(
    config_file: Option<&Path>,
    overrides: Option<&PipelineConfig>,
) -> Result<PipelineConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

    match config_file {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            let default_file = Path::new("paperpilot.toml");
            if default_file.exists() {
                figment = figment.merge(Toml::file(default_file));
            }
        }
    }

    figment = figment.merge(Env::prefixed("PAPERPILOT_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(|e| ConfigError::Invalid {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.llm.temperature, 0.0);
        assert_eq!(config.llm.max_tokens, 4000);
        assert_eq!(config.chat.max_tool_rounds, 5);
        assert_eq!(config.limits.summary_input_chars, 3000);
        assert_eq!(config.limits.survey_word_cap, 800);
        assert_eq!(config.limits.abstract_excerpt_chars, 300);
        assert_eq!(config.limits.tool_overview_excerpt_chars, 300);
        assert_eq!(
            config.paths.database_path(),
            PathBuf::from("database/research.db")
        );
    }

    #[test]
    fn overrides_win_over_defaults() {
        let overrides = PipelineConfig {
            llm: LlmConfig {
                model: "llama3.2:3b".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.llm.model, "llama3.2:3b");
        // Untouched sections keep their defaults.
        assert_eq!(config.chat.max_tool_rounds, 5);
    }

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let result = load_config(Some(Path::new("/nonexistent/paperpilot.toml")), None);
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }
}
