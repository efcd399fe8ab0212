use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = ".pulse/config.toml";
const DB_FILE_NAME: &str = "pulse.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    pub workspace_dir: PathBuf,
    pub log_level: String,
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    #[default]
    Gemini,
    OpenAi,
    Anthropic,
    Ollama,
}

impl ModelProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Ollama => "http://127.0.0.1:11434",
        }
    }

    pub fn default_api_key_env(&self) -> Option<&'static str> {
        match self {
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Ollama => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: ModelProvider,
    pub model_id: String,
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let provider = ModelProvider::Gemini;
        Self {
            endpoint: Some(provider.default_endpoint().to_string()),
            api_key_env: provider.default_api_key_env().map(str::to_string),
            provider,
            model_id: "gemini-1.5-flash".to_string(),
            max_output_tokens: default_max_output_tokens(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    // Inclusive lower bound.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_conversation_kind")]
    pub conversation_kind: String,
    #[serde(default = "default_distill_window")]
    pub distill_window: usize,
    #[serde(default = "default_memory_context")]
    pub memory_context: usize,
    #[serde(default = "default_fallback_goal")]
    pub fallback_goal: String,
    #[serde(default = "default_step_note_max_tokens")]
    pub step_note_max_tokens: u32,
    // A `thinking` step untouched for this long is up for grabs again.
    #[serde(default = "default_claim_ttl_ms")]
    pub claim_ttl_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            conversation_kind: default_conversation_kind(),
            distill_window: default_distill_window(),
            memory_context: default_memory_context(),
            fallback_goal: default_fallback_goal(),
            step_note_max_tokens: default_step_note_max_tokens(),
            claim_ttl_ms: default_claim_ttl_ms(),
        }
    }
}

impl Default for PulseConfig {
    fn default() -> Self {
        let workspace_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pulse-workspace");

        Self {
            workspace_dir,
            log_level: "info".to_string(),
            agent_id: default_agent_id(),
            model: ModelConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

fn default_agent_id() -> String {
    "analyst".to_string()
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_confidence_threshold() -> f64 {
    0.55
}

fn default_conversation_kind() -> String {
    "conversation".to_string()
}

fn default_distill_window() -> usize {
    1
}

fn default_memory_context() -> usize {
    3
}

fn default_fallback_goal() -> String {
    "Find quantitative trading research opportunities worth pursuing".to_string()
}

fn default_step_note_max_tokens() -> u32 {
    800
}

fn default_claim_ttl_ms() -> u64 {
    300_000
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write config at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize default config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("config has invalid value: {0}")]
    ValidationFailed(String),
}

impl PulseConfig {
    pub fn resolve_path() -> PathBuf {
        if let Ok(path) = env::var("PULSE_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_CONFIG_FILE)
    }

    pub fn db_path(&self) -> PathBuf {
        self.workspace_dir.join(DB_FILE_NAME)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, raw).map_err(|source| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn load_or_create() -> Result<(Self, PathBuf, bool), ConfigError> {
        let path = Self::resolve_path();
        if path.exists() {
            let cfg = Self::load(&path)?;
            return Ok((cfg, path, false));
        }

        let cfg = Self::default();
        cfg.save(&path)?;
        Ok((cfg, path, true))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "log_level cannot be empty".to_string(),
            ));
        }
        if self.agent_id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "agent_id cannot be empty".to_string(),
            ));
        }
        if self.model.model_id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model.model_id cannot be empty".to_string(),
            ));
        }
        if let Some(endpoint) = &self.model.endpoint {
            if endpoint.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "model.endpoint cannot be empty if set".to_string(),
                ));
            }
        }
        if self.model.timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "model.timeout_ms must be positive".to_string(),
            ));
        }

        let pipeline = &self.pipeline;
        if !(0.0..=1.0).contains(&pipeline.confidence_threshold) {
            return Err(ConfigError::ValidationFailed(format!(
                "pipeline.confidence_threshold must be within [0, 1], got {}",
                pipeline.confidence_threshold
            )));
        }
        if pipeline.conversation_kind.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "pipeline.conversation_kind cannot be empty".to_string(),
            ));
        }
        if pipeline.distill_window == 0 {
            return Err(ConfigError::ValidationFailed(
                "pipeline.distill_window must be at least 1".to_string(),
            ));
        }
        if pipeline.fallback_goal.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "pipeline.fallback_goal cannot be empty".to_string(),
            ));
        }
        if pipeline.claim_ttl_ms <= self.model.timeout_ms {
            return Err(ConfigError::ValidationFailed(format!(
                "pipeline.claim_ttl_ms must exceed model.timeout_ms ({}), got {}",
                self.model.timeout_ms, pipeline.claim_ttl_ms
            )));
        }
        Ok(())
    }

    pub fn validate_and_prepare(&self) -> Result<(), ConfigError> {
        self.validate()?;
        fs::create_dir_all(&self.workspace_dir).map_err(|source| ConfigError::WriteFailed {
            path: self.workspace_dir.clone(),
            source,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = PulseConfig::default();
        cfg.validate().expect("defaults should be valid");
        assert_eq!(cfg.pipeline.confidence_threshold, 0.55);
        assert_eq!(cfg.pipeline.memory_context, 3);
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        let mut cfg = PulseConfig::default();
        cfg.pipeline.confidence_threshold = 1.5;
        let err = cfg.validate().expect_err("threshold should be rejected");
        assert!(err.to_string().contains("confidence_threshold"));
    }

    #[test]
    fn partial_toml_fills_pipeline_defaults() {
        let raw = r#"
            workspace_dir = "/tmp/pulse"
            log_level = "debug"

            [model]
            provider = "ollama"
            model_id = "llama3.2:latest"
        "#;
        let cfg: PulseConfig = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.model.provider, ModelProvider::Ollama);
        assert_eq!(cfg.agent_id, "analyst");
        assert_eq!(cfg.pipeline.conversation_kind, "conversation");
        assert_eq!(cfg.model.timeout_ms, 60_000);
        assert!(cfg.model.endpoint.is_none());
    }

    #[test]
    fn claim_ttl_must_outlast_the_model_timeout() {
        let mut cfg = PulseConfig::default();
        assert_eq!(cfg.pipeline.claim_ttl_ms, 300_000);
        cfg.pipeline.claim_ttl_ms = cfg.model.timeout_ms;
        let err = cfg.validate().expect_err("ttl should be rejected");
        assert!(err.to_string().contains("claim_ttl_ms"));

        cfg.pipeline.claim_ttl_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn db_lives_in_workspace() {
        let mut cfg = PulseConfig::default();
        cfg.workspace_dir = PathBuf::from("/srv/pulse");
        assert_eq!(cfg.db_path(), PathBuf::from("/srv/pulse/pulse.db"));
    }
}
