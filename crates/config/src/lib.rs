//! Configuration loading, validation, and management for Storyloom.
//!
//! Loads configuration from a TOML file with environment variable overrides
//! (`STORYLOOM_API_KEY`, `STORYLOOM_MODEL`, `STORYLOOM_SUMMARIZER_MODEL`).
//! Every threshold has a serde default, so an empty file is a valid config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// API key for the model backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model routing
    #[serde(default)]
    pub models: ModelConfig,

    /// Tier thresholds
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Summary word caps
    #[serde(default)]
    pub summaries: SummaryConfig,

    /// Retry policy for model calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

/// Primary and fallback model identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model used for the primary turn generation
    #[serde(default = "default_primary_model")]
    pub primary: String,

    /// Cheaper model used for summarization passes
    #[serde(default = "default_summarizer_model")]
    pub summarizer: String,

    /// Temperature for turn generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Temperature for summarization (lower — summaries should be stable)
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f32,

    /// Per-call deadline in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_model(),
            summarizer: default_summarizer_model(),
            temperature: default_temperature(),
            summary_temperature: default_summary_temperature(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

/// Tier boundary thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Most recent messages kept verbatim in context
    #[serde(default = "default_immediate_messages")]
    pub immediate_messages: usize,

    /// Messages per mid-term block summary
    #[serde(default = "default_mid_term_block_size")]
    pub mid_term_block_size: usize,

    /// Unconsolidated old messages tolerated before folding the excess
    #[serde(default = "default_consolidation_threshold")]
    pub consolidation_threshold: usize,

    /// Raw content length (chars) above which a message gets its own summary
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            immediate_messages: default_immediate_messages(),
            mid_term_block_size: default_mid_term_block_size(),
            consolidation_threshold: default_consolidation_threshold(),
            max_message_length: default_max_message_length(),
        }
    }
}

/// Word caps per summary tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_individual_max_words")]
    pub individual_max_words: usize,

    #[serde(default = "default_block_max_words")]
    pub block_max_words: usize,

    #[serde(default = "default_consolidated_max_words")]
    pub consolidated_max_words: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            individual_max_words: default_individual_max_words(),
            block_max_words: default_block_max_words(),
            consolidated_max_words: default_consolidated_max_words(),
        }
    }
}

/// Retry-with-backoff policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_primary_model() -> String {
    "loom-pro".into()
}
fn default_summarizer_model() -> String {
    "loom-flash".into()
}
fn default_temperature() -> f32 {
    0.8
}
fn default_summary_temperature() -> f32 {
    0.3
}
fn default_call_timeout_ms() -> u64 {
    60_000
}
fn default_immediate_messages() -> usize {
    20
}
fn default_mid_term_block_size() -> usize {
    6
}
fn default_consolidation_threshold() -> usize {
    25
}
fn default_max_message_length() -> usize {
    1000
}
fn default_individual_max_words() -> usize {
    300
}
fn default_block_max_words() -> usize {
    250
}
fn default_consolidated_max_words() -> usize {
    400
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_db_path() -> String {
    "storyloom.db".into()
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &redact(&self.api_key))
            .field("models", &self.models)
            .field("memory", &self.memory)
            .field("summaries", &self.summaries)
            .field("retry", &self.retry)
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            models: ModelConfig::default(),
            memory: MemoryConfig::default(),
            summaries: SummaryConfig::default(),
            retry: RetryConfig::default(),
            db_path: default_db_path(),
        }
    }
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from the default path (~/.storyloom/config.toml),
    /// then apply environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("STORYLOOM_API_KEY").ok();
        }
        if let Ok(model) = std::env::var("STORYLOOM_MODEL") {
            config.models.primary = model;
        }
        if let Ok(model) = std::env::var("STORYLOOM_SUMMARIZER_MODEL") {
            config.models.summarizer = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".storyloom")
    }

    /// Validate cross-field invariants the serde defaults cannot express.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.mid_term_block_size == 0 {
            return Err(ConfigError::ValidationError(
                "mid_term_block_size must be at least 1".into(),
            ));
        }
        if self.memory.consolidation_threshold < self.memory.mid_term_block_size {
            return Err(ConfigError::ValidationError(
                "consolidation_threshold must be >= mid_term_block_size".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.models.temperature) {
            return Err(ConfigError::ValidationError(
                "models.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        Ok(())
    }
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
