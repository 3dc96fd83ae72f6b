//! Configuration types for the lesson generation engine.
//!
//! This module provides the configuration structures used to control
//! output placement, worker limits, quality thresholds and the external
//! text service used for AI content.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LessonError, Result};

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "lessongen.json";

/// Upper bound for parallel topic workers.
pub const MAX_WORKERS: u32 = 8;

/// Default output directory for generated lessons.
fn default_output_dir() -> String {
    "generated_lessons".to_string()
}

/// Default number of topics generated in parallel.
const fn default_workers() -> u32 {
    1
}

/// Default number of jobs allowed to run at the same time.
const fn default_max_concurrent_jobs() -> u32 {
    2
}

/// Default minimum quality score for a topic to count as generated.
const fn default_min_quality_score() -> f64 {
    0.5
}

/// Default base URL of the text service.
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Default model for content generation.
fn default_model() -> String {
    "gpt-4".to_string()
}

/// Default model used in cost-efficient mode.
fn default_cost_model() -> String {
    "gpt-3.5-turbo".to_string()
}

/// Default environment variable holding the API key.
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Default timeout for a single text service call in seconds.
const fn default_request_timeout() -> u64 {
    30
}

/// Default retries for transient text service failures.
const fn default_max_retries() -> u32 {
    3
}

/// Default base delay for exponential backoff in milliseconds.
const fn default_retry_base_delay() -> u64 {
    1000
}

/// Default number of concurrent text service calls.
const fn default_max_concurrent_requests() -> u32 {
    2
}

/// Default value for boolean options that default to true.
const fn default_true() -> bool {
    true
}

/// Main configuration for lesson generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Directory that receives generated lessons.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Number of topics generated in parallel within one job.
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Number of jobs that may be processing at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,

    /// Topics scoring below this are reported as failed.
    #[serde(default = "default_min_quality_score")]
    pub min_quality_score: f64,

    /// Text service settings.
    #[serde(default)]
    pub ai: AiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            workers: default_workers(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            min_quality_score: default_min_quality_score(),
            ai: AiConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `lessongen.json` in the current directory. If not found,
    /// returns the default configuration.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            LessonError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `lessongen.json` in a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        Self::load_from_file(&config_path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::ConfigParseError` if the file exists but contains
    /// invalid JSON or invalid enum values.
    ///
    /// Returns `LessonError::ConfigValidationError` if the configuration values
    /// are out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(LessonError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| LessonError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as pretty JSON, suitable for a fresh
    /// `lessongen.json`.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::ConfigValidationError` if any validation check fails.
    pub fn validate(&self) -> Result<()> {
        if self.output_dir.trim().is_empty() {
            return Err(LessonError::config_validation(
                "outputDir must not be empty",
                "Provide a valid output directory path in your lessongen.json",
            ));
        }

        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(LessonError::config_validation(
                format!(
                    "workers must be between 1 and {MAX_WORKERS} (got {})",
                    self.workers
                ),
                "Set workers to a value from 1 to 8 in your lessongen.json",
            ));
        }

        if self.max_concurrent_jobs == 0 {
            return Err(LessonError::config_validation(
                "maxConcurrentJobs must be greater than 0",
                "Set maxConcurrentJobs to at least 1 in your lessongen.json",
            ));
        }

        if !(0.0..=1.0).contains(&self.min_quality_score) {
            return Err(LessonError::config_validation(
                format!(
                    "minQualityScore must be between 0.0 and 1.0 (got {})",
                    self.min_quality_score
                ),
                "Set minQualityScore to a fraction such as 0.5 in your lessongen.json",
            ));
        }

        self.ai.validate()
    }
}

/// Settings for the external text service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for content generation.
    #[serde(default = "default_model")]
    pub model: String,

    /// Cheaper model used in cost-efficient mode.
    #[serde(default = "default_cost_model")]
    pub cost_model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Timeout for a single call in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retries for transient failures before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Calls allowed in flight at once, shared by every topic and job.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: u32,

    /// Fail the topic on AI errors instead of falling back.
    #[serde(default = "default_true")]
    pub strict: bool,

    /// Reuse identical AI results within a run.
    #[serde(default = "default_true")]
    pub enable_cache: bool,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            cost_model: default_cost_model(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            max_concurrent_requests: default_max_concurrent_requests(),
            strict: default_true(),
            enable_cache: default_true(),
        }
    }
}

impl AiConfig {
    /// Returns the per-call timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Returns the base delay for exponential backoff.
    #[must_use]
    pub const fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Reads the API key from the configured environment variable.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(LessonError::config_validation(
                "ai.baseUrl must not be empty",
                "Set ai.baseUrl to the root of an OpenAI-compatible API in your lessongen.json",
            ));
        }

        if self.model.trim().is_empty() || self.cost_model.trim().is_empty() {
            return Err(LessonError::config_validation(
                "ai.model and ai.costModel must not be empty",
                "Name the models to use in your lessongen.json",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(LessonError::config_validation(
                "ai.requestTimeoutSecs must be greater than 0",
                "Set ai.requestTimeoutSecs to at least 1 second in your lessongen.json",
            ));
        }

        if self.max_concurrent_requests == 0 {
            return Err(LessonError::config_validation(
                "ai.maxConcurrentRequests must be greater than 0",
                "Set ai.maxConcurrentRequests to at least 1 in your lessongen.json",
            ));
        }

        Ok(())
    }
}
