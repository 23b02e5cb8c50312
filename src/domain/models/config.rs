use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main configuration structure for Arborist
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Retry policy for transient store errors
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LogConfig,

    /// Language-model service configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Parent sampler configuration
    #[serde(default)]
    pub sampler: SamplerConfig,

    /// Search loop configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Environment service configuration
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// Completion extraction configuration
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Minimum number of pooled connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a free connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_database_path() -> String {
    ".arborist/arborist.db".to_string()
}

const fn default_min_connections() -> u32 {
    5
}

const fn default_max_connections() -> u32 {
    20
}

const fn default_acquire_timeout_secs() -> u64 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Random jitter as a fraction of the current delay (0.0-1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    1000
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

const fn default_jitter() -> f64 {
    0.5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: default_jitter(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for log files (optional, if None logs only to the console)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Enable console logging (written to stderr)
    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    /// Log rotation policy
    #[serde(default)]
    pub rotation: RotationPolicy,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            enable_stdout: true,
            rotation: RotationPolicy::default(),
        }
    }
}

/// Wire format spoken by the model service
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    /// `/v1/chat/completions`, supports `n` samples per call
    #[default]
    OpenAi,
    /// `/v1/messages`, one sample per call
    Anthropic,
}

/// Language-model service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: ModelProvider,

    #[serde(default = "default_model_base_url")]
    pub base_url: String,

    /// API key; normally supplied through `ARBORIST_MODEL__API_KEY`
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model_name")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub stop_sequences: Vec<String>,

    #[serde(default)]
    pub logit_bias: BTreeMap<String, f64>,

    #[serde(default)]
    pub presence_penalty: f64,

    #[serde(default)]
    pub frequency_penalty: f64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Pause after each single-sample call, to stay under provider rate limits
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Attempts per HTTP call for transient failures
    #[serde(default = "default_model_max_attempts")]
    pub max_attempts: u32,
}

fn default_model_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_model_name() -> String {
    "gpt-4o".to_string()
}

const fn default_temperature() -> f64 {
    0.7
}

const fn default_max_tokens() -> u32 {
    4096
}

const fn default_timeout_secs() -> u64 {
    300
}

const fn default_request_delay_ms() -> u64 {
    2000
}

const fn default_model_max_attempts() -> u32 {
    3
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::default(),
            base_url: default_model_base_url(),
            api_key: String::new(),
            model: default_model_name(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stop_sequences: Vec::new(),
            logit_bias: BTreeMap::new(),
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            max_attempts: default_model_max_attempts(),
        }
    }
}

/// Which parent-selection policy to use
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    #[default]
    RewardWeighted,
    Diversity,
}

/// Parent sampler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SamplerConfig {
    #[serde(default)]
    pub kind: SamplerKind,

    /// Fixed compression strength in [0, 1]; `None` selects adaptive strength
    #[serde(default)]
    pub compression_strength: Option<f64>,

    /// Eligible-row count for one full adaptive strength cycle
    #[serde(default = "default_adaptive_period")]
    pub adaptive_period: u32,

    /// Exclude parents whose conversation exceeds this many exchanges
    #[serde(default)]
    pub max_conversation_length: Option<usize>,

    /// Recent-window size for the diversity sampler
    #[serde(default = "default_window_size")]
    pub window_size: u32,

    /// Diversity sampler temperature (high = uniform, near zero = greedy)
    #[serde(default = "default_sampler_temperature")]
    pub temperature: f64,
}

const fn default_adaptive_period() -> u32 {
    200
}

const fn default_window_size() -> u32 {
    200
}

const fn default_sampler_temperature() -> f64 {
    0.7
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            kind: SamplerKind::default(),
            compression_strength: None,
            adaptive_period: default_adaptive_period(),
            max_conversation_length: None,
            window_size: default_window_size(),
            temperature: default_sampler_temperature(),
        }
    }
}

/// Search loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SearchConfig {
    /// Version to extend; `None` starts a new version after the largest one
    #[serde(default)]
    pub version: Option<i64>,

    #[serde(default)]
    pub version_description: String,

    #[serde(default)]
    pub system_prompt: String,

    /// Serialized environment state used for fresh roots
    #[serde(default)]
    pub initial_state: String,

    /// Maximum in-flight single-sample generation calls
    #[serde(default = "default_n_parallel")]
    pub n_parallel: usize,

    #[serde(default = "default_iterations")]
    pub iterations: u32,

    #[serde(default = "default_samples_per_iteration")]
    pub samples_per_iteration: u32,

    /// Only persist programs that received a value
    #[serde(default)]
    pub skip_failures: bool,

    /// Failed iterations tolerated before the run is aborted
    #[serde(default = "default_max_iteration_retries")]
    pub max_iteration_retries: u32,

    #[serde(default = "default_beam_width")]
    pub beam_width: u32,
}

const fn default_n_parallel() -> usize {
    4
}

const fn default_iterations() -> u32 {
    1000
}

const fn default_samples_per_iteration() -> u32 {
    4
}

const fn default_max_iteration_retries() -> u32 {
    3
}

const fn default_beam_width() -> u32 {
    8
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            version: None,
            version_description: String::new(),
            system_prompt: String::new(),
            initial_state: String::new(),
            n_parallel: default_n_parallel(),
            iterations: default_iterations(),
            samples_per_iteration: default_samples_per_iteration(),
            skip_failures: false,
            max_iteration_retries: default_max_iteration_retries(),
            beam_width: default_beam_width(),
        }
    }
}

/// Environment service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EnvironmentConfig {
    #[serde(default = "default_environment_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_environment_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            base_url: default_environment_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Completion extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExtractionConfig {
    /// Line separating a leading prose section from trailing code
    #[serde(default = "default_code_marker")]
    pub code_marker: String,
}

fn default_code_marker() -> String {
    "from factorio_instance import *".to_string()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            code_marker: default_code_marker(),
        }
    }
}
