//! Configuration management
//!
//! Loads configuration from config.toml at startup.
//! Every section has defaults, so an absent file or section is valid.

use crate::inference::device::DeviceFamily;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Service configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub caption: CaptionConfig,

    #[serde(default)]
    pub rewrite: RewriteConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on collaborator calls made while serving one request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Allow any origin (dashboard served from elsewhere)
    #[serde(default = "default_true")]
    pub cors_permissive: bool,
}

/// Worker pool settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Worker parallelism; defaults to the device count on CUDA, else 1
    #[serde(default)]
    pub num_workers: Option<usize>,

    /// Force a device family instead of autodetecting
    #[serde(default)]
    pub device: Option<DeviceFamily>,

    /// Fail an acquire with 503 after waiting this long (unbounded when unset)
    #[serde(default)]
    pub acquire_timeout_ms: Option<u64>,

    /// Reject callers once this many are already waiting (unbounded when unset)
    #[serde(default)]
    pub max_waiting: Option<usize>,
}

/// Inference backend settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    /// Inference server URLs, indexed by device ordinal (one entry serves all)
    #[serde(default = "default_classifier_endpoints")]
    pub endpoints: Vec<String>,

    #[serde(default = "default_model_name")]
    pub model_name: String,

    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
}

/// Response-time tracking settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_max_records")]
    pub max_records_per_endpoint: usize,

    /// Requests slower than this are logged as warnings
    #[serde(default = "default_slow_request_ms")]
    pub slow_request_ms: f64,
}

/// Background health monitor settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_history_len")]
    pub history_len: usize,

    /// How long shutdown waits for the monitor task before aborting it
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

/// Caption validation limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidationConfig {
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    #[serde(default = "default_max_length")]
    pub max_length: usize,

    #[serde(default = "default_max_words")]
    pub max_words: usize,

    #[serde(default = "default_max_emojis")]
    pub max_emojis: usize,
}

/// Caption scraping settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptionConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
}

/// Caption rewriting (LLM provider) settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriteConfig {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_rewrite_base_url")]
    pub base_url: String,

    #[serde(default = "default_rewrite_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_rewrite_timeout_secs")]
    pub timeout_secs: u64,
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Write rolling log files in addition to the console
    #[serde(default)]
    pub file_logging: bool,

    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
            cors_permissive: default_true(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoints: default_classifier_endpoints(),
            model_name: default_model_name(),
            timeout_secs: default_classifier_timeout_secs(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_records_per_endpoint: default_max_records(),
            slow_request_ms: default_slow_request_ms(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            history_len: default_history_len(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            max_length: default_max_length(),
            max_words: default_max_words(),
            max_emojis: default_max_emojis(),
        }
    }
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            base_url: default_rewrite_base_url(),
            model: default_rewrite_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_rewrite_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_logging: false,
            directory: default_log_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_classifier_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:8080/predict".to_string()]
}

fn default_model_name() -> String {
    "cardiffnlp/twitter-roberta-base-sentiment-latest".to_string()
}

fn default_classifier_timeout_secs() -> u64 {
    60
}

fn default_max_records() -> usize {
    1000
}

fn default_slow_request_ms() -> f64 {
    1000.0
}

fn default_health_interval_secs() -> u64 {
    600 // 10 minutes
}

fn default_history_len() -> usize {
    90 // ~15 hours at 10-minute sampling
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_min_length() -> usize {
    1
}

fn default_max_length() -> usize {
    500
}

fn default_max_words() -> usize {
    200
}

fn default_max_emojis() -> usize {
    50
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_rewrite_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_rewrite_model() -> String {
    "openai/gpt-oss-20b".to_string()
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

fn default_rewrite_timeout_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Config {
    /// Load configuration from the file named by `CONFIG_PATH` (default config.toml)
    ///
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Load configuration from an explicit path, defaulting when it is absent
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File not found - use defaults
                Ok(Config::default())
            }
            Err(e) => Err(ConfigError::IoError(e)),
        }
    }

    /// Parse TOML text
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.num_workers == Some(0) {
            return Err(ConfigError::Invalid("pool.num_workers must be at least 1".to_string()));
        }
        if self.health.interval_secs == 0 {
            return Err(ConfigError::Invalid("health.interval_secs must be positive".to_string()));
        }
        if self.validation.min_length > self.validation.max_length {
            return Err(ConfigError::Invalid(
                "validation.min_length exceeds validation.max_length".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply command-line overrides on top of file values
    pub fn apply_overrides(&mut self, host: Option<String>, port: Option<u16>, num_workers: Option<usize>) {
        if let Some(host) = host {
            self.server.host = host;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        if num_workers.is_some() {
            self.pool.num_workers = num_workers;
        }
    }

    /// Address the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading file
    IoError(std::io::Error),
    /// Parse error (invalid TOML)
    ParseError(String),
    /// Well-formed but unusable value
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::ParseError(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(e) => write!(f, "Invalid config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(_) | ConfigError::Invalid(_) => None,
        }
    }
}
