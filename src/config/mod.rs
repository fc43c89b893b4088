pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Feature flags forwarded to the transport and used for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub search_enabled: bool,
    #[serde(default)]
    pub preempt: bool,
    #[serde(default)]
    pub file_ids: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            search_enabled: true,
            preempt: false,
            file_ids: Vec::new(),
        }
    }
}

/// Knobs of the streaming normalizer itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Provider stream terminators that leak into the text channel.
    #[serde(default = "default_junk_tokens")]
    pub junk_tokens: Vec<String>,
    /// Tool names that stay visible in live events but never reach the final message.
    #[serde(default = "default_internal_tools")]
    pub internal_tools: Vec<String>,
    /// Fail the turn after this many unparseable payload lines in a row.
    /// `None` drops them silently forever.
    #[serde(default)]
    pub max_consecutive_malformed_lines: Option<usize>,
}

fn default_junk_tokens() -> Vec<String> {
    vec![
        "<｜end▁of▁thinking｜>".to_string(),
        "<|endoftext|>".to_string(),
    ]
}
fn default_internal_tools() -> Vec<String> {
    vec!["web_search".to_string()]
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            junk_tokens: default_junk_tokens(),
            internal_tools: default_internal_tools(),
            max_consecutive_malformed_lines: None,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

fn default_provider() -> String {
    "deepseek-web".to_string()
}
fn default_model() -> String {
    "deepseek-chat".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            features: FeaturesConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
