//! Configuration for the exporter.

use std::collections::HashSet;
use std::path::Path;

use perfsight_common::LoggingConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] perfsight_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// HTTP endpoint settings.
    #[serde(default)]
    pub web: WebConfig,

    /// Scrape admission and timeout settings.
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// Which collectors to run.
    #[serde(default)]
    pub collectors: CollectorsConfig,

    /// Where performance data comes from.
    #[serde(default)]
    pub perflib: PerflibConfig,

    /// Exposition settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Address to listen on (default: "0.0.0.0:9182").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:9182".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// Scrape admission and deadline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Maximum concurrent in-flight scrapes; further requests are rejected.
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// Subtracted from the client's timeout hint to leave time for the response.
    #[serde(default = "default_timeout_margin")]
    pub timeout_margin_secs: f64,

    /// Scrape budget when the client sends no timeout hint.
    #[serde(default = "default_timeout")]
    pub default_timeout_secs: f64,
}

fn default_max_requests() -> usize {
    5
}

fn default_timeout_margin() -> f64 {
    0.5
}

fn default_timeout() -> f64 {
    10.0
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            timeout_margin_secs: default_timeout_margin(),
            default_timeout_secs: default_timeout(),
        }
    }
}

/// Collector selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorsConfig {
    /// Collectors to build at startup.
    #[serde(default = "default_enabled")]
    pub enabled: Vec<String>,
}

fn default_enabled() -> Vec<String> {
    ["cpu", "logical_disk", "memory", "system"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
        }
    }
}

/// Source of raw performance data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerflibSource {
    /// The live system, through the registry (Windows only).
    #[default]
    Registry,
    /// Synthetic data, on any platform.
    Demo,
}

/// Performance data source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerflibConfig {
    #[serde(default)]
    pub source: PerflibSource,

    /// Language id of the counter name tables (default: "009", English).
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "009".to_string()
}

impl Default for PerflibConfig {
    fn default() -> Self {
        Self {
            source: PerflibSource::default(),
            language: default_language(),
        }
    }
}

/// Exposition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Metric name prefix (default: "windows").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "windows".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = perfsight_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = perfsight_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.web.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.web.listen
            )));
        }

        if !self.web.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.scrape.max_requests == 0 {
            return Err(ConfigError::Validation(
                "max_requests must be > 0".to_string(),
            ));
        }

        if !(self.scrape.timeout_margin_secs >= 0.0) {
            return Err(ConfigError::Validation(
                "timeout_margin_secs must be >= 0".to_string(),
            ));
        }

        if !(self.scrape.default_timeout_secs > 0.0) {
            return Err(ConfigError::Validation(
                "default_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.collectors.enabled.is_empty() {
            return Err(ConfigError::Validation(
                "At least one collector must be enabled".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.collectors.enabled.iter().find(|c| !seen.insert(*c)) {
            return Err(ConfigError::Validation(format!(
                "Collector '{}' enabled more than once",
                dup
            )));
        }

        if self.prometheus.prefix.is_empty() {
            return Err(ConfigError::Validation(
                "Metric prefix must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
