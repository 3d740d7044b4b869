//! JSON5 configuration loading and the logging section shared by binaries.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// The `logging` section of a configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `perfsight_perflib=debug,info`.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Colored text output. Ignored for JSON.
    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ansi() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            ansi: default_ansi(),
        }
    }
}

/// Read and deserialize a JSON5 file.
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), bytes = content.len(), "Read config file");

    from_json5(&content, || format!("file '{}'", path.display()))
}

/// Deserialize a JSON5 string.
pub fn parse_config<T: DeserializeOwned>(content: &str) -> Result<T> {
    from_json5(content, || "<inline>".to_string())
}

fn from_json5<T: DeserializeOwned>(content: &str, origin: impl FnOnce() -> String) -> Result<T> {
    json5::from_str(content).map_err(|e| Error::ConfigParse {
        origin: origin(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_logging_defaults() {
        let config: Sample = parse_config("{}").unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.logging.ansi);
    }

    #[test]
    fn test_logging_section() {
        let config: Sample = parse_config(
            r#"{
                // comments and trailing commas are JSON5
                logging: { level: "perfsight_perflib=trace", format: "json", ansi: false, },
            }"#,
        )
        .unwrap();

        assert_eq!(config.logging.level, "perfsight_perflib=trace");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.logging.ansi);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perfsight.json5");
        std::fs::write(&path, "{ logging: { level: 'warn' } }").unwrap();

        let config: Sample = load_config(&path).unwrap();

        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config::<Sample>("/nonexistent/perfsight.json5").unwrap_err();

        assert!(matches!(err, Error::ConfigRead { ref path, .. } if path.ends_with("perfsight.json5")));
    }

    #[test]
    fn test_parse_error_names_origin() {
        let err = parse_config::<Sample>("{ logging: ").unwrap_err();

        assert!(matches!(err, Error::ConfigParse { ref origin, .. } if origin == "<inline>"));
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(parse_config::<Sample>("{ logging: { format: 'xml' } }").is_err());
    }
}
