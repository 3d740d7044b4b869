use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading configuration and setting up logging.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config file '{}': {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `origin` is the file path, or `<inline>` for parsed strings.
    #[error("Failed to parse config {origin}: {message}")]
    ConfigParse { origin: String, message: String },

    #[error("Failed to initialize tracing: {0}")]
    Tracing(String),
}

pub type Result<T> = std::result::Result<T, Error>;
