//! Pieces shared by the PerfSight crates:
//!
//! - [`config`]: JSON5 configuration loading and the `logging` section
//! - [`logging`]: subscriber installation from that section
//! - [`error`]: the error type for both

pub mod config;
pub mod error;
pub mod logging;

pub use config::{LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use logging::init_tracing;
