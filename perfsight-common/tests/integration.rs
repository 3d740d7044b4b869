//! Integration tests for perfsight-common.

use perfsight_common::{Error, LogFormat, LoggingConfig, init_tracing, parse_config};

#[test]
fn test_tracing_initializes_once() {
    let config: LoggingConfig =
        parse_config(r#"{ level: "perfsight=debug", format: "json" }"#).unwrap();
    assert_eq!(config.format, LogFormat::Json);

    init_tracing(&config).unwrap();
    tracing::info!(component = "test", "Tracing initialized");

    // A global subscriber is already installed.
    let err = init_tracing(&LoggingConfig::default()).unwrap_err();
    assert!(matches!(err, Error::Tracing(_)));
    assert!(err.to_string().starts_with("Failed to initialize tracing"));
}
