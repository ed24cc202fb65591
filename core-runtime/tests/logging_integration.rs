//! Integration tests for the logging setup

use bridge_traits::time::LogLevel;
use core_runtime::logging::{init_logging, strip_path, LogFormat, LoggingConfig};

#[test]
fn test_cache_paths_are_stripped() {
    assert_eq!(
        strip_path("/home/listener/.cache/tome/0f3a9c_0.audio"),
        "0f3a9c_0.audio"
    );
    assert_eq!(strip_path("C:\\Users\\Listener\\tome\\0f3a9c_1.part"), "0f3a9c_1.part");
    assert_eq!(strip_path("/var/cache/"), "");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_format_selection() {
    #[cfg(debug_assertions)]
    assert_eq!(LoggingConfig::default().format, LogFormat::Pretty);

    #[cfg(not(debug_assertions))]
    assert_eq!(LoggingConfig::default().format, LogFormat::Json);
}

#[test]
fn test_invalid_filter_is_rejected() {
    let config = LoggingConfig::default().with_filter("core_playback=loudest");
    assert!(init_logging(config).is_err());
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_spans(true)
        .with_target(false);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(config.enable_spans);
    assert!(!config.display_target);
    assert!(config.logger_sink.is_none());
}
