//! Integration tests for the logging helpers.

use bridge_traits::time::LogLevel;
use core_runtime::logging::{redact_if_sensitive, redact_url, LogFormat, LoggingConfig};

#[test]
fn test_logging_config_builder() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Json)
        .with_level(LogLevel::Debug)
        .with_pii_redaction(true)
        .with_spans(false)
        .with_target(false);

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, LogLevel::Debug);
    assert!(config.redact_pii);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
}

#[test]
fn test_password_fields_are_redacted() {
    assert_eq!(redact_if_sensitive("password", "hunter2"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("auth_token", "abc"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("item_id", "tr-12"), "tr-12");
}

#[test]
fn test_usernames_that_look_like_emails_are_masked() {
    let redacted = redact_if_sensitive("username", "alice@example.com");
    assert!(redacted.starts_with('a'));
    assert!(!redacted.contains("example.com"));
}

#[test]
fn test_request_urls_hide_the_password_parameter() {
    let url = "https://music.example/rest/getIndexes.view?u=alice&p=enc:736563726574&v=1.8.0&c=android&f=json&musicFolderId=3";
    let redacted = redact_url(url);

    assert!(redacted.contains("musicFolderId=3"));
    assert!(redacted.contains("p=[REDACTED]"));
    assert!(!redacted.contains("736563726574"));
}
