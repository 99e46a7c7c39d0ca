//! Tests for configuration loading

use std::io::Write;

use citycast::config::EngineConfig;
use citycast::content::ContentClass;
use tempfile::NamedTempFile;

#[test]
fn test_config_file_exists() {
    let config_path = std::path::Path::new("config.toml");
    assert!(
        config_path.exists(),
        "config.toml should exist in project root"
    );
}

#[test]
fn test_shipped_config_loads_and_validates() {
    let config = EngineConfig::from_file("config.toml").expect("shipped config should parse");
    config.validate().expect("shipped config should validate");

    // Channel names are propagated from the map keys.
    for (key, channel) in &config.channels {
        assert_eq!(key, &channel.name);
    }

    let active = config.active_channels();
    assert!(active.contains(&"statusboard"));
    assert!(active.contains(&"alerts"));
    assert!(!active.contains(&"digest"), "digest is disabled");
}

#[test]
fn test_load_minimal_config() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
        [channels.microblog]
        enabled = true
        allowed_classes = ["news"]
        endpoint = "https://hooks.example.com/microblog"

        [channels.microblog.credentials]
        token = "secret"
        "#
    )
    .unwrap();

    let config = EngineConfig::from_file(file.path()).unwrap();
    config.validate().unwrap();

    let channel = &config.channels["microblog"];
    assert_eq!(channel.name, "microblog");
    assert!(channel.allowed_classes.contains(&ContentClass::News));
    // Engine-wide and per-channel defaults fill the gaps.
    assert_eq!(config.engine.max_retries, 3);
    assert_eq!(channel.text_limit, 280);
    assert_eq!(channel.rate_limit.max_per_hour, 10);
    assert_eq!(channel.rate_limit.min_interval_secs, 300);
}

#[test]
fn test_enabled_channel_without_endpoint_is_inactive() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
        [channels.broken]
        enabled = true
        allowed_classes = ["news"]

        [channels.broken.credentials]
        token = "secret"
        "#
    )
    .unwrap();

    let config = EngineConfig::from_file(file.path()).unwrap();
    assert!(config.active_channels().is_empty());
    assert!(config.channels["broken"].config_error().is_some());
}

#[test]
fn test_missing_config_file_is_an_error() {
    let result = EngineConfig::from_file("does/not/exist.toml");
    assert!(result.is_err());
}
