//! Tests for configuration loading, overrides and validation

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use tcprelay::config::{Config, ConfigManager, ConfigOverrides};
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_defaults_are_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.relay.listen_addr.to_string(), "127.0.0.1:8080");
    assert_eq!(config.relay.target_addr, "127.0.0.1:8081");
    assert!(config.relay.connect_timeout.is_none());
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"
[relay]
listen_addr = "0.0.0.0:9000"
target_addr = "backend.internal:5432"
chunk_size = 1024
poll_timeout = "250ms"
connect_timeout = "3s"

[logging]
log_level = "debug"
"#,
    );

    let config = ConfigManager::load_from_file(file.path()).unwrap();
    assert_eq!(config.relay.listen_addr.to_string(), "0.0.0.0:9000");
    assert_eq!(config.relay.target_addr, "backend.internal:5432");
    assert_eq!(config.relay.chunk_size, 1024);
    assert_eq!(config.relay.listen_backlog, 16);
    assert_eq!(config.relay.poll_timeout, Duration::from_millis(250));
    assert_eq!(config.relay.connect_timeout, Some(Duration::from_secs(3)));
    assert_eq!(config.logging.log_level, "debug");
}

#[test]
fn test_minimal_file_uses_defaults() {
    let file = write_config(
        r#"
[relay]
listen_addr = "127.0.0.1:7000"
target_addr = "127.0.0.1:7001"
"#,
    );

    let config = ConfigManager::load_from_file(file.path()).unwrap();
    assert_eq!(config.relay.chunk_size, 4096);
    assert_eq!(config.relay.poll_timeout, Duration::from_millis(100));
    assert!(config.relay.connect_timeout.is_none());
    assert_eq!(config.logging.log_level, "info");
}

#[test]
fn test_invalid_file_is_rejected() {
    let file = write_config(
        r#"
[relay]
listen_addr = "127.0.0.1:7000"
target_addr = "127.0.0.1:7001"
chunk_size = 0
"#,
    );

    let err = ConfigManager::load_from_file(file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("chunk_size"));
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigManager::load_from_file(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.relay.target_addr, "127.0.0.1:8081");
}

#[test]
fn test_environment_overrides() {
    let vars: HashMap<&str, &str> = [
        ("RELAY_LISTEN_ADDR", "127.0.0.1:6000"),
        ("RELAY_TARGET_ADDR", "example.com:80"),
        ("RELAY_CHUNK_SIZE", "2048"),
        ("RELAY_POLL_TIMEOUT", "50ms"),
        ("RELAY_CONNECT_TIMEOUT", "1s"),
        ("RELAY_LOG_LEVEL", "warn"),
    ]
    .into_iter()
    .collect();

    let config =
        ConfigManager::load_from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
    assert_eq!(config.relay.listen_addr.to_string(), "127.0.0.1:6000");
    assert_eq!(config.relay.target_addr, "example.com:80");
    assert_eq!(config.relay.chunk_size, 2048);
    assert_eq!(config.relay.poll_timeout, Duration::from_millis(50));
    assert_eq!(config.relay.connect_timeout, Some(Duration::from_secs(1)));
    assert_eq!(config.logging.log_level, "warn");
}

#[test]
fn test_bad_environment_value_is_an_error() {
    let result = ConfigManager::load_from_lookup(|key| {
        (key == "RELAY_POLL_TIMEOUT").then(|| "soon".to_string())
    });
    assert!(result.is_err());
}

#[test]
fn test_cli_overrides_win() {
    let mut config = Config::default();
    config.merge_with_cli_args(&ConfigOverrides {
        listen_addr: Some("127.0.0.1:1234".parse().unwrap()),
        target_addr: Some("10.0.0.1:4321".to_string()),
        chunk_size: Some(512),
        connect_timeout: Some(Duration::from_secs(2)),
        ..ConfigOverrides::default()
    });

    assert_eq!(config.relay.listen_addr.to_string(), "127.0.0.1:1234");
    assert_eq!(config.relay.target_addr, "10.0.0.1:4321");
    assert_eq!(config.relay.chunk_size, 512);
    assert_eq!(config.relay.connect_timeout, Some(Duration::from_secs(2)));
    assert_eq!(config.relay.poll_timeout, Duration::from_millis(100));
    assert!(config.validate().is_ok());
}

#[test]
fn test_validation_rules() {
    let mut config = Config::default();
    config.relay.target_addr = "no-port".to_string();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.relay.target_addr = "host:notaport".to_string();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.relay.target_addr = "[::1]:8081".to_string();
    assert!(config.validate().is_ok());

    let mut config = Config::default();
    config.relay.poll_timeout = Duration::ZERO;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.relay.poll_timeout = Duration::from_secs(60);
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.relay.listen_backlog = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.relay.connect_timeout = Some(Duration::ZERO);
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.logging.log_level = "loud".to_string();
    assert!(config.validate().is_err());
}
