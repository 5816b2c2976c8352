// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use tempfile::TempDir;
use yare::parameterized;

#[test]
fn defaults() {
    let config = SyncConfig::default();
    assert_eq!(config.url, "ws://localhost:7890");
    assert_eq!(config.debounce(), Duration::from_millis(500));
    assert_eq!(config.health_interval(), Duration::from_secs(15));
    assert_eq!(config.max_reconnect_attempts, 5);
    assert_eq!(config.operation_timeout(), Duration::from_secs(10));
    assert_eq!(config.unknown_topic_policy, UnknownTopicPolicy::Deliver);
    assert!(config.validate().is_ok());
}

#[test]
fn empty_file_uses_defaults() {
    let config = SyncConfig::from_toml("").unwrap();
    assert_eq!(config, SyncConfig::default());
}

#[test]
fn partial_file_overrides_only_given_keys() {
    let config = SyncConfig::from_toml(
        r#"
url = "wss://alerts.example.com/sync"
debounce_ms = 250
unknown_topic_policy = "suppress"
"#,
    )
    .unwrap();
    assert_eq!(config.url, "wss://alerts.example.com/sync");
    assert_eq!(config.debounce_ms, 250);
    assert_eq!(config.unknown_topic_policy, UnknownTopicPolicy::Suppress);
    assert_eq!(config.health_interval_secs, 15);
}

#[parameterized(
    debounce = { "debounce_ms = 0" },
    health = { "health_interval_secs = 0" },
    grace = { "join_grace_ms = 0" },
    attempts = { "max_reconnect_attempts = 0" },
    timeout = { "operation_timeout_secs = 0" },
    topic_wait = { "topic_wait_ms = 0" },
)]
fn zero_values_rejected(toml: &str) {
    let err = SyncConfig::from_toml(toml).unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
    assert!(err.to_string().contains("greater than zero"));
}

#[test]
fn non_websocket_url_rejected() {
    let err = SyncConfig::from_toml(r#"url = "http://localhost""#).unwrap_err();
    assert!(err.to_string().contains("ws://"));
}

#[test]
fn unknown_policy_rejected() {
    let err = SyncConfig::from_toml(r#"unknown_topic_policy = "maybe""#).unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}

#[test]
fn load_from_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("vigil.toml");
    std::fs::write(&path, "max_reconnect_attempts = 3\nreconnect_max_delay_secs = 60\n").unwrap();

    let config = SyncConfig::load(&path).unwrap();
    let health = config.health_config();
    assert_eq!(health.max_reconnect_attempts, 3);
    assert_eq!(health.max_backoff, Duration::from_secs(60));
    assert_eq!(health.initial_backoff, Duration::from_millis(1000));
}

#[test]
fn load_missing_file() {
    let temp = TempDir::new().unwrap();
    let result = SyncConfig::load(&temp.path().join("missing.toml"));
    assert!(matches!(result, Err(SyncError::Config(_))));
}
