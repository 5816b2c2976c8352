// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration.
//!
//! Loaded from a TOML file. Every key is optional:
//! - `url`: WebSocket address of the remote store
//! - `debounce_ms`: quiet period before a local edit is committed
//! - `health_interval_secs`: liveness check period while visible
//! - `join_grace_ms`: how long a reconnect waits for a channel to join
//! - `max_reconnect_attempts`: reconnect cycles before a full resync
//! - `unknown_topic_policy`: `"deliver"` or `"suppress"`

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::delivery::UnknownTopicPolicy;
use crate::error::{SyncError, SyncResult};
use crate::health::HealthConfig;

/// Synchronization engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Remote store URL (default: "ws://localhost:7890").
    #[serde(default = "default_url")]
    pub url: String,
    /// Debounce window for local edits in milliseconds (default: 500).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Liveness tick period in seconds (default: 15).
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    /// Grace period for a reopened channel to join, in milliseconds (default: 5000).
    #[serde(default = "default_join_grace_ms")]
    pub join_grace_ms: u64,
    /// Reconnect cycles before escalating to a full resync (default: 5).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// First retry delay after a failed reconnect, in milliseconds (default: 1000).
    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub reconnect_initial_delay_ms: u64,
    /// Retry delay ceiling in seconds (default: 30).
    #[serde(default = "default_reconnect_max_delay_secs")]
    pub reconnect_max_delay_secs: u64,
    /// Hidden longer than this forces a full resync on return, in seconds (default: 30).
    #[serde(default = "default_hidden_resync_threshold_secs")]
    pub hidden_resync_threshold_secs: u64,
    /// Deadline for every remote or push call, in seconds (default: 10).
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    /// How long delivery waits for the topic catalog, in milliseconds (default: 1500).
    #[serde(default = "default_topic_wait_ms")]
    pub topic_wait_ms: u64,
    /// What to do with alerts for topics that are still unknown after the wait.
    #[serde(default)]
    pub unknown_topic_policy: UnknownTopicPolicy,
}

fn default_url() -> String {
    "ws://localhost:7890".to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_health_interval_secs() -> u64 {
    15
}

fn default_join_grace_ms() -> u64 {
    5000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_initial_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_secs() -> u64 {
    30
}

fn default_hidden_resync_threshold_secs() -> u64 {
    30
}

fn default_operation_timeout_secs() -> u64 {
    10
}

fn default_topic_wait_ms() -> u64 {
    1500
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            url: default_url(),
            debounce_ms: default_debounce_ms(),
            health_interval_secs: default_health_interval_secs(),
            join_grace_ms: default_join_grace_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_initial_delay_ms: default_reconnect_initial_delay_ms(),
            reconnect_max_delay_secs: default_reconnect_max_delay_secs(),
            hidden_resync_threshold_secs: default_hidden_resync_threshold_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            topic_wait_ms: default_topic_wait_ms(),
            unknown_topic_policy: UnknownTopicPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> SyncResult<Self> {
        let config: SyncConfig =
            toml::from_str(content).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero-valued intervals and ceilings.
    pub fn validate(&self) -> SyncResult<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(SyncError::Config(format!(
                "invalid url '{}': must be ws:// or wss://",
                self.url
            )));
        }
        let checks: [(&str, u64); 9] = [
            ("debounce_ms", self.debounce_ms),
            ("health_interval_secs", self.health_interval_secs),
            ("join_grace_ms", self.join_grace_ms),
            ("max_reconnect_attempts", u64::from(self.max_reconnect_attempts)),
            ("reconnect_initial_delay_ms", self.reconnect_initial_delay_ms),
            ("reconnect_max_delay_secs", self.reconnect_max_delay_secs),
            ("hidden_resync_threshold_secs", self.hidden_resync_threshold_secs),
            ("operation_timeout_secs", self.operation_timeout_secs),
            ("topic_wait_ms", self.topic_wait_ms),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(SyncError::Config(format!("{} must be greater than zero", key)));
            }
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn join_grace(&self) -> Duration {
        Duration::from_millis(self.join_grace_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn topic_wait(&self) -> Duration {
        Duration::from_millis(self.topic_wait_ms)
    }

    /// Settings for the reconnection supervisor.
    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            max_reconnect_attempts: self.max_reconnect_attempts,
            initial_backoff: Duration::from_millis(self.reconnect_initial_delay_ms),
            max_backoff: Duration::from_secs(self.reconnect_max_delay_secs),
            hidden_resync_threshold: Duration::from_secs(self.hidden_resync_threshold_secs),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
