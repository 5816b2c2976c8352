// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for vigil-core operations.

use thiserror::Error;

/// All possible errors that can occur in vigil-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid severity: '{0}'\n  hint: valid severities are: low, medium, high")]
    InvalidSeverity(String),

    #[error("invalid status: '{0}'\n  hint: valid statuses are: new, acknowledged, resolved")]
    InvalidStatus(String),

    #[error("invalid table: '{0}'\n  hint: valid tables are: notifications, comments, topics, subscriptions, sites, devices")]
    InvalidTable(String),

    #[error("invalid tag '{key}': {reason}")]
    InvalidTag { key: String, reason: String },

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("{0}")]
    InvalidInput(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for vigil-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
