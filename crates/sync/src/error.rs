// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the synchronization engine.
//!
//! Transport failures are recovered by the reconnection supervisor and never
//! reach the caller of a mutation. Mutation failures are reported on the
//! engine's event channel instead of being returned.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::remote::TransportError;

/// Error type for engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Channel join failure, connection loss, or a malformed frame.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// The target of an operation is missing or the input is unusable.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The push capability is absent or refused to initialize.
    #[error("push capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// A bounded operation exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The remote store refused the request.
    #[error("remote store rejected request: {0}")]
    Remote(String),

    #[error(transparent)]
    Core(#[from] vigil_core::Error),

    #[error("invalid config: {0}")]
    Config(String),

    /// The engine has been stopped.
    #[error("engine is not running")]
    NotRunning,
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rejected(message) => SyncError::Remote(message),
            other => SyncError::Transport(other),
        }
    }
}

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Races `fut` against a deadline, treating expiry as failure.
pub async fn within<T, E>(
    operation: &'static str,
    after: Duration,
    fut: impl Future<Output = Result<T, E>>,
) -> SyncResult<T>
where
    E: Into<SyncError>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(SyncError::Timeout { operation, after }),
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
