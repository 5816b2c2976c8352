// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Remote store abstraction.
//!
//! Provides a trait-based seam over the authoritative store that enables:
//! - A WebSocket client for production ([`crate::ws::WebSocketRemote`])
//! - In-memory stores for unit testing
//!
//! Subscriptions are handed an [`EventSink`] and return a [`ChannelHandle`]
//! whose join state can be observed. Dropping or closing the handle ends the
//! subscription.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use vigil_core::{Binding, ChangeEvent, Filter, Operation, Table};

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The store answered with an error.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Boxed future returned by remote store calls.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = TransportResult<T>> + Send + 'a>>;

/// Where a subscription delivers its change events.
pub type EventSink = mpsc::UnboundedSender<ChangeEvent>;

/// Shared handle to a remote store.
pub type SharedRemote = Arc<dyn RemoteStore>;

/// Join state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Joining,
    Joined,
    Closed,
    Errored,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Joining => "joining",
            ChannelState::Joined => "joined",
            ChannelState::Closed => "closed",
            ChannelState::Errored => "errored",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Live subscription returned by [`RemoteStore::subscribe`].
///
/// The subscription ends when the handle is closed or dropped.
pub struct ChannelHandle {
    state: watch::Receiver<ChannelState>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    /// Wraps a state receiver and the token that ends the subscription.
    pub fn new(state: watch::Receiver<ChannelState>, cancel: CancellationToken) -> Self {
        ChannelHandle { state, cancel }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn watch(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The authoritative store the engine mirrors.
pub trait RemoteStore: Send + Sync {
    /// Fetches every row of `table` matching all filters.
    fn query(&self, table: Table, filter: Vec<Filter>) -> RemoteFuture<'_, Vec<Value>>;

    /// Applies one row mutation. Returns the stored row, if the store sends one.
    fn mutate(&self, table: Table, op: Operation, payload: Value) -> RemoteFuture<'_, Option<Value>>;

    /// Opens a push subscription for `bindings` under `topic`.
    ///
    /// Returns immediately; the join proceeds in the background and is
    /// reported through the handle's state.
    fn subscribe(&self, topic: &str, bindings: Vec<Binding>, sink: EventSink) -> ChannelHandle;
}
