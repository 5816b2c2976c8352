// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! vigil-sync: Realtime synchronization and resilience engine
//!
//! Keeps a local [`EntityStore`](vigil_core::EntityStore) in step with a
//! remote store over unreliable connections.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────┐
//!  RemoteStore ────▶ │ChannelMultiplexer│──transitions──▶ HealthMonitor
//!   (channels)       └────────┬─────────┘                      │
//!                             │ change events          reconnect / resync
//!                             ▼                                │
//!                       EventMerger ◀── PendingView            ▼
//!                             │              ▲           ChannelMultiplexer
//!                             ▼              │
//!                        EntityStore ◀── MutationCoordinator ──▶ RemoteStore
//!                             │                (debounced commit)
//!                             ▼
//!                      DeliveryFilter ──▶ EngineEvent::Alert
//! ```
//!
//! [`SyncEngine`] owns one instance of each component for a session.

pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod health;
pub mod merger;
pub mod multiplexer;
pub mod mutation;
pub mod push;
pub mod remote;
pub mod scheduler;
pub mod ws;

#[cfg(test)]
mod test_helpers;

pub use config::SyncConfig;
pub use delivery::{DeliveryFilter, UnknownTopicPolicy};
pub use engine::{EngineEvent, Session, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use health::{EnvSignal, HealthAction, HealthMonitor, HealthReport, HealthState};
pub use merger::{EventMerger, MergeOutcome};
pub use multiplexer::{ChannelMultiplexer, ChannelTransition};
pub use mutation::{MutationCoordinator, MutationFailure, PendingView, PendingWrite};
pub use push::{DeliveryStatus, PushCapability, PushDelivery, PushError, PushedAlert};
pub use remote::{ChannelHandle, ChannelState, RemoteStore, SharedRemote, TransportError};
pub use scheduler::KeyedScheduler;
pub use ws::WebSocketRemote;
