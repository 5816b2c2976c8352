// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Push delivery capability and the wrapper the engine talks to.
//!
//! [`PushCapability`] is the seam over the platform's push SDK. It is
//! called only through [`PushDelivery`], which bounds every call with the
//! operation timeout, validates tags before they cross the seam, registers
//! the delivery id with the remote store, and turns foreground deliveries
//! into notification insert events.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use vigil_core::tags::{topic_tag_key, validate_tag_key, validate_tags};
use vigil_core::{ChangeEvent, Operation, Table, Topic};

use crate::error::{within, SyncError, SyncResult};
use crate::remote::{EventSink, SharedRemote};

/// Error reported by a push capability.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("push delivery is not supported here")]
    Unsupported,

    #[error("push call failed: {0}")]
    Failed(String),
}

impl From<PushError> for SyncError {
    fn from(err: PushError) -> Self {
        SyncError::CapabilityUnavailable(err.to_string())
    }
}

/// Boxed future returned by capability calls.
pub type PushFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PushError>> + Send + 'a>>;

/// An alert handed over by the push SDK while the app is in the foreground.
#[derive(Debug, Clone, PartialEq)]
pub struct PushedAlert {
    /// Id the push service assigned to this delivery.
    pub delivery_id: String,
    /// Payload attached by the sender.
    pub data: Value,
}

impl PushedAlert {
    /// Converts the delivery into a notification insert.
    ///
    /// The delivery id becomes the record's `external_id`, and its `id` when
    /// the payload carries none. Missing required fields get defaults.
    pub fn into_change_event(self) -> Option<ChangeEvent> {
        let Value::Object(mut row) = self.data else {
            return None;
        };
        row.insert("external_id".to_string(), Value::String(self.delivery_id.clone()));
        row.entry("id")
            .or_insert_with(|| Value::String(self.delivery_id.clone()));
        row.entry("title").or_insert_with(|| Value::String(String::new()));
        row.entry("message").or_insert_with(|| Value::String(String::new()));
        row.entry("severity").or_insert_with(|| json!("medium"));
        row.entry("status").or_insert_with(|| json!("new"));
        row.entry("created_at")
            .or_insert_with(|| json!(Utc::now()));
        Some(ChangeEvent::insert(Table::Notifications, Value::Object(row)))
    }
}

/// The platform push SDK.
pub trait PushCapability: Send + Sync {
    fn initialize(&self) -> PushFuture<'_, ()>;

    /// Associates the device with `actor_id`.
    fn login(&self, actor_id: &str) -> PushFuture<'_, ()>;

    fn logout(&self) -> PushFuture<'_, ()>;

    /// Opts in. Returns the delivery id, if the service assigned one.
    fn subscribe(&self) -> PushFuture<'_, Option<String>>;

    fn unsubscribe(&self) -> PushFuture<'_, ()>;

    fn is_subscribed(&self) -> PushFuture<'_, bool>;

    fn set_tags(&self, tags: BTreeMap<String, String>) -> PushFuture<'_, ()>;

    fn remove_tags(&self, keys: Vec<String>) -> PushFuture<'_, ()>;

    /// Registers where foreground deliveries go.
    fn on_foreground_delivery(&self, sink: mpsc::UnboundedSender<PushedAlert>);

    /// Registers where opt-in changes made outside the app go.
    fn on_subscription_change(&self, sink: mpsc::UnboundedSender<bool>);
}

/// Delivery availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Uninitialized,
    Ready,
    Subscribed,
    /// The capability is missing or refused to start.
    Disabled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Uninitialized => "uninitialized",
            DeliveryStatus::Ready => "ready",
            DeliveryStatus::Subscribed => "subscribed",
            DeliveryStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct DeliveryState {
    status: DeliveryStatus,
    delivery_id: Option<String>,
}

/// Engine-side wrapper over a [`PushCapability`].
pub struct PushDelivery {
    capability: Arc<dyn PushCapability>,
    remote: SharedRemote,
    actor_id: String,
    timeout: Duration,
    state: Mutex<DeliveryState>,
}

impl PushDelivery {
    pub fn new(
        capability: Arc<dyn PushCapability>,
        remote: SharedRemote,
        actor_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        PushDelivery {
            capability,
            remote,
            actor_id: actor_id.into(),
            timeout,
            state: Mutex::new(DeliveryState {
                status: DeliveryStatus::Uninitialized,
                delivery_id: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeliveryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_status(&self, status: DeliveryStatus) {
        let mut state = self.lock();
        if state.status != status {
            tracing::info!(from = %state.status, to = %status, "push delivery status changed");
            state.status = status;
        }
    }

    pub fn status(&self) -> DeliveryStatus {
        self.lock().status
    }

    pub fn delivery_id(&self) -> Option<String> {
        self.lock().delivery_id.clone()
    }

    fn ensure_available(&self) -> SyncResult<()> {
        match self.status() {
            DeliveryStatus::Disabled => Err(SyncError::CapabilityUnavailable(
                "push delivery disabled".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Starts the capability and logs the actor in. Any failure disables
    /// delivery for the rest of the session.
    pub async fn initialize(&self) -> SyncResult<()> {
        self.ensure_available()?;
        let started = async {
            within("push initialize", self.timeout, self.capability.initialize()).await?;
            within("push login", self.timeout, self.capability.login(&self.actor_id)).await
        }
        .await;

        match started {
            Ok(()) => {
                self.set_status(DeliveryStatus::Ready);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("push delivery unavailable: {}", e);
                self.set_status(DeliveryStatus::Disabled);
                Err(match e {
                    SyncError::CapabilityUnavailable(reason) => SyncError::CapabilityUnavailable(reason),
                    other => SyncError::CapabilityUnavailable(other.to_string()),
                })
            }
        }
    }

    /// Opts in and registers the delivery id with the remote store.
    ///
    /// If registration fails the opt-in is undone.
    pub async fn subscribe(&self) -> SyncResult<Option<String>> {
        self.ensure_available()?;
        let delivery_id = within("push subscribe", self.timeout, self.capability.subscribe()).await?;

        let Some(id) = delivery_id else {
            tracing::warn!("push subscribe returned no delivery id");
            return Ok(None);
        };

        let device = json!({
            "player_id": id,
            "user_id": self.actor_id,
            "created_at": Utc::now(),
        });
        let registered = within(
            "device registration",
            self.timeout,
            self.remote.mutate(Table::Devices, Operation::Insert, device),
        )
        .await;

        if let Err(e) = registered {
            tracing::warn!(delivery_id = %id, "device registration failed, undoing opt-in: {}", e);
            if let Err(undo) =
                within("push unsubscribe", self.timeout, self.capability.unsubscribe()).await
            {
                tracing::warn!("push unsubscribe after failed registration failed: {}", undo);
            }
            return Err(e);
        }

        {
            let mut state = self.lock();
            state.delivery_id = Some(id.clone());
        }
        self.set_status(DeliveryStatus::Subscribed);
        tracing::info!(delivery_id = %id, "push delivery registered");
        Ok(Some(id))
    }

    /// Opts out and removes the device registration.
    pub async fn unsubscribe(&self) -> SyncResult<()> {
        self.ensure_available()?;
        within("push unsubscribe", self.timeout, self.capability.unsubscribe()).await?;
        self.set_status(DeliveryStatus::Ready);

        let delivery_id = self.lock().delivery_id.take();
        if let Some(id) = delivery_id {
            let device = json!({ "player_id": id, "user_id": self.actor_id });
            within(
                "device removal",
                self.timeout,
                self.remote.mutate(Table::Devices, Operation::Delete, device),
            )
            .await?;
        }
        Ok(())
    }

    pub async fn is_subscribed(&self) -> SyncResult<bool> {
        self.ensure_available()?;
        within("push status", self.timeout, self.capability.is_subscribed()).await
    }

    pub async fn set_tags(&self, tags: BTreeMap<String, String>) -> SyncResult<()> {
        validate_tags(&tags)?;
        self.ensure_available()?;
        if tags.is_empty() {
            return Ok(());
        }
        within("push set tags", self.timeout, self.capability.set_tags(tags)).await
    }

    pub async fn remove_tags(&self, keys: Vec<String>) -> SyncResult<()> {
        for key in &keys {
            validate_tag_key(key)?;
        }
        self.ensure_available()?;
        if keys.is_empty() {
            return Ok(());
        }
        within("push remove tags", self.timeout, self.capability.remove_tags(keys)).await
    }

    /// Mirrors topic subscriptions into tags: `topic_<id> = "1"` for each
    /// subscribed topic, removed for the rest.
    pub async fn sync_topic_tags(&self, topics: &[Topic]) -> SyncResult<()> {
        let (subscribed, unsubscribed): (Vec<&Topic>, Vec<&Topic>) =
            topics.iter().partition(|t| t.subscribed);

        let set: BTreeMap<String, String> = subscribed
            .iter()
            .map(|t| (topic_tag_key(&t.id), "1".to_string()))
            .collect();
        let remove: Vec<String> = unsubscribed.iter().map(|t| topic_tag_key(&t.id)).collect();

        self.set_tags(set).await?;
        self.remove_tags(remove).await
    }

    pub async fn logout(&self) -> SyncResult<()> {
        self.ensure_available()?;
        within("push logout", self.timeout, self.capability.logout()).await
    }

    /// Routes foreground deliveries into `sink` as notification inserts and
    /// tracks opt-in changes made outside the app, until `cancel` fires.
    pub fn attach(self: &Arc<Self>, sink: EventSink, cancel: CancellationToken) {
        let (alert_tx, mut alert_rx) = mpsc::unbounded_channel();
        let (change_tx, mut change_rx) = mpsc::unbounded_channel();
        self.capability.on_foreground_delivery(alert_tx);
        self.capability.on_subscription_change(change_tx);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    alert = alert_rx.recv() => {
                        let Some(alert) = alert else { break };
                        let delivery_id = alert.delivery_id.clone();
                        match alert.into_change_event() {
                            Some(event) => {
                                if sink.send(event).is_err() {
                                    break;
                                }
                            }
                            None => tracing::warn!(%delivery_id, "foreground delivery without object payload"),
                        }
                    }
                    Some(subscribed) = change_rx.recv() => {
                        if this.status() != DeliveryStatus::Disabled {
                            let status = if subscribed {
                                DeliveryStatus::Subscribed
                            } else {
                                DeliveryStatus::Ready
                            };
                            this.set_status(status);
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "push_tests.rs"]
mod tests;
