// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Decides whether a newly merged notification is surfaced to the user.
//!
//! Rules, in order:
//! 1. An active snooze suppresses everything.
//! 2. No topic reference: deliver.
//! 3. Topic known: deliver iff subscribed.
//! 4. Topic unknown: wait up to `topic_wait` for the catalog, then apply
//!    [`UnknownTopicPolicy`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::{EntityStore, Notification};

/// What happens to an alert whose topic is still unknown after the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTopicPolicy {
    /// Fail open: the topic may be new and not yet replicated.
    #[default]
    Deliver,
    Suppress,
}

/// Snooze state and topic membership check.
#[derive(Clone)]
pub struct DeliveryFilter {
    store: EntityStore,
    snooze: Arc<Mutex<Option<DateTime<Utc>>>>,
    topic_wait: Duration,
    policy: UnknownTopicPolicy,
}

impl DeliveryFilter {
    pub fn new(store: EntityStore, topic_wait: Duration, policy: UnknownTopicPolicy) -> Self {
        DeliveryFilter {
            store,
            snooze: Arc::new(Mutex::new(None)),
            topic_wait,
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        self.snooze.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn policy(&self) -> UnknownTopicPolicy {
        self.policy
    }

    pub fn snooze_until(&self, deadline: DateTime<Utc>) {
        *self.lock() = Some(deadline);
        tracing::info!(%deadline, "alerts snoozed");
    }

    pub fn clear_snooze(&self) {
        *self.lock() = None;
        tracing::info!("snooze cleared");
    }

    pub fn snoozed_until(&self) -> Option<DateTime<Utc>> {
        *self.lock()
    }

    pub fn is_snoozed_at(&self, now: DateTime<Utc>) -> bool {
        self.lock().is_some_and(|deadline| deadline > now)
    }

    /// Returns `Some(subscribed)` once the topic is known.
    fn membership(&self, topic_id: &str) -> Option<bool> {
        self.store.read(|state| {
            if !state.topics_loaded {
                return None;
            }
            state.topic(topic_id).map(|t| t.subscribed)
        })
    }

    /// Waits for the store to learn about `topic_id`, bounded by `topic_wait`.
    async fn wait_for_topic(&self, topic_id: &str) -> Option<bool> {
        let mut changes = self.store.watch();
        let waited = tokio::time::timeout(self.topic_wait, async {
            loop {
                if let Some(subscribed) = self.membership(topic_id) {
                    return Some(subscribed);
                }
                if changes.changed().await.is_err() {
                    return None;
                }
            }
        })
        .await;
        waited.ok().flatten()
    }

    /// Decides without waiting. `None` means the topic is not known yet and
    /// [`should_deliver`](Self::should_deliver) would wait for it.
    pub fn decide_now(&self, notification: &Notification) -> Option<bool> {
        if self.is_snoozed_at(Utc::now()) {
            tracing::debug!(id = %notification.id, "delivery suppressed: snoozed");
            return Some(false);
        }
        match notification.topic_id.as_deref() {
            Some(topic_id) => self.membership(topic_id),
            None => Some(true),
        }
    }

    pub async fn should_deliver(&self, notification: &Notification) -> bool {
        if let Some(deliver) = self.decide_now(notification) {
            return deliver;
        }
        let topic_id = notification.topic_id.as_deref().unwrap_or_default();

        let deliver = match self.wait_for_topic(topic_id).await {
            Some(subscribed) => subscribed,
            None => {
                tracing::debug!(id = %notification.id, topic_id, policy = ?self.policy, "topic unknown");
                self.policy == UnknownTopicPolicy::Deliver
            }
        };
        tracing::debug!(id = %notification.id, topic_id, deliver, "delivery decided");
        deliver
    }
}

#[cfg(test)]
#[path = "delivery_tests.rs"]
mod tests;
