// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory entity store.
//!
//! Holds every collection the engine mirrors. All writes go through
//! [`EntityStore::update`] or [`EntityStore::try_update`], which run a
//! closure against the current state under the store lock, so each write is
//! a function of the immediately prior state. `try_update` works on a copy
//! and only swaps it in when the closure succeeds, so a failed multi-step
//! write leaves nothing behind.
//!
//! Every successful write bumps a version number published on a
//! `tokio::sync::watch` channel.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::error::Result;
use crate::model::{MonitoredSite, Notification, Subscription, Topic};

/// The mirrored collections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collections {
    /// Newest first.
    pub notifications: Vec<Notification>,
    pub topics: Vec<Topic>,
    /// The current actor's subscriptions.
    pub subscriptions: Vec<Subscription>,
    pub sites: Vec<MonitoredSite>,
    /// Set once a topic catalog has been loaded.
    pub topics_loaded: bool,
}

impl Collections {
    pub fn notification(&self, id: &str) -> Option<&Notification> {
        self.notifications.iter().find(|n| n.id == id)
    }

    pub fn notification_mut(&mut self, id: &str) -> Option<&mut Notification> {
        self.notifications.iter_mut().find(|n| n.id == id)
    }

    /// Finds an alert matching by id or push delivery id.
    pub fn find_alert(&self, id: &str, external_id: Option<&str>) -> Option<&Notification> {
        self.notifications
            .iter()
            .find(|n| n.is_same_alert(id, external_id))
    }

    pub fn topic(&self, id: &str) -> Option<&Topic> {
        self.topics.iter().find(|t| t.id == id)
    }

    pub fn site(&self, id: &str) -> Option<&MonitoredSite> {
        self.sites.iter().find(|s| s.id == id)
    }

    /// Recomputes every topic's `subscribed` and `subscription_id` from the
    /// subscription rows.
    pub fn refresh_topic_subscriptions(&mut self) {
        for topic in &mut self.topics {
            let sub = self
                .subscriptions
                .iter()
                .find(|s| s.topic_id.as_deref() == Some(topic.id.as_str()));
            topic.subscribed = sub.is_some();
            topic.subscription_id = sub.map(|s| s.id.clone());
        }
    }

    /// Resolves the topic a subscription refers to, falling back to the
    /// topic currently holding that subscription id.
    pub fn topic_for_subscription(&self, sub: &Subscription) -> Option<String> {
        if let Some(topic_id) = &sub.topic_id {
            return Some(topic_id.clone());
        }
        self.subscriptions
            .iter()
            .find(|s| s.id == sub.id)
            .and_then(|s| s.topic_id.clone())
            .or_else(|| {
                self.topics
                    .iter()
                    .find(|t| t.subscription_id.as_deref() == Some(sub.id.as_str()))
                    .map(|t| t.id.clone())
            })
    }
}

struct Inner {
    state: Mutex<Collections>,
    version: watch::Sender<u64>,
}

/// Shared handle to the collections. Cloning is cheap.
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<Inner>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        EntityStore {
            inner: Arc::new(Inner {
                state: Mutex::new(Collections::default()),
                version,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        // Writers never leave a partial state, so a poisoned lock is still consistent.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump(&self) {
        self.inner.version.send_modify(|v| *v += 1);
    }

    /// Runs an infallible write against the current state.
    pub fn update<R>(&self, f: impl FnOnce(&mut Collections) -> R) -> R {
        let result = {
            let mut state = self.lock();
            f(&mut state)
        };
        self.bump();
        result
    }

    /// Runs a fallible write against a copy of the current state, swapping
    /// the copy in only on success.
    pub fn try_update<R>(&self, f: impl FnOnce(&mut Collections) -> Result<R>) -> Result<R> {
        let result = {
            let mut state = self.lock();
            let mut draft = state.clone();
            let result = f(&mut draft)?;
            *state = draft;
            result
        };
        self.bump();
        Ok(result)
    }

    /// Reads the current state without writing.
    pub fn read<R>(&self, f: impl FnOnce(&Collections) -> R) -> R {
        let state = self.lock();
        f(&state)
    }

    /// Replaces every collection at once.
    pub fn replace(&self, collections: Collections) {
        self.update(|state| *state = collections);
    }

    pub fn snapshot(&self) -> Collections {
        self.read(Collections::clone)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.read(|s| s.notifications.clone())
    }

    pub fn notification(&self, id: &str) -> Option<Notification> {
        self.read(|s| s.notification(id).cloned())
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.read(|s| s.topics.clone())
    }

    pub fn topic(&self, id: &str) -> Option<Topic> {
        self.read(|s| s.topic(id).cloned())
    }

    pub fn topics_loaded(&self) -> bool {
        self.read(|s| s.topics_loaded)
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.read(|s| s.subscriptions.clone())
    }

    pub fn sites(&self) -> Vec<MonitoredSite> {
        self.read(|s| s.sites.clone())
    }

    /// Current version number.
    pub fn version(&self) -> u64 {
        *self.inner.version.borrow()
    }

    /// Receiver that wakes on every write.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
