// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Applies remote change events to the entity store.
//!
//! Events are applied one at a time in arrival order. Each event becomes a
//! single store write computed from the state at the moment it is applied.
//!
//! Rules by table:
//! - Notifications: inserts are dropped if an entry with the same id or
//!   push delivery id exists; updates are suppressed while a local edit to
//!   the record is pending.
//! - Comments: inserts are dropped if the id is already in the thread.
//! - Subscriptions: only the current actor's rows; they drive each topic's
//!   `subscribed` flag.
//! - Topics and sites: upsert and remove by id.

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;

use vigil_core::{
    ChangeEvent, Comment, EntityStore, MonitoredSite, Notification, Operation, Subscription, Table,
    Topic,
};

use crate::mutation::PendingView;

/// What happened to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The store changed.
    Applied,
    /// Already present; nothing to do.
    Duplicate,
    /// Dropped because a local edit to the record is pending.
    Suppressed,
    /// Not applicable: unknown target, foreign actor, malformed row, or an
    /// untracked table.
    Ignored,
}

/// Merges change events into the store.
pub struct EventMerger {
    store: EntityStore,
    pending: PendingView,
    actor_id: String,
    alerts: mpsc::UnboundedSender<Notification>,
}

impl EventMerger {
    /// `alerts` receives every notification newly added by an insert.
    pub fn new(
        store: EntityStore,
        pending: PendingView,
        actor_id: impl Into<String>,
        alerts: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        EventMerger {
            store,
            pending,
            actor_id: actor_id.into(),
            alerts,
        }
    }

    pub fn apply(&self, event: &ChangeEvent) -> MergeOutcome {
        let Some(row) = event.row() else {
            tracing::debug!(table = %event.table, op = %event.operation, "event without row");
            return MergeOutcome::Ignored;
        };
        let outcome = match event.operation {
            Operation::Insert => self.on_insert(event.table, row),
            Operation::Update => self.on_update(event.table, row),
            Operation::Delete => self.on_delete(event.table, row),
        };
        tracing::trace!(table = %event.table, op = %event.operation, ?outcome, "event merged");
        outcome
    }

    pub fn on_insert(&self, table: Table, row: &Value) -> MergeOutcome {
        match table {
            Table::Notifications => self.insert_notification(row),
            Table::Comments => self.insert_comment(row),
            Table::Subscriptions => self.insert_subscription(row),
            Table::Topics => self.upsert_topic(row, true),
            Table::Sites => self.insert_site(row),
            Table::Devices => MergeOutcome::Ignored,
        }
    }

    pub fn on_update(&self, table: Table, row: &Value) -> MergeOutcome {
        match table {
            Table::Notifications => self.update_notification(row),
            Table::Topics => self.upsert_topic(row, false),
            Table::Sites => self.update_site(row),
            Table::Comments | Table::Subscriptions | Table::Devices => MergeOutcome::Ignored,
        }
    }

    /// `old` carries at least the row's key.
    pub fn on_delete(&self, table: Table, old: &Value) -> MergeOutcome {
        let Some(id) = old.get("id").and_then(Value::as_str) else {
            tracing::warn!(%table, "delete without key");
            return MergeOutcome::Ignored;
        };
        match table {
            Table::Notifications => self.remove(|state| {
                let before = state.notifications.len();
                state.notifications.retain(|n| n.id != id);
                state.notifications.len() != before
            }),
            Table::Comments => self.delete_comment(id, old),
            Table::Subscriptions => self.delete_subscription(id, old),
            Table::Topics => self.remove(|state| {
                let before = state.topics.len();
                state.topics.retain(|t| t.id != id);
                state.topics.len() != before
            }),
            Table::Sites => self.remove(|state| {
                let before = state.sites.len();
                state.sites.retain(|s| s.id != id);
                state.sites.len() != before
            }),
            Table::Devices => MergeOutcome::Ignored,
        }
    }

    fn remove(&self, f: impl FnOnce(&mut vigil_core::Collections) -> bool) -> MergeOutcome {
        if self.store.update(f) {
            MergeOutcome::Applied
        } else {
            MergeOutcome::Ignored
        }
    }

    fn insert_notification(&self, row: &Value) -> MergeOutcome {
        let notification = match Notification::from_row(row) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("malformed notification row: {}", e);
                return MergeOutcome::Ignored;
            }
        };
        let inserted = self.store.update(|state| {
            if state
                .find_alert(&notification.id, notification.external_id.as_deref())
                .is_some()
            {
                return false;
            }
            state.notifications.insert(0, notification.clone());
            true
        });
        if !inserted {
            tracing::debug!(id = %notification.id, "duplicate notification dropped");
            return MergeOutcome::Duplicate;
        }
        let _ = self.alerts.send(notification);
        MergeOutcome::Applied
    }

    fn update_notification(&self, row: &Value) -> MergeOutcome {
        let Some(fields) = row.as_object() else {
            return MergeOutcome::Ignored;
        };
        let Some(id) = fields.get("id").and_then(Value::as_str) else {
            return MergeOutcome::Ignored;
        };
        let now = Utc::now();

        let merged = self.pending.unless_pending(id, || {
            self.store
                .try_update(|state| match state.notification_mut(id) {
                    Some(notification) => notification.merge_row(fields, now).map(|()| true),
                    None => Ok(false),
                })
        });

        match merged {
            None => {
                tracing::debug!(id, "remote update suppressed, local edit pending");
                MergeOutcome::Suppressed
            }
            Some(Ok(true)) => MergeOutcome::Applied,
            Some(Ok(false)) => MergeOutcome::Ignored,
            Some(Err(e)) => {
                tracing::warn!(id, "notification update not applied: {}", e);
                MergeOutcome::Ignored
            }
        }
    }

    fn insert_comment(&self, row: &Value) -> MergeOutcome {
        let comment = match Comment::from_row(row) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("malformed comment row: {}", e);
                return MergeOutcome::Ignored;
            }
        };
        self.store
            .update(|state| match state.notification_mut(&comment.notification_id) {
                Some(notification) => {
                    if notification.insert_comment(comment) {
                        MergeOutcome::Applied
                    } else {
                        MergeOutcome::Duplicate
                    }
                }
                None => MergeOutcome::Ignored,
            })
    }

    fn delete_comment(&self, id: &str, old: &Value) -> MergeOutcome {
        let parent = old.get("notification_id").and_then(Value::as_str);
        self.remove(|state| {
            state
                .notifications
                .iter_mut()
                .filter(|n| parent.map_or(true, |p| n.id == p))
                .fold(false, |removed, n| n.remove_comment(id) || removed)
        })
    }

    fn is_foreign(&self, row: &Value) -> bool {
        row.get("user_id")
            .and_then(Value::as_str)
            .is_some_and(|user| user != self.actor_id)
    }

    fn insert_subscription(&self, row: &Value) -> MergeOutcome {
        if self.is_foreign(row) {
            return MergeOutcome::Ignored;
        }
        let subscription = match Subscription::from_row(row) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("malformed subscription row: {}", e);
                return MergeOutcome::Ignored;
            }
        };
        self.store.update(|state| {
            if state.subscriptions.iter().any(|s| s.id == subscription.id) {
                return MergeOutcome::Duplicate;
            }
            state.subscriptions.push(subscription);
            state.refresh_topic_subscriptions();
            MergeOutcome::Applied
        })
    }

    fn delete_subscription(&self, id: &str, old: &Value) -> MergeOutcome {
        if self.is_foreign(old) {
            return MergeOutcome::Ignored;
        }
        let subscription = Subscription {
            id: id.to_string(),
            user_id: self.actor_id.clone(),
            topic_id: old
                .get("topic_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        let outcome = self.store.update(|state| {
            let Some(topic_id) = state.topic_for_subscription(&subscription) else {
                return MergeOutcome::Ignored;
            };
            state
                .subscriptions
                .retain(|s| s.id != subscription.id && s.topic_id.as_deref() != Some(topic_id.as_str()));
            state.refresh_topic_subscriptions();
            MergeOutcome::Applied
        });
        if outcome == MergeOutcome::Ignored {
            tracing::warn!(id, "subscription delete without resolvable topic dropped");
        }
        outcome
    }

    fn upsert_topic(&self, row: &Value, is_insert: bool) -> MergeOutcome {
        let topic = match Topic::from_row(row) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("malformed topic row: {}", e);
                return MergeOutcome::Ignored;
            }
        };
        self.store.update(|state| {
            match state.topics.iter_mut().find(|t| t.id == topic.id) {
                Some(_) if is_insert => return MergeOutcome::Duplicate,
                Some(existing) => *existing = topic,
                None => state.topics.push(topic),
            }
            state.refresh_topic_subscriptions();
            MergeOutcome::Applied
        })
    }

    fn insert_site(&self, row: &Value) -> MergeOutcome {
        let site = match MonitoredSite::from_row(row) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("malformed site row: {}", e);
                return MergeOutcome::Ignored;
            }
        };
        self.store.update(|state| {
            if state.site(&site.id).is_some() {
                return MergeOutcome::Duplicate;
            }
            state.sites.push(site);
            MergeOutcome::Applied
        })
    }

    fn update_site(&self, row: &Value) -> MergeOutcome {
        let site = match MonitoredSite::from_row(row) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("malformed site row: {}", e);
                return MergeOutcome::Ignored;
            }
        };
        self.store
            .update(|state| match state.sites.iter_mut().find(|s| s.id == site.id) {
                Some(existing) => {
                    *existing = site;
                    MergeOutcome::Applied
                }
                None => MergeOutcome::Ignored,
            })
    }
}

#[cfg(test)]
#[path = "merger_tests.rs"]
mod tests;
