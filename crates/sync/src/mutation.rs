// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Optimistic local edits with debounced commits.
//!
//! An edit is applied to the entity store immediately and recorded as a
//! [`PendingWrite`]. After the debounce window the cumulative patch is
//! committed: the record is first looked up remotely, then updated. A
//! failed lookup or commit restores the pre-edit snapshot. Either way the
//! pending entry is removed, which lifts the merger's suppression of remote
//! updates for that record.
//!
//! Lock order is pending map, then store. The merger only reads the
//! pending map, through [`PendingView`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vigil_core::{Comment, EntityStore, Filter, Notification, NotificationPatch, Operation, Table};

use crate::error::{within, SyncError, SyncResult};
use crate::remote::SharedRemote;
use crate::scheduler::KeyedScheduler;

/// A local edit that has been applied but not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    /// The record as it was before the first edit the remote store has not
    /// confirmed.
    pub snapshot: Notification,
    /// Every uncommitted edit folded together.
    pub patch: NotificationPatch,
    /// Bumped on each edit; a commit only settles the generation it read.
    pub generation: u64,
}

/// A commit that failed. Reported on the failure channel, never returned.
#[derive(Debug)]
pub struct MutationFailure {
    pub id: String,
    pub error: SyncError,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingWrite>>>;

fn lock(pending: &Mutex<HashMap<String, PendingWrite>>) -> MutexGuard<'_, HashMap<String, PendingWrite>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Read-only access to the pending writes.
#[derive(Clone)]
pub struct PendingView {
    pending: PendingMap,
}

impl PendingView {
    pub fn contains(&self, id: &str) -> bool {
        lock(&self.pending).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` with the pending map held.
    pub fn with_pending<R>(&self, f: impl FnOnce(&HashMap<String, PendingWrite>) -> R) -> R {
        let pending = lock(&self.pending);
        f(&pending)
    }

    /// Runs `f` unless a write is pending for `id`. The map stays locked
    /// while `f` runs, so no edit can start in between.
    pub fn unless_pending<R>(&self, id: &str, f: impl FnOnce() -> R) -> Option<R> {
        self.with_pending(|pending| if pending.contains_key(id) { None } else { Some(f()) })
    }
}

/// Applies local edits and commits them after a quiet period.
#[derive(Clone)]
pub struct MutationCoordinator {
    store: EntityStore,
    remote: SharedRemote,
    actor_id: String,
    pending: PendingMap,
    scheduler: KeyedScheduler<String>,
    failures: mpsc::UnboundedSender<MutationFailure>,
    debounce: Duration,
    timeout: Duration,
    generation: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl MutationCoordinator {
    pub fn new(
        store: EntityStore,
        remote: SharedRemote,
        actor_id: impl Into<String>,
        debounce: Duration,
        timeout: Duration,
        failures: mpsc::UnboundedSender<MutationFailure>,
    ) -> Self {
        MutationCoordinator {
            store,
            remote,
            actor_id: actor_id.into(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            scheduler: KeyedScheduler::new(),
            failures,
            debounce,
            timeout,
            generation: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn view(&self) -> PendingView {
        PendingView {
            pending: Arc::clone(&self.pending),
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        lock(&self.pending).contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    fn report(&self, id: &str, error: SyncError) {
        let _ = self.failures.send(MutationFailure {
            id: id.to_string(),
            error,
        });
    }

    /// Applies `patch` locally and schedules its commit.
    ///
    /// An edit arriving before the previous one is committed replaces the
    /// scheduled commit; the eventual commit carries both.
    pub fn mutate(&self, id: &str, patch: NotificationPatch) {
        if patch.is_empty() {
            return;
        }
        if self.cancel.is_cancelled() {
            self.report(id, SyncError::NotRunning);
            return;
        }

        let now = Utc::now();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let applied = {
            let mut pending = lock(&self.pending);
            let before = self.store.update(|state| {
                let notification = state.notification_mut(id)?;
                let before = notification.clone();
                patch.apply_to(notification, now);
                Some(before)
            });
            match before {
                Some(before) => {
                    match pending.get_mut(id) {
                        Some(write) => {
                            write.patch.merge(patch);
                            write.generation = generation;
                        }
                        None => {
                            pending.insert(
                                id.to_string(),
                                PendingWrite {
                                    snapshot: before,
                                    patch,
                                    generation,
                                },
                            );
                        }
                    }
                    true
                }
                None => false,
            }
        };

        if !applied {
            tracing::warn!(id, "edit to unknown notification ignored");
            self.report(id, SyncError::Validation(format!("notification {} not found", id)));
            return;
        }

        let replaced = self
            .scheduler
            .schedule(id.to_string(), self.debounce, self.clone().commit(id.to_string(), generation));
        tracing::debug!(id, generation, replaced, "edit applied, commit scheduled");
    }

    /// Commits the edit pending for `id` now instead of after the debounce.
    pub fn flush(&self, id: &str) -> Option<JoinHandle<()>> {
        self.scheduler.flush(&id.to_string())
    }

    async fn commit(self, id: String, generation: u64) {
        let patch = lock(&self.pending)
            .get(&id)
            .filter(|write| write.generation == generation)
            .map(|write| write.patch.clone());
        let Some(patch) = patch else {
            return;
        };
        let updated_at = self
            .store
            .notification(&id)
            .and_then(|n| n.updated_at)
            .unwrap_or_else(Utc::now);

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = self.push_commit(&id, &patch, updated_at) => result,
        };
        self.settle(&id, generation, &patch, updated_at, result);
    }

    async fn push_commit(
        &self,
        id: &str,
        patch: &NotificationPatch,
        updated_at: DateTime<Utc>,
    ) -> SyncResult<()> {
        // The record may have been deleted remotely during the debounce.
        let rows = within(
            "verify",
            self.timeout,
            self.remote
                .query(Table::Notifications, vec![Filter::eq("id", id)]),
        )
        .await?;
        if rows.is_empty() {
            return Err(SyncError::Validation(format!(
                "notification {} no longer exists",
                id
            )));
        }

        let payload = patch.to_payload(id, updated_at)?;
        within(
            "commit",
            self.timeout,
            self.remote
                .mutate(Table::Notifications, Operation::Update, payload),
        )
        .await?;
        Ok(())
    }

    fn settle(
        &self,
        id: &str,
        generation: u64,
        committed: &NotificationPatch,
        updated_at: DateTime<Utc>,
        result: SyncResult<()>,
    ) {
        let mut pending = lock(&self.pending);
        let current = pending
            .get(id)
            .is_some_and(|write| write.generation == generation);

        match result {
            Ok(()) => {
                if current {
                    pending.remove(id);
                } else if let Some(write) = pending.get_mut(id) {
                    // The remote now holds this patch; a later rollback must
                    // not undo it.
                    committed.apply_to(&mut write.snapshot, updated_at);
                }
                tracing::debug!(id, generation, current, "edit committed");
            }
            Err(error) => {
                // A newer edit is pending; its commit carries this one too.
                if current {
                    if let Some(write) = pending.remove(id) {
                        let restored = self.store.update(|state| match state.notification_mut(id) {
                            Some(notification) => {
                                let comments = std::mem::take(&mut notification.comments);
                                *notification = write.snapshot;
                                notification.comments = comments;
                                true
                            }
                            None => false,
                        });
                        tracing::warn!(id, restored, "commit failed, rolled back: {}", error);
                    }
                } else {
                    tracing::warn!(id, "commit failed, newer edit pending: {}", error);
                }
                drop(pending);
                self.report(id, error);
            }
        }
    }

    /// Adds a comment locally and commits it.
    ///
    /// Returns the optimistic comment. If the commit fails the comment is
    /// removed again and the failure is reported on the failure channel.
    pub fn add_comment(&self, notification_id: &str, text: &str) -> SyncResult<Comment> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::NotRunning);
        }
        if notification_id.trim().is_empty() {
            return Err(SyncError::Validation("notification id is required".to_string()));
        }
        if text.trim().is_empty() {
            return Err(SyncError::Validation("comment text is required".to_string()));
        }

        let comment = Comment {
            id: uuid::Uuid::new_v4().to_string(),
            notification_id: notification_id.to_string(),
            user_id: self.actor_id.clone(),
            text: text.to_string(),
            created_at: Utc::now(),
        };
        let inserted = self
            .store
            .update(|state| match state.notification_mut(notification_id) {
                Some(notification) => notification.insert_comment(comment.clone()),
                None => false,
            });
        if !inserted {
            return Err(SyncError::Validation(format!(
                "notification {} not found",
                notification_id
            )));
        }

        let payload = serde_json::to_value(&comment).map_err(vigil_core::Error::from)?;
        let this = self.clone();
        let committed = comment.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = this.cancel.cancelled() => return,
                result = within(
                    "comment",
                    this.timeout,
                    this.remote.mutate(Table::Comments, Operation::Insert, payload),
                ) => result,
            };
            if let Err(error) = result {
                this.store.update(|state| {
                    if let Some(notification) = state.notification_mut(&committed.notification_id) {
                        notification.remove_comment(&committed.id);
                    }
                });
                tracing::warn!(id = %committed.id, "comment commit failed, removed: {}", error);
                this.report(&committed.notification_id, error);
            }
        });

        Ok(comment)
    }

    /// Cancels every scheduled and in-flight commit.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let cancelled = self.scheduler.cancel_all();
        tracing::debug!(cancelled, "mutation coordinator stopped");
    }
}

#[cfg(test)]
#[path = "mutation_tests.rs"]
mod tests;
