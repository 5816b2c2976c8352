// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! One synchronization session.
//!
//! [`SyncEngine::start`] loads a snapshot, opens the standard channels and
//! spawns two tasks:
//!
//! - the engine loop, which owns the channel multiplexer, the event merger
//!   and the health monitor, and is the only task that applies remote
//!   change events;
//! - the delivery loop, which runs each newly merged notification through
//!   the delivery filter.
//!
//! Local edits go straight to the mutation coordinator from the caller's
//! task. [`SyncEngine::stop`] cancels every timer and task and closes all
//! channels.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use vigil_core::{
    Binding, ChangeEvent, Collections, Comment, EntityStore, Filter, MonitoredSite, Notification,
    NotificationPatch, Operation, Subscription, Table, Topic,
};

use crate::config::SyncConfig;
use crate::delivery::DeliveryFilter;
use crate::error::{within, SyncError, SyncResult};
use crate::health::{EnvSignal, HealthAction, HealthMonitor, HealthReport, HealthState, Liveness};
use crate::merger::{EventMerger, MergeOutcome};
use crate::multiplexer::{ChannelMultiplexer, ChannelTransition};
use crate::mutation::{MutationCoordinator, MutationFailure, PendingView};
use crate::push::{DeliveryStatus, PushCapability, PushDelivery};
use crate::remote::{ChannelState, SharedRemote};

/// The signed-in actor a session runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub actor_id: String,
}

impl Session {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Session {
            actor_id: actor_id.into(),
        }
    }
}

/// Something the host should know about.
#[derive(Debug)]
pub enum EngineEvent {
    /// A new notification passed the delivery filter.
    Alert(Notification),
    /// A local edit or comment could not be committed and was reverted.
    MutationFailed { id: String, error: SyncError },
    HealthChanged(HealthState),
    ResyncCompleted,
}

enum Command {
    Signal(EnvSignal),
}

/// Channel names and bindings opened for every session.
fn standard_channels(actor_id: &str) -> Vec<(&'static str, Vec<Binding>)> {
    vec![
        ("notifications", vec![Binding::all(Table::Notifications)]),
        (
            "comments",
            vec![Binding::only(Table::Comments, Operation::Insert)],
        ),
        ("topics", vec![Binding::all(Table::Topics)]),
        (
            "subscriptions",
            vec![
                Binding::only(Table::Subscriptions, Operation::Insert)
                    .with_filter(Filter::eq("user_id", actor_id)),
                // Deletes may carry only the key.
                Binding::only(Table::Subscriptions, Operation::Delete),
            ],
        ),
        ("sites", vec![Binding::all(Table::Sites)]),
    ]
}

fn parse_rows<T>(
    table: Table,
    rows: Vec<serde_json::Value>,
    parse: fn(&serde_json::Value) -> vigil_core::Result<T>,
) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match parse(row) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(%table, "skipping malformed row: {}", e);
                None
            }
        })
        .collect()
}

/// Fetches every mirrored table and assembles the collections.
async fn fetch_snapshot(
    remote: &SharedRemote,
    actor_id: &str,
    timeout: Duration,
) -> SyncResult<Collections> {
    let (notifications, comments, topics, subscriptions, sites) = tokio::try_join!(
        within("snapshot", timeout, remote.query(Table::Notifications, Vec::new())),
        within("snapshot", timeout, remote.query(Table::Comments, Vec::new())),
        within("snapshot", timeout, remote.query(Table::Topics, Vec::new())),
        within(
            "snapshot",
            timeout,
            remote.query(Table::Subscriptions, vec![Filter::eq("user_id", actor_id)])
        ),
        within("snapshot", timeout, remote.query(Table::Sites, Vec::new())),
    )?;

    let mut notifications = parse_rows(Table::Notifications, notifications, Notification::from_row);
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut collections = Collections {
        notifications,
        topics: parse_rows(Table::Topics, topics, Topic::from_row),
        subscriptions: parse_rows(Table::Subscriptions, subscriptions, Subscription::from_row),
        sites: parse_rows(Table::Sites, sites, MonitoredSite::from_row),
        topics_loaded: true,
    };
    for comment in parse_rows(Table::Comments, comments, Comment::from_row) {
        if let Some(parent) = collections.notification_mut(&comment.notification_id) {
            parent.insert_comment(comment);
        }
    }
    collections.refresh_topic_subscriptions();
    Ok(collections)
}

/// Replaces the store contents with `fresh` in one write. Records with a
/// pending local edit keep their local fields.
fn install_snapshot(store: &EntityStore, pending: &PendingView, mut fresh: Collections) {
    pending.with_pending(|writes| {
        store.update(|state| {
            for notification in &mut fresh.notifications {
                if !writes.contains_key(&notification.id) {
                    continue;
                }
                if let Some(local) = state.notification(&notification.id) {
                    let comments = std::mem::take(&mut notification.comments);
                    *notification = local.clone();
                    notification.comments = comments;
                }
            }
            *state = fresh;
        })
    });
}

/// Handle to a running session.
pub struct SyncEngine {
    actor_id: String,
    store: EntityStore,
    coordinator: MutationCoordinator,
    delivery: DeliveryFilter,
    push: Option<Arc<PushDelivery>>,
    commands: mpsc::UnboundedSender<Command>,
    health: watch::Receiver<HealthReport>,
    channels: watch::Receiver<BTreeMap<String, ChannelState>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncEngine {
    /// Starts a session.
    ///
    /// A failed initial snapshot does not fail the start: the engine comes
    /// up empty in the `Failed` state and retries with a full resync.
    pub async fn start(
        config: SyncConfig,
        session: Session,
        remote: SharedRemote,
        push: Option<Arc<dyn PushCapability>>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let actor_id = session.actor_id;
        let cancel = CancellationToken::new();
        let store = EntityStore::new();

        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (transition_tx, transition_rx) = mpsc::unbounded_channel();
        let (alert_tx, alert_rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let coordinator = MutationCoordinator::new(
            store.clone(),
            remote.clone(),
            actor_id.clone(),
            config.debounce(),
            config.operation_timeout(),
            failure_tx,
        );
        let merger = EventMerger::new(store.clone(), coordinator.view(), actor_id.clone(), alert_tx);
        let delivery = DeliveryFilter::new(
            store.clone(),
            config.topic_wait(),
            config.unknown_topic_policy,
        );
        let mux = ChannelMultiplexer::new(remote.clone(), change_tx.clone(), transition_tx);
        let monitor = HealthMonitor::new(config.health_config());

        let push = match push {
            Some(capability) => {
                let wrapper = Arc::new(PushDelivery::new(
                    capability,
                    remote.clone(),
                    actor_id.clone(),
                    config.operation_timeout(),
                ));
                if wrapper.initialize().await.is_ok() {
                    wrapper.attach(change_tx.clone(), cancel.child_token());
                }
                Some(wrapper)
            }
            None => None,
        };

        let (health_tx, health_rx) = watch::channel(monitor.report());
        let (channels_tx, channels_rx) = watch::channel(BTreeMap::new());

        let mut engine_loop = EngineLoop {
            config,
            actor_id: actor_id.clone(),
            remote,
            store: store.clone(),
            pending: coordinator.view(),
            merger,
            mux,
            monitor,
            push: push.clone(),
            events: event_tx.clone(),
            health_tx,
            channels_tx,
            last_state: HealthState::Active,
            retry_at: None,
            cancel: cancel.clone(),
            commands: command_rx,
            changes: change_rx,
            transitions: transition_rx,
            failures: failure_rx,
        };
        engine_loop.initial_load().await;

        tracing::info!(actor = %actor_id, "sync engine started");
        let mut tasks = vec![tokio::spawn(engine_loop.run())];
        tasks.push(tokio::spawn(delivery_loop(
            delivery.clone(),
            alert_rx,
            event_tx,
            cancel.clone(),
        )));

        Ok(SyncEngine {
            actor_id,
            store,
            coordinator,
            delivery,
            push,
            commands: command_tx,
            health: health_rx,
            channels: channels_rx,
            events: Mutex::new(Some(event_rx)),
            cancel,
            tasks,
        })
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// The mirrored collections.
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Applies a local edit now and commits it after the debounce window.
    /// Failures arrive as [`EngineEvent::MutationFailed`].
    pub fn mutate(&self, id: &str, patch: NotificationPatch) {
        self.coordinator.mutate(id, patch);
    }

    /// Adds a comment to a notification's thread.
    pub fn add_comment(&self, notification_id: &str, text: &str) -> SyncResult<Comment> {
        self.coordinator.add_comment(notification_id, text)
    }

    /// Forwards a host environment change to the health monitor.
    pub fn signal(&self, signal: EnvSignal) -> SyncResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::NotRunning);
        }
        self.commands
            .send(Command::Signal(signal))
            .map_err(|_| SyncError::NotRunning)
    }

    pub fn snooze_until(&self, deadline: DateTime<Utc>) {
        self.delivery.snooze_until(deadline);
    }

    pub fn clear_snooze(&self) {
        self.delivery.clear_snooze();
    }

    pub fn health(&self) -> HealthReport {
        *self.health.borrow()
    }

    /// Receiver that wakes on every health change.
    pub fn watch_health(&self) -> watch::Receiver<HealthReport> {
        self.health.clone()
    }

    pub fn channel_states(&self) -> BTreeMap<String, ChannelState> {
        self.channels.borrow().clone()
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn push(&self) -> Option<&Arc<PushDelivery>> {
        self.push.as_ref()
    }

    /// Ends the session and waits for its tasks to finish.
    pub async fn stop(mut self) {
        self.shutdown();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                tracing::warn!("engine task ended abnormally: {}", e);
            }
        }
        tracing::info!(actor = %self.actor_id, "sync engine stopped");
    }

    fn shutdown(&self) {
        self.cancel.cancel();
        self.coordinator.shutdown();
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn delivery_loop(
    filter: DeliveryFilter,
    mut alerts: mpsc::UnboundedReceiver<Notification>,
    events: mpsc::UnboundedSender<EngineEvent>,
    cancel: CancellationToken,
) {
    // Alerts waiting for their topic; the rest are decided inline.
    let mut waiting = JoinSet::new();
    loop {
        let (deliver, notification) = tokio::select! {
            _ = cancel.cancelled() => break,
            next = alerts.recv() => {
                let Some(notification) = next else { break };
                match filter.decide_now(&notification) {
                    Some(deliver) => (deliver, notification),
                    None => {
                        let filter = filter.clone();
                        waiting.spawn(async move {
                            (filter.should_deliver(&notification).await, notification)
                        });
                        continue;
                    }
                }
            }
            Some(decided) = waiting.join_next() => match decided {
                Ok(decided) => decided,
                Err(e) => {
                    tracing::warn!("topic wait ended abnormally: {}", e);
                    continue;
                }
            },
        };
        if deliver && events.send(EngineEvent::Alert(notification)).is_err() {
            break;
        }
    }
}

/// State owned by the engine loop task.
struct EngineLoop {
    config: SyncConfig,
    actor_id: String,
    remote: SharedRemote,
    store: EntityStore,
    pending: PendingView,
    merger: EventMerger,
    mux: ChannelMultiplexer,
    monitor: HealthMonitor,
    push: Option<Arc<PushDelivery>>,
    events: mpsc::UnboundedSender<EngineEvent>,
    health_tx: watch::Sender<HealthReport>,
    channels_tx: watch::Sender<BTreeMap<String, ChannelState>>,
    last_state: HealthState,
    retry_at: Option<Instant>,
    cancel: CancellationToken,
    commands: mpsc::UnboundedReceiver<Command>,
    changes: mpsc::UnboundedReceiver<ChangeEvent>,
    transitions: mpsc::UnboundedReceiver<ChannelTransition>,
    failures: mpsc::UnboundedReceiver<MutationFailure>,
}

impl EngineLoop {
    fn liveness(&self) -> Liveness {
        Liveness::new(self.mux.joined_count(), self.mux.len())
    }

    fn publish(&mut self) {
        let report = self.monitor.report();
        self.health_tx.send_if_modified(|current| {
            if *current == report {
                return false;
            }
            *current = report;
            true
        });
        if report.state != self.last_state {
            self.last_state = report.state;
            let _ = self.events.send(EngineEvent::HealthChanged(report.state));
        }
        self.channels_tx.send_replace(self.mux.list_states());
    }

    fn open_standard_channels(&mut self) {
        for (name, bindings) in standard_channels(&self.actor_id) {
            self.mux.open(name, bindings);
        }
    }

    fn sync_tags(&self) {
        let Some(push) = self.push.clone() else {
            return;
        };
        if push.status() == DeliveryStatus::Disabled {
            return;
        }
        let topics = self.store.topics();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = push.sync_topic_tags(&topics) => {
                    if let Err(e) = result {
                        tracing::warn!("topic tag sync failed: {}", e);
                    }
                }
            }
        });
    }

    async fn initial_load(&mut self) {
        match fetch_snapshot(&self.remote, &self.actor_id, self.config.operation_timeout()).await {
            Ok(collections) => {
                self.store.replace(collections);
                self.open_standard_channels();
                self.sync_tags();
            }
            Err(e) => {
                tracing::warn!("initial snapshot failed: {}", e);
                let action = self.monitor.mark_failed();
                self.perform(action).await;
            }
        }
        self.publish();
    }

    async fn run(mut self) {
        let period = self.config.health_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(command) = self.commands.recv() => match command {
                    Command::Signal(signal) => {
                        tracing::debug!(?signal, "environment signal");
                        let action = self.monitor.on_signal(signal, self.liveness());
                        self.perform(action).await;
                    }
                },
                Some(event) = self.changes.recv() => self.on_change(event),
                Some(transition) = self.transitions.recv() => {
                    tracing::debug!(channel = %transition.name, state = %transition.state, "channel state");
                    let action = self.monitor.on_channel_transition(transition.state, self.liveness());
                    self.perform(action).await;
                }
                Some(failure) = self.failures.recv() => {
                    let _ = self.events.send(EngineEvent::MutationFailed {
                        id: failure.id,
                        error: failure.error,
                    });
                }
                _ = ticker.tick() => {
                    let action = self.monitor.on_tick(self.liveness());
                    self.perform(action).await;
                }
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    let action = self.monitor.on_retry_due(self.liveness());
                    self.perform(action).await;
                }
            }
            self.publish();
        }

        self.mux.close_all();
        self.publish();
    }

    fn on_change(&mut self, event: ChangeEvent) {
        let outcome = self.merger.apply(&event);
        if outcome == MergeOutcome::Applied
            && matches!(event.table, Table::Subscriptions | Table::Topics)
        {
            self.sync_tags();
        }
    }

    /// Carries out an action and every follow-up action it leads to.
    async fn perform(&mut self, mut action: HealthAction) {
        loop {
            action = match action {
                HealthAction::None => break,
                HealthAction::RetryAfter(delay) => {
                    tracing::debug!(?delay, "retry scheduled");
                    self.retry_at = Some(Instant::now() + delay);
                    break;
                }
                HealthAction::Reconnect => {
                    self.retry_at = None;
                    let joined = self.reconnect().await;
                    self.monitor.on_reconnect_finished(joined)
                }
                HealthAction::FullResync => {
                    self.retry_at = None;
                    let ok = self.full_resync().await;
                    self.monitor.on_resync_finished(ok)
                }
            };
            self.publish();
        }
    }

    async fn reconnect(&mut self) -> bool {
        self.mux.reopen_all();
        self.publish();
        let joined = self.wait_for_join().await;
        tracing::info!(joined, attempt = self.monitor.attempts(), "reconnect cycle finished");
        joined
    }

    /// Waits up to the join grace period for any channel to join. Gives up
    /// early once no channel is still joining.
    async fn wait_for_join(&mut self) -> bool {
        let deadline = Instant::now() + self.config.join_grace();
        loop {
            let states = self.mux.list_states();
            if states.values().any(|s| *s == ChannelState::Joined) {
                return true;
            }
            if !states.values().any(|s| *s == ChannelState::Joining) {
                return false;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(deadline) => return self.mux.joined_count() > 0,
                transition = self.transitions.recv() => {
                    if transition.is_none() {
                        return self.mux.joined_count() > 0;
                    }
                }
            }
        }
    }

    async fn full_resync(&mut self) -> bool {
        tracing::info!("full resync started");
        self.mux.close_all();
        self.publish();

        // Events still queued predate the snapshot, so they go in first.
        let mut queued = 0;
        while let Ok(event) = self.changes.try_recv() {
            self.on_change(event);
            queued += 1;
        }
        if queued > 0 {
            tracing::debug!(queued, "merged queued events before resync");
        }

        let fetched = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            fetched = fetch_snapshot(&self.remote, &self.actor_id, self.config.operation_timeout()) => fetched,
        };
        let ok = match fetched {
            Ok(collections) => {
                install_snapshot(&self.store, &self.pending, collections);
                tracing::info!(
                    notifications = self.store.read(|s| s.notifications.len()),
                    "full resync finished"
                );
                let _ = self.events.send(EngineEvent::ResyncCompleted);
                true
            }
            Err(e) => {
                tracing::warn!("full resync failed: {}", e);
                false
            }
        };
        self.open_standard_channels();
        if ok {
            self.sync_tags();
        }
        ok
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
