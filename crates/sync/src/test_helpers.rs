// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for engine module tests.

#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use vigil_core::{Binding, ChangeEvent, Filter, Operation, Table};

use crate::push::{PushCapability, PushError, PushFuture, PushedAlert};
use crate::remote::{
    ChannelHandle, ChannelState, EventSink, RemoteFuture, RemoteStore, TransportError,
};

/// Fixed timestamp `secs` after 2026-01-01T00:00:00Z.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

pub fn notification_row(id: &str, status: &str) -> Value {
    json!({
        "id": id,
        "title": format!("Alert {}", id),
        "message": "disk usage above 90%",
        "severity": "high",
        "status": status,
        "type": "server_alert",
        "created_at": ts(0),
    })
}

pub fn topic_notification_row(id: &str, topic_id: &str) -> Value {
    let mut row = notification_row(id, "new");
    row["topic_id"] = json!(topic_id);
    row
}

pub fn comment_row(id: &str, notification_id: &str, at: i64) -> Value {
    json!({
        "id": id,
        "notification_id": notification_id,
        "user_id": "u-other",
        "text": format!("comment {}", id),
        "created_at": ts(at),
    })
}

pub fn topic_row(id: &str) -> Value {
    json!({ "id": id, "name": format!("Topic {}", id) })
}

pub fn subscription_row(id: &str, user_id: &str, topic_id: &str) -> Value {
    json!({ "id": id, "user_id": user_id, "topic_id": topic_id })
}

pub fn site_row(id: &str, status: &str) -> Value {
    json!({ "id": id, "status": status })
}

/// How channels opened on a [`MemoryRemote`] behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinBehavior {
    /// Joined immediately.
    Join,
    /// Rejected during join.
    Error,
    /// Stays joining forever.
    Hang,
}

struct OpenChannel {
    topic: String,
    bindings: Vec<Binding>,
    sink: EventSink,
    state: watch::Sender<ChannelState>,
    cancel: CancellationToken,
}

struct MemoryState {
    rows: HashMap<Table, Vec<Value>>,
    mutations: Vec<(Table, Operation, Value)>,
    queries: HashMap<Table, usize>,
    fail_queries: bool,
    fail_mutations: bool,
    hang_mutations: bool,
    mutation_delay: Option<Duration>,
    join: JoinBehavior,
    channels: Vec<OpenChannel>,
    subscribes: usize,
}

/// In-memory remote store that records every call.
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        MemoryRemote {
            state: Mutex::new(MemoryState {
                rows: HashMap::new(),
                mutations: Vec::new(),
                queries: HashMap::new(),
                fail_queries: false,
                fail_mutations: false,
                hang_mutations: false,
                mutation_delay: None,
                join: JoinBehavior::Join,
                channels: Vec::new(),
                subscribes: 0,
            }),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn with_rows(self, table: Table, rows: Vec<Value>) -> Self {
        self.set_rows(table, rows);
        self
    }

    pub fn set_rows(&self, table: Table, rows: Vec<Value>) {
        self.state.lock().unwrap().rows.insert(table, rows);
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .rows
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_fail_queries(&self, fail: bool) {
        self.state.lock().unwrap().fail_queries = fail;
    }

    pub fn set_fail_mutations(&self, fail: bool) {
        self.state.lock().unwrap().fail_mutations = fail;
    }

    pub fn set_hang_mutations(&self, hang: bool) {
        self.state.lock().unwrap().hang_mutations = hang;
    }

    /// Holds every mutation reply back by `delay`. The row is written
    /// before the delay.
    pub fn set_mutation_delay(&self, delay: Duration) {
        self.state.lock().unwrap().mutation_delay = Some(delay);
    }

    pub fn set_join_behavior(&self, join: JoinBehavior) {
        self.state.lock().unwrap().join = join;
    }

    /// Every mutation received, in order.
    pub fn mutations(&self) -> Vec<(Table, Operation, Value)> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn mutations_on(&self, table: Table) -> Vec<Value> {
        self.mutations()
            .into_iter()
            .filter(|(t, _, _)| *t == table)
            .map(|(_, _, payload)| payload)
            .collect()
    }

    pub fn query_count(&self, table: Table) -> usize {
        self.state
            .lock()
            .unwrap()
            .queries
            .get(&table)
            .copied()
            .unwrap_or(0)
    }

    /// Total number of `subscribe` calls.
    pub fn subscribe_count(&self) -> usize {
        self.state.lock().unwrap().subscribes
    }

    /// Topics of channels that have not been closed.
    pub fn open_channels(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .channels
            .iter()
            .filter(|c| !c.cancel.is_cancelled())
            .map(|c| c.topic.clone())
            .collect()
    }

    /// Forces every open channel into `state`.
    pub fn set_channels_state(&self, state: ChannelState) {
        for channel in &self.state.lock().unwrap().channels {
            if !channel.cancel.is_cancelled() {
                channel.state.send_replace(state);
            }
        }
    }

    /// Delivers an event to every joined channel whose bindings accept it.
    /// Returns how many channels received it.
    pub fn push(&self, event: ChangeEvent) -> usize {
        let state = self.state.lock().unwrap();
        let mut delivered = 0;
        for channel in &state.channels {
            if channel.cancel.is_cancelled() || *channel.state.borrow() != ChannelState::Joined {
                continue;
            }
            if channel.bindings.iter().any(|b| b.accepts(&event))
                && channel.sink.send(event.clone()).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }
}

fn matches_all(row: &Value, filter: &[Filter]) -> bool {
    filter.iter().all(|f| f.matches(row))
}

impl RemoteStore for MemoryRemote {
    fn query(&self, table: Table, filter: Vec<Filter>) -> RemoteFuture<'_, Vec<Value>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            *state.queries.entry(table).or_insert(0) += 1;
            if state.fail_queries {
                Err(TransportError::ConnectionFailed("injected".to_string()))
            } else {
                Ok(state
                    .rows
                    .get(&table)
                    .map(|rows| {
                        rows.iter()
                            .filter(|row| matches_all(row, &filter))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default())
            }
        };
        Box::pin(async move { result })
    }

    fn mutate(&self, table: Table, op: Operation, payload: Value) -> RemoteFuture<'_, Option<Value>> {
        let (hang, delay, result) = {
            let mut state = self.state.lock().unwrap();
            let delay = state.mutation_delay;
            state.mutations.push((table, op, payload.clone()));
            if state.fail_mutations {
                (false, delay, Err(TransportError::Rejected("injected".to_string())))
            } else {
                let id = payload.get("id").cloned();
                let rows = state.rows.entry(table).or_default();
                match op {
                    Operation::Insert => rows.push(payload.clone()),
                    Operation::Update => {
                        if let (Some(row), Some(fields)) = (
                            rows.iter_mut().find(|r| r.get("id") == id.as_ref()),
                            payload.as_object(),
                        ) {
                            for (key, value) in fields {
                                row[key] = value.clone();
                            }
                        }
                    }
                    Operation::Delete => rows.retain(|r| r.get("id") != id.as_ref()),
                }
                (state.hang_mutations, delay, Ok(Some(payload)))
            }
        };
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if hang {
                std::future::pending::<()>().await;
            }
            result
        })
    }

    fn subscribe(&self, topic: &str, bindings: Vec<Binding>, sink: EventSink) -> ChannelHandle {
        let mut state = self.state.lock().unwrap();
        state.subscribes += 1;
        state.channels.retain(|c| !c.cancel.is_cancelled());

        let initial = match state.join {
            JoinBehavior::Join => ChannelState::Joined,
            JoinBehavior::Error => ChannelState::Errored,
            JoinBehavior::Hang => ChannelState::Joining,
        };
        let (tx, rx) = watch::channel(initial);
        let cancel = CancellationToken::new();
        state.channels.push(OpenChannel {
            topic: topic.to_string(),
            bindings,
            sink,
            state: tx,
            cancel: cancel.clone(),
        });
        ChannelHandle::new(rx, cancel)
    }
}

struct MockPushState {
    calls: Vec<String>,
    tags: BTreeMap<String, String>,
    subscribed: bool,
    delivery_id: Option<String>,
    fail_initialize: bool,
    fail_calls: bool,
    foreground: Option<mpsc::UnboundedSender<PushedAlert>>,
    subscription_change: Option<mpsc::UnboundedSender<bool>>,
}

/// Push capability that records calls.
pub struct MockPush {
    state: Mutex<MockPushState>,
}

impl Default for MockPush {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPush {
    pub fn new() -> Self {
        MockPush {
            state: Mutex::new(MockPushState {
                calls: Vec::new(),
                tags: BTreeMap::new(),
                subscribed: false,
                delivery_id: Some("player-1".to_string()),
                fail_initialize: false,
                fail_calls: false,
                foreground: None,
                subscription_change: None,
            }),
        }
    }

    pub fn set_fail_initialize(&self, fail: bool) {
        self.state.lock().unwrap().fail_initialize = fail;
    }

    pub fn set_fail_calls(&self, fail: bool) {
        self.state.lock().unwrap().fail_calls = fail;
    }

    pub fn set_delivery_id(&self, id: Option<&str>) {
        self.state.lock().unwrap().delivery_id = id.map(str::to_string);
    }

    /// Names of every capability call, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn tags(&self) -> BTreeMap<String, String> {
        self.state.lock().unwrap().tags.clone()
    }

    pub fn subscribed(&self) -> bool {
        self.state.lock().unwrap().subscribed
    }

    /// Simulates a foreground delivery. Returns false if nothing listens.
    pub fn deliver(&self, alert: PushedAlert) -> bool {
        match &self.state.lock().unwrap().foreground {
            Some(sink) => sink.send(alert).is_ok(),
            None => false,
        }
    }

    /// Simulates an opt-in change made outside the app.
    pub fn change_subscription(&self, subscribed: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        state.subscribed = subscribed;
        match &state.subscription_change {
            Some(sink) => sink.send(subscribed).is_ok(),
            None => false,
        }
    }

    fn record<T: Send + 'static>(
        &self,
        call: &str,
        f: impl FnOnce(&mut MockPushState) -> T,
    ) -> PushFuture<'_, T> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call.to_string());
            let refused = if call == "initialize" {
                state.fail_initialize
            } else {
                state.fail_calls
            };
            if refused {
                Err(PushError::Failed(format!("{} refused", call)))
            } else {
                Ok(f(&mut state))
            }
        };
        Box::pin(async move { result })
    }
}

impl PushCapability for MockPush {
    fn initialize(&self) -> PushFuture<'_, ()> {
        self.record("initialize", |_| ())
    }

    fn login(&self, actor_id: &str) -> PushFuture<'_, ()> {
        self.record(&format!("login:{}", actor_id), |_| ())
    }

    fn logout(&self) -> PushFuture<'_, ()> {
        self.record("logout", |_| ())
    }

    fn subscribe(&self) -> PushFuture<'_, Option<String>> {
        self.record("subscribe", |state| {
            state.subscribed = true;
            state.delivery_id.clone()
        })
    }

    fn unsubscribe(&self) -> PushFuture<'_, ()> {
        self.record("unsubscribe", |state| state.subscribed = false)
    }

    fn is_subscribed(&self) -> PushFuture<'_, bool> {
        self.record("is_subscribed", |state| state.subscribed)
    }

    fn set_tags(&self, tags: BTreeMap<String, String>) -> PushFuture<'_, ()> {
        self.record("set_tags", |state| state.tags.extend(tags))
    }

    fn remove_tags(&self, keys: Vec<String>) -> PushFuture<'_, ()> {
        self.record("remove_tags", |state| {
            for key in &keys {
                state.tags.remove(key);
            }
        })
    }

    fn on_foreground_delivery(&self, sink: mpsc::UnboundedSender<PushedAlert>) {
        self.state.lock().unwrap().foreground = Some(sink);
    }

    fn on_subscription_change(&self, sink: mpsc::UnboundedSender<bool>) {
        self.state.lock().unwrap().subscription_change = Some(sink);
    }
}
