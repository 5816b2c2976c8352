// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::error::Error;
use crate::model::Severity;
use chrono::Utc;

fn alert(id: &str) -> Notification {
    Notification::new(id, "title", "message", Severity::Medium, Utc::now())
}

#[test]
fn update_bumps_version() {
    let store = EntityStore::new();
    assert_eq!(store.version(), 0);
    store.update(|s| s.notifications.push(alert("n-1")));
    assert_eq!(store.version(), 1);
    assert_eq!(store.notifications().len(), 1);
}

#[test]
fn try_update_discards_draft_on_error() {
    let store = EntityStore::new();
    store.update(|s| s.notifications.push(alert("n-1")));

    let result: Result<()> = store.try_update(|s| {
        s.notifications.clear();
        Err(Error::InvalidInput("boom".into()))
    });

    assert!(result.is_err());
    assert_eq!(store.notifications().len(), 1);
    assert_eq!(store.version(), 1);
}

#[test]
fn writes_see_prior_state() {
    let store = EntityStore::new();
    let a = store.clone();
    let b = store.clone();
    a.update(|s| s.notifications.push(alert("n-1")));
    b.update(|s| s.notifications.push(alert("n-2")));
    assert_eq!(store.notifications().len(), 2);
}

#[test]
fn refresh_topic_subscriptions() {
    let mut c = Collections::default();
    c.topics.push(Topic::new("t-1", "Servers"));
    c.topics.push(Topic::new("t-2", "Network"));
    c.subscriptions.push(Subscription::new("s-1", "u-1", "t-2"));
    c.refresh_topic_subscriptions();

    assert!(!c.topic("t-1").unwrap().subscribed);
    let t2 = c.topic("t-2").unwrap();
    assert!(t2.subscribed);
    assert_eq!(t2.subscription_id.as_deref(), Some("s-1"));

    c.subscriptions.clear();
    c.refresh_topic_subscriptions();
    assert!(!c.topic("t-2").unwrap().subscribed);
    assert!(c.topic("t-2").unwrap().subscription_id.is_none());
}

#[test]
fn topic_for_keyless_subscription() {
    let mut c = Collections::default();
    c.topics.push(Topic::new("t-1", "Servers"));
    c.subscriptions.push(Subscription::new("s-1", "u-1", "t-1"));
    c.refresh_topic_subscriptions();

    let keyless = Subscription {
        id: "s-1".into(),
        user_id: "u-1".into(),
        topic_id: None,
    };
    assert_eq!(c.topic_for_subscription(&keyless).as_deref(), Some("t-1"));

    let unknown = Subscription {
        id: "s-9".into(),
        user_id: "u-1".into(),
        topic_id: None,
    };
    assert!(c.topic_for_subscription(&unknown).is_none());
}

#[tokio::test]
async fn watch_wakes_on_write() {
    let store = EntityStore::new();
    let mut rx = store.watch();
    store.update(|s| s.topics_loaded = true);
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), 1);
}

#[test]
fn replace_and_clear() {
    let store = EntityStore::new();
    let mut c = Collections::default();
    c.notifications.push(alert("n-1"));
    c.topics_loaded = true;
    store.replace(c);
    assert!(store.topics_loaded());
    store.update(Collections::clear);
    assert!(store.notifications().is_empty());
    assert!(!store.topics_loaded());
}
