// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn bump(count: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
    let count = Arc::clone(count);
    async move {
        count.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn runs_after_delay() {
    let scheduler = KeyedScheduler::new();
    let count = counter();

    scheduler.schedule("a", Duration::from_millis(500), bump(&count));
    assert!(scheduler.is_scheduled(&"a"));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!scheduler.is_scheduled(&"a"));
    assert!(scheduler.is_empty());
}

#[tokio::test(start_paused = true)]
async fn rescheduling_replaces_earlier_task() {
    let scheduler = KeyedScheduler::new();
    let first = counter();
    let second = counter();

    assert!(!scheduler.schedule("a", Duration::from_millis(500), bump(&first)));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(scheduler.schedule("a", Duration::from_millis(500), bump(&second)));

    // The first deadline passes without firing.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn keys_are_independent() {
    let scheduler = KeyedScheduler::new();
    let count = counter();

    scheduler.schedule("a", Duration::from_millis(100), bump(&count));
    scheduler.schedule("b", Duration::from_millis(100), bump(&count));
    assert_eq!(scheduler.len(), 2);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_prevents_run() {
    let scheduler = KeyedScheduler::new();
    let count = counter();

    scheduler.schedule("a", Duration::from_millis(100), bump(&count));
    assert!(scheduler.cancel(&"a"));
    assert!(!scheduler.cancel(&"a"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn flush_runs_immediately_once() {
    let scheduler = KeyedScheduler::new();
    let count = counter();

    scheduler.schedule("a", Duration::from_secs(60), bump(&count));
    let handle = scheduler.flush(&"a").unwrap();
    handle.await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(scheduler.flush(&"a").is_none());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_all_clears_everything() {
    let scheduler = KeyedScheduler::new();
    let count = counter();

    for key in ["a", "b", "c"] {
        scheduler.schedule(key, Duration::from_millis(100), bump(&count));
    }
    assert_eq!(scheduler.cancel_all(), 3);
    assert!(scheduler.is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}
