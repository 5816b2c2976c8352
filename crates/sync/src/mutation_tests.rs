// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::test_helpers::{notification_row, MemoryRemote};
use vigil_core::{Severity, Status};

const DEBOUNCE: Duration = Duration::from_millis(500);

struct Fixture {
    store: EntityStore,
    remote: Arc<MemoryRemote>,
    coordinator: MutationCoordinator,
    failures: mpsc::UnboundedReceiver<MutationFailure>,
}

/// Store and remote both hold notification `n-1` in the `new` state.
fn fixture() -> Fixture {
    let remote = Arc::new(
        MemoryRemote::new().with_rows(Table::Notifications, vec![notification_row("n-1", "new")]),
    );
    let store = EntityStore::new();
    store.update(|state| {
        state
            .notifications
            .push(Notification::from_row(&notification_row("n-1", "new")).unwrap());
    });
    let (tx, failures) = mpsc::unbounded_channel();
    let coordinator = MutationCoordinator::new(
        store.clone(),
        remote.clone(),
        "u-me",
        DEBOUNCE,
        Duration::from_secs(10),
        tx,
    );
    Fixture {
        store,
        remote,
        coordinator,
        failures,
    }
}

async fn past_debounce() {
    tokio::time::sleep(DEBOUNCE + Duration::from_millis(100)).await;
}

fn status_of(store: &EntityStore, id: &str) -> Status {
    store.notification(id).unwrap().status
}

#[tokio::test(start_paused = true)]
async fn edit_applies_locally_before_commit() {
    let f = fixture();
    f.coordinator
        .mutate("n-1", NotificationPatch::status(Status::Acknowledged));

    assert_eq!(status_of(&f.store, "n-1"), Status::Acknowledged);
    assert!(f.store.notification("n-1").unwrap().updated_at.is_some());
    assert!(f.coordinator.is_pending("n-1"));
    assert!(f.coordinator.view().contains("n-1"));
    assert!(f.remote.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn commit_after_debounce_clears_pending() {
    let f = fixture();
    f.coordinator
        .mutate("n-1", NotificationPatch::status(Status::Resolved));
    past_debounce().await;

    let updates = f.remote.mutations_on(Table::Notifications);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["id"], "n-1");
    assert_eq!(updates[0]["status"], "resolved");
    assert!(updates[0].get("updated_at").is_some());
    assert_eq!(f.remote.query_count(Table::Notifications), 1);
    assert_eq!(f.coordinator.pending_count(), 0);
    assert_eq!(status_of(&f.store, "n-1"), Status::Resolved);
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_coalesce_into_one_commit() {
    let f = fixture();
    f.coordinator
        .mutate("n-1", NotificationPatch::status(Status::Acknowledged));
    tokio::time::sleep(Duration::from_millis(200)).await;
    f.coordinator.mutate(
        "n-1",
        NotificationPatch {
            severity: Some(Severity::Low),
            ..Default::default()
        },
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    f.coordinator
        .mutate("n-1", NotificationPatch::status(Status::Resolved));

    // 400ms after the last edit nothing has been sent yet.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(f.remote.mutations().is_empty());

    past_debounce().await;
    let updates = f.remote.mutations_on(Table::Notifications);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["status"], "resolved");
    assert_eq!(updates[0]["severity"], "low");
    assert_eq!(f.coordinator.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn coalesced_edits_keep_first_snapshot() {
    let f = fixture();
    f.coordinator
        .mutate("n-1", NotificationPatch::status(Status::Acknowledged));
    f.coordinator
        .mutate("n-1", NotificationPatch::status(Status::Resolved));

    let snapshot = f
        .coordinator
        .view()
        .with_pending(|pending| pending.get("n-1").unwrap().snapshot.clone());
    assert_eq!(snapshot.status, Status::New);
}

#[tokio::test(start_paused = true)]
async fn failed_commit_rolls_back_and_reports() {
    let mut f = fixture();
    f.remote.set_fail_mutations(true);
    f.coordinator
        .mutate("n-1", NotificationPatch::status(Status::Resolved));
    assert_eq!(status_of(&f.store, "n-1"), Status::Resolved);

    past_debounce().await;
    assert_eq!(status_of(&f.store, "n-1"), Status::New);
    assert!(!f.coordinator.is_pending("n-1"));

    let failure = f.failures.recv().await.unwrap();
    assert_eq!(failure.id, "n-1");
    assert!(matches!(failure.error, SyncError::Remote(_)));
}

#[tokio::test(start_paused = true)]
async fn rollback_keeps_comments_added_meanwhile() {
    let mut f = fixture();
    f.remote.set_fail_mutations(true);
    f.coordinator
        .mutate("n-1", NotificationPatch::status(Status::Resolved));
    f.store.update(|state| {
        let n = state.notification_mut("n-1").unwrap();
        n.insert_comment(Comment {
            id: "c-1".to_string(),
            notification_id: "n-1".to_string(),
            user_id: "u-other".to_string(),
            text: "looking".to_string(),
            created_at: Utc::now(),
        });
    });

    past_debounce().await;
    f.failures.recv().await.unwrap();
    let n = f.store.notification("n-1").unwrap();
    assert_eq!(n.status, Status::New);
    assert_eq!(n.comments.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn rollback_keeps_edit_committed_while_newer_edit_pending() {
    let mut f = fixture();
    let severity = f.store.notification("n-1").unwrap().severity;
    f.remote.set_mutation_delay(Duration::from_millis(200));
    f.coordinator
        .mutate("n-1", NotificationPatch::status(Status::Acknowledged));

    // The first commit is in flight from 500ms to 700ms.
    tokio::time::sleep(Duration::from_millis(550)).await;
    assert_eq!(f.remote.mutations_on(Table::Notifications).len(), 1);
    f.remote.set_fail_mutations(true);
    f.coordinator.mutate(
        "n-1",
        NotificationPatch {
            severity: Some(Severity::Low),
            ..Default::default()
        },
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    let snapshot = f
        .coordinator
        .view()
        .with_pending(|pending| pending.get("n-1").unwrap().snapshot.clone());
    assert_eq!(snapshot.status, Status::Acknowledged);

    let failure = f.failures.recv().await.unwrap();
    assert_eq!(failure.id, "n-1");
    assert!(!f.coordinator.is_pending("n-1"));
    assert_eq!(f.remote.rows(Table::Notifications)[0]["status"], "acknowledged");
    let n = f.store.notification("n-1").unwrap();
    assert_eq!(n.status, Status::Acknowledged);
    assert_eq!(n.severity, severity);
}

#[tokio::test(start_paused = true)]
async fn record_deleted_remotely_fails_verification() {
    let mut f = fixture();
    f.remote.set_rows(Table::Notifications, Vec::new());
    f.coordinator
        .mutate("n-1", NotificationPatch::status(Status::Acknowledged));

    past_debounce().await;
    let failure = f.failures.recv().await.unwrap();
    assert!(matches!(failure.error, SyncError::Validation(_)));
    assert!(f.remote.mutations().is_empty());
    assert_eq!(status_of(&f.store, "n-1"), Status::New);
}

#[tokio::test(start_paused = true)]
async fn hung_commit_times_out_and_rolls_back() {
    let mut f = fixture();
    f.remote.set_hang_mutations(true);
    f.coordinator
        .mutate("n-1", NotificationPatch::status(Status::Resolved));

    tokio::time::sleep(DEBOUNCE + Duration::from_secs(11)).await;
    let failure = f.failures.recv().await.unwrap();
    assert!(matches!(
        failure.error,
        SyncError::Timeout {
            operation: "commit",
            ..
        }
    ));
    assert_eq!(status_of(&f.store, "n-1"), Status::New);
}

#[tokio::test(start_paused = true)]
async fn unknown_record_is_rejected() {
    let mut f = fixture();
    f.coordinator
        .mutate("n-404", NotificationPatch::status(Status::Resolved));

    let failure = f.failures.recv().await.unwrap();
    assert_eq!(failure.id, "n-404");
    assert!(matches!(failure.error, SyncError::Validation(_)));
    assert_eq!(f.coordinator.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_patch_is_noop() {
    let f = fixture();
    let version = f.store.version();
    f.coordinator.mutate("n-1", NotificationPatch::default());

    assert_eq!(f.store.version(), version);
    assert!(!f.coordinator.is_pending("n-1"));
}

#[tokio::test(start_paused = true)]
async fn flush_commits_without_waiting() {
    let f = fixture();
    f.coordinator
        .mutate("n-1", NotificationPatch::status(Status::Acknowledged));
    f.coordinator.flush("n-1").unwrap().await.unwrap();

    assert_eq!(f.remote.mutations_on(Table::Notifications).len(), 1);
    assert!(f.coordinator.flush("n-1").is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_drops_scheduled_commits() {
    let mut f = fixture();
    f.coordinator
        .mutate("n-1", NotificationPatch::status(Status::Resolved));
    f.coordinator.shutdown();
    past_debounce().await;

    assert!(f.remote.mutations().is_empty());

    f.coordinator
        .mutate("n-1", NotificationPatch::status(Status::New));
    let failure = f.failures.recv().await.unwrap();
    assert!(matches!(failure.error, SyncError::NotRunning));
}

#[tokio::test(start_paused = true)]
async fn comment_is_visible_then_committed() {
    let f = fixture();
    let comment = f.coordinator.add_comment("n-1", "on it").unwrap();

    assert_eq!(comment.user_id, "u-me");
    assert!(uuid::Uuid::parse_str(&comment.id).is_ok());
    let thread = f.store.notification("n-1").unwrap().comments;
    assert_eq!(thread, vec![comment.clone()]);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let inserts = f.remote.mutations_on(Table::Comments);
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0]["id"], comment.id.as_str());
    assert_eq!(inserts[0]["text"], "on it");
    assert_eq!(f.store.notification("n-1").unwrap().comments.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_comment_is_removed() {
    let mut f = fixture();
    f.remote.set_fail_mutations(true);
    f.coordinator.add_comment("n-1", "on it").unwrap();

    let failure = f.failures.recv().await.unwrap();
    assert_eq!(failure.id, "n-1");
    assert!(f.store.notification("n-1").unwrap().comments.is_empty());
}

#[tokio::test(start_paused = true)]
async fn comment_validation() {
    let f = fixture();
    assert!(matches!(
        f.coordinator.add_comment("n-1", "   "),
        Err(SyncError::Validation(_))
    ));
    assert!(matches!(
        f.coordinator.add_comment("", "hello"),
        Err(SyncError::Validation(_))
    ));
    assert!(matches!(
        f.coordinator.add_comment("n-404", "hello"),
        Err(SyncError::Validation(_))
    ));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(f.remote.mutations().is_empty());
}
