//! End-to-end behaviour of an autosave session against the in-memory store.
//!
//! All tests run on a paused clock, so quiet periods, backoff and latency
//! elapse deterministically and instants in the call journal can be compared
//! exactly.

use autosave_core::{
    AutosaveError, BackupRecord, BackupStore, Resolution, SaveStatus, SessionEvent, Version,
};
use autosave_test_utils::{
    memo_id, type_text, wait_for_event, wait_for_status, Harness, WAIT_LIMIT,
};
use chrono::Utc;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

const KEYSTROKE: Duration = Duration::from_millis(200);

/// Typing "Hello" and pausing produces exactly one save with an empty body.
#[tokio::test(start_paused = true)]
async fn hello_then_pause_saves_once() {
    let h = Harness::new();
    let session = h.open().await.unwrap().session;

    type_text(&session, "", "Hello", KEYSTROKE).await;
    assert_eq!(h.remote.update_count(), 0);
    wait_for_status(&session, SaveStatus::Saved).await;

    let calls = h.remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].update.title, "Hello");
    assert_eq!(calls[0].update.body, "");
    assert_eq!(calls[0].update.expected_version, Version(0));
    assert_eq!(h.server().version, Version(1));
    assert!(h.backup.is_empty(), "confirmed save clears the backup");
}

/// Continuous typing never dispatches; the pause afterwards dispatches once.
#[tokio::test(start_paused = true)]
async fn continuous_typing_defers_until_pause() {
    let h = Harness::new();
    let session = h.open().await.unwrap().session;

    for i in 0..25 {
        session.on_edit(format!("Draft\nline {i}")).await.unwrap();
        sleep(KEYSTROKE).await;
        assert_eq!(h.remote.update_count(), 0, "dispatched while typing");
    }
    assert_eq!(session.status(), SaveStatus::PendingEdit);

    wait_for_status(&session, SaveStatus::Saved).await;
    assert_eq!(h.remote.update_count(), 1);
    assert_eq!(h.server().body, "line 24");
}

/// An edit during a slow save is sent the moment that save completes.
#[tokio::test(start_paused = true)]
async fn edit_during_flight_becomes_immediate_trailing_save() {
    let h = Harness::new();
    h.remote.set_latency(Duration::from_millis(1500));
    let session = h.open().await.unwrap().session;

    let t0 = Instant::now();
    session.on_edit("first").await.unwrap();
    sleep(Duration::from_millis(2500)).await;
    assert_eq!(session.status(), SaveStatus::Saving);
    session.on_edit("first\nsecond").await.unwrap();

    wait_for_status(&session, SaveStatus::Saved).await;
    let calls = h.remote.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].started - t0, Duration::from_secs(2));
    assert_eq!(Some(calls[1].started), calls[0].finished);
    assert_eq!(calls[1].update.body, "second");
    assert_eq!(calls[1].update.expected_version, Version(1));
    assert_eq!(h.remote.max_concurrent_updates(), 1);
}

/// Saves never overlap, however edits and latency interleave.
#[tokio::test(start_paused = true)]
async fn saves_never_overlap() {
    let h = Harness::new();
    h.remote.set_latency(Duration::from_secs(3));
    let session = h.open().await.unwrap().session;

    let mut text = String::from("Log");
    for i in 0..30 {
        text.push_str(&format!("\nentry {i}"));
        session.on_edit(text.clone()).await.unwrap();
        sleep(Duration::from_millis(700)).await;
        if i % 5 == 4 {
            sleep(Duration::from_millis(2500)).await;
        }
    }
    assert_eq!(session.close().await.unwrap(), SaveStatus::Saved);

    let calls = h.remote.calls();
    assert!(calls.len() >= 2);
    for pair in calls.windows(2) {
        assert!(pair[1].started >= pair[0].finished.unwrap());
    }
    assert_eq!(h.remote.max_concurrent_updates(), 1);
    assert!(calls.iter().all(|c| c.applied));
    assert_eq!(h.server().text(), text);
}

/// A conflict stops saving; nothing is resubmitted on its own.
#[tokio::test(start_paused = true)]
async fn conflict_halts_automatic_saving() {
    let h = Harness::new();
    let session = h.open().await.unwrap().session;
    let mut events = session.subscribe();
    h.remote.external_write(&memo_id(), "theirs").unwrap();

    session.on_edit("mine").await.unwrap();
    wait_for_status(&session, SaveStatus::Conflict).await;

    let event = wait_for_event(&mut events, |e| matches!(e, SessionEvent::Conflict { .. })).await;
    let SessionEvent::Conflict { server: Some(server) } = event else {
        panic!("conflict should carry the server copy");
    };
    assert_eq!(server.title, "theirs");

    session.on_edit("mine, still typing").await.unwrap();
    session.flush_now().await.unwrap();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.remote.update_count(), 1);
    assert_eq!(session.status(), SaveStatus::Conflict);
    assert_eq!(h.server().title, "theirs");
}

/// Keeping the local text saves it on top of the server version.
#[tokio::test(start_paused = true)]
async fn resolve_keep_local_overwrites_server() {
    let h = Harness::new();
    let session = h.open().await.unwrap().session;
    h.remote.external_write(&memo_id(), "theirs").unwrap();

    session.on_edit("mine").await.unwrap();
    wait_for_status(&session, SaveStatus::Conflict).await;
    session.on_edit("mine\nmore").await.unwrap();

    let shown = session.resolve_conflict(Resolution::KeepLocal).await.unwrap();
    assert_eq!(shown, "mine\nmore");
    wait_for_status(&session, SaveStatus::Saved).await;

    let server = h.server();
    assert_eq!(server.text(), "mine\nmore");
    assert_eq!(server.version, Version(2));
    assert!(h.backup.is_empty());
}

/// Taking the server copy replaces the local text and drops the backup.
#[tokio::test(start_paused = true)]
async fn resolve_take_server_discards_local_text() {
    let h = Harness::new();
    let session = h.open().await.unwrap().session;
    h.remote.external_write(&memo_id(), "theirs").unwrap();

    session.on_edit("mine").await.unwrap();
    wait_for_status(&session, SaveStatus::Conflict).await;
    assert!(!h.backup.is_empty());

    let shown = session.resolve_conflict(Resolution::TakeServer).await.unwrap();
    assert_eq!(shown, "theirs");
    wait_for_status(&session, SaveStatus::Saved).await;
    assert!(h.backup.is_empty());
    assert_eq!(h.remote.update_count(), 1);

    // Saving resumes against the adopted version.
    session.on_edit("theirs\nand mine").await.unwrap();
    session.flush_now().await.unwrap();
    wait_for_status(&session, SaveStatus::Saved).await;
    assert_eq!(h.server().version, Version(2));
}

/// Offline edits wait and go out on reconnect without another edit.
#[tokio::test(start_paused = true)]
async fn offline_edit_dispatches_on_reconnect() {
    let h = Harness::new();
    h.connectivity.set_online(false);
    let session = h.open().await.unwrap().session;

    session.on_edit("written on a plane").await.unwrap();
    wait_for_status(&session, SaveStatus::OfflineQueued).await;
    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.remote.update_count(), 0);
    assert_eq!(session.status(), SaveStatus::OfflineQueued);

    h.connectivity.set_online(true);
    wait_for_status(&session, SaveStatus::Saved).await;
    assert_eq!(h.remote.update_count(), 1);
    assert_eq!(h.server().title, "written on a plane");
}

/// Exhausted retries leave the backup in place; a flush retries later.
#[tokio::test(start_paused = true)]
async fn backup_survives_failed_save() {
    let h = Harness::new();
    let session = h.open().await.unwrap().session;
    h.remote.fail_next(3);

    session.on_edit("precious").await.unwrap();
    wait_for_status(&session, SaveStatus::Error).await;
    assert_eq!(h.remote.update_count(), 3);

    let record = h.backup.read(&memo_id()).await.unwrap().unwrap();
    assert_eq!(record.text, "precious");

    session.flush_now().await.unwrap();
    wait_for_status(&session, SaveStatus::Saved).await;
    assert_eq!(h.server().title, "precious");
    assert!(h.backup.is_empty());
}

/// A backup newer than the server copy is offered once at open.
#[tokio::test(start_paused = true)]
async fn newer_backup_is_offered_at_open() {
    let h = Harness::with_document("Server\ncopy", 4);
    h.backup.insert(BackupRecord {
        document_id: memo_id(),
        text: "Server\ncopy plus crash".to_string(),
        timestamp: Utc::now(),
    });

    let opened = h.open().await.unwrap();
    let offer = opened.recovery.expect("backup should be offered");
    assert_eq!(offer.record.text, "Server\ncopy plus crash");
    assert_eq!(offer.server_version, Version(4));
    assert_eq!(opened.document.body, "copy");

    opened.session.on_edit(offer.record.text.clone()).await.unwrap();
    wait_for_status(&opened.session, SaveStatus::Saved).await;
    assert_eq!(h.server().text(), "Server\ncopy plus crash");
    assert!(h.backup.is_empty());
}

/// A backup that only differs from the server copy by a trailing newline
/// is not offered.
#[tokio::test(start_paused = true)]
async fn equivalent_backup_is_not_offered() {
    let h = Harness::with_document("Title", 2);
    h.backup.insert(BackupRecord::now(memo_id(), "Title\n"));

    let opened = h.open().await.unwrap();
    assert!(opened.recovery.is_none());
    assert!(h.backup.is_empty());
}

/// Declining the offer removes the backup.
#[tokio::test(start_paused = true)]
async fn declined_backup_is_discarded() {
    let h = Harness::with_document("Server", 1);
    h.backup.insert(BackupRecord::now(memo_id(), "Local"));

    let opened = h.open().await.unwrap();
    assert!(opened.recovery.is_some());
    opened.session.discard_backup().await.unwrap();
    assert!(h.backup.is_empty());

    // Reopening offers nothing.
    let reopened = h.open().await.unwrap();
    assert!(reopened.recovery.is_none());
}

/// Opening a second session warns the first.
#[tokio::test(start_paused = true)]
async fn sibling_open_is_announced() {
    let h = Harness::new();
    let first = h.open().await.unwrap().session;
    let mut events = first.subscribe();

    let second = h.open().await.unwrap().session;
    let event = wait_for_event(&mut events, |e| matches!(e, SessionEvent::SiblingEditing { .. })).await;
    assert_eq!(event, SessionEvent::SiblingEditing { from: second.id() });
}

/// A sibling's save makes the next save refetch instead of colliding.
#[tokio::test(start_paused = true)]
async fn sibling_save_forces_refetch_before_saving() {
    let h = Harness::new();
    let mut sessions = h.open_many(2).await.unwrap();
    let b = sessions.pop().unwrap().session;
    let a = sessions.pop().unwrap().session;
    let mut b_events = b.subscribe();

    a.on_edit("from tab a").await.unwrap();
    a.flush_now().await.unwrap();
    wait_for_status(&a, SaveStatus::Saved).await;
    wait_for_event(&mut b_events, |e| {
        matches!(e, SessionEvent::SiblingSaved { version, .. } if *version == Version(1))
    })
    .await;

    let fetches = h.remote.fetch_count();
    b.on_edit("from tab b").await.unwrap();
    wait_for_status(&b, SaveStatus::Conflict).await;
    assert_eq!(h.remote.fetch_count(), fetches + 1);
    assert_eq!(h.remote.update_count(), 1, "tab b must not send a doomed write");
    assert_eq!(h.server().title, "from tab a");
}

/// When a sibling's saves leave the server where this session left it, the
/// refetch rebases the ledger and the save proceeds.
#[tokio::test(start_paused = true)]
async fn sibling_round_trip_rebases_and_saves() {
    let h = Harness::with_document("base", 0);
    let a = h.open().await.unwrap().session;
    let b = h.open().await.unwrap().session;

    for text in ["base!", "base"] {
        a.on_edit(text).await.unwrap();
        a.flush_now().await.unwrap();
        wait_for_status(&a, SaveStatus::Saved).await;
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.server().version, Version(2));

    b.on_edit("base?").await.unwrap();
    wait_for_status(&b, SaveStatus::Saved).await;

    let server = h.server();
    assert_eq!(server.text(), "base?");
    assert_eq!(server.version, Version(3));
    let last = h.remote.calls().pop().unwrap();
    assert_eq!(last.update.expected_version, Version(2));
}

/// A refetch that keeps failing is retried a bounded number of times, then
/// the session settles on `error` instead of refetching again.
#[tokio::test(start_paused = true)]
async fn failing_refetch_settles_on_error() {
    let h = Harness::new();
    let mut sessions = h.open_many(2).await.unwrap();
    let b = sessions.pop().unwrap().session;
    let a = sessions.pop().unwrap().session;
    let mut b_events = b.subscribe();

    a.on_edit("from tab a").await.unwrap();
    a.flush_now().await.unwrap();
    wait_for_status(&a, SaveStatus::Saved).await;
    wait_for_event(&mut b_events, |e| matches!(e, SessionEvent::SiblingSaved { .. })).await;

    h.remote.set_latency(Duration::from_millis(100));
    h.remote.fail_next(100_000);
    let fetches = h.remote.fetch_count();
    b.on_edit("from tab b").await.unwrap();
    wait_for_status(&b, SaveStatus::Error).await;
    wait_for_event(&mut b_events, |e| matches!(e, SessionEvent::Failed { .. })).await;
    assert_eq!(h.remote.fetch_count(), fetches + 3);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.remote.fetch_count(), fetches + 3);
    assert_eq!(b.status(), SaveStatus::Error);
    assert_eq!(h.remote.update_count(), 1);

    // Closing makes one more bounded attempt and keeps the text locally.
    let status = timeout(WAIT_LIMIT, b.close()).await.unwrap().unwrap();
    assert_eq!(status, SaveStatus::Error);
    assert_eq!(h.remote.fetch_count(), fetches + 6);
    let record = h.backup.read(&memo_id()).await.unwrap().unwrap();
    assert_eq!(record.text, "from tab b");
}

/// A resolution whose refetch fails reports the error and stays in conflict.
#[tokio::test(start_paused = true)]
async fn failed_resolution_refetch_stays_in_conflict() {
    let h = Harness::new();
    let session = h.open().await.unwrap().session;
    h.remote.external_write(&memo_id(), "theirs").unwrap();
    session.on_edit("mine").await.unwrap();
    wait_for_status(&session, SaveStatus::Conflict).await;

    h.remote.fail_next(3);
    let fetches = h.remote.fetch_count();
    let err = session.resolve_conflict(Resolution::KeepLocal).await.unwrap_err();
    assert!(matches!(err, AutosaveError::Remote(_)));
    assert_eq!(h.remote.fetch_count(), fetches + 3);
    wait_for_status(&session, SaveStatus::Conflict).await;

    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.remote.fetch_count(), fetches + 3);
    assert_eq!(h.remote.update_count(), 1);

    let shown = session.resolve_conflict(Resolution::KeepLocal).await.unwrap();
    assert_eq!(shown, "mine");
    wait_for_status(&session, SaveStatus::Saved).await;
    assert_eq!(h.server().title, "mine");
}

/// Closing flushes the pending edit and waits for it.
#[tokio::test(start_paused = true)]
async fn close_flushes_and_waits() {
    let h = Harness::new();
    h.remote.set_latency(Duration::from_millis(800));
    let session = h.open().await.unwrap().session;

    session.on_edit("Goodbye").await.unwrap();
    assert_eq!(session.close().await.unwrap(), SaveStatus::Saved);
    assert_eq!(h.server().title, "Goodbye");
    assert!(h.backup.is_empty());
}

/// Closing while offline keeps the unsent text in the backup.
#[tokio::test(start_paused = true)]
async fn close_while_offline_keeps_backup() {
    let h = Harness::new();
    h.connectivity.set_online(false);
    let session = h.open().await.unwrap().session;

    session.on_edit("unsent").await.unwrap();
    assert_eq!(session.close().await.unwrap(), SaveStatus::OfflineQueued);
    assert_eq!(h.remote.update_count(), 0);
    let record = h.backup.read(&memo_id()).await.unwrap().unwrap();
    assert_eq!(record.text, "unsent");
}
