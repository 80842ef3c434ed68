//! Integration tests for session and attendance tracking.
//!
//! Runs the tracker against the in-memory store: session lifecycle,
//! idempotent joins, host rules, leave accounting and host actions.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;

use common::types::{RoomCode, UserId};
use room_service::errors::RcError;
use room_service::models::{ActivityKind, MediaFlags, ParticipantStatus};
use room_service::store::{CallStore, MemoryCallStore};
use room_service::tracker::SessionTracker;

// ============================================================================
// Helpers
// ============================================================================

async fn setup(creator: &str) -> (SessionTracker, RoomCode) {
    let store = Arc::new(MemoryCallStore::new());
    let code: RoomCode = "AB12CD34EF".parse().unwrap();
    assert!(store
        .create_room(&code, &UserId::from(creator))
        .await
        .unwrap());
    (SessionTracker::new(store as Arc<dyn CallStore>), code)
}

fn user(name: &str) -> UserId {
    UserId::from(name)
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_session_reuses_active_session() {
    let (tracker, code) = setup("alice").await;

    let first = tracker.start_session(&code).await.unwrap();
    let second = tracker.start_session(&code).await.unwrap();

    assert_eq!(first.id, second.id);
    assert!(first.is_active());
    assert_eq!(first.created_by, user("alice"));
}

#[tokio::test]
async fn test_start_session_unknown_room() {
    let (tracker, _) = setup("alice").await;
    let other: RoomCode = "ZZ99ZZ99ZZ".parse().unwrap();

    assert!(matches!(
        tracker.start_session(&other).await,
        Err(RcError::RoomNotFound(_))
    ));
}

#[tokio::test]
async fn test_end_session_closes_attendance_and_next_start_is_fresh() {
    let (tracker, code) = setup("alice").await;
    let session = tracker.start_session(&code).await.unwrap();
    tracker.track_join(session.id, &user("alice")).await.unwrap();
    tracker.track_join(session.id, &user("bob")).await.unwrap();

    let ended = tracker.end_session(&code).await.unwrap().unwrap();
    assert_eq!(ended.id, session.id);
    assert!(!ended.is_active());

    let attendance = tracker.attendance(session.id).await.unwrap();
    assert_eq!(attendance.len(), 2);
    for row in &attendance {
        let left_at = row.left_at.expect("attendance closed by end_session");
        assert!(left_at >= row.joined_at);
    }

    let bob = tracker.participant(&code, &user("bob")).await.unwrap().unwrap();
    assert_eq!(bob.status, ParticipantStatus::Left);

    // Nothing left to end.
    assert!(tracker.end_session(&code).await.unwrap().is_none());

    let next = tracker.start_session(&code).await.unwrap();
    assert_ne!(next.id, session.id);
}

#[tokio::test]
async fn test_ended_session_is_immutable() {
    let (tracker, code) = setup("alice").await;
    let session = tracker.start_session(&code).await.unwrap();
    tracker.end_session(&code).await.unwrap();

    assert!(matches!(
        tracker.track_join(session.id, &user("bob")).await,
        Err(RcError::SessionEnded)
    ));
    assert!(matches!(
        tracker.track_leave(session.id, &user("bob")).await,
        Err(RcError::SessionEnded)
    ));
    assert!(matches!(
        tracker
            .record_activity(session.id, ActivityKind::Message)
            .await,
        Err(RcError::SessionEnded)
    ));
}

// ============================================================================
// Attendance
// ============================================================================

#[tokio::test]
async fn test_track_join_twice_counts_once() {
    let (tracker, code) = setup("alice").await;
    let session = tracker.start_session(&code).await.unwrap();

    let first = tracker.track_join(session.id, &user("bob")).await.unwrap();
    let second = tracker.track_join(session.id, &user("bob")).await.unwrap();

    assert!(first.recorded);
    assert!(!second.recorded);
    assert_eq!(first.participant_count, 1);
    assert_eq!(second.participant_count, 1);
    assert_eq!(tracker.attendance(session.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_joins_of_same_user_open_one_row() {
    let (tracker, code) = setup("alice").await;
    let session = tracker.start_session(&code).await.unwrap();

    let joins = (0..8).map(|_| {
        let tracker = tracker.clone();
        tokio::spawn(async move { tracker.track_join(session.id, &UserId::from("bob")).await })
    });
    let results = futures::future::join_all(joins).await;

    let recorded = results
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(|join| join.recorded)
        .count();
    assert_eq!(recorded, 1);
    assert_eq!(tracker.attendance(session.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_first_participant_becomes_host() {
    let (tracker, code) = setup("alice").await;
    let session = tracker.start_session(&code).await.unwrap();

    let bob = tracker.track_join(session.id, &user("bob")).await.unwrap();
    let carol = tracker.track_join(session.id, &user("carol")).await.unwrap();

    assert!(bob.is_host);
    assert!(!carol.is_host);

    // The creator is a host without ever joining.
    assert!(tracker.is_host(&code, &user("alice")).await.unwrap());
    assert!(tracker.is_host(&code, &user("bob")).await.unwrap());
    assert!(!tracker.is_host(&code, &user("carol")).await.unwrap());
}

#[tokio::test]
async fn test_host_flag_survives_leave_and_rejoin() {
    let (tracker, code) = setup("alice").await;
    let session = tracker.start_session(&code).await.unwrap();

    tracker.track_join(session.id, &user("bob")).await.unwrap();
    tracker.track_join(session.id, &user("carol")).await.unwrap();
    tracker.track_leave(session.id, &user("bob")).await.unwrap();

    let rejoined = tracker.track_join(session.id, &user("bob")).await.unwrap();
    assert!(rejoined.recorded);
    assert!(rejoined.is_host);

    // Host is not reassigned while bob is away.
    assert!(!tracker.is_host(&code, &user("carol")).await.unwrap());
}

#[tokio::test]
async fn test_track_leave_updates_count_and_attendance() {
    let (tracker, code) = setup("alice").await;
    let session = tracker.start_session(&code).await.unwrap();
    tracker.track_join(session.id, &user("bob")).await.unwrap();
    tracker.track_join(session.id, &user("carol")).await.unwrap();

    let remaining = tracker.track_leave(session.id, &user("bob")).await.unwrap();
    assert_eq!(remaining, 1);

    // Leaving again is a no-op.
    assert_eq!(
        tracker.track_leave(session.id, &user("bob")).await.unwrap(),
        1
    );

    let attendance = tracker.attendance(session.id).await.unwrap();
    let bob_row = attendance
        .iter()
        .find(|row| row.user_id == user("bob"))
        .unwrap();
    assert!(!bob_row.is_open());

    let active = tracker.active_session(&code).await.unwrap().unwrap();
    assert_eq!(active.participant_count, 1);
}

#[tokio::test]
async fn test_rejoin_opens_new_interval() {
    let (tracker, code) = setup("alice").await;
    let session = tracker.start_session(&code).await.unwrap();

    tracker.track_join(session.id, &user("bob")).await.unwrap();
    tracker.track_leave(session.id, &user("bob")).await.unwrap();
    tracker.track_join(session.id, &user("bob")).await.unwrap();

    let attendance = tracker.attendance(session.id).await.unwrap();
    assert_eq!(attendance.len(), 2);
    assert!(!attendance[0].is_open());
    assert!(attendance[1].is_open());
}

// ============================================================================
// Activity and host actions
// ============================================================================

#[tokio::test]
async fn test_record_activity_bumps_counters() {
    let (tracker, code) = setup("alice").await;
    let session = tracker.start_session(&code).await.unwrap();

    tracker
        .record_activity(session.id, ActivityKind::Message)
        .await
        .unwrap();
    tracker
        .record_activity(session.id, ActivityKind::Message)
        .await
        .unwrap();
    tracker
        .record_activity(session.id, ActivityKind::HandRaise)
        .await
        .unwrap();

    let active = tracker.active_session(&code).await.unwrap().unwrap();
    assert_eq!(active.message_count, 2);
    assert_eq!(active.hand_raise_count, 1);
    assert_eq!(active.poll_count, 0);
}

#[tokio::test]
async fn test_host_mute_requires_host() {
    let (tracker, code) = setup("alice").await;
    let session = tracker.start_session(&code).await.unwrap();
    tracker.track_join(session.id, &user("bob")).await.unwrap();
    tracker.track_join(session.id, &user("carol")).await.unwrap();

    let denied = tracker
        .host_mute(&code, &user("carol"), &user("bob"), true)
        .await;
    assert!(matches!(denied, Err(RcError::PermissionDenied(_))));
    let bob = tracker.participant(&code, &user("bob")).await.unwrap().unwrap();
    assert!(!bob.muted_by_host);

    tracker
        .host_mute(&code, &user("alice"), &user("carol"), true)
        .await
        .unwrap();
    let carol = tracker
        .participant(&code, &user("carol"))
        .await
        .unwrap()
        .unwrap();
    assert!(carol.muted_by_host);

    // Target must be a participant.
    assert!(matches!(
        tracker
            .host_mute(&code, &user("alice"), &user("mallory"), true)
            .await,
        Err(RcError::PermissionDenied(_))
    ));
}

#[tokio::test]
async fn test_update_media_state() {
    let (tracker, code) = setup("alice").await;
    let session = tracker.start_session(&code).await.unwrap();
    tracker.track_join(session.id, &user("bob")).await.unwrap();

    let flags = MediaFlags {
        video: false,
        audio: true,
        screen_share: true,
    };
    tracker
        .update_media_state(&code, &user("bob"), flags)
        .await
        .unwrap();
    let bob = tracker.participant(&code, &user("bob")).await.unwrap().unwrap();
    assert_eq!(bob.media, flags);

    assert!(matches!(
        tracker
            .update_media_state(&code, &user("mallory"), flags)
            .await,
        Err(RcError::PermissionDenied(_))
    ));
}
