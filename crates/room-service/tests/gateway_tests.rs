//! End-to-end tests for the signaling gateway and the rooms API.
//!
//! Each test spawns a real server on a random port and talks to it over
//! WebSocket and HTTP.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::future::Future;
use std::time::Duration;

use common::protocol::{ClientMessage, ServerMessage, SignalPayload};
use common::types::{ConnectionId, RoomCode, UserId};
use room_service::models::ParticipantStatus;
use room_test_utils::{TestRoomServer, TestSignalingClient, TEST_ROOM_CODE};

// ============================================================================
// Helpers
// ============================================================================

async fn server_with_room() -> (TestRoomServer, RoomCode) {
    let server = TestRoomServer::spawn().await.unwrap();
    let room = server
        .create_room_with_code(TEST_ROOM_CODE, "alice")
        .await
        .unwrap();
    (server, room)
}

async fn client(server: &TestRoomServer) -> TestSignalingClient {
    TestSignalingClient::connect(&server.ws_url()).await.unwrap()
}

fn expect_joined(message: ServerMessage) -> (Vec<ConnectionId>, bool) {
    match message {
        ServerMessage::Joined {
            members, is_host, ..
        } => (members, is_host),
        other => panic!("expected joined, got {other:?}"),
    }
}

fn expect_error_code(message: ServerMessage) -> String {
    match message {
        ServerMessage::Error { code, .. } => code,
        other => panic!("expected error, got {other:?}"),
    }
}

const QUIET: Duration = Duration::from_millis(200);

/// Poll `check` until it holds, failing after 5 seconds.
async fn eventually<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Live participant count, open attendance rows of `user` and their status.
async fn attendance_of(
    server: &TestRoomServer,
    room: &RoomCode,
    user: &str,
) -> (i64, usize, ParticipantStatus) {
    let tracker = &server.state().tracker;
    let session = tracker.active_session(room).await.unwrap().unwrap();
    let open_rows = tracker
        .attendance(session.id)
        .await
        .unwrap()
        .iter()
        .filter(|row| row.user_id == UserId::from(user) && row.is_open())
        .count();
    let status = tracker
        .participant(room, &UserId::from(user))
        .await
        .unwrap()
        .unwrap()
        .status;
    (session.participant_count, open_rows, status)
}

async fn leave_and_sync(client: &mut TestSignalingClient, room: &RoomCode) {
    client
        .send(&ClientMessage::LeaveRoom {
            room_code: room.clone(),
        })
        .await
        .unwrap();
    // Frames are handled in order, so the pong follows the finished leave.
    client.send(&ClientMessage::Ping).await.unwrap();
    client
        .recv_until(|m| *m == ServerMessage::Pong)
        .await
        .unwrap();
}

// ============================================================================
// Membership
// ============================================================================

#[tokio::test]
async fn test_two_party_join_announces_members() {
    let (server, room) = server_with_room().await;
    let mut c1 = client(&server).await;
    let mut c2 = client(&server).await;

    let (members, is_host) = expect_joined(c1.join(&room, "alice").await.unwrap());
    assert!(members.is_empty());
    assert!(is_host);

    let (members, is_host) = expect_joined(c2.join(&room, "bob").await.unwrap());
    assert_eq!(members, vec![c1.connection_id().clone()]);
    assert!(!is_host);

    let announced = c1.recv().await.unwrap();
    assert_eq!(
        announced,
        ServerMessage::MemberJoined {
            room_code: room.clone(),
            connection_id: c2.connection_id().clone(),
        }
    );

    let live = server.state().registry.members(&room).await.unwrap();
    assert_eq!(live.len(), 2);
}

#[tokio::test]
async fn test_repeated_join_does_not_duplicate_membership() {
    let (server, room) = server_with_room().await;
    let mut c1 = client(&server).await;

    c1.join(&room, "alice").await.unwrap();
    let (members, _) = expect_joined(c1.join(&room, "alice").await.unwrap());
    assert!(members.is_empty());

    let live = server.state().registry.members(&room).await.unwrap();
    assert_eq!(live, vec![c1.connection_id().clone()]);

    let (server, room) = (&server, &room);
    eventually(|| async move {
        server
            .state()
            .tracker
            .active_session(room)
            .await
            .unwrap()
            .is_some_and(|s| s.participant_count == 1)
    })
    .await;
}

#[tokio::test]
async fn test_leave_and_disconnect_announce_departure() {
    let (server, room) = server_with_room().await;
    let mut c1 = client(&server).await;
    let mut c2 = client(&server).await;
    let mut c3 = client(&server).await;

    c1.join(&room, "alice").await.unwrap();
    c2.join(&room, "bob").await.unwrap();
    c3.join(&room, "carol").await.unwrap();

    let c2_id = c2.connection_id().clone();
    let c3_id = c3.connection_id().clone();

    c2.send(&ClientMessage::LeaveRoom {
        room_code: room.clone(),
    })
    .await
    .unwrap();
    let left = c1
        .recv_until(|m| matches!(m, ServerMessage::MemberLeft { .. }))
        .await
        .unwrap();
    assert_eq!(
        left,
        ServerMessage::MemberLeft {
            room_code: room.clone(),
            connection_id: c2_id,
        }
    );

    c3.close().await.unwrap();
    let dropped = c1
        .recv_until(|m| matches!(m, ServerMessage::MemberLeft { .. }))
        .await
        .unwrap();
    assert_eq!(
        dropped,
        ServerMessage::MemberLeft {
            room_code: room.clone(),
            connection_id: c3_id,
        }
    );

    let (server, room) = (&server, &room);
    eventually(|| async move {
        server
            .state()
            .tracker
            .active_session(room)
            .await
            .unwrap()
            .is_some_and(|s| s.participant_count == 1)
    })
    .await;
}

#[tokio::test]
async fn test_second_tab_leaving_keeps_user_attendance_open() {
    let (server, room) = server_with_room().await;
    let mut host = client(&server).await;
    let mut tab1 = client(&server).await;
    let mut tab2 = client(&server).await;

    host.join(&room, "alice").await.unwrap();
    tab1.join(&room, "bob").await.unwrap();
    let (members, _) = expect_joined(tab2.join(&room, "bob").await.unwrap());
    assert_eq!(members.len(), 2);
    assert_eq!(
        attendance_of(&server, &room, "bob").await,
        (2, 1, ParticipantStatus::Joined)
    );

    leave_and_sync(&mut tab1, &room).await;

    let live = server.state().registry.members(&room).await.unwrap();
    assert_eq!(live.len(), 2);
    assert_eq!(
        attendance_of(&server, &room, "bob").await,
        (2, 1, ParticipantStatus::Joined),
        "bob is still present through the second tab"
    );

    leave_and_sync(&mut tab2, &room).await;

    assert_eq!(
        attendance_of(&server, &room, "bob").await,
        (1, 0, ParticipantStatus::Left)
    );
}

#[tokio::test]
async fn test_reconnect_before_old_socket_is_reaped_keeps_attendance() {
    let (server, room) = server_with_room().await;
    let mut host = client(&server).await;
    let mut stale = client(&server).await;
    let mut fresh = client(&server).await;

    host.join(&room, "alice").await.unwrap();
    stale.join(&room, "bob").await.unwrap();
    fresh.join(&room, "bob").await.unwrap();
    let stale_id = stale.connection_id().clone();

    stale.close().await.unwrap();

    let left = fresh
        .recv_until(|m| matches!(m, ServerMessage::MemberLeft { .. }))
        .await
        .unwrap();
    assert_eq!(
        left,
        ServerMessage::MemberLeft {
            room_code: room.clone(),
            connection_id: stale_id,
        }
    );
    // Attendance bookkeeping runs after the departure broadcast.
    tokio::time::sleep(QUIET).await;

    assert_eq!(
        attendance_of(&server, &room, "bob").await,
        (2, 1, ParticipantStatus::Joined)
    );
}

#[tokio::test]
async fn test_last_member_leaving_removes_room_from_registry() {
    let (server, room) = server_with_room().await;
    let mut c1 = client(&server).await;
    c1.join(&room, "alice").await.unwrap();

    c1.send(&ClientMessage::LeaveRoom {
        room_code: room.clone(),
    })
    .await
    .unwrap();
    c1.send(&ClientMessage::Ping).await.unwrap();
    c1.recv_until(|m| *m == ServerMessage::Pong).await.unwrap();

    assert!(server
        .state()
        .registry
        .room_state(&room)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_join_unknown_room_is_rejected() {
    let server = TestRoomServer::spawn().await.unwrap();
    let mut c1 = client(&server).await;
    let room: RoomCode = "ZZ99ZZ99ZZ".parse().unwrap();

    let reply = c1.join(&room, "alice").await.unwrap();
    assert_eq!(expect_error_code(reply), "NOT_FOUND");
}

// ============================================================================
// Relay
// ============================================================================

#[tokio::test]
async fn test_signal_is_relayed_with_sender_id() {
    let (server, room) = server_with_room().await;
    let mut c1 = client(&server).await;
    let mut c2 = client(&server).await;
    c1.join(&room, "alice").await.unwrap();
    c2.join(&room, "bob").await.unwrap();

    let payload = SignalPayload::new(r#"{"sdp":"v=0"}"#);
    c2.send(&ClientMessage::Signal {
        to: c1.connection_id().clone(),
        payload: payload.clone(),
    })
    .await
    .unwrap();

    let relayed = c1
        .recv_until(|m| matches!(m, ServerMessage::Signal { .. }))
        .await
        .unwrap();
    assert_eq!(
        relayed,
        ServerMessage::Signal {
            from: c2.connection_id().clone(),
            payload,
        }
    );
}

#[tokio::test]
async fn test_signal_to_unknown_target_is_dropped_silently() {
    let (server, room) = server_with_room().await;
    let mut c1 = client(&server).await;
    c1.join(&room, "alice").await.unwrap();

    c1.send(&ClientMessage::Signal {
        to: ConnectionId::from("nobody"),
        payload: SignalPayload::new("offer"),
    })
    .await
    .unwrap();

    c1.expect_silence(QUIET).await.unwrap();
}

// ============================================================================
// Host actions
// ============================================================================

#[tokio::test]
async fn test_close_room_by_non_host_is_rejected() {
    let (server, room) = server_with_room().await;
    let mut c1 = client(&server).await;
    let mut c2 = client(&server).await;
    c1.join(&room, "alice").await.unwrap();
    c2.join(&room, "bob").await.unwrap();

    c2.send(&ClientMessage::CloseRoom {
        room_code: room.clone(),
    })
    .await
    .unwrap();
    let reply = c2
        .recv_until(|m| matches!(m, ServerMessage::Error { .. }))
        .await
        .unwrap();
    assert_eq!(expect_error_code(reply), "FORBIDDEN");

    assert!(server.state().rooms.ensure_open(&room).await.is_ok());
    assert_eq!(
        server.state().registry.members(&room).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_host_close_notifies_everyone_and_blocks_rejoin() {
    let (server, room) = server_with_room().await;
    let mut c1 = client(&server).await;
    let mut c2 = client(&server).await;
    let mut c3 = client(&server).await;
    c1.join(&room, "alice").await.unwrap();
    c2.join(&room, "bob").await.unwrap();
    c3.join(&room, "carol").await.unwrap();

    c1.send(&ClientMessage::CloseRoom {
        room_code: room.clone(),
    })
    .await
    .unwrap();

    for c in [&mut c1, &mut c2, &mut c3] {
        let ended = c
            .recv_until(|m| matches!(m, ServerMessage::RoomEnded { .. }))
            .await
            .unwrap();
        assert_eq!(
            ended,
            ServerMessage::RoomEnded {
                room_code: room.clone()
            }
        );
    }

    let mut late = client(&server).await;
    let reply = late.join(&room, "dave").await.unwrap();
    assert_eq!(expect_error_code(reply), "GONE");
}

#[tokio::test]
async fn test_host_mute_reaches_target() {
    let (server, room) = server_with_room().await;
    let mut c1 = client(&server).await;
    let mut c2 = client(&server).await;
    c1.join(&room, "alice").await.unwrap();
    c2.join(&room, "bob").await.unwrap();

    c1.send(&ClientMessage::HostMute {
        room_code: room.clone(),
        target_user_id: UserId::from("bob"),
        muted: true,
    })
    .await
    .unwrap();

    let muted = c2
        .recv_until(|m| matches!(m, ServerMessage::MutedByHost { .. }))
        .await
        .unwrap();
    assert_eq!(
        muted,
        ServerMessage::MutedByHost {
            room_code: room.clone(),
            muted: true
        }
    );

    let bob = server
        .state()
        .tracker
        .participant(&room, &UserId::from("bob"))
        .await
        .unwrap()
        .unwrap();
    assert!(bob.muted_by_host);
}

// ============================================================================
// Protocol errors
// ============================================================================

#[tokio::test]
async fn test_malformed_frame_gets_error_and_channel_survives() {
    let server = TestRoomServer::spawn().await.unwrap();
    let mut c1 = client(&server).await;

    c1.send_text("{\"type\":\"dance\"}").await.unwrap();
    let reply = c1.recv().await.unwrap();
    assert_eq!(expect_error_code(reply), "BAD_REQUEST");

    c1.send(&ClientMessage::Ping).await.unwrap();
    assert_eq!(c1.recv().await.unwrap(), ServerMessage::Pong);
}

#[tokio::test]
async fn test_close_room_without_joining_is_forbidden() {
    let (server, room) = server_with_room().await;
    let mut c1 = client(&server).await;

    c1.send(&ClientMessage::CloseRoom { room_code: room })
        .await
        .unwrap();
    let reply = c1.recv().await.unwrap();
    assert_eq!(expect_error_code(reply), "FORBIDDEN");
}

// ============================================================================
// Rooms API
// ============================================================================

#[tokio::test]
async fn test_create_and_get_room_over_http() {
    let server = TestRoomServer::spawn().await.unwrap();
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{}/api/v1/rooms", server.url()))
        .json(&serde_json::json!({ "creator_id": "alice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    let code: RoomCode = body["room_code"].as_str().unwrap().parse().unwrap();

    let mut c1 = client(&server).await;
    c1.join(&code, "alice").await.unwrap();

    let response = http
        .get(format!("{}/api/v1/rooms/{}", server.url(), code))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["created_by"], "alice");
    assert_eq!(body["is_open"], true);
    assert_eq!(body["live_members"], 1);
    assert_eq!(body["participant_count"], 1);
    assert!(body["active_session_id"].is_string());
}

#[tokio::test]
async fn test_get_room_errors_over_http() {
    let server = TestRoomServer::spawn().await.unwrap();
    let http = reqwest::Client::new();

    let missing = http
        .get(format!("{}/api/v1/rooms/ZZ99ZZ99ZZ", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let malformed = http
        .get(format!("{}/api/v1/rooms/short", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), 400);
}

#[tokio::test]
async fn test_readiness_probe() {
    let server = TestRoomServer::spawn().await.unwrap();
    let response = reqwest::get(format!("{}/ready", server.url()))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    server.health().set_not_ready();
    let response = reqwest::get(format!("{}/ready", server.url()))
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
}
